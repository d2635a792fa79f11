//! Commit-ordered change feed.
//!
//! Each store owns one [`ChangeFeed`]. Committed writes are published in
//! commit order on a [`tokio::sync::broadcast`] channel, so every receiver
//! sees the mutations of any single record in the order they were
//! committed. A [`FeedItem::Gap`] tells receivers that notifications may
//! have been lost (e.g. the database listener reconnected) and that they
//! must re-read state instead of trusting their incremental view.

use dispatch_types::{ChangeEvent, Entity};
use tokio::sync::broadcast;

/// Default capacity of the change feed.
///
/// A receiver that falls further behind than this gets
/// [`broadcast::error::RecvError::Lagged`] and must resynchronize.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// One item on the change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// A committed mutation.
    Change(ChangeEvent),
    /// Notifications may have been missed; re-read state.
    Gap,
}

/// Broadcast side of the change feed.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<FeedItem>,
}

impl ChangeFeed {
    /// Create a feed with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a committed change.
    ///
    /// Returns the number of receivers. Zero receivers is not an error.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(FeedItem::Change(event)).unwrap_or(0)
    }

    /// Tell every receiver that notifications may have been lost.
    pub fn publish_gap(&self) -> usize {
        self.tx.send(FeedItem::Gap).unwrap_or(0)
    }

    /// Open a new receiver positioned after the last published item.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedItem> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// A snapshot of one collection plus a receiver for changes after it.
///
/// The receiver may also replay changes already reflected in the
/// snapshot; consumers drop those by comparing versions.
#[derive(Debug)]
pub struct FeedSubscription {
    /// Every record of the collection at subscription time.
    pub snapshot: Vec<Entity>,
    /// Changes committed after (or concurrently with) the snapshot.
    pub changes: broadcast::Receiver<FeedItem>,
}
