//! Behavioural tests for [`MemoryStore`]: atomic batches, commit-ordered
//! change delivery and snapshot-then-stream subscriptions.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::sync::Arc;

use chrono::Utc;
use dispatch_store::{
    EntityFilter, EntityStore, FeedItem, MemoryStore, StoreError, WriteBatch,
};
use dispatch_types::{
    AmbulanceRegistration, AmbulanceStatus, ChangeOp, EmergencyReport, EmergencyStatus, Entity,
    EntityKind, Severity, UserId,
};

async fn seed_ambulance(store: &MemoryStore, staffed: bool) -> Entity {
    let mut ambulance = AmbulanceRegistration {
        vehicle_id: String::from("AMB-001"),
        driver_id: None,
        hospital_id: None,
    }
    .into_ambulance(Utc::now());
    if staffed {
        ambulance.driver_id = Some(UserId::new());
    }
    store.insert(ambulance.into()).await.unwrap()
}

async fn seed_emergency(store: &MemoryStore) -> Entity {
    let emergency = EmergencyReport {
        reporter_id: None,
        location_address: String::from("5 Harbour Road"),
        latitude: 1.0,
        longitude: 1.0,
        severity: Severity::High,
        description: None,
    }
    .into_emergency(Utc::now());
    store.insert(emergency.into()).await.unwrap()
}

#[tokio::test]
async fn paired_update_commits_both_or_neither() {
    let store = MemoryStore::new();
    let ambulance = seed_ambulance(&store, true).await.into_ambulance().unwrap();
    let emergency = seed_emergency(&store).await.into_emergency().unwrap();

    let mut a = ambulance.clone();
    a.status = AmbulanceStatus::EnRoute;
    let mut e = emergency.clone();
    e.status = EmergencyStatus::Assigned;
    e.assigned_ambulance_id = Some(a.id);

    // A concurrent writer touches the emergency first.
    let mut stale = e.clone();
    stale.description = Some(String::from("caller called back"));
    let bumped = store.update(emergency.clone().into()).await.unwrap();
    let err = store
        .apply(WriteBatch::new().update(a.clone()).update(stale))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
    assert_eq!(
        store.ambulance(ambulance.id).await.unwrap().status,
        AmbulanceStatus::Idle
    );

    e.version = bumped.version();
    assert_eq!(
        store.emergency(emergency.id).await.unwrap().status,
        EmergencyStatus::Pending
    );

    let committed = store
        .apply(WriteBatch::new().update(a).update(e))
        .await
        .unwrap();
    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].version(), 2);
    assert_eq!(committed[1].version(), 3);
    assert_eq!(
        store.emergency(emergency.id).await.unwrap().assigned_ambulance_id,
        Some(ambulance.id)
    );
}

#[tokio::test]
async fn concurrent_writers_exactly_one_wins() {
    let store = Arc::new(MemoryStore::new());
    let ambulance = seed_ambulance(&store, true).await.into_ambulance().unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let mut copy = ambulance.clone();
        copy.status = AmbulanceStatus::EnRoute;
        handles.push(tokio::spawn(async move { store.update(copy.into()).await }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) if e.is_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn feed_delivers_each_record_in_commit_order() {
    let store = MemoryStore::new();
    let mut rx = store.feed().subscribe();
    let inserted = seed_ambulance(&store, true).await;

    let mut current = inserted.into_ambulance().unwrap();
    for status in [
        AmbulanceStatus::EnRoute,
        AmbulanceStatus::OnScene,
        AmbulanceStatus::Returning,
    ] {
        current.status = status;
        current = store
            .update(current.clone().into())
            .await
            .unwrap()
            .into_ambulance()
            .unwrap();
    }

    let mut versions = Vec::new();
    let mut ops = Vec::new();
    while let Ok(FeedItem::Change(event)) = rx.try_recv() {
        versions.push(event.version);
        ops.push(event.op);
    }
    assert_eq!(versions, vec![1, 2, 3, 4]);
    assert_eq!(ops[0], ChangeOp::Insert);
    assert!(ops[1..].iter().all(|op| *op == ChangeOp::Update));
}

#[tokio::test]
async fn subscription_snapshot_then_stream() {
    let store = MemoryStore::new();
    seed_ambulance(&store, true).await;

    let mut sub = store.subscribe(EntityKind::Ambulance).await.unwrap();
    assert_eq!(sub.snapshot.len(), 1);

    let late = seed_ambulance(&store, false).await;
    match sub.changes.recv().await.unwrap() {
        FeedItem::Change(event) => assert_eq!(event.key, late.key()),
        FeedItem::Gap => panic!("unexpected gap"),
    }
}

#[tokio::test]
async fn assignable_query_excludes_unstaffed_and_busy() {
    let store = MemoryStore::new();
    let staffed = seed_ambulance(&store, true).await;
    seed_ambulance(&store, false).await;
    let mut busy = seed_ambulance(&store, true).await.into_ambulance().unwrap();
    busy.status = AmbulanceStatus::OnScene;
    store.update(busy.into()).await.unwrap();

    let found = store
        .query(&EntityFilter::assignable_ambulances())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key(), staffed.key());
}

#[tokio::test]
async fn list_is_ordered_by_id() {
    let store = MemoryStore::new();
    for _ in 0..5 {
        seed_emergency(&store).await;
    }
    let ids: Vec<_> = store
        .list(EntityKind::Emergency)
        .await
        .unwrap()
        .iter()
        .map(Entity::id)
        .collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}
