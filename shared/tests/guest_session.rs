use std::collections::HashSet;
use std::sync::Arc;

use tempfile::tempdir;
use travel_log::persistence::{FilePersistence, LocalPersistence, StorageKey};
use travel_log::{
    GeocodedPlace, Mode, NoBackend, Position, RecordDraft, RecordKind, RecordStore, SeedPolicy,
    StoreConfig, TravelLog, TripDate,
};

type GuestStore = RecordStore<NoBackend, FilePersistence>;

async fn open(kind: RecordKind, seed: SeedPolicy, persistence: &Arc<FilePersistence>) -> GuestStore {
    RecordStore::open(
        StoreConfig::for_kind(kind).with_seed(seed),
        Arc::new(NoBackend),
        Arc::clone(persistence),
        Mode::from_auth(Some("guest"), None),
    )
    .await
}

fn lisbon() -> RecordDraft {
    let place = GeocodedPlace {
        city: "Lisbon".into(),
        locality: String::new(),
        country_name: "Portugal".into(),
        country_code: "pt".into(),
    };
    RecordDraft::from_place(&place, Position::new(38.72, -9.14), TripDate::new("2024-03-01"))
        .with_notes("pasteis de nata")
}

#[tokio::test]
async fn created_record_survives_reopen() {
    let dir = tempdir().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()));

    let store = open(RecordKind::Visited, SeedPolicy::Empty, &persistence).await;
    assert!(store.state().is_empty());
    assert!(!store.state().is_loading);

    let created = store.create(lisbon()).await.unwrap();
    let state = store.state();
    assert_eq!(state.len(), 1);
    assert_eq!(state.current_id(), Some(&created.id));
    assert_eq!(created.emoji, "🇵🇹");
    assert!(created.id.as_str().starts_with("guest-"));

    let reopened = open(RecordKind::Visited, SeedPolicy::Empty, &persistence).await;
    let state = reopened.state();
    assert_eq!(state.records, vec![created]);
    assert!(state.current.is_none());
}

#[tokio::test]
async fn first_guest_visit_gets_demo_record_only_for_visited() {
    let dir = tempdir().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()));

    let visited = open(RecordKind::Visited, SeedPolicy::demo(RecordKind::Visited), &persistence).await;
    let planned = open(RecordKind::Planned, SeedPolicy::demo(RecordKind::Planned), &persistence).await;

    let demo = &visited.state().records[0];
    assert_eq!(demo.id.as_str(), "demo-van");
    assert_eq!(demo.country, "Canada");
    assert_eq!(demo.emoji, "🇨🇦");
    assert!(planned.state().is_empty());

    // The seed is not written until something changes.
    let key = StorageKey::for_kind(RecordKind::Visited);
    assert_eq!(persistence.read(&key).await.unwrap(), None);
}

#[tokio::test]
async fn corrupt_file_falls_back_to_seed() {
    let dir = tempdir().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()));
    let key = StorageKey::for_kind(RecordKind::Visited);
    std::fs::write(persistence.path_for(&key), b"{\"truncated\": [").unwrap();

    let store = open(RecordKind::Visited, SeedPolicy::demo(RecordKind::Visited), &persistence).await;
    let state = store.state();
    assert_eq!(state.len(), 1);
    assert!(state.error.is_none());
    assert_eq!(store.metrics().persistence_read_failures, 1);

    // The next mutation replaces the broken file.
    store.create(lisbon()).await.unwrap();
    let stored = persistence.read(&key).await.unwrap().unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn unwritable_directory_keeps_session_in_memory() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();
    let persistence = Arc::new(FilePersistence::new(&blocker));

    let store = open(RecordKind::Planned, SeedPolicy::Empty, &persistence).await;
    let created = store.create(lisbon()).await.unwrap();

    let state = store.state();
    assert_eq!(state.len(), 1);
    assert!(state.error.is_none());
    assert_eq!(state.current_id(), Some(&created.id));

    // Storage could not be read, so the session never writes.
    let metrics = store.metrics();
    assert_eq!(metrics.persistence_read_failures, 1);
    assert_eq!(metrics.persistence_write_failures, 0);
    assert!(std::fs::read(&blocker).unwrap().is_empty());
}

#[tokio::test]
async fn get_then_delete_flow() {
    let dir = tempdir().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()));
    let store = open(RecordKind::Visited, SeedPolicy::demo(RecordKind::Visited), &persistence).await;
    let lisbon = store.create(lisbon()).await.unwrap();
    let demo_id = store.state().records[0].id.clone();

    store.get(&demo_id).await.unwrap();
    assert_eq!(store.state().current_id(), Some(&demo_id));

    store.delete(&lisbon.id).await.unwrap();
    let state = store.state();
    assert!(state.current.is_none());
    assert_eq!(state.len(), 1);

    let reopened = open(RecordKind::Visited, SeedPolicy::Empty, &persistence).await;
    assert_eq!(reopened.state().records[0].id, demo_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_distinct_ids() {
    let dir = tempdir().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()));
    let store = Arc::new(open(RecordKind::Planned, SeedPolicy::Empty, &persistence).await);

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let draft = RecordDraft::new(
                format!("City {i}"),
                Position::new(f64::from(i), 0.0),
                TripDate::new("2025-01-01"),
            );
            store.create(draft).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let state = store.state();
    assert_eq!(state.len(), 16);
    let ids: HashSet<_> = state.records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids.len(), 16);
    assert!(state.records.iter().all(|r| r.id.as_str().starts_with("plan-")));

    let stored = persistence
        .read(&StorageKey::for_kind(RecordKind::Planned))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.len(), 16);
}

#[tokio::test]
async fn guest_log_renders_scene_across_stores() {
    let dir = tempdir().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()));
    let store = |kind| {
        RecordStore::new(
            StoreConfig::for_kind(kind).with_seed(SeedPolicy::Empty),
            Arc::new(NoBackend),
            Arc::clone(&persistence),
        )
    };
    let log = TravelLog::new(store(RecordKind::Visited), store(RecordKind::Planned));
    log.set_session(Mode::Local).await.unwrap();

    for (lat, date) in [(10.0, "2020-01-01"), (20.0, "2020-06-01")] {
        log.visited()
            .create(RecordDraft::new("v", Position::new(lat, lat), TripDate::new(date)))
            .await
            .unwrap();
    }
    for (lat, date) in [(40.0, "2031-01-01"), (30.0, "2030-01-01")] {
        log.planned()
            .create(RecordDraft::new("p", Position::new(lat, lat), TripDate::new(date)))
            .await
            .unwrap();
    }

    let scene = log.scene();
    assert_eq!(
        scene.planned.iter().map(|p| p.as_pair()).collect::<Vec<_>>(),
        vec![[30.0, 30.0], [40.0, 40.0]]
    );
    let connector = scene.connector.unwrap();
    assert_eq!(connector.from.as_pair(), [20.0, 20.0]);
    assert_eq!(connector.to.as_pair(), [30.0, 30.0]);
}
