//! End-to-end lifecycle tests for the persistent store coordinator

use mqstore_core::{Engine, MessagesStore, QoS, SessionsStore, StoreState, StoredMessage};
use mqstore_storage::{EngineSubStores, PersistentStore, Provenance, StoreConfig, SubStoreFactory};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Production sub-stores, keeping a handle on the engine for inspection
#[derive(Default)]
struct EngineCapture {
    engine: Mutex<Option<Arc<dyn Engine>>>,
}

impl EngineCapture {
    fn engine(&self) -> Arc<dyn Engine> {
        self.engine.lock().unwrap().clone().unwrap()
    }
}

impl SubStoreFactory for EngineCapture {
    fn messages_store(&self, engine: Arc<dyn Engine>) -> Arc<dyn MessagesStore> {
        *self.engine.lock().unwrap() = Some(engine.clone());
        EngineSubStores.messages_store(engine)
    }

    fn sessions_store(
        &self,
        engine: Arc<dyn Engine>,
        messages: Arc<dyn MessagesStore>,
    ) -> Arc<dyn SessionsStore> {
        EngineSubStores.sessions_store(engine, messages)
    }
}

fn file_config(dir: &TempDir) -> StoreConfig {
    let path = dir.path().join("broker_store.db");
    StoreConfig::with_path(path.to_string_lossy().into_owned())
}

fn dir_entries(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

async fn close_then_file_len(store: &PersistentStore, path: &Path) -> u64 {
    store.close().await;
    std::fs::metadata(path).unwrap().len()
}

#[tokio::test]
async fn test_in_memory_store_never_touches_disk() {
    let temp_dir = TempDir::new().unwrap();
    let cwd_before = std::fs::read_dir(".").unwrap().count();
    let store = PersistentStore::new(StoreConfig::default());

    store.init().await.unwrap();
    let sessions = store.sessions_store().unwrap();
    sessions.create_new_session("client-1", false).unwrap();
    store.close().await;

    assert_eq!(store.provenance(), Some(Provenance::InMemory));
    assert_eq!(std::fs::read_dir(".").unwrap().count(), cwd_before);
    assert_eq!(dir_entries(&temp_dir), 0);
}

#[tokio::test]
async fn test_store_file_is_created_once() {
    let temp_dir = TempDir::new().unwrap();
    let config = file_config(&temp_dir);

    let first = PersistentStore::new(config.clone());
    first.init().await.unwrap();
    assert_eq!(first.provenance(), Some(Provenance::Created));
    first
        .sessions_store()
        .unwrap()
        .create_new_session("client-1", true)
        .unwrap();
    first.close().await;

    let second = PersistentStore::new(config);
    second.init().await.unwrap();
    assert_eq!(second.provenance(), Some(Provenance::Existing));
    assert!(second.sessions_store().unwrap().contains("client-1").unwrap());
    second.close().await;
}

#[tokio::test]
async fn test_reopen_without_close_reports_existing() {
    let temp_dir = TempDir::new().unwrap();
    let config = file_config(&temp_dir);

    let first = PersistentStore::new(config.clone());
    first.init().await.unwrap();
    let second = PersistentStore::new(config);
    second.init().await.unwrap();

    assert_eq!(first.provenance(), Some(Provenance::Created));
    assert_eq!(second.provenance(), Some(Provenance::Existing));

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn test_missing_parent_directory_fails_init() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("no/such/dir/store.db");
    let store = PersistentStore::new(StoreConfig::with_path(path.to_string_lossy().into_owned()));

    let err = store.init().await.unwrap_err();

    assert!(err.to_string().contains("store.db"));
    assert_eq!(store.state(), StoreState::Uninitialized);
    assert!(store.messages_store().is_err());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let capture = Arc::new(EngineCapture::default());
    let store = PersistentStore::with_factory(file_config(&temp_dir), capture.clone());
    store.init().await.unwrap();

    store.close().await;
    let engine = capture.engine();
    let commits = engine.commit_count();
    assert!(engine.is_closed());

    store.close().await;
    store.close().await;
    assert_eq!(store.state(), StoreState::Closed);
    assert_eq!(engine.commit_count(), commits);
}

#[tokio::test]
async fn test_concurrent_closes_all_return_after_final_commit() {
    let temp_dir = TempDir::new().unwrap();
    let config = file_config(&temp_dir);
    let path = temp_dir.path().join("broker_store.db");
    let store = PersistentStore::new(config.clone());
    store.init().await.unwrap();
    store
        .sessions_store()
        .unwrap()
        .create_new_session("client-1", false)
        .unwrap();

    let (first, second) = tokio::join!(
        close_then_file_len(&store, &path),
        close_then_file_len(&store, &path)
    );

    assert!(first > 0);
    assert!(second > 0);
    assert_eq!(store.state(), StoreState::Closed);

    let reopened = PersistentStore::new(config);
    reopened.init().await.unwrap();
    assert!(reopened.sessions_store().unwrap().contains("client-1").unwrap());
    reopened.close().await;
}

#[tokio::test]
async fn test_shared_queued_message_survives_session_removal_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = file_config(&temp_dir);

    {
        let store = PersistentStore::new(config.clone());
        store.init().await.unwrap();
        let messages = store.messages_store().unwrap();
        let sessions = store.sessions_store().unwrap();
        let guid = messages
            .store_message(&StoredMessage::new("fanout", QoS::AtLeastOnce, b"hi".to_vec()))
            .unwrap();
        sessions.create_new_session("client-1", false).unwrap();
        sessions.create_new_session("client-2", false).unwrap();
        sessions.enqueue("client-1", &guid).unwrap();
        sessions.enqueue("client-2", &guid).unwrap();
        store.close().await;
    }

    let store = PersistentStore::new(config);
    store.init().await.unwrap();
    let sessions = store.sessions_store().unwrap();
    sessions.remove_session("client-1").unwrap();

    let pending = sessions.pending_messages("client-2").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, b"hi".to_vec());
    store.close().await;
}

#[tokio::test]
async fn test_autosave_commits_within_two_intervals_and_stops_on_close() {
    let capture = Arc::new(EngineCapture::default());
    let config = StoreConfig::default().with_autosave_interval_seconds(1);
    let store = PersistentStore::with_factory(config, capture.clone());
    store.init().await.unwrap();
    let engine = capture.engine();

    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert!(engine.commit_count() >= 1);

    store.close().await;
    let after_close = engine.commit_count();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(engine.commit_count(), after_close);
}

#[tokio::test]
async fn test_autosave_persists_without_close() {
    let temp_dir = TempDir::new().unwrap();
    let config = file_config(&temp_dir).with_autosave_interval_seconds(1);

    let store = PersistentStore::new(config.clone());
    store.init().await.unwrap();
    store
        .sessions_store()
        .unwrap()
        .create_new_session("client-1", false)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1600)).await;

    // A second instance sees whatever autosave committed
    let reader = PersistentStore::new(config);
    reader.init().await.unwrap();
    assert!(reader.sessions_store().unwrap().contains("client-1").unwrap());

    reader.close().await;
    store.close().await;
}

#[tokio::test]
async fn test_clean_session_flags_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = file_config(&temp_dir);

    {
        let store = PersistentStore::new(config.clone());
        store.init().await.unwrap();
        let sessions = store.sessions_store().unwrap();
        sessions.create_new_session("clean-client", true).unwrap();
        sessions.create_new_session("durable-client", false).unwrap();
        store.close().await;
    }

    let store = PersistentStore::new(config);
    store.init().await.unwrap();
    let sessions = store.sessions_store().unwrap();

    assert!(sessions.session("clean-client").unwrap().unwrap().clean_session);
    assert!(!sessions.session("durable-client").unwrap().unwrap().clean_session);
    store.close().await;
}

#[tokio::test]
async fn test_retained_and_queued_messages_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = file_config(&temp_dir);

    {
        let store = PersistentStore::new(config.clone());
        store.init().await.unwrap();
        let messages = store.messages_store().unwrap();
        let sessions = store.sessions_store().unwrap();

        let retained = StoredMessage::new("status/door", QoS::AtLeastOnce, b"open".to_vec())
            .retained(true);
        let guid = messages.store_message(&retained).unwrap();
        messages.store_retained("status/door", &guid).unwrap();

        sessions.create_new_session("client-1", false).unwrap();
        let queued = messages
            .store_message(&StoredMessage::new("alerts", QoS::ExactlyOnce, b"smoke".to_vec()))
            .unwrap();
        sessions.enqueue("client-1", &queued).unwrap();
        store.close().await;
    }

    let store = PersistentStore::new(config);
    store.init().await.unwrap();
    let messages = store.messages_store().unwrap();
    let sessions = store.sessions_store().unwrap();

    let retained = messages.retained("status/door").unwrap().unwrap();
    assert_eq!(retained.payload, b"open".to_vec());

    let pending = sessions.pending_messages("client-1").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].topic, "alerts");
    store.close().await;
}

#[tokio::test]
async fn test_stores_in_one_process_are_isolated() {
    let first = PersistentStore::new(StoreConfig::default());
    let second = PersistentStore::new(StoreConfig::default());
    first.init().await.unwrap();
    second.init().await.unwrap();

    first
        .sessions_store()
        .unwrap()
        .create_new_session("client-1", true)
        .unwrap();
    first.close().await;

    assert_eq!(second.state(), StoreState::Initialized);
    assert!(!second.sessions_store().unwrap().contains("client-1").unwrap());
    second.close().await;
}
