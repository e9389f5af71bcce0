//! Engine and sub-store trait definitions

use crate::error::StorageResult;
use crate::message::StoredMessage;
use crate::session::PersistentSession;

/// Embedded key-value engine backing the broker's persistent state.
///
/// Data is organised in named maps of string keys to opaque byte values.
/// Implementations are responsible for their own internal synchronization:
/// reads, writes and commits may arrive concurrently from request-path
/// callers and from the autosave task.
pub trait Engine: Send + Sync {
    /// Get a value from a map
    fn get(&self, map: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Insert or replace a value in a map
    fn put(&self, map: &str, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Remove a value, returning whether it was present
    fn remove(&self, map: &str, key: &str) -> StorageResult<bool>;

    /// List all keys of a map
    fn keys(&self, map: &str) -> StorageResult<Vec<String>>;

    /// Durably flush pending writes
    fn commit(&self) -> StorageResult<()>;

    /// Close the engine. Closing an already closed engine is a no-op.
    fn close(&self) -> StorageResult<()>;

    fn is_closed(&self) -> bool;

    /// Number of commits that completed successfully
    fn commit_count(&self) -> u64;
}

/// Store for retained and in-flight publish messages
pub trait MessagesStore: Send + Sync {
    /// Prepare the store's maps. Called once by the coordinator before use.
    fn init_store(&self) -> StorageResult<()>;

    /// Persist a message and return its generated GUID
    fn store_message(&self, message: &StoredMessage) -> StorageResult<String>;

    fn message(&self, guid: &str) -> StorageResult<Option<StoredMessage>>;

    /// Delete a message body regardless of outstanding references
    fn remove_message(&self, guid: &str) -> StorageResult<()>;

    /// Record one more holder (a session queue or a retained topic) of a message
    fn add_reference(&self, guid: &str) -> StorageResult<()>;

    /// Drop one holder of a message. The body is deleted with the last one.
    fn release_reference(&self, guid: &str) -> StorageResult<()>;

    /// Mark a stored message as the retained message of a topic
    fn store_retained(&self, topic: &str, guid: &str) -> StorageResult<()>;

    fn retained(&self, topic: &str) -> StorageResult<Option<StoredMessage>>;

    fn clean_retained(&self, topic: &str) -> StorageResult<()>;

    fn retained_topics(&self) -> StorageResult<Vec<String>>;
}

/// Store for client session metadata and per-session delivery queues
pub trait SessionsStore: Send + Sync {
    /// Prepare the store's maps. Called once by the coordinator before use.
    fn init_store(&self) -> StorageResult<()>;

    /// Record a new session snapshot for a connecting client
    fn create_new_session(
        &self,
        client_id: &str,
        clean_session: bool,
    ) -> StorageResult<PersistentSession>;

    fn session(&self, client_id: &str) -> StorageResult<Option<PersistentSession>>;

    fn contains(&self, client_id: &str) -> StorageResult<bool>;

    /// Replace the stored snapshot with one carrying the new clean flag
    fn update_clean_status(&self, client_id: &str, clean_session: bool) -> StorageResult<()>;

    /// Queue a stored message (by GUID) for delivery to a client
    fn enqueue(&self, client_id: &str, guid: &str) -> StorageResult<()>;

    /// Messages queued for a client, resolved through the message store
    fn pending_messages(&self, client_id: &str) -> StorageResult<Vec<StoredMessage>>;

    /// Drop a session and its queue, releasing the queued messages
    fn remove_session(&self, client_id: &str) -> StorageResult<()>;

    fn session_ids(&self) -> StorageResult<Vec<String>>;
}
