//! Session store bound to the embedded engine

use mqstore_core::{
    Engine, MessagesStore, PersistentSession, SessionsStore, StorageError, StorageResult,
    StoredMessage,
};
use std::sync::Arc;

/// client id -> encoded [`PersistentSession`]
const SESSIONS_MAP: &str = "sessions";
/// client id -> encoded list of message guids awaiting delivery
const QUEUES_MAP: &str = "queues";

/// Session snapshots and delivery queues.
///
/// Queue entries are message guids owned by the message store. Each entry
/// holds a reference on its message, taken on enqueue and released when the
/// session is removed.
pub struct EngineSessionsStore {
    engine: Arc<dyn Engine>,
    messages: Arc<dyn MessagesStore>,
}

impl EngineSessionsStore {
    pub fn new(engine: Arc<dyn Engine>, messages: Arc<dyn MessagesStore>) -> Self {
        Self { engine, messages }
    }

    fn validate_client_id(client_id: &str) -> StorageResult<()> {
        if client_id.is_empty() {
            return Err(StorageError::InvalidData(
                "Client id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn put_session(&self, client_id: &str, session: PersistentSession) -> StorageResult<()> {
        self.engine
            .put(SESSIONS_MAP, client_id, serde_json::to_vec(&session)?)
    }

    fn queue(&self, client_id: &str) -> StorageResult<Vec<String>> {
        match self.engine.get(QUEUES_MAP, client_id)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }
}

impl SessionsStore for EngineSessionsStore {
    fn init_store(&self) -> StorageResult<()> {
        let sessions = self.engine.keys(SESSIONS_MAP)?.len();
        tracing::debug!(sessions, "Sessions store initialized");
        Ok(())
    }

    fn create_new_session(
        &self,
        client_id: &str,
        clean_session: bool,
    ) -> StorageResult<PersistentSession> {
        Self::validate_client_id(client_id)?;

        if self.contains(client_id)? {
            tracing::debug!(client_id, "Replacing existing session snapshot");
        }

        let session = PersistentSession::new(clean_session);
        self.put_session(client_id, session)?;
        Ok(session)
    }

    fn session(&self, client_id: &str) -> StorageResult<Option<PersistentSession>> {
        match self.engine.get(SESSIONS_MAP, client_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, client_id: &str) -> StorageResult<bool> {
        Ok(self.engine.get(SESSIONS_MAP, client_id)?.is_some())
    }

    fn update_clean_status(&self, client_id: &str, clean_session: bool) -> StorageResult<()> {
        if !self.contains(client_id)? {
            return Err(StorageError::InvalidData(format!(
                "No session for client '{}'",
                client_id
            )));
        }
        self.put_session(client_id, PersistentSession::new(clean_session))
    }

    fn enqueue(&self, client_id: &str, guid: &str) -> StorageResult<()> {
        Self::validate_client_id(client_id)?;

        let mut queue = self.queue(client_id)?;
        queue.push(guid.to_string());
        self.messages.add_reference(guid)?;
        self.engine
            .put(QUEUES_MAP, client_id, serde_json::to_vec(&queue)?)
    }

    fn pending_messages(&self, client_id: &str) -> StorageResult<Vec<StoredMessage>> {
        let mut pending = Vec::new();
        for guid in self.queue(client_id)? {
            match self.messages.message(&guid)? {
                Some(message) => pending.push(message),
                None => tracing::debug!(client_id, guid = %guid, "Queued message no longer stored"),
            }
        }
        Ok(pending)
    }

    fn remove_session(&self, client_id: &str) -> StorageResult<()> {
        // Other queues or a retained topic may still hold these messages
        for guid in self.queue(client_id)? {
            self.messages.release_reference(&guid)?;
        }
        self.engine.remove(QUEUES_MAP, client_id)?;
        self.engine.remove(SESSIONS_MAP, client_id)?;
        Ok(())
    }

    fn session_ids(&self) -> StorageResult<Vec<String>> {
        self.engine.keys(SESSIONS_MAP)
    }
}
