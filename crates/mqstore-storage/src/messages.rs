//! Message store bound to the embedded engine

use mqstore_core::{Engine, MessagesStore, StorageError, StorageResult, StoredMessage};
use std::sync::{Arc, Mutex, MutexGuard};

/// guid -> encoded [`StoredMessage`]
const MESSAGES_MAP: &str = "messages";
/// topic -> guid of the retained message
const RETAINED_MAP: &str = "retained";
/// guid -> number of queues and retained topics holding the message
const REFS_MAP: &str = "refs";

/// Messages keyed by guid, shared between session queues and retained topics.
///
/// A message body lives as long as something references it. Reference counts
/// are kept in the engine next to the bodies so they survive a reopen.
pub struct EngineMessagesStore {
    engine: Arc<dyn Engine>,
    refs_lock: Mutex<()>,
}

impl EngineMessagesStore {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            refs_lock: Mutex::new(()),
        }
    }

    fn lock_refs(&self) -> StorageResult<MutexGuard<'_, ()>> {
        self.refs_lock
            .lock()
            .map_err(|_| StorageError::InvalidState("reference lock poisoned".to_string()))
    }

    fn ref_count(&self, guid: &str) -> StorageResult<u64> {
        match self.engine.get(REFS_MAP, guid)? {
            Some(bytes) => String::from_utf8_lossy(&bytes)
                .parse()
                .map_err(|_| StorageError::InvalidData(format!("bad reference count for {guid}"))),
            None => Ok(0),
        }
    }

    /// Caller holds `refs_lock`
    fn retain(&self, guid: &str) -> StorageResult<()> {
        let count = self.ref_count(guid)? + 1;
        self.engine
            .put(REFS_MAP, guid, count.to_string().into_bytes())
    }

    /// Caller holds `refs_lock`
    fn release(&self, guid: &str) -> StorageResult<()> {
        match self.ref_count(guid)? {
            0 | 1 => {
                self.engine.remove(REFS_MAP, guid)?;
                if self.engine.remove(MESSAGES_MAP, guid)? {
                    tracing::trace!(guid, "Dropped unreferenced message");
                }
                Ok(())
            }
            count => self
                .engine
                .put(REFS_MAP, guid, (count - 1).to_string().into_bytes()),
        }
    }
}

impl MessagesStore for EngineMessagesStore {
    fn init_store(&self) -> StorageResult<()> {
        let retained = self.engine.keys(RETAINED_MAP)?.len();
        let messages = self.engine.keys(MESSAGES_MAP)?.len();
        tracing::debug!(retained, messages, "Messages store initialized");
        Ok(())
    }

    fn store_message(&self, message: &StoredMessage) -> StorageResult<String> {
        let guid = uuid::Uuid::new_v4().to_string();
        self.engine
            .put(MESSAGES_MAP, &guid, serde_json::to_vec(message)?)?;
        Ok(guid)
    }

    fn message(&self, guid: &str) -> StorageResult<Option<StoredMessage>> {
        match self.engine.get(MESSAGES_MAP, guid)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn remove_message(&self, guid: &str) -> StorageResult<()> {
        let _refs = self.lock_refs()?;
        self.engine.remove(REFS_MAP, guid)?;
        self.engine.remove(MESSAGES_MAP, guid)?;
        Ok(())
    }

    fn add_reference(&self, guid: &str) -> StorageResult<()> {
        let _refs = self.lock_refs()?;
        self.retain(guid)
    }

    fn release_reference(&self, guid: &str) -> StorageResult<()> {
        let _refs = self.lock_refs()?;
        self.release(guid)
    }

    /// The topic takes a reference on `guid` and releases the message it
    /// retained before, if any
    fn store_retained(&self, topic: &str, guid: &str) -> StorageResult<()> {
        let _refs = self.lock_refs()?;
        let previous = self
            .engine
            .get(RETAINED_MAP, topic)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        if previous.as_deref() == Some(guid) {
            return Ok(());
        }

        self.retain(guid)?;
        self.engine
            .put(RETAINED_MAP, topic, guid.as_bytes().to_vec())?;
        if let Some(previous) = previous {
            self.release(&previous)?;
        }
        Ok(())
    }

    fn retained(&self, topic: &str) -> StorageResult<Option<StoredMessage>> {
        match self.engine.get(RETAINED_MAP, topic)? {
            Some(guid) => self.message(&String::from_utf8_lossy(&guid)),
            None => Ok(None),
        }
    }

    fn clean_retained(&self, topic: &str) -> StorageResult<()> {
        let _refs = self.lock_refs()?;
        if let Some(guid) = self.engine.get(RETAINED_MAP, topic)? {
            self.engine.remove(RETAINED_MAP, topic)?;
            self.release(&String::from_utf8_lossy(&guid))?;
        }
        Ok(())
    }

    fn retained_topics(&self) -> StorageResult<Vec<String>> {
        self.engine.keys(RETAINED_MAP)
    }
}
