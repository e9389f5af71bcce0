//! Persistent store coordinator
//!
//! Owns the engine, builds the message and session stores in order, and runs
//! the autosave task between `init` and `close`.

use crate::autosave::AutosaveScheduler;
use crate::config::StoreConfig;
use crate::engine::{KvEngine, OpenedEngine, Provenance};
use crate::messages::EngineMessagesStore;
use crate::sessions::EngineSessionsStore;
use mqstore_core::{Engine, MessagesStore, SessionsStore, StorageError, StorageResult, StoreState};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, futures::Notified};
use tracing::Instrument;

/// Builds the sub-stores on top of an open engine
pub trait SubStoreFactory: Send + Sync {
    fn messages_store(&self, engine: Arc<dyn Engine>) -> Arc<dyn MessagesStore>;

    /// Called only after the message store's `init_store` has returned
    fn sessions_store(
        &self,
        engine: Arc<dyn Engine>,
        messages: Arc<dyn MessagesStore>,
    ) -> Arc<dyn SessionsStore>;
}

/// Sub-stores that keep their data in the embedded engine
pub struct EngineSubStores;

impl SubStoreFactory for EngineSubStores {
    fn messages_store(&self, engine: Arc<dyn Engine>) -> Arc<dyn MessagesStore> {
        Arc::new(EngineMessagesStore::new(engine))
    }

    fn sessions_store(
        &self,
        engine: Arc<dyn Engine>,
        messages: Arc<dyn MessagesStore>,
    ) -> Arc<dyn SessionsStore> {
        Arc::new(EngineSessionsStore::new(engine, messages))
    }
}

struct Running {
    engine: Arc<KvEngine>,
    provenance: Provenance,
    scheduler: AutosaveScheduler,
    messages: Arc<dyn MessagesStore>,
    sessions: Arc<dyn SessionsStore>,
}

enum Lifecycle {
    Uninitialized,
    Initializing,
    Initialized(Box<Running>),
    /// A `close` owns the running parts, or is waiting for `init` to hand them over
    Closing,
    Closed,
}

impl Lifecycle {
    fn state(&self) -> StoreState {
        match self {
            Lifecycle::Uninitialized | Lifecycle::Initializing => StoreState::Uninitialized,
            Lifecycle::Initialized(_) => StoreState::Initialized,
            Lifecycle::Closing => StoreState::Closing,
            Lifecycle::Closed => StoreState::Closed,
        }
    }
}

enum CloseAction<'a> {
    Shutdown(Box<Running>),
    Wait(Notified<'a>),
    Done,
}

/// Moves a transient lifecycle state to its resting state when `init` or
/// `close` finishes, including when their future is dropped midway
struct SettleOnExit<'a>(&'a PersistentStore);

impl Drop for SettleOnExit<'_> {
    fn drop(&mut self) {
        let mut lifecycle = self.0.lifecycle();
        match *lifecycle {
            Lifecycle::Initializing => *lifecycle = Lifecycle::Uninitialized,
            Lifecycle::Closing => {
                *lifecycle = Lifecycle::Closed;
                self.0.closed.notify_waiters();
            }
            _ => {}
        }
    }
}

/// Lifecycle coordinator for the broker's persistent state.
///
/// `init` must succeed before the sub-store accessors can be used; they fail
/// with [`StorageError::NotInitialized`] before `init`, while closing and
/// after `close`.
pub struct PersistentStore {
    config: StoreConfig,
    factory: Arc<dyn SubStoreFactory>,
    span: tracing::Span,
    lifecycle: Mutex<Lifecycle>,
    provenance: Mutex<Option<Provenance>>,
    closed: Notify,
}

impl PersistentStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_factory(config, Arc::new(EngineSubStores))
    }

    pub fn with_factory(config: StoreConfig, factory: Arc<dyn SubStoreFactory>) -> Self {
        let span = tracing::info_span!("persistent_store", path = %config.store_path);
        Self {
            config,
            factory,
            span,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            provenance: Mutex::new(None),
            closed: Notify::new(),
        }
    }

    /// Log inside the caller's span instead of the default `persistent_store` one
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn state(&self) -> StoreState {
        self.lifecycle().state()
    }

    /// How the engine was opened, once `init` has succeeded
    pub fn provenance(&self) -> Option<Provenance> {
        *self
            .provenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the engine, start autosave, and build both sub-stores.
    ///
    /// Every failure is reported as [`StorageError::Init`]. Everything opened
    /// so far is released and the store stays uninitialized.
    pub async fn init(&self) -> StorageResult<()> {
        {
            let mut lifecycle = self.lifecycle();
            if !matches!(*lifecycle, Lifecycle::Uninitialized) {
                let reason = if matches!(*lifecycle, Lifecycle::Initializing) {
                    "init already in progress".to_string()
                } else {
                    format!("init called on a {} store", lifecycle.state())
                };
                return Err(StorageError::InvalidState(reason));
            }
            *lifecycle = Lifecycle::Initializing;
        }

        let span = self.span.clone();
        async {
            let _settle = SettleOnExit(self);
            let running = self.start().await?;

            let provenance = running.provenance;
            let closed_meanwhile = {
                let mut lifecycle = self.lifecycle();
                if matches!(*lifecycle, Lifecycle::Initializing) {
                    *self
                        .provenance
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(provenance);
                    *lifecycle = Lifecycle::Initialized(Box::new(running));
                    None
                } else {
                    Some(running)
                }
            };

            if let Some(running) = closed_meanwhile {
                tracing::warn!("Store was closed while initializing, shutting down");
                self.shut_down_running(running).await;
                return Err(StorageError::InvalidState(
                    "store closed during init".to_string(),
                ));
            }

            tracing::info!(provenance = provenance.label(), "Persistent store initialized");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn start(&self) -> StorageResult<Running> {
        self.config.validate().map_err(|e| self.init_error(e))?;

        let OpenedEngine { engine, provenance } =
            KvEngine::open(&self.config.store_path, self.config.engine_options())?;

        let handle: Arc<dyn Engine> = engine.clone();
        let mut scheduler = AutosaveScheduler::start_in(
            Arc::clone(&handle),
            self.config.autosave_interval(),
            self.span.clone(),
        );

        match self.build_sub_stores(&handle) {
            Ok((messages, sessions)) => Ok(Running {
                engine,
                provenance,
                scheduler,
                messages,
                sessions,
            }),
            Err(e) => {
                tracing::error!(error = %e, "Sub-store initialization failed, releasing engine");
                scheduler.stop().await;
                if let Err(close_err) = engine.close() {
                    tracing::warn!(error = %close_err, "Failed to close engine after init failure");
                }
                Err(self.init_error(e))
            }
        }
    }

    fn init_error(&self, error: StorageError) -> StorageError {
        match error {
            StorageError::Init { .. } => error,
            other => StorageError::Init {
                path: PathBuf::from(&self.config.store_path),
                source: Box::new(other),
            },
        }
    }

    fn build_sub_stores(
        &self,
        engine: &Arc<dyn Engine>,
    ) -> StorageResult<(Arc<dyn MessagesStore>, Arc<dyn SessionsStore>)> {
        let messages = self.factory.messages_store(Arc::clone(engine));
        messages.init_store()?;

        let sessions = self
            .factory
            .sessions_store(Arc::clone(engine), Arc::clone(&messages));
        sessions.init_store()?;

        Ok((messages, sessions))
    }

    /// Stop autosave, commit one last time, and close the engine.
    ///
    /// Safe to call repeatedly and concurrently. A call made while another
    /// close (or an `init` being closed) is still shutting down waits for it,
    /// so when any call returns the final commit is done. Failures are
    /// logged, the store ends up closed regardless.
    pub async fn close(&self) {
        let action = {
            let mut lifecycle = self.lifecycle();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Closing) {
                Lifecycle::Initialized(running) => CloseAction::Shutdown(running),
                Lifecycle::Initializing | Lifecycle::Closing => {
                    CloseAction::Wait(self.closed.notified())
                }
                Lifecycle::Closed => {
                    *lifecycle = Lifecycle::Closed;
                    tracing::debug!(parent: &self.span, "already closed");
                    CloseAction::Done
                }
                Lifecycle::Uninitialized => {
                    *lifecycle = Lifecycle::Closed;
                    tracing::debug!(parent: &self.span, "Closing a store that was never initialized");
                    CloseAction::Done
                }
            }
        };

        match action {
            CloseAction::Shutdown(running) => self.shut_down_running(*running).await,
            CloseAction::Wait(closed) => {
                tracing::debug!(parent: &self.span, "Waiting for close in progress");
                closed.await;
            }
            CloseAction::Done => {}
        }
    }

    /// Shut down parts taken out of the lifecycle, then mark the store closed
    async fn shut_down_running(&self, running: Running) {
        let _settle = SettleOnExit(self);
        Self::shutdown(running).instrument(self.span.clone()).await;
    }

    async fn shutdown(mut running: Running) {
        running.scheduler.stop().await;

        let engine = Arc::clone(&running.engine);
        let span = tracing::Span::current();
        let result = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            if !engine.is_closed()
                && let Err(e) = engine.commit()
            {
                tracing::error!(error = %e, "Final commit failed");
            }
            engine.close()
        })
        .await;

        match result {
            Ok(Ok(())) => tracing::debug!("closed disk storage"),
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to close engine"),
            Err(e) => {
                tracing::error!(error = %e, "Engine shutdown task failed");
                if let Err(e) = running.engine.close() {
                    tracing::error!(error = %e, "Failed to close engine");
                }
            }
        }
    }

    pub fn messages_store(&self) -> StorageResult<Arc<dyn MessagesStore>> {
        match &*self.lifecycle() {
            Lifecycle::Initialized(running) => Ok(Arc::clone(&running.messages)),
            other => Err(StorageError::NotInitialized {
                state: other.state(),
            }),
        }
    }

    pub fn sessions_store(&self) -> StorageResult<Arc<dyn SessionsStore>> {
        match &*self.lifecycle() {
            Lifecycle::Initialized(running) => Ok(Arc::clone(&running.sessions)),
            other => Err(StorageError::NotInitialized {
                state: other.state(),
            }),
        }
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        let initialized = matches!(*self.lifecycle(), Lifecycle::Initialized(_));
        if initialized {
            tracing::warn!(
                parent: &self.span,
                "PersistentStore dropped without calling close(), uncommitted writes are lost"
            );
        }
    }
}
