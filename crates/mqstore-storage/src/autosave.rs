//! Periodic background commit of the engine

use mqstore_core::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::Instrument;

/// Handle for the background autosave task.
///
/// The task commits the engine every `interval`, measured from the end of the
/// previous commit, after an initial delay of one interval.
pub struct AutosaveScheduler {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl AutosaveScheduler {
    /// Spawn the autosave task in the current span
    pub fn start(engine: Arc<dyn Engine>, interval: Duration) -> Self {
        Self::start_in(engine, interval, tracing::Span::current())
    }

    /// Spawn the autosave task, logging inside `span`
    pub fn start_in(engine: Arc<dyn Engine>, interval: Duration, span: tracing::Span) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(
            async move {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "Autosave task started");

                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        _ = sleep(interval) => Self::fire(&engine).await,
                    }
                }

                tracing::debug!("Persistence commit scheduler is shutdown");
            }
            .instrument(span),
        );

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            interval,
        }
    }

    /// One tick on the blocking pool: a failing or panicking commit is logged
    /// and the task keeps going
    async fn fire(engine: &Arc<dyn Engine>) {
        let engine = Arc::clone(engine);
        match tokio::task::spawn_blocking(move || engine.commit()).await {
            Ok(Ok(())) => tracing::trace!("Autosave commit completed"),
            Ok(Err(e)) => tracing::error!(error = %e, "Autosave commit failed"),
            Err(e) if e.is_panic() => tracing::error!("Autosave commit panicked"),
            Err(e) => tracing::error!(error = %e, "Autosave commit task failed"),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the task and wait for an in-flight commit to finish.
    ///
    /// Once this returns no further commit is issued. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Autosave task terminated abnormally");
        }
    }
}

impl Drop for AutosaveScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::warn!("AutosaveScheduler dropped without calling stop(), aborting task");
            handle.abort();
        }
    }
}
