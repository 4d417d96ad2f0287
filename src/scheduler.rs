// src/scheduler.rs

// background sweep and flush tasks, with a cancel handle and a final flush

// dependencies
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::flush::{FlushCoordinator, FlushOutcome};

/// Handle to the gate's background tasks.
///
/// Dropping the handle cancels the tasks without a final flush; call
/// [`BackgroundTasks::shutdown`] to persist what is pending.
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    flusher: Arc<FlushCoordinator>,
}

impl BackgroundTasks {
    pub(crate) fn new(token: CancellationToken, flusher: Arc<FlushCoordinator>) -> Self {
        Self {
            token,
            handles: Vec::new(),
            flusher,
        }
    }

    pub(crate) fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop the background tasks, then run a forced flush bounded by `timeout`.
    pub async fn shutdown(mut self, timeout: Duration) -> FlushOutcome {
        self.token.cancel();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(err) = handle.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }

        match tokio::time::timeout(timeout, self.flusher.flush(true)).await {
            Ok(outcome) => {
                info!(?outcome, "final usage flush finished");
                outcome
            }
            Err(_) => {
                let pending = self.flusher.pending();
                warn!(pending, "final usage flush timed out, pending usage is lost");
                FlushOutcome::Failed { pending }
            }
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Run `tick` every `period` until the token is cancelled. The first run
/// happens one period after spawning.
pub(crate) fn spawn_periodic<F>(
    token: CancellationToken,
    name: &'static str,
    period: Duration,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // skip immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => tick(),
                _ = token.cancelled() => {
                    debug!(task = name, "periodic task shutting down");
                    break;
                }
            }
        }
    })
}

/// Flush on every period and whenever the coordinator is signalled.
pub(crate) fn spawn_flush_loop(
    token: CancellationToken,
    flusher: Arc<FlushCoordinator>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = Arc::clone(flusher.signal());
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // skip immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    flusher.flush(false).await;
                }
                _ = signal.notified() => {
                    debug!("flush requested out of band");
                    flusher.flush(false).await;
                }
                _ = token.cancelled() => {
                    debug!("flush loop shutting down");
                    break;
                }
            }
        }
    })
}
