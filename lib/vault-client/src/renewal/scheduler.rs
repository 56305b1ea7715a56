use super::RenewalRequest;
use super::executor;
use super::heap::RenewalHeap;
use crate::VaultError;
use crate::backend::SecretsBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct SchedulerState {
    heap: RenewalHeap,
    running: bool,
    stopped: bool,
    update_rx: Option<mpsc::Receiver<()>>,
    task: Option<JoinHandle<()>>,
}

/// Owns the renewal heap and the loop that drives it.
///
/// Every heap mutation and every backend renewal happens under `state`, so at
/// most one renewal is in flight at a time.
pub(crate) struct RenewalScheduler {
    backend: Arc<dyn SecretsBackend>,
    retry_interval: Duration,
    state: Mutex<SchedulerState>,
    update_tx: mpsc::Sender<()>,
    stop_tx: watch::Sender<bool>,
}

impl RenewalScheduler {
    pub(crate) fn new(backend: Arc<dyn SecretsBackend>, retry_interval: Duration) -> Self {
        let (update_tx, update_rx) = mpsc::channel(1);
        let (stop_tx, _) = watch::channel(false);

        Self {
            backend,
            retry_interval,
            state: Mutex::new(SchedulerState {
                heap: RenewalHeap::new(),
                running: false,
                stopped: false,
                update_rx: Some(update_rx),
                task: None,
            }),
            update_tx,
            stop_tx,
        }
    }

    pub(crate) async fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.stopped {
            tracing::warn!("Renewal loop was stopped and cannot be restarted");
            return;
        }
        let Some(update_rx) = state.update_rx.take() else {
            tracing::warn!("Renewal loop already started");
            return;
        };

        state.running = true;
        let stop_rx = self.stop_tx.subscribe();
        state.task = Some(tokio::spawn(Arc::clone(self).run(update_rx, stop_rx)));
        tracing::info!(tracked = state.heap.len(), "Renewal loop started");
    }

    /// Stop the loop and wait for it to exit. Calling it again is a no-op.
    pub(crate) async fn stop(&self) {
        let task = {
            let mut state = self.state.lock().await;
            if state.stopped {
                tracing::warn!("Renewal loop already stopped");
                return;
            }
            state.running = false;
            state.stopped = true;
            self.stop_tx.send_replace(true);
            state.task.take()
        };

        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Renewal loop terminated abnormally");
            }
        }
    }

    /// Renew `request` right away and track it. A failed first attempt is
    /// reported through the request's handle and leaves the heap untouched.
    pub(crate) async fn renew(&self, mut request: RenewalRequest) {
        let mut state = self.state.lock().await;

        let next = match executor::renew(self.backend.as_ref(), &request).await {
            Ok(next) => next,
            Err(err) => {
                tracing::warn!(id = %request.log_id(), kind = %request.kind, error = %err, "Renewal failed");
                request.report_failure(err);
                return;
            }
        };

        let log_id = request.log_id();
        let kind = request.kind;
        let result = if state.heap.contains(&request.id) {
            state.heap.update(request, next)
        } else {
            state.heap.push(request, next)
        };

        match result {
            Ok(()) => {
                // An update can pull the deadline forward, so wake the loop either way.
                if state.running {
                    self.signal();
                }
                tracing::info!(id = %log_id, %kind, next_in = ?next_in(next), "Renewal complete");
            }
            Err(e) => tracing::error!(id = %log_id, error = %e, "Failed to track renewal"),
        }
    }

    /// Stop tracking `id`. Untracked ids are fine.
    pub(crate) async fn untrack(&self, id: &str) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        if !state.heap.contains(id) {
            return Ok(());
        }

        let removed = state.heap.remove(id)?;
        if state.running {
            self.signal();
        }
        tracing::debug!(id = %removed.log_id(), kind = %removed.kind, "Stopped tracking");
        Ok(())
    }

    pub(crate) async fn is_tracked(&self, id: &str) -> bool {
        self.state.lock().await.heap.contains(id)
    }

    pub(crate) async fn len(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    pub(crate) async fn next_renewal(&self, id: &str) -> Option<Instant> {
        self.state.lock().await.heap.get(id).and_then(|e| e.next)
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    fn signal(&self) {
        match self.update_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => tracing::debug!("Renewal loop gone, update dropped"),
        }
    }

    async fn next_deadline(&self) -> Option<Instant> {
        self.state.lock().await.heap.peek().and_then(|e| e.next)
    }

    async fn run(
        self: Arc<Self>,
        mut update_rx: mpsc::Receiver<()>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        while !*stop_rx.borrow() {
            let deadline = self.next_deadline().await;

            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                Some(()) = update_rx.recv() => continue,
                _ = sleep_until(deadline) => self.renew_due().await,
            }
        }

        tracing::info!("Renewal loop stopped");
    }

    async fn renew_due(&self) {
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }

        // The heap may have changed while we slept; only act on what is due now.
        let Some(entry) = state.heap.peek() else {
            return;
        };
        match entry.next {
            Some(next) if next <= Instant::now() => {}
            _ => return,
        }

        let id = entry.request.id.clone();
        let log_id = entry.request.log_id();
        let kind = entry.request.kind;
        let outcome = executor::renew(self.backend.as_ref(), &entry.request).await;

        let next = match outcome {
            Ok(next) => {
                tracing::info!(id = %log_id, %kind, next_in = ?next_in(next), "Renewal complete");
                next
            }
            Err(err) => {
                tracing::warn!(
                    id = %log_id,
                    %kind,
                    error = %err,
                    retry_in = ?self.retry_interval,
                    "Scheduled renewal failed"
                );
                if let Some(request) = state.heap.get_mut(&id) {
                    if !request.report_failure(err) {
                        tracing::debug!(id = %log_id, "Failure already reported to caller");
                    }
                }
                let retry_at = Instant::now().checked_add(self.retry_interval);
                if retry_at.is_none() {
                    tracing::warn!(id = %log_id, "Retry interval out of range, renewal left unscheduled");
                }
                retry_at
            }
        };

        if let Err(e) = state.heap.reschedule(&id, next) {
            tracing::error!(id = %log_id, error = %e, "Failed to reschedule renewal");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn next_in(next: Option<Instant>) -> Option<Duration> {
    next.map(|n| n.saturating_duration_since(Instant::now()))
}
