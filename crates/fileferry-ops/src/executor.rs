//! Operation executor: one worker thread per run, events back to the UI.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fileferry_core::{EngineConfig, OperationError, OperationKind, OperationRequest};

use crate::arbiter::{ConflictArbiter, ConflictQuery, ConflictResponder, Decision};
use crate::context::RunContext;
use crate::delete::run_delete;
use crate::paste::run_paste;
use crate::progress::{OperationComplete, ProgressState};
use crate::services::{Services, WakeGuard};
use crate::unzip::run_unzip;
use crate::zip_op::run_zip;

/// Everything a run tells its UI.
#[derive(Debug)]
pub enum OperationEvent {
    /// Progress update.
    Progress(ProgressState),
    /// A question the worker is blocked on; answer it through the handle.
    Conflict(ConflictQuery),
    /// The run ended. Always the last event, and sent exactly once.
    Complete(OperationComplete),
}

/// Raised once a worker no longer touches the filesystem.
#[derive(Default)]
struct Settled {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Settled {
    fn mark(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .signal
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Marks [`Settled`] when dropped, including on unwind.
struct SettleOnDrop(Arc<Settled>);

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        self.0.mark();
    }
}

struct ActiveOperation {
    id: u64,
    cancel: CancellationToken,
    arbiter: Arc<ConflictArbiter>,
    settled: Arc<Settled>,
}

impl ActiveOperation {
    fn cancel(&self) {
        self.cancel.cancel();
        self.arbiter.close();
    }
}

type ActiveSlot = Arc<Mutex<Option<ActiveOperation>>>;

fn lock(slot: &ActiveSlot) -> MutexGuard<'_, Option<ActiveOperation>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs operations against one destination context, one at a time.
///
/// Starting an operation cooperatively cancels the one still running.
pub struct OperationExecutor {
    config: Arc<EngineConfig>,
    services: Services,
    active: ActiveSlot,
    next_id: AtomicU64,
}

impl OperationExecutor {
    /// Create an executor with the default collaborators for `config`.
    pub fn new(config: EngineConfig) -> Self {
        let services = Services::for_config(&config);
        Self {
            config: Arc::new(config),
            services,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replace the collaborators.
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// The configuration every run uses.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn a worker for `request`.
    ///
    /// A run still in progress is cancelled first, and this call blocks until
    /// its worker has stopped mutating the filesystem. Its completion event
    /// is still delivered to its own handle, which must be drained or
    /// dropped so the old worker is never stuck sending a query.
    pub fn start(&self, request: OperationRequest) -> Result<OperationHandle, OperationError> {
        let previous = lock(&self.active).take();
        if let Some(previous) = previous {
            debug!(id = previous.id, "cancelling previous operation");
            previous.cancel();
            previous.settled.wait();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = request.kind();
        let cancel = CancellationToken::new();
        let arbiter = Arc::new(ConflictArbiter::new());
        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let settled = Arc::new(Settled::default());

        *lock(&self.active) = Some(ActiveOperation {
            id,
            cancel: cancel.clone(),
            arbiter: Arc::clone(&arbiter),
            settled: Arc::clone(&settled),
        });

        let ctx = RunContext::new(
            Arc::clone(&self.config),
            self.services.clone(),
            cancel.clone(),
            Arc::clone(&arbiter),
            tx,
        );
        let active = Arc::clone(&self.active);

        let worker = thread::Builder::new()
            .name(format!("fileferry-op-{id}"))
            .spawn(move || run_worker(id, request, ctx, active, settled))
            .map_err(|err| {
                lock(&self.active).take();
                OperationError::WorkerSpawn(err)
            })?;

        info!(id, %kind, "operation started");
        Ok(OperationHandle {
            id,
            kind,
            cancel,
            arbiter,
            events: rx,
            worker: Some(worker),
        })
    }

    /// Cancel the running operation, if any, without waiting for it.
    pub fn cancel_active(&self) -> bool {
        match lock(&self.active).take() {
            Some(previous) => {
                debug!(id = previous.id, "cancelling previous operation");
                previous.cancel();
                true
            }
            None => false,
        }
    }

    /// Id of the running operation.
    pub fn active_id(&self) -> Option<u64> {
        lock(&self.active).as_ref().map(|a| a.id)
    }
}

impl Drop for OperationExecutor {
    fn drop(&mut self) {
        self.cancel_active();
    }
}

fn run_worker(
    id: u64,
    request: OperationRequest,
    ctx: RunContext,
    active: ActiveSlot,
    settled: Arc<Settled>,
) {
    let _wake = WakeGuard::acquire(Arc::clone(&ctx.services.wake_lock));
    let settle = SettleOnDrop(settled);

    let complete = match &request {
        OperationRequest::Paste {
            sources,
            destination,
            mode,
        } => run_paste(&ctx, sources, destination, *mode),
        OperationRequest::Delete {
            targets,
            confirmation,
        } => run_delete(&ctx, targets, *confirmation),
        OperationRequest::Zip {
            sources,
            destination,
            archive_name,
        } => run_zip(&ctx, sources, destination, archive_name),
        OperationRequest::Unzip {
            archive,
            destination,
        } => run_unzip(&ctx, archive, destination),
    };

    drop(settle);
    info!(id, outcome = ?complete.outcome, "{}", complete.summary());

    {
        let mut slot = lock(&active);
        if slot.as_ref().is_some_and(|a| a.id == id) {
            *slot = None;
        }
    }
    ctx.finish(complete);
}

/// The UI side of one run.
///
/// Dropping the handle cancels the run.
pub struct OperationHandle {
    id: u64,
    kind: OperationKind,
    cancel: CancellationToken,
    arbiter: Arc<ConflictArbiter>,
    events: mpsc::Receiver<OperationEvent>,
    worker: Option<JoinHandle<()>>,
}

impl OperationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Request cooperative cancellation. A query the worker is waiting on
    /// is answered with [`Decision::No`].
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.arbiter.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Answer the outstanding conflict query.
    pub fn answer(&self, decision: Decision) -> bool {
        self.arbiter.resolve(decision)
    }

    /// A cloneable answering handle for another thread.
    pub fn responder(&self) -> ConflictResponder {
        ConflictResponder::new(Arc::clone(&self.arbiter))
    }

    /// Receive the next event. `None` once the run has finished and every
    /// event was drained.
    pub async fn recv(&mut self) -> Option<OperationEvent> {
        self.events.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv) for non-async callers.
    ///
    /// Panics if called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<OperationEvent> {
        self.events.blocking_recv()
    }

    /// Drain events until completion, answering every query with `decision`.
    pub fn wait_answering(&mut self, decision: Decision) -> Option<OperationComplete> {
        while let Some(event) = self.blocking_recv() {
            match event {
                OperationEvent::Progress(_) => {}
                OperationEvent::Conflict(_) => {
                    self.answer(decision);
                }
                OperationEvent::Complete(complete) => return Some(complete),
            }
        }
        None
    }

    /// Wait for the worker thread to exit.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            // Events are dropped so a full channel cannot block the worker.
            self.events.close();
            if worker.join().is_err() {
                debug!(id = self.id, "worker panicked");
            }
        }
    }
}

impl Drop for OperationHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
        }
    }
}
