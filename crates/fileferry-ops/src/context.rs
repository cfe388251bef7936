//! State shared by every operation variant while it runs on the worker.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fileferry_core::{EngineConfig, ItemError, OperationError, OperationKind};

use crate::arbiter::{ConflictArbiter, ConflictQuery, Decision};
use crate::executor::OperationEvent;
use crate::progress::{OperationComplete, Outcome, ProgressState, ProgressTracker};
use crate::services::Services;
use crate::space::SpaceGuard;

/// Why a chunked copy stopped early.
#[derive(Debug, Error)]
pub(crate) enum StreamError {
    #[error("cancelled")]
    Cancelled,
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

/// Everything a running operation needs besides its own parameters.
pub(crate) struct RunContext {
    pub config: Arc<EngineConfig>,
    pub services: Services,
    cancel: CancellationToken,
    arbiter: Arc<ConflictArbiter>,
    events: mpsc::Sender<OperationEvent>,
}

impl RunContext {
    pub fn new(
        config: Arc<EngineConfig>,
        services: Services,
        cancel: CancellationToken,
        arbiter: Arc<ConflictArbiter>,
        events: mpsc::Sender<OperationEvent>,
    ) -> Self {
        Self {
            config,
            services,
            cancel,
            arbiter,
            events,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Entry-boundary cancellation poll.
    pub fn check_cancelled(&self) -> Result<(), OperationError> {
        if self.is_cancelled() {
            Err(OperationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Push a snapshot if one is due.
    ///
    /// A full channel drops the snapshot; the next one carries newer counters.
    pub fn report(&self, snapshot: Option<ProgressState>) {
        if let Some(state) = snapshot {
            let _ = self.events.try_send(OperationEvent::Progress(state));
        }
    }

    /// Post a query to the UI and block until it is answered.
    pub fn ask(&self, query: ConflictQuery) -> Decision {
        if self.is_cancelled() {
            return Decision::No;
        }
        self.arbiter.ask(query, |query| {
            self.events
                .blocking_send(OperationEvent::Conflict(query))
                .is_ok()
        })
    }

    /// Deliver the terminal notification.
    pub fn finish(&self, complete: OperationComplete) {
        if self
            .events
            .blocking_send(OperationEvent::Complete(complete))
            .is_err()
        {
            debug!("completion dropped, receiver gone");
        }
    }

    pub fn space_guard(&self) -> SpaceGuard<'_> {
        SpaceGuard::new(&self.config, self.services.space.as_ref())
    }

    /// Run the space guard; a shortage is shown to the user before the run
    /// fails with it.
    pub fn preflight_space(&self, destination: &Path, required: u64) -> Result<(), OperationError> {
        match self.space_guard().check(destination, required) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.report_no_space(destination, err)),
        }
    }

    /// Tell the user about a shortage and hand the error back.
    pub fn report_no_space(&self, destination: &Path, err: OperationError) -> OperationError {
        let (required, available) = match &err {
            OperationError::InsufficientSpace {
                required,
                available,
                ..
            } => (*required, *available),
            _ => (0, 0),
        };
        self.ask(ConflictQuery::insufficient_space(
            destination,
            required,
            available,
        ));
        err
    }

    /// Apply the canonical permission bits. Failures are logged only.
    pub fn stamp_permissions(&self, path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let perms = fs::Permissions::from_mode(self.config.canonical_mode);
            if let Err(err) = fs::set_permissions(path, perms) {
                warn!(path = %path.display(), %err, "could not set permissions");
            }
        }
        #[cfg(not(unix))]
        let _ = path;
    }

    /// Copy `reader` into `writer` in configured chunks.
    ///
    /// Cancellation is polled before every chunk. With `edges` set, the
    /// first and the final chunk are always reported in addition to the
    /// regular step-based snapshots.
    pub fn stream<R: Read, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        tracker: &mut ProgressTracker,
        edges: bool,
    ) -> Result<u64, StreamError> {
        let mut buffer = vec![0u8; self.config.chunk_size];
        let mut copied = 0u64;

        loop {
            if self.is_cancelled() {
                return Err(StreamError::Cancelled);
            }

            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(StreamError::Read(err)),
            };
            writer.write_all(&buffer[..n]).map_err(StreamError::Write)?;

            let first = copied == 0;
            copied += n as u64;
            match tracker.add_bytes(n as u64) {
                Some(state) => self.report(Some(state)),
                None if edges && first => self.report(Some(tracker.snapshot())),
                None => {}
            }
        }

        writer.flush().map_err(StreamError::Write)?;
        if edges && copied > 0 {
            self.report(Some(tracker.snapshot()));
        }
        Ok(copied)
    }
}

/// Per-run tallies that end up in the completion notification.
#[derive(Debug, Default)]
pub(crate) struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<ItemError>,
}

impl RunReport {
    pub fn succeed(&mut self) {
        self.succeeded += 1;
    }

    pub fn fail(&mut self, error: ItemError) {
        warn!(path = %error.path.display(), kind = %error.kind, "{}", error.message);
        self.failed += 1;
        self.errors.push(error);
    }

    /// Build the terminal notification for a run that ended with `result`.
    pub fn into_complete(
        mut self,
        kind: OperationKind,
        bytes_processed: u64,
        result: Result<(), OperationError>,
    ) -> OperationComplete {
        let outcome = match result {
            Ok(()) => Outcome::Completed,
            Err(OperationError::Cancelled) => Outcome::Cancelled,
            Err(err) => {
                let kind = err.kind();
                self.errors.push(err.into());
                Outcome::Failed(kind)
            }
        };
        OperationComplete {
            kind,
            outcome,
            succeeded: self.succeeded,
            failed: self.failed,
            bytes_processed,
            errors: self.errors,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures for running a variant without the executor.

    use super::*;
    use crate::arbiter::ConflictResponder;
    use std::thread;

    /// A context whose queries are answered with a fixed decision by a
    /// helper thread.
    pub(crate) struct TestRun {
        pub ctx: RunContext,
        pub events: Arc<std::sync::Mutex<Vec<OperationEvent>>>,
        pub cancel: CancellationToken,
        pump: Option<thread::JoinHandle<()>>,
    }

    impl TestRun {
        pub fn new(services: Services, answer: Decision) -> Self {
            Self::with_config(EngineConfig::default(), services, answer)
        }

        pub fn with_config(config: EngineConfig, services: Services, answer: Decision) -> Self {
            let (tx, mut rx) = mpsc::channel(16);
            let arbiter = Arc::new(ConflictArbiter::new());
            let responder = ConflictResponder::new(Arc::clone(&arbiter));
            let cancel = CancellationToken::new();
            let events = Arc::new(std::sync::Mutex::new(Vec::new()));

            let sink = Arc::clone(&events);
            let pump = thread::spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    if matches!(event, OperationEvent::Conflict(_)) {
                        responder.answer(answer);
                    }
                    sink.lock().unwrap().push(event);
                }
            });

            Self {
                ctx: RunContext::new(Arc::new(config), services, cancel.clone(), arbiter, tx),
                events,
                cancel,
                pump: Some(pump),
            }
        }

        /// Drop the sender and collect everything the run emitted.
        pub fn finish(mut self) -> Vec<OperationEvent> {
            let events = Arc::clone(&self.events);
            drop(self.ctx);
            if let Some(pump) = self.pump.take() {
                pump.join().unwrap();
            }
            let mut guard = events.lock().unwrap();
            std::mem::take(&mut *guard)
        }

        pub fn conflicts(events: &[OperationEvent]) -> usize {
            events
                .iter()
                .filter(|e| matches!(e, OperationEvent::Conflict(_)))
                .count()
        }
    }
}
