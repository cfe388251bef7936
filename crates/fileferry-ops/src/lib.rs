//! File operation engine for fileferry.
//!
//! This crate runs bulk filesystem mutations (copy/move, delete, zip, unzip)
//! on a dedicated worker thread. The worker reports progress and asks Yes/No
//! questions through a bounded channel of [`OperationEvent`]s; answers travel
//! back through a [`ConflictResponder`] while the worker waits.
//!
//! Every run follows the same shape: build the [`Inventory`], check free
//! space with the [`SpaceGuard`], then mutate entry by entry, polling the
//! cancellation flag at each entry and chunk boundary.
//!
//! # Example
//!
//! ```rust,no_run
//! use fileferry_ops::{Decision, OperationEvent, OperationExecutor};
//! use fileferry_core::{EngineConfig, OperationRequest};
//!
//! let executor = OperationExecutor::new(EngineConfig::default());
//! let mut handle = executor
//!     .start(OperationRequest::copy(vec!["/data/photos".into()], "/backup"))
//!     .unwrap();
//!
//! while let Some(event) = handle.blocking_recv() {
//!     match event {
//!         OperationEvent::Progress(p) => println!("{:.0}%", p.percentage()),
//!         OperationEvent::Conflict(_) => {
//!             handle.answer(Decision::Yes);
//!         }
//!         OperationEvent::Complete(done) => {
//!             println!("{}", done.summary());
//!             break;
//!         }
//!     }
//! }
//! ```

mod arbiter;
mod context;
mod delete;
mod executor;
mod inventory;
mod paste;
mod progress;
mod services;
mod space;
mod unzip;
mod zip_op;

pub use arbiter::{ConflictArbiter, ConflictKind, ConflictQuery, ConflictResponder, Decision};
pub use executor::{OperationEvent, OperationExecutor, OperationHandle};
pub use inventory::{EntryKind, Inventory, InventoryEntry};
pub use progress::{OperationComplete, Outcome, ProgressState, ProgressTracker};
pub use services::{
    DiskThumbnailCache, MediaIndex, NoThumbnails, NoWakeLock, NoopIndex, Services,
    ThumbnailCache, ThumbnailKey, WakeGuard, WakeLock,
};
pub use space::{SpaceGuard, SpaceProbe, StatvfsProbe};

// Re-export core types for convenience
pub use fileferry_core::{
    Clipboard, DeleteConfirmation, EngineConfig, ErrorKind, ItemError, OperationError,
    OperationKind, OperationRequest, TransferMode,
};
