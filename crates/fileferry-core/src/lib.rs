//! Core types and configuration for fileferry.
//!
//! This crate holds the plain data shared by the operation engine and its
//! front ends: the request types, the clipboard value object, the engine
//! configuration and the error taxonomy.

mod clipboard;
mod config;
mod error;
mod request;

pub use clipboard::Clipboard;
pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{ErrorKind, ItemError, OperationError, is_out_of_space};
pub use request::{DeleteConfirmation, OperationKind, OperationRequest, TransferMode};
