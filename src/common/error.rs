//! Error types for pldbg
//!
//! Transport faults on a debugging session are not errors in this sense:
//! they live in [`crate::wire::Fault`] and are settled at an escape point.
//! Everything here is an ordinary failure that callers propagate with `?`.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pldbg
#[derive(Error, Debug)]
pub enum Error {
    // === Coordinator/Connection Errors ===
    #[error("Coordinator not running. Run any 'pldbg' command to start it, or 'pldbg coordinator' in the foreground")]
    CoordinatorNotRunning,

    #[error("Failed to spawn coordinator: timed out waiting for socket after {0} seconds")]
    CoordinatorSpawnTimeout(u64),

    #[error("Failed to connect to coordinator: {0}")]
    CoordinatorConnectionFailed(#[source] io::Error),

    #[error("Coordinator communication error: {0}")]
    CoordinatorCommunication(String),

    // === Registry Errors ===
    #[error("Shared breakpoint table is full ({capacity} entries)")]
    RegistryFull { capacity: usize },

    #[error("Invalid breakpoint '{0}': expected <function>:<line>")]
    InvalidBreakpoint(String),

    #[error("Target refused the credentials of process {pid}")]
    CredentialsRejected { pid: i32 },

    // === Transport Errors ===
    #[error("Transport fault: {0}")]
    Transport(#[from] crate::wire::Fault),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid breakpoint error from the offending text
    pub fn invalid_breakpoint<S: Into<String>>(text: S) -> Self {
        Self::InvalidBreakpoint(text.into())
    }
}

/// IPC-serializable error for coordinator responses
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IpcError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for IpcError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::CoordinatorNotRunning => "COORDINATOR_NOT_RUNNING",
            Error::RegistryFull { .. } => "REGISTRY_FULL",
            Error::InvalidBreakpoint(_) => "INVALID_BREAKPOINT",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG",
            _ => "INTERNAL_ERROR",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<IpcError> for Error {
    fn from(e: IpcError) -> Self {
        // Map IPC errors back to our error types where possible
        match e.code.as_str() {
            "COORDINATOR_NOT_RUNNING" => Error::CoordinatorNotRunning,
            "REGISTRY_FULL" => Error::RegistryFull {
                capacity: parse_capacity(&e.message).unwrap_or(0),
            },
            "INVALID_BREAKPOINT" => Error::InvalidBreakpoint(e.message),
            _ => Error::CoordinatorCommunication(e.message),
        }
    }
}

/// Recover the capacity from a `RegistryFull` message, e.g. "... full (20 entries)"
fn parse_capacity(message: &str) -> Option<usize> {
    let start = message.rfind('(')? + 1;
    let end = message[start..].find(' ')? + start;
    message[start..end].parse().ok()
}
