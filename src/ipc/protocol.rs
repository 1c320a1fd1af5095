//! IPC protocol message types
//!
//! Defines the request/response format spoken on the coordinator socket.
//! Each message is one JSON document in one wire frame.

use serde::{Deserialize, Serialize};

use crate::common::error::IpcError;
use crate::registry::{
    BreakCount, BreakCountKey, Breakpoint, BreakpointKey, DeleteOutcome, InsertOutcome,
    ProcessToken, UpsertOutcome,
};

/// IPC request to the coordinator
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for matching responses
    pub id: u64,
    /// The command to execute
    pub command: Command,
}

/// IPC response from the coordinator
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: u64,
    /// Whether the command succeeded
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: IpcError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Create a success response with no data
    pub fn ok(id: u64) -> Self {
        Self::success(id, serde_json::json!({}))
    }
}

/// Commands understood by the coordinator
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // === Shared breakpoint table ===
    Lookup { key: BreakpointKey },

    HasAny { entity: BreakCountKey },

    Insert { breakpoint: Breakpoint },

    InsertOrUpdate { breakpoint: Breakpoint },

    Delete { key: BreakpointKey },

    /// Mark a proxy's breakpoints busy for a target's session
    MarkBusy { proxy_pid: i32 },

    /// Release a proxy's breakpoints after its session ends
    FreeSession { proxy_pid: i32 },

    /// Drop every breakpoint a proxy owns
    CleanupProxy { proxy_pid: i32 },

    /// Copy of every breakpoint and count
    List,

    // === Process table ===
    RegisterProcess { pid: i32 },

    DeregisterProcess { pid: i32 },

    ValidateProcess { pid: i32, token: ProcessToken },

    // === Coordinator ===
    Status,

    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LookupResult {
    pub breakpoint: Option<Breakpoint>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HasAnyResult {
    pub has_any: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InsertResult {
    pub outcome: InsertOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertResult {
    pub outcome: UpsertOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResult {
    pub outcome: DeleteOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkBusyResult {
    /// The proxy's breakpoints as they were before being marked
    pub breakpoints: Vec<Breakpoint>,
}

/// Number of breakpoints a session-wide operation touched
#[derive(Debug, Serialize, Deserialize)]
pub struct AffectedResult {
    pub affected: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResult {
    pub breakpoints: Vec<Breakpoint>,
    pub counts: Vec<BreakCount>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResult {
    pub token: ProcessToken,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResult {
    pub valid: bool,
}

/// Coordinator status information
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResult {
    pub pid: u32,
    pub version: String,
    pub capacity: usize,
    pub breakpoints: usize,
    pub processes: usize,
    pub uptime_secs: u64,
}
