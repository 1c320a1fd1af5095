//! Live process table
//!
//! Each cooperating process registers its pid and receives an opaque
//! token. A peer that can present the token for a pid is trusted to be
//! that co-located process; this is what the listening side of the attach
//! handshake checks.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const TOKEN_LEN: usize = 16;

/// Opaque process handle, sent raw on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessToken([u8; TOKEN_LEN]);

impl ProcessToken {
    /// Size of the token on the wire
    pub const LEN: usize = TOKEN_LEN;

    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs
impl fmt::Debug for ProcessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProcessToken(..)")
    }
}

#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: RwLock<HashMap<i32, ProcessToken>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pid`, replacing any token it held before
    pub fn register(&self, pid: i32) -> ProcessToken {
        let token = ProcessToken::generate();
        if self.processes.write().insert(pid, token).is_some() {
            tracing::debug!(pid, "Process re-registered, previous token revoked");
        }
        token
    }

    pub fn deregister(&self, pid: i32) -> bool {
        self.processes.write().remove(&pid).is_some()
    }

    /// True iff `pid` is registered and `token` is its current token
    pub fn validate(&self, pid: i32, token: &ProcessToken) -> bool {
        self.processes.read().get(&pid) == Some(token)
    }

    pub fn pids(&self) -> Vec<i32> {
        self.processes.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.read().is_empty()
    }
}

/// Whether an OS process with this pid still exists
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 performs the permission and existence checks only
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(pid: i32) -> bool {
    pid > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_validate() {
        let table = ProcessTable::new();
        let token = table.register(4242);

        assert!(table.validate(4242, &token));
        assert!(!table.validate(4243, &token));
        assert!(!table.validate(4242, &ProcessToken::generate()));
    }

    #[test]
    fn test_reregister_revokes_old_token() {
        let table = ProcessTable::new();
        let old = table.register(4242);
        let new = table.register(4242);

        assert!(!table.validate(4242, &old));
        assert!(table.validate(4242, &new));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_deregister() {
        let table = ProcessTable::new();
        let token = table.register(4242);

        assert!(table.deregister(4242));
        assert!(!table.deregister(4242));
        assert!(!table.validate(4242, &token));
        assert!(table.is_empty());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = ProcessToken::from_bytes([0xab; ProcessToken::LEN]);
        assert_eq!(format!("{:?}", token), "ProcessToken(..)");
    }

    #[cfg(unix)]
    #[test]
    fn test_own_process_is_alive() {
        assert!(process_alive(std::process::id() as i32));
        assert!(!process_alive(-1));
    }
}
