//! Breakpoint registry
//!
//! Two table sets share one interface: the Local set, owned by a single
//! process and never locked, and the Shared set, visible to every process
//! of the group and guarded by one reader/writer lock. [`Registry`] is a
//! process's view of both, selected per call by [`Scope`].

pub mod breakcount;
pub mod process;
pub mod store;
pub mod table;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

pub use process::{ProcessTable, ProcessToken};
pub use store::SharedStore;
pub(crate) use store::release_process;
pub use table::{SharedRegistry, Tables};

/// Line number of an entry breakpoint (matches any line)
pub const ENTRY_LINE: i32 = -1;

/// Target pid of a Shared breakpoint any process may hit
pub const ANY_TARGET: i32 = -1;

/// Proxy pid recorded on breakpoints that no proxy owns
pub const NO_PROXY: i32 = -1;

/// Which table set an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Local,
    Shared,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakpointKey {
    pub database_id: u32,
    pub function_id: u32,
    /// [`ENTRY_LINE`] for an entry breakpoint
    pub line_number: i32,
    /// [`ANY_TARGET`] for a wildcard Shared breakpoint
    pub target_pid: i32,
}

impl BreakpointKey {
    pub fn new(database_id: u32, function_id: u32, line_number: i32, target_pid: i32) -> Self {
        Self {
            database_id,
            function_id,
            line_number,
            target_pid,
        }
    }

    /// The (database, function) pair this breakpoint is counted against
    pub fn entity(&self) -> BreakCountKey {
        BreakCountKey {
            database_id: self.database_id,
            function_id: self.function_id,
        }
    }

    pub fn with_target(self, target_pid: i32) -> Self {
        Self { target_pid, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointData {
    /// Port of a proxy waiting for a target; `None` means the target listens
    pub proxy_port: Option<u16>,
    pub proxy_pid: i32,
    pub is_temporary: bool,
    /// Claimed by a target already in session with this proxy (Shared only)
    pub busy: bool,
}

impl BreakpointData {
    /// Data for a breakpoint with no proxy behind it
    pub fn local() -> Self {
        Self {
            proxy_port: None,
            proxy_pid: NO_PROXY,
            is_temporary: false,
            busy: false,
        }
    }

    /// Data for a breakpoint owned by a proxy waiting on `proxy_port`
    pub fn for_proxy(proxy_port: u16, proxy_pid: i32) -> Self {
        Self {
            proxy_port: Some(proxy_port),
            proxy_pid,
            is_temporary: false,
            busy: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub key: BreakpointKey,
    pub data: BreakpointData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakCountKey {
    pub database_id: u32,
    pub function_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakCount {
    pub key: BreakCountKey,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Removed,
    NotFound,
}

/// A function/line pair written as `"<function>:<line>"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub function_id: u32,
    pub line_number: i32,
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (function, line) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| Error::invalid_breakpoint(s))?;

        let function_id = function
            .trim()
            .parse()
            .map_err(|_| Error::invalid_breakpoint(s))?;
        let line_number = line
            .trim()
            .parse()
            .map_err(|_| Error::invalid_breakpoint(s))?;

        Ok(Self {
            function_id,
            line_number,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.function_id, self.line_number)
    }
}

/// Who a process is, as far as the registry is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub pid: i32,
    pub database_id: u32,
}

impl Identity {
    pub fn new(pid: i32, database_id: u32) -> Self {
        Self { pid, database_id }
    }

    /// This OS process, attached to `database_id`
    pub fn current(database_id: u32) -> Self {
        Self::new(std::process::id() as i32, database_id)
    }

    pub fn key(&self, location: Location, target_pid: i32) -> BreakpointKey {
        BreakpointKey::new(
            self.database_id,
            location.function_id,
            location.line_number,
            target_pid,
        )
    }

    pub fn entity(&self, function_id: u32) -> BreakCountKey {
        BreakCountKey {
            database_id: self.database_id,
            function_id,
        }
    }
}

/// One process's view of the Local and Shared tables
pub struct Registry {
    identity: Identity,
    local: Option<Tables>,
    shared: Arc<dyn SharedStore>,
}

impl Registry {
    pub fn new(identity: Identity, shared: Arc<dyn SharedStore>) -> Self {
        Self {
            identity,
            local: None,
            shared,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn shared(&self) -> &Arc<dyn SharedStore> {
        &self.shared
    }

    /// The Local tables, created on first use
    fn local(&mut self) -> &mut Tables {
        self.local.get_or_insert_with(|| {
            tracing::debug!(pid = self.identity.pid, "Initializing local breakpoint tables");
            Tables::local()
        })
    }

    pub async fn lookup(&mut self, scope: Scope, key: &BreakpointKey) -> Result<Option<Breakpoint>> {
        match scope {
            Scope::Local => Ok(self.local().lookup(key)),
            Scope::Shared => self.shared.lookup(*key).await,
        }
    }

    pub async fn has_any(&mut self, scope: Scope, entity: &BreakCountKey) -> Result<bool> {
        match scope {
            Scope::Local => Ok(self.local().has_any(entity)),
            Scope::Shared => self.shared.has_any(*entity).await,
        }
    }

    pub async fn insert(
        &mut self,
        scope: Scope,
        key: BreakpointKey,
        data: BreakpointData,
    ) -> Result<InsertOutcome> {
        match scope {
            Scope::Local => self.local().insert(key, data),
            Scope::Shared => self.shared.insert(Breakpoint { key, data }).await,
        }
    }

    pub async fn insert_or_update(
        &mut self,
        scope: Scope,
        key: BreakpointKey,
        data: BreakpointData,
    ) -> Result<UpsertOutcome> {
        match scope {
            Scope::Local => self.local().insert_or_update(key, data),
            Scope::Shared => self.shared.insert_or_update(Breakpoint { key, data }).await,
        }
    }

    pub async fn delete(&mut self, scope: Scope, key: &BreakpointKey) -> Result<DeleteOutcome> {
        match scope {
            Scope::Local => Ok(self.local().delete(key)),
            Scope::Shared => self.shared.delete(*key).await,
        }
    }

    /// Claim every Shared breakpoint of `proxy_pid` for this process
    ///
    /// The Shared entries are marked busy so other targets ignore them, and
    /// each is copied into the Local table retargeted at this process so it
    /// keeps firing here. Returns how many breakpoints were claimed.
    pub async fn mark_busy_for_session(&mut self, proxy_pid: i32) -> Result<usize> {
        let claimed = self.shared.mark_busy(proxy_pid).await?;
        let pid = self.identity.pid;

        let local = self.local();
        for bp in &claimed {
            let data = BreakpointData {
                busy: false,
                ..bp.data
            };
            local.insert_or_update(bp.key.with_target(pid), data)?;
        }

        tracing::debug!(proxy_pid, claimed = claimed.len(), "Marked proxy session busy");
        Ok(claimed.len())
    }

    pub async fn free_session(&self, proxy_pid: i32) -> Result<usize> {
        self.shared.free_session(proxy_pid).await
    }

    pub async fn cleanup_for_proxy(&self, proxy_pid: i32) -> Result<usize> {
        self.shared.cleanup_for_proxy(proxy_pid).await
    }

    /// Every breakpoint in `scope`
    pub async fn scan(&mut self, scope: Scope) -> Result<Vec<Breakpoint>> {
        match scope {
            Scope::Local => Ok(self.local().iter().collect()),
            Scope::Shared => Ok(self.shared.list().await?.0),
        }
    }

    /// Find the breakpoint, if any, this process should stop at
    ///
    /// Probes a Shared entry targeted at this process, then a Shared
    /// wildcard entry, then the Local table. Busy Shared entries belong to
    /// a session in progress elsewhere and never match. Local comes last so
    /// that copies left behind by an earlier session do not shadow fresh
    /// Shared breakpoints.
    pub async fn resolve(
        &mut self,
        function_id: u32,
        line_number: i32,
    ) -> Result<Option<(Scope, Breakpoint)>> {
        let location = Location {
            function_id,
            line_number,
        };
        let own = self.identity.key(location, self.identity.pid);

        for key in [own, own.with_target(ANY_TARGET)] {
            if let Some(bp) = self.shared.lookup(key).await? {
                if !bp.data.busy {
                    return Ok(Some((Scope::Shared, bp)));
                }
            }
        }

        Ok(self.local().lookup(&own).map(|bp| (Scope::Local, bp)))
    }

    /// Whether `function_id` has any breakpoint in either scope
    pub async fn breakpoints_for_function(&mut self, function_id: u32) -> Result<bool> {
        let entity = self.identity.entity(function_id);
        if self.local().has_any(&entity) {
            return Ok(true);
        }
        self.shared.has_any(entity).await
    }

    /// Log every entry and count of `scope`
    pub async fn show_all(&mut self, scope: Scope) -> Result<()> {
        match scope {
            Scope::Local => self.local().show_all(scope),
            Scope::Shared => {
                let (breakpoints, counts) = self.shared.list().await?;
                tracing::info!(%scope, entries = breakpoints.len(), "Breakpoint table");
                for bp in &breakpoints {
                    tracing::info!(?bp, "Breakpoint");
                }
                for count in &counts {
                    tracing::info!(?count, "BreakCount");
                }
            }
        }
        Ok(())
    }
}
