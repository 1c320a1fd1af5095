//! Access to the Shared table set from a target process
//!
//! Targets in the same address space as the table use the
//! [`Coordinator`](crate::coordinator::Coordinator) directly; targets in
//! other OS processes go through the coordinator's IPC socket with
//! [`CoordinatorClient`](crate::ipc::CoordinatorClient). Both implement
//! this trait, so the resolution and attach code is identical either way.

use std::sync::Arc;

use async_trait::async_trait;

use super::process::ProcessToken;
use super::{
    BreakCount, BreakCountKey, Breakpoint, BreakpointKey, DeleteOutcome, InsertOutcome,
    UpsertOutcome,
};
use crate::common::Result;

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn lookup(&self, key: BreakpointKey) -> Result<Option<Breakpoint>>;

    async fn has_any(&self, entity: BreakCountKey) -> Result<bool>;

    async fn insert(&self, breakpoint: Breakpoint) -> Result<InsertOutcome>;

    async fn insert_or_update(&self, breakpoint: Breakpoint) -> Result<UpsertOutcome>;

    async fn delete(&self, key: BreakpointKey) -> Result<DeleteOutcome>;

    /// Mark the proxy's breakpoints busy; returns them as they were before
    async fn mark_busy(&self, proxy_pid: i32) -> Result<Vec<Breakpoint>>;

    async fn free_session(&self, proxy_pid: i32) -> Result<usize>;

    async fn cleanup_for_proxy(&self, proxy_pid: i32) -> Result<usize>;

    /// Every entry and count, copied under one read lock
    async fn list(&self) -> Result<(Vec<Breakpoint>, Vec<BreakCount>)>;

    async fn register_process(&self, pid: i32) -> Result<ProcessToken>;

    async fn deregister_process(&self, pid: i32) -> Result<()>;

    async fn validate_process(&self, pid: i32, token: ProcessToken) -> Result<bool>;

    /// Deregister `pid` in place, without awaiting anything
    ///
    /// Returns false when the store can only do it with a request.
    fn deregister_now(&self, _pid: i32) -> bool {
        false
    }
}

/// Take `pid` out of the process table as its handle goes away
///
/// A remote store gets a request spawned on the current runtime; without
/// one the coordinator's liveness sweep reaps the pid later.
pub(crate) fn release_process(store: &Arc<dyn SharedStore>, pid: i32) {
    if store.deregister_now(pid) {
        tracing::debug!(pid, "Process deregistered on drop");
        return;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let store = Arc::clone(store);
            handle.spawn(async move {
                if let Err(e) = store.deregister_process(pid).await {
                    tracing::debug!(pid, "Deregistration on drop failed: {}", e);
                }
            });
        }
        Err(_) => tracing::debug!(pid, "No runtime to deregister on drop"),
    }
}
