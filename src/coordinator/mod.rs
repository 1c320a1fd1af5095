//! Coordination service for a process group
//!
//! The [`Coordinator`] owns the Shared breakpoint table and the live process
//! table. Targets in the same address space hold it through an `Arc`; the
//! `pldbg coordinator` daemon serves the same object to other OS processes
//! over the IPC socket.

mod handler;
mod server;

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::common::{config::Config, paths, Result};
use crate::registry::process::process_alive;
use crate::registry::{
    BreakCount, BreakCountKey, Breakpoint, BreakpointKey, DeleteOutcome, InsertOutcome,
    ProcessTable, ProcessToken, SharedRegistry, SharedStore, UpsertOutcome,
};

pub use handler::handle_command;
pub use server::Server;

/// Shared table plus process table for one process group
#[derive(Debug)]
pub struct Coordinator {
    registry: SharedRegistry,
    processes: ProcessTable,
    started: Instant,
}

impl Coordinator {
    /// Create a coordinator whose Shared table holds `capacity` breakpoints
    pub fn new(capacity: usize) -> Result<Self> {
        let registry = SharedRegistry::with_capacity(capacity)?;
        tracing::debug!(capacity, "Shared breakpoint table ready");

        Ok(Self {
            registry,
            processes: ProcessTable::new(),
            started: Instant::now(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.registry.shared_capacity)
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Forget processes that `alive` reports gone, along with their breakpoints
    ///
    /// Returns the pids that were reaped.
    pub fn sweep_with(&self, alive: impl Fn(i32) -> bool) -> Vec<i32> {
        let mut reaped = Vec::new();

        for pid in self.processes.pids() {
            if alive(pid) {
                continue;
            }
            self.processes.deregister(pid);
            let removed = self.registry.cleanup_for_proxy(pid);
            tracing::info!(pid, removed, "Reaped exited process");
            reaped.push(pid);
        }

        reaped
    }

    /// [`sweep_with`](Self::sweep_with) against the operating system
    pub fn sweep(&self) -> Vec<i32> {
        self.sweep_with(process_alive)
    }
}

#[async_trait]
impl SharedStore for Coordinator {
    async fn lookup(&self, key: BreakpointKey) -> Result<Option<Breakpoint>> {
        Ok(self.registry.lookup(&key))
    }

    async fn has_any(&self, entity: BreakCountKey) -> Result<bool> {
        Ok(self.registry.has_any(&entity))
    }

    async fn insert(&self, breakpoint: Breakpoint) -> Result<InsertOutcome> {
        self.registry.insert(breakpoint.key, breakpoint.data)
    }

    async fn insert_or_update(&self, breakpoint: Breakpoint) -> Result<UpsertOutcome> {
        self.registry.insert_or_update(breakpoint.key, breakpoint.data)
    }

    async fn delete(&self, key: BreakpointKey) -> Result<DeleteOutcome> {
        Ok(self.registry.delete(&key))
    }

    async fn mark_busy(&self, proxy_pid: i32) -> Result<Vec<Breakpoint>> {
        Ok(self.registry.mark_busy(proxy_pid))
    }

    async fn free_session(&self, proxy_pid: i32) -> Result<usize> {
        Ok(self.registry.free_session(proxy_pid))
    }

    async fn cleanup_for_proxy(&self, proxy_pid: i32) -> Result<usize> {
        Ok(self.registry.cleanup_for_proxy(proxy_pid))
    }

    async fn list(&self) -> Result<(Vec<Breakpoint>, Vec<BreakCount>)> {
        Ok(self.registry.snapshot())
    }

    async fn register_process(&self, pid: i32) -> Result<ProcessToken> {
        Ok(self.processes.register(pid))
    }

    async fn deregister_process(&self, pid: i32) -> Result<()> {
        if !self.processes.deregister(pid) {
            tracing::debug!(pid, "Deregistering a process that was not registered");
        }
        Ok(())
    }

    async fn validate_process(&self, pid: i32, token: ProcessToken) -> Result<bool> {
        Ok(self.processes.validate(pid, &token))
    }

    fn deregister_now(&self, pid: i32) -> bool {
        self.processes.deregister(pid);
        true
    }
}

/// Run in coordinator mode
///
/// This is the entry point when the binary is invoked with the hidden
/// `coordinator` command. The coordinator:
/// 1. Creates the Shared table at its configured capacity
/// 2. Listens on the IPC socket for targets and the CLI
/// 3. Periodically reaps processes that exited without deregistering
pub async fn run() -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Starting breakpoint coordinator"
    );

    let config = Config::load()?;
    let coordinator = std::sync::Arc::new(Coordinator::from_config(&config)?);

    let server = Server::bind(coordinator, &paths::socket_name(), &config.coordinator).await?;
    server.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BreakpointData;

    #[test]
    fn test_zero_capacity_fails_startup() {
        assert!(Coordinator::new(0).is_err());
    }

    #[test]
    fn test_sweep_reaps_dead_processes_and_their_breakpoints() {
        let coordinator = Coordinator::new(8).unwrap();
        coordinator.processes().register(100);
        coordinator.processes().register(200);

        coordinator
            .registry()
            .insert(BreakpointKey::new(1, 10, 5, -1), BreakpointData::for_proxy(6000, 100))
            .unwrap();
        coordinator
            .registry()
            .insert(BreakpointKey::new(1, 11, 5, -1), BreakpointData::for_proxy(6001, 200))
            .unwrap();

        let reaped = coordinator.sweep_with(|pid| pid != 100);
        assert_eq!(reaped, vec![100]);

        assert_eq!(coordinator.processes().pids(), vec![200]);
        assert_eq!(coordinator.registry().len(), 1);
        assert!(coordinator
            .registry()
            .lookup(&BreakpointKey::new(1, 11, 5, -1))
            .is_some());
    }

    #[tokio::test]
    async fn test_store_validates_registered_tokens() {
        let coordinator = Coordinator::new(8).unwrap();
        let token = coordinator.register_process(4242).await.unwrap();

        assert!(coordinator.validate_process(4242, token).await.unwrap());
        assert!(!coordinator.validate_process(4243, token).await.unwrap());

        coordinator.deregister_process(4242).await.unwrap();
        assert!(!coordinator.validate_process(4242, token).await.unwrap());
    }
}
