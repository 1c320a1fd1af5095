//! The debugged side of a conversation
//!
//! A [`Target`] is one cooperating process: it owns its Local breakpoints,
//! reaches the Shared table through a [`SharedStore`], decides where to
//! stop, and attaches to a proxy when it does.

mod attach;
mod commands;
mod session;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::common::{config::AttachConfig, Result};
use crate::registry::{
    release_process, Breakpoint, Identity, ProcessToken, Registry, Scope, SharedStore,
};
use crate::wire::{self, FaultHandler};

pub use attach::PROTOCOL_VERSION;
pub use commands::LoopExit;
pub use session::Session;

/// Out-of-band message for whoever drives this target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A proxy should connect to this port to debug us
    Listening { port: u16 },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening { port } => write!(f, "PLDBGBREAK:{}", port),
        }
    }
}

/// Where execution should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stop {
    pub scope: Scope,
    /// `None` when stopping because of step-into
    pub breakpoint: Option<Breakpoint>,
}

pub struct Target {
    registry: Registry,
    token: ProcessToken,
    config: AttachConfig,
    session: Session,
    faults: FaultHandler,
    step_into_next_call: bool,
    notices: mpsc::UnboundedSender<Notice>,
    notice_rx: Option<mpsc::UnboundedReceiver<Notice>>,
    registered: bool,
}

impl Target {
    /// Register `identity` with the process table and set up its registry
    pub async fn register(
        store: Arc<dyn SharedStore>,
        identity: Identity,
        config: AttachConfig,
    ) -> Result<Self> {
        let token = store.register_process(identity.pid).await?;
        tracing::debug!(pid = identity.pid, database = identity.database_id, "Target registered");

        let (notices, notice_rx) = mpsc::unbounded_channel();

        Ok(Self {
            registry: Registry::new(identity, store),
            token,
            config,
            session: Session::detached(),
            faults: FaultHandler::new(),
            step_into_next_call: false,
            notices,
            notice_rx: Some(notice_rx),
            registered: true,
        })
    }

    pub fn identity(&self) -> Identity {
        self.registry.identity()
    }

    pub fn token(&self) -> ProcessToken {
        self.token
    }

    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_attached()
    }

    pub fn fault_handler(&self) -> &FaultHandler {
        &self.faults
    }

    /// The receiving end of this target's notices; `None` once taken
    pub fn take_notice_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Notice>> {
        self.notice_rx.take()
    }

    fn notify(&self, notice: Notice) {
        tracing::info!("{}", notice);
        // Nobody listening is fine; the log still has it
        let _ = self.notices.send(notice);
    }

    pub fn step_into_next_call(&self) -> bool {
        self.step_into_next_call
    }

    pub fn set_step_into_next_call(&mut self, enabled: bool) {
        self.step_into_next_call = enabled;
    }

    /// Decide whether to stop at `function_id`/`line_number`
    pub async fn resolve_breakpoint_at(
        &mut self,
        function_id: u32,
        line_number: i32,
    ) -> Result<Option<Stop>> {
        if self.step_into_next_call {
            return Ok(Some(Stop {
                scope: Scope::Local,
                breakpoint: None,
            }));
        }

        let hit = self.registry.resolve(function_id, line_number).await?;
        Ok(hit.map(|(scope, breakpoint)| Stop {
            scope,
            breakpoint: Some(breakpoint),
        }))
    }

    /// Whether `function_id` has any breakpoint, Local or Shared
    pub async fn breakpoints_for_function(&mut self, function_id: u32) -> Result<bool> {
        self.registry.breakpoints_for_function(function_id).await
    }

    /// Send a message to the proxy
    ///
    /// Without a session this does nothing. A transport fault drops the
    /// session; later sends then do nothing as well.
    pub async fn send(&mut self, message: &str) -> bool {
        let Some(stream) = self.session.stream_mut() else {
            return false;
        };

        let point = self.faults.arm("send");
        let outcome = wire::write_string(stream, message).await;
        point.settle(&mut self.session, outcome).is_some()
    }

    /// Drop the session, if any
    pub fn detach(&mut self) {
        use crate::wire::Invalidate;
        self.session.invalidate();
    }

    /// Leave the process table
    pub async fn close(mut self) -> Result<()> {
        self.detach();
        let pid = self.identity().pid;
        self.registry.shared().deregister_process(pid).await?;
        self.registered = false;
        tracing::debug!(pid, "Target deregistered");
        Ok(())
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        if self.registered {
            release_process(self.registry.shared(), self.identity().pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Coordinator;
    use crate::registry::{BreakpointData, BreakpointKey, ANY_TARGET};

    async fn target(pid: i32) -> (Arc<Coordinator>, Target) {
        let coordinator = Arc::new(Coordinator::new(20).unwrap());
        let target = Target::register(
            coordinator.clone(),
            Identity::new(pid, 1),
            AttachConfig::default(),
        )
        .await
        .unwrap();
        (coordinator, target)
    }

    #[test]
    fn test_notice_text() {
        assert_eq!(Notice::Listening { port: 5432 }.to_string(), "PLDBGBREAK:5432");
    }

    #[tokio::test]
    async fn test_register_issues_valid_token() {
        let (coordinator, target) = target(7).await;
        assert!(coordinator.processes().validate(7, &target.token()));

        target.close().await.unwrap();
        assert!(coordinator.processes().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_target_leaves_process_table() {
        let (coordinator, target) = target(7).await;
        let token = target.token();

        drop(target);
        assert!(!coordinator.processes().validate(7, &token));
        assert!(coordinator.processes().is_empty());
    }

    #[tokio::test]
    async fn test_step_into_short_circuits_resolution() {
        let (_coordinator, mut target) = target(7).await;
        assert_eq!(target.resolve_breakpoint_at(100, 5).await.unwrap(), None);

        target.set_step_into_next_call(true);
        let stop = target.resolve_breakpoint_at(100, 5).await.unwrap().unwrap();
        assert_eq!(stop.scope, Scope::Local);
        assert!(stop.breakpoint.is_none());
    }

    #[tokio::test]
    async fn test_resolve_finds_shared_wildcard() {
        let (coordinator, mut target) = target(7).await;
        coordinator
            .registry()
            .insert(BreakpointKey::new(1, 100, 5, ANY_TARGET), BreakpointData::for_proxy(6000, 50))
            .unwrap();

        let stop = target.resolve_breakpoint_at(100, 5).await.unwrap().unwrap();
        assert_eq!(stop.scope, Scope::Shared);
        assert_eq!(stop.breakpoint.unwrap().data.proxy_port, Some(6000));
        assert!(target.breakpoints_for_function(100).await.unwrap());
        assert!(!target.breakpoints_for_function(101).await.unwrap());
    }

    #[tokio::test]
    async fn test_send_without_session_is_noop() {
        let (_coordinator, mut target) = target(7).await;
        assert!(!target.send("hello").await);
        assert_eq!(target.fault_handler().depth(), 0);
    }

    #[tokio::test]
    async fn test_notice_receiver_is_taken_once() {
        let (_coordinator, mut target) = target(7).await;
        assert!(target.take_notice_receiver().is_some());
        assert!(target.take_notice_receiver().is_none());
    }
}
