//! Breakpoint commands and the command loop
//!
//! While stopped, the target reads framed commands from the proxy:
//!
//! - `b <function>:<line>` add a Local breakpoint, reply `t`/`f`
//! - `f <function>:<line>` remove a Local breakpoint, reply `t`/`f`
//! - `c` continue
//! - `s` step into the next call
//!
//! Anything else is answered with `f`.

use crate::common::Result;
use crate::registry::{
    BreakpointData, DeleteOutcome, InsertOutcome, Location, Scope, ENTRY_LINE,
};
use crate::wire::{self, Fault};

use super::Target;

/// Why the command loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Continue,
    StepInto,
    /// The session was lost
    Detached,
}

impl Target {
    /// Add a Local breakpoint from `"<function>:<line>"`
    pub async fn set_breakpoint(&mut self, text: &str) -> bool {
        let location = match text.parse::<Location>() {
            Ok(location) => location,
            Err(e) => {
                tracing::debug!("{}", e);
                return false;
            }
        };

        match self.add_local_breakpoint(location).await {
            Ok(outcome) => outcome == InsertOutcome::Inserted,
            Err(e) => {
                tracing::warn!(%location, "Could not add breakpoint: {}", e);
                false
            }
        }
    }

    /// Remove a Local breakpoint given as `"<function>:<line>"`
    pub async fn clear_breakpoint(&mut self, text: &str) -> bool {
        let Ok(location) = text.parse::<Location>() else {
            return false;
        };

        let identity = self.identity();
        let key = identity.key(location, identity.pid);
        matches!(
            self.registry.delete(Scope::Local, &key).await,
            Ok(DeleteOutcome::Removed)
        )
    }

    /// Stop at the entry of `function_id`
    pub async fn entry_breakpoint(&mut self, function_id: u32) -> Result<InsertOutcome> {
        self.add_local_breakpoint(Location {
            function_id,
            line_number: ENTRY_LINE,
        })
        .await
    }

    async fn add_local_breakpoint(&mut self, location: Location) -> Result<InsertOutcome> {
        let identity = self.identity();
        let key = identity.key(location, identity.pid);
        self.registry
            .insert(Scope::Local, key, BreakpointData::local())
            .await
    }

    /// Serve the proxy's commands until it lets us run again
    pub async fn command_loop(&mut self) -> LoopExit {
        let point = self.faults.arm("command loop");

        loop {
            let outcome = self.serve_command().await;
            match point.settle(&mut self.session, outcome) {
                Some(Some(exit)) => return exit,
                Some(None) => {}
                None => return LoopExit::Detached,
            }
        }
    }

    async fn serve_command(&mut self) -> std::result::Result<Option<LoopExit>, Fault> {
        let stream = self.session.stream_mut().ok_or_else(Fault::closed)?;
        let command = wire::read_string(stream).await?.unwrap_or_default();

        let (verb, args) = command.split_once(' ').unwrap_or((command.as_str(), ""));
        tracing::debug!(verb, args, "Proxy command");

        let reply = match verb {
            "c" => {
                self.step_into_next_call = false;
                return Ok(Some(LoopExit::Continue));
            }
            "s" => {
                self.step_into_next_call = true;
                return Ok(Some(LoopExit::StepInto));
            }
            "b" => self.set_breakpoint(args).await,
            "f" => self.clear_breakpoint(args).await,
            _ => false,
        };

        let stream = self.session.stream_mut().ok_or_else(Fault::closed)?;
        wire::write_bool(stream, reply).await?;
        Ok(None)
    }
}
