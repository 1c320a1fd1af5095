//! Command handler for processing IPC requests
//!
//! Translates IPC commands into operations on the Shared table and the
//! process table.

use serde_json::json;

use crate::common::{error::IpcError, Result};
use crate::ipc::protocol::{
    AffectedResult, Command, DeleteResult, HasAnyResult, InsertResult, ListResult, LookupResult,
    MarkBusyResult, RegisterResult, Response, StatusResult, UpsertResult, ValidateResult,
};

use super::Coordinator;

/// Handle an IPC command
pub fn handle_command(coordinator: &Coordinator, id: u64, command: Command) -> Response {
    match handle_command_inner(coordinator, command) {
        Ok(result) => Response::success(id, result),
        Err(e) => Response::error(id, IpcError::from(&e)),
    }
}

fn handle_command_inner(coordinator: &Coordinator, command: Command) -> Result<serde_json::Value> {
    let registry = coordinator.registry();

    let value = match command {
        // === Shared breakpoint table ===
        Command::Lookup { key } => serde_json::to_value(LookupResult {
            breakpoint: registry.lookup(&key),
        })?,

        Command::HasAny { entity } => serde_json::to_value(HasAnyResult {
            has_any: registry.has_any(&entity),
        })?,

        Command::Insert { breakpoint } => {
            let outcome = registry.insert(breakpoint.key, breakpoint.data)?;
            tracing::debug!(key = ?breakpoint.key, ?outcome, "Shared insert");
            serde_json::to_value(InsertResult { outcome })?
        }

        Command::InsertOrUpdate { breakpoint } => {
            let outcome = registry.insert_or_update(breakpoint.key, breakpoint.data)?;
            serde_json::to_value(UpsertResult { outcome })?
        }

        Command::Delete { key } => serde_json::to_value(DeleteResult {
            outcome: registry.delete(&key),
        })?,

        Command::MarkBusy { proxy_pid } => serde_json::to_value(MarkBusyResult {
            breakpoints: registry.mark_busy(proxy_pid),
        })?,

        Command::FreeSession { proxy_pid } => {
            let affected = registry.free_session(proxy_pid);
            tracing::debug!(proxy_pid, affected, "Freed proxy session");
            serde_json::to_value(AffectedResult { affected })?
        }

        Command::CleanupProxy { proxy_pid } => {
            let affected = registry.cleanup_for_proxy(proxy_pid);
            tracing::info!(proxy_pid, affected, "Cleaned up proxy breakpoints");
            serde_json::to_value(AffectedResult { affected })?
        }

        Command::List => {
            let (breakpoints, counts) = registry.snapshot();
            serde_json::to_value(ListResult {
                breakpoints,
                counts,
            })?
        }

        // === Process table ===
        Command::RegisterProcess { pid } => {
            let token = coordinator.processes().register(pid);
            tracing::debug!(pid, "Registered process");
            serde_json::to_value(RegisterResult { token })?
        }

        Command::DeregisterProcess { pid } => {
            let removed = coordinator.processes().deregister(pid);
            tracing::debug!(pid, removed, "Deregistered process");
            json!({})
        }

        Command::ValidateProcess { pid, token } => serde_json::to_value(ValidateResult {
            valid: coordinator.processes().validate(pid, &token),
        })?,

        // === Coordinator ===
        Command::Status => serde_json::to_value(StatusResult {
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capacity: registry.capacity(),
            breakpoints: registry.len(),
            processes: coordinator.processes().len(),
            uptime_secs: coordinator.uptime().as_secs(),
        })?,

        // Answered by the server loop before it reaches here
        Command::Shutdown => json!({}),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Breakpoint, BreakpointData, BreakpointKey, InsertOutcome};

    fn breakpoint(function_id: u32) -> Breakpoint {
        Breakpoint {
            key: BreakpointKey::new(1, function_id, 5, -1),
            data: BreakpointData::for_proxy(6000, 42),
        }
    }

    fn result<T: serde::de::DeserializeOwned>(response: Response) -> T {
        assert!(response.success, "unexpected error: {:?}", response.error);
        serde_json::from_value(response.result.unwrap()).unwrap()
    }

    #[test]
    fn test_insert_then_duplicate() {
        let coordinator = Coordinator::new(4).unwrap();

        let first: InsertResult = result(handle_command(
            &coordinator,
            1,
            Command::Insert {
                breakpoint: breakpoint(100),
            },
        ));
        assert_eq!(first.outcome, InsertOutcome::Inserted);

        let second: InsertResult = result(handle_command(
            &coordinator,
            2,
            Command::Insert {
                breakpoint: breakpoint(100),
            },
        ));
        assert_eq!(second.outcome, InsertOutcome::AlreadyExists);
    }

    #[test]
    fn test_full_table_is_reported_as_error() {
        let coordinator = Coordinator::new(1).unwrap();
        handle_command(
            &coordinator,
            1,
            Command::Insert {
                breakpoint: breakpoint(100),
            },
        );

        let response = handle_command(
            &coordinator,
            2,
            Command::Insert {
                breakpoint: breakpoint(200),
            },
        );
        assert!(!response.success);
        assert_eq!(response.id, 2);
        assert_eq!(response.error.unwrap().code, "REGISTRY_FULL");
    }

    #[test]
    fn test_mark_busy_returns_unmarked_copies() {
        let coordinator = Coordinator::new(4).unwrap();
        handle_command(
            &coordinator,
            1,
            Command::Insert {
                breakpoint: breakpoint(100),
            },
        );

        let marked: MarkBusyResult =
            result(handle_command(&coordinator, 2, Command::MarkBusy { proxy_pid: 42 }));
        assert_eq!(marked.breakpoints, vec![breakpoint(100)]);

        let looked_up: LookupResult = result(handle_command(
            &coordinator,
            3,
            Command::Lookup {
                key: breakpoint(100).key,
            },
        ));
        assert!(looked_up.breakpoint.unwrap().data.busy);
    }

    #[test]
    fn test_register_and_validate() {
        let coordinator = Coordinator::new(4).unwrap();
        let registered: RegisterResult =
            result(handle_command(&coordinator, 1, Command::RegisterProcess { pid: 77 }));

        let valid: ValidateResult = result(handle_command(
            &coordinator,
            2,
            Command::ValidateProcess {
                pid: 77,
                token: registered.token,
            },
        ));
        assert!(valid.valid);
    }

    #[test]
    fn test_status() {
        let coordinator = Coordinator::new(4).unwrap();
        let status: StatusResult = result(handle_command(&coordinator, 1, Command::Status));
        assert_eq!(status.capacity, 4);
        assert_eq!(status.breakpoints, 0);
        assert_eq!(status.processes, 0);
    }
}
