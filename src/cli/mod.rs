//! CLI command handling
//!
//! Dispatches CLI commands to the coordinator and formats output.

mod spawn;

use crate::commands::Commands;
use crate::common::{Error, Result};
use crate::ipc::CoordinatorClient;
use crate::registry::{
    BreakCount, Breakpoint, BreakpointData, BreakpointKey, DeleteOutcome, InsertOutcome, Location,
    SharedStore, ANY_TARGET,
};

pub use spawn::ensure_coordinator_running;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Coordinator => {
            // Should never happen - coordinator mode is handled in main
            Err(Error::Internal(
                "coordinator command should be handled in main".to_string(),
            ))
        }

        Commands::Break {
            location,
            database,
            target,
            proxy_port,
            proxy_pid,
            temporary,
        } => {
            let location: Location = location.parse()?;
            let client = ensure_coordinator_running().await?;

            let key = BreakpointKey::new(
                database,
                location.function_id,
                location.line_number,
                target,
            );
            let data = BreakpointData {
                proxy_port,
                proxy_pid,
                is_temporary: temporary,
                busy: false,
            };

            match client.insert(Breakpoint { key, data }).await? {
                InsertOutcome::Inserted => println!("Breakpoint set at {}", describe(&key)),
                InsertOutcome::AlreadyExists => {
                    println!("Breakpoint already exists at {}", describe(&key))
                }
            }
            Ok(())
        }

        Commands::Clear {
            location,
            database,
            target,
        } => {
            let location: Location = location.parse()?;
            let client = ensure_coordinator_running().await?;

            let key = BreakpointKey::new(
                database,
                location.function_id,
                location.line_number,
                target,
            );

            match client.delete(key).await? {
                DeleteOutcome::Removed => println!("Breakpoint removed at {}", describe(&key)),
                DeleteOutcome::NotFound => println!("No breakpoint at {}", describe(&key)),
            }
            Ok(())
        }

        Commands::List => {
            let client = ensure_coordinator_running().await?;
            let (mut breakpoints, mut counts) = client.list().await?;

            if breakpoints.is_empty() {
                println!("No shared breakpoints set");
                return Ok(());
            }

            breakpoints.sort_by_key(|bp| {
                (
                    bp.key.database_id,
                    bp.key.function_id,
                    bp.key.line_number,
                    bp.key.target_pid,
                )
            });
            counts.sort_by_key(|c| (c.key.database_id, c.key.function_id));

            println!("Shared breakpoints:");
            for bp in &breakpoints {
                print_breakpoint(bp);
            }
            println!();
            println!("Breakpoints per function:");
            for count in &counts {
                print_count(count);
            }
            Ok(())
        }

        Commands::FreeSession { proxy_pid } => {
            let client = ensure_coordinator_running().await?;
            let freed = client.free_session(proxy_pid).await?;
            println!("Released {} breakpoint(s) of proxy {}", freed, proxy_pid);
            Ok(())
        }

        Commands::Cleanup { proxy_pid } => {
            let client = ensure_coordinator_running().await?;
            let removed = client.cleanup_for_proxy(proxy_pid).await?;
            println!("Removed {} breakpoint(s) of proxy {}", removed, proxy_pid);
            Ok(())
        }

        Commands::Status => match CoordinatorClient::connect().await {
            Ok(client) => {
                let status = client.status().await?;
                println!("Coordinator running (pid {}, version {})", status.pid, status.version);
                println!(
                    "  Shared breakpoints: {}/{}",
                    status.breakpoints, status.capacity
                );
                println!("  Registered processes: {}", status.processes);
                println!("  Uptime: {}s", status.uptime_secs);
                Ok(())
            }
            Err(Error::CoordinatorNotRunning) => {
                println!("Coordinator not running");
                Ok(())
            }
            Err(e) => Err(e),
        },

        Commands::Shutdown => match CoordinatorClient::connect().await {
            Ok(client) => {
                client.shutdown().await?;
                println!("Coordinator stopped");
                Ok(())
            }
            Err(Error::CoordinatorNotRunning) => {
                println!("Coordinator not running");
                Ok(())
            }
            Err(e) => Err(e),
        },
    }
}

fn describe(key: &BreakpointKey) -> String {
    let location = Location {
        function_id: key.function_id,
        line_number: key.line_number,
    };
    if key.target_pid == ANY_TARGET {
        format!("{} (database {}, any target)", location, key.database_id)
    } else {
        format!(
            "{} (database {}, target {})",
            location, key.database_id, key.target_pid
        )
    }
}

fn print_breakpoint(bp: &Breakpoint) {
    let proxy = match bp.data.proxy_port {
        Some(port) => format!("proxy {} on port {}", bp.data.proxy_pid, port),
        None => "target listens".to_string(),
    };

    let mut flags = Vec::new();
    if bp.data.busy {
        flags.push("busy");
    }
    if bp.data.is_temporary {
        flags.push("temporary");
    }

    if flags.is_empty() {
        println!("  {}  {}", describe(&bp.key), proxy);
    } else {
        println!("  {}  {} [{}]", describe(&bp.key), proxy, flags.join(", "));
    }
}

fn print_count(count: &BreakCount) {
    println!(
        "  database {} function {}: {}",
        count.key.database_id, count.key.function_id, count.count
    );
}
