//! Coordinator spawning logic
//!
//! Automatically spawns the coordinator when needed, using the same binary
//! with the hidden `coordinator` subcommand.

use std::time::Duration;

use crate::common::{paths, Error, Result};
use crate::ipc::{transport, CoordinatorClient};

/// Timeout for the coordinator to start up
const SPAWN_TIMEOUT_SECS: u64 = 5;

/// Connect to the coordinator, spawning it first if necessary
pub async fn ensure_coordinator_running() -> Result<CoordinatorClient> {
    match CoordinatorClient::connect().await {
        Ok(client) => return Ok(client),
        Err(Error::CoordinatorNotRunning) => spawn_coordinator().await?,
        Err(e) => return Err(e),
    }

    CoordinatorClient::connect().await
}

/// Spawn the coordinator process
async fn spawn_coordinator() -> Result<()> {
    tracing::debug!("Spawning coordinator process");

    let exe_path = std::env::current_exe().map_err(|e| {
        Error::Internal(format!("Failed to get current executable path: {}", e))
    })?;

    let socket = paths::socket_path();
    paths::ensure_socket_dir(&socket)?;
    paths::remove_socket(&socket)?;

    // The coordinator logs to its own file, so terminal output is discarded
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        std::process::Command::new(&exe_path)
            .arg("coordinator")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .process_group(0) // New process group (detach from terminal)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn coordinator: {}", e)))?;
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x00000008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        std::process::Command::new(&exe_path)
            .arg("coordinator")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn coordinator: {}", e)))?;
    }

    // Wait for the coordinator to start accepting connections
    let deadline = std::time::Instant::now() + Duration::from_secs(SPAWN_TIMEOUT_SECS);
    let name = paths::socket_name();

    loop {
        if std::time::Instant::now() >= deadline {
            return Err(Error::CoordinatorSpawnTimeout(SPAWN_TIMEOUT_SECS));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        if !transport::socket_exists(&name) {
            continue;
        }

        if transport::connect(&name).await.is_ok() {
            tracing::debug!("Coordinator started successfully");
            return Ok(());
        }
    }
}
