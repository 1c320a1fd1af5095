//! Coordinator server - IPC listener and main event loop

use std::sync::Arc;
use std::time::{Duration, Instant};

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::common::{config::CoordinatorConfig, error::IpcError, Result};
use crate::ipc::{
    protocol::{Command, Request, Response},
    transport,
};

use super::{handler, Coordinator};

/// Serves a [`Coordinator`] on a local socket
pub struct Server {
    coordinator: Arc<Coordinator>,
    listener: transport::Listener,
    name: String,
    sweep_interval: Duration,
    idle_timeout: Option<Duration>,
    /// Last activity timestamp for idle timeout
    last_activity: Arc<Mutex<Instant>>,
    shutdown: Arc<Notify>,
}

impl Server {
    /// Start listening on `name`
    pub async fn bind(
        coordinator: Arc<Coordinator>,
        name: &str,
        config: &CoordinatorConfig,
    ) -> Result<Self> {
        let listener = transport::create_listener(name).await?;
        tracing::info!("Coordinator listening on {}", name);

        let idle_timeout = match config.idle_timeout_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes * 60)),
        };

        Ok(Self {
            coordinator,
            listener,
            name: name.to_string(),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            idle_timeout,
            last_activity: Arc::new(Mutex::new(Instant::now())),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Handle that stops [`run`](Self::run) when notified
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Run the coordinator main loop until shutdown
    pub async fn run(self) -> Result<()> {
        let signals = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            match shutdown_signal().await {
                Ok(()) => signals.notify_one(),
                Err(e) => tracing::warn!("Could not install signal handlers: {}", e),
            }
        });

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!("Shutdown requested, exiting");
                    break;
                }
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok(stream) => {
                            *self.last_activity.lock() = Instant::now();
                            tokio::spawn(handle_client(
                                Arc::clone(&self.coordinator),
                                stream,
                                Arc::clone(&self.last_activity),
                                Arc::clone(&self.shutdown),
                            ));
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = sweep.tick() => {
                    let reaped = self.coordinator.sweep();
                    if !reaped.is_empty() {
                        tracing::debug!(?reaped, "Liveness sweep");
                    }
                    if self.idle_expired() {
                        tracing::info!("Idle timeout reached, shutting down coordinator");
                        break;
                    }
                }
            }
        }

        // Cleanup
        #[cfg(unix)]
        crate::common::paths::remove_socket(std::path::Path::new(&self.name))?;
        tracing::info!("Coordinator shutdown complete");

        Ok(())
    }

    fn idle_expired(&self) -> bool {
        match self.idle_timeout {
            Some(timeout) => {
                self.coordinator.processes().is_empty()
                    && self.last_activity.lock().elapsed() > timeout
            }
            None => false,
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
        _ = sigint.recv() => tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down gracefully");
    Ok(())
}

/// Serve one client connection until it disconnects
async fn handle_client(
    coordinator: Arc<Coordinator>,
    stream: transport::Stream,
    last_activity: Arc<Mutex<Instant>>,
    shutdown: Arc<Notify>,
) {
    if let Err(e) = serve_client(&coordinator, stream, &last_activity, &shutdown).await {
        tracing::error!("Error handling client: {}", e);
    }
}

async fn serve_client(
    coordinator: &Coordinator,
    stream: transport::Stream,
    last_activity: &Mutex<Instant>,
    shutdown: &Notify,
) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Read and process commands until client disconnects
    loop {
        let request_data = match transport::recv_message(&mut reader).await {
            Ok(data) => data,
            Err(fault) if fault.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!("Client disconnected");
                break;
            }
            Err(fault) => {
                tracing::error!("Error reading request: {}", fault);
                break;
            }
        };

        let request: Request = match serde_json::from_slice(&request_data) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Invalid request: {}", e);
                let response = Response::error(
                    0,
                    IpcError {
                        code: "INVALID_REQUEST".to_string(),
                        message: e.to_string(),
                    },
                );
                let json = serde_json::to_vec(&response)?;
                transport::send_message(&mut writer, &json).await?;
                continue;
            }
        };

        tracing::debug!("Received command: {:?}", request.command);
        *last_activity.lock() = Instant::now();

        if matches!(request.command, Command::Shutdown) {
            let json = serde_json::to_vec(&Response::ok(request.id))?;
            transport::send_message(&mut writer, &json).await?;
            shutdown.notify_one();
            break;
        }

        let response = handler::handle_command(coordinator, request.id, request.command);

        let json = serde_json::to_vec(&response)?;
        transport::send_message(&mut writer, &json).await?;
    }

    Ok(())
}
