//! Attach handshake, proxy side
//!
//! A proxy reaches a target one of two ways. Either the target stopped at
//! a Local breakpoint and announced a port, and the proxy connects to it
//! ([`Proxy::attach_to_target`]); or the proxy sets Shared breakpoints
//! pointing at its own listening port and waits for whichever target hits
//! one first ([`Proxy::listen`] then [`ProxyListener::accept_target`]).

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::common::{Error, Result};
use crate::registry::{
    release_process, Breakpoint, BreakpointData, Identity, InsertOutcome, Location, ProcessToken,
    SharedStore, ANY_TARGET,
};
use crate::target::PROTOCOL_VERSION;
use crate::wire::{self, Fault};

/// A registered proxy process
pub struct Proxy {
    identity: Identity,
    token: ProcessToken,
    store: Arc<dyn SharedStore>,
    registered: bool,
}

impl Proxy {
    /// Register `identity` with the process table
    pub async fn register(store: Arc<dyn SharedStore>, identity: Identity) -> Result<Self> {
        let token = store.register_process(identity.pid).await?;
        Ok(Self {
            identity,
            token,
            store,
            registered: true,
        })
    }

    pub fn pid(&self) -> i32 {
        self.identity.pid
    }

    /// Connect to a target listening on `host:port`
    pub async fn attach_to_target(&self, host: &str, port: u16) -> Result<ProxySession> {
        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(Fault::Fatal)?;

        wire::write_u32(&mut stream, self.identity.pid as u32).await?;
        wire::write_raw(&mut stream, self.token.as_bytes()).await?;

        if !wire::read_bool(&mut stream).await? {
            return Err(Error::CredentialsRejected {
                pid: self.identity.pid,
            });
        }

        wire::write_string(&mut stream, PROTOCOL_VERSION).await?;
        let peer_version = wire::read_string(&mut stream).await?;
        tracing::info!(port, ?peer_version, "Attached to target");

        Ok(ProxySession {
            stream,
            target_pid: None,
            peer_version,
        })
    }

    /// Listen for targets hitting this proxy's Shared breakpoints
    pub async fn listen(&self, host: &str) -> Result<ProxyListener> {
        let listener = TcpListener::bind((host, 0)).await?;
        let port = listener.local_addr()?.port();
        tracing::info!(port, "Proxy waiting for a target");

        Ok(ProxyListener {
            listener,
            port,
            store: Arc::clone(&self.store),
        })
    }

    /// Set a Shared breakpoint that sends its target to `port`
    ///
    /// `target` restricts it to one process; `None` lets any process hit it.
    pub async fn set_global_breakpoint(
        &self,
        location: Location,
        target: Option<i32>,
        port: u16,
    ) -> Result<InsertOutcome> {
        let key = self.identity.key(location, target.unwrap_or(ANY_TARGET));
        self.store
            .insert(Breakpoint {
                key,
                data: BreakpointData::for_proxy(port, self.identity.pid),
            })
            .await
    }

    /// Release the breakpoints a finished session had claimed
    pub async fn free_session(&self) -> Result<usize> {
        self.store.free_session(self.identity.pid).await
    }

    /// Remove every breakpoint this proxy set
    pub async fn cleanup(&self) -> Result<usize> {
        self.store.cleanup_for_proxy(self.identity.pid).await
    }

    /// Clean up and leave the process table
    pub async fn close(mut self) -> Result<()> {
        self.cleanup().await?;
        self.store.deregister_process(self.identity.pid).await?;
        self.registered = false;
        Ok(())
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        if self.registered {
            release_process(&self.store, self.identity.pid);
        }
    }
}

/// A proxy waiting for a target to connect
pub struct ProxyListener {
    listener: TcpListener,
    port: u16,
    store: Arc<dyn SharedStore>,
}

impl ProxyListener {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for a registered target to connect
    ///
    /// Peers with bad credentials are refused and waiting continues.
    pub async fn accept_target(&self) -> Result<ProxySession> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;

            let pid = match self.authenticate(&mut stream).await {
                Ok(Some(pid)) => pid,
                Ok(None) => {
                    tracing::warn!(%peer, "Refused target with invalid credentials");
                    let _ = wire::write_bool(&mut stream, false).await;
                    continue;
                }
                Err(fault) => {
                    tracing::warn!(%peer, "Handshake with unauthenticated peer failed: {}", fault);
                    continue;
                }
            };

            wire::write_bool(&mut stream, true).await?;
            let peer_version = wire::read_string(&mut stream).await?;
            wire::write_string(&mut stream, PROTOCOL_VERSION).await?;
            tracing::info!(pid, ?peer_version, "Target attached");

            return Ok(ProxySession {
                stream,
                target_pid: Some(pid),
                peer_version,
            });
        }
    }

    async fn authenticate(&self, stream: &mut TcpStream) -> std::result::Result<Option<i32>, Fault> {
        let pid = wire::read_u32(stream).await? as i32;
        let mut token = [0u8; ProcessToken::LEN];
        wire::read_exact(stream, &mut token).await?;

        match self
            .store
            .validate_process(pid, ProcessToken::from_bytes(token))
            .await
        {
            Ok(true) => Ok(Some(pid)),
            Ok(false) => Ok(None),
            Err(e) => {
                tracing::warn!(pid, "Could not validate target credentials: {}", e);
                Ok(None)
            }
        }
    }
}

/// The proxy's end of an established session
pub struct ProxySession {
    stream: TcpStream,
    target_pid: Option<i32>,
    peer_version: Option<String>,
}

impl ProxySession {
    /// Pid of the target, when it introduced itself
    pub fn target_pid(&self) -> Option<i32> {
        self.target_pid
    }

    pub fn peer_version(&self) -> Option<&str> {
        self.peer_version.as_deref()
    }

    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        wire::write_string(&mut self.stream, command).await?;
        Ok(())
    }

    pub async fn read_bool(&mut self) -> Result<bool> {
        Ok(wire::read_bool(&mut self.stream).await?)
    }

    pub async fn read_string(&mut self) -> Result<Option<String>> {
        Ok(wire::read_string(&mut self.stream).await?)
    }
}
