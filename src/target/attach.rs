//! Attach handshake, target side
//!
//! A breakpoint with no proxy port means nobody is waiting for us yet: we
//! listen on an ephemeral port, announce it, and authenticate whoever
//! connects against the process table. A breakpoint with a proxy port
//! means a proxy set it and is listening there; we connect and present our
//! own credentials.
//!
//! ```text
//! connecting side                      listening side
//!   [u32 pid][16-byte token]    --->
//!                               <---   [bool accepted]
//!   [string version]            --->
//!                               <---   [string version]
//! ```

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpSocket, TcpStream};

use crate::registry::{Breakpoint, ProcessToken, SharedStore};
use crate::wire::{self, Fault};

use super::{Notice, Target};

/// Version string exchanged during the handshake
pub const PROTOCOL_VERSION: &str = "1.0";

impl Target {
    /// Establish a session with the proxy behind `breakpoint`
    ///
    /// Succeeds immediately if a session already exists. Without a
    /// breakpoint there is nobody to attach to. Transport faults end the
    /// attempt and are reported as `false`.
    #[tracing::instrument(skip_all, fields(pid = self.identity().pid))]
    pub async fn attach(&mut self, breakpoint: Option<&Breakpoint>) -> bool {
        if self.session.is_attached() {
            return true;
        }

        let Some(breakpoint) = breakpoint else {
            tracing::debug!("No breakpoint and no session, nothing to attach to");
            return false;
        };

        let point = self.faults.arm("attach");
        let outcome = match breakpoint.data.proxy_port {
            None => self.connect_as_server().await,
            Some(port) => self.connect_as_client(port, breakpoint.data.proxy_pid).await,
        };

        point.settle(&mut self.session, outcome).is_some()
    }

    /// Listen for a proxy and authenticate it
    async fn connect_as_server(&mut self) -> Result<(), Fault> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        let listener = socket.listen(self.config.listen_backlog)?;
        let port = listener.local_addr()?.port();

        self.notify(Notice::Listening { port });

        loop {
            let mut stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => match Fault::classify(e) {
                    Fault::Transient(_) => continue,
                    fatal => return Err(fatal),
                },
            };
            let peer = stream.peer_addr().ok();

            // Only a complete exchange with bad credentials keeps us waiting
            if !authenticate_peer(self.registry.shared().as_ref(), &mut stream).await? {
                tracing::warn!(?peer, "Invalid debugger connection credentials");
                if let Err(fault) = wire::write_bool(&mut stream, false).await {
                    tracing::debug!(?peer, "Could not send refusal: {}", fault);
                }
                continue;
            }

            wire::write_bool(&mut stream, true).await?;
            let peer_version = wire::read_string(&mut stream).await?;
            wire::write_string(&mut stream, PROTOCOL_VERSION).await?;

            self.session.establish(stream, Some(port), None, peer_version);
            return Ok(());
        }
    }

    /// Connect to the proxy waiting on `port` and claim its breakpoints
    async fn connect_as_client(&mut self, port: u16, proxy_pid: i32) -> Result<(), Fault> {
        let mut stream = TcpStream::connect((self.config.proxy_host.as_str(), port))
            .await
            .map_err(Fault::Fatal)?;

        wire::write_u32(&mut stream, self.identity().pid as u32).await?;
        wire::write_raw(&mut stream, self.token.as_bytes()).await?;

        if !wire::read_bool(&mut stream).await? {
            tracing::warn!(port, proxy_pid, "Debugger proxy refused authentication");
        }

        wire::write_string(&mut stream, PROTOCOL_VERSION).await?;
        let peer_version = wire::read_string(&mut stream).await?;

        self.session.establish(stream, None, Some(port), peer_version);

        if let Err(e) = self.registry.mark_busy_for_session(proxy_pid).await {
            tracing::warn!(proxy_pid, "Could not mark proxy session busy: {}", e);
        }
        Ok(())
    }
}

/// Read a peer's pid and token and check them against the process table
async fn authenticate_peer(store: &dyn SharedStore, stream: &mut TcpStream) -> Result<bool, Fault> {
    let pid = wire::read_u32(stream).await? as i32;
    let mut token = [0u8; ProcessToken::LEN];
    wire::read_exact(stream, &mut token).await?;

    match store
        .validate_process(pid, ProcessToken::from_bytes(token))
        .await
    {
        Ok(valid) => Ok(valid),
        Err(e) => {
            tracing::warn!(pid, "Could not validate peer credentials: {}", e);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::common::config::AttachConfig;
    use crate::coordinator::Coordinator;
    use crate::proxy::Proxy;
    use crate::registry::{
        BreakpointData, BreakpointKey, Identity, Location, Scope, ANY_TARGET,
    };

    async fn setup() -> (Arc<Coordinator>, Target) {
        let coordinator = Arc::new(Coordinator::new(20).unwrap());
        let target = Target::register(
            coordinator.clone(),
            Identity::new(7, 1),
            AttachConfig::default(),
        )
        .await
        .unwrap();
        (coordinator, target)
    }

    fn unused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_attach_without_breakpoint_fails() {
        let (_coordinator, mut target) = setup().await;
        assert!(!target.attach(None).await);
    }

    #[tokio::test]
    async fn test_attach_to_dead_proxy_fails_and_stays_detached() {
        let (_coordinator, mut target) = setup().await;
        let breakpoint = Breakpoint {
            key: BreakpointKey::new(1, 100, 5, ANY_TARGET),
            data: BreakpointData::for_proxy(unused_port(), 50),
        };

        assert!(!target.attach(Some(&breakpoint)).await);
        assert!(!target.is_attached());
        assert_eq!(target.fault_handler().depth(), 0);
    }

    #[tokio::test]
    async fn test_listener_rejects_unknown_pid_and_keeps_accepting() {
        let (coordinator, mut target) = setup().await;
        let mut notices = target.take_notice_receiver().unwrap();
        let breakpoint = Breakpoint {
            key: BreakpointKey::new(1, 100, 5, 7),
            data: BreakpointData::local(),
        };

        let attaching = tokio::spawn(async move {
            let attached = target.attach(Some(&breakpoint)).await;
            (target, attached)
        });

        let Some(Notice::Listening { port }) = notices.recv().await else {
            panic!("target did not announce its port");
        };

        // A stranger with a made-up token is turned away
        let mut stranger = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        wire::write_u32(&mut stranger, 99_999).await.unwrap();
        wire::write_raw(&mut stranger, ProcessToken::generate().as_bytes())
            .await
            .unwrap();
        assert!(!wire::read_bool(&mut stranger).await.unwrap());

        // A registered proxy gets in on the same port
        let proxy = Proxy::register(coordinator.clone(), Identity::new(50, 1))
            .await
            .unwrap();
        let session = proxy.attach_to_target("127.0.0.1", port).await.unwrap();
        assert_eq!(session.peer_version(), Some(PROTOCOL_VERSION));

        let (target, attached) = attaching.await.unwrap();
        assert!(attached);
        assert_eq!(target.session().listen_port(), Some(port));
        assert_eq!(target.session().peer_version(), Some(PROTOCOL_VERSION));
    }

    #[tokio::test]
    async fn test_listener_fails_when_peer_hangs_up_mid_handshake() {
        let (_coordinator, mut target) = setup().await;
        let mut notices = target.take_notice_receiver().unwrap();
        let breakpoint = Breakpoint {
            key: BreakpointKey::new(1, 100, 5, 7),
            data: BreakpointData::local(),
        };

        let attaching = tokio::spawn(async move {
            let attached = target.attach(Some(&breakpoint)).await;
            (target, attached)
        });

        let Some(Notice::Listening { port }) = notices.recv().await else {
            panic!("target did not announce its port");
        };

        // Half a pid, then gone
        let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        wire::write_raw(&mut peer, &[0, 0]).await.unwrap();
        drop(peer);

        let (target, attached) = tokio::time::timeout(std::time::Duration::from_secs(5), attaching)
            .await
            .expect("attach should give up once the peer is gone")
            .unwrap();
        assert!(!attached);
        assert!(!target.is_attached());
        assert_eq!(target.fault_handler().depth(), 0);
    }

    #[tokio::test]
    async fn test_connect_variant_claims_proxy_breakpoints() {
        let (coordinator, mut target) = setup().await;
        let proxy = Proxy::register(coordinator.clone(), Identity::new(50, 1))
            .await
            .unwrap();
        let listener = proxy.listen("127.0.0.1").await.unwrap();

        for text in ["100:5", "200:-1"] {
            let location: Location = text.parse().unwrap();
            proxy
                .set_global_breakpoint(location, None, listener.port())
                .await
                .unwrap();
        }

        let stop = target.resolve_breakpoint_at(100, 5).await.unwrap().unwrap();
        assert_eq!(stop.scope, Scope::Shared);

        let accepting = tokio::spawn(async move { listener.accept_target().await });
        assert!(target.attach(stop.breakpoint.as_ref()).await);

        let session = accepting.await.unwrap().unwrap();
        assert_eq!(session.target_pid(), Some(7));
        assert_eq!(target.session().proxy_port(), Some(proxy_port(&coordinator)));

        // Shared entries are busy for everyone else
        let (shared, _) = coordinator.registry().snapshot();
        assert_eq!(shared.len(), 2);
        assert!(shared.iter().all(|bp| bp.data.busy));

        // and still fire here through the Local copies
        let local = target.registry().scan(Scope::Local).await.unwrap();
        assert_eq!(local.len(), 2);
        assert!(local.iter().all(|bp| bp.key.target_pid == 7 && !bp.data.busy));
        let stop = target.resolve_breakpoint_at(200, -1).await.unwrap().unwrap();
        assert_eq!(stop.scope, Scope::Local);

        // Already attached
        assert!(target.attach(None).await);
    }

    fn proxy_port(coordinator: &Coordinator) -> u16 {
        let (shared, _) = coordinator.registry().snapshot();
        shared[0].data.proxy_port.unwrap()
    }
}
