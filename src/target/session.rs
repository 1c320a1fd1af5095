//! The transport of an attached debugging conversation

use tokio::net::TcpStream;

use crate::wire::Invalidate;

/// A target's link to its proxy, if any
#[derive(Debug, Default)]
pub struct Session {
    stream: Option<TcpStream>,
    /// Port we listened on when the proxy came to us
    listen_port: Option<u16>,
    /// Port of the proxy we connected to
    proxy_port: Option<u16>,
    peer_version: Option<String>,
}

impl Session {
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn establish(
        &mut self,
        stream: TcpStream,
        listen_port: Option<u16>,
        proxy_port: Option<u16>,
        peer_version: Option<String>,
    ) {
        tracing::debug!(?listen_port, ?proxy_port, ?peer_version, "Session established");
        self.stream = Some(stream);
        self.listen_port = listen_port;
        self.proxy_port = proxy_port;
        self.peer_version = peer_version;
    }

    pub(crate) fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    pub fn proxy_port(&self) -> Option<u16> {
        self.proxy_port
    }

    /// Protocol version the proxy announced
    pub fn peer_version(&self) -> Option<&str> {
        self.peer_version.as_deref()
    }
}

impl Invalidate for Session {
    fn invalidate(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Session transport invalidated");
        }
        self.listen_port = None;
        self.proxy_port = None;
    }
}
