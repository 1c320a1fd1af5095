//! Cross-platform IPC transport layer
//!
//! Abstracts Unix domain sockets (Unix/macOS) and named pipes (Windows)
//! using the interprocess crate. Messages use the same length-prefixed
//! framing as the attach handshake.

use std::io;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::wire::{self, Fault};

// Platform-specific imports and type aliases
#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

pub use platform::{Listener, Stream};

/// Create a listener on the socket `name`
///
/// On Unix `name` is a filesystem path; a stale socket left behind by a
/// dead coordinator is removed first.
pub async fn create_listener(name: &str) -> io::Result<Listener> {
    #[cfg(unix)]
    let listener = {
        let path = Path::new(name);
        crate::common::paths::ensure_socket_dir(path)?;
        crate::common::paths::remove_socket(path)?;

        let listener = ListenerOptions::new()
            .name(name.to_fs_name::<GenericFilePath>()?)
            .create_tokio()?;

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        listener
    };

    #[cfg(windows)]
    let listener = ListenerOptions::new()
        .name(name.to_ns_name::<GenericNamespaced>()?)
        .create_tokio()?;

    Ok(listener)
}

/// Connect to the socket `name`
pub async fn connect(name: &str) -> io::Result<Stream> {
    #[cfg(unix)]
    let stream = Stream::connect(name.to_fs_name::<GenericFilePath>()?).await?;

    #[cfg(windows)]
    let stream = Stream::connect(name.to_ns_name::<GenericNamespaced>()?).await?;

    Ok(stream)
}

/// Send one message
pub async fn send_message<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<(), Fault> {
    wire::write_frame(writer, data).await
}

/// Receive one message
pub async fn recv_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, Fault> {
    wire::read_frame(reader)
        .await?
        .ok_or_else(|| Fault::protocol("empty IPC message"))
}

/// Check if the coordinator socket exists
pub fn socket_exists(name: &str) -> bool {
    #[cfg(unix)]
    {
        Path::new(name).exists()
    }

    #[cfg(windows)]
    {
        // Named pipes cannot be probed cheaply; rely on connection attempts
        let _ = name;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(64);
        send_message(&mut a, br#"{"id":1}"#).await.unwrap();
        assert_eq!(recv_message(&mut b).await.unwrap(), br#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_empty_message_is_protocol_fault() {
        let (mut a, mut b) = tokio::io::duplex(64);
        wire::write_u32(&mut a, 0).await.unwrap();
        let fault = recv_message(&mut b).await.unwrap_err();
        assert_eq!(fault.kind(), io::ErrorKind::InvalidData);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_listener_replaces_stale_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("run").join("coordinator.sock");
        let name = socket.to_string_lossy().into_owned();

        std::fs::create_dir_all(socket.parent().unwrap()).unwrap();
        std::fs::write(&socket, b"stale").unwrap();
        assert!(socket_exists(&name));

        let _listener = create_listener(&name).await.unwrap();
        assert!(socket_exists(&name));
        assert!(connect(&name).await.is_ok());
    }
}
