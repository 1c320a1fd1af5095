//! Length-prefixed framing used by every protocol message
//!
//! ```text
//! +----------------------+---------------------+
//! | length: u32, BE      | length raw bytes    |
//! +----------------------+---------------------+
//! ```
//!
//! A boolean travels as the one-byte frame `t` or `f`. Reads and writes are
//! exact: short transfers and interrupts are retried here, anything else is
//! a fatal [`Fault`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::fault::Fault;

/// Largest frame we are willing to allocate for (16 MiB)
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Fill `buf` completely or fail with a fatal fault
pub async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), Fault> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => return Err(Fault::closed()),
            Ok(n) => filled += n,
            Err(e) => match Fault::classify(e) {
                Fault::Transient(e) => {
                    tracing::trace!("Retrying read after transient fault: {}", e);
                }
                fatal => return Err(fatal),
            },
        }
    }

    Ok(())
}

/// Write all of `buf` or fail with a fatal fault
pub async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, buf: &[u8]) -> Result<(), Fault> {
    let mut written = 0;

    while written < buf.len() {
        match writer.write(&buf[written..]).await {
            Ok(0) => {
                return Err(Fault::Fatal(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "peer stopped accepting data",
                )))
            }
            Ok(n) => written += n,
            Err(e) => match Fault::classify(e) {
                Fault::Transient(e) => {
                    tracing::trace!("Retrying write after transient fault: {}", e);
                }
                fatal => return Err(fatal),
            },
        }
    }

    Ok(())
}

async fn flush<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), Fault> {
    loop {
        match writer.flush().await {
            Ok(()) => return Ok(()),
            Err(e) => match Fault::classify(e) {
                Fault::Transient(_) => continue,
                fatal => return Err(fatal),
            },
        }
    }
}

/// Read a big-endian u32
pub async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, Fault> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

/// Write a big-endian u32
pub async fn write_u32<W: AsyncWrite + Unpin>(writer: &mut W, value: u32) -> Result<(), Fault> {
    write_all(writer, &value.to_be_bytes()).await?;
    flush(writer).await
}

/// Write a fixed-size raw block with no length prefix
pub async fn write_raw<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<(), Fault> {
    write_all(writer, bytes).await?;
    flush(writer).await
}

/// Read a frame; a zero-length frame is "no value"
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, Fault> {
    let len = read_u32(reader).await?;

    if len == 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_LEN {
        return Err(Fault::protocol(format!("frame too large: {} bytes", len)));
    }

    let mut payload = vec![0u8; len as usize];
    read_exact(reader, &mut payload).await?;
    Ok(Some(payload))
}

/// Write a frame
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), Fault> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| Fault::protocol(format!("frame too large: {} bytes", payload.len())))?;

    // Header and payload in one write so the peer never sees a lone length
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);

    write_all(writer, &buf).await?;
    flush(writer).await
}

/// Read a framed string; `None` for a zero-length frame
pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<String>, Fault> {
    match read_frame(reader).await? {
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| Fault::protocol(format!("invalid UTF-8 in frame: {}", e))),
        None => Ok(None),
    }
}

/// Write a framed string
pub async fn write_string<W: AsyncWrite + Unpin>(writer: &mut W, value: &str) -> Result<(), Fault> {
    write_frame(writer, value.as_bytes()).await
}

/// Read a framed boolean; anything but `t` is false
pub async fn read_bool<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool, Fault> {
    Ok(matches!(read_frame(reader).await?.as_deref(), Some(b"t")))
}

/// Write a framed boolean
pub async fn write_bool<W: AsyncWrite + Unpin>(writer: &mut W, value: bool) -> Result<(), Fault> {
    write_frame(writer, if value { b"t" } else { b"f" }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Hands out one byte per read and interrupts every other call
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        interrupt: bool,
    }

    impl Trickle {
        fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                pos: 0,
                interrupt: true,
            }
        }
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Poll::Ready(Err(io::ErrorKind::Interrupted.into()));
            }
            if self.pos < self.data.len() && buf.remaining() > 0 {
                let byte = self.data[self.pos];
                buf.put_slice(&[byte]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_frame_layout() {
        let mut output = Vec::new();
        write_string(&mut output, "1.0").await.unwrap();
        assert_eq!(output, b"\x00\x00\x00\x031.0");

        let mut output = Vec::new();
        write_bool(&mut output, true).await.unwrap();
        assert_eq!(output, b"\x00\x00\x00\x01t");
    }

    #[tokio::test]
    async fn test_string_round_trip() {
        for value in ["", "1.0", "PLDBGBREAK:5432", "ünïcödé"] {
            let mut output = Vec::new();
            write_string(&mut output, value).await.unwrap();

            let mut reader = output.as_slice();
            let decoded = read_string(&mut reader).await.unwrap();
            assert_eq!(decoded.unwrap_or_default(), value);
        }
    }

    #[tokio::test]
    async fn test_empty_string_is_no_value() {
        let mut output = Vec::new();
        write_string(&mut output, "").await.unwrap();
        assert_eq!(output, b"\x00\x00\x00\x00");

        let mut reader = output.as_slice();
        assert_eq!(read_string(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bool_round_trip() {
        for value in [true, false] {
            let mut output = Vec::new();
            write_bool(&mut output, value).await.unwrap();
            let mut reader = output.as_slice();
            assert_eq!(read_bool(&mut reader).await.unwrap(), value);
        }
    }

    #[tokio::test]
    async fn test_bool_anything_but_t_is_false() {
        let mut output = Vec::new();
        write_string(&mut output, "true").await.unwrap();
        write_string(&mut output, "").await.unwrap();

        let mut reader = output.as_slice();
        assert!(!read_bool(&mut reader).await.unwrap());
        assert!(!read_bool(&mut reader).await.unwrap());
    }

    #[tokio::test]
    async fn test_short_and_interrupted_reads_are_retried() {
        let mut data = Vec::new();
        write_string(&mut data, "hello").await.unwrap();
        write_u32(&mut data, 4242).await.unwrap();

        let mut reader = Trickle::new(data);
        assert_eq!(read_string(&mut reader).await.unwrap().as_deref(), Some("hello"));
        assert_eq!(read_u32(&mut reader).await.unwrap(), 4242);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_fatal() {
        let data = b"\x00\x00\x00\x05he".to_vec();
        let mut reader = data.as_slice();

        let fault = read_string(&mut reader).await.unwrap_err();
        assert!(fault.is_fatal());
        assert_eq!(fault.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let data = (MAX_FRAME_LEN + 1).to_be_bytes().to_vec();
        let mut reader = data.as_slice();

        let fault = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(fault.kind(), io::ErrorKind::InvalidData);
    }
}
