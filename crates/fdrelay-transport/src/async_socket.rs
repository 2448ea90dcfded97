use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use tokio::io::Interest;
use tokio::net::UnixStream;
use tracing::trace;

use crate::ancillary::{recv_message, send_with_descriptor};
use crate::error::{Result, TransportError};
use crate::socket::{envelope_from, Envelope, FdSocket, TransportConfig};

/// Tokio counterpart of [`FdSocket`].
///
/// `recv` is cancel-safe: readiness is awaited first and `recvmsg` runs
/// synchronously once the socket is readable, so dropping the future never
/// loses a message or a descriptor.
pub struct AsyncFdSocket {
    stream: UnixStream,
    config: TransportConfig,
    buf: Vec<u8>,
}

impl AsyncFdSocket {
    /// Register a connected std socket with the tokio reactor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_std(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        Self::with_config(stream, TransportConfig::default())
    }

    /// Register a connected std socket with explicit configuration.
    pub fn with_config(
        stream: std::os::unix::net::UnixStream,
        config: TransportConfig,
    ) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream: UnixStream::from_std(stream)?,
            buf: vec![0u8; config.recv_buffer_size.max(1)],
            config,
        })
    }

    /// Adopt an inherited descriptor (e.g. fd 0) as the socket.
    pub fn from_owned_fd(fd: OwnedFd, config: TransportConfig) -> Result<Self> {
        Self::with_config(std::os::unix::net::UnixStream::from(fd), config)
    }

    /// Move a blocking socket onto the reactor, keeping its configuration.
    pub fn from_blocking(socket: FdSocket) -> Result<Self> {
        let config = socket.config().clone();
        Self::with_config(socket.into_std(), config)
    }

    /// A connected, unnamed pair of sockets.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_std(a)?, Self::from_std(b)?))
    }

    /// Wait for the next message.
    ///
    /// Returns [`TransportError::PeerClosed`] at end-of-stream.
    pub async fn recv(&mut self) -> Result<Envelope> {
        let Self { stream, buf, .. } = self;
        let outcome = stream
            .async_io(Interest::READABLE, || recv_message(stream.as_fd(), buf))
            .await?;
        envelope_from(outcome, buf)
    }

    /// Send `payload`, optionally carrying `descriptor`.
    pub async fn send(&self, payload: &[u8], descriptor: Option<BorrowedFd<'_>>) -> Result<()> {
        if descriptor.is_some() && payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }

        let mut offset = 0usize;
        let mut attach = descriptor;
        while offset < payload.len() {
            let written = self
                .stream
                .async_io(Interest::WRITABLE, || {
                    send_with_descriptor(self.stream.as_fd(), &payload[offset..], attach)
                })
                .await?;
            if written == 0 {
                return Err(TransportError::Io(std::io::ErrorKind::WriteZero.into()));
            }
            attach = None;
            offset += written;
        }

        trace!(
            len = offset,
            descriptor = descriptor.map(|d| d.as_raw_fd()),
            "sent message"
        );
        Ok(())
    }

    /// Current configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl AsFd for AsyncFdSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for AsyncFdSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl std::fmt::Debug for AsyncFdSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFdSocket")
            .field("fd", &self.stream.as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[tokio::test]
    async fn async_round_trip_with_descriptor() {
        let (sender, mut receiver) = AsyncFdSocket::pair().unwrap();
        let (mut kept, handed) = std::os::unix::net::UnixStream::pair().unwrap();

        sender.send(b"hello", Some(handed.as_fd())).await.unwrap();
        drop(handed);

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.payload.as_ref(), b"hello");
        let mut stream = envelope.descriptor.expect("descriptor").into_unix_stream();
        stream.write_all(b"ok").unwrap();

        let mut buf = [0u8; 2];
        kept.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[tokio::test]
    async fn async_recv_reports_peer_closed() {
        let (sender, mut receiver) = AsyncFdSocket::pair().unwrap();
        drop(sender);
        assert!(receiver.recv().await.unwrap_err().is_peer_closed());
    }

    #[tokio::test]
    async fn blocking_sender_feeds_async_receiver() {
        let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();
        let sender = FdSocket::from_unix(a);
        let mut receiver = AsyncFdSocket::from_blocking(FdSocket::from_unix(b)).unwrap();

        sender.send(b"parent\n", None).unwrap();
        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.payload.as_ref(), b"parent\n");
        assert!(!envelope.has_descriptor());
    }

    #[tokio::test]
    async fn receive_buffer_is_reused_across_messages() {
        let (sender, mut receiver) = AsyncFdSocket::pair().unwrap();
        let (_kept, handed) = std::os::unix::net::UnixStream::pair().unwrap();

        sender.send(b"a much longer first message", None).await.unwrap();
        assert_eq!(
            receiver.recv().await.unwrap().payload.as_ref(),
            b"a much longer first message"
        );

        sender.send(b"parent\n", None).await.unwrap();
        sender.send(b"x", Some(handed.as_fd())).await.unwrap();
        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.preamble.as_ref(), b"parent\n");
        assert_eq!(envelope.payload.as_ref(), b"x");
        assert!(envelope.has_descriptor());
    }
}
