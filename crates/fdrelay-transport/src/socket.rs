use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use bytes::Bytes;
use tracing::{trace, warn};

use crate::ancillary::{recv_message, send_with_descriptor, RecvOutcome};
use crate::descriptor::TransferredDescriptor;
use crate::error::{Result, TransportError};

/// Default receive buffer: 64 KiB per message.
pub const DEFAULT_RECV_BUFFER: usize = 64 * 1024;

/// Configuration shared by the blocking and async sockets.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest payload accepted by a single receive. Default: 64 KiB.
    pub recv_buffer_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// One received message: payload plus at most one transferred descriptor.
///
/// When a descriptor is attached, `payload` holds exactly the bytes of the
/// write that carried it, and `preamble` holds descriptor-less bytes written
/// before it that arrived in the same receive.
///
/// A caller that does not consume `descriptor` closes it by dropping the
/// envelope.
#[derive(Debug)]
pub struct Envelope {
    pub preamble: Bytes,
    pub payload: Bytes,
    pub descriptor: Option<TransferredDescriptor>,
}

impl Envelope {
    /// Build an envelope by hand (tests, in-process feeds).
    pub fn new(payload: impl Into<Bytes>, descriptor: Option<TransferredDescriptor>) -> Self {
        Self {
            preamble: Bytes::new(),
            payload: payload.into(),
            descriptor,
        }
    }

    /// Set the bytes that preceded the descriptor-carrying write.
    pub fn with_preamble(mut self, preamble: impl Into<Bytes>) -> Self {
        self.preamble = preamble.into();
        self
    }

    pub fn has_descriptor(&self) -> bool {
        self.descriptor.is_some()
    }
}

/// Turn a raw `recvmsg` outcome into an envelope, enforcing the
/// one-descriptor-per-message rule.
pub(crate) fn envelope_from(outcome: RecvOutcome, buf: &[u8]) -> Result<Envelope> {
    if outcome.control_truncated {
        return Err(TransportError::AncillaryTruncated);
    }
    if outcome.len == 0 {
        if !outcome.descriptors.is_empty() {
            warn!(
                count = outcome.descriptors.len(),
                "closing descriptors received without payload"
            );
        }
        return Err(TransportError::PeerClosed);
    }
    if outcome.payload_truncated {
        warn!(len = outcome.len, "message truncated to receive buffer size");
    }

    let mut descriptors = outcome.descriptors.into_iter();
    let descriptor = descriptors.next().map(TransferredDescriptor::new);
    let surplus = descriptors.len();
    if surplus > 0 {
        warn!(surplus, "closing surplus descriptors attached to one message");
    }
    drop(descriptors);

    trace!(
        len = outcome.len,
        leading = outcome.leading,
        descriptor = descriptor.as_ref().map(|d| d.as_raw_fd()),
        "received message"
    );

    let leading = outcome.leading.min(outcome.len);
    Ok(Envelope {
        preamble: Bytes::copy_from_slice(&buf[..leading]),
        payload: Bytes::copy_from_slice(&buf[leading..outcome.len]),
        descriptor,
    })
}

/// A connected Unix stream socket that can carry descriptors (blocking).
///
/// Plain `Read`/`Write` are available as well; they never touch ancillary data.
pub struct FdSocket {
    stream: UnixStream,
    config: TransportConfig,
    buf: Vec<u8>,
}

impl FdSocket {
    /// Wrap a connected Unix stream with default configuration.
    pub fn from_unix(stream: UnixStream) -> Self {
        Self::with_config(stream, TransportConfig::default())
    }

    /// Wrap a connected Unix stream and apply timeouts from `config`.
    pub fn with_config(stream: UnixStream, config: TransportConfig) -> Self {
        Self {
            stream,
            buf: vec![0u8; config.recv_buffer_size.max(1)],
            config,
        }
    }

    /// Adopt an inherited or transferred descriptor (e.g. fd 0).
    pub fn from_owned_fd(fd: OwnedFd) -> Self {
        Self::from_unix(UnixStream::from(fd))
    }

    /// A connected, unnamed pair of sockets.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from_unix(a), Self::from_unix(b)))
    }

    /// Block until the next message arrives.
    ///
    /// Returns [`TransportError::PeerClosed`] at end-of-stream.
    pub fn recv(&mut self) -> Result<Envelope> {
        let outcome = recv_message(self.stream.as_fd(), &mut self.buf)?;
        envelope_from(outcome, &self.buf)
    }

    /// Send `payload`, optionally carrying `descriptor`.
    ///
    /// The descriptor is duplicated into the peer by the kernel; the caller's
    /// copy stays open.
    pub fn send(&self, payload: &[u8], descriptor: Option<BorrowedFd<'_>>) -> Result<()> {
        if descriptor.is_some() && payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }

        let mut offset = send_with_descriptor(self.stream.as_fd(), payload, descriptor)?;
        if offset == 0 && !payload.is_empty() {
            return Err(TransportError::Io(std::io::ErrorKind::WriteZero.into()));
        }
        if offset < payload.len() {
            (&self.stream).write_all(&payload[offset..])?;
            offset = payload.len();
        }

        trace!(
            len = offset,
            descriptor = descriptor.map(|d| d.as_raw_fd()),
            "sent message"
        );
        Ok(())
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Apply `config.read_timeout`/`write_timeout` to the stream.
    pub fn apply_timeouts(&self) -> Result<()> {
        self.set_read_timeout(self.config.read_timeout)?;
        self.set_write_timeout(self.config.write_timeout)
    }

    /// Try to clone this socket (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.stream.try_clone()?;
        Ok(Self::with_config(cloned, self.config.clone()))
    }

    /// Current configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Give back the underlying stream.
    pub fn into_std(self) -> UnixStream {
        self.stream
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and the descriptor is an open Unix socket owned by this value.
        let rc = unsafe {
            libc::getsockopt(
                self.stream.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl Read for FdSocket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for FdSocket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl AsFd for FdSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for FdSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl std::fmt::Debug for FdSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdSocket")
            .field("fd", &self.stream.as_raw_fd())
            .finish()
    }
}
