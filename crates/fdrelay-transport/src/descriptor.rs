use std::fmt;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// An open descriptor handed over by a peer process.
///
/// The receiving process owns the descriptor from the moment `recvmsg`
/// returns it. This handle is move-only and closes the descriptor exactly
/// once, when the last owner drops it.
pub struct TransferredDescriptor {
    fd: OwnedFd,
}

impl TransferredDescriptor {
    /// Wrap an owned descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Take ownership of a raw descriptor number.
    ///
    /// # Safety
    ///
    /// `fd` must be open and not owned by anything else in this process.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        // SAFETY: upheld by the caller.
        Self::new(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Duplicate the descriptor (`dup`). Both handles must be closed.
    pub fn try_clone(&self) -> std::io::Result<Self> {
        Ok(Self::new(self.fd.try_clone()?))
    }

    /// Release the handle as an `OwnedFd`.
    pub fn into_owned_fd(self) -> OwnedFd {
        self.fd
    }

    /// Reinterpret the descriptor as a file (any readable/writable descriptor).
    pub fn into_file(self) -> File {
        File::from(self.fd)
    }

    /// Reinterpret the descriptor as a connected Unix stream socket.
    pub fn into_unix_stream(self) -> UnixStream {
        UnixStream::from(self.fd)
    }

    /// Toggle `O_NONBLOCK` on the descriptor.
    pub fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        set_nonblocking(self.fd.as_fd(), nonblocking)
    }
}

pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>, nonblocking: bool) -> std::io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is borrowed from a live descriptor for the duration of the calls.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let wanted = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if wanted != flags {
        // SAFETY: as above.
        if unsafe { libc::fcntl(raw, libc::F_SETFL, wanted) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

impl AsFd for TransferredDescriptor {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for TransferredDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for TransferredDescriptor {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl From<OwnedFd> for TransferredDescriptor {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl From<UnixStream> for TransferredDescriptor {
    fn from(stream: UnixStream) -> Self {
        Self::new(OwnedFd::from(stream))
    }
}

impl From<TransferredDescriptor> for OwnedFd {
    fn from(descriptor: TransferredDescriptor) -> Self {
        descriptor.fd
    }
}

impl fmt::Debug for TransferredDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferredDescriptor")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn drop_closes_descriptor() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let descriptor = TransferredDescriptor::from(local);
        drop(descriptor);

        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).unwrap(), 0, "peer should see EOF");
    }

    #[test]
    fn clone_keeps_stream_open_until_both_dropped() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let first = TransferredDescriptor::from(local);
        let second = first.try_clone().unwrap();
        assert_ne!(first.as_raw_fd(), second.as_raw_fd());

        drop(first);
        let mut stream = second.into_unix_stream();
        stream.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        remote.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");

        drop(stream);
        assert_eq!(remote.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn set_nonblocking_toggles_flag() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let descriptor = TransferredDescriptor::from(local);
        descriptor.set_nonblocking(true).unwrap();

        let mut file = descriptor.into_file();
        let mut buf = [0u8; 4];
        let err = file.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }
}
