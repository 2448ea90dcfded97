use std::path::PathBuf;

/// Errors that can occur in descriptor-passing transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The peer closed its end of the socket. Terminal, but not a failure.
    #[error("peer closed the socket")]
    PeerClosed,

    /// An I/O error occurred on the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The kernel dropped part of the ancillary data (control buffer too small).
    #[error("ancillary data truncated by the kernel")]
    AncillaryTruncated,

    /// A descriptor must travel with at least one byte of payload.
    #[error("a descriptor must be sent with a non-empty payload")]
    EmptyPayload,
}

impl TransportError {
    /// True when the error only signals that the peer went away.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, TransportError::PeerClosed)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
