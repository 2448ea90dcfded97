use std::fmt;
use std::io;

use fdrelay_hub::HubError;
use fdrelay_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::PathTooLong { .. } => CliError::usage(format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn hub_error(context: &str, err: HubError) -> CliError {
    if err.is_protocol_violation() {
        return CliError::new(DATA_INVALID, format!("{context}: {err}"));
    }
    match err {
        HubError::Transport(err) => transport_error(context, err),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use fdrelay_control::ChannelName;

    use super::*;

    #[test]
    fn protocol_violations_map_to_data_invalid() {
        let unbound = hub_error("relay failed", HubError::UnboundDescriptor);
        assert_eq!(unbound.code, DATA_INVALID);

        let unknown = hub_error(
            "relay failed",
            HubError::UnrecognizedChannelName(ChannelName::new("unknown")),
        );
        assert_eq!(unknown.code, DATA_INVALID);
        assert!(unknown.message.contains("unknown"));
    }

    #[test]
    fn transport_failures_keep_io_classification() {
        let denied = hub_error(
            "relay failed",
            HubError::Transport(TransportError::Io(io::Error::from(
                io::ErrorKind::PermissionDenied,
            ))),
        );
        assert_eq!(denied.code, PERMISSION_DENIED);

        let truncated = hub_error(
            "relay failed",
            HubError::Transport(TransportError::AncillaryTruncated),
        );
        assert_eq!(truncated.code, TRANSPORT_ERROR);
    }
}
