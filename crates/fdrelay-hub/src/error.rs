use fdrelay_control::{ChannelName, ControlError};
use fdrelay_transport::TransportError;

/// Errors that stop the relay or reject a descriptor handoff.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Control transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed control text.
    #[error("control error: {0}")]
    Control(#[from] ControlError),

    /// A descriptor arrived while no channel name was pending.
    #[error("descriptor arrived with no pending channel name")]
    UnboundDescriptor,

    /// The pending name is not in the accepted channel set.
    #[error("unrecognized channel name {0:?}")]
    UnrecognizedChannelName(ChannelName),

    /// The descriptor could not be turned into a channel stream.
    #[error("failed to set up channel {name}: {source}")]
    Setup {
        name: ChannelName,
        source: std::io::Error,
    },
}

impl HubError {
    /// True when the peer broke the control protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            HubError::UnboundDescriptor
                | HubError::UnrecognizedChannelName(_)
                | HubError::Control(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
