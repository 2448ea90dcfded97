use bytes::Bytes;
use fdrelay_transport::TransferredDescriptor;

use crate::name::ChannelName;

/// One decoded control-stream command.
#[derive(Debug)]
pub enum ControlMessage {
    /// Sets the pending channel name; replaces any earlier pending name.
    NameAnnouncement(ChannelName),
    /// Orderly shutdown of the relay.
    Terminate,
    /// A descriptor handoff for whichever name is pending when it is applied.
    RawPayload {
        payload: Bytes,
        descriptor: TransferredDescriptor,
    },
}

impl ControlMessage {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::NameAnnouncement(_) => "name_announcement",
            ControlMessage::Terminate => "terminate",
            ControlMessage::RawPayload { .. } => "raw_payload",
        }
    }
}
