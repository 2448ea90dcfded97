use std::os::fd::RawFd;

use fdrelay_control::ChannelName;

/// Identifier assigned to each attached channel, unique per registry.
pub type ChannelId = u64;

/// Why a channel's read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The far end reached end-of-stream.
    PeerClosed,
    /// A read or write failed.
    Failed(String),
    /// The channel was replaced or the relay shut down.
    Cancelled,
}

/// A channel that has released its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedChannel {
    pub id: ChannelId,
    pub name: ChannelName,
    pub reason: CloseReason,
}

/// Emitted by channel adapters towards the supervisor.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Closed(ClosedChannel),
}

/// How the relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The shutdown keyword arrived on the control channel.
    Terminate,
    /// The control peer closed its end and no channel was left open.
    ControlClosed,
    /// The external shutdown future resolved (e.g. Ctrl-C).
    Interrupted,
}

impl ShutdownReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ShutdownReason::Terminate => "terminate",
            ShutdownReason::ControlClosed => "control_closed",
            ShutdownReason::Interrupted => "interrupted",
        }
    }
}

/// Lifecycle notifications for an optional observer of the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    NameBound {
        name: ChannelName,
    },
    ChannelAttached {
        id: ChannelId,
        name: ChannelName,
        fd: RawFd,
        payload_len: usize,
    },
    ChannelClosed(ClosedChannel),
    Shutdown {
        reason: ShutdownReason,
    },
}
