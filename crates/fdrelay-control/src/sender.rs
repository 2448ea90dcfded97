use std::os::fd::AsFd;

use fdrelay_transport::{FdSocket, Result};
use tracing::debug;

use crate::name::ChannelName;
use crate::parser::SHUTDOWN_KEYWORD;

/// Peer side of the control stream: announces names and hands over
/// descriptors to a relay.
///
/// Every command is newline-terminated so that coalesced reads on a stream
/// socket still split into the right frames.
#[derive(Debug)]
pub struct ControlSender {
    socket: FdSocket,
}

impl ControlSender {
    pub fn new(socket: FdSocket) -> Self {
        Self { socket }
    }

    /// Announce the name the next descriptor will be bound to.
    pub fn announce(&self, name: &ChannelName) -> Result<()> {
        debug!(channel = %name, "announcing channel");
        self.socket.send(format!("{name}\n").as_bytes(), None)
    }

    /// Send `descriptor` with `payload` (at least one byte). The caller keeps
    /// its own copy of the descriptor.
    pub fn send_descriptor(&self, payload: &[u8], descriptor: &impl AsFd) -> Result<()> {
        self.socket.send(payload, Some(descriptor.as_fd()))
    }

    /// Announce `name` and immediately hand over `descriptor` for it.
    pub fn hand_off(
        &self,
        name: &ChannelName,
        payload: &[u8],
        descriptor: &impl AsFd,
    ) -> Result<()> {
        self.announce(name)?;
        self.send_descriptor(payload, descriptor)
    }

    /// Ask the relay to shut down.
    pub fn terminate(&self) -> Result<()> {
        self.socket.send(format!("{SHUTDOWN_KEYWORD}\n").as_bytes(), None)
    }

    pub fn socket(&self) -> &FdSocket {
        &self.socket
    }

    pub fn into_socket(self) -> FdSocket {
        self.socket
    }
}
