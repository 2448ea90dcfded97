use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use fdrelay_control::ChannelName;
use tracing::info;

use crate::event::CloseReason;

/// Reply prefix of the reference echo behaviour.
pub const DEFAULT_REPLY_PREFIX: &str = "pong ";

/// Per-channel behaviour, fixed when the channel is attached.
pub trait ChannelHandler: Send + 'static {
    /// Called for every chunk read from the channel. A returned reply is
    /// written back in full before the next read.
    fn on_data(&mut self, channel: &ChannelName, payload: &[u8]) -> Option<Bytes>;

    /// Called once when the channel stops, before its descriptor is closed.
    fn on_close(&mut self, channel: &ChannelName, reason: &CloseReason) {
        let _ = (channel, reason);
    }
}

/// Builds the handler for a newly attached channel.
pub type HandlerFactory = Arc<dyn Fn(&ChannelName) -> Box<dyn ChannelHandler> + Send + Sync>;

/// Writes back every payload behind a fixed prefix.
#[derive(Debug, Clone)]
pub struct EchoHandler {
    prefix: Bytes,
}

impl EchoHandler {
    pub fn new(prefix: impl Into<Bytes>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Handler factory producing an `EchoHandler` with `prefix` for every channel.
    pub fn factory(prefix: impl Into<Bytes>) -> HandlerFactory {
        let prefix: Bytes = prefix.into();
        Arc::new(move |_: &ChannelName| {
            Box::new(EchoHandler::new(prefix.clone())) as Box<dyn ChannelHandler>
        })
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_PREFIX)
    }
}

impl ChannelHandler for EchoHandler {
    fn on_data(&mut self, channel: &ChannelName, payload: &[u8]) -> Option<Bytes> {
        info!(
            channel = %channel,
            size = payload.len(),
            payload = %String::from_utf8_lossy(payload),
            "received on channel"
        );
        let mut reply = BytesMut::with_capacity(self.prefix.len() + payload.len());
        reply.put_slice(&self.prefix);
        reply.put_slice(payload);
        Some(reply.freeze())
    }

    fn on_close(&mut self, channel: &ChannelName, reason: &CloseReason) {
        info!(channel = %channel, ?reason, "channel closed");
    }
}
