//! Named channels built from descriptors received on a control socket.
//!
//! The [`Relay`] reads control messages, the [`ChannelRegistry`] binds each
//! incoming descriptor to the most recently announced name, and every bound
//! descriptor is driven by its own [`ChannelAdapter`] task.

pub mod adapter;
pub mod error;
pub mod event;
pub mod handler;
pub mod registry;
pub mod supervisor;

pub use adapter::{AdapterConfig, ChannelAdapter, ChannelStream, DEFAULT_READ_BUFFER};
pub use error::{HubError, Result};
pub use event::{ChannelEvent, ChannelId, CloseReason, ClosedChannel, RelayEvent, ShutdownReason};
pub use handler::{ChannelHandler, EchoHandler, HandlerFactory, DEFAULT_REPLY_PREFIX};
pub use registry::{Channel, ChannelRegistry, RegistryConfig};
pub use supervisor::{Relay, RelayConfig};
