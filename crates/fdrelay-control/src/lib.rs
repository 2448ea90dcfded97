//! Control stream of the fdrelay protocol.
//!
//! The control stream carries three shapes of message:
//! - a bare UTF-8 line naming a channel (`parent`)
//! - the shutdown keyword (`exit`)
//! - an opaque payload with exactly one descriptor attached
//!
//! [`ControlParser`] classifies received envelopes; [`ControlSender`] is the
//! peer side that produces them.

pub mod error;
pub mod message;
pub mod name;
pub mod parser;
pub mod sender;

pub use error::{ControlError, Result};
pub use message::ControlMessage;
pub use name::{ChannelName, PARENT};
pub use parser::{ControlParser, Frames, ParserConfig, SHUTDOWN_KEYWORD};
pub use sender::ControlSender;
