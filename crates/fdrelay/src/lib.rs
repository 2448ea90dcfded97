//! Named-channel file-descriptor relay.
//!
//! A peer announces a channel name on a Unix domain control socket, then
//! passes an open descriptor as `SCM_RIGHTS` ancillary data. The relay binds
//! the descriptor to the announced name and serves it as a duplex stream.
//!
//! # Crate Structure
//!
//! - [`transport`]: Socket transport carrying descriptors
//! - [`control`]: Control-stream parser and sender
//! - [`hub`]: Channel registry, stream adapters and the relay loop (behind `hub` feature)

/// Re-export transport types.
pub mod transport {
    pub use fdrelay_transport::*;
}

/// Re-export control-stream types.
pub mod control {
    pub use fdrelay_control::*;
}

/// Re-export relay types (requires `hub` feature).
#[cfg(feature = "hub")]
pub mod hub {
    pub use fdrelay_hub::*;
}
