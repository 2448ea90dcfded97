//! Unix domain socket transport that carries file descriptors.
//!
//! Every message is a payload plus at most one descriptor passed as
//! `SCM_RIGHTS` ancillary data. Received descriptors are owned handles from
//! the moment the kernel delivers them, so nothing leaks on error paths.
//!
//! - [`FdSocket`]: blocking socket (peers, tests, accept loops)
//! - [`AsyncFdSocket`]: tokio socket (behind the `async` feature)
//! - [`UnixDomainSocket`]: filesystem-path listener
//! - [`ancillary`]: the raw `sendmsg`/`recvmsg` core

#[cfg(not(unix))]
compile_error!("fdrelay-transport requires a Unix platform (SCM_RIGHTS)");

pub mod ancillary;
pub mod descriptor;
pub mod error;
pub mod socket;
pub mod uds;

#[cfg(feature = "async")]
pub mod async_socket;

pub use descriptor::TransferredDescriptor;
pub use error::{Result, TransportError};
pub use socket::{Envelope, FdSocket, TransportConfig, DEFAULT_RECV_BUFFER};
pub use uds::UnixDomainSocket;

#[cfg(feature = "async")]
pub use async_socket::AsyncFdSocket;
