use clap::{Args, Subcommand};
use std::os::fd::RawFd;
use std::path::PathBuf;

use fdrelay_control::{PARENT, SHUTDOWN_KEYWORD};
use fdrelay_hub::{DEFAULT_READ_BUFFER, DEFAULT_REPLY_PREFIX};
use fdrelay_transport::DEFAULT_RECV_BUFFER;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod relay;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay on an inherited or accepted control socket.
    Relay(RelayArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Relay(args) => relay::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Inherited descriptor carrying the control stream.
    #[arg(long, value_name = "FD", env = "FDRELAY_CONTROL_FD", default_value_t = 0)]
    pub fd: RawFd,
    /// Bind a socket path and use the first accepted connection as the control stream.
    #[arg(long, value_name = "PATH", conflicts_with = "fd")]
    pub bind: Option<PathBuf>,
    /// Channel names a descriptor may be bound to (comma-separated).
    #[arg(
        long,
        env = "FDRELAY_CHANNELS",
        value_delimiter = ',',
        default_value = PARENT
    )]
    pub channels: Vec<String>,
    /// Prefix written before every echoed payload.
    #[arg(long, default_value = DEFAULT_REPLY_PREFIX)]
    pub reply_prefix: String,
    /// Control text that shuts the relay down.
    #[arg(long, default_value = SHUTDOWN_KEYWORD)]
    pub shutdown_keyword: String,
    /// Largest chunk read from a channel at once, in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_READ_BUFFER)]
    pub read_buffer: usize,
    /// Control socket receive buffer, in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_RECV_BUFFER)]
    pub recv_buffer: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
