//! Multi-channel example: a socket on `parent` and a pipe on `logs`, each
//! with its own handler.
//!
//! Run with:
//!   cargo run --example multi-channel

use std::io::{Read, Write};
use std::os::fd::FromRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use fdrelay::control::{ChannelName, ControlSender};
use fdrelay::hub::{
    ChannelHandler, CloseReason, EchoHandler, HandlerFactory, Relay, RelayConfig,
};
use fdrelay::transport::{AsyncFdSocket, FdSocket};

/// Prints everything written to the channel and never replies.
struct LogSink;

impl ChannelHandler for LogSink {
    fn on_data(&mut self, channel: &ChannelName, payload: &[u8]) -> Option<Bytes> {
        eprint!("[relay:{channel}] {}", String::from_utf8_lossy(payload));
        None
    }

    fn on_close(&mut self, channel: &ChannelName, reason: &CloseReason) {
        eprintln!("[relay:{channel}] closed ({reason:?})");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logs = ChannelName::new("logs");

    let mut config = RelayConfig::default();
    config.registry.accepted_names.push(logs.clone());

    let handlers: HandlerFactory = Arc::new(|name: &ChannelName| -> Box<dyn ChannelHandler> {
        match name.as_str() {
            "logs" => Box::new(LogSink),
            _ => Box::new(EchoHandler::new("ack ")),
        }
    });

    let (control, relay_end) = FdSocket::pair()?;
    let relay = thread::spawn(move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async {
            let transport = AsyncFdSocket::from_blocking(relay_end)?;
            Relay::new(transport, config).with_handlers(handlers).run().await
        })?;
        Ok(())
    });

    let sender = ControlSender::new(control);

    let (local, mut parent) = UnixStream::pair()?;
    sender.hand_off(&ChannelName::parent(), b"hello", &local)?;
    drop(local);

    let mut fds = [0; 2];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: both descriptors were just created and are owned here.
    let (read_end, write_end) = unsafe {
        (
            std::fs::File::from_raw_fd(fds[0]),
            std::fs::File::from_raw_fd(fds[1]),
        )
    };
    sender.hand_off(&logs, b"hello", &read_end)?;
    drop(read_end);

    let mut log_writer = write_end;
    log_writer.write_all(b"first log line\n")?;

    parent.write_all(b"ping")?;
    let mut reply = [0u8; 8];
    parent.read_exact(&mut reply)?;
    eprintln!("[client] parent reply: {}", String::from_utf8_lossy(&reply));

    log_writer.write_all(b"second log line\n")?;
    drop(log_writer);

    sender.terminate()?;
    relay
        .join()
        .expect("relay thread should not panic")
        .expect("relay should stop cleanly");
    Ok(())
}
