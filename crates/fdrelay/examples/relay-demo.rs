//! Minimal relay: hands one socket to an in-process relay and talks to it.
//!
//! Run with:
//!   cargo run --example relay-demo
//!
//! The same exchange against the CLI, with the control socket on stdin:
//!   fdrelay relay --format pretty

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;

use fdrelay::control::{ChannelName, ControlSender};
use fdrelay::hub::{Relay, RelayConfig};
use fdrelay::transport::{AsyncFdSocket, FdSocket};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (control, relay_end) = FdSocket::pair()?;

    let relay = thread::spawn(move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let reason = runtime.block_on(async {
            let transport = AsyncFdSocket::from_blocking(relay_end)?;
            Relay::new(transport, RelayConfig::default()).run().await
        })?;
        eprintln!("[relay] stopped: {}", reason.as_str());
        Ok(())
    });

    let sender = ControlSender::new(control);
    let (local, mut remote) = UnixStream::pair()?;
    sender.hand_off(&ChannelName::parent(), b"hello", &local)?;
    drop(local);

    remote.write_all(b"ping")?;
    let mut reply = [0u8; 9];
    remote.read_exact(&mut reply)?;
    eprintln!("[client] reply: {}", String::from_utf8_lossy(&reply));

    sender.terminate()?;
    relay
        .join()
        .expect("relay thread should not panic")
        .expect("relay should stop cleanly");

    let mut rest = Vec::new();
    remote.read_to_end(&mut rest)?;
    eprintln!("[client] channel closed by relay");
    Ok(())
}
