use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;

use fdrelay_control::ChannelName;
use fdrelay_transport::TransferredDescriptor;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::{ChannelEvent, ChannelId, CloseReason, ClosedChannel};
use crate::handler::ChannelHandler;

/// Default size of a single channel read: 16 KiB.
pub const DEFAULT_READ_BUFFER: usize = 16 * 1024;

/// Configuration for channel stream adapters.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Largest chunk handed to `on_data` at once. Default: 16 KiB.
    pub read_buffer_size: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }
}

/// Duplex byte stream over a transferred descriptor.
///
/// Works for any pollable descriptor (sockets, pipes, ttys). The descriptor
/// is closed when the stream is dropped.
pub struct ChannelStream {
    fd: AsyncFd<File>,
}

impl ChannelStream {
    /// Switch the descriptor to non-blocking mode and register it with the
    /// reactor. Must be called from within a tokio runtime.
    pub fn new(descriptor: TransferredDescriptor) -> std::io::Result<Self> {
        descriptor.set_nonblocking(true)?;
        Ok(Self {
            fd: AsyncFd::new(descriptor.into_file())?,
        })
    }

    /// Read the next chunk. `Ok(0)` means end-of-stream.
    pub async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(Err(err)) if err.kind() == ErrorKind::Interrupted => continue,
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write all of `data`, waiting for the descriptor to drain when the
    /// kernel buffer is full.
    pub async fn write_all(&self, mut data: &[u8]) -> std::io::Result<()> {
        while !data.is_empty() {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| inner.get_ref().write(data)) {
                Ok(Ok(0)) => return Err(ErrorKind::WriteZero.into()),
                Ok(Ok(n)) => data = &data[n..],
                Ok(Err(err)) if err.kind() == ErrorKind::Interrupted => continue,
                Ok(Err(err)) => return Err(err),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

/// Read loop of one channel: feeds inbound chunks to the handler and writes
/// its replies back on the same descriptor.
///
/// Everything the loop needs is supplied up front; the loop owns the
/// descriptor exclusively and releases it when it ends.
pub struct ChannelAdapter {
    id: ChannelId,
    name: ChannelName,
    stream: ChannelStream,
    handler: Box<dyn ChannelHandler>,
    read_buffer_size: usize,
    events: Option<mpsc::UnboundedSender<ChannelEvent>>,
    cancel: CancellationToken,
}

impl ChannelAdapter {
    /// Wrap `descriptor`. On failure the descriptor is closed.
    pub fn new(
        id: ChannelId,
        name: ChannelName,
        descriptor: TransferredDescriptor,
        handler: Box<dyn ChannelHandler>,
        config: &AdapterConfig,
    ) -> std::io::Result<Self> {
        Ok(Self {
            id,
            name,
            stream: ChannelStream::new(descriptor)?,
            handler,
            read_buffer_size: config.read_buffer_size.max(1),
            events: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Report the close of this channel on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Stop the loop (and close the descriptor) when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Start the read loop on the current runtime right away.
    pub fn spawn(self) -> JoinHandle<CloseReason> {
        tokio::spawn(self.run())
    }

    /// Run the read loop to completion.
    pub async fn run(mut self) -> CloseReason {
        debug!(
            channel = %self.name,
            id = self.id,
            fd = self.stream.raw_fd(),
            "channel read loop started"
        );
        let mut buf = vec![0u8; self.read_buffer_size];

        let reason = loop {
            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break CloseReason::Cancelled,
                step = pump(&self.stream, self.handler.as_mut(), &self.name, &mut buf) => step,
            };
            match step {
                Ok(true) => {}
                Ok(false) => break CloseReason::PeerClosed,
                Err(err) => {
                    warn!(channel = %self.name, id = self.id, error = %err, "channel I/O failed");
                    break CloseReason::Failed(err.to_string());
                }
            }
        };

        self.handler.on_close(&self.name, &reason);
        drop(self.stream);
        debug!(channel = %self.name, id = self.id, ?reason, "channel descriptor released");

        if let Some(events) = &self.events {
            let _ = events.send(ChannelEvent::Closed(ClosedChannel {
                id: self.id,
                name: self.name.clone(),
                reason: reason.clone(),
            }));
        }
        reason
    }
}

/// One read, plus the handler's reply if any. `Ok(false)` at end-of-stream.
async fn pump(
    stream: &ChannelStream,
    handler: &mut dyn ChannelHandler,
    name: &ChannelName,
    buf: &mut [u8],
) -> std::io::Result<bool> {
    let n = stream.read(buf).await?;
    if n == 0 {
        return Ok(false);
    }
    if let Some(reply) = handler.on_data(name, &buf[..n]) {
        stream.write_all(&reply).await?;
    }
    Ok(true)
}
