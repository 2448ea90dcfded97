use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};

use bytes::Bytes;
use fdrelay_control::ChannelName;
use fdrelay_transport::TransferredDescriptor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterConfig, ChannelAdapter};
use crate::error::{HubError, Result};
use crate::event::{ChannelEvent, ChannelId, CloseReason, ClosedChannel};
use crate::handler::{EchoHandler, HandlerFactory};

/// Configuration for the channel registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Names a descriptor may be bound to. Anything else is rejected.
    ///
    /// Default: `["parent"]`.
    pub accepted_names: Vec<ChannelName>,
    /// Settings passed to every channel adapter.
    pub adapter: AdapterConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            accepted_names: vec![ChannelName::parent()],
            adapter: AdapterConfig::default(),
        }
    }
}

/// A live channel: a named descriptor whose read loop runs in its own task.
///
/// Dropping a `Channel` cancels its read loop; [`Channel::close`] also waits
/// for the descriptor to be released.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    name: ChannelName,
    fd: RawFd,
    initial_payload: Bytes,
    cancel: CancellationToken,
    task: Option<JoinHandle<CloseReason>>,
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Descriptor number at attach time. Informational only; the adapter
    /// task owns the descriptor.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Payload that accompanied the descriptor handoff.
    pub fn initial_payload(&self) -> &Bytes {
        &self.initial_payload
    }

    /// True once the read loop has ended and the descriptor is released.
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the read loop and wait until the descriptor is closed.
    pub async fn close(mut self) -> CloseReason {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task
                .await
                .unwrap_or_else(|err| CloseReason::Failed(err.to_string())),
            None => CloseReason::Cancelled,
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Pending name plus the live channels, keyed by name.
///
/// Owned by a single task; nothing here is shared.
pub struct ChannelRegistry {
    config: RegistryConfig,
    pending: Option<ChannelName>,
    channels: HashMap<ChannelName, Channel>,
    handlers: HandlerFactory,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shutdown: CancellationToken,
    next_id: ChannelId,
}

impl ChannelRegistry {
    /// Create a registry whose adapters report on `events`.
    pub fn new(config: RegistryConfig, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            config,
            pending: None,
            channels: HashMap::new(),
            handlers: EchoHandler::factory(crate::handler::DEFAULT_REPLY_PREFIX),
            events,
            shutdown: CancellationToken::new(),
            next_id: 1,
        }
    }

    /// Override the handler factory used for channels attached from now on.
    pub fn with_handlers(mut self, handlers: HandlerFactory) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn set_handlers(&mut self, handlers: HandlerFactory) {
        self.handlers = handlers;
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Record `name` as the pending name. A previous pending name is
    /// discarded.
    pub fn bind_name(&mut self, name: ChannelName) {
        if let Some(previous) = self.pending.replace(name) {
            debug!(previous = %previous, "pending channel name overwritten");
        }
    }

    pub fn pending_name(&self) -> Option<&ChannelName> {
        self.pending.as_ref()
    }

    pub fn is_accepted(&self, name: &ChannelName) -> bool {
        self.config.accepted_names.contains(name)
    }

    /// Bind `descriptor` to the pending name and start its read loop.
    ///
    /// The pending name is consumed whether or not the attach succeeds. On
    /// error the descriptor is closed.
    pub async fn attach(
        &mut self,
        descriptor: TransferredDescriptor,
        initial_payload: Bytes,
    ) -> Result<&Channel> {
        let name = self.pending.take().ok_or(HubError::UnboundDescriptor)?;
        if !self.is_accepted(&name) {
            return Err(HubError::UnrecognizedChannelName(name));
        }

        if let Some(previous) = self.channels.remove(&name) {
            warn!(
                channel = %name,
                id = previous.id,
                fd = previous.fd,
                "channel already bound; closing previous descriptor"
            );
            previous.close().await;
        }

        let id = self.next_id;
        self.next_id += 1;
        let fd = descriptor.as_raw_fd();
        let cancel = self.shutdown.child_token();
        let handler = (self.handlers)(&name);

        let adapter =
            ChannelAdapter::new(id, name.clone(), descriptor, handler, &self.config.adapter)
                .map_err(|source| HubError::Setup {
                    name: name.clone(),
                    source,
                })?
                .with_events(self.events.clone())
                .with_cancel(cancel.clone());
        let task = adapter.spawn();

        info!(channel = %name, id, fd, payload_len = initial_payload.len(), "channel attached");
        let channel = Channel {
            id,
            name: name.clone(),
            fd,
            initial_payload,
            cancel,
            task: Some(task),
        };
        let attached: &Channel = self.channels.entry(name).insert_entry(channel).into_mut();
        Ok(attached)
    }

    /// Forget a channel whose read loop ended on its own.
    ///
    /// Returns `false` for events of channels that were already replaced or
    /// closed.
    pub fn handle_closed(&mut self, closed: &ClosedChannel) -> bool {
        let current = self
            .channels
            .get(&closed.name)
            .is_some_and(|channel| channel.id == closed.id);
        if current {
            self.channels.remove(&closed.name);
            debug!(
                channel = %closed.name,
                id = closed.id,
                reason = ?closed.reason,
                "channel removed"
            );
        }
        current
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Names of live channels, sorted.
    pub fn names(&self) -> Vec<&ChannelName> {
        let mut names: Vec<_> = self.channels.keys().collect();
        names.sort();
        names
    }

    /// Close every channel and wait until all descriptors are released.
    pub async fn close_all(&mut self) -> Vec<ClosedChannel> {
        self.pending = None;
        self.shutdown.cancel();

        let mut channels: Vec<Channel> =
            self.channels.drain().map(|(_, channel)| channel).collect();
        channels.sort_by_key(|channel| channel.id);

        let mut closed = Vec::with_capacity(channels.len());
        for channel in channels {
            let id = channel.id;
            let name = channel.name.clone();
            let reason = channel.close().await;
            closed.push(ClosedChannel { id, name, reason });
        }

        // Channels attached after this point get a fresh token.
        self.shutdown = CancellationToken::new();
        closed
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream as StdUnixStream;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    use super::*;

    fn name(text: &str) -> ChannelName {
        ChannelName::new(text)
    }

    fn channel_pair() -> (TransferredDescriptor, UnixStream) {
        let (local, remote) = StdUnixStream::pair().unwrap();
        remote.set_nonblocking(true).unwrap();
        (
            TransferredDescriptor::from(local),
            UnixStream::from_std(remote).unwrap(),
        )
    }

    fn registry() -> (ChannelRegistry, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelRegistry::new(RegistryConfig::default(), tx), rx)
    }

    async fn assert_eof(peer: &mut UnixStream) {
        let mut buf = [0u8; 16];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn last_announcement_wins() {
        let mut config = RegistryConfig::default();
        config.accepted_names.push(name("sibling"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = ChannelRegistry::new(config, tx);

        registry.bind_name(name("a\tb"));
        registry.bind_name(name("sibling"));
        registry.bind_name(name("parent"));
        assert_eq!(registry.pending_name(), Some(&name("parent")));

        let (descriptor, _peer) = channel_pair();
        let channel = registry.attach(descriptor, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(channel.name(), &name("parent"));
        assert_eq!(channel.initial_payload().as_ref(), b"hello");

        assert!(registry.get("sibling").is_none());
        assert!(registry.pending_name().is_none());
    }

    #[tokio::test]
    async fn descriptor_without_pending_name_is_rejected_and_closed() {
        let (mut registry, _rx) = registry();
        let (descriptor, mut peer) = channel_pair();

        let err = registry.attach(descriptor, Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, HubError::UnboundDescriptor));
        assert!(err.is_protocol_violation());
        assert!(registry.is_empty());
        assert_eof(&mut peer).await;
    }

    #[tokio::test]
    async fn pending_name_is_consumed_by_attach() {
        let (mut registry, _rx) = registry();
        registry.bind_name(ChannelName::parent());

        let (first, _first_peer) = channel_pair();
        registry.attach(first, Bytes::from_static(b"a")).await.unwrap();

        let (second, _second_peer) = channel_pair();
        let err = registry.attach(second, Bytes::from_static(b"b")).await.unwrap_err();
        assert!(matches!(err, HubError::UnboundDescriptor));
    }

    #[tokio::test]
    async fn unrecognized_name_is_rejected_and_closed() {
        let (mut registry, _rx) = registry();
        registry.bind_name(name("unknown"));
        let (descriptor, mut peer) = channel_pair();

        let err = registry.attach(descriptor, Bytes::from_static(b"x")).await.unwrap_err();
        match err {
            HubError::UnrecognizedChannelName(rejected) => assert_eq!(rejected, name("unknown")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(registry.is_empty());
        assert_eof(&mut peer).await;
    }

    #[tokio::test]
    async fn attached_channel_echoes() {
        let (mut registry, _rx) = registry();
        registry.bind_name(ChannelName::parent());
        let (descriptor, mut peer) = channel_pair();
        registry.attach(descriptor, Bytes::from_static(b"hello")).await.unwrap();

        peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 9];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong ping");
    }

    #[tokio::test]
    async fn replacing_a_channel_closes_the_previous_descriptor() {
        let (mut registry, mut rx) = registry();

        registry.bind_name(ChannelName::parent());
        let (first, mut first_peer) = channel_pair();
        let first_id = registry.attach(first, Bytes::from_static(b"1")).await.unwrap().id();

        registry.bind_name(ChannelName::parent());
        let (second, mut second_peer) = channel_pair();
        let second_id = registry.attach(second, Bytes::from_static(b"2")).await.unwrap().id();
        assert_ne!(first_id, second_id);
        assert_eq!(registry.len(), 1);

        assert_eof(&mut first_peer).await;

        // The stale close event must not remove the replacement.
        let ChannelEvent::Closed(closed) = rx.recv().await.unwrap();
        assert_eq!(closed.id, first_id);
        assert!(!registry.handle_closed(&closed));
        assert_eq!(registry.get("parent").unwrap().id(), second_id);

        second_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 9];
        second_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong ping");
    }

    #[tokio::test]
    async fn peer_eof_removes_channel() {
        let (mut registry, mut rx) = registry();
        registry.bind_name(ChannelName::parent());
        let (descriptor, peer) = channel_pair();
        registry.attach(descriptor, Bytes::from_static(b"x")).await.unwrap();

        drop(peer);
        let ChannelEvent::Closed(closed) = rx.recv().await.unwrap();
        assert_eq!(closed.reason, CloseReason::PeerClosed);
        assert!(registry.handle_closed(&closed));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_all_releases_every_descriptor() {
        let mut config = RegistryConfig::default();
        config.accepted_names.push(name("sibling"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = ChannelRegistry::new(config, tx);

        let mut peers = Vec::new();
        for channel in ["parent", "sibling"] {
            registry.bind_name(name(channel));
            let (descriptor, peer) = channel_pair();
            registry.attach(descriptor, Bytes::from_static(b"x")).await.unwrap();
            peers.push(peer);
        }
        assert_eq!(registry.names(), vec![&name("parent"), &name("sibling")]);

        let closed = registry.close_all().await;
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|c| c.reason == CloseReason::Cancelled));
        assert!(registry.is_empty());

        for peer in &mut peers {
            assert_eof(peer).await;
        }
    }

    #[tokio::test]
    async fn attach_after_close_all_still_runs() {
        let (mut registry, _rx) = registry();
        registry.close_all().await;

        registry.bind_name(ChannelName::parent());
        let (descriptor, mut peer) = channel_pair();
        let channel = registry.attach(descriptor, Bytes::from_static(b"x")).await.unwrap();
        assert!(!channel.is_closed());

        peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 9];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong ping");
    }
}
