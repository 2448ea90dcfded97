use std::future::Future;
use std::ops::ControlFlow;
use std::os::fd::AsRawFd;

use fdrelay_control::{ControlMessage, ControlParser, ParserConfig};
use fdrelay_transport::{AsyncFdSocket, Envelope};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::error::{HubError, Result};
use crate::event::{ChannelEvent, RelayEvent, ShutdownReason};
use crate::handler::{EchoHandler, HandlerFactory, DEFAULT_REPLY_PREFIX};
use crate::registry::{ChannelRegistry, RegistryConfig};

/// Configuration for a [`Relay`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub parser: ParserConfig,
    pub registry: RegistryConfig,
    /// Prefix of the default echo handler. Default: `"pong "`.
    pub reply_prefix: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            parser: ParserConfig::default(),
            registry: RegistryConfig::default(),
            reply_prefix: DEFAULT_REPLY_PREFIX.to_string(),
        }
    }
}

/// Control loop of the relay process.
///
/// Reads control messages in order, keeps the registry up to date and closes
/// every channel before returning.
pub struct Relay {
    transport: AsyncFdSocket,
    parser: ControlParser,
    registry: ChannelRegistry,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    observer: Option<mpsc::UnboundedSender<RelayEvent>>,
}

impl Relay {
    pub fn new(transport: AsyncFdSocket, config: RelayConfig) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let registry = ChannelRegistry::new(config.registry, events_tx)
            .with_handlers(EchoHandler::factory(config.reply_prefix));
        Self {
            transport,
            parser: ControlParser::with_config(config.parser),
            registry,
            events,
            observer: None,
        }
    }

    /// Use `handlers` instead of the echo handler for new channels.
    pub fn with_handlers(mut self, handlers: HandlerFactory) -> Self {
        self.registry.set_handlers(handlers);
        self
    }

    /// Report lifecycle events on `observer`.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<RelayEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Run until the shutdown keyword arrives, or until the control peer has
    /// gone away and every channel it set up has closed.
    pub async fn run(self) -> Result<ShutdownReason> {
        self.run_until(std::future::pending()).await
    }

    /// Like [`Relay::run`], but also shuts down when `shutdown` resolves.
    ///
    /// Losing the control peer only stops reading control messages; live
    /// channels keep running. Every channel descriptor is closed before this
    /// returns, on success and on error alike.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<ShutdownReason>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(fd = self.transport.as_raw_fd(), "relay started");

        let mut control_open = true;
        let outcome = loop {
            if !control_open && self.registry.is_empty() {
                break Ok(ShutdownReason::ControlClosed);
            }
            tokio::select! {
                biased;
                () = &mut shutdown => break Ok(ShutdownReason::Interrupted),
                Some(event) = self.events.recv() => self.on_channel_event(event),
                received = self.transport.recv(), if control_open => match received {
                    Ok(envelope) => {
                        if let ControlFlow::Break(outcome) = self.dispatch(envelope).await {
                            break outcome;
                        }
                    }
                    Err(err) if err.is_peer_closed() => {
                        info!(
                            channels = self.registry.len(),
                            "control peer closed; serving remaining channels"
                        );
                        control_open = false;
                    }
                    Err(err) => break Err(HubError::from(err)),
                },
                else => break Ok(ShutdownReason::ControlClosed),
            }
        };

        self.finish(outcome).await
    }

    async fn dispatch(&mut self, envelope: Envelope) -> ControlFlow<Result<ShutdownReason>> {
        trace!(
            size = envelope.payload.len(),
            has_descriptor = envelope.has_descriptor(),
            "control message received"
        );
        let frames: Vec<_> = self.parser.decode(envelope).collect();
        for frame in frames {
            let message = match frame {
                Ok(message) => message,
                Err(err) => return ControlFlow::Break(Err(err.into())),
            };
            if let ControlFlow::Break(outcome) = self.apply(message).await {
                return ControlFlow::Break(outcome);
            }
        }
        ControlFlow::Continue(())
    }

    async fn apply(&mut self, message: ControlMessage) -> ControlFlow<Result<ShutdownReason>> {
        debug!(kind = message.kind(), "applying control message");
        match message {
            ControlMessage::NameAnnouncement(name) => {
                self.notify(RelayEvent::NameBound { name: name.clone() });
                self.registry.bind_name(name);
            }
            ControlMessage::Terminate => {
                info!("shutdown requested on control channel");
                return ControlFlow::Break(Ok(ShutdownReason::Terminate));
            }
            ControlMessage::RawPayload {
                payload,
                descriptor,
            } => match self.registry.attach(descriptor, payload).await {
                Ok(channel) => {
                    let event = RelayEvent::ChannelAttached {
                        id: channel.id(),
                        name: channel.name().clone(),
                        fd: channel.fd(),
                        payload_len: channel.initial_payload().len(),
                    };
                    self.notify(event);
                }
                Err(err @ HubError::Setup { .. }) => {
                    warn!(error = %err, "descriptor rejected; continuing");
                }
                Err(err) => return ControlFlow::Break(Err(err)),
            },
        }
        ControlFlow::Continue(())
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Closed(closed) => {
                self.registry.handle_closed(&closed);
                self.notify(RelayEvent::ChannelClosed(closed));
            }
        }
    }

    async fn finish(mut self, outcome: Result<ShutdownReason>) -> Result<ShutdownReason> {
        match &outcome {
            Ok(reason) => info!(
                reason = reason.as_str(),
                channels = self.registry.len(),
                "relay shutting down"
            ),
            Err(err) => error!(error = %err, channels = self.registry.len(), "relay failed"),
        }

        while let Ok(event) = self.events.try_recv() {
            self.on_channel_event(event);
        }
        for closed in self.registry.close_all().await {
            self.notify(RelayEvent::ChannelClosed(closed));
        }

        if let Ok(reason) = &outcome {
            self.notify(RelayEvent::Shutdown { reason: *reason });
        }
        outcome
    }

    fn notify(&self, event: RelayEvent) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
    }
}
