//! MQTT connection manager
//!
//! Owns the single broker session. rumqttc reconnects by itself as long as
//! the event loop keeps being polled, so transient failures are only logged
//! and announced to the connectivity listeners. Producers never talk to the
//! broker directly: they write into a bounded outbound queue which this
//! manager drains one message at a time.

use crate::config::{ConfigError, MqttServer};
use crate::connectivity::ConnectivityHub;
use crate::models::{Device, OutboundMessage};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument, Span};

/// Topic on which Home Assistant announces its own (re)start
pub const PRESENCE_TOPIC: &str = "homeassistant/status";
pub const ONLINE_PAYLOAD: &[u8] = b"online";

pub const KEEP_ALIVE: Duration = Duration::from_secs(20);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Upper bound for writing our DISCONNECT on shutdown
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broker client rejected request: {0}")]
    Rejected(String),
}

impl From<rumqttc::ClientError> for TransportError {
    fn from(e: rumqttc::ClientError) -> Self {
        TransportError::Rejected(e.to_string())
    }
}

/// Outgoing side of a broker session. Calls never wait on the network.
pub trait Transport: Send + Sync {
    fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError>;
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;
    fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// What the connection manager reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected,
    Message { topic: String, payload: Vec<u8> },
    Disconnected(String),
    /// Our own DISCONNECT has been written
    Closed,
    Idle,
}

/// Incoming side of a broker session
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> BrokerEvent;
}

/// rumqttc client handle
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl Transport for MqttTransport {
    fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.client
            .try_publish(message.topic.as_str(), message.qos, message.retain, message.payload.clone())?;
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client.try_subscribe(topic, qos)?;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.client.try_disconnect()?;
        Ok(())
    }
}

#[async_trait]
impl EventSource for EventLoop {
    async fn next_event(&mut self) -> BrokerEvent {
        classify(self.poll().await)
    }
}

/// Map one rumqttc notification to a broker event
pub fn classify(event: Result<Event, ConnectionError>) -> BrokerEvent {
    match event {
        Ok(Event::Incoming(Packet::ConnAck(ack))) if ack.code == ConnectReturnCode::Success => BrokerEvent::Connected,
        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
            BrokerEvent::Disconnected(format!("connection refused: {:?}", ack.code))
        }
        Ok(Event::Incoming(Packet::Publish(publish))) => BrokerEvent::Message {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        },
        Ok(Event::Incoming(Packet::Disconnect)) => BrokerEvent::Disconnected("server requested disconnect".to_string()),
        Ok(Event::Outgoing(Outgoing::Disconnect)) => BrokerEvent::Closed,
        Ok(_) => BrokerEvent::Idle,
        Err(e) => BrokerEvent::Disconnected(e.to_string()),
    }
}

/// A constructed, not yet polled, broker session
pub struct Session {
    pub transport: MqttTransport,
    pub events: EventLoop,
}

pub fn client_id(device: &Device) -> String {
    let short: String = device.identifier().chars().take(4).collect();
    format!("systemPub@{}_{}", device.name, short)
}

/// Build the broker session. Only misconfiguration fails here: the network
/// is not touched until the event loop is polled.
pub fn connect(server: &MqttServer, device: &Device, capacity: usize) -> Result<Session, ConfigError> {
    if server.host.trim().is_empty() {
        return Err(ConfigError::Invalid("mqttserver.host is empty".to_string()));
    }
    if server.port == 0 {
        return Err(ConfigError::Invalid("mqttserver.port must not be 0".to_string()));
    }

    let client_id = client_id(device);
    debug!(%client_id, host = %server.host, port = server.port, "Creating MQTT session");

    let mut options = MqttOptions::new(client_id, server.host.as_str(), server.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(false);
    if !server.user.is_empty() {
        options.set_credentials(server.user.as_str(), server.password.as_str());
    }

    let (client, events) = AsyncClient::new(options, capacity.max(1));
    Ok(Session {
        transport: MqttTransport { client },
        events,
    })
}

/// Producer-side handle to the bounded outbound queue
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutboundMessage>,
    timeout: Duration,
}

impl Outbox {
    /// Enqueue a message, waiting at most the publish timeout for room.
    /// Returns false when the message was dropped.
    pub async fn enqueue(&self, message: OutboundMessage) -> bool {
        match self.tx.send_timeout(message, self.timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(message)) => {
                warn!(topic = %message.topic, "Outbound queue full, dropping message");
                false
            }
            Err(SendTimeoutError::Closed(message)) => {
                warn!(topic = %message.topic, "Outbound queue closed, dropping message");
                false
            }
        }
    }
}

pub fn outbound_queue(capacity: usize, publish_timeout: Duration) -> (Outbox, mpsc::Receiver<OutboundMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Outbox { tx, timeout: publish_timeout }, rx)
}

pub struct ConnectionManager<T> {
    transport: T,
    hub: ConnectivityHub,
    outbound: mpsc::Receiver<OutboundMessage>,
    retry_delay: Duration,
    span: Span,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, hub: ConnectivityHub, outbound: mpsc::Receiver<OutboundMessage>) -> Self {
        Self {
            transport,
            hub,
            outbound,
            retry_delay: DEFAULT_RETRY_DELAY,
            span: Span::none(),
        }
    }

    /// Pause between polls after a connection error
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Serve the session until `cancel` fires
    pub async fn run<E: EventSource>(self, events: E, cancel: CancellationToken) {
        let Self {
            transport,
            hub,
            outbound,
            retry_delay,
            span,
        } = self;

        async move {
            let mut events = events;
            let (connected, ()) = tokio::join!(
                pump_events(&transport, &hub, &mut events, retry_delay, &cancel),
                drain_outbound(&transport, outbound, &cancel),
            );
            if connected {
                close_session(&transport, &mut events).await;
            } else {
                debug!("No live session to close");
            }
            info!("Connection manager stopped");
        }
        .instrument(span)
        .await
    }
}

/// Returns whether the session was up when `cancel` fired
async fn pump_events<T: Transport, E: EventSource>(
    transport: &T,
    hub: &ConnectivityHub,
    events: &mut E,
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> bool {
    let mut connected = false;
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return connected,
            event = events.next_event() => event,
        };

        match &event {
            BrokerEvent::Connected => connected = true,
            BrokerEvent::Disconnected(_) => connected = false,
            _ => {}
        }

        if handle_event(transport, hub, event) {
            tokio::select! {
                _ = cancel.cancelled() => return connected,
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
    }
}

/// Queue a DISCONNECT and keep polling until it is on the wire, so the
/// broker sees a clean session end rather than a dropped socket.
async fn close_session<T: Transport, E: EventSource>(transport: &T, events: &mut E) {
    if let Err(e) = transport.disconnect() {
        debug!(error = %e, "Disconnect request not queued");
        return;
    }

    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            if let BrokerEvent::Closed | BrokerEvent::Disconnected(_) = events.next_event().await {
                break;
            }
        }
    })
    .await;
    match flushed {
        Ok(()) => debug!("Session closed"),
        Err(_) => warn!("DISCONNECT not written in time, dropping the connection"),
    }
}

/// React to one broker event. Returns true when the session is down and
/// the next poll should be delayed.
fn handle_event<T: Transport>(transport: &T, hub: &ConnectivityHub, event: BrokerEvent) -> bool {
    match event {
        BrokerEvent::Connected => {
            info!("Connected to MQTT server");
            match transport.subscribe(PRESENCE_TOPIC, QoS::AtLeastOnce) {
                Ok(()) => info!(topic = PRESENCE_TOPIC, "Subscribed to Home Assistant status"),
                Err(e) => error!(error = %e, "Failed to subscribe to Home Assistant status"),
            }
            let delivered = hub.broadcast(true);
            debug!(delivered, "Announced connection");
            false
        }
        BrokerEvent::Message { topic, payload } if topic == PRESENCE_TOPIC => {
            if payload == ONLINE_PAYLOAD {
                info!("Home Assistant is online");
                hub.broadcast(true);
            } else {
                debug!(status = %String::from_utf8_lossy(&payload), "Home Assistant status");
            }
            false
        }
        BrokerEvent::Message { topic, .. } => {
            trace!(%topic, "Ignoring message");
            false
        }
        BrokerEvent::Disconnected(reason) => {
            error!(%reason, "MQTT connection error");
            hub.broadcast(false);
            true
        }
        BrokerEvent::Closed | BrokerEvent::Idle => false,
    }
}

async fn drain_outbound<T: Transport>(
    transport: &T,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    cancel: &CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => {
                    debug!("Outbound queue closed");
                    break;
                }
            },
        };

        match transport.publish(&message) {
            Ok(()) => trace!(topic = %message.topic, "Published"),
            Err(e) => error!(topic = %message.topic, error = %e, "Failed to publish"),
        }
    }
}
