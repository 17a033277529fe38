/*!
MQTT stubs for running the connection manager without a broker

`MockTransport` records everything the manager publishes or subscribes to.
`ScriptedEvents` replays broker events pushed through an `EventInjector`.
*/

use async_trait::async_trait;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use systempub_agent::models::OutboundMessage;
use systempub_agent::mqtt::{BrokerEvent, EventSource, Transport, TransportError, ONLINE_PAYLOAD, PRESENCE_TOPIC};
use tokio::sync::mpsc;

/// Transport that keeps every request in memory
#[derive(Clone, Default)]
pub struct MockTransport {
    published_messages: Arc<Mutex<Vec<OutboundMessage>>>,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    failing_publishes: Arc<AtomicUsize>,
    disconnected: Arc<AtomicBool>,
    close_echo: Arc<Mutex<Option<EventInjector>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer a disconnect request with `BrokerEvent::Closed` on `events`,
    /// the way a live event loop reports its DISCONNECT as written
    pub fn echo_disconnect(&self, events: EventInjector) {
        *self.close_echo.lock().unwrap() = Some(events);
    }

    /// Reject the next `count` publish requests
    pub fn fail_next_publishes(&self, count: usize) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    pub fn get_published_messages(&self) -> Vec<OutboundMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<OutboundMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Payload of the latest message on `topic`, as text
    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.find_messages_by_topic(topic)
            .last()
            .map(|msg| String::from_utf8_lossy(&msg.payload).to_string())
    }

    /// Latest message on `topic`, parsed as JSON
    pub fn get_last_json_message(&self, topic: &str) -> anyhow::Result<Option<Value>> {
        match self.find_messages_by_topic(topic).last() {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn subscription_qos(&self, topic: &str) -> Option<QoS> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, qos)| *qos)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

impl Transport for MockTransport {
    fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let rejected = self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(TransportError::Rejected("scripted failure".to_string()));
        }

        tracing::debug!(topic = %message.topic, bytes = message.payload.len(), "[MOCK] Published");
        self.published_messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        tracing::debug!(topic, "[MOCK] Subscribed");
        self.subscriptions.lock().unwrap().push((topic.to_string(), qos));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnected.store(true, Ordering::SeqCst);
        if let Some(events) = self.close_echo.lock().unwrap().as_ref() {
            events.send(BrokerEvent::Closed);
        }
        Ok(())
    }
}

/// Event source fed by an `EventInjector`. Once every injector is gone it
/// stays silent instead of ending, like an idle broker session.
pub struct ScriptedEvents {
    receiver: mpsc::UnboundedReceiver<BrokerEvent>,
}

#[async_trait]
impl EventSource for ScriptedEvents {
    async fn next_event(&mut self) -> BrokerEvent {
        match self.receiver.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

#[derive(Clone)]
pub struct EventInjector {
    sender: mpsc::UnboundedSender<BrokerEvent>,
}

impl EventInjector {
    pub fn send(&self, event: BrokerEvent) {
        // the receiving manager may already have stopped
        let _ = self.sender.send(event);
    }

    pub fn connect(&self) {
        self.send(BrokerEvent::Connected);
    }

    pub fn disconnect(&self, reason: &str) {
        self.send(BrokerEvent::Disconnected(reason.to_string()));
    }

    /// Home Assistant announcing its own status
    pub fn presence(&self, payload: &[u8]) {
        self.send(BrokerEvent::Message {
            topic: PRESENCE_TOPIC.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn home_assistant_online(&self) {
        self.presence(ONLINE_PAYLOAD);
    }
}

pub fn scripted_events() -> (EventInjector, ScriptedEvents) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventInjector { sender }, ScriptedEvents { receiver })
}
