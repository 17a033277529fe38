/*!
Test harness for SystemPub components

Runs a real `ConnectionManager` over `MockTransport` and `ScriptedEvents`,
so producers can be spawned against it and the published traffic inspected.
*/

use crate::mqtt_stub::{scripted_events, EventInjector, MockTransport};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use systempub_agent::connectivity::ConnectivityHub;
use systempub_agent::models::{Device, OutboundMessage, Subject};
use systempub_agent::mqtt::{outbound_queue, ConnectionManager, Outbox};
use systempub_agent::probe::StateProber;
use systempub_agent::producer::Producer;
use systempub_agent::registry::SensorRegistry;
use systempub_agent::scheduler::Schedule;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const QUEUE_CAPACITY: usize = 32;
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);
const RETRY_DELAY: Duration = Duration::from_millis(10);

pub struct TestHarness {
    pub transport: MockTransport,
    pub events: EventInjector,
    pub hub: ConnectivityHub,
    pub outbox: Outbox,
    pub sensors: SensorRegistry,
    pub cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl TestHarness {
    /// Start a connection manager for a device called `device_name`
    pub fn new(device_name: &str) -> Self {
        init_test_logging();

        let transport = MockTransport::new();
        let (events, source) = scripted_events();
        transport.echo_disconnect(events.clone());
        let hub = ConnectivityHub::new();
        let (outbox, outbound) = outbound_queue(QUEUE_CAPACITY, PUBLISH_TIMEOUT);
        let cancel = CancellationToken::new();

        let mut tasks = JoinSet::new();
        let manager = ConnectionManager::new(transport.clone(), hub.clone(), outbound).with_retry_delay(RETRY_DELAY);
        tasks.spawn(manager.run(source, cancel.clone()));

        Self {
            transport,
            events,
            hub,
            outbox,
            sensors: SensorRegistry::new(Arc::new(Self::device(device_name))),
            cancel,
            tasks,
        }
    }

    pub fn device(name: &str) -> Device {
        Device {
            name: name.to_string(),
            model: "Test Rig".to_string(),
            manufacturer: "SystemPub".to_string(),
            sw_version: "1.0".to_string(),
            identifiers: ["0123456789abcdef".to_string()],
        }
    }

    /// Producer wired to this harness' outbound queue
    pub fn producer<P: StateProber>(&self, subjects: Vec<Subject>, prober: P, schedule: Schedule) -> Producer<P> {
        Producer::new(subjects, self.sensors.clone(), prober, self.outbox.clone(), schedule)
    }

    /// Register `producer` as a connectivity listener and run it
    pub fn spawn_producer<P: StateProber + 'static>(&mut self, name: &str, producer: Producer<P>) {
        let connectivity = self.hub.register(name);
        self.tasks.spawn(producer.run(connectivity, self.cancel.clone()));
    }

    /// Wait until at least `count` messages were published
    pub async fn wait_for_messages(&self, count: usize, timeout_ms: u64) -> Result<Vec<OutboundMessage>> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let messages = self.transport.get_published_messages();
            if messages.len() >= count {
                return Ok(messages);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!(
                    "expected {} published messages within {}ms, got {}",
                    count,
                    timeout_ms,
                    messages.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until a message with `payload` was published on `topic`
    pub async fn wait_for_payload(&self, topic: &str, payload: &str, timeout_ms: u64) -> Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let found = self
                .transport
                .find_messages_by_topic(topic)
                .iter()
                .any(|msg| msg.payload == payload.as_bytes());
            if found {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("no '{}' on {} within {}ms", payload, topic, timeout_ms);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until the manager has subscribed to at least one topic
    pub async fn wait_for_subscriptions(&self) {
        while self.transport.get_subscriptions().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Cancel every task and wait for all of them to finish
    pub async fn shutdown(mut self, timeout_ms: u64) -> Result<()> {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            while let Some(result) = self.tasks.join_next().await {
                result?;
            }
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|_| anyhow::anyhow!("tasks still running {}ms after cancellation", timeout_ms))?
    }
}

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use systempub_agent::mqtt::PRESENCE_TOPIC;

    #[tokio::test]
    async fn test_harness_subscribes_on_connect() {
        let harness = TestHarness::new("rig");
        harness.events.connect();

        tokio::time::timeout(Duration::from_secs(1), harness.wait_for_subscriptions())
            .await
            .expect("no subscription");
        assert_eq!(harness.transport.get_subscriptions(), vec![PRESENCE_TOPIC.to_string()]);

        harness.shutdown(1000).await.unwrap();
    }
}
