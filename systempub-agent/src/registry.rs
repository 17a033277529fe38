//! Sensor registry: maps (device, subject, polling interval) to discovery metadata
//!
//! Pure functions of their inputs. Discovery may be republished many times
//! over the agent's lifetime, so identical inputs must give identical bytes.

use crate::models::{problem_payload, Device, DiscoveryRecord, OutboundMessage, Subject};
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;

/// Home Assistant discovery prefix for binary sensors
pub const DISCOVERY_PREFIX: &str = "homeassistant/binary_sensor";

#[derive(Debug, Clone)]
pub struct SensorRegistry {
    device: Arc<Device>,
}

impl SensorRegistry {
    pub fn new(device: Arc<Device>) -> Self {
        Self { device }
    }

    pub fn unique_id(&self, subject: Subject) -> String {
        format!("{}_{}", self.device.name, subject.slug())
    }

    pub fn state_topic(&self, subject: Subject) -> String {
        format!("{}/{}/state", DISCOVERY_PREFIX, self.unique_id(subject))
    }

    pub fn config_topic(&self, subject: Subject) -> String {
        format!("{}/{}/config", DISCOVERY_PREFIX, self.unique_id(subject))
    }

    /// Discovery record for a subject polled every `interval`.
    /// The sensor expires after two missed polls.
    pub fn record(&self, subject: Subject, interval: Duration) -> DiscoveryRecord {
        DiscoveryRecord {
            name: subject.display_name().to_string(),
            device_class: "problem".to_string(),
            state_topic: self.state_topic(subject),
            unique_id: self.unique_id(subject),
            value_template: "{{ value }}".to_string(),
            device: (*self.device).clone(),
            expire_after: interval.saturating_mul(2).as_secs(),
            force_update: true,
        }
    }

    /// Retained discovery message on the subject's config topic
    pub fn discovery_message(&self, subject: Subject, interval: Duration) -> Result<OutboundMessage, serde_json::Error> {
        let payload = serde_json::to_vec(&self.record(subject, interval))?;
        Ok(OutboundMessage {
            topic: self.config_topic(subject),
            payload,
            qos: QoS::AtLeastOnce,
            retain: true,
        })
    }

    pub fn state_message(&self, subject: Subject, ok: bool) -> OutboundMessage {
        OutboundMessage {
            topic: self.state_topic(subject),
            payload: problem_payload(ok).to_vec(),
            qos: QoS::AtLeastOnce,
            retain: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SensorRegistry {
        SensorRegistry::new(Arc::new(Device {
            name: "host-ABCD".into(),
            model: "Model".into(),
            manufacturer: "Vendor".into(),
            sw_version: "Linux".into(),
            identifiers: ["0123456789".into()],
        }))
    }

    #[test]
    fn test_topics() {
        let reg = registry();
        assert_eq!(reg.unique_id(Subject::PoolHealth), "host-ABCD_pool_health");
        assert_eq!(
            reg.config_topic(Subject::PoolHealth),
            "homeassistant/binary_sensor/host-ABCD_pool_health/config"
        );
        assert_eq!(
            reg.state_topic(Subject::FailedUnits),
            "homeassistant/binary_sensor/host-ABCD_units/state"
        );
    }

    #[test]
    fn test_record_expires_after_two_intervals() {
        let record = registry().record(Subject::PoolCapacity, Duration::from_secs(20 * 60));
        assert_eq!(record.expire_after, 2400);
        assert_eq!(record.device_class, "problem");
        assert!(record.force_update);
        assert_eq!(record.name, "Pool capacity");
    }

    #[test]
    fn test_discovery_payload_fields() {
        let msg = registry()
            .discovery_message(Subject::PoolHealth, Duration::from_secs(60))
            .unwrap();
        assert!(msg.retain);
        assert_eq!(msg.qos, QoS::AtLeastOnce);

        let json: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        for key in [
            "name",
            "device_class",
            "state_topic",
            "unique_id",
            "value_template",
            "device",
            "expire_after",
            "force_update",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(json["expire_after"], 120);
        assert_eq!(json["device"]["identifiers"][0], "0123456789");
    }

    #[test]
    fn test_discovery_is_deterministic() {
        let reg = registry();
        let interval = Duration::from_secs(600);
        let first = reg.discovery_message(Subject::FailedUnits, interval).unwrap();
        let second = reg.discovery_message(Subject::FailedUnits, interval).unwrap();
        assert_eq!(first.payload, second.payload);
        assert_eq!(first, second);
    }

    #[test]
    fn test_state_message() {
        let reg = registry();
        let ok = reg.state_message(Subject::PoolSnapshots, true);
        assert_eq!(ok.payload, b"OFF");
        assert!(!ok.retain);
        assert_eq!(reg.state_message(Subject::PoolSnapshots, false).payload, b"ON");
    }
}
