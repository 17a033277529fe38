//! Data model shared by every SystemPub component
//!
//! - Device identity announced with every discovery record
//! - Monitored subjects (one boolean health fact each)
//! - Discovery records and outbound broker messages

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device information for Home Assistant autodiscovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub sw_version: String,
    pub identifiers: [String; 1],
}

impl Device {
    /// Stable unique identifier of the host (machine id)
    pub fn identifier(&self) -> &str {
        &self.identifiers[0]
    }
}

/// One monitored boolean health fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    PoolHealth,
    PoolSnapshots,
    PoolCapacity,
    FailedUnits,
}

impl Subject {
    /// Subjects checked through sanoid
    pub const POOLS: [Subject; 3] = [Subject::PoolHealth, Subject::PoolSnapshots, Subject::PoolCapacity];

    /// Suffix of the sensor unique id
    pub fn slug(self) -> &'static str {
        match self {
            Subject::PoolHealth => "pool_health",
            Subject::PoolSnapshots => "pool_snapshots",
            Subject::PoolCapacity => "pool_capacity",
            Subject::FailedUnits => "units",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Subject::PoolHealth => "Pool health",
            Subject::PoolSnapshots => "Pool snapshots",
            Subject::PoolCapacity => "Pool capacity",
            Subject::FailedUnits => "Systemd units",
        }
    }

    /// Name of the matching `sanoid --monitor-*` check, if any
    pub fn sanoid_monitor(self) -> Option<&'static str> {
        match self {
            Subject::PoolHealth => Some("health"),
            Subject::PoolSnapshots => Some("snapshots"),
            Subject::PoolCapacity => Some("capacity"),
            Subject::FailedUnits => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Binary sensor configuration for Home Assistant autodiscovery.
/// Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub name: String,
    pub device_class: String,
    pub state_topic: String,
    pub unique_id: String,
    pub value_template: String,
    pub device: Device,
    /// Seconds
    pub expire_after: u64,
    pub force_update: bool,
}

/// A message handed to the connection manager for publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Sensor payload for the problem device class. Note the inverted logic:
/// a healthy subject reports "OFF" (no problem).
pub fn problem_payload(ok: bool) -> &'static [u8] {
    if ok {
        b"OFF"
    } else {
        b"ON"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_payload_is_inverted() {
        assert_eq!(problem_payload(true), b"OFF");
        assert_eq!(problem_payload(false), b"ON");
    }

    #[test]
    fn test_only_pool_subjects_have_sanoid_monitor() {
        for subject in Subject::POOLS {
            assert!(subject.sanoid_monitor().is_some());
        }
        assert_eq!(Subject::FailedUnits.sanoid_monitor(), None);
    }

    #[test]
    fn test_device_serialization_field_names() {
        let device = Device {
            name: "nas".into(),
            model: "X11".into(),
            manufacturer: "Supermicro".into(),
            sw_version: "Debian GNU/Linux 12".into(),
            identifiers: ["abcdef".into()],
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["sw_version"], "Debian GNU/Linux 12");
        assert_eq!(json["identifiers"], serde_json::json!(["abcdef"]));
        assert_eq!(device.identifier(), "abcdef");
    }
}
