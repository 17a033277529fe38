//! SystemPub - host health reporting for Home Assistant
//!
//! Publishes the state of ZFS pools (through sanoid) and of failed systemd
//! units as MQTT binary sensors, with Home Assistant autodiscovery:
//! - One resilient broker session shared by every producer
//! - Discovery and state republished whenever the broker or Home Assistant comes back
//! - Faster polling of failed units while the host is unhealthy

pub mod config;
pub mod connectivity;
pub mod execution;
pub mod identity;
pub mod models;
pub mod mqtt;
pub mod probe;
pub mod producer;
pub mod registry;
pub mod scheduler;
pub mod watchdog;
