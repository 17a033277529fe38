//! Host identification for discovery records
//!
//! This module handles:
//! - Querying `hostnamectl --json=short` once at startup
//! - Mapping its output to the device announced with every sensor
//! - Falling back to the kernel hostname when systemd reports none

use crate::execution::{run_command, ExecutionError};
use crate::models::Device;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("hostnamectl exited with code {0:?}")]
    Failed(Option<i32>),
    #[error("malformed hostnamectl output: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("hostnamectl reported no machine id")]
    MissingMachineId,
}

/// Subset of `hostnamectl --json=short` output
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Hostnamectl {
    hostname: Option<String>,
    operating_system_pretty_name: Option<String>,
    #[serde(rename = "MachineID")]
    machine_id: Option<String>,
    hardware_vendor: Option<String>,
    hardware_model: Option<String>,
}

/// Discover the device identity through systemd
pub async fn hostnamectl() -> Result<Device, IdentityError> {
    info!("Querying host identity...");
    let output = run_command("hostnamectl", &["--json=short"], Duration::from_secs(10)).await?;
    if !output.success() {
        return Err(IdentityError::Failed(output.exit_code));
    }
    let device = parse_hostnamectl(output.stdout.as_bytes())?;
    info!(name = %device.name, model = %device.model, "Host identity discovered");
    Ok(device)
}

/// Build a device from raw `hostnamectl --json=short` output
pub fn parse_hostnamectl(json: &[u8]) -> Result<Device, IdentityError> {
    let status: Hostnamectl = serde_json::from_slice(json)?;

    let machine_id = status
        .machine_id
        .filter(|id| !id.is_empty())
        .ok_or(IdentityError::MissingMachineId)?;

    let name = match status.hostname.filter(|h| !h.is_empty()) {
        Some(hostname) => hostname,
        None => {
            let fallback = gethostname::gethostname().to_string_lossy().to_string();
            debug!(hostname = %fallback, "hostnamectl reported no hostname, using kernel hostname");
            fallback
        }
    };

    Ok(Device {
        name,
        model: status.hardware_model.unwrap_or_default(),
        manufacturer: status.hardware_vendor.unwrap_or_default(),
        sw_version: status.operating_system_pretty_name.unwrap_or_default(),
        identifiers: [machine_id],
    })
}
