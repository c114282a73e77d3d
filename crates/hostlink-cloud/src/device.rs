//! Stable device identity
//!
//! The identifier lets the ingestion service recognize a re-registration of
//! the same host. It is a hex SHA-256 over attributes that survive restarts.

use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use sysinfo::System;
use tracing::debug;

static DEVICE_ID: OnceLock<String> = OnceLock::new();

/// Device identifier of this machine, computed once per process
pub fn device_identifier() -> &'static str {
    DEVICE_ID.get_or_init(|| {
        let attributes = DeviceAttributes::collect();
        debug!(
            platform_id = attributes.platform_id.is_some(),
            "Computed device identifier"
        );
        attributes.identifier()
    })
}

/// Attributes hashed into the device identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAttributes {
    pub machine_name: String,
    pub os: String,
    pub os_version: String,
    pub arch: String,
    pub platform_id: Option<String>,
}

impl DeviceAttributes {
    pub fn collect() -> Self {
        Self {
            machine_name: hostlink_core::record::machine_name().to_string(),
            os: std::env::consts::OS.to_string(),
            os_version: System::os_version().unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
            platform_id: platform_identifier(),
        }
    }

    pub fn identifier(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.machine_name.as_str(),
            self.os.as_str(),
            self.os_version.as_str(),
            self.arch.as_str(),
            self.platform_id.as_deref().unwrap_or_default(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(target_os = "linux")]
fn platform_identifier() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|id| id.trim().to_string())
        .find(|id| !id.is_empty())
}

#[cfg(target_os = "macos")]
fn platform_identifier() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('"').nth(3))
        .map(str::to_string)
}

#[cfg(windows)]
fn platform_identifier() -> Option<String> {
    let output = std::process::Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|line| line.contains("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn platform_identifier() -> Option<String> {
    None
}
