use serde::Deserialize;

use crate::error::SyncError;

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const REMOTE_VERSION_FILE: &str = "/version.json";
pub const REMOTE_FIRMWARE_FILE: &str = "/firmware.bin";

/// Remote update server: publishes the latest version and streams the image.
pub trait FirmwareSource {
    fn fetch_remote_version(&mut self) -> Result<String, SyncError>;
    /// Downloads and flashes the latest image, returning the number of bytes written.
    fn install_latest(&mut self) -> Result<u64, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionManifest {
    pub version: String,
}

pub fn parse_manifest(body: &[u8]) -> Result<VersionManifest, SyncError> {
    serde_json::from_slice(body).map_err(|err| SyncError::MalformedManifest(err.to_string()))
}

pub fn version_url(server: &str) -> String {
    format!("http://{server}{REMOTE_VERSION_FILE}")
}

pub fn firmware_url(server: &str) -> String {
    format!("http://{server}{REMOTE_FIRMWARE_FILE}")
}

fn components(version: &str) -> Option<[i64; 3]> {
    let mut parts = version.trim().split('.');
    let mut parsed = [0i64; 3];
    for slot in &mut parsed {
        *slot = parts.next()?.trim().parse().ok()?;
    }
    parts.next().is_none().then_some(parsed)
}

/// Compares component by component and answers yes on the first remote part that is
/// larger, even when an earlier part is smaller. Devices in the field rely on this.
pub fn need_firmware_update(device: &str, remote: &str) -> bool {
    if remote.is_empty() {
        return false;
    }
    let (Some(device), Some(remote)) = (components(device), components(remote)) else {
        return false;
    };
    device.iter().zip(remote.iter()).any(|(have, offered)| offered > have)
}

/// Accepts a flashed image only when every declared byte arrived.
pub fn check_complete(written: u64, declared: Option<u64>) -> Result<u64, SyncError> {
    match declared {
        None | Some(0) => Err(SyncError::MissingLength),
        Some(expected) if expected != written => Err(SyncError::SizeMismatch { written, expected }),
        Some(_) => Ok(written),
    }
}
