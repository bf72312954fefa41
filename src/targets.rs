//! Target list building: inventory filter -> client-list file -> test batch.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::DeviceFilter;
use crate::inventory::{self, Device, Inventory};

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("client list file not found: {}", .path.display())]
    ClientListMissing { path: PathBuf },

    #[error("failed to access client list file {}: {source}", .path.display())]
    ClientListIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One device under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Address as listed, possibly with a CIDR suffix.
    pub ip: String,
    pub hostname: String,
    pub device_type_slug: String,
}

impl Target {
    /// Address with any `/prefix` removed.
    pub fn bare_ip(&self) -> &str {
        strip_cidr(&self.ip)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.bare_ip())
    }
}

pub fn strip_cidr(ip: &str) -> &str {
    ip.split('/').next().unwrap_or(ip)
}

/// True when `line` starts with four dot-separated groups of 1-3 digits.
pub fn is_dotted_quad_prefixed(line: &str) -> bool {
    let mut rest = line;
    for octet in 0..4 {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if !(1..=3).contains(&digits) {
            return false;
        }
        rest = &rest[digits..];
        if octet < 3 {
            match rest.strip_prefix('.') {
                Some(r) => rest = r,
                None => return false,
            }
        }
    }
    true
}

/// Query the inventory and overwrite the client-list file with one primary
/// address per device. Returns the raw device records.
///
/// An unreachable inventory yields an empty list rather than an error.
pub async fn rebuild_client_list(
    inventory: &dyn Inventory,
    filter: &DeviceFilter,
    client_list: &Path,
) -> Result<Vec<Device>, TargetError> {
    let devices = match inventory::filtered_devices(inventory, filter).await {
        Ok(devices) => devices,
        Err(e) => {
            error!(error = %e, "cannot fetch devices from inventory, continuing with none");
            Vec::new()
        }
    };
    info!(count = devices.len(), "inventory devices matched filter");

    let mut content = String::new();
    for device in &devices {
        match device.primary_address() {
            Some(addr) => {
                content.push_str(addr);
                content.push('\n');
            }
            None => warn!(
                device = device.name.as_deref().unwrap_or("<unnamed>"),
                "device has no primary address, left out of client list"
            ),
        }
    }

    std::fs::write(client_list, content).map_err(|source| TargetError::ClientListIo {
        path: client_list.to_path_buf(),
        source,
    })?;
    debug!(path = %client_list.display(), "client list written");

    Ok(devices)
}

/// The address token a client-list line starts with, CIDR suffix included.
fn leading_address(line: &str) -> &str {
    let end = line
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '/'))
        .unwrap_or(line.len());
    &line[..end]
}

/// Read the client-list file back, keeping lines that start with an IPv4 address.
pub fn read_client_list(path: &Path) -> Result<Vec<String>, TargetError> {
    let content = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            TargetError::ClientListMissing {
                path: path.to_path_buf(),
            }
        } else {
            TargetError::ClientListIo {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| is_dotted_quad_prefixed(line))
        .map(|line| leading_address(line).to_string())
        .collect())
}

/// Pair each listed address with its inventory record.
pub fn resolve_targets(ips: &[String], devices: &[Device]) -> Vec<Target> {
    ips.iter()
        .map(|ip| {
            let device = devices.iter().find(|d| d.primary_address() == Some(ip.as_str()));
            match device {
                Some(d) => Target {
                    ip: ip.clone(),
                    hostname: d.name.clone().unwrap_or_else(|| strip_cidr(ip).to_string()),
                    device_type_slug: d.type_slug().unwrap_or_default().to_string(),
                },
                None => {
                    warn!(%ip, "listed address not found among inventory devices");
                    Target {
                        ip: ip.clone(),
                        hostname: strip_cidr(ip).to_string(),
                        device_type_slug: String::new(),
                    }
                }
            }
        })
        .collect()
}

/// Rebuild the client list and resolve the batch to test.
pub async fn build(
    inventory: &dyn Inventory,
    filter: &DeviceFilter,
    client_list: &Path,
) -> Result<Vec<Target>, TargetError> {
    let devices = rebuild_client_list(inventory, filter, client_list).await?;
    let ips = read_client_list(client_list)?;
    Ok(resolve_targets(&ips, &devices))
}
