//! Inventory service access: device records and contracted circuit speeds.

pub mod netbox;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::DeviceFilter;

pub use netbox::NetboxClient;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("inventory returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("failed to decode inventory response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("inventory unreachable after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<InventoryError>,
    },
}

impl InventoryError {
    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            InventoryError::Transport { .. } => true,
            InventoryError::Status { status, .. } => *status >= 500 || *status == 429,
            InventoryError::Decode { .. } | InventoryError::Exhausted { .. } => false,
        }
    }
}

/// Device record (subset of the inventory's DCIM device object).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Device {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub primary_ip: Option<IpRef>,
    #[serde(default)]
    pub primary_ip4: Option<IpRef>,
    #[serde(default)]
    pub device_type: Option<DeviceTypeRef>,
    #[serde(default)]
    pub site: Option<SiteRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpRef {
    /// Address with prefix length, e.g. `10.1.2.3/32`.
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceTypeRef {
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteRef {
    pub id: u64,
}

impl Device {
    /// Primary IPv4 address as recorded, CIDR suffix included.
    pub fn primary_address(&self) -> Option<&str> {
        self.primary_ip4
            .as_ref()
            .or(self.primary_ip.as_ref())
            .map(|ip| ip.address.as_str())
    }

    pub fn type_slug(&self) -> Option<&str> {
        self.device_type.as_ref().map(|t| t.slug.as_str())
    }

    pub fn site_id(&self) -> Option<u64> {
        self.site.as_ref().map(|s| s.id)
    }
}

/// Read-side view of the inventory used by the builder and the reconciler.
#[async_trait::async_trait]
pub trait Inventory: Send + Sync {
    /// Devices matching the given query parameters.
    async fn devices(&self, params: &[(String, String)]) -> Result<Vec<Device>, InventoryError>;

    /// `cf_speed` custom field of a site. `Ok(None)` when unset or not an integer.
    async fn site_speed(&self, site_id: u64) -> Result<Option<u64>, InventoryError>;

    /// `cf_speed` of the circuit whose `cf_site` custom field is `site_id`.
    async fn circuit_speed(&self, site_id: u64) -> Result<Option<u64>, InventoryError>;
}

pub async fn filtered_devices(
    inventory: &dyn Inventory,
    filter: &DeviceFilter,
) -> Result<Vec<Device>, InventoryError> {
    inventory.devices(&filter.query_params()).await
}

pub async fn device_by_name(
    inventory: &dyn Inventory,
    hostname: &str,
) -> Result<Option<Device>, InventoryError> {
    let params = [("name".to_string(), hostname.to_string())];
    Ok(inventory.devices(&params).await?.into_iter().next())
}

/// Look a device up by primary IPv4, as written in the client list.
pub async fn device_by_primary_ip(
    inventory: &dyn Inventory,
    address: &str,
) -> Result<Option<Device>, InventoryError> {
    let params = [("primary_ip4".to_string(), address.to_string())];
    Ok(inventory.devices(&params).await?.into_iter().next())
}

/// Interpret a `cf_speed` custom field value.
///
/// The inventory UI lets operators store the speed as a number or as text.
pub fn parse_speed_field(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
