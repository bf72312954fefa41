//! In-memory collaborators shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::inventory::{Device, DeviceTypeRef, Inventory, InventoryError, IpRef, SiteRef};
use crate::probe::Liveness;

pub fn device(id: u64, name: &str, address: &str, slug: &str, site_id: u64) -> Device {
    Device {
        id,
        name: Some(name.to_string()),
        primary_ip: None,
        primary_ip4: Some(IpRef {
            address: address.to_string(),
        }),
        device_type: Some(DeviceTypeRef {
            slug: slug.to_string(),
        }),
        site: Some(SiteRef { id: site_id }),
    }
}

/// Inventory answering `name` and `primary_ip4` lookups from a fixed list.
pub struct FakeInventory {
    pub devices: Vec<Device>,
    pub site_speeds: HashMap<u64, u64>,
    pub circuit_speeds: HashMap<u64, u64>,
    pub unavailable: bool,
}

impl FakeInventory {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices,
            site_speeds: HashMap::new(),
            circuit_speeds: HashMap::new(),
            unavailable: false,
        }
    }

    pub fn with_site_speed(mut self, site_id: u64, speed: u64) -> Self {
        self.site_speeds.insert(site_id, speed);
        self
    }

    pub fn with_circuit_speed(mut self, site_id: u64, speed: u64) -> Self {
        self.circuit_speeds.insert(site_id, speed);
        self
    }

    fn check(&self) -> Result<(), InventoryError> {
        if self.unavailable {
            return Err(InventoryError::Status {
                url: "fake://inventory".to_string(),
                status: 503,
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Inventory for FakeInventory {
    async fn devices(&self, params: &[(String, String)]) -> Result<Vec<Device>, InventoryError> {
        self.check()?;
        Ok(self
            .devices
            .iter()
            .filter(|d| {
                params.iter().all(|(k, v)| match k.as_str() {
                    "name" => d.name.as_deref() == Some(v.as_str()),
                    "primary_ip4" => d.primary_address() == Some(v.as_str()),
                    _ => true,
                })
            })
            .cloned()
            .collect())
    }

    async fn site_speed(&self, site_id: u64) -> Result<Option<u64>, InventoryError> {
        self.check()?;
        Ok(self.site_speeds.get(&site_id).copied())
    }

    async fn circuit_speed(&self, site_id: u64) -> Result<Option<u64>, InventoryError> {
        self.check()?;
        Ok(self.circuit_speeds.get(&site_id).copied())
    }
}

/// Liveness probe that records every address it was asked about.
#[derive(Default)]
pub struct RecordingProbe {
    pub online: bool,
    pub probed: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl Liveness for RecordingProbe {
    async fn is_online(&self, ip: &str) -> bool {
        self.probed.lock().unwrap().push(ip.to_string());
        self.online
    }
}
