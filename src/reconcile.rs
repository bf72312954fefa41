//! Result reconciliation: contractual speed from inventory plus measured
//! throughput from the per-device measurement files, one record per host.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::config::SpeedSource;
use crate::convert::{CircuitSpeed, SpeedUnit};
use crate::inventory::{self, Inventory};
use crate::measurement::{self, Throughput};
use crate::probe::Liveness;
use crate::targets::Target;
use crate::workspace;

/// A measured rate, or the `"0"` sentinel for "no usable measurement".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measured {
    Bps(u64),
    Failed,
}

impl Serialize for Measured {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Measured::Bps(bps) => serializer.serialize_u64(*bps),
            Measured::Failed => serializer.serialize_str("0"),
        }
    }
}

/// Reconciled result for one device. Every value is in bits per second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalRecord {
    pub upload_contractual: u64,
    pub download_contractual: u64,
    /// Unset when the device produced a report without results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<Measured>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<Measured>,
}

/// Hostname -> record. Ordered so reports diff cleanly between runs.
pub type Report = BTreeMap<String, FinalRecord>;

pub struct Reconciler<'a> {
    inventory: &'a dyn Inventory,
    probe: &'a dyn Liveness,
    unit: SpeedUnit,
    source: SpeedSource,
    files_dir: PathBuf,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        inventory: &'a dyn Inventory,
        probe: &'a dyn Liveness,
        unit: SpeedUnit,
        source: SpeedSource,
        files_dir: PathBuf,
    ) -> Self {
        Self {
            inventory,
            probe,
            unit,
            source,
            files_dir,
        }
    }

    /// One record per target; a later target with the same hostname
    /// replaces the earlier record.
    pub async fn reconcile(&self, targets: &[Target]) -> Report {
        let mut report = Report::new();
        for target in targets {
            let (hostname, record) = self.reconcile_target(target).await;
            if report.insert(hostname.clone(), record).is_some() {
                warn!(%hostname, "hostname reported twice, keeping the later record");
            }
        }
        info!(devices = report.len(), "results reconciled");
        report
    }

    pub async fn reconcile_target(&self, target: &Target) -> (String, FinalRecord) {
        let hostname = self.hostname_for(target).await;
        let speed = self.site_speed(&hostname).await;

        // Contracts are assumed symmetric: both directions come from the
        // same site speed.
        let upload_contractual = CircuitSpeed::new(speed, self.unit).bps();
        let download_contractual = CircuitSpeed::new(speed, self.unit).bps();

        let (upload, download) = self.measured(target, &hostname).await;

        (
            hostname,
            FinalRecord {
                upload_contractual,
                download_contractual,
                upload,
                download,
            },
        )
    }

    /// Inventory name of the device owning the target's primary address.
    async fn hostname_for(&self, target: &Target) -> String {
        match inventory::device_by_primary_ip(self.inventory, &target.ip).await {
            Ok(Some(device)) => device.name.unwrap_or_else(|| target.hostname.clone()),
            Ok(None) => {
                warn!(ip = %target.ip, "no inventory device owns this address");
                target.hostname.clone()
            }
            Err(e) => {
                warn!(ip = %target.ip, error = %e, "hostname lookup failed");
                target.hostname.clone()
            }
        }
    }

    /// Contracted speed in the inventory's unit, 0 when unknown.
    async fn site_speed(&self, hostname: &str) -> u64 {
        let device = match inventory::device_by_name(self.inventory, hostname).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                warn!(%hostname, "device not found; does the device exist in inventory?");
                return 0;
            }
            Err(e) => {
                warn!(%hostname, error = %e, "device lookup failed");
                return 0;
            }
        };

        let Some(site_id) = device.site_id() else {
            warn!(%hostname, "device has no site; does the device exist in inventory?");
            return 0;
        };

        let speed = match self.source {
            SpeedSource::Site => self.inventory.site_speed(site_id).await,
            SpeedSource::Circuit => self.inventory.circuit_speed(site_id).await,
        };
        match speed {
            Ok(Some(speed)) => {
                debug!(%hostname, site_id, speed, "contractual speed");
                speed
            }
            Ok(None) => 0,
            Err(e) => {
                warn!(%hostname, site_id, error = %e, "circuit speed lookup failed");
                0
            }
        }
    }

    async fn measured(&self, target: &Target, hostname: &str) -> (Option<Measured>, Option<Measured>) {
        let ip = target.bare_ip();
        let path = workspace::measurement_path(&self.files_dir, ip);

        match measurement::read_measurement(&path) {
            Ok(Throughput {
                upload_bps,
                download_bps,
            }) => (Some(Measured::Bps(upload_bps)), Some(Measured::Bps(download_bps))),
            Err(e) if e.is_soft() => {
                warn!(%hostname, %ip, error = %e, "check your firewall settings and IP addresses");
                (None, None)
            }
            Err(e) => {
                warn!(
                    %hostname,
                    %ip,
                    error = %e,
                    "measurement output loading problem, checking device online status"
                );
                if !self.probe.is_online(ip).await {
                    warn!("{} ({}) is offline", hostname, ip);
                }
                (Some(Measured::Failed), Some(Measured::Failed))
            }
        }
    }
}
