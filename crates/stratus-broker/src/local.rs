use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use stratus_domain::{
    Address, AddressScope, HardwareCharacteristics, InstanceId, InstanceStatus,
    NetworkInterfaceInfo, ZoneName,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::broker::{
    InstanceBroker, InstanceHandle, MaintainInstanceParams, StartInstanceParams,
    StartInstanceResult, ZoneAllocation, ZonedBroker,
};
use crate::error::BrokerError;

#[derive(Debug, Default)]
struct Inner {
    instances: HashMap<InstanceId, InstanceHandle>,
    failing_zones: HashSet<ZoneName>,
    next: u64,
}

/// A broker that simulates a provider in memory.
///
/// - Allocates synthetic `local-<n>` instance ids with stub hardware.
/// - Optionally exposes availability zones; without zones the capability
///   probe reports unsupported and placement passes through untouched.
/// - Start failures can be scripted per zone to exercise retry paths.
/// - Performs no actual I/O.
#[derive(Debug, Default)]
pub struct LocalBroker {
    zones: Vec<ZoneName>,
    inner: RwLock<Inner>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zones(zones: Vec<ZoneName>) -> Self {
        Self { zones, inner: RwLock::new(Inner::default()) }
    }

    /// Script every start targeting `zone` to fail until cleared.
    pub async fn fail_in_zone(&self, zone: ZoneName) {
        self.inner.write().await.failing_zones.insert(zone);
    }

    pub async fn clear_zone_failures(&self) {
        self.inner.write().await.failing_zones.clear();
    }

    pub async fn running_instances(&self) -> Vec<InstanceHandle> {
        let mut handles: Vec<InstanceHandle> =
            self.inner.read().await.instances.values().cloned().collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        handles
    }

    /// Pre-seed a running instance, as if started by an earlier process.
    pub async fn seed_instance(&self, handle: InstanceHandle) {
        self.inner.write().await.instances.insert(handle.id.clone(), handle);
    }

    fn placement_zone(placement: Option<&str>) -> Option<ZoneName> {
        placement
            .and_then(|p| p.strip_prefix("zone="))
            .filter(|z| !z.is_empty())
            .map(ZoneName::new)
    }

    fn least_populated_zone(&self, inner: &Inner) -> Option<ZoneName> {
        self.zones
            .iter()
            .map(|z| {
                let population = inner
                    .instances
                    .values()
                    .filter(|h| h.zone.as_ref() == Some(z))
                    .count();
                (population, z.clone())
            })
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, z)| z)
    }
}

#[async_trait]
impl InstanceBroker for LocalBroker {
    async fn all_instances(&self) -> Result<Vec<InstanceHandle>, BrokerError> {
        Ok(self.running_instances().await)
    }

    async fn start_instance(
        &self,
        params: StartInstanceParams,
    ) -> Result<StartInstanceResult, BrokerError> {
        if let Some(reporter) = &params.status_reporter {
            reporter.report(InstanceStatus::Provisioning, "allocating instance").await;
        }

        let mut inner = self.inner.write().await;
        let zone = match Self::placement_zone(params.placement.as_deref()) {
            Some(zone) => {
                if !self.zones.is_empty() && !self.zones.contains(&zone) {
                    return Err(BrokerError::StartFailed {
                        message: format!("unknown availability zone {}", zone),
                        retryable: false,
                        zone_independent: false,
                    });
                }
                Some(zone)
            }
            None => self.least_populated_zone(&inner),
        };
        if let Some(zone) = &zone {
            if inner.failing_zones.contains(zone) {
                return Err(BrokerError::StartFailed {
                    message: format!("zone {} has no capacity", zone),
                    retryable: true,
                    zone_independent: false,
                });
            }
        }

        let n = inner.next;
        inner.next += 1;
        let id = InstanceId::new(format!("local-{}", n));
        let hardware = HardwareCharacteristics {
            arch: params.constraints.arch.clone().or_else(|| Some("amd64".into())),
            cpu_cores: params.constraints.cpu_cores.or(Some(1)),
            mem_mb: params.constraints.mem_mb.or(Some(2048)),
            root_disk_mb: params.constraints.root_disk_mb.or(Some(8192)),
            availability_zone: zone.clone(),
        };
        let address = Address {
            value: format!("10.0.0.{}", 10 + (n % 240)),
            scope: AddressScope::Local,
        };
        let handle = InstanceHandle {
            id: id.clone(),
            hardware: Some(hardware.clone()),
            addresses: vec![address.clone()],
            zone,
        };
        inner.instances.insert(id.clone(), handle.clone());

        debug!(
            machine_id = %params.machine_id,
            instance_id = %id,
            zone = ?handle.zone,
            "LocalBroker: started instance"
        );

        Ok(StartInstanceResult {
            instance: handle,
            hardware: Some(hardware),
            network_info: vec![NetworkInterfaceInfo {
                interface_name: "eth0".into(),
                mac_address: None,
                addresses: vec![address],
            }],
            volumes: vec![],
            volume_attachments: vec![],
        })
    }

    async fn stop_instances(&self, ids: &[InstanceId]) -> Result<(), BrokerError> {
        let mut inner = self.inner.write().await;
        for id in ids {
            // Absent ids are fine; stop is idempotent here.
            inner.instances.remove(id);
        }
        debug!(count = ids.len(), "LocalBroker: stopped instances");
        Ok(())
    }

    async fn maintain_instance(&self, params: MaintainInstanceParams) -> Result<(), BrokerError> {
        debug!(
            machine_id = %params.machine_id,
            instance_id = %params.instance_id,
            "LocalBroker: maintain instance"
        );
        Ok(())
    }

    fn zoned(&self) -> Option<&dyn ZonedBroker> {
        if self.zones.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

#[async_trait]
impl ZonedBroker for LocalBroker {
    async fn availability_zone_allocations(&self) -> Result<Vec<ZoneAllocation>, BrokerError> {
        let inner = self.inner.read().await;
        Ok(self
            .zones
            .iter()
            .map(|zone| {
                let mut instances: Vec<InstanceId> = inner
                    .instances
                    .values()
                    .filter(|h| h.zone.as_ref() == Some(zone))
                    .map(|h| h.id.clone())
                    .collect();
                instances.sort();
                ZoneAllocation { zone: zone.clone(), instances }
            })
            .collect())
    }
}
