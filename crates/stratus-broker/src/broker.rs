use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stratus_domain::{
    Address, Constraints, HardwareCharacteristics, ImageMetadata, InstanceId, InstanceStatus,
    MachineId, NetworkInterfaceInfo, VolumeAttachmentInfo, VolumeAttachmentParams, VolumeInfo,
    VolumeParams, ZoneName,
};

use crate::error::BrokerError;
use crate::instance_config::InstanceConfig;

/// A running instance as reported by the provider. Handles are snapshots: the
/// core holds them only between one `all_instances` call and the next
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub id: InstanceId,
    pub hardware: Option<HardwareCharacteristics>,
    pub addresses: Vec<Address>,
    pub zone: Option<ZoneName>,
}

/// Which instances live in which availability zone right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneAllocation {
    pub zone: ZoneName,
    pub instances: Vec<InstanceId>,
}

/// Lazy lookup of the instance ids of a machine's distribution-group peers,
/// evaluated by the provider at placement time.
pub type DistributionGroupFn = Arc<dyn Fn() -> Vec<InstanceId> + Send + Sync>;

/// Callback for interim status updates while a start call is in flight.
#[async_trait]
pub trait StatusReporter: Send + Sync + 'static {
    async fn report(&self, status: InstanceStatus, message: &str);
}

pub struct StartInstanceParams {
    pub controller_tag: String,
    pub machine_id: MachineId,
    pub constraints: Constraints,
    /// Candidate agent binaries; never empty.
    pub tools: Vec<stratus_domain::AgentTools>,
    pub instance_config: InstanceConfig,
    /// `zone=<name>`, a provider directive, or absent.
    pub placement: Option<String>,
    pub distribution_group: Option<DistributionGroupFn>,
    pub volumes: Vec<VolumeParams>,
    pub volume_attachments: Vec<VolumeAttachmentParams>,
    pub subnets_to_zones: HashMap<String, Vec<ZoneName>>,
    pub endpoint_bindings: HashMap<String, String>,
    pub image_metadata: Vec<ImageMetadata>,
    pub status_reporter: Option<Arc<dyn StatusReporter>>,
}

#[derive(Debug, Clone)]
pub struct StartInstanceResult {
    pub instance: InstanceHandle,
    pub hardware: Option<HardwareCharacteristics>,
    pub network_info: Vec<NetworkInterfaceInfo>,
    pub volumes: Vec<VolumeInfo>,
    pub volume_attachments: Vec<VolumeAttachmentInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintainInstanceParams {
    pub machine_id: MachineId,
    pub instance_id: InstanceId,
}

/// The provider-side contract. Implementations translate these calls into
/// cloud API requests; the core never speaks to a provider directly.
#[async_trait]
pub trait InstanceBroker: Send + Sync + 'static {
    /// Every instance the provider currently runs for this scope.
    async fn all_instances(&self) -> Result<Vec<InstanceHandle>, BrokerError>;

    async fn start_instance(
        &self,
        params: StartInstanceParams,
    ) -> Result<StartInstanceResult, BrokerError>;

    /// Stop the given instances. Absent ids are ignored where the provider
    /// allows it.
    async fn stop_instances(&self, ids: &[InstanceId]) -> Result<(), BrokerError>;

    /// Provider-specific touch-up of an existing instance; creates nothing.
    async fn maintain_instance(&self, params: MaintainInstanceParams) -> Result<(), BrokerError>;

    /// Capability probe: brokers that expose availability zones return
    /// themselves here. Absent capability disables zone distribution.
    fn zoned(&self) -> Option<&dyn ZonedBroker> {
        None
    }
}

/// Optional capability: providers with visible availability zones.
#[async_trait]
pub trait ZonedBroker: Send + Sync {
    async fn availability_zone_allocations(&self) -> Result<Vec<ZoneAllocation>, BrokerError>;
}
