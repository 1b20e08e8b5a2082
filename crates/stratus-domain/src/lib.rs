pub mod error;
pub mod types;

pub use error::DomainError;
pub use types::{
    Address, AddressScope, AgentTools, AgentVersion, Constraints, HardwareCharacteristics,
    HarvestMode, ImageMetadata, InstanceId, InstanceStatus, Life, Machine, MachineId, MachineJob,
    MachineStatus, NetworkInterfaceInfo, Placement, VolumeAttachmentInfo, VolumeAttachmentParams,
    VolumeInfo, VolumeParams, ZoneName,
};
