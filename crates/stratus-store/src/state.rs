use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_domain::{
    HardwareCharacteristics, InstanceId, InstanceStatus, Life, Machine, MachineStatus,
    NetworkInterfaceInfo, VolumeAttachmentInfo, VolumeInfo,
};

// ── Status records ────────────────────────────────────────────────────────────

/// The instance status of a machine together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatusRecord {
    pub status: InstanceStatus,
    pub message: String,
    /// A transient provisioning error is eligible for the retry tick; a
    /// terminal one waits for operator intervention.
    pub transient: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for InstanceStatusRecord {
    fn default() -> Self {
        Self {
            status: InstanceStatus::Pending,
            message: String::new(),
            transient: false,
            updated_at: None,
        }
    }
}

impl InstanceStatusRecord {
    pub fn set(&mut self, status: InstanceStatus, message: &str, transient: bool, now: DateTime<Utc>) {
        self.status = status;
        self.message = message.to_string();
        self.transient = transient;
        self.updated_at = Some(now);
    }

    pub fn is_transient_error(&self) -> bool {
        self.status == InstanceStatus::ProvisioningError && self.transient
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStatusRecord {
    pub status: MachineStatus,
    pub message: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for MachineStatusRecord {
    fn default() -> Self {
        Self {
            status: MachineStatus::Pending,
            message: String::new(),
            updated_at: None,
        }
    }
}

// ── Instance info ─────────────────────────────────────────────────────────────

/// Everything the core writes back to a machine record after a successful
/// start: the witness nonce plus whatever the provider reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: InstanceId,
    pub nonce: String,
    pub hardware: Option<HardwareCharacteristics>,
    pub network_config: Vec<NetworkInterfaceInfo>,
    pub volumes: Vec<VolumeInfo>,
    pub volume_attachments: Vec<VolumeAttachmentInfo>,
}

// ── MachineState ──────────────────────────────────────────────────────────────

/// A machine record as held by the authoritative store: the declared machine
/// plus the lifecycle and provisioning fields the core reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    pub machine: Machine,
    pub life: Life,
    /// Present once provisioning succeeded at least once.
    pub instance_id: Option<InstanceId>,
    /// Witness written together with the instance id; the same value rides in
    /// the instance's boot payload.
    pub nonce: Option<String>,
    pub hardware: Option<HardwareCharacteristics>,
    pub instance_status: InstanceStatusRecord,
    pub machine_status: MachineStatusRecord,
    pub marked_for_removal: bool,
}

impl MachineState {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            life: Life::Alive,
            instance_id: None,
            nonce: None,
            hardware: None,
            instance_status: InstanceStatusRecord::default(),
            machine_status: MachineStatusRecord::default(),
            marked_for_removal: false,
        }
    }

    /// Record the outcome of a successful start.
    pub fn apply_instance_info(&mut self, info: &InstanceInfo) {
        self.instance_id = Some(info.instance_id.clone());
        self.nonce = Some(info.nonce.clone());
        self.hardware = info.hardware.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn transient_error_detection() {
        let mut rec = InstanceStatusRecord::default();
        assert!(!rec.is_transient_error());

        rec.set(InstanceStatus::ProvisioningError, "no capacity", true, Utc::now());
        assert!(rec.is_transient_error());

        rec.set(InstanceStatus::ProvisioningError, "bad image", false, Utc::now());
        assert!(!rec.is_transient_error());
    }

    #[test]
    fn apply_instance_info_sets_provisioning_fields() {
        let mut state = MachineState::new(Machine::bare("0", "jammy"));
        let info = InstanceInfo {
            instance_id: InstanceId::new("i-0"),
            nonce: "controller-0:abc".into(),
            hardware: Some(HardwareCharacteristics::default()),
            network_config: vec![],
            volumes: vec![],
            volume_attachments: vec![],
        };
        state.apply_instance_info(&info);
        assert_eq!(state.instance_id, Some(InstanceId::new("i-0")));
        assert_eq!(state.nonce.as_deref(), Some("controller-0:abc"));
        assert!(state.hardware.is_some());
    }
}
