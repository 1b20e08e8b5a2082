use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MachineId(pub String);

impl MachineId {
    pub fn new(s: impl Into<String>) -> Self {
        MachineId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A provider-scoped opaque instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(s: impl Into<String>) -> Self {
        InstanceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneName(pub String);

impl ZoneName {
    pub fn new(s: impl Into<String>) -> Self {
        ZoneName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ZoneName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

/// Machine life as recorded in the authoritative store.
///
/// Transitions: Alive → Dying → Dead. The provisioning core never moves a
/// machine from Alive to Dying; it only forces Dying machines without an
/// instance straight to Dead and marks Dead machines for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn is_alive(&self) -> bool {
        matches!(self, Life::Alive)
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Life::Dead)
    }
}

impl std::fmt::Display for Life {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Life::Alive => write!(f, "alive"),
            Life::Dying => write!(f, "dying"),
            Life::Dead => write!(f, "dead"),
        }
    }
}

/// Agent-level machine status, written when classification itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    #[default]
    Pending,
    Started,
    Error,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Pending => write!(f, "pending"),
            MachineStatus::Started => write!(f, "started"),
            MachineStatus::Error => write!(f, "error"),
        }
    }
}

/// Provisioning status of the instance backing a machine.
///
/// Transitions: Pending → Provisioning → Running, or → ProvisioningError on a
/// terminal start failure. A transient ProvisioningError is reset to Pending
/// by the retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Pending,
    Provisioning,
    Running,
    ProvisioningError,
}

impl InstanceStatus {
    /// Whether a machine without an instance in this status still expects one.
    pub fn expects_instance(&self) -> bool {
        matches!(self, InstanceStatus::Pending | InstanceStatus::Provisioning)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "pending"),
            InstanceStatus::Provisioning => write!(f, "provisioning"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::ProvisioningError => write!(f, "provisioning error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineJob {
    HostUnits,
    ManageModel,
}

impl std::fmt::Display for MachineJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineJob::HostUnits => write!(f, "host-units"),
            MachineJob::ManageModel => write!(f, "manage-model"),
        }
    }
}

// ── Harvest mode ──────────────────────────────────────────────────────────────

/// Policy governing what the reconciliation cycle may destroy.
///
/// Two independent flags: `destroyed` covers instances of Dead machines,
/// `unknown` covers instances no known machine references. The canonical
/// spellings are `none`, `destroyed`, `unknown`, and `all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestMode {
    pub destroyed: bool,
    pub unknown: bool,
}

impl HarvestMode {
    pub const NONE: HarvestMode = HarvestMode { destroyed: false, unknown: false };
    pub const DESTROYED: HarvestMode = HarvestMode { destroyed: true, unknown: false };
    pub const UNKNOWN: HarvestMode = HarvestMode { destroyed: false, unknown: true };
    pub const ALL: HarvestMode = HarvestMode { destroyed: true, unknown: true };

    pub fn harvests_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn harvests_unknown(&self) -> bool {
        self.unknown
    }
}

impl Default for HarvestMode {
    fn default() -> Self {
        HarvestMode::DESTROYED
    }
}

impl std::fmt::Display for HarvestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match (self.destroyed, self.unknown) {
            (false, false) => "none",
            (true, false) => "destroyed",
            (false, true) => "unknown",
            (true, true) => "all",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for HarvestMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(HarvestMode::NONE),
            "destroyed" => Ok(HarvestMode::DESTROYED),
            "unknown" => Ok(HarvestMode::UNKNOWN),
            "all" => Ok(HarvestMode::ALL),
            other => Err(DomainError::InvalidHarvestMode(other.to_string())),
        }
    }
}

impl Serialize for HarvestMode {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HarvestMode {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let s = String::deserialize(d)?;
        s.parse().map_err(D::Error::custom)
    }
}

// ── Placement ─────────────────────────────────────────────────────────────────

/// A placement directive attached to a machine.
///
/// The wire form is either `zone=<name>` or a free-form provider directive;
/// the empty string is not a valid placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    Zone(ZoneName),
    Directive(String),
}

impl Placement {
    pub fn parse(s: &str) -> Result<Placement, DomainError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DomainError::InvalidPlacement(s.to_string()));
        }
        match s.strip_prefix("zone=") {
            Some("") => Err(DomainError::InvalidPlacement(s.to_string())),
            Some(zone) => Ok(Placement::Zone(ZoneName::new(zone))),
            None => Ok(Placement::Directive(s.to_string())),
        }
    }

    pub fn zone(&self) -> Option<&ZoneName> {
        match self {
            Placement::Zone(z) => Some(z),
            Placement::Directive(_) => None,
        }
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Placement::Zone(z) => write!(f, "zone={}", z),
            Placement::Directive(d) => write!(f, "{}", d),
        }
    }
}

impl std::str::FromStr for Placement {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Placement::parse(s)
    }
}

// ── Constraints & hardware ────────────────────────────────────────────────────

/// Resource constraints a new instance must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Constraints {
    pub arch: Option<String>,
    pub cpu_cores: Option<u64>,
    pub mem_mb: Option<u64>,
    pub root_disk_mb: Option<u64>,
    pub instance_type: Option<String>,
    pub tags: Vec<String>,
    pub include_networks: Vec<String>,
    pub exclude_networks: Vec<String>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.arch.is_none()
            && self.cpu_cores.is_none()
            && self.mem_mb.is_none()
            && self.root_disk_mb.is_none()
            && self.instance_type.is_none()
            && self.tags.is_empty()
            && self.include_networks.is_empty()
            && self.exclude_networks.is_empty()
    }
}

/// Hardware actually allocated by the provider for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HardwareCharacteristics {
    pub arch: Option<String>,
    pub cpu_cores: Option<u64>,
    pub mem_mb: Option<u64>,
    pub root_disk_mb: Option<u64>,
    pub availability_zone: Option<ZoneName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressScope {
    Public,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub value: String,
    pub scope: AddressScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceInfo {
    pub interface_name: String,
    pub mac_address: Option<String>,
    pub addresses: Vec<Address>,
}

// ── Volumes ───────────────────────────────────────────────────────────────────

/// Parameters for a volume to create alongside a new instance. The volume
/// sub-planner proper lives outside the core; these are carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeParams {
    pub tag: String,
    pub size_mib: u64,
    pub pool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachmentParams {
    pub volume_tag: String,
    pub machine_id: MachineId,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub tag: String,
    pub volume_id: String,
    pub size_mib: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachmentInfo {
    pub volume_tag: String,
    pub device_name: Option<String>,
    pub read_only: bool,
}

// ── Images & agent binaries ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub image_id: String,
    pub arch: String,
    pub region: Option<String>,
    pub stream: Option<String>,
}

/// An agent binary version, rendered as `major.minor.patch`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl AgentVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl std::fmt::Display for AgentVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for AgentVersion {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| DomainError::InvalidVersion(s.to_string()))
        };
        Ok(AgentVersion { major: next()?, minor: next()?, patch: next()? })
    }
}

/// One published agent binary, selected by the tools finder for a series and
/// architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTools {
    pub version: AgentVersion,
    pub series: String,
    pub arch: String,
    pub url: String,
    pub sha256: String,
    pub size: u64,
}

// ── Machine ───────────────────────────────────────────────────────────────────

/// A machine as declared in the authoritative store: the durable attributes
/// set by whoever created the record. Lifecycle and provisioning results are
/// tracked alongside, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    /// Target OS family for the instance image and agent binaries.
    pub series: String,
    pub constraints: Constraints,
    pub placement: Option<Placement>,
    /// When set, the instance outlives the machine's death.
    pub keep_instance: bool,
    pub jobs: Vec<MachineJob>,
    /// Set when this machine is a container hosted on another machine.
    /// Container provisioning happens outside the core; such machines are
    /// only maintained here.
    pub container_parent: Option<MachineId>,
    pub volumes: Vec<VolumeParams>,
    pub volume_attachments: Vec<VolumeAttachmentParams>,
    pub subnets_to_zones: HashMap<String, Vec<ZoneName>>,
    pub endpoint_bindings: HashMap<String, String>,
}

impl Machine {
    /// A machine with the given id and series and everything else defaulted.
    pub fn bare(id: impl Into<String>, series: impl Into<String>) -> Self {
        Machine {
            id: MachineId::new(id),
            series: series.into(),
            constraints: Constraints::default(),
            placement: None,
            keep_instance: false,
            jobs: vec![MachineJob::HostUnits],
            container_parent: None,
            volumes: Vec::new(),
            volume_attachments: Vec::new(),
            subnets_to_zones: HashMap::new(),
            endpoint_bindings: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_parses_zone_form() {
        let p = Placement::parse("zone=us-east-1a").unwrap();
        assert_eq!(p, Placement::Zone(ZoneName::new("us-east-1a")));
        assert_eq!(p.to_string(), "zone=us-east-1a");
    }

    #[test]
    fn placement_parses_directive_form() {
        let p = Placement::parse("host=maas-node-7").unwrap();
        assert_eq!(p, Placement::Directive("host=maas-node-7".into()));
        assert!(p.zone().is_none());
    }

    #[test]
    fn placement_rejects_empty() {
        assert!(Placement::parse("").is_err());
        assert!(Placement::parse("zone=").is_err());
    }

    #[test]
    fn harvest_mode_flags() {
        assert!(HarvestMode::ALL.harvests_destroyed());
        assert!(HarvestMode::ALL.harvests_unknown());
        assert!(!HarvestMode::NONE.harvests_destroyed());
        assert!(!HarvestMode::NONE.harvests_unknown());
        assert!(HarvestMode::DESTROYED.harvests_destroyed());
        assert!(!HarvestMode::DESTROYED.harvests_unknown());
        assert!(!HarvestMode::UNKNOWN.harvests_destroyed());
        assert!(HarvestMode::UNKNOWN.harvests_unknown());
    }

    #[test]
    fn harvest_mode_round_trips_as_string() {
        for mode in [HarvestMode::NONE, HarvestMode::DESTROYED, HarvestMode::UNKNOWN, HarvestMode::ALL] {
            let s = serde_json::to_string(&mode).unwrap();
            let back: HarvestMode = serde_json::from_str(&s).unwrap();
            assert_eq!(mode, back);
        }
        assert_eq!(serde_json::to_string(&HarvestMode::ALL).unwrap(), "\"all\"");
    }

    #[test]
    fn harvest_mode_rejects_unknown_spelling() {
        assert!("everything".parse::<HarvestMode>().is_err());
    }

    #[test]
    fn agent_version_round_trips() {
        let v: AgentVersion = "2.9.41".parse().unwrap();
        assert_eq!(v, AgentVersion::new(2, 9, 41));
        assert_eq!(v.to_string(), "2.9.41");
    }

    #[test]
    fn agent_version_rejects_garbage() {
        assert!("2.9".parse::<AgentVersion>().is_err());
        assert!("a.b.c".parse::<AgentVersion>().is_err());
    }

    #[test]
    fn empty_constraints() {
        assert!(Constraints::default().is_empty());
        let c = Constraints { arch: Some("arm64".into()), ..Default::default() };
        assert!(!c.is_empty());
    }

    #[test]
    fn instance_status_expectations() {
        assert!(InstanceStatus::Pending.expects_instance());
        assert!(InstanceStatus::Provisioning.expects_instance());
        assert!(!InstanceStatus::Running.expects_instance());
        assert!(!InstanceStatus::ProvisioningError.expects_instance());
    }
}
