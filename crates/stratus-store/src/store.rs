use std::collections::HashMap;

use async_trait::async_trait;
use stratus_domain::{InstanceStatus, MachineId, MachineStatus};

use crate::error::StoreError;
use crate::state::{InstanceInfo, MachineState};
use crate::watch::{HarvestWatcher, MachineWatcher};

/// The authoritative store's contract with the provisioning core.
///
/// The store owns machine records; the core writes only the provisioning
/// fields (instance id, nonce, hardware, statuses, removal marking) and reads
/// the rest. Bulk reads report per-machine outcomes so a single missing
/// machine does not fail the call.
#[async_trait]
pub trait MachineStore: Send + Sync + 'static {
    /// Bulk lookup. The outer error covers the call itself; each machine
    /// carries its own result so NotFound/Unauthorized stay per-machine.
    async fn machines(
        &self,
        ids: &[MachineId],
    ) -> Result<Vec<(MachineId, Result<MachineState, StoreError>)>, StoreError>;

    /// Machines whose instance status is a transient provisioning error.
    async fn machines_with_transient_errors(&self) -> Result<Vec<MachineState>, StoreError>;

    /// Distribution-group peers for each of `ids`, in one batched call.
    /// Machines without a group are absent from the result.
    async fn distribution_groups(
        &self,
        ids: &[MachineId],
    ) -> Result<HashMap<MachineId, Vec<MachineId>>, StoreError>;

    async fn set_machine_status(
        &self,
        id: &MachineId,
        status: MachineStatus,
        message: &str,
    ) -> Result<(), StoreError>;

    async fn set_instance_status(
        &self,
        id: &MachineId,
        status: InstanceStatus,
        message: &str,
        transient: bool,
    ) -> Result<(), StoreError>;

    /// Record a successful start. Fails with `AlreadyProvisioned` if the
    /// machine carries an instance id; a machine holds at most one.
    async fn set_instance_info(&self, id: &MachineId, info: &InstanceInfo)
        -> Result<(), StoreError>;

    /// Flag a dead machine for final removal by the store's own cleanup.
    async fn mark_for_removal(&self, id: &MachineId) -> Result<(), StoreError>;

    /// Force a dying machine to dead. Fails with `StillAlive` for machines
    /// that have not begun dying.
    async fn ensure_dead(&self, id: &MachineId) -> Result<(), StoreError>;

    /// Watch machine record changes. The first delivery is the full set of
    /// known machine ids.
    async fn watch_machines(&self) -> Result<MachineWatcher, StoreError>;

    /// Watch harvest-mode changes. The first delivery is the current mode.
    async fn watch_harvest_mode(&self) -> Result<HarvestWatcher, StoreError>;
}
