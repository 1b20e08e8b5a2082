use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use stratus_domain::{HarvestMode, InstanceStatus, Life, Machine, MachineId, MachineStatus};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::state::{InstanceInfo, MachineState};
use crate::store::MachineStore;
use crate::watch::{HarvestWatcher, MachineWatcher, Watcher};

#[derive(Debug, Default)]
struct Inner {
    machines: BTreeMap<MachineId, MachineState>,
    groups: HashMap<MachineId, Vec<MachineId>>,
    harvest_mode: HarvestMode,
    machine_watchers: Vec<UnboundedSender<Vec<MachineId>>>,
    harvest_watchers: Vec<UnboundedSender<HarvestMode>>,
}

impl Inner {
    fn notify_machines(&mut self, ids: Vec<MachineId>) {
        self.machine_watchers.retain(|tx| tx.send(ids.clone()).is_ok());
    }

    fn notify_harvest(&mut self) {
        let mode = self.harvest_mode;
        self.harvest_watchers.retain(|tx| tx.send(mode).is_ok());
    }

    fn machine_mut(&mut self, id: &MachineId) -> Result<&mut MachineState, StoreError> {
        self.machines
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

/// In-memory implementation of [`MachineStore`].
///
/// All data is lost on process exit. Suitable for tests and the local stack;
/// the production store lives in the surrounding system.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new alive machine and notify watchers.
    pub async fn add_machine(&self, machine: Machine) {
        let mut guard = self.inner.write().await;
        let id = machine.id.clone();
        guard.machines.insert(id.clone(), MachineState::new(machine));
        guard.notify_machines(vec![id]);
    }

    /// Insert a fully-formed machine state, replacing any existing record.
    pub async fn insert_state(&self, state: MachineState) {
        let mut guard = self.inner.write().await;
        let id = state.machine.id.clone();
        guard.machines.insert(id.clone(), state);
        guard.notify_machines(vec![id]);
    }

    pub async fn set_life(&self, id: &MachineId, life: Life) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.machine_mut(id)?.life = life;
        guard.notify_machines(vec![id.clone()]);
        Ok(())
    }

    /// Delete a machine record outright, as an external remover would.
    pub async fn remove_machine(&self, id: &MachineId) {
        let mut guard = self.inner.write().await;
        guard.machines.remove(id);
        guard.notify_machines(vec![id.clone()]);
    }

    pub async fn set_distribution_group(&self, id: MachineId, peers: Vec<MachineId>) {
        let mut guard = self.inner.write().await;
        guard.groups.insert(id, peers);
    }

    pub async fn set_harvest_mode(&self, mode: HarvestMode) {
        let mut guard = self.inner.write().await;
        guard.harvest_mode = mode;
        guard.notify_harvest();
    }

    pub async fn machine_state(&self, id: &MachineId) -> Option<MachineState> {
        let guard = self.inner.read().await;
        guard.machines.get(id).cloned()
    }
}

#[async_trait]
impl MachineStore for InMemoryStore {
    async fn machines(
        &self,
        ids: &[MachineId],
    ) -> Result<Vec<(MachineId, Result<MachineState, StoreError>)>, StoreError> {
        let guard = self.inner.read().await;
        Ok(ids
            .iter()
            .map(|id| {
                let result = guard
                    .machines
                    .get(id)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(id.clone()));
                (id.clone(), result)
            })
            .collect())
    }

    async fn machines_with_transient_errors(&self) -> Result<Vec<MachineState>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .machines
            .values()
            .filter(|m| m.instance_status.is_transient_error())
            .cloned()
            .collect())
    }

    async fn distribution_groups(
        &self,
        ids: &[MachineId],
    ) -> Result<HashMap<MachineId, Vec<MachineId>>, StoreError> {
        let guard = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| guard.groups.get(id).map(|peers| (id.clone(), peers.clone())))
            .collect())
    }

    async fn set_machine_status(
        &self,
        id: &MachineId,
        status: MachineStatus,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let machine = guard.machine_mut(id)?;
        // Watchers see changes, not idempotent re-writes.
        if machine.machine_status.status == status && machine.machine_status.message == message {
            return Ok(());
        }
        machine.machine_status.status = status;
        machine.machine_status.message = message.to_string();
        machine.machine_status.updated_at = Some(Utc::now());
        guard.notify_machines(vec![id.clone()]);
        Ok(())
    }

    async fn set_instance_status(
        &self,
        id: &MachineId,
        status: InstanceStatus,
        message: &str,
        transient: bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let record = &mut guard.machine_mut(id)?.instance_status;
        if record.status == status && record.message == message && record.transient == transient {
            return Ok(());
        }
        record.set(status, message, transient, Utc::now());
        guard.notify_machines(vec![id.clone()]);
        Ok(())
    }

    async fn set_instance_info(
        &self,
        id: &MachineId,
        info: &InstanceInfo,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let machine = guard.machine_mut(id)?;
        if machine.instance_id.is_some() {
            return Err(StoreError::AlreadyProvisioned(id.clone()));
        }
        machine.apply_instance_info(info);
        guard.notify_machines(vec![id.clone()]);
        Ok(())
    }

    async fn mark_for_removal(&self, id: &MachineId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let machine = guard.machine_mut(id)?;
        if !machine.life.is_dead() {
            return Err(StoreError::StillAlive(id.clone()));
        }
        if machine.marked_for_removal {
            return Ok(());
        }
        machine.marked_for_removal = true;
        guard.notify_machines(vec![id.clone()]);
        Ok(())
    }

    async fn ensure_dead(&self, id: &MachineId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let machine = guard.machine_mut(id)?;
        if machine.life.is_alive() {
            return Err(StoreError::StillAlive(id.clone()));
        }
        if machine.life.is_dead() {
            return Ok(());
        }
        machine.life = Life::Dead;
        guard.notify_machines(vec![id.clone()]);
        Ok(())
    }

    async fn watch_machines(&self) -> Result<MachineWatcher, StoreError> {
        let mut guard = self.inner.write().await;
        let (tx, watcher) = Watcher::channel();
        let snapshot: Vec<MachineId> = guard.machines.keys().cloned().collect();
        // First delivery is the full snapshot, even when empty.
        let _ = tx.send(snapshot);
        guard.machine_watchers.push(tx);
        Ok(watcher)
    }

    async fn watch_harvest_mode(&self) -> Result<HarvestWatcher, StoreError> {
        let mut guard = self.inner.write().await;
        let (tx, watcher) = Watcher::channel();
        let _ = tx.send(guard.harvest_mode);
        guard.harvest_watchers.push(tx);
        Ok(watcher)
    }
}
