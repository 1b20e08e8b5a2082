use std::collections::HashMap;

use stratus_broker::{
    BrokerError, InstanceBroker, InstanceHandle, MaintainInstanceParams, ZonedBroker,
};
use stratus_domain::{HarvestMode, InstanceId, InstanceStatus, Life, MachineId, MachineStatus, ZoneName};
use stratus_store::{MachineState, MachineStore};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::ProvisionerError;
use crate::start::StartWorker;
use crate::task::{with_cancel, Provisioner};

/// What the reconciliation engine does with one changed machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineClassification {
    /// Alive, no instance, and expecting one: start an instance.
    Pending,
    /// Dead (or forced dead): stop its instance and mark for removal.
    Dead,
    /// A provisioned container machine: provider touch-up only.
    Maintain,
    /// Nothing for this core to do.
    Skip,
}

/// Classify one machine. A dying machine without an instance is forced
/// straight to dead; a dying machine with an instance is left for its agent
/// to wind down.
pub async fn classify_machine(
    state: &MachineState,
    store: &dyn MachineStore,
) -> Result<MachineClassification, ProvisionerError> {
    match state.life {
        Life::Dying => {
            if state.instance_id.is_some() {
                return Ok(MachineClassification::Skip);
            }
            store.ensure_dead(&state.machine.id).await?;
            Ok(MachineClassification::Dead)
        }
        Life::Dead => Ok(MachineClassification::Dead),
        Life::Alive => match &state.instance_id {
            None => {
                if state.instance_status.status.expects_instance() {
                    Ok(MachineClassification::Pending)
                } else {
                    Ok(MachineClassification::Skip)
                }
            }
            Some(_) => {
                if state.machine.container_parent.is_some() {
                    Ok(MachineClassification::Maintain)
                } else {
                    Ok(MachineClassification::Skip)
                }
            }
        },
    }
}

/// Drop instances the harvest mode protects, logging what survives.
pub(crate) fn apply_harvest_policy(
    mode: HarvestMode,
    stopping: Vec<InstanceHandle>,
    unknown: Vec<InstanceHandle>,
) -> (Vec<InstanceHandle>, Vec<InstanceHandle>) {
    let stopping = if mode.harvests_destroyed() {
        stopping
    } else {
        for handle in &stopping {
            info!(
                instance_id = %handle.id,
                mode = %mode,
                "dead machine's instance retained by harvest mode"
            );
        }
        Vec::new()
    };
    let unknown = if mode.harvests_unknown() {
        unknown
    } else {
        for handle in &unknown {
            info!(
                instance_id = %handle.id,
                mode = %mode,
                "unknown instance retained by harvest mode"
            );
        }
        Vec::new()
    };
    (stopping, unknown)
}

impl Provisioner {
    /// One reconciliation cycle over a batch of changed machine ids.
    pub(crate) async fn process_machines(
        &mut self,
        ids: Vec<MachineId>,
        dying: &watch::Receiver<bool>,
    ) -> Result<(), ProvisionerError> {
        debug!(count = ids.len(), "processing machine changes");
        self.populate_registry(&ids, dying).await?;

        let mut pending = Vec::new();
        let mut dead = Vec::new();
        let mut maintain = Vec::new();
        for id in &ids {
            let Some(state) = self.registry.machine(id).cloned() else {
                continue;
            };
            match classify_machine(&state, self.store.as_ref()).await {
                Ok(MachineClassification::Pending) => {
                    info!(machine_id = %id, "machine pending provisioning");
                    pending.push(state);
                }
                Ok(MachineClassification::Dead) => dead.push(state),
                Ok(MachineClassification::Maintain) => maintain.push(state),
                Ok(MachineClassification::Skip) => {}
                Err(err) => {
                    warn!(machine_id = %id, error = %err, "classifying machine failed; skipping");
                    if let Err(status_err) = self
                        .store
                        .set_machine_status(id, MachineStatus::Error, &err.to_string())
                        .await
                    {
                        warn!(machine_id = %id, error = %status_err, "recording machine status failed");
                    }
                }
            }
        }

        // Instances of dead machines, unless kept or already gone.
        let mut stopping = Vec::new();
        for state in &dead {
            let Some(instance_id) = &state.instance_id else { continue };
            if state.machine.keep_instance {
                info!(
                    machine_id = %state.machine.id,
                    instance_id = %instance_id,
                    "dead machine's instance retained; keep-instance is set"
                );
                continue;
            }
            if let Some(handle) = self.registry.instance(instance_id) {
                stopping.push(handle.clone());
            }
        }
        let unknown = self.registry.unknown_instances();
        let (stopping, unknown) = apply_harvest_policy(self.harvest_mode, stopping, unknown);

        // Stop before start: a single call covering both sets, and any
        // failure aborts the cycle before an instance can be started.
        let mut to_stop: Vec<InstanceId> =
            stopping.iter().chain(unknown.iter()).map(|h| h.id.clone()).collect();
        to_stop.sort();
        to_stop.dedup();
        if !to_stop.is_empty() {
            info!(count = to_stop.len(), "stopping instances");
            with_cancel(dying, self.broker.stop_instances(&to_stop)).await??;
            for instance_id in &to_stop {
                self.registry.remove_instance(instance_id);
            }
        }

        for state in &dead {
            let id = &state.machine.id;
            info!(machine_id = %id, "removing dead machine");
            if let Err(err) = self.store.mark_for_removal(id).await {
                warn!(machine_id = %id, error = %err, "marking machine for removal failed");
            }
            self.registry.evict(id);
        }

        // Zone populations must not count machines that died or vanished.
        if let Some(tracker) = &self.zones {
            let gone = dead
                .iter()
                .map(|state| &state.machine.id)
                .chain(ids.iter().filter(|id| self.registry.machine(id).is_none()));
            let mut tracker = tracker.write().await;
            for id in gone {
                tracker.remove_machine(id);
            }
        }

        for state in &maintain {
            let Some(instance_id) = state.instance_id.clone() else { continue };
            let params = MaintainInstanceParams {
                machine_id: state.machine.id.clone(),
                instance_id,
            };
            if let Err(err) = with_cancel(dying, self.broker.maintain_instance(params)).await? {
                warn!(
                    machine_id = %state.machine.id,
                    error = %err,
                    "maintaining instance failed"
                );
            }
        }

        self.start_pending(pending, dying).await
    }

    /// Refresh the registry: instances from a full listing, machines from a
    /// bulk lookup over the changed ids.
    async fn populate_registry(
        &mut self,
        ids: &[MachineId],
        dying: &watch::Receiver<bool>,
    ) -> Result<(), ProvisionerError> {
        let instances = with_cancel(dying, self.broker.all_instances())
            .await?
            .map_err(ProvisionerError::AllInstances)?;
        self.registry.set_instances(instances);

        let results = with_cancel(dying, self.store.machines(ids)).await??;
        for (id, result) in results {
            self.registry.apply_lookup(id, result)?;
        }
        debug!(
            machines = self.registry.machine_count(),
            instances = self.registry.instance_count(),
            "registry refreshed"
        );
        Ok(())
    }

    /// On the retry tick: reset transiently failed machines to pending and
    /// push them back through the start path. A machine whose reset fails is
    /// skipped until the next tick.
    pub(crate) async fn retry_transient_errors(
        &mut self,
        dying: &watch::Receiver<bool>,
    ) -> Result<(), ProvisionerError> {
        let machines = match self.store.machines_with_transient_errors().await {
            Ok(machines) => machines,
            Err(err) => {
                warn!(error = %err, "listing machines with transient errors failed");
                return Ok(());
            }
        };
        if machines.is_empty() {
            return Ok(());
        }
        info!(count = machines.len(), "retrying machines with transient provisioning errors");

        let mut pending = Vec::new();
        for mut state in machines {
            let id = state.machine.id.clone();
            if let Err(err) = self
                .store
                .set_instance_status(&id, InstanceStatus::Pending, "", false)
                .await
            {
                warn!(
                    machine_id = %id,
                    error = %err,
                    "resetting transient error failed; retrying next tick"
                );
                continue;
            }
            state
                .instance_status
                .set(InstanceStatus::Pending, "", false, chrono::Utc::now());
            self.registry.insert_machine(state.clone());
            pending.push(state);
        }
        self.start_pending(pending, dying).await
    }

    /// Zone distribution and parallel start dispatch for the pending set.
    pub(crate) async fn start_pending(
        &mut self,
        pending: Vec<MachineState>,
        dying: &watch::Receiver<bool>,
    ) -> Result<(), ProvisionerError> {
        if pending.is_empty() {
            return Ok(());
        }
        let ids: Vec<MachineId> = pending.iter().map(|m| m.machine.id.clone()).collect();
        let groups = self.store.distribution_groups(&ids).await?;

        if self.zones.is_some() {
            match self.populate_zones(dying).await {
                Ok(()) => {}
                Err(ProvisionerError::Broker(BrokerError::ZonesNotSupported)) => {
                    debug!("broker does not expose availability zones; distribution disabled");
                    self.zones = None;
                }
                Err(err) => return Err(err),
            }
        }

        let mut assignments: HashMap<MachineId, ZoneName> = HashMap::new();
        let mut zone_count = 0usize;
        if let Some(tracker) = &self.zones {
            let mut tracker = tracker.write().await;
            zone_count = tracker.zone_count();
            for state in &pending {
                if state.machine.placement.is_some() {
                    continue;
                }
                let id = &state.machine.id;
                let group = groups.get(id).cloned().unwrap_or_default();
                match tracker.pick_zone(id, &group) {
                    Some(zone) => {
                        debug!(machine_id = %id, zone = %zone, "assigned availability zone");
                        assignments.insert(id.clone(), zone);
                    }
                    None => {
                        warn!(
                            machine_id = %id,
                            "no failure-free availability zone; starting without a zone directive"
                        );
                    }
                }
            }
        }

        info!(count = pending.len(), "starting instances for pending machines");
        let mut tasks = JoinSet::new();
        for state in pending {
            let id = state.machine.id.clone();
            let group = groups.get(&id).cloned().unwrap_or_default();
            let group_instances: Vec<InstanceId> = group
                .iter()
                .filter_map(|peer| {
                    self.registry.machine(peer).and_then(|m| m.instance_id.clone())
                })
                .collect();
            let worker = StartWorker {
                store: self.store.clone(),
                broker: self.broker.clone(),
                tools_finder: self.tools_finder.clone(),
                auth: self.auth.clone(),
                zones: self.zones.clone(),
                config: self.config.clone(),
                machine: state,
                assigned_zone: assignments.get(&id).cloned(),
                zone_count,
                group,
                group_instances,
                dying: dying.clone(),
            };
            tasks.spawn(worker.run());
        }
        // The barrier: every worker finishes before the cycle ends.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(()))) => debug!(machine_id = %id, "start worker finished"),
                Ok((id, Err(ProvisionerError::Cancelled))) => {
                    debug!(machine_id = %id, "start worker cancelled")
                }
                Ok((id, Err(err))) => {
                    warn!(machine_id = %id, error = %err, "machine failed to provision")
                }
                Err(join_err) => error!(error = %join_err, "start worker did not run to completion"),
            }
        }
        Ok(())
    }

    /// First call discovers zones and their populations; later calls only
    /// apply the starvation release.
    async fn populate_zones(
        &mut self,
        dying: &watch::Receiver<bool>,
    ) -> Result<(), ProvisionerError> {
        let Some(tracker) = self.zones.clone() else {
            return Ok(());
        };
        let Some(zoned) = self.broker.zoned() else {
            return Err(ProvisionerError::Broker(BrokerError::ZonesNotSupported));
        };
        let mut tracker = tracker.write().await;
        if tracker.is_populated() {
            tracker.release_starved();
            return Ok(());
        }
        let allocations = with_cancel(dying, zoned.availability_zone_allocations()).await??;
        tracker.populate(allocations, &self.registry.instance_machines());
        info!(zones = tracker.zone_count(), "availability zones discovered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stratus_domain::Machine;
    use stratus_store::InMemoryStore;

    fn state(machine: Machine, life: Life, instance: Option<&str>) -> MachineState {
        let mut state = MachineState::new(machine);
        state.life = life;
        state.instance_id = instance.map(InstanceId::new);
        state
    }

    fn handle(id: &str) -> InstanceHandle {
        InstanceHandle {
            id: InstanceId::new(id),
            hardware: None,
            addresses: vec![],
            zone: None,
        }
    }

    #[tokio::test]
    async fn alive_without_instance_and_pending_status_is_pending() {
        let store = Arc::new(InMemoryStore::new());
        let s = state(Machine::bare("0", "jammy"), Life::Alive, None);
        let c = classify_machine(&s, store.as_ref()).await.unwrap();
        assert_eq!(c, MachineClassification::Pending);
    }

    #[tokio::test]
    async fn alive_with_instance_is_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let s = state(Machine::bare("0", "jammy"), Life::Alive, Some("i-0"));
        let c = classify_machine(&s, store.as_ref()).await.unwrap();
        assert_eq!(c, MachineClassification::Skip);
    }

    #[tokio::test]
    async fn provisioned_container_is_maintained() {
        let store = Arc::new(InMemoryStore::new());
        let mut machine = Machine::bare("0/lxd/1", "jammy");
        machine.container_parent = Some(MachineId::new("0"));
        let s = state(machine, Life::Alive, Some("i-c"));
        let c = classify_machine(&s, store.as_ref()).await.unwrap();
        assert_eq!(c, MachineClassification::Maintain);
    }

    #[tokio::test]
    async fn alive_with_error_status_and_no_instance_is_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let mut s = state(Machine::bare("0", "jammy"), Life::Alive, None);
        s.instance_status.set(
            InstanceStatus::ProvisioningError,
            "boom",
            false,
            chrono::Utc::now(),
        );
        let c = classify_machine(&s, store.as_ref()).await.unwrap();
        assert_eq!(c, MachineClassification::Skip);
    }

    #[tokio::test]
    async fn dying_with_instance_is_left_alone() {
        let store = Arc::new(InMemoryStore::new());
        let s = state(Machine::bare("0", "jammy"), Life::Dying, Some("i-0"));
        let c = classify_machine(&s, store.as_ref()).await.unwrap();
        assert_eq!(c, MachineClassification::Skip);
    }

    #[tokio::test]
    async fn dying_without_instance_is_forced_dead() {
        let store = Arc::new(InMemoryStore::new());
        store.add_machine(Machine::bare("0", "jammy")).await;
        store.set_life(&MachineId::new("0"), Life::Dying).await.unwrap();

        let s = state(Machine::bare("0", "jammy"), Life::Dying, None);
        let c = classify_machine(&s, store.as_ref()).await.unwrap();
        assert_eq!(c, MachineClassification::Dead);
        assert_eq!(
            store.machine_state(&MachineId::new("0")).await.unwrap().life,
            Life::Dead
        );
    }

    #[tokio::test]
    async fn dead_is_dead() {
        let store = Arc::new(InMemoryStore::new());
        let s = state(Machine::bare("0", "jammy"), Life::Dead, Some("i-0"));
        let c = classify_machine(&s, store.as_ref()).await.unwrap();
        assert_eq!(c, MachineClassification::Dead);
    }

    #[test]
    fn harvest_none_retains_everything() {
        let (stopping, unknown) = apply_harvest_policy(
            HarvestMode::NONE,
            vec![handle("i-dead")],
            vec![handle("i-stray")],
        );
        assert!(stopping.is_empty());
        assert!(unknown.is_empty());
    }

    #[test]
    fn harvest_unknown_spares_dead_machines() {
        let (stopping, unknown) = apply_harvest_policy(
            HarvestMode::UNKNOWN,
            vec![handle("i-dead")],
            vec![handle("i-stray")],
        );
        assert!(stopping.is_empty());
        assert_eq!(unknown.len(), 1);
    }

    #[test]
    fn harvest_destroyed_spares_unknown() {
        let (stopping, unknown) = apply_harvest_policy(
            HarvestMode::DESTROYED,
            vec![handle("i-dead")],
            vec![handle("i-stray")],
        );
        assert_eq!(stopping.len(), 1);
        assert!(unknown.is_empty());
    }

    #[test]
    fn harvest_all_takes_both() {
        let (stopping, unknown) = apply_harvest_policy(
            HarvestMode::ALL,
            vec![handle("i-dead")],
            vec![handle("i-stray")],
        );
        assert_eq!(stopping.len(), 1);
        assert_eq!(unknown.len(), 1);
    }
}
