use std::collections::{HashMap, HashSet};

use stratus_broker::InstanceHandle;
use stratus_domain::{InstanceId, MachineId};
use stratus_store::{MachineState, StoreError};
use tracing::debug;

/// The in-memory view of machines and instances for the current cycle.
///
/// Owned exclusively by the supervisory task: parallel start workers never
/// touch it. Instance handles are replaced wholesale at the start of each
/// cycle; machine entries are refreshed or evicted per change batch.
#[derive(Debug, Default)]
pub struct Registry {
    machines: HashMap<MachineId, MachineState>,
    instances: HashMap<InstanceId, InstanceHandle>,
}

impl Registry {
    pub fn machine(&self, id: &MachineId) -> Option<&MachineState> {
        self.machines.get(id)
    }

    pub fn insert_machine(&mut self, state: MachineState) {
        self.machines.insert(state.machine.id.clone(), state);
    }

    pub fn evict(&mut self, id: &MachineId) {
        self.machines.remove(id);
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&InstanceHandle> {
        self.instances.get(id)
    }

    pub fn remove_instance(&mut self, id: &InstanceId) {
        self.instances.remove(id);
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Replace the instance view with a fresh `all_instances` result.
    pub fn set_instances(&mut self, handles: Vec<InstanceHandle>) {
        self.instances = handles.into_iter().map(|h| (h.id.clone(), h)).collect();
    }

    /// Fold one bulk-lookup result into the machine map. NotFound and
    /// Unauthorized evict the entry; other errors propagate and abort the
    /// cycle.
    pub fn apply_lookup(
        &mut self,
        id: MachineId,
        result: Result<MachineState, StoreError>,
    ) -> Result<(), StoreError> {
        match result {
            Ok(state) => {
                self.machines.insert(id, state);
                Ok(())
            }
            Err(err) if err.is_not_found_or_unauthorized() => {
                debug!(machine_id = %id, "machine no longer accessible; evicting");
                self.machines.remove(&id);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Instances no machine record references, sorted by id for stable
    /// handling downstream.
    pub fn unknown_instances(&self) -> Vec<InstanceHandle> {
        let referenced: HashSet<&InstanceId> = self
            .machines
            .values()
            .filter_map(|m| m.instance_id.as_ref())
            .collect();
        let mut unknown: Vec<InstanceHandle> = self
            .instances
            .values()
            .filter(|h| !referenced.contains(&h.id))
            .cloned()
            .collect();
        unknown.sort_by(|a, b| a.id.cmp(&b.id));
        unknown
    }

    /// The instance-id → machine-id relation, inverted from machine records.
    pub fn instance_machines(&self) -> HashMap<InstanceId, MachineId> {
        self.machines
            .values()
            .filter_map(|m| m.instance_id.clone().map(|i| (i, m.machine.id.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_domain::Machine;

    fn handle(id: &str) -> InstanceHandle {
        InstanceHandle {
            id: InstanceId::new(id),
            hardware: None,
            addresses: vec![],
            zone: None,
        }
    }

    fn provisioned(machine: &str, instance: &str) -> MachineState {
        let mut state = MachineState::new(Machine::bare(machine, "jammy"));
        state.instance_id = Some(InstanceId::new(instance));
        state
    }

    #[test]
    fn lookup_failure_evicts_or_propagates() {
        let mut registry = Registry::default();
        registry.insert_machine(provisioned("0", "i-0"));

        registry
            .apply_lookup(
                MachineId::new("0"),
                Err(StoreError::NotFound(MachineId::new("0"))),
            )
            .unwrap();
        assert!(registry.machine(&MachineId::new("0")).is_none());

        let err = registry
            .apply_lookup(
                MachineId::new("1"),
                Err(StoreError::Internal("boom".into())),
            )
            .unwrap_err();
        assert!(!err.is_not_found_or_unauthorized());
    }

    #[test]
    fn unknown_instances_excludes_referenced() {
        let mut registry = Registry::default();
        registry.insert_machine(provisioned("0", "i-0"));
        registry.set_instances(vec![handle("i-0"), handle("i-stray"), handle("i-stray-2")]);

        let unknown = registry.unknown_instances();
        let ids: Vec<&str> = unknown.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["i-stray", "i-stray-2"]);
    }

    #[test]
    fn instance_machines_inverts_the_relation() {
        let mut registry = Registry::default();
        registry.insert_machine(provisioned("0", "i-0"));
        registry.insert_machine(MachineState::new(Machine::bare("1", "jammy")));

        let relation = registry.instance_machines();
        assert_eq!(relation.len(), 1);
        assert_eq!(relation.get(&InstanceId::new("i-0")), Some(&MachineId::new("0")));
    }
}
