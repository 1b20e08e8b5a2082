use std::collections::{HashMap, HashSet};

use stratus_broker::ZoneAllocation;
use stratus_domain::{InstanceId, MachineId, ZoneName};
use tracing::debug;

/// One availability zone: its assigned machines and its failure count.
#[derive(Debug, Clone)]
pub struct ZoneRecord {
    pub name: ZoneName,
    pub machines: HashSet<MachineId>,
    pub failures: u32,
}

/// Per-zone machine populations and failure counters, used to spread pending
/// machines across fault domains.
///
/// Many start workers read the tracker concurrently; the assignment pass and
/// zone rotation mutate it under the caller's exclusive lock. Zone picking is
/// deterministic: zones are ordered by (population ascending, name
/// ascending), and the first zone without failures wins.
#[derive(Debug, Default)]
pub struct ZoneTracker {
    zones: Vec<ZoneRecord>,
    populated: bool,
}

impl ZoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Seed zone populations from the broker's allocations, inverting the
    /// instance → machine relation. Called once per tracker lifetime.
    pub fn populate(
        &mut self,
        allocations: Vec<ZoneAllocation>,
        instance_machines: &HashMap<InstanceId, MachineId>,
    ) {
        self.zones = allocations
            .into_iter()
            .map(|alloc| ZoneRecord {
                machines: alloc
                    .instances
                    .iter()
                    .filter_map(|i| instance_machines.get(i).cloned())
                    .collect(),
                name: alloc.zone,
                failures: 0,
            })
            .collect();
        self.populated = true;
    }

    /// Starvation release: once every zone has failed at least once, all
    /// counters reset so no zone stays excluded forever.
    pub fn release_starved(&mut self) {
        if !self.zones.is_empty() && self.zones.iter().all(|z| z.failures > 0) {
            debug!("every availability zone has failures; resetting counters");
            for zone in &mut self.zones {
                zone.failures = 0;
            }
        }
    }

    fn population(zone: &ZoneRecord, group: &HashSet<&MachineId>) -> usize {
        if group.is_empty() {
            zone.machines.len()
        } else {
            zone.machines.iter().filter(|m| group.contains(m)).count()
        }
    }

    /// Assign `machine` to the least-loaded zone without failures, counting
    /// only distribution-group peers when a group is given. Returns `None`
    /// when every zone has failures; the caller starts without a zone
    /// directive and leans on the retry path.
    pub fn pick_zone(&mut self, machine: &MachineId, group: &[MachineId]) -> Option<ZoneName> {
        let group: HashSet<&MachineId> = group.iter().collect();
        let mut order: Vec<usize> = (0..self.zones.len()).collect();
        order.sort_by(|&a, &b| {
            let pa = Self::population(&self.zones[a], &group);
            let pb = Self::population(&self.zones[b], &group);
            pa.cmp(&pb).then_with(|| self.zones[a].name.cmp(&self.zones[b].name))
        });
        for idx in order {
            if self.zones[idx].failures == 0 {
                self.zones[idx].machines.insert(machine.clone());
                return Some(self.zones[idx].name.clone());
            }
        }
        None
    }

    /// Drop a machine from whichever zone holds it, after it died or its
    /// record vanished.
    pub fn remove_machine(&mut self, machine: &MachineId) {
        for zone in &mut self.zones {
            zone.machines.remove(machine);
        }
    }

    pub fn record_failure(&mut self, zone: &ZoneName) {
        if let Some(record) = self.zones.iter_mut().find(|z| &z.name == zone) {
            record.failures += 1;
        }
    }

    pub fn unassign(&mut self, machine: &MachineId, zone: &ZoneName) {
        if let Some(record) = self.zones.iter_mut().find(|z| &z.name == zone) {
            record.machines.remove(machine);
        }
    }

    /// After a start failure attributed to `prior`: bump its failure count,
    /// drop the machine from it, and pick a fresh zone. `None` means no
    /// failure-free alternative remains.
    pub fn retry_zone(
        &mut self,
        machine: &MachineId,
        prior: &ZoneName,
        group: &[MachineId],
    ) -> Option<ZoneName> {
        self.record_failure(prior);
        self.unassign(machine, prior);
        self.pick_zone(machine, group)
    }

    pub fn failures(&self, zone: &ZoneName) -> Option<u32> {
        self.zones.iter().find(|z| &z.name == zone).map(|z| z.failures)
    }

    pub fn assigned_zone(&self, machine: &MachineId) -> Option<&ZoneName> {
        self.zones
            .iter()
            .find(|z| z.machines.contains(machine))
            .map(|z| &z.name)
    }

    pub fn populations(&self) -> Vec<(ZoneName, usize)> {
        self.zones
            .iter()
            .map(|z| (z.name.clone(), z.machines.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(zones: &[&str]) -> ZoneTracker {
        let mut t = ZoneTracker::new();
        t.populate(
            zones
                .iter()
                .map(|z| ZoneAllocation { zone: ZoneName::new(*z), instances: vec![] })
                .collect(),
            &HashMap::new(),
        );
        t
    }

    #[test]
    fn populate_inverts_instance_relation() {
        let mut t = ZoneTracker::new();
        let relation: HashMap<InstanceId, MachineId> = [
            (InstanceId::new("i-0"), MachineId::new("0")),
            (InstanceId::new("i-1"), MachineId::new("1")),
        ]
        .into_iter()
        .collect();
        t.populate(
            vec![
                ZoneAllocation {
                    zone: ZoneName::new("a"),
                    instances: vec![InstanceId::new("i-0"), InstanceId::new("i-untracked")],
                },
                ZoneAllocation {
                    zone: ZoneName::new("b"),
                    instances: vec![InstanceId::new("i-1")],
                },
            ],
            &relation,
        );

        assert_eq!(t.assigned_zone(&MachineId::new("0")), Some(&ZoneName::new("a")));
        assert_eq!(t.assigned_zone(&MachineId::new("1")), Some(&ZoneName::new("b")));
        assert_eq!(t.populations(), vec![(ZoneName::new("a"), 1), (ZoneName::new("b"), 1)]);
    }

    #[test]
    fn picks_least_loaded_with_name_tiebreak() {
        let mut t = tracker(&["c", "a", "b"]);
        // All empty: the name ascending tiebreak decides.
        assert_eq!(t.pick_zone(&MachineId::new("0"), &[]), Some(ZoneName::new("a")));
        assert_eq!(t.pick_zone(&MachineId::new("1"), &[]), Some(ZoneName::new("b")));
        assert_eq!(t.pick_zone(&MachineId::new("2"), &[]), Some(ZoneName::new("c")));
        // Round two balances again.
        assert_eq!(t.pick_zone(&MachineId::new("3"), &[]), Some(ZoneName::new("a")));
    }

    #[test]
    fn failed_zones_are_skipped() {
        let mut t = tracker(&["a", "b"]);
        t.record_failure(&ZoneName::new("a"));
        assert_eq!(t.pick_zone(&MachineId::new("0"), &[]), Some(ZoneName::new("b")));
    }

    #[test]
    fn all_failed_leaves_machine_unplaced() {
        let mut t = tracker(&["a", "b"]);
        t.record_failure(&ZoneName::new("a"));
        t.record_failure(&ZoneName::new("b"));
        assert_eq!(t.pick_zone(&MachineId::new("0"), &[]), None);
    }

    #[test]
    fn starvation_release_resets_all_counters() {
        let mut t = tracker(&["a", "b"]);
        t.record_failure(&ZoneName::new("a"));
        t.release_starved();
        // One healthy zone left: no reset.
        assert_eq!(t.failures(&ZoneName::new("a")), Some(1));

        t.record_failure(&ZoneName::new("b"));
        t.release_starved();
        assert_eq!(t.failures(&ZoneName::new("a")), Some(0));
        assert_eq!(t.failures(&ZoneName::new("b")), Some(0));
    }

    #[test]
    fn group_population_drives_the_pick() {
        let mut t = tracker(&["a", "b", "c"]);
        // Unrelated machines crowd zone a; the group only has a peer in b.
        t.pick_zone(&MachineId::new("x1"), &[]);
        t.pick_zone(&MachineId::new("x2"), &[]);
        t.pick_zone(&MachineId::new("x3"), &[]);

        let group = vec![MachineId::new("g1"), MachineId::new("g2")];
        let first = t.pick_zone(&MachineId::new("g1"), &group).unwrap();
        let second = t.pick_zone(&MachineId::new("g2"), &group).unwrap();
        assert_ne!(first, second, "group peers must spread across zones");
    }

    #[test]
    fn remove_machine_clears_its_zone_slot() {
        let mut t = tracker(&["a", "b"]);
        let m = MachineId::new("0");
        t.pick_zone(&m, &[]);
        assert!(t.assigned_zone(&m).is_some());

        t.remove_machine(&m);
        assert!(t.assigned_zone(&m).is_none());
        assert_eq!(t.populations(), vec![(ZoneName::new("a"), 0), (ZoneName::new("b"), 0)]);
    }

    #[test]
    fn retry_zone_rotates_and_counts() {
        let mut t = tracker(&["a", "b"]);
        let m = MachineId::new("0");
        assert_eq!(t.pick_zone(&m, &[]), Some(ZoneName::new("a")));

        let next = t.retry_zone(&m, &ZoneName::new("a"), &[]).unwrap();
        assert_eq!(next, ZoneName::new("b"));
        assert_eq!(t.failures(&ZoneName::new("a")), Some(1));
        assert_eq!(t.assigned_zone(&m), Some(&ZoneName::new("b")));

        // Zone b failing too exhausts the alternatives.
        assert_eq!(t.retry_zone(&m, &ZoneName::new("b"), &[]), None);
    }
}
