//! Greedy placement of a VM pool onto destination hosts.
//!
//! Each pass re-sorts hosts by free memory and VMs by size. The first VM
//! accepted in a pass sets the batch ceiling (`firstbatch`): every later host
//! in the same pass may only take VMs while its running batch total stays at
//! or below that ceiling. The very first pass additionally lets one VM per
//! destination stay where it already runs. Passes repeat until the pool is
//! drained or a pass places nothing.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::ranking::sort_by_memfree;
use crate::core::{Destination, HaIndex, Vm, VmPool};

/// VMs bound for one destination, in the order they were placed.
#[derive(Debug, Clone, PartialEq)]
pub struct HostAssignment {
    pub host: String,
    pub vms: Vec<Vm>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MigrationPlan {
    /// One entry per destination, in ranked order (largest share of free
    /// memory first). Migrations are executed in this order.
    pub assignments: Vec<HostAssignment>,
    /// VMs kept on their current host by the stay pre-pass.
    pub stays: Vec<Vm>,
    /// VMs no destination could take.
    pub unplaceable: Vec<Vm>,
    /// Destinations with the memory left after all reservations.
    pub capacity: Vec<Destination>,
}

impl MigrationPlan {
    fn new(destinations: &[Destination]) -> Self {
        Self {
            assignments: destinations
                .iter()
                .map(|d| HostAssignment {
                    host: d.name.clone(),
                    vms: Vec::new(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn assign(&mut self, host: &str, vm: Vm) {
        if let Some(slot) = self.assignments.iter_mut().find(|a| a.host == host) {
            slot.vms.push(vm);
        }
    }

    pub fn assigned_to(&self, host: &str) -> &[Vm] {
        self.assignments
            .iter()
            .find(|a| a.host == host)
            .map(|a| a.vms.as_slice())
            .unwrap_or(&[])
    }

    pub fn assigned_memory(&self, host: &str) -> u64 {
        self.assigned_to(host).iter().map(|vm| vm.mem).sum()
    }

    /// `(destination, vm)` pairs that actually change host.
    pub fn migrations(&self) -> impl Iterator<Item = (&str, &Vm)> {
        self.assignments.iter().flat_map(|a| {
            a.vms
                .iter()
                .filter(move |vm| vm.node != a.host)
                .map(move |vm| (a.host.as_str(), vm))
        })
    }

    pub fn is_complete(&self) -> bool {
        self.unplaceable.is_empty()
    }
}

pub struct Planner<'a> {
    ha: &'a HaIndex,
}

impl<'a> Planner<'a> {
    pub fn new(ha: &'a HaIndex) -> Self {
        Self { ha }
    }

    /// Place every VM of `pool` on one of `destinations` (already ranked).
    /// The destination records are a working copy; their `memfree` ends up
    /// in [`MigrationPlan::capacity`].
    pub fn plan(&self, mut pool: VmPool, mut destinations: Vec<Destination>) -> MigrationPlan {
        let mut plan = MigrationPlan::new(&destinations);
        let mut pending = pool.len();
        let mut first_pass = true;

        while !pool.is_empty() {
            sort_by_memfree(&mut destinations);
            debug!(hosts = ?names(&destinations), vms = ?by_memory(&pool), "Planning pass");

            let mut firstbatch: u64 = 0;
            let mut seen: BTreeMap<String, u64> = BTreeMap::new();

            if first_pass {
                plan.stays = self.mark_stays(&mut pool, &destinations, &mut seen);
                for dst in destinations.iter_mut() {
                    if let Some(&kept) = seen.get(&dst.name) {
                        dst.reserve(kept);
                    }
                }
                sort_by_memfree(&mut destinations);
                first_pass = false;
                debug!(hosts = ?names(&destinations), "After stay pre-pass");
            }

            for dst in destinations.iter_mut() {
                if let Some(&kept) = seen.get(&dst.name) {
                    // a stay host closes the pass, remaining hosts wait for the next one
                    dst.reserve(kept);
                    debug!(host = %dst.name, kept, "Stay host ends the pass");
                    break;
                }
                debug!(
                    "{} {} {:.0}%",
                    dst.name,
                    dst.memfree,
                    dst.free_percent()
                );

                let mut batchtotal: u64 = 0;
                for vmid in by_memory(&pool) {
                    let Some(mem) = pool.get(&vmid).map(|vm| vm.mem) else {
                        continue;
                    };
                    batchtotal += mem;
                    if !self.accepts(dst, vmid, mem, firstbatch, batchtotal) {
                        batchtotal -= mem;
                        continue;
                    }

                    dst.reserve(mem);
                    let Some(vm) = pool.remove(&vmid) else {
                        continue;
                    };
                    debug!("  {} {} {:.0}% {} {}", dst.name, dst.memfree, dst.free_percent(), vmid, mem);
                    plan.assign(&dst.name, vm);
                    if firstbatch == 0 {
                        // first VM of the pass seeds the ceiling, this host is done for now
                        firstbatch = mem;
                        break;
                    }
                }
            }

            if pool.len() == pending {
                for vm in pool.values() {
                    warn!(vmid = vm.vmid, "Unable to find destination for {}", vm);
                }
                plan.unplaceable = std::mem::take(&mut pool).into_values().collect();
                break;
            }
            pending = pool.len();
        }

        plan.capacity = destinations;
        plan
    }

    /// Walk VMs largest first and let at most one VM per destination stay on
    /// the host it already runs on.
    fn mark_stays(
        &self,
        pool: &mut VmPool,
        destinations: &[Destination],
        seen: &mut BTreeMap<String, u64>,
    ) -> Vec<Vm> {
        let mut stays = Vec::new();
        let mut slots = destinations.len();
        for vmid in by_memory(pool) {
            if slots == 0 {
                break;
            }
            let Some(vm) = pool.get(&vmid) else {
                continue;
            };
            if seen.contains_key(&vm.node) || !destinations.iter().any(|d| d.name == vm.node) {
                continue;
            }
            seen.insert(vm.node.clone(), vm.mem);
            slots -= 1;
            if let Some(vm) = pool.remove(&vmid) {
                info!(vmid = vm.vmid, "{} stays on {}", vm, vm.node);
                stays.push(vm);
            }
        }
        stays
    }

    fn accepts(
        &self,
        dst: &Destination,
        vmid: u32,
        mem: u64,
        firstbatch: u64,
        batchtotal: u64,
    ) -> bool {
        let fits = dst.can_hold(mem);
        let first = firstbatch == 0;
        let within_batch = batchtotal <= firstbatch;
        let ha_ok = self.ha.permits(vmid, &dst.name);
        debug!(
            vmid,
            host = %dst.name,
            mem,
            firstbatch,
            batchtotal,
            fits,
            first,
            within_batch,
            ha_ok,
            "candidate"
        );
        fits && (first || within_batch) && ha_ok
    }
}

/// Pending vmids, largest VM first. Equal sizes keep vmid order.
fn by_memory(pool: &VmPool) -> Vec<u32> {
    let mut vms: Vec<&Vm> = pool.values().collect();
    vms.sort_by(|a, b| b.mem.cmp(&a.mem));
    vms.into_iter().map(|vm| vm.vmid).collect()
}

fn names(destinations: &[Destination]) -> Vec<&str> {
    destinations.iter().map(|d| d.name.as_str()).collect()
}
