use std::collections::BTreeMap;
use tracing::debug;

use crate::cluster::{ClusterApi, HaGroupRecord, HaResourceRecord, NodeRecord, VmRecord};
use crate::core::ha::HaIndex;
use crate::core::node::{Destination, Node};
use crate::core::vm::{Vm, VmPool};
use crate::errors::ClusterError;

/// Point-in-time picture of the cluster, built once per run.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: BTreeMap<String, Node>,
    pub vms: VmPool,
    pub ha: HaIndex,
}

impl ClusterSnapshot {
    /// Query the control plane once. `destinations` seeds the implicit
    /// group of HA resources that have none.
    pub async fn fetch(
        api: &dyn ClusterApi,
        granularity: u64,
        destinations: &[String],
    ) -> Result<Self, ClusterError> {
        let nodes = api.nodes().await?;
        let vms = api.vms().await?;
        let groups = api.ha_groups().await?;
        let resources = api.ha_resources().await?;
        let snapshot = Self::from_records(
            &nodes,
            &vms,
            &groups,
            &resources,
            granularity,
            destinations,
        );
        debug!(
            nodes = nodes.len(),
            vms = vms.len(),
            ha_groups = groups.len(),
            ha_managed = snapshot.ha.len(),
            "Fetched cluster snapshot"
        );
        Ok(snapshot)
    }

    pub fn from_records(
        nodes: &[NodeRecord],
        vms: &[VmRecord],
        groups: &[HaGroupRecord],
        resources: &[HaResourceRecord],
        granularity: u64,
        destinations: &[String],
    ) -> Self {
        Self {
            nodes: nodes
                .iter()
                .map(|n| (n.node.clone(), Node::from_record(n)))
                .collect(),
            vms: vms
                .iter()
                .map(|v| (v.vmid, Vm::from_record(v, granularity)))
                .collect(),
            ha: HaIndex::from_records(groups, resources, destinations),
        }
    }

    pub fn node(&self, name: &str) -> Result<&Node, ClusterError> {
        self.nodes
            .get(name)
            .ok_or_else(|| ClusterError::UnknownNode(name.to_string()))
    }

    pub fn vm(&self, vmid: u32) -> Result<&Vm, ClusterError> {
        self.vms.get(&vmid).ok_or(ClusterError::UnknownVm(vmid))
    }

    /// Planning records for `names`, in the order given. Any name the
    /// cluster does not know aborts the run.
    pub fn destinations(
        &self,
        names: &[String],
        maxfree: bool,
    ) -> Result<Vec<Destination>, ClusterError> {
        let mut out: Vec<Destination> = Vec::with_capacity(names.len());
        for name in names {
            let node = self.node(name)?;
            if out.iter().any(|d| &d.name == name) {
                continue;
            }
            out.push(Destination::new(node, maxfree));
        }
        Ok(out)
    }

    /// Running VMs currently resident on any of `hosts`.
    pub fn running_on(&self, hosts: &[String]) -> VmPool {
        self.vms
            .iter()
            .filter(|(_, vm)| vm.is_running() && hosts.iter().any(|h| h == &vm.node))
            .map(|(id, vm)| (*id, vm.clone()))
            .collect()
    }
}
