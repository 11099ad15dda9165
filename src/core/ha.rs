//! HA groups and resources.
//!
//! A started HA resource is bound to its group's node list when the group is
//! restricted. Unrestricted groups only express a preference, so the planner
//! treats them as eligible everywhere.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::cluster::{HaGroupRecord, HaResourceRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaState {
    Started,
    Stopped,
    Other(String),
}

impl From<&str> for HaState {
    fn from(state: &str) -> Self {
        match state {
            "started" => HaState::Started,
            "stopped" => HaState::Stopped,
            other => HaState::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaGroup {
    pub id: String,
    pub nodelist: Vec<String>,
    pub restricted: bool,
}

impl HaGroup {
    pub fn from_record(record: &HaGroupRecord) -> Self {
        Self {
            id: record.group.clone(),
            nodelist: parse_nodelist(&record.nodes),
            restricted: record.restricted,
        }
    }

    /// Stand-in for resources without a known group: unrestricted, listing
    /// every destination of the current run.
    pub fn implicit(destinations: &[String]) -> Self {
        Self {
            id: String::new(),
            nodelist: destinations.to_vec(),
            restricted: false,
        }
    }

    pub fn allows(&self, node: &str) -> bool {
        !self.restricted || self.nodelist.is_empty() || self.nodelist.iter().any(|n| n == node)
    }
}

/// Turn `"pve1:2,pve2,pve3:1"` into `["pve1", "pve2", "pve3"]`, dropping priorities.
pub fn parse_nodelist(spec: &str) -> Vec<String> {
    let mut nodes: Vec<String> = Vec::new();
    for entry in spec.split(',') {
        let name = entry.split(':').next().unwrap_or("").trim();
        if !name.is_empty() && !nodes.iter().any(|n| n == name) {
            nodes.push(name.to_string());
        }
    }
    nodes
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaResource {
    pub vmid: u32,
    pub state: HaState,
    pub group: HaGroup,
}

impl HaResource {
    pub fn is_started(&self) -> bool {
        self.state == HaState::Started
    }
}

/// HA resources by vmid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaIndex {
    resources: BTreeMap<u32, HaResource>,
}

impl HaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(
        groups: &[HaGroupRecord],
        resources: &[HaResourceRecord],
        destinations: &[String],
    ) -> Self {
        let groups: BTreeMap<&str, HaGroup> = groups
            .iter()
            .map(|g| (g.group.as_str(), HaGroup::from_record(g)))
            .collect();

        let mut index = Self::new();
        for record in resources {
            let Some(vmid) = parse_sid(&record.sid) else {
                warn!(sid = %record.sid, "Skipping HA resource with unparsable sid");
                continue;
            };
            let group = record
                .group
                .as_deref()
                .and_then(|id| groups.get(id))
                .cloned()
                .unwrap_or_else(|| HaGroup::implicit(destinations));
            index.insert(HaResource {
                vmid,
                state: HaState::from(record.state.as_str()),
                group,
            });
        }
        index
    }

    pub fn insert(&mut self, resource: HaResource) {
        self.resources.insert(resource.vmid, resource);
    }

    pub fn get(&self, vmid: u32) -> Option<&HaResource> {
        self.resources.get(&vmid)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Whether HA rules let `vmid` run on `node`. Only started resources are
    /// constrained.
    pub fn permits(&self, vmid: u32, node: &str) -> bool {
        match self.resources.get(&vmid) {
            Some(res) if res.is_started() => res.group.allows(node),
            _ => true,
        }
    }
}

fn parse_sid(sid: &str) -> Option<u32> {
    sid.split(':').nth(1)?.trim().parse().ok()
}
