use serde::{Deserialize, Serialize};

use crate::cluster::NodeRecord;

/// Read-only view of one hypervisor host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub maxmem: u64,
    pub mem: u64,
}

impl Node {
    pub fn from_record(record: &NodeRecord) -> Self {
        Self {
            name: record.node.clone(),
            maxmem: record.maxmem,
            mem: record.mem,
        }
    }

    /// Memory available for planning. `maxfree` treats the host as if it
    /// carried no load at all.
    pub fn free_memory(&self, maxfree: bool) -> u64 {
        if maxfree {
            self.maxmem
        } else {
            self.maxmem.saturating_sub(self.mem)
        }
    }
}

/// Planner working copy of a destination host. `memfree` shrinks as the
/// planner reserves memory and is signed because stay deductions may
/// overshoot on small hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    pub maxmem: u64,
    pub memfree: i64,
    pub memperc: f64,
}

impl Destination {
    pub fn new(node: &Node, maxfree: bool) -> Self {
        Self {
            name: node.name.clone(),
            maxmem: node.maxmem,
            memfree: node.free_memory(maxfree) as i64,
            memperc: 0.0,
        }
    }

    pub fn can_hold(&self, mem: u64) -> bool {
        self.memfree > mem as i64
    }

    pub fn reserve(&mut self, mem: u64) {
        self.memfree -= mem as i64;
    }

    /// Remaining free memory as a percentage of capacity.
    pub fn free_percent(&self) -> f64 {
        if self.maxmem == 0 {
            return 0.0;
        }
        self.memfree as f64 * 100.0 / self.maxmem as f64
    }
}
