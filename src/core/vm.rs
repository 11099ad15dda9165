use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::VmRecord;

/// Memory figures are rounded up to this step so tiny measurement noise
/// does not reorder otherwise equal VMs.
pub const DEFAULT_MEMORY_GRANULARITY: u64 = 128 * 1024 * 1024;

/// Pending VMs keyed by vmid. Planning removes entries as they get a home.
pub type VmPool = BTreeMap<u32, Vm>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmStatus {
    Running,
    Stopped,
    Other(String),
}

impl From<&str> for VmStatus {
    fn from(status: &str) -> Self {
        match status {
            "running" => VmStatus::Running,
            "stopped" => VmStatus::Stopped,
            other => VmStatus::Other(other.to_string()),
        }
    }
}

/// Guest flavour, decides the API path a migrate request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl GuestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }
}

impl From<&str> for GuestKind {
    fn from(kind: &str) -> Self {
        match kind {
            "lxc" => GuestKind::Lxc,
            _ => GuestKind::Qemu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub vmid: u32,
    pub name: String,
    pub node: String,
    pub mem: u64,
    pub status: VmStatus,
    pub kind: GuestKind,
}

impl Vm {
    pub fn from_record(record: &VmRecord, granularity: u64) -> Self {
        Self {
            vmid: record.vmid,
            name: record.name.clone(),
            node: record.node.clone(),
            mem: round_memory(record.mem, granularity),
            status: VmStatus::from(record.status.as_str()),
            kind: GuestKind::from(record.kind.as_str()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == VmStatus::Running
    }
}

impl fmt::Display for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.vmid, self.name)
    }
}

/// Round `bytes` up to the next multiple of `granularity`.
pub fn round_memory(bytes: u64, granularity: u64) -> u64 {
    if granularity == 0 {
        return bytes;
    }
    bytes.div_ceil(granularity) * granularity
}
