//! Boundary to the cluster control plane.
//!
//! Records here mirror what the Proxmox VE API hands back. Everything above
//! this module works on the normalized types in [`crate::core`].

pub mod proxmox;
pub mod task;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::GuestKind;
use crate::errors::ClusterError;

pub use proxmox::ProxmoxClient;
pub use task::{TaskId, HA_MIGRATE_MARKER, SUCCESS_EXIT_STATUS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: String,
    #[serde(default)]
    pub maxmem: u64,
    #[serde(default)]
    pub mem: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub vmid: u32,
    #[serde(default)]
    pub name: String,
    pub node: String,
    #[serde(default)]
    pub mem: u64,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaGroupRecord {
    pub group: String,
    #[serde(default)]
    pub nodes: String,
    #[serde(default, deserialize_with = "flag")]
    pub restricted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaResourceRecord {
    pub sid: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub id: String,
    pub upid: String,
    #[serde(default)]
    pub starttime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: String,
    #[serde(default)]
    pub exitstatus: Option<String>,
}

impl TaskStatus {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn is_ok(&self) -> bool {
        self.exitstatus.as_deref() == Some(SUCCESS_EXIT_STATUS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateRequest {
    pub vmid: u32,
    pub kind: GuestKind,
    pub source: String,
    pub target: String,
    pub online: bool,
}

/// Everything the balancer needs from the cluster. Each call returns a
/// fresh point-in-time view; no caching or retries happen behind it.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn nodes(&self) -> Result<Vec<NodeRecord>, ClusterError>;

    /// Cluster-wide guest listing (`type=vm`).
    async fn vms(&self) -> Result<Vec<VmRecord>, ClusterError>;

    async fn ha_groups(&self) -> Result<Vec<HaGroupRecord>, ClusterError>;

    async fn ha_resources(&self) -> Result<Vec<HaResourceRecord>, ClusterError>;

    async fn tasks(&self) -> Result<Vec<TaskRecord>, ClusterError>;

    /// Issue a migration. The answer is a task id or, for HA managed
    /// guests, a placeholder.
    async fn migrate(&self, request: &MigrateRequest) -> Result<TaskId, ClusterError>;

    async fn task_status(&self, node: &str, task: &TaskId) -> Result<TaskStatus, ClusterError>;
}

// The API reports booleans as 0/1 and sometimes omits them.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Bool(b)) => b,
        Some(Raw::Int(i)) => i != 0,
        Some(Raw::Text(s)) => matches!(s.as_str(), "1" | "true" | "yes"),
        None => false,
    })
}
