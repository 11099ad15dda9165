// In-memory cluster for driving the balancer without a real Proxmox API.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pve_balancer::cluster::{
    ClusterApi, HaGroupRecord, HaResourceRecord, MigrateRequest, NodeRecord, TaskId, TaskRecord,
    TaskStatus, VmRecord,
};
use pve_balancer::core::{GuestKind, Vm, VmStatus};
use pve_balancer::errors::ClusterError;

pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Default)]
struct State {
    nodes: Vec<NodeRecord>,
    vms: Vec<VmRecord>,
    groups: Vec<HaGroupRecord>,
    resources: Vec<HaResourceRecord>,
    tasks: Vec<TaskRecord>,
    // vmid -> number of task list polls before the real HA task shows up
    ha_managed: HashMap<u32, Option<usize>>,
    status_script: HashMap<u32, Vec<TaskStatus>>,
    status_polls: HashMap<u32, usize>,
    status_nodes: Vec<String>,
    failing: Vec<u32>,
    migrate_calls: Vec<MigrateRequest>,
    task_list_polls: usize,
}

#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<State>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(self, f: impl FnOnce(&mut State)) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            f(&mut *state);
        }
        self
    }

    /// Node with `free` GiB of `maxmem` GiB unused.
    pub fn node(self, name: &str, maxmem_gib: u64, free_gib: u64) -> Self {
        self.with(|s| {
            s.nodes.push(NodeRecord {
                node: name.into(),
                maxmem: maxmem_gib * GIB,
                mem: (maxmem_gib - free_gib) * GIB,
            })
        })
    }

    pub fn vm(self, vmid: u32, node: &str, mem_gib: u64) -> Self {
        self.guest(vmid, node, mem_gib, "running")
    }

    pub fn guest(self, vmid: u32, node: &str, mem_gib: u64, status: &str) -> Self {
        self.with(|s| {
            s.vms.push(VmRecord {
                vmid,
                name: format!("vm{}", vmid),
                node: node.into(),
                mem: mem_gib * GIB,
                status: status.into(),
                kind: "qemu".into(),
            })
        })
    }

    pub fn ha_group(self, group: &str, nodes: &str, restricted: bool) -> Self {
        self.with(|s| {
            s.groups.push(HaGroupRecord {
                group: group.into(),
                nodes: nodes.into(),
                restricted,
            })
        })
    }

    pub fn ha_resource(self, vmid: u32, state: &str, group: Option<&str>) -> Self {
        self.with(|s| {
            s.resources.push(HaResourceRecord {
                sid: format!("vm:{}", vmid),
                state: state.into(),
                group: group.map(String::from),
            })
        })
    }

    /// Migrations of `vmid` answer with an HA placeholder. The real task
    /// appears after `reveal_after` task list polls, or never.
    pub fn ha_managed(self, vmid: u32, reveal_after: Option<usize>) -> Self {
        self.with(|s| {
            s.ha_managed.insert(vmid, reveal_after);
        })
    }

    /// An old migration task of `vmid` that predates any request.
    pub fn stale_task(self, vmid: u32, node: &str) -> Self {
        self.with(|s| {
            s.tasks.push(TaskRecord {
                id: vmid.to_string(),
                upid: upid(node, "qmigrate", vmid),
                starttime: 1_000,
            })
        })
    }

    /// Statuses returned by successive polls; the last one sticks.
    pub fn task_statuses(self, vmid: u32, statuses: Vec<TaskStatus>) -> Self {
        self.with(|s| {
            s.status_script.insert(vmid, statuses);
        })
    }

    pub fn failing_migrate(self, vmid: u32) -> Self {
        self.with(|s| s.failing.push(vmid))
    }

    pub fn migrate_calls(&self) -> Vec<MigrateRequest> {
        self.state.lock().unwrap().migrate_calls.clone()
    }

    pub fn task_list_polls(&self) -> usize {
        self.state.lock().unwrap().task_list_polls
    }

    pub fn status_polls(&self, vmid: u32) -> usize {
        self.state
            .lock()
            .unwrap()
            .status_polls
            .get(&vmid)
            .copied()
            .unwrap_or(0)
    }

    pub fn status_nodes(&self) -> Vec<String> {
        self.state.lock().unwrap().status_nodes.clone()
    }
}

pub fn upid(node: &str, kind: &str, vmid: u32) -> String {
    format!(
        "UPID:{}:0000A1B2:01C0FFEE:{:08X}:{}:{}:root@pam:",
        node,
        Utc::now().timestamp(),
        kind,
        vmid
    )
}

pub fn running() -> TaskStatus {
    TaskStatus {
        status: "running".into(),
        exitstatus: None,
    }
}

pub fn stopped(exitstatus: &str) -> TaskStatus {
    TaskStatus {
        status: "stopped".into(),
        exitstatus: Some(exitstatus.into()),
    }
}

pub fn test_vm(vmid: u32, node: &str, mem_gib: u64) -> Vm {
    Vm {
        vmid,
        name: format!("vm{}", vmid),
        node: node.into(),
        mem: mem_gib * GIB,
        status: VmStatus::Running,
        kind: GuestKind::Qemu,
    }
}

pub fn hosts(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn nodes(&self) -> Result<Vec<NodeRecord>, ClusterError> {
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn vms(&self) -> Result<Vec<VmRecord>, ClusterError> {
        Ok(self.state.lock().unwrap().vms.clone())
    }

    async fn ha_groups(&self) -> Result<Vec<HaGroupRecord>, ClusterError> {
        Ok(self.state.lock().unwrap().groups.clone())
    }

    async fn ha_resources(&self) -> Result<Vec<HaResourceRecord>, ClusterError> {
        Ok(self.state.lock().unwrap().resources.clone())
    }

    async fn tasks(&self) -> Result<Vec<TaskRecord>, ClusterError> {
        let mut s = self.state.lock().unwrap();
        s.task_list_polls += 1;
        let polls = s.task_list_polls;

        let due: Vec<u32> = s
            .ha_managed
            .iter()
            .filter(|(_, after)| matches!(after, Some(n) if *n <= polls))
            .map(|(vmid, _)| *vmid)
            .collect();
        for vmid in due {
            s.ha_managed.insert(vmid, None);
            let node = s
                .vms
                .iter()
                .find(|v| v.vmid == vmid)
                .map(|v| v.node.clone())
                .unwrap_or_default();
            s.tasks.push(TaskRecord {
                id: vmid.to_string(),
                upid: upid(&node, "qmigrate", vmid),
                starttime: Utc::now().timestamp(),
            });
        }
        Ok(s.tasks.clone())
    }

    async fn migrate(&self, request: &MigrateRequest) -> Result<TaskId, ClusterError> {
        let mut s = self.state.lock().unwrap();
        s.migrate_calls.push(request.clone());
        if s.failing.contains(&request.vmid) {
            return Err(ClusterError::Api {
                method: "POST",
                path: format!("/nodes/{}/qemu/{}/migrate", request.source, request.vmid),
                status: 500,
                message: "migration refused".into(),
            });
        }
        let kind = if s.ha_managed.contains_key(&request.vmid) {
            "hamigrate"
        } else {
            "qmigrate"
        };
        Ok(TaskId::new(upid(&request.source, kind, request.vmid)))
    }

    async fn task_status(&self, node: &str, task: &TaskId) -> Result<TaskStatus, ClusterError> {
        let mut s = self.state.lock().unwrap();
        s.status_nodes.push(node.to_string());
        let vmid: u32 = task
            .as_str()
            .split(':')
            .nth(6)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        let polls = {
            let counter = s.status_polls.entry(vmid).or_insert(0);
            *counter += 1;
            *counter
        };
        Ok(match s.status_script.get(&vmid) {
            Some(script) if !script.is_empty() => script[(polls - 1).min(script.len() - 1)].clone(),
            _ => stopped("OK"),
        })
    }
}
