use chrono::Utc;
use std::fmt;
use tracing::{debug, info, warn};

use super::wait::{WaitPolicy, Waiter};
use crate::cluster::{ClusterApi, MigrateRequest, TaskId, TaskStatus};
use crate::core::Vm;
use crate::errors::{BalancerResult, ClusterError};

/// Knobs for issuing migrations.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Only report what would be migrated.
    pub dry_run: bool,
    /// Block until each task reaches a terminal state.
    pub wait: bool,
    pub online: bool,
    pub poll: WaitPolicy,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            wait: false,
            online: true,
            poll: WaitPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Requested,
    AwaitingRealTask,
    Polling,
    Succeeded,
    Failed,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::Requested => "requested",
            MigrationState::AwaitingRealTask => "awaiting-real-task",
            MigrationState::Polling => "polling",
            MigrationState::Succeeded => "succeeded",
            MigrationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Already on the destination, nothing issued.
    Stayed,
    /// Dry run.
    Planned,
    /// Issued without waiting for completion.
    Started(TaskId),
    Succeeded(TaskId),
    Failed { task: TaskId, exitstatus: String },
}

impl MigrationOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, MigrationOutcome::Failed { .. })
    }
}

/// Runs one migration at a time through the state machine
/// `Requested -> (AwaitingRealTask) -> Polling -> Succeeded | Failed`.
pub struct MigrationDriver<'a> {
    api: &'a dyn ClusterApi,
    options: DriverOptions,
    waiter: Waiter,
}

impl<'a> MigrationDriver<'a> {
    pub fn new(api: &'a dyn ClusterApi, options: DriverOptions) -> Self {
        let waiter = Waiter::new(options.poll.clone());
        Self {
            api,
            options,
            waiter,
        }
    }

    pub fn with_waiter(mut self, waiter: Waiter) -> Self {
        self.waiter = waiter;
        self
    }

    pub async fn migrate(&self, vm: &Vm, dest: &str) -> BalancerResult<MigrationOutcome> {
        if vm.node == dest {
            info!(vmid = vm.vmid, "{} stays on {}", vm, vm.node);
            return Ok(MigrationOutcome::Stayed);
        }
        if self.options.dry_run {
            info!(vmid = vm.vmid, "would migrate {} from {} to {}", vm, vm.node, dest);
            return Ok(MigrationOutcome::Planned);
        }

        info!(vmid = vm.vmid, "Migrating VM {} from {} to {}", vm, vm.node, dest);
        self.transition(vm, MigrationState::Requested);
        let requested_at = Utc::now().timestamp();
        let mut task = self
            .api
            .migrate(&MigrateRequest {
                vmid: vm.vmid,
                kind: vm.kind,
                source: vm.node.clone(),
                target: dest.to_string(),
                online: self.options.online,
            })
            .await?;

        if !self.options.wait {
            info!(vmid = vm.vmid, "started {}", task);
            return Ok(MigrationOutcome::Started(task));
        }

        if task.is_ha_placeholder() {
            self.transition(vm, MigrationState::AwaitingRealTask);
            task = self.await_real_task(vm, requested_at).await?;
        }
        info!(vmid = vm.vmid, "{}", task);

        self.transition(vm, MigrationState::Polling);
        let node = task.node().unwrap_or(vm.node.as_str()).to_string();
        let status = self.await_completion(vm, &node, &task).await?;

        if status.is_ok() {
            self.transition(vm, MigrationState::Succeeded);
            Ok(MigrationOutcome::Succeeded(task))
        } else {
            self.transition(vm, MigrationState::Failed);
            let exitstatus = status.exitstatus.unwrap_or_default();
            warn!(vmid = vm.vmid, task = %task, exitstatus = %exitstatus, "Migration of {} failed", vm);
            Ok(MigrationOutcome::Failed { task, exitstatus })
        }
    }

    /// The HA manager queues the real task some time after the request.
    /// Look for a migration task of this guest started no earlier than it.
    async fn await_real_task(&self, vm: &Vm, requested_at: i64) -> BalancerResult<TaskId> {
        info!(vmid = vm.vmid, "Waiting for HA migration task to start");
        let vmid = vm.vmid.to_string();
        self.waiter
            .poll_until(
                || {
                    let vmid = vmid.clone();
                    async move {
                        let tasks = self.api.tasks().await?;
                        Ok::<_, ClusterError>(
                            tasks
                                .into_iter()
                                .map(|t| (t.id, TaskId::from(t.upid), t.starttime))
                                .find(|(id, upid, starttime)| {
                                    *id == vmid && upid.is_migration() && *starttime >= requested_at
                                })
                                .map(|(_, upid, _)| upid),
                        )
                    }
                },
                || debug!(vmid = vm.vmid, "HA migration task not queued yet"),
            )
            .await
    }

    async fn await_completion(
        &self,
        vm: &Vm,
        node: &str,
        task: &TaskId,
    ) -> BalancerResult<TaskStatus> {
        info!(vmid = vm.vmid, "Waiting for task to finish");
        let status = self
            .waiter
            .poll_until(
                || async move {
                    let status = self.api.task_status(node, task).await?;
                    Ok::<_, ClusterError>((!status.is_running()).then_some(status))
                },
                || debug!(vmid = vm.vmid, task = %task, "still running"),
            )
            .await?;
        info!(vmid = vm.vmid, "finished");
        Ok(status)
    }

    fn transition(&self, vm: &Vm, state: MigrationState) {
        debug!(vmid = vm.vmid, state = %state, "migration state");
    }
}
