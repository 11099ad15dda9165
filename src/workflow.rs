//! Operator workflows: evacuate a host, balance a host set by memory, move
//! a single VM. Each builds one snapshot, plans, then drives the planned
//! migrations one after another.

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterApi;
use crate::core::vm::DEFAULT_MEMORY_GRANULARITY;
use crate::core::{ClusterSnapshot, Destination, Vm, VmPool};
use crate::errors::{BalancerResult, ClusterError, PlacementError, WaitError};
use crate::migration::{DriverOptions, MigrationDriver, MigrationOutcome, Waiter};
use crate::scheduler::{rank_destinations, MigrationPlan, Planner};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub driver: DriverOptions,
    pub memory_granularity: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            driver: DriverOptions::default(),
            memory_granularity: DEFAULT_MEMORY_GRANULARITY,
        }
    }
}

/// What happened to one VM of the run.
#[derive(Debug)]
pub struct VmOutcome {
    pub vm: Vm,
    pub destination: String,
    pub result: BalancerResult<MigrationOutcome>,
}

impl VmOutcome {
    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(outcome) if outcome.is_success())
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<VmOutcome>,
    pub unplaceable: Vec<Vm>,
    /// Remaining free memory per destination after planning.
    pub capacity: Vec<Destination>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.unplaceable.is_empty() && self.outcomes.iter().all(VmOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &VmOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

pub struct Balancer<A> {
    api: A,
    options: RunOptions,
    cancel: Option<watch::Receiver<bool>>,
}

impl<A: ClusterApi> Balancer<A> {
    pub fn new(api: A, options: RunOptions) -> Self {
        Self {
            api,
            options,
            cancel: None,
        }
    }

    /// Waits started by this balancer stop once `cancel` turns `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Move every running VM off `source` onto `destinations`, planning with
    /// the destinations' real free memory.
    pub async fn evacuate(&self, source: &str, destinations: &[String]) -> BalancerResult<RunReport> {
        let plan = self.plan_evacuation(source, destinations).await?;
        Ok(self.execute(plan).await)
    }

    pub async fn plan_evacuation(
        &self,
        source: &str,
        destinations: &[String],
    ) -> BalancerResult<MigrationPlan> {
        let snapshot = self.snapshot(destinations).await?;
        snapshot.node(source)?;
        let pool = snapshot.running_on(&[source.to_string()]);
        info!(source, vms = pool.len(), "Evacuating host");
        self.plan(&snapshot, pool, destinations, false)
    }

    /// Spread the running VMs of `hosts` across the same hosts by memory,
    /// treating each host as empty.
    pub async fn balance_by_memory(&self, hosts: &[String]) -> BalancerResult<RunReport> {
        let plan = self.plan_balance(hosts).await?;
        Ok(self.execute(plan).await)
    }

    pub async fn plan_balance(&self, hosts: &[String]) -> BalancerResult<MigrationPlan> {
        if hosts.len() < 2 {
            return Err(PlacementError::TooFewNodes(hosts.to_vec()).into());
        }
        let snapshot = self.snapshot(hosts).await?;
        let pool = snapshot.running_on(hosts);
        info!(hosts = ?hosts, vms = pool.len(), "Balancing hosts by memory");
        self.plan(&snapshot, pool, hosts, true)
    }

    pub async fn migrate_one(&self, vmid: u32, dest: &str) -> BalancerResult<RunReport> {
        let nodes = self.api.nodes().await?;
        if !nodes.iter().any(|n| n.node == dest) {
            return Err(ClusterError::UnknownNode(dest.to_string()).into());
        }
        let vm = self
            .api
            .vms()
            .await?
            .iter()
            .find(|v| v.vmid == vmid)
            .map(|v| Vm::from_record(v, self.options.memory_granularity))
            .ok_or(ClusterError::UnknownVm(vmid))?;

        let result = if self.is_cancelled() {
            Err(WaitError::Cancelled.into())
        } else {
            self.driver().migrate(&vm, dest).await
        };
        Ok(RunReport {
            outcomes: vec![VmOutcome {
                vm,
                destination: dest.to_string(),
                result,
            }],
            ..Default::default()
        })
    }

    async fn snapshot(&self, destinations: &[String]) -> Result<ClusterSnapshot, ClusterError> {
        ClusterSnapshot::fetch(&self.api, self.options.memory_granularity, destinations).await
    }

    fn plan(
        &self,
        snapshot: &ClusterSnapshot,
        pool: VmPool,
        destinations: &[String],
        maxfree: bool,
    ) -> BalancerResult<MigrationPlan> {
        let candidates = snapshot.destinations(destinations, maxfree)?;
        let needed: u64 = pool.values().map(|vm| vm.mem).sum();
        debug!(needed, "Memory needed");
        let ranked = rank_destinations(candidates, needed)?;
        Ok(Planner::new(&snapshot.ha).plan(pool, ranked))
    }

    /// Drive the plan strictly in order. A failed migration is recorded and
    /// the rest still run. Once cancelled, nothing new is issued and the
    /// remaining VMs are recorded as cancelled.
    pub async fn execute(&self, plan: MigrationPlan) -> RunReport {
        let driver = self.driver();
        let mut outcomes = Vec::new();

        for vm in plan.stays {
            let destination = vm.node.clone();
            outcomes.push(VmOutcome {
                vm,
                destination,
                result: Ok(MigrationOutcome::Stayed),
            });
        }

        for assignment in plan.assignments {
            for vm in assignment.vms {
                if self.is_cancelled() {
                    warn!(vmid = vm.vmid, "Cancelled, not migrating {} to {}", vm, assignment.host);
                    outcomes.push(VmOutcome {
                        vm,
                        destination: assignment.host.clone(),
                        result: Err(WaitError::Cancelled.into()),
                    });
                    continue;
                }
                let result = driver.migrate(&vm, &assignment.host).await;
                if let Err(e) = &result {
                    error!(vmid = vm.vmid, "Migration of {} to {} failed: {}", vm, assignment.host, e);
                }
                outcomes.push(VmOutcome {
                    vm,
                    destination: assignment.host.clone(),
                    result,
                });
            }
        }

        RunReport {
            outcomes,
            unplaceable: plan.unplaceable,
            capacity: plan.capacity,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn driver(&self) -> MigrationDriver<'_> {
        let mut waiter = Waiter::new(self.options.driver.poll.clone());
        if let Some(cancel) = &self.cancel {
            waiter = waiter.with_cancel(cancel.clone());
        }
        MigrationDriver::new(&self.api, self.options.driver.clone()).with_waiter(waiter)
    }
}

