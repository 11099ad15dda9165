// Migration driver: HA task discovery, status polling and the wait knobs.
// All waits run on tokio's paused clock.

mod common;

use std::time::Duration;

use common::{running, stopped, test_vm, MockCluster};
use pve_balancer::errors::{BalancerError, WaitError};
use pve_balancer::migration::{DriverOptions, MigrationDriver, MigrationOutcome, WaitPolicy, Waiter};
use tokio::sync::watch;

fn waiting(timeout: Option<Duration>) -> DriverOptions {
    DriverOptions {
        wait: true,
        poll: WaitPolicy {
            interval: Duration::from_secs(1),
            timeout,
        },
        ..Default::default()
    }
}

fn two_nodes() -> MockCluster {
    MockCluster::new()
        .node("pve1", 64, 32)
        .node("pve2", 64, 32)
        .vm(100, "pve1", 4)
}

#[tokio::test(start_paused = true)]
async fn ha_placeholder_is_replaced_by_the_real_task() {
    let cluster = two_nodes()
        .ha_managed(100, Some(3))
        .stale_task(100, "pve1")
        .task_statuses(100, vec![running(), stopped("OK")]);
    let driver = MigrationDriver::new(&cluster, waiting(None));

    let outcome = driver.migrate(&test_vm(100, "pve1", 4), "pve2").await.unwrap();

    let task = match outcome {
        MigrationOutcome::Succeeded(task) => task,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert!(task.is_migration());
    assert!(!task.is_ha_placeholder());
    assert_eq!(cluster.task_list_polls(), 3);
    assert_eq!(cluster.status_polls(100), 2);
    assert!(cluster.status_nodes().iter().all(|n| n == "pve1"));
}

#[tokio::test(start_paused = true)]
async fn missing_ha_task_keeps_the_driver_waiting() {
    let cluster = two_nodes().ha_managed(100, None).stale_task(100, "pve1");
    let driver = MigrationDriver::new(&cluster, waiting(None));
    let vm = test_vm(100, "pve1", 4);

    let result = tokio::time::timeout(Duration::from_secs(30), driver.migrate(&vm, "pve2")).await;

    assert!(result.is_err(), "driver should still be waiting");
    assert!(cluster.task_list_polls() >= 20);
    assert_eq!(cluster.status_polls(100), 0);
}

#[tokio::test(start_paused = true)]
async fn bounded_wait_times_out() {
    let cluster = two_nodes().ha_managed(100, None);
    let driver = MigrationDriver::new(&cluster, waiting(Some(Duration::from_secs(10))));

    let result = driver.migrate(&test_vm(100, "pve1", 4), "pve2").await;

    assert!(matches!(
        result,
        Err(BalancerError::WaitError(WaitError::TimedOut { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn polls_until_the_task_stops() {
    let cluster =
        two_nodes().task_statuses(100, vec![running(), running(), stopped("OK")]);
    let driver = MigrationDriver::new(&cluster, waiting(None));

    let outcome = driver.migrate(&test_vm(100, "pve1", 4), "pve2").await.unwrap();

    assert!(matches!(outcome, MigrationOutcome::Succeeded(_)));
    assert_eq!(cluster.status_polls(100), 3);
    assert_eq!(cluster.task_list_polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn non_ok_exit_status_is_a_failure() {
    let cluster = two_nodes().task_statuses(100, vec![stopped("unable to migrate")]);
    let driver = MigrationDriver::new(&cluster, waiting(None));

    let outcome = driver.migrate(&test_vm(100, "pve1", 4), "pve2").await.unwrap();

    assert!(!outcome.is_success());
    assert!(matches!(
        outcome,
        MigrationOutcome::Failed { ref exitstatus, .. } if exitstatus == "unable to migrate"
    ));
}

#[tokio::test]
async fn without_wait_the_task_is_only_started() {
    let cluster = two_nodes();
    let driver = MigrationDriver::new(&cluster, DriverOptions::default());

    let outcome = driver.migrate(&test_vm(100, "pve1", 4), "pve2").await.unwrap();

    assert!(matches!(outcome, MigrationOutcome::Started(ref t) if t.is_migration()));
    assert_eq!(cluster.migrate_calls().len(), 1);
    assert_eq!(cluster.status_polls(100), 0);
}

#[tokio::test]
async fn vm_on_its_destination_is_left_alone() {
    let cluster = two_nodes();
    let driver = MigrationDriver::new(&cluster, waiting(None));

    let outcome = driver.migrate(&test_vm(100, "pve1", 4), "pve1").await.unwrap();

    assert_eq!(outcome, MigrationOutcome::Stayed);
    assert!(cluster.migrate_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelling_stops_a_pending_wait() {
    let cluster = two_nodes().ha_managed(100, None);
    let (tx, rx) = watch::channel(false);
    let options = waiting(None);
    let waiter = Waiter::new(options.poll.clone()).with_cancel(rx);
    let driver = MigrationDriver::new(&cluster, options).with_waiter(waiter);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = tx.send(true);
    });
    let result = driver.migrate(&test_vm(100, "pve1", 4), "pve2").await;

    assert!(matches!(
        result,
        Err(BalancerError::WaitError(WaitError::Cancelled))
    ));
    assert_eq!(cluster.migrate_calls().len(), 1);
}
