mod common;

use common::{address, device, ids, Behaviour, Harness, COLLECT_CMD, SAVE_CMD};
use netpilot_error::NPError;
use netpilot_models::domain::prelude::{
    BackupDisposition, BackupType, DeployOptions, Device, DeviceGroup, DeviceOutcome,
    OperationRequest, TaskStatus,
};
use std::time::Duration;

fn backup() -> OperationRequest {
    OperationRequest::Backup {
        backup_type: BackupType::Manual,
    }
}

fn access(names: &[&str]) -> Vec<Device> {
    names.iter().map(|n| device(n, DeviceGroup::Access)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_pool_bound_holds_for_whole_batch() {
    let names = ["d1", "d2", "d3", "d4", "d5"];
    let h = Harness::new(
        common::settings(|s| s.pool.max_connections = 2),
        access(&names),
    );
    h.connector.set_latency(Duration::from_millis(200));

    let execution = h.service.run(ids(&names), backup()).await.unwrap();

    assert_eq!(execution.report.status, TaskStatus::Success);
    assert_eq!(execution.report.summary.counts.ok, 5);
    assert!(h.connector.peak_sessions() <= 2);
    assert_eq!(h.connector.connects(), 5);
    let stats = h.service.pool_stats();
    assert!(stats.peak_live <= 2);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_device_yields_partial_at_full_progress() {
    let names = ["device1", "device2", "device3"];
    let h = Harness::new(common::settings(|_| {}), access(&names));
    h.connector.script(&address("device2"), Behaviour::Hang);

    let execution = h.service.run(ids(&names), backup()).await.unwrap();
    let report = execution.report;

    assert_eq!(report.status, TaskStatus::Partial);
    assert_eq!(report.summary.failed_devices, ["device2"]);
    assert_eq!(report.progress_percent, 100);
    assert_eq!(report.summary.counts.timeout, 1);
    assert!(execution.otp_required.is_none());
    // Timed-out session must not stay in the pool
    assert_eq!(h.connector.open_sessions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_outcome_counts_cover_every_device() {
    let names = ["ok1", "auth", "down", "slow", "ok2"];
    let h = Harness::new(common::settings(|_| {}), access(&names));
    h.connector.script(&address("auth"), Behaviour::AuthFail);
    h.connector.script(&address("down"), Behaviour::Unreachable);
    h.connector.script(&address("slow"), Behaviour::Hang);

    let report = h.service.run(ids(&names), backup()).await.unwrap().report;
    let counts = report.summary.counts;

    assert_eq!(counts.total(), 5);
    assert_eq!(counts.ok, 2);
    assert_eq!(counts.auth_error, 1);
    assert_eq!(counts.connection_error, 1);
    assert_eq!(counts.timeout, 1);
    assert_eq!(counts.pending, 0);
    assert_eq!(report.status, TaskStatus::Partial);

    let mut failed = report.summary.failed_devices.clone();
    failed.sort();
    assert_eq!(failed, ["auth", "down", "slow"]);
}

#[tokio::test(start_paused = true)]
async fn test_all_devices_failing_is_failed() {
    let names = ["a", "b"];
    let h = Harness::new(common::settings(|_| {}), access(&names));
    h.connector.script(&address("a"), Behaviour::Unreachable);
    h.connector.script(&address("b"), Behaviour::AuthFail);

    let report = h.service.run(ids(&names), backup()).await.unwrap().report;
    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.progress_percent, 100);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_device_rejects_submission() {
    let h = Harness::new(common::settings(|_| {}), access(&["d1"]));
    let err = h
        .service
        .run(ids(&["d1", "ghost"]), backup())
        .await
        .unwrap_err();
    assert!(matches!(err, NPError::DeviceNotFound(id) if id == "ghost"));
    assert_eq!(h.connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_ids_run_once() {
    let h = Harness::new(common::settings(|_| {}), access(&["d1", "d2"]));
    let report = h
        .service
        .run(ids(&["d1", "d2", "d1"]), backup())
        .await
        .unwrap()
        .report;
    assert_eq!(report.summary.total, 2);
    assert_eq!(h.connector.commands(&address("d1")), [COLLECT_CMD]);
}

#[tokio::test(start_paused = true)]
async fn test_submit_then_wait_and_subscribe() {
    let names = ["d1", "d2", "d3"];
    let h = Harness::new(common::settings(|_| {}), access(&names));
    h.connector.set_latency(Duration::from_millis(50));

    let task_id = h.service.submit(ids(&names), backup()).await.unwrap();
    let mut rx = h.service.subscribe(&task_id).unwrap();

    let report = h.service.wait(&task_id).await.unwrap();
    assert_eq!(report.status, TaskStatus::Success);

    let mut last_progress = 0;
    let mut last = None;
    while let Ok(update) = rx.recv().await {
        assert!(update.progress_percent >= last_progress);
        last_progress = update.progress_percent;
        last = Some(update);
    }
    let last = last.unwrap();
    assert_eq!(last.status, TaskStatus::Success);
    assert_eq!(last.progress_percent, 100);

    let status = h.service.status(&task_id).await.unwrap();
    assert_eq!(status.summary.counts.ok, 3);
    assert!(matches!(
        h.service.status("missing").await,
        Err(NPError::TaskNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_further_dispatch() {
    let names = ["d1", "d2", "d3", "d4", "d5"];
    let h = Harness::new(
        common::settings(|s| s.pool.max_connections = 1),
        access(&names),
    );
    h.connector.set_latency(Duration::from_secs(1));

    let task_id = h.service.submit(ids(&names), backup()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.service.cancel(&task_id).await.unwrap();

    let report = h.service.wait(&task_id).await.unwrap();
    let counts = report.summary.counts;
    assert_eq!(report.status, TaskStatus::Cancelled);
    assert_eq!(counts.total(), 5);
    assert!(counts.ok >= 1);
    assert!(counts.cancelled >= 1);
    assert_eq!(counts.ok + counts.cancelled, 5);
    assert!(h.connector.touched().len() < 5);
}

#[tokio::test(start_paused = true)]
async fn test_deploy_runs_backup_push_save_in_order() {
    let h = Harness::new(common::settings(|_| {}), access(&["r1"]));
    let request = OperationRequest::Deploy {
        commands: vec!["interface Gi0/1".into(), " description uplink".into()],
        options: DeployOptions {
            backup_before: true,
            backup_after: true,
            save_after: true,
        },
    };

    let execution = h.service.run(ids(&["r1"]), request).await.unwrap();
    assert_eq!(execution.report.status, TaskStatus::Success);
    assert_eq!(
        h.connector.commands(&address("r1")),
        [
            COLLECT_CMD,
            "interface Gi0/1",
            " description uplink",
            SAVE_CMD,
            COLLECT_CMD
        ]
    );

    // Post-change text equals the pre-change one on the fake device
    let task = h.service.task(&execution.report.task_id).await.unwrap();
    let result = task.latest_result("r1").unwrap();
    assert!(matches!(
        result.backup,
        Some(BackupDisposition::DedupSkipped { .. })
    ));
    assert_eq!(h.backups.count_for("r1"), 1);
    let records = h.service.backups("r1", 10).await.unwrap();
    assert_eq!(records[0].backup_type, BackupType::PreChange);
}

#[tokio::test(start_paused = true)]
async fn test_failed_pre_change_backup_skips_push() {
    let h = Harness::new(common::settings(|_| {}), access(&["r1"]));
    h.backups.fail_next_saves(1);
    let request = OperationRequest::Deploy {
        commands: vec!["ntp server 10.0.0.1".into()],
        options: DeployOptions {
            backup_before: true,
            ..Default::default()
        },
    };

    let execution = h.service.run(ids(&["r1"]), request).await.unwrap();
    assert_eq!(execution.report.status, TaskStatus::Failed);
    assert_eq!(execution.report.summary.counts.storage_error, 1);
    assert_eq!(h.connector.commands(&address("r1")), [COLLECT_CMD]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_config_keeps_session_pooled() {
    let h = Harness::new(common::settings(|_| {}), access(&["r1"]));
    h.connector.script(&address("r1"), Behaviour::RejectConfig);
    let request = OperationRequest::Deploy {
        commands: vec!["bogus".into(), "never sent".into()],
        options: DeployOptions::default(),
    };

    let execution = h.service.run(ids(&["r1"]), request).await.unwrap();
    let task = h.service.task(&execution.report.task_id).await.unwrap();
    let result = task.latest_result("r1").unwrap();

    assert_eq!(result.outcome, DeviceOutcome::CommandError);
    assert!(result.error.as_deref().unwrap().contains("Invalid input"));
    assert_eq!(h.connector.commands(&address("r1")), ["bogus"]);
    assert_eq!(h.service.pool_stats().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_deploy_is_command_error() {
    let h = Harness::new(common::settings(|_| {}), access(&["r1"]));
    let request = OperationRequest::Deploy {
        commands: Vec::new(),
        options: DeployOptions::default(),
    };
    let report = h.service.run(ids(&["r1"]), request).await.unwrap().report;
    assert_eq!(report.summary.counts.command_error, 1);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_attaches_parsed_facts() {
    let h = Harness::new(common::settings(|_| {}), access(&["sw1"]));
    let execution = h
        .service
        .run(ids(&["sw1"]), OperationRequest::Discovery)
        .await
        .unwrap();
    let task = h.service.task(&execution.report.task_id).await.unwrap();
    let result = task.latest_result("sw1").unwrap();

    assert_eq!(result.outcome, DeviceOutcome::Ok);
    assert_eq!(
        result.facts.as_ref().unwrap()["version"],
        serde_json::json!("15.2(4)")
    );
}

#[tokio::test(start_paused = true)]
async fn test_sessions_are_reused_across_batches() {
    let h = Harness::new(common::settings(|_| {}), access(&["d1", "d2"]));
    h.service.run(ids(&["d1", "d2"]), backup()).await.unwrap();
    h.service.run(ids(&["d1", "d2"]), backup()).await.unwrap();

    assert_eq!(h.connector.connects(), 2);
    assert_eq!(h.service.pool_stats().reused, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_new_work() {
    let h = Harness::new(common::settings(|_| {}), access(&["d1"]));
    h.service.run(ids(&["d1"]), backup()).await.unwrap();
    h.service.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(h.connector.open_sessions(), 0);
    assert!(matches!(
        h.service.run(ids(&["d1"]), backup()).await,
        Err(NPError::ServiceUnavailable)
    ));
}
