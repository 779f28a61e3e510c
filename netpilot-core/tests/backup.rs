mod common;

use common::{address, device, ids, Harness, COLLECT_CMD};
use netpilot_core::BackupScheduler;
use netpilot_error::NPError;
use netpilot_models::{
    domain::prelude::{BackupType, Device, DeviceGroup, OperationRequest, TaskStatus},
    settings::BackupSchedule,
};
use std::time::Duration;

fn backup() -> OperationRequest {
    OperationRequest::Backup {
        backup_type: BackupType::Manual,
    }
}

fn core(names: &[&str]) -> Vec<Device> {
    names.iter().map(|n| device(n, DeviceGroup::Core)).collect()
}

fn config(hostname: &str, description: &str) -> String {
    format!("hostname {hostname}\ninterface Gi0/1\n description {description}\n!\nend\n")
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_devices_are_dedup_skipped() {
    let names = ["device1", "device2", "device3"];
    let h = Harness::new(common::settings(|_| {}), core(&names));
    for name in names {
        h.connector.set_config(&address(name), &config(name, "uplink"));
    }
    let first = h.service.run(ids(&names), backup()).await.unwrap();
    assert_eq!(first.report.summary.persisted, 3);

    h.connector
        .set_config(&address("device3"), &config("device3", "core-uplink"));
    let second = h.service.run(ids(&names), backup()).await.unwrap();
    let summary = &second.report.summary;

    assert_eq!(second.report.status, TaskStatus::Success);
    assert_eq!(summary.counts.ok, 3);
    assert_eq!(summary.persisted, 1);
    assert_eq!(summary.dedup_skipped, 2);
    assert_eq!(h.backups.count_for("device1"), 1);
    assert_eq!(h.backups.count_for("device3"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_diff_of_stored_pair_is_stable() {
    let h = Harness::new(common::settings(|_| {}), core(&["r1"]));
    h.connector.set_config(&address("r1"), &config("r1", "uplink"));
    h.service.run(ids(&["r1"]), backup()).await.unwrap();
    h.connector.set_config(&address("r1"), &config("r1", "core-uplink"));
    h.service.run(ids(&["r1"]), backup()).await.unwrap();

    let records = h.service.backups("r1", 10).await.unwrap();
    assert_eq!(records.len(), 2);
    let (new, old) = (&records[0], &records[1]);

    let first = h.service.diff(&old.id, &new.id).await.unwrap();
    let second = h.service.diff(&old.id, &new.id).await.unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert!(first.contains("- description uplink\n"));
    assert!(first.contains("+ description core-uplink\n"));
    assert!(first.contains(&old.id));
    assert!(first.contains(&new.id));

    assert!(matches!(
        h.service.diff(&old.id, "missing").await,
        Err(NPError::StorageError(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_ignored_lines_do_not_create_backups() {
    let h = Harness::new(
        common::settings(|s| {
            s.backup.ignore_line_prefixes = vec!["! Last configuration change".into()]
        }),
        core(&["r1"]),
    );
    let body = config("r1", "uplink");
    h.connector.set_config(
        &address("r1"),
        &format!("! Last configuration change at 10:00\n{body}"),
    );
    h.service.run(ids(&["r1"]), backup()).await.unwrap();

    h.connector.set_config(
        &address("r1"),
        &format!("! Last configuration change at 11:30\r\n{}", body.replace('\n', "\r\n")),
    );
    let second = h.service.run(ids(&["r1"]), backup()).await.unwrap();

    assert_eq!(second.report.summary.dedup_skipped, 1);
    assert_eq!(h.backups.count_for("r1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_is_device_outcome() {
    let h = Harness::new(common::settings(|_| {}), core(&["r1", "r2"]));
    h.backups.fail_next_saves(1);

    let report = h
        .service
        .run(ids(&["r1", "r2"]), backup())
        .await
        .unwrap()
        .report;
    assert_eq!(report.status, TaskStatus::Partial);
    assert_eq!(report.summary.counts.storage_error, 1);
    assert_eq!(report.summary.counts.ok, 1);
    assert_eq!(h.backups.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_past_max_idle_is_replaced() {
    let h = Harness::new(
        common::settings(|s| {
            s.pool.max_idle_secs = 300;
            s.pool.reap_interval_secs = 3600;
        }),
        core(&["device7"]),
    );
    h.service.run(ids(&["device7"]), backup()).await.unwrap();
    assert_eq!(h.connector.connects(), 1);

    tokio::time::advance(Duration::from_secs(400)).await;
    h.service.run(ids(&["device7"]), backup()).await.unwrap();

    assert_eq!(h.connector.connects(), 2);
    assert_eq!(h.connector.open_sessions(), 1);
    let stats = h.service.pool_stats();
    assert_eq!(stats.reused, 0);
    assert_eq!(stats.discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_past_max_age_is_never_reused() {
    let h = Harness::new(
        common::settings(|s| {
            s.pool.max_age_secs = 100;
            s.pool.max_idle_secs = 300;
            s.pool.reap_interval_secs = 3600;
        }),
        core(&["r1"]),
    );
    h.service.run(ids(&["r1"]), backup()).await.unwrap();
    tokio::time::advance(Duration::from_secs(50)).await;
    h.service.run(ids(&["r1"]), backup()).await.unwrap();
    assert_eq!(h.service.pool_stats().reused, 1);

    tokio::time::advance(Duration::from_secs(60)).await;
    h.service.run(ids(&["r1"]), backup()).await.unwrap();
    assert_eq!(h.connector.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_submits_periodic_backups() {
    let h = Harness::new(common::settings(|_| {}), core(&["r1"]));
    h.connector.set_config(&address("r1"), &config("r1", "uplink"));

    let mut scheduler = BackupScheduler::new(
        h.service.clone(),
        vec![BackupSchedule {
            name: "nightly".into(),
            interval_secs: 60,
            device_ids: ids(&["r1"]),
            backup_type: BackupType::Scheduled,
        }],
    );
    scheduler.start();
    assert!(scheduler.is_running());

    tokio::time::sleep(Duration::from_secs(130)).await;
    assert_eq!(h.connector.commands(&address("r1")), [COLLECT_CMD, COLLECT_CMD]);
    assert_eq!(h.backups.count_for("r1"), 1);

    h.connector.set_config(&address("r1"), &config("r1", "core-uplink"));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.backups.count_for("r1"), 2);

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    let records = h.service.backups("r1", 1).await.unwrap();
    assert_eq!(records[0].backup_type, BackupType::Scheduled);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_restarts_after_stop() {
    let h = Harness::new(common::settings(|_| {}), core(&["r1"]));
    h.connector.set_config(&address("r1"), &config("r1", "uplink"));

    let mut scheduler = BackupScheduler::new(
        h.service.clone(),
        vec![BackupSchedule {
            name: "hourly".into(),
            interval_secs: 60,
            device_ids: ids(&["r1"]),
            backup_type: BackupType::Scheduled,
        }],
    );
    scheduler.start();
    scheduler.stop().await;
    assert!(h.connector.commands(&address("r1")).is_empty());

    scheduler.start();
    assert!(scheduler.is_running());
    tokio::time::sleep(Duration::from_secs(70)).await;
    assert_eq!(h.connector.commands(&address("r1")), [COLLECT_CMD]);
    assert_eq!(h.backups.count_for("r1"), 1);
    scheduler.stop().await;
}
