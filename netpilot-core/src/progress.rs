//! Task progress derivation and per-task report broadcasting.
//!
//! Every figure is computed from each device's latest result, so a resumed
//! attempt replaces a device's `otp_required` entry in the counts while the
//! result history stays append-only.

use chrono::Utc;
use dashmap::DashMap;
use netpilot_models::domain::prelude::{
    AutomationTask, DeviceId, DeviceOutcome, DeviceResult, OtpBucket, OtpPending, OutcomeCounts,
    TaskId, TaskReport, TaskStatus, TaskSummary,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::broadcast;

/// Running aggregate of a task, updated once per recorded result.
///
/// Device lists come out in submission order. Results for devices outside
/// the target set only count towards the backup figures.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    device_ids: Vec<DeviceId>,
    positions: HashMap<DeviceId, usize>,
    /// Latest outcome per target position
    latest: Vec<Option<(DeviceOutcome, Option<OtpBucket>)>>,
    counts: OutcomeCounts,
    persisted: usize,
    dedup_skipped: usize,
    failed: BTreeSet<usize>,
    otp: BTreeMap<OtpBucket, BTreeSet<usize>>,
}

impl Tally {
    pub fn new(device_ids: &[DeviceId]) -> Self {
        let mut positions = HashMap::with_capacity(device_ids.len());
        for (pos, id) in device_ids.iter().enumerate() {
            positions.entry(id.clone()).or_insert(pos);
        }
        Self {
            device_ids: device_ids.to_vec(),
            positions,
            latest: vec![None; device_ids.len()],
            counts: OutcomeCounts {
                pending: device_ids.len(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Rebuild from a task's full history.
    pub fn from_task(task: &AutomationTask) -> Self {
        let mut tally = Self::new(&task.device_ids);
        for result in &task.results {
            tally.apply(result);
        }
        tally
    }

    pub fn apply(&mut self, result: &DeviceResult) {
        match &result.backup {
            Some(disposition) if disposition.is_persisted() => self.persisted += 1,
            Some(_) => self.dedup_skipped += 1,
            None => {}
        }

        let Some(&pos) = self.positions.get(&result.device_id) else {
            return;
        };
        match self.latest[pos].take() {
            Some((outcome, bucket)) => {
                self.counts.forget(outcome);
                self.failed.remove(&pos);
                if let Some(bucket) = bucket {
                    if let Some(devices) = self.otp.get_mut(&bucket) {
                        devices.remove(&pos);
                        if devices.is_empty() {
                            self.otp.remove(&bucket);
                        }
                    }
                }
            }
            None => self.counts.pending -= 1,
        }

        self.counts.record(result.outcome);
        let bucket = match result.outcome {
            DeviceOutcome::Ok | DeviceOutcome::Cancelled => None,
            DeviceOutcome::OtpRequired => result.otp_bucket.clone().inspect(|bucket| {
                self.otp.entry(bucket.clone()).or_default().insert(pos);
            }),
            _ => {
                self.failed.insert(pos);
                None
            }
        };
        self.latest[pos] = Some((result.outcome, bucket));
    }

    /// Targets whose latest result is `otp_required`.
    pub fn pending_otp(&self) -> BTreeSet<DeviceId> {
        self.latest
            .iter()
            .enumerate()
            .filter(|(_, latest)| {
                latest
                    .as_ref()
                    .is_some_and(|(outcome, _)| *outcome == DeviceOutcome::OtpRequired)
            })
            .map(|(pos, _)| self.device_ids[pos].clone())
            .collect()
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            total: self.device_ids.len(),
            counts: self.counts,
            persisted: self.persisted,
            dedup_skipped: self.dedup_skipped,
            failed_devices: self.ids(&self.failed),
            otp_pending: self
                .otp
                .iter()
                .map(|(bucket, devices)| OtpPending {
                    department: bucket.department.clone(),
                    device_group: bucket.device_group,
                    failed_devices: self.ids(devices),
                })
                .collect(),
        }
    }

    fn ids(&self, positions: &BTreeSet<usize>) -> Vec<DeviceId> {
        positions
            .iter()
            .map(|&pos| self.device_ids[pos].clone())
            .collect()
    }
}

/// Percentage of devices whose latest result is terminal, rounded down.
pub fn progress_percent(summary: &TaskSummary) -> u8 {
    if summary.total == 0 {
        return 100;
    }
    let c = &summary.counts;
    let done = c.ok + c.failed() + c.cancelled;
    ((done * 100) / summary.total).min(100) as u8
}

/// Status once no device of the task is running.
pub fn settle(summary: &TaskSummary, cancelled: bool) -> TaskStatus {
    let c = &summary.counts;
    if cancelled {
        TaskStatus::Cancelled
    } else if c.otp_required > 0 || !summary.otp_pending.is_empty() {
        TaskStatus::AwaitingOtp
    } else if c.pending > 0 {
        TaskStatus::Progress
    } else if c.ok == summary.total {
        TaskStatus::Success
    } else if c.ok == 0 {
        TaskStatus::Failed
    } else {
        TaskStatus::Partial
    }
}

/// Snapshot of `task` for the polling interface.
pub fn report(task: &AutomationTask, tally: &Tally) -> TaskReport {
    let summary = tally.summary();
    TaskReport {
        task_id: task.id.clone(),
        kind: task.kind,
        status: task.status,
        progress_percent: progress_percent(&summary),
        summary,
        updated_at: Utc::now(),
    }
}

/// Per-task report fan-out for live subscribers.
///
/// Each task id has its own `broadcast` channel, created lazily. Lagging
/// receivers skip reports instead of slowing the batch down.
#[derive(Clone)]
pub struct ProgressHub {
    channels: Arc<DashMap<TaskId, broadcast::Sender<TaskReport>>>,
    capacity: usize,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<TaskReport> {
        self.channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .value()
            .subscribe()
    }

    /// Best effort: reports without subscribers are dropped.
    pub fn publish(&self, report: &TaskReport) {
        if let Some(tx) = self.channels.get(&report.task_id) {
            let _ = tx.send(report.clone());
        }
    }

    /// Drop the channel of a finished task; receivers see the stream end.
    pub fn close(&self, task_id: &str) {
        self.channels.remove(task_id);
    }
}
