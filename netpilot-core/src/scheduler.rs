use crate::service::AutomationService;
use netpilot_models::{domain::prelude::OperationRequest, settings::BackupSchedule};
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

/// Periodic backup submissions, one loop per configured schedule.
///
/// Ticks missed while a run is still going are skipped, so batches never stack.
pub struct BackupScheduler {
    service: AutomationService,
    schedules: Vec<BackupSchedule>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackupScheduler {
    pub fn new(service: AutomationService, schedules: Vec<BackupSchedule>) -> Self {
        Self {
            service,
            schedules,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawn every schedule loop. Schedules without devices or with a zero
    /// interval are skipped. Calling `start` twice is a no-op; calling it
    /// after `stop` starts fresh loops.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        for (idx, schedule) in self.schedules.iter().enumerate() {
            if schedule.device_ids.is_empty() || schedule.interval_secs == 0 {
                warn!(schedule = %schedule.name, "Skipping empty backup schedule");
                continue;
            }
            let period = Duration::from_secs(schedule.interval_secs);
            let handle = tokio::spawn(
                run_schedule(
                    self.service.clone(),
                    schedule.clone(),
                    period,
                    jitter(idx, period),
                    self.cancel.child_token(),
                )
                .in_current_span(),
            );
            self.handles.push(handle);
        }
        info!(loops = self.handles.len(), "Backup scheduler started");
    }

    /// Stop every loop and wait for in-flight submissions to return.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Backup schedule loop failed");
            }
        }
        info!("Backup scheduler stopped");
    }
}

/// Spread start times of schedules sharing a period.
#[inline]
fn jitter(idx: usize, period: Duration) -> Duration {
    let window = (period.as_millis() / 10).max(1) as u64;
    Duration::from_millis((idx as u64 * 37) % window)
}

#[instrument(name = "backup-schedule", skip_all, fields(schedule = %schedule.name))]
async fn run_schedule(
    service: AutomationService,
    schedule: BackupSchedule,
    period: Duration,
    jitter: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period + jitter, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let request = OperationRequest::Backup {
        backup_type: schedule.backup_type,
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        debug!(devices = schedule.device_ids.len(), "Scheduled backup due");
        match service.run(schedule.device_ids.clone(), request.clone()).await {
            Ok(execution) => {
                if let Some(signal) = &execution.otp_required {
                    warn!(
                        task_id = %signal.task_id,
                        buckets = signal.pending.len(),
                        "Scheduled backup is waiting for OTP"
                    );
                }
                info!(
                    task_id = %execution.report.task_id,
                    status = ?execution.report.status,
                    persisted = execution.report.summary.persisted,
                    dedup_skipped = execution.report.summary.dedup_skipped,
                    "Scheduled backup finished"
                );
            }
            Err(e) => error!(error = %e, "Scheduled backup submission failed"),
        }
    }
    debug!("Backup schedule loop exited");
}
