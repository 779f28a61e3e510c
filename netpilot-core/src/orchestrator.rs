use crate::{
    gate::CredentialGate,
    progress::ProgressHub,
    runner::SessionRunner,
    task::TaskHandle,
};
use futures::FutureExt;
use netpilot_error::NPResult;
use netpilot_models::domain::prelude::{
    Device, DeviceId, DeviceOutcome, DeviceResult, OtpBucket, OtpRequiredSignal, TaskReport,
    TaskStatus,
};
use netpilot_sdk::LoginCredential;
use serde::Serialize;
use std::{collections::HashSet, panic::AssertUnwindSafe, sync::Arc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// What one attempt produced. `otp_required` is set only when the task paused
/// because some buckets need a code.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub report: TaskReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_required: Option<OtpRequiredSignal>,
}

/// Fans a device list out to session runners under a concurrency cap.
pub struct BatchOrchestrator {
    runner: Arc<SessionRunner>,
    gate: Arc<CredentialGate>,
    hub: ProgressHub,
    fan_out: usize,
}

impl BatchOrchestrator {
    pub fn new(
        runner: Arc<SessionRunner>,
        gate: Arc<CredentialGate>,
        hub: ProgressHub,
        fan_out: usize,
    ) -> Self {
        Self {
            runner,
            gate,
            hub,
            fan_out,
        }
    }

    /// In-flight device bound: the smaller of the fan-out and the pool size.
    #[inline]
    pub fn concurrency(&self) -> usize {
        self.fan_out
            .min(self.runner.pool().max_connections())
            .max(1)
    }

    /// Run one attempt of `task` over `devices`.
    ///
    /// Credentials are resolved once for the whole list. Devices blocked on OTP
    /// are recorded as `otp_required` and never dispatched; every other device
    /// runs to a terminal result, whatever happens to its neighbours. After
    /// cancellation is observed no further device is dispatched and the rest
    /// are recorded as `cancelled`.
    #[instrument(name = "batch-execute", skip_all, fields(task_id = %task.id(), devices = devices.len()))]
    pub async fn execute(
        &self,
        task: Arc<TaskHandle>,
        devices: Vec<Device>,
    ) -> NPResult<ExecutionReport> {
        let attempt = task.begin_attempt().await?;
        self.hub.publish(&task.report().await);
        info!(attempt, "Batch attempt started");

        let resolution = self.gate.resolve_batch(devices).await;

        for result in resolution.failed {
            self.record(&task, result.with_attempt(attempt)).await;
        }
        for pending in &resolution.pending {
            let bucket: OtpBucket = pending.bucket();
            for device_id in &pending.failed_devices {
                let result = DeviceResult::otp_required(device_id.as_str(), bucket.clone())
                    .with_attempt(attempt);
                self.record(&task, result).await;
            }
        }

        self.dispatch(&task, resolution.resolved, attempt).await;

        let report = task.finish_attempt().await;
        self.hub.publish(&report);
        if report.status.is_terminal() {
            self.hub.close(task.id());
        }

        let otp_required = (report.status == TaskStatus::AwaitingOtp).then(|| OtpRequiredSignal {
            task_id: report.task_id.clone(),
            pending: report.summary.otp_pending.clone(),
        });
        info!(
            status = ?report.status,
            progress = report.progress_percent,
            failed = report.summary.failed_devices.len(),
            "Batch attempt finished"
        );
        Ok(ExecutionReport {
            report,
            otp_required,
        })
    }

    async fn dispatch(
        &self,
        task: &Arc<TaskHandle>,
        resolved: Vec<(Device, LoginCredential)>,
        attempt: u32,
    ) {
        let limit = self.concurrency();
        let request = Arc::new(task.snapshot().await.request);
        let token = task.cancel_token().clone();

        let mut queue = resolved.into_iter();
        let mut in_flight: HashSet<DeviceId> = HashSet::new();
        let mut workers = JoinSet::new();

        loop {
            while workers.len() < limit && !token.is_cancelled() {
                let Some((device, credential)) = queue.next() else {
                    break;
                };
                in_flight.insert(device.id.clone());

                let runner = Arc::clone(&self.runner);
                let request = Arc::clone(&request);
                workers.spawn(async move {
                    let run = runner.run(&device, &request, &credential, attempt);
                    match AssertUnwindSafe(run).catch_unwind().await {
                        Ok(result) => result,
                        Err(_) => {
                            error!(device_id = %device.id, "Device worker panicked");
                            DeviceResult::failed(
                                device.id.as_str(),
                                DeviceOutcome::CommandError,
                                "device worker panicked",
                            )
                            .with_attempt(attempt)
                        }
                    }
                });
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            match joined {
                Ok(result) => {
                    in_flight.remove(&result.device_id);
                    debug!(device_id = %result.device_id, outcome = ?result.outcome, "Device finished");
                    self.record(task, result).await;
                }
                Err(e) => error!(error = %e, "Device worker aborted"),
            }
        }

        for device_id in in_flight {
            let result = DeviceResult::failed(
                device_id,
                DeviceOutcome::CommandError,
                "device worker aborted",
            )
            .with_attempt(attempt);
            self.record(task, result).await;
        }

        let skipped: Vec<_> = queue.collect();
        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), "Task cancelled, remaining devices not dispatched");
            for (device, _) in skipped {
                self.record(task, DeviceResult::cancelled(device.id).with_attempt(attempt))
                    .await;
            }
        }
    }

    #[inline]
    async fn record(&self, task: &TaskHandle, result: DeviceResult) {
        let report = task.record(result).await;
        self.hub.publish(&report);
    }
}
