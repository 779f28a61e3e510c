use crate::{
    backup::BackupEngine,
    gate::{CredentialGate, OtpCache},
    orchestrator::{BatchOrchestrator, ExecutionReport},
    pool::{ConnectionPool, PoolStats},
    progress::ProgressHub,
    runner::SessionRunner,
    task::{TaskHandle, TaskRegistry},
};
use netpilot_error::{NPError, NPResult};
use netpilot_models::{
    domain::prelude::{
        AutomationTask, BackupRecord, Device, DeviceGroup, DeviceId, OperationRequest, OtpBucket,
        TaskId, TaskReport,
    },
    settings::Settings,
    BackupRepository, CommandCatalog, CredentialStore, DeviceInventory, OutputParser,
};
use netpilot_sdk::SessionConnector;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, instrument, warn};

/// External systems the executor talks to.
pub struct Collaborators {
    pub inventory: Arc<dyn DeviceInventory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub catalog: Arc<dyn CommandCatalog>,
    pub backups: Arc<dyn BackupRepository>,
    pub connector: Arc<dyn SessionConnector>,
    pub otp_cache: OtpCache,
    pub parser: Option<Arc<dyn OutputParser>>,
}

struct ServiceInner {
    inventory: Arc<dyn DeviceInventory>,
    registry: TaskRegistry,
    orchestrator: BatchOrchestrator,
    gate: Arc<CredentialGate>,
    backups: Arc<BackupEngine>,
    pool: ConnectionPool,
    hub: ProgressHub,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Entry point of the automation executor.
///
/// Cheap to clone; all clones share one pool, one task registry and one OTP
/// cache view.
#[derive(Clone)]
pub struct AutomationService {
    inner: Arc<ServiceInner>,
}

impl AutomationService {
    /// Wire the executor from settings.
    ///
    /// Must be called inside a Tokio runtime: the pool reaper is spawned here.
    pub fn new(settings: &Settings, collaborators: Collaborators) -> Self {
        let Collaborators {
            inventory,
            credentials,
            catalog,
            backups,
            connector,
            otp_cache,
            parser,
        } = collaborators;

        let shutdown = CancellationToken::new();
        let pool = ConnectionPool::new(settings.pool, settings.connection, connector);
        let backups = Arc::new(BackupEngine::new(backups, settings.backup.clone()));
        let gate = Arc::new(CredentialGate::new(
            credentials,
            otp_cache,
            settings.otp.clone(),
        ));
        let runner = Arc::new(SessionRunner::new(
            pool.clone(),
            catalog,
            Arc::clone(&backups),
            parser,
            settings.executor,
        ));
        let hub = ProgressHub::default();
        let orchestrator = BatchOrchestrator::new(
            runner,
            Arc::clone(&gate),
            hub.clone(),
            settings.executor.fan_out,
        );
        let reaper = pool.spawn_reaper(shutdown.child_token());

        info!(
            max_connections = pool.max_connections(),
            concurrency = orchestrator.concurrency(),
            "Automation service ready"
        );

        Self {
            inner: Arc::new(ServiceInner {
                inventory,
                registry: TaskRegistry::new(shutdown.clone()),
                orchestrator,
                gate,
                backups,
                pool,
                hub,
                shutdown,
                tracker: TaskTracker::new(),
                reaper: Mutex::new(Some(reaper)),
            }),
        }
    }

    fn ensure_running(&self) -> NPResult<()> {
        if self.inner.shutdown.is_cancelled() {
            Err(NPError::ServiceUnavailable)
        } else {
            Ok(())
        }
    }

    /// Look up every id; unknown ids fail the whole call. Duplicates are dropped.
    async fn load_devices(&self, device_ids: &[DeviceId]) -> NPResult<Vec<Device>> {
        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(device_ids.len());
        for id in device_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let device = self
                .inner
                .inventory
                .get_device(id)
                .await?
                .ok_or_else(|| NPError::DeviceNotFound(id.clone()))?;
            devices.push(device);
        }
        Ok(devices)
    }

    async fn prepare(
        &self,
        device_ids: Vec<DeviceId>,
        request: OperationRequest,
    ) -> NPResult<(Arc<TaskHandle>, Vec<Device>)> {
        self.ensure_running()?;
        let devices = self.load_devices(&device_ids).await?;
        let ids = devices.iter().map(|d| d.id.clone()).collect();
        let handle = self.inner.registry.create(request, ids);
        info!(task_id = %handle.id(), devices = devices.len(), "Task submitted");
        Ok((handle, devices))
    }

    /// Create a task and run it in the background.
    pub async fn submit(
        &self,
        device_ids: Vec<DeviceId>,
        request: OperationRequest,
    ) -> NPResult<TaskId> {
        let (handle, devices) = self.prepare(device_ids, request).await?;
        let task_id = handle.id().to_string();

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            let id = handle.id().to_string();
            if let Err(e) = inner.orchestrator.execute(handle, devices).await {
                error!(task_id = %id, error = %e, "Task execution failed");
            }
        });
        Ok(task_id)
    }

    /// Create a task and run its first attempt to completion.
    pub async fn run(
        &self,
        device_ids: Vec<DeviceId>,
        request: OperationRequest,
    ) -> NPResult<ExecutionReport> {
        let (handle, devices) = self.prepare(device_ids, request).await?;
        self.inner.orchestrator.execute(handle, devices).await
    }

    pub async fn status(&self, task_id: &str) -> NPResult<TaskReport> {
        Ok(self.inner.registry.get(task_id)?.report().await)
    }

    /// Full task state including every recorded device result.
    pub async fn task(&self, task_id: &str) -> NPResult<AutomationTask> {
        Ok(self.inner.registry.get(task_id)?.snapshot().await)
    }

    /// Wait until the task's current attempt is done.
    pub async fn wait(&self, task_id: &str) -> NPResult<TaskReport> {
        Ok(self.inner.registry.get(task_id)?.wait_settled().await)
    }

    /// Live reports of a task. The stream ends once the task is terminal.
    pub fn subscribe(&self, task_id: &str) -> NPResult<broadcast::Receiver<TaskReport>> {
        let handle = self.inner.registry.get(task_id)?;
        Ok(self.inner.hub.subscribe(handle.id()))
    }

    pub async fn cancel(&self, task_id: &str) -> NPResult<TaskReport> {
        let handle = self.inner.registry.get(task_id)?;
        let report = handle.cancel().await;
        info!(task_id, status = ?report.status, "Task cancellation requested");
        if report.status.is_terminal() {
            self.inner.hub.publish(&report);
            self.inner.hub.close(task_id);
        }
        Ok(report)
    }

    /// Cache an operator-supplied OTP for `(department, group)`.
    pub async fn supply_otp(
        &self,
        department: &str,
        group: DeviceGroup,
        code: &str,
    ) -> NPResult<()> {
        self.inner.gate.supply_otp(department, group, code).await?;
        Ok(())
    }

    /// Drop the cached OTP of `(department, group)` before it expires.
    ///
    /// Returns whether a code was cached. Later submissions for the bucket
    /// pause again until a new code is supplied.
    pub async fn revoke_otp(&self, department: &str, group: DeviceGroup) -> NPResult<bool> {
        let revoked = self
            .inner
            .gate
            .invalidate(&OtpBucket::new(department, group))
            .await?;
        if revoked {
            info!(department, group = %group, "OTP revoked");
        }
        Ok(revoked)
    }

    /// Re-run the devices of `task_id` that are waiting for an OTP.
    ///
    /// `device_ids` must be a subset of the pending set; an empty list resumes
    /// all of them. Results are appended to the same task.
    #[instrument(name = "task-resume", skip_all, fields(task_id = %task_id))]
    pub async fn resume(
        &self,
        task_id: &str,
        device_ids: Vec<DeviceId>,
    ) -> NPResult<ExecutionReport> {
        self.ensure_running()?;
        let handle = self.inner.registry.get(task_id)?;
        let report = handle.report().await;
        if report.status.is_terminal() {
            return Err(NPError::InvalidStateError(format!(
                "task {task_id} is already {:?}",
                report.status
            )));
        }

        let pending = handle.pending_otp().await;
        if pending.is_empty() {
            return Err(NPError::InvalidResume(format!(
                "task {task_id} has no devices awaiting OTP"
            )));
        }

        let ids: Vec<DeviceId> = if device_ids.is_empty() {
            pending.into_iter().collect()
        } else {
            if let Some(stray) = device_ids.iter().find(|id| !pending.contains(*id)) {
                return Err(NPError::InvalidResume(format!(
                    "device {stray} is not awaiting OTP in task {task_id}"
                )));
            }
            device_ids
        };

        let devices = self.load_devices(&ids).await?;
        info!(devices = devices.len(), "Resuming devices after OTP");
        self.inner.orchestrator.execute(handle, devices).await
    }

    /// Unified diff between two stored backups.
    pub async fn diff(&self, old_backup_id: &str, new_backup_id: &str) -> NPResult<String> {
        self.inner.backups.diff(old_backup_id, new_backup_id).await
    }

    /// Backup history of a device, newest first.
    pub async fn backups(&self, device_id: &str, limit: usize) -> NPResult<Vec<BackupRecord>> {
        Ok(self
            .inner
            .backups
            .repository()
            .list_backups(device_id, limit)
            .await?)
    }

    #[inline]
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub async fn purge_finished(&self, older_than: chrono::Duration) -> usize {
        self.inner.registry.purge_finished(older_than).await
    }

    /// Stop accepting work, cancel running tasks and close the pool.
    ///
    /// Devices already dispatched get up to `grace` to finish.
    pub async fn shutdown(&self, grace: Duration) -> NPResult<()> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Ok(());
        }
        info!("Shutting down automation service");
        inner.shutdown.cancel();

        inner.tracker.close();
        if timeout(grace, inner.tracker.wait()).await.is_err() {
            warn!(?grace, "Some tasks did not finish within the grace period");
        }

        inner.pool.close_all().await;

        let reaper = inner
            .reaper
            .lock()
            .map_err(|_| NPError::ShutdownError("reaper handle poisoned".into()))?
            .take();
        if let Some(reaper) = reaper {
            reaper.await?;
        }
        info!("Automation service stopped");
        Ok(())
    }
}
