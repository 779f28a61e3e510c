use crate::{
    backup::BackupEngine,
    pool::{ConnectionPool, PoolError, PooledSession},
};
use backoff::backoff::Backoff;
use chrono::Utc;
use netpilot_error::storage::StorageError;
use netpilot_models::{
    domain::prelude::{
        BackupDisposition, BackupType, CommandIntent, DeployOptions, Device, DeviceOutcome,
        DeviceResult, OperationKind, OperationRequest,
    },
    settings::ExecutorConfig,
    CommandCatalog, OutputParser,
};
use netpilot_sdk::{LoginCredential, SessionError};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, warn};

/// Why an exchange stopped short of success.
#[derive(Debug)]
enum ExchangeError {
    Session(SessionError),
    Storage(StorageError),
    /// Catalog has no commands for the platform/intent, or the request is empty
    Catalog(String),
}

impl From<SessionError> for ExchangeError {
    fn from(e: SessionError) -> Self {
        ExchangeError::Session(e)
    }
}

impl From<StorageError> for ExchangeError {
    fn from(e: StorageError) -> Self {
        ExchangeError::Storage(e)
    }
}

#[derive(Debug, Default)]
struct ExchangeOutput {
    payload: Option<String>,
    backup: Option<BackupDisposition>,
    facts: Option<serde_json::Value>,
}

/// Drives one device through one operation on a pooled session.
pub struct SessionRunner {
    pool: ConnectionPool,
    catalog: Arc<dyn CommandCatalog>,
    backups: Arc<BackupEngine>,
    parser: Option<Arc<dyn OutputParser>>,
    config: ExecutorConfig,
}

impl SessionRunner {
    pub fn new(
        pool: ConnectionPool,
        catalog: Arc<dyn CommandCatalog>,
        backups: Arc<BackupEngine>,
        parser: Option<Arc<dyn OutputParser>>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            pool,
            catalog,
            backups,
            parser,
            config,
        }
    }

    #[inline]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Overall bound of the protocol exchange, separate from the connect timeout.
    pub fn operation_timeout(&self, kind: OperationKind) -> Duration {
        Duration::from_millis(match kind {
            OperationKind::Collect => self.config.collect_timeout_ms,
            OperationKind::Push => self.config.push_timeout_ms,
            OperationKind::Probe => self.config.probe_timeout_ms,
        })
    }

    /// Run `request` on `device`. Never fails: every error becomes the result's outcome.
    ///
    /// The lease is released on success and on device-reported command errors,
    /// and discarded when the transport can no longer be trusted.
    #[instrument(name = "device-run", skip_all, fields(device_id = %device.id, attempt = attempt))]
    pub async fn run(
        &self,
        device: &Device,
        request: &OperationRequest,
        credential: &LoginCredential,
        attempt: u32,
    ) -> DeviceResult {
        let started_at = Utc::now();

        let mut lease = match self.acquire(device, credential).await {
            Ok(lease) => lease,
            Err(e) => {
                debug!(error = %e, "Session unavailable");
                return pool_failure(&device.id, e)
                    .with_attempt(attempt)
                    .with_started_at(started_at);
            }
        };

        let kind = request.kind().operation();
        let bound = self.operation_timeout(kind);
        let exchanged = timeout(bound, self.exchange(&mut lease, device, request)).await;

        let result = match exchanged {
            Ok(Ok(output)) => {
                lease.release().await;
                let mut result = DeviceResult::ok(device.id.as_str(), output.payload);
                result.backup = output.backup;
                result.facts = output.facts;
                result
            }
            Ok(Err(ExchangeError::Session(e))) => {
                if e.is_fatal() || !lease.is_usable() {
                    lease.discard().await;
                } else {
                    lease.release().await;
                }
                warn!(error = %e, "Device exchange failed");
                DeviceResult::from_session_error(device.id.as_str(), &e)
            }
            Ok(Err(ExchangeError::Storage(e))) => {
                lease.release().await;
                warn!(error = %e, "Backup persistence failed");
                DeviceResult::failed(device.id.as_str(), DeviceOutcome::StorageError, e.to_string())
            }
            Ok(Err(ExchangeError::Catalog(msg))) => {
                lease.release().await;
                DeviceResult::failed(device.id.as_str(), DeviceOutcome::CommandError, msg)
            }
            Err(_) => {
                // Transport state is unknown after an abandoned exchange
                lease.discard().await;
                warn!(timeout = ?bound, "Device exchange timed out");
                DeviceResult::failed(
                    device.id.as_str(),
                    DeviceOutcome::Timeout,
                    format!("operation exceeded {bound:?}"),
                )
            }
        };

        let mut result = result.with_attempt(attempt).with_started_at(started_at);
        result.finished_at = Utc::now();
        result
    }

    /// Pool acquisition with the configured retry policy for connection errors only.
    async fn acquire(
        &self,
        device: &Device,
        credential: &LoginCredential,
    ) -> Result<PooledSession, PoolError> {
        let target = device.target();
        let policy = self.config.connect_retry;
        let mut backoff = policy.backoff();
        let mut retries = 0;

        loop {
            match self.pool.acquire(&target, credential).await {
                Ok(lease) => return Ok(lease),
                Err(PoolError::Connect(e))
                    if is_retryable_connect(&e) && policy.permits(retries) =>
                {
                    let Some(delay) = backoff.next_backoff() else {
                        return Err(PoolError::Connect(e));
                    };
                    retries += 1;
                    debug!(error = %e, retries, ?delay, "Retrying session open");
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn commands(&self, device: &Device, intent: CommandIntent) -> Result<Vec<String>, ExchangeError> {
        self.catalog
            .commands_for(&device.platform, intent)
            .filter(|commands| !commands.is_empty())
            .ok_or_else(|| {
                ExchangeError::Catalog(format!(
                    "no {intent} commands for platform {}",
                    device.platform
                ))
            })
    }

    async fn run_all(
        lease: &mut PooledSession,
        commands: &[String],
    ) -> Result<String, ExchangeError> {
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            outputs.push(lease.execute(command).await?);
        }
        Ok(outputs.join("\n"))
    }

    async fn collect(
        &self,
        lease: &mut PooledSession,
        device: &Device,
    ) -> Result<String, ExchangeError> {
        let commands = self.commands(device, CommandIntent::CollectConfig)?;
        Self::run_all(lease, &commands).await
    }

    async fn collect_and_persist(
        &self,
        lease: &mut PooledSession,
        device: &Device,
        backup_type: BackupType,
    ) -> Result<(String, BackupDisposition), ExchangeError> {
        let text = self.collect(lease, device).await?;
        let outcome = self
            .backups
            .maybe_persist(&device.id, &text, backup_type)
            .await?;
        Ok((text, outcome.disposition()))
    }

    async fn exchange(
        &self,
        lease: &mut PooledSession,
        device: &Device,
        request: &OperationRequest,
    ) -> Result<ExchangeOutput, ExchangeError> {
        match request {
            OperationRequest::Backup { backup_type } => {
                let (text, disposition) =
                    self.collect_and_persist(lease, device, *backup_type).await?;
                Ok(ExchangeOutput {
                    payload: Some(text),
                    backup: Some(disposition),
                    facts: None,
                })
            }
            OperationRequest::Deploy { commands, options } => {
                self.deploy(lease, device, commands, options).await
            }
            OperationRequest::Discovery => {
                let commands = self
                    .commands(device, CommandIntent::Discover)
                    .or_else(|_| self.commands(device, CommandIntent::Probe))?;
                let output = Self::run_all(lease, &commands).await?;
                let facts = self
                    .parser
                    .as_ref()
                    .and_then(|parser| parser.parse(&device.platform, CommandIntent::Discover, &output));
                Ok(ExchangeOutput {
                    payload: Some(output),
                    backup: None,
                    facts,
                })
            }
        }
    }

    async fn deploy(
        &self,
        lease: &mut PooledSession,
        device: &Device,
        commands: &[String],
        options: &DeployOptions,
    ) -> Result<ExchangeOutput, ExchangeError> {
        if commands.is_empty() {
            return Err(ExchangeError::Catalog("deploy command list is empty".into()));
        }

        let mut backup = None;
        if options.backup_before {
            let (_, disposition) = self
                .collect_and_persist(lease, device, BackupType::PreChange)
                .await?;
            backup = Some(disposition);
        }

        let mut echo = lease.send_config(commands).await?;

        if options.save_after {
            let save = self.commands(device, CommandIntent::SaveConfig)?;
            let saved = Self::run_all(lease, &save).await?;
            if !saved.is_empty() {
                echo.push('\n');
                echo.push_str(&saved);
            }
        }

        if options.backup_after {
            let (_, disposition) = self
                .collect_and_persist(lease, device, BackupType::PostChange)
                .await?;
            backup = Some(disposition);
        }

        Ok(ExchangeOutput {
            payload: Some(echo),
            backup,
            facts: None,
        })
    }
}

#[inline]
fn is_retryable_connect(e: &SessionError) -> bool {
    matches!(
        e,
        SessionError::Connection(_) | SessionError::Transport(_) | SessionError::Timeout(_)
    )
}

fn pool_failure(device_id: &str, e: PoolError) -> DeviceResult {
    match e {
        PoolError::Connect(e) => DeviceResult::from_session_error(device_id, &e),
        other => DeviceResult::failed(device_id, DeviceOutcome::ConnectionError, other.to_string()),
    }
}
