use super::{
    backup::{BackupDisposition, BackupType},
    device::DeviceId,
    otp::{OtpBucket, OtpPending},
};
use chrono::{DateTime, Utc};
use netpilot_sdk::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Backup,
    Deploy,
    Discovery,
}

/// Protocol-level operation a session runner performs on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Collect,
    Push,
    Probe,
}

impl TaskKind {
    #[inline]
    pub fn operation(&self) -> OperationKind {
        match self {
            Self::Backup => OperationKind::Collect,
            Self::Deploy => OperationKind::Push,
            Self::Discovery => OperationKind::Probe,
        }
    }
}

/// Catalog lookup intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandIntent {
    CollectConfig,
    SaveConfig,
    Discover,
    Probe,
}

impl fmt::Display for CommandIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CollectConfig => "collect_config",
            Self::SaveConfig => "save_config",
            Self::Discover => "discover",
            Self::Probe => "probe",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Persist a `pre_change` backup before pushing; failure skips the push
    #[serde(default)]
    pub backup_before: bool,
    /// Persist a `post_change` backup after a successful push
    #[serde(default)]
    pub backup_after: bool,
    /// Run the platform's save-config commands after a successful push
    #[serde(default)]
    pub save_after: bool,
}

/// What a batch submission asks every device to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationRequest {
    Backup {
        #[serde(default)]
        backup_type: BackupType,
    },
    Deploy {
        commands: Vec<String>,
        #[serde(default)]
        options: DeployOptions,
    },
    Discovery,
}

impl OperationRequest {
    #[inline]
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Backup { .. } => TaskKind::Backup,
            Self::Deploy { .. } => TaskKind::Deploy,
            Self::Discovery => TaskKind::Discovery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Progress,
    Success,
    Failed,
    /// Terminal, some devices need operator follow-up
    Partial,
    Cancelled,
    /// Paused until the operator supplies OTP codes and resumes
    AwaitingOtp,
}

impl TaskStatus {
    /// Terminal tasks are never reopened.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Partial | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOutcome {
    Ok,
    ConnectionError,
    AuthError,
    Timeout,
    CommandError,
    StorageError,
    OtpRequired,
    Cancelled,
}

impl DeviceOutcome {
    /// Every outcome except `otp_required` is final for the attempt.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::OtpRequired)
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<&SessionError> for DeviceOutcome {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Connection(_) | SessionError::Transport(_) | SessionError::Closed => {
                DeviceOutcome::ConnectionError
            }
            SessionError::Auth(_) => DeviceOutcome::AuthError,
            SessionError::Timeout(_) => DeviceOutcome::Timeout,
            SessionError::Command { .. } | SessionError::Protocol(_) => DeviceOutcome::CommandError,
        }
    }
}

/// Outcome of one device in one task attempt. Never mutated after it is recorded;
/// a resumed attempt appends a new result with a higher `attempt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceResult {
    pub device_id: DeviceId,
    pub attempt: u32,
    pub outcome: DeviceOutcome,
    /// Collected text or command echo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupDisposition>,
    /// Structured facts produced by an output parser, if one is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facts: Option<serde_json::Value>,
    /// Set when `outcome == otp_required`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_bucket: Option<OtpBucket>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeviceResult {
    pub fn new(device_id: impl Into<DeviceId>, outcome: DeviceOutcome) -> Self {
        let now = Utc::now();
        Self {
            device_id: device_id.into(),
            attempt: 1,
            outcome,
            payload: None,
            error: None,
            backup: None,
            facts: None,
            otp_bucket: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn ok(device_id: impl Into<DeviceId>, payload: Option<String>) -> Self {
        let mut result = Self::new(device_id, DeviceOutcome::Ok);
        result.payload = payload;
        result
    }

    pub fn failed(
        device_id: impl Into<DeviceId>,
        outcome: DeviceOutcome,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(device_id, outcome);
        result.error = Some(error.into());
        result
    }

    pub fn from_session_error(device_id: impl Into<DeviceId>, err: &SessionError) -> Self {
        Self::failed(device_id, DeviceOutcome::from(err), err.to_string())
    }

    pub fn otp_required(device_id: impl Into<DeviceId>, bucket: OtpBucket) -> Self {
        let mut result = Self::new(device_id, DeviceOutcome::OtpRequired);
        result.error = Some(format!("no valid OTP cached for {bucket}"));
        result.otp_bucket = Some(bucket);
        result
    }

    pub fn cancelled(device_id: impl Into<DeviceId>) -> Self {
        Self::failed(
            device_id,
            DeviceOutcome::Cancelled,
            "task cancelled before dispatch",
        )
    }

    #[inline]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    #[inline]
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}

/// Per-outcome device counts, based on each device's latest result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub ok: usize,
    pub connection_error: usize,
    pub auth_error: usize,
    pub timeout: usize,
    pub command_error: usize,
    pub storage_error: usize,
    pub otp_required: usize,
    pub cancelled: usize,
    /// Devices without any result yet
    pub pending: usize,
}

impl OutcomeCounts {
    fn slot(&mut self, outcome: DeviceOutcome) -> &mut usize {
        match outcome {
            DeviceOutcome::Ok => &mut self.ok,
            DeviceOutcome::ConnectionError => &mut self.connection_error,
            DeviceOutcome::AuthError => &mut self.auth_error,
            DeviceOutcome::Timeout => &mut self.timeout,
            DeviceOutcome::CommandError => &mut self.command_error,
            DeviceOutcome::StorageError => &mut self.storage_error,
            DeviceOutcome::OtpRequired => &mut self.otp_required,
            DeviceOutcome::Cancelled => &mut self.cancelled,
        }
    }

    pub fn record(&mut self, outcome: DeviceOutcome) {
        *self.slot(outcome) += 1;
    }

    /// Undo an earlier `record`, when a newer result supersedes it.
    pub fn forget(&mut self, outcome: DeviceOutcome) {
        let slot = self.slot(outcome);
        *slot = slot.saturating_sub(1);
    }

    #[inline]
    pub fn failed(&self) -> usize {
        self.connection_error
            + self.auth_error
            + self.timeout
            + self.command_error
            + self.storage_error
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.ok + self.failed() + self.otp_required + self.cancelled + self.pending
    }
}

/// Aggregate view the polling interface renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    pub counts: OutcomeCounts,
    /// Backups written by this task
    pub persisted: usize,
    /// Backups skipped because content matched the latest record
    pub dedup_skipped: usize,
    /// Devices whose latest result is a permanent failure
    pub failed_devices: Vec<DeviceId>,
    /// Buckets awaiting an OTP code, with their blocked devices
    pub otp_pending: Vec<OtpPending>,
}

/// Mutable task state owned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub request: OperationRequest,
    pub status: TaskStatus,
    /// Target set of the original submission
    pub device_ids: Vec<DeviceId>,
    /// Append-only history across attempts
    pub results: Vec<DeviceResult>,
    /// Number of attempts started (initial run + resumes)
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AutomationTask {
    pub fn new(request: OperationRequest, device_ids: Vec<DeviceId>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: request.kind(),
            request,
            status: TaskStatus::Pending,
            device_ids,
            results: Vec::new(),
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Latest result of `device_id`, if any.
    pub fn latest_result(&self, device_id: &str) -> Option<&DeviceResult> {
        self.results
            .iter()
            .rev()
            .find(|r| r.device_id == device_id)
    }
}

/// Snapshot returned by `status()` and published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress_percent: u8,
    pub summary: TaskSummary,
    pub updated_at: DateTime<Utc>,
}
