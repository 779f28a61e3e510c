pub mod backup;
pub mod credential;
pub mod device;
pub mod otp;
pub mod task;

pub mod prelude {
    pub use super::backup::{BackupDisposition, BackupRecord, BackupType, StoredBackup};
    pub use super::credential::{Credential, CredentialRecord};
    pub use super::device::{Device, DeviceGroup, DeviceId};
    pub use super::otp::{OtpBucket, OtpEntry, OtpPending, OtpRequiredSignal};
    pub use super::task::{
        AutomationTask, CommandIntent, DeployOptions, DeviceOutcome, DeviceResult, OperationKind,
        OperationRequest, OutcomeCounts, TaskId, TaskKind, TaskReport, TaskStatus, TaskSummary,
    };
}
