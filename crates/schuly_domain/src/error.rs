use thiserror::Error;

use crate::permissions::PermissionKind;

/// Failures of the persisted key/value collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures reported by a platform notification subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    /// The platform refuses exact-time alarms for this app.
    #[error("exact alarm scheduling is not permitted")]
    ExactAlarmNotPermitted,

    #[error("notification platform error: {0}")]
    Platform(String),
}

/// Failures reported by a platform permission API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("{0:?} cannot be queried or requested on this platform")]
    Unsupported(PermissionKind),

    #[error("permission platform error: {0}")]
    Platform(String),
}
