use pulsar_core::errors::{ConfigError, DomainError};
use pulsar_core::model::JobId;
use pulsar_staging::StagingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize job state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Submission via '{command}' failed with exit code {code}.\n--- STDERR ---\n{stderr}")]
    SubmissionFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Failed to find external id for job '{0}'.")]
    ExternalIdMissing(JobId),

    #[error("Unrecognized state '{state}' reported for external job '{external_id}'.")]
    UnknownExternalState { external_id: String, state: String },

    #[error("DRMAA error: {0}")]
    Drmaa(String),

    #[error("Failed to recover job '{job_id}': {reason}")]
    RecoveryFailed { job_id: JobId, reason: String },
}

pub type Result<T> = std::result::Result<T, ManagerError>;
