use pulsar_core::model::{JobId, JobStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] pulsar_core::errors::ConfigError),

    #[error(transparent)]
    Domain(#[from] pulsar_core::errors::DomainError),

    #[error(transparent)]
    Staging(#[from] pulsar_staging::StagingError),

    #[error(transparent)]
    Manager(#[from] pulsar_manager::ManagerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("No manager named '{0}' is configured.")]
    UnknownManager(String),

    #[error("Job '{job_id}' ended {status} (exit code {returncode}, {failures} collection failure(s)).")]
    JobFailed {
        job_id: JobId,
        status: JobStatus,
        returncode: String,
        failures: usize,
    },

    #[error("Message exchange error: {0}")]
    Exchange(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
