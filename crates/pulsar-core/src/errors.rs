use crate::model::JobId;
use std::path::PathBuf;
use thiserror::Error;

pub const PATH_ESCAPE_MESSAGE: &str =
    "Attempt to read or write file outside an authorized directory.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O failure on '{path}': {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in job metadata or request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config.toml is not valid: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Could not list directory tree: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Could not find a configuration file. Expected one at '{0}'.")]
    ConfigNotFound(PathBuf),
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Attempt to read or write file outside an authorized directory. Attempted path: '{path}', valid directory: '{directory}'")]
    PathEscape { path: String, directory: PathBuf },

    #[error("Job directory for '{0}' already exists.")]
    JobAlreadyExists(JobId),

    #[error("Invalid job id '{0}': job ids must be a single path component.")]
    InvalidJobId(String),

    #[error("Unknown path type '{0}'.")]
    UnknownPathType(String),

    #[error("Unknown job status '{0}'.")]
    UnknownJobStatus(String),

    #[error("Job '{job_id}' has no '{name}' metadata.")]
    MissingMetadata { job_id: JobId, name: String },
}
