use pulsar_core::errors::{ConfigError, DomainError};
use std::path::PathBuf;
use thiserror::Error;

pub const MISSING_FILES_ENDPOINT_ERROR: &str =
    "Attempted to use remote_transfer action without defining a files_endpoint.";
pub const MISSING_SSH_KEY_ERROR: &str =
    "Attempt to use file transfer action requiring an SSH key without specifying a ssh_key.";

#[derive(Error, Debug)]
pub enum StagingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Unknown action_type encountered '{0}'.")]
    UnknownActionType(String),

    #[error("Attempted to use remote_transfer action without defining a files_endpoint.")]
    MissingFilesEndpoint,

    #[error("Attempt to use file transfer action requiring an SSH key without specifying a ssh_key.")]
    MissingSshKey,

    #[error("Staging requested for non-existent local path '{0}'.")]
    MissingLocalPath(PathBuf),

    #[error("Action '{action_type}' cannot {operation}.")]
    ActionNotExecutable {
        action_type: String,
        operation: &'static str,
    },

    #[error("Action '{0}' requires an object store but none is configured.")]
    MissingObjectStore(String),

    #[error("Command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Job client error: {0}")]
    Client(String),

    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("I/O failure while staging: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize staging data: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StagingError>;
