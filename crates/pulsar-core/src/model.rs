use crate::errors::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl JobId {
    /// Job ids name a directory under the staging root, so they must be a single,
    /// non-special path component.
    pub fn validated(raw: &str) -> Result<Self, DomainError> {
        let invalid = raw.is_empty()
            || raw == "."
            || raw == ".."
            || raw.contains('/')
            || raw.contains('\\')
            || raw.contains('\0');
        if invalid {
            return Err(DomainError::InvalidJobId(raw.to_string()));
        }
        Ok(JobId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Preprocessing,
    Queued,
    Running,
    Postprocessing,
    Complete,
    Failed,
    Cancelled,
    Lost,
}

impl JobStatus {
    /// Statuses after which no further transition happens.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Lost
        )
    }

    /// Position in the natural progression of a job. Absorbing failure states share
    /// the final rank.
    pub fn progression_rank(&self) -> u8 {
        match self {
            JobStatus::Preprocessing => 0,
            JobStatus::Queued => 1,
            JobStatus::Running => 2,
            JobStatus::Postprocessing => 3,
            JobStatus::Complete
            | JobStatus::Failed
            | JobStatus::Cancelled
            | JobStatus::Lost => 4,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Preprocessing => "preprocessing",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Postprocessing => "postprocessing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Lost => "lost",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preprocessing" => Ok(JobStatus::Preprocessing),
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "postprocessing" => Ok(JobStatus::Postprocessing),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "lost" => Ok(JobStatus::Lost),
            _ => Err(DomainError::UnknownJobStatus(s.to_string())),
        }
    }
}

/// Role of a file in a job, used to choose its job-directory location and its
/// default staging behaviour.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    Input,
    Unstructured,
    Config,
    Tool,
    Workdir,
    Jobdir,
    Metadata,
    Output,
    OutputWorkdir,
    OutputMetadata,
    OutputJobdir,
}

impl PathType {
    pub const ALL: [PathType; 11] = [
        PathType::Input,
        PathType::Unstructured,
        PathType::Config,
        PathType::Tool,
        PathType::Workdir,
        PathType::Jobdir,
        PathType::Metadata,
        PathType::Output,
        PathType::OutputWorkdir,
        PathType::OutputMetadata,
        PathType::OutputJobdir,
    ];

    /// Types that fall back to the mapper's default action when no rule matches.
    pub const DEFAULT_ELIGIBLE: [PathType; 10] = [
        PathType::Input,
        PathType::Config,
        PathType::Tool,
        PathType::Workdir,
        PathType::Jobdir,
        PathType::Metadata,
        PathType::Output,
        PathType::OutputWorkdir,
        PathType::OutputMetadata,
        PathType::OutputJobdir,
    ];

    pub fn is_default_eligible(&self) -> bool {
        Self::DEFAULT_ELIGIBLE.contains(self)
    }

    /// Directories that are never assumed to be shared between client and server.
    pub fn forces_copy(&self) -> bool {
        matches!(
            self,
            PathType::Workdir
                | PathType::Jobdir
                | PathType::OutputWorkdir
                | PathType::OutputMetadata
                | PathType::OutputJobdir
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PathType::Input => "input",
            PathType::Unstructured => "unstructured",
            PathType::Config => "config",
            PathType::Tool => "tool",
            PathType::Workdir => "workdir",
            PathType::Jobdir => "jobdir",
            PathType::Metadata => "metadata",
            PathType::Output => "output",
            PathType::OutputWorkdir => "output_workdir",
            PathType::OutputMetadata => "output_metadata",
            PathType::OutputJobdir => "output_jobdir",
        }
    }
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PathType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work_dir" => Ok(PathType::Workdir),
            _ => PathType::ALL
                .iter()
                .find(|t| t.as_str() == s)
                .copied()
                .ok_or_else(|| DomainError::UnknownPathType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub raw: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type", default = "default_requirement_type")]
    pub requirement_type: String,
}

fn default_requirement_type() -> String {
    "package".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependenciesDescription {
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupParams {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub tool_version: Option<String>,
    #[serde(default)]
    pub use_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemProperties {
    pub separator: String,
}

impl Default for SystemProperties {
    fn default() -> Self {
        Self {
            separator: std::path::MAIN_SEPARATOR.to_string(),
        }
    }
}

/// Response to a job setup: where the server will place each kind of file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_id: JobId,
    pub job_directory: PathBuf,
    pub working_directory: PathBuf,
    pub metadata_directory: PathBuf,
    pub outputs_directory: PathBuf,
    pub configs_directory: PathBuf,
    pub tools_directory: PathBuf,
    pub inputs_directory: PathBuf,
    pub unstructured_files_directory: PathBuf,
    pub path_separator: String,
    #[serde(default)]
    pub system_properties: SystemProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicFileSourceType {
    Json,
    Yaml,
}

/// A tool-produced file (relative to the job directory) describing outputs only
/// known after execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFileSource {
    pub path: String,
    #[serde(rename = "type")]
    pub source_type: DynamicFileSourceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizedDynamicFileSource {
    #[serde(rename = "type")]
    pub source_type: DynamicFileSourceType,
    pub contents: String,
}

/// Status payload returned to clients. Done states carry the full completion
/// record; other states only `job_id`, `complete = false` and `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullStatus {
    pub job_id: JobId,
    pub complete: bool,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory_contents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_directory_contents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_directory_contents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_directory_contents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_dynamic_file_sources: Option<Vec<RealizedDynamicFileSource>>,
    #[serde(default)]
    pub system_properties: SystemProperties,
}

impl FullStatus {
    pub fn in_progress(job_id: JobId, status: JobStatus) -> Self {
        Self {
            job_id,
            complete: false,
            status,
            returncode: None,
            stdout: None,
            stderr: None,
            job_directory: None,
            working_directory: None,
            metadata_directory: None,
            working_directory_contents: None,
            metadata_directory_contents: None,
            outputs_directory_contents: None,
            job_directory_contents: None,
            realized_dynamic_file_sources: None,
            system_properties: SystemProperties::default(),
        }
    }
}
