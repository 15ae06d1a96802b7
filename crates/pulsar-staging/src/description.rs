use crate::action::{Action, ActionSource};
use crate::mapper::StagingConfig;
use pulsar_core::constants::outputs::COMMAND_VERSION_FILENAME;
use pulsar_core::model::{
    DependenciesDescription, DynamicFileSource, EnvVar, FullStatus, JobId, PathType,
    RealizedDynamicFileSource, SetupParams,
};
use pulsar_core::path_helper::PathHelper;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use wildmatch::WildMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    InputPath,
    InputExtraFilesPath,
    InputMetadataPath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInput {
    pub path: PathBuf,
    pub input_type: InputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store_ref: Option<String>,
}

impl ClientInput {
    pub fn new(path: impl Into<PathBuf>, input_type: InputType) -> Self {
        Self {
            path: path.into(),
            input_type,
            object_store_ref: None,
        }
    }

    pub fn action_source(&self) -> ActionSource {
        ActionSource {
            path: Some(self.path.to_string_lossy().to_string()),
            object_store_ref: self.object_store_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub tool_id: String,
    pub version: String,
    pub tool_dir: PathBuf,
}

/// Outputs a client expects back from a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOutputs {
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub output_files: Vec<PathBuf>,
    /// `(path in working directory, final destination)` pairs; the source may
    /// be a glob.
    #[serde(default)]
    pub work_dir_outputs: Vec<(PathBuf, PathBuf)>,
    #[serde(default)]
    pub version_file: Option<PathBuf>,
    /// Glob patterns naming extra files worth collecting.
    #[serde(default)]
    pub dynamic_outputs: Vec<String>,
    #[serde(default)]
    pub metadata_directory: Option<PathBuf>,
    #[serde(default)]
    pub job_directory: Option<PathBuf>,
}

impl ClientOutputs {
    pub fn dynamic_match(&self, name: &str) -> bool {
        self.dynamic_outputs
            .iter()
            .any(|pattern| WildMatch::new(pattern).matches(name))
    }
}

/// What the server reports it produced, taken from a completed job's status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PulsarOutputs {
    pub working_directory_contents: Vec<String>,
    /// `None` when the server did not report outputs; every declared output
    /// is then assumed present.
    pub output_directory_contents: Option<Vec<String>>,
    pub metadata_directory_contents: Vec<String>,
    pub job_directory_contents: Vec<String>,
    pub realized_dynamic_file_sources: Vec<RealizedDynamicFileSource>,
    pub path_helper: PathHelper,
}

impl PulsarOutputs {
    pub fn from_status(status: &FullStatus) -> Self {
        Self {
            working_directory_contents: status.working_directory_contents.clone().unwrap_or_default(),
            output_directory_contents: status.outputs_directory_contents.clone(),
            metadata_directory_contents: status.metadata_directory_contents.clone().unwrap_or_default(),
            job_directory_contents: status.job_directory_contents.clone().unwrap_or_default(),
            realized_dynamic_file_sources: status
                .realized_dynamic_file_sources
                .clone()
                .unwrap_or_default(),
            path_helper: PathHelper::new(&status.system_properties.separator),
        }
    }

    pub fn has_output_file(&self, output_file: &Path) -> bool {
        match &self.output_directory_contents {
            None => true,
            Some(contents) => {
                let name = basename(output_file);
                contents.iter().any(|c| *c == name)
            }
        }
    }

    pub fn has_version_file(&self) -> bool {
        self.output_directory_contents
            .as_ref()
            .is_some_and(|c| c.iter().any(|n| n == COMMAND_VERSION_FILENAME))
    }

    /// Files of the `<stem>_files/` sidecar of `output_file`, keyed by local
    /// destination and valued by remote name.
    pub fn output_extras(&self, output_file: &Path) -> BTreeMap<PathBuf, String> {
        let Some(contents) = &self.output_directory_contents else {
            return BTreeMap::new();
        };
        let output_directory = output_file.parent().unwrap_or_else(|| Path::new(""));
        let name = basename(output_file);
        let stem = name.strip_suffix(".dat").unwrap_or(&name);
        let files_directory = format!("{}_files{}", stem, self.path_helper.separator());
        contents
            .iter()
            .filter(|c| c.starts_with(&files_directory))
            .map(|c| {
                (
                    output_directory.join(self.path_helper.local_name(c)),
                    c.clone(),
                )
            })
            .collect()
    }
}

pub(crate) fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Everything a client knows about a job before submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientJobDescription {
    pub command_line: String,
    #[serde(default)]
    pub tool: Option<ToolDescription>,
    #[serde(default)]
    pub config_files: Vec<PathBuf>,
    #[serde(default)]
    pub inputs: Vec<ClientInput>,
    #[serde(default)]
    pub outputs: ClientOutputs,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub metadata_directory: Option<PathBuf>,
    #[serde(default)]
    pub job_directory_files: Vec<PathBuf>,
    /// Tool-relative paths always shipped with the tool.
    #[serde(default)]
    pub tool_directory_required_files: Vec<PathBuf>,
    /// Explicit unstructured files, keyed by local path and valued by the
    /// name to use below the server's unstructured directory.
    #[serde(default)]
    pub arbitrary_files: BTreeMap<PathBuf, String>,
    #[serde(default)]
    pub dependencies_description: Option<DependenciesDescription>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default = "default_true")]
    pub rewrite_paths: bool,
    #[serde(default)]
    pub touch_outputs: Vec<String>,
    #[serde(default)]
    pub dynamic_file_sources: Vec<DynamicFileSource>,
    #[serde(default)]
    pub submit_params: BTreeMap<String, String>,
    #[serde(default)]
    pub use_metadata: bool,
    #[serde(default)]
    pub job_id: Option<JobId>,
}

fn default_true() -> bool {
    true
}

impl ClientJobDescription {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            rewrite_paths: true,
            ..Default::default()
        }
    }

    pub fn tool_id(&self) -> Option<&str> {
        self.tool.as_ref().map(|t| t.tool_id.as_str())
    }

    pub fn tool_version(&self) -> Option<&str> {
        self.tool.as_ref().map(|t| t.version.as_str())
    }
}

/// A file the server must materialize itself before launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStagingInput {
    pub name: String,
    #[serde(rename = "type")]
    pub path_type: PathType,
    pub action: Action,
}

/// Server-side staging instructions carried by a launch request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteStaging {
    #[serde(default)]
    pub setup: Vec<RemoteStagingInput>,
    #[serde(default)]
    pub action_mapper: Option<StagingConfig>,
    #[serde(default)]
    pub client_outputs: Option<ClientOutputs>,
}

/// Launch payload; persisted verbatim as the job's `launch_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub job_id: JobId,
    pub command_line: String,
    #[serde(default)]
    pub setup_params: Option<SetupParams>,
    #[serde(default)]
    pub submit_params: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies_description: Option<DependenciesDescription>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub remote_staging: RemoteStaging,
    #[serde(default)]
    pub touch_outputs: Vec<String>,
    #[serde(default)]
    pub dynamic_file_sources: Vec<DynamicFileSource>,
}

impl LaunchRequest {
    pub fn new(job_id: JobId, command_line: impl Into<String>) -> Self {
        Self {
            job_id,
            command_line: command_line.into(),
            ..Default::default()
        }
    }
}
