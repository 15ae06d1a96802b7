use crate::action::{Action, ActionSource};
use crate::client::{JobClient, PutFileRequest};
use crate::description::{basename, ClientJobDescription, InputType, RemoteStagingInput};
use crate::error::{Result, StagingError};
use crate::inputs::JobInputs;
use crate::mapper::FileActionMapper;
use pulsar_core::constants::outputs::COMMAND_VERSION_FILENAME;
use pulsar_core::errors::ConfigError;
use pulsar_core::job_directory::RemoteJobDirectory;
use pulsar_core::model::{JobConfig, JobId, PathType, SetupParams};
use pulsar_core::path_helper::PathHelper;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const FILES_SUFFIX: &str = "_files";
const LEGACY_FILES_SUFFIX: &str = ".dat_files";

/// Executes staging actions for one job and remembers where every staged path
/// ends up on the server.
pub struct TransferTracker<'a> {
    client: &'a dyn JobClient,
    job_id: JobId,
    path_helper: PathHelper,
    mapper: FileActionMapper,
    rewrite_paths: bool,
    remote_job_directory: RemoteJobDirectory,
    file_renames: BTreeMap<String, String>,
    remote_staging_actions: Vec<RemoteStagingInput>,
}

impl<'a> TransferTracker<'a> {
    pub fn new(
        client: &'a dyn JobClient,
        job_config: &JobConfig,
        mapper: FileActionMapper,
        rewrite_paths: bool,
    ) -> Self {
        let remote_job_directory = RemoteJobDirectory::new(
            &job_config.job_directory.to_string_lossy(),
            &job_config.path_separator,
        );
        Self {
            client,
            job_id: job_config.job_id.clone(),
            path_helper: remote_job_directory.path_helper().clone(),
            mapper,
            rewrite_paths,
            remote_job_directory,
            file_renames: BTreeMap::new(),
            remote_staging_actions: Vec::new(),
        }
    }

    pub fn path_helper(&self) -> &PathHelper {
        &self.path_helper
    }

    pub fn mapper(&self) -> &FileActionMapper {
        &self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut FileActionMapper {
        &mut self.mapper
    }

    pub fn file_renames(&self) -> &BTreeMap<String, String> {
        &self.file_renames
    }

    pub fn remote_staging_actions(&self) -> &[RemoteStagingInput] {
        &self.remote_staging_actions
    }

    fn action_for_transfer(
        &mut self,
        source: &ActionSource,
        path_type: PathType,
        contents: Option<&str>,
    ) -> Result<Action> {
        match contents {
            Some(contents) => Ok(Action::message(contents)),
            None => self.mapper.action(source, path_type, None),
        }
    }

    pub fn handle_transfer_path(
        &mut self,
        path: &Path,
        path_type: PathType,
        name: Option<&str>,
        contents: Option<&str>,
    ) -> Result<()> {
        self.handle_transfer_source(&ActionSource::from_path(path), path_type, name, contents)
    }

    /// Stages one file: pushed by the client for local actions, recorded as a
    /// server-side setup entry otherwise. The resulting server path is
    /// registered as a rename of the local path.
    pub fn handle_transfer_source(
        &mut self,
        source: &ActionSource,
        path_type: PathType,
        name: Option<&str>,
        contents: Option<&str>,
    ) -> Result<()> {
        let action = self.action_for_transfer(source, path_type, contents)?;
        let local_path = source.path.as_deref();

        if !action.staging_needed() {
            if self.rewrite_paths {
                if let (Some(path), Some(rewrite)) =
                    (local_path, action.path_rewrite(&self.path_helper, None))
                {
                    self.file_renames.insert(path.to_string(), rewrite);
                }
            }
            return Ok(());
        }

        let name = match (name, local_path) {
            (Some(name), _) => name.to_string(),
            (None, Some(path)) => basename(Path::new(path)),
            (None, None) => {
                return Err(StagingError::Client(format!(
                    "cannot stage a nameless {} without a path",
                    path_type
                )))
            }
        };

        let staged_locally = match action {
            Action::Message(_) => self.client.prefer_local_staging(),
            ref other => other.staging_action_local(),
        };

        let remote_path = if staged_locally {
            if contents.is_none() {
                let exists = local_path.is_some_and(|p| Path::new(p).exists());
                if !exists {
                    let missing = PathBuf::from(local_path.unwrap_or_default());
                    if path_type == PathType::Input {
                        tracing::info!(
                            "Skipping staging of non-existent input path '{}'",
                            missing.display()
                        );
                        return Ok(());
                    }
                    return Err(StagingError::MissingLocalPath(missing));
                }
            }
            let request = PutFileRequest {
                path: if contents.is_some() {
                    None
                } else {
                    local_path.map(Path::new)
                },
                name: &name,
                path_type,
                contents,
                action_type: action.action_type(),
            };
            self.client.put_file(&self.job_id, &request)?
        } else {
            tracing::debug!(
                "Deferring {} '{}' to server-side staging via {}",
                path_type,
                name,
                action
            );
            let remote_path = self.remote_job_directory.calculate_path(&name, path_type);
            self.remote_staging_actions.push(RemoteStagingInput {
                name,
                path_type,
                action,
            });
            remote_path
        };

        if self.rewrite_paths || path_type == PathType::Tool {
            if let Some(path) = local_path {
                self.register_rewrite(path, &remote_path, path_type, true)?;
            }
        }
        Ok(())
    }

    /// Records that `local_path` will be `remote_path` on the server, provided
    /// the path is actually staged (or `force`d). Rewrite-only rules apply
    /// their own mapping.
    pub fn register_rewrite(
        &mut self,
        local_path: &str,
        remote_path: &str,
        path_type: PathType,
        force: bool,
    ) -> Result<()> {
        let action = self
            .mapper
            .action(&ActionSource::from_path(local_path), path_type, None)?;
        let rewrite = if action.staging_needed() || force {
            action.path_rewrite(&self.path_helper, Some(remote_path))
        } else {
            action.path_rewrite(&self.path_helper, None)
        };
        if let Some(rewrite) = rewrite {
            self.file_renames.insert(local_path.to_string(), rewrite);
        }
        Ok(())
    }

    fn into_parts(self) -> (FileActionMapper, Vec<RemoteStagingInput>) {
        (self.mapper, self.remote_staging_actions)
    }
}

/// Outcome of staging: what to launch and what the server must stage itself.
#[derive(Debug)]
pub struct StagedJob {
    pub job_config: JobConfig,
    pub command_line: String,
    pub remote_staging: Vec<RemoteStagingInput>,
    pub mapper: FileActionMapper,
}

/// Upload half of a job submission.
pub struct FileStager<'a> {
    description: &'a ClientJobDescription,
    job_config: JobConfig,
    job_inputs: JobInputs,
    tracker: TransferTracker<'a>,
    referenced_tool_files: Vec<String>,
    arbitrary_files: BTreeMap<String, String>,
}

impl<'a> FileStager<'a> {
    /// Sets the job up on the server and stages everything it needs.
    pub fn stage(
        client: &'a dyn JobClient,
        description: &'a ClientJobDescription,
        mapper: FileActionMapper,
    ) -> Result<StagedJob> {
        let params = SetupParams {
            job_id: description.job_id.as_ref().map(|id| id.to_string()),
            tool_id: description.tool_id().map(str::to_string),
            tool_version: description.tool_version().map(str::to_string),
            use_metadata: description.use_metadata,
        };
        let job_config = client.setup(&params)?;
        tracing::info!("Staging files for job '{}'", job_config.job_id);

        let job_inputs = JobInputs::new(&description.command_line, &description.config_files)?;
        let tracker = TransferTracker::new(client, &job_config, mapper, description.rewrite_paths);
        let arbitrary_files = description
            .arbitrary_files
            .iter()
            .map(|(path, name)| (path.to_string_lossy().to_string(), name.clone()))
            .collect();

        let mut stager = FileStager {
            description,
            job_config,
            job_inputs,
            tracker,
            referenced_tool_files: Vec::new(),
            arbitrary_files,
        };
        stager.run()?;
        Ok(stager.finish())
    }

    fn run(&mut self) -> Result<()> {
        self.initialize_referenced_tool_files();
        if self.description.rewrite_paths {
            self.initialize_referenced_arbitrary_files()?;
        }

        self.upload_tool_files()?;
        self.upload_job_directory_files()?;
        self.upload_input_files()?;
        self.upload_directory(self.description.working_directory.clone(), PathType::Workdir)?;
        self.upload_directory(self.description.metadata_directory.clone(), PathType::Metadata)?;
        self.upload_arbitrary_files()?;

        if self.description.rewrite_paths {
            self.initialize_output_file_renames()?;
            self.initialize_task_output_file_renames()?;
            self.initialize_config_file_renames()?;
            self.initialize_version_file_rename()?;
        }

        self.job_inputs.rewrite_paths(self.tracker.file_renames());
        self.upload_rewritten_config_files()
    }

    fn finish(self) -> StagedJob {
        let command_line = self.job_inputs.command_line().to_string();
        let (mapper, remote_staging) = self.tracker.into_parts();
        StagedJob {
            job_config: self.job_config,
            command_line,
            remote_staging,
            mapper,
        }
    }

    fn initialize_referenced_tool_files(&mut self) {
        if let Some(tool) = &self.description.tool {
            self.referenced_tool_files = self.job_inputs.find_referenced_subfiles(&tool.tool_dir);
        }
    }

    fn initialize_referenced_arbitrary_files(&mut self) -> Result<()> {
        let mut referenced = BTreeMap::new();
        for mapper in self.tracker.mapper().unstructured_mappers() {
            let Some(pattern) = mapper.to_pattern() else {
                continue;
            };
            for path in self.job_inputs.find_pattern_references(&pattern)? {
                referenced.entry(path).or_insert_with(|| mapper.clone());
            }
        }

        for (path, mapper) in referenced {
            let action = self.tracker.mapper_mut().action(
                &ActionSource::from_path(&path),
                PathType::Unstructured,
                Some(&mapper),
            )?;
            let unstructured = action.unstructured_map(self.tracker.path_helper());
            self.arbitrary_files.extend(unstructured);
        }
        Ok(())
    }

    fn upload_tool_files(&mut self) -> Result<()> {
        for referenced in self.referenced_tool_files.clone() {
            self.tracker
                .handle_transfer_path(Path::new(&referenced), PathType::Tool, None, None)?;
        }
        if let Some(tool) = &self.description.tool {
            for required in &self.description.tool_directory_required_files {
                let name = self.tracker.path_helper().remote_name(&required.to_string_lossy());
                self.tracker.handle_transfer_path(
                    &tool.tool_dir.join(required),
                    PathType::Tool,
                    Some(&name),
                    None,
                )?;
            }
        }
        Ok(())
    }

    fn upload_job_directory_files(&mut self) -> Result<()> {
        for file in &self.description.job_directory_files {
            self.tracker
                .handle_transfer_path(file, PathType::Jobdir, None, None)?;
        }
        Ok(())
    }

    fn stage_input(&self, path: &Path) -> bool {
        !self.description.rewrite_paths || self.job_inputs.path_referenced(path)
    }

    fn upload_input_files(&mut self) -> Result<()> {
        let mut handled = BTreeSet::new();
        for input in &self.description.inputs {
            if !handled.insert(input.path.clone()) {
                continue;
            }
            if !self.stage_input(&input.path) {
                tracing::debug!(
                    "Input '{}' is not referenced by the job, not staging it",
                    input.path.display()
                );
                continue;
            }
            let source = input.action_source();
            match input.input_type {
                InputType::InputPath => {
                    self.tracker
                        .handle_transfer_source(&source, PathType::Input, None, None)?;
                }
                InputType::InputMetadataPath => {
                    let name = format!("metadata_{}", basename(&input.path));
                    self.tracker
                        .handle_transfer_source(&source, PathType::Input, Some(&name), None)?;
                }
                InputType::InputExtraFilesPath => {
                    for file in directory_files(&input.path)? {
                        let relative = extra_files_name(&input.path, &file);
                        let name = self.tracker.path_helper().remote_name(&relative);
                        self.tracker
                            .handle_transfer_path(&file, PathType::Input, Some(&name), None)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn upload_directory(&mut self, directory: Option<PathBuf>, path_type: PathType) -> Result<()> {
        let Some(directory) = directory.filter(|d| d.is_dir()) else {
            return Ok(());
        };
        for file in directory_files(&directory)? {
            let Ok(relative) = file.strip_prefix(&directory) else {
                continue;
            };
            let name = self
                .tracker
                .path_helper()
                .remote_name(&relative.to_string_lossy());
            self.tracker
                .handle_transfer_path(&file, path_type, Some(&name), None)?;
        }
        Ok(())
    }

    fn upload_arbitrary_files(&mut self) -> Result<()> {
        for (path, name) in self.arbitrary_files.clone() {
            self.tracker.handle_transfer_path(
                Path::new(&path),
                PathType::Unstructured,
                Some(&name),
                None,
            )?;
        }
        Ok(())
    }

    fn remote_join(&self, directory: &Path, name: &str) -> String {
        self.tracker
            .path_helper()
            .remote_join(&directory.to_string_lossy(), &[name])
    }

    fn initialize_output_file_renames(&mut self) -> Result<()> {
        for output_file in &self.description.outputs.output_files {
            let remote_path =
                self.remote_join(&self.job_config.outputs_directory, &basename(output_file));
            self.tracker.register_rewrite(
                &output_file.to_string_lossy(),
                &remote_path,
                PathType::Output,
                false,
            )?;
        }
        Ok(())
    }

    fn initialize_task_output_file_renames(&mut self) -> Result<()> {
        let Some(working_directory) = &self.description.working_directory else {
            return Ok(());
        };
        for output_file in &self.description.outputs.output_files {
            let name = basename(output_file);
            let task_file = working_directory.join(&name);
            let remote_path = self.remote_join(&self.job_config.working_directory, &name);
            self.tracker.register_rewrite(
                &task_file.to_string_lossy(),
                &remote_path,
                PathType::OutputWorkdir,
                false,
            )?;
        }
        Ok(())
    }

    fn initialize_config_file_renames(&mut self) -> Result<()> {
        for config_file in &self.description.config_files {
            let remote_path =
                self.remote_join(&self.job_config.configs_directory, &basename(config_file));
            self.tracker.register_rewrite(
                &config_file.to_string_lossy(),
                &remote_path,
                PathType::Config,
                false,
            )?;
        }
        Ok(())
    }

    fn initialize_version_file_rename(&mut self) -> Result<()> {
        if let Some(version_file) = &self.description.outputs.version_file {
            let remote_path =
                self.remote_join(&self.job_config.outputs_directory, COMMAND_VERSION_FILENAME);
            self.tracker.register_rewrite(
                &version_file.to_string_lossy(),
                &remote_path,
                PathType::Output,
                false,
            )?;
        }
        Ok(())
    }

    fn upload_rewritten_config_files(&mut self) -> Result<()> {
        let rewritten: Vec<(PathBuf, String)> = self
            .job_inputs
            .config_files()
            .iter()
            .map(|(path, contents)| (path.clone(), contents.clone()))
            .collect();
        for (config_file, contents) in rewritten {
            self.tracker.handle_transfer_path(
                &config_file,
                PathType::Config,
                None,
                Some(&contents),
            )?;
        }
        Ok(())
    }
}

fn directory_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(ConfigError::from)?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

/// `a.dat_files` -> `a_files`; other names are kept.
fn sidecar_root_name(root: &Path) -> String {
    let name = basename(root);
    match name.strip_suffix(LEGACY_FILES_SUFFIX) {
        Some(stem) => format!("{}{}", stem, FILES_SUFFIX),
        None => name,
    }
}

/// Remote name of `file` inside the sidecar directory `root`, e.g.
/// `/data/a.dat_files` + `/data/a.dat_files/idx_files/y.txt` -> `a_files/idx_files/y.txt`.
/// A single file given as the root is named after its parent when that is a
/// sidecar directory.
fn extra_files_name(root: &Path, file: &Path) -> String {
    if file == root {
        return match root.parent() {
            Some(parent) if basename(parent).ends_with(FILES_SUFFIX) => {
                let mut name = PathBuf::from(sidecar_root_name(parent));
                name.push(basename(file));
                name.to_string_lossy().into_owned()
            }
            _ => basename(file),
        };
    }
    let mut name = PathBuf::from(sidecar_root_name(root));
    if let Ok(relative) = file.strip_prefix(root) {
        name.push(relative);
    }
    name.to_string_lossy().into_owned()
}
