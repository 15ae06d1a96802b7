//! Server-side halves of staging: materializing remote inputs before launch
//! and shipping remote outputs after the backend finished.

use crate::error::Result;
use pulsar_core::constants::job_files;
use pulsar_core::job_directory::JobDirectory;
use pulsar_core::model::PathType;
use pulsar_core::path_helper::PathHelper;
use pulsar_staging::{
    Action, FileActionMapper, LaunchRequest, ObjectStore, OutputCollector, PulsarOutputs,
    RemoteStaging, ResultsCollector, RetryActionExecutor, TransferRecord,
};
use std::path::Path;

/// Runs the `setup` actions of `staging` into the job directory. A mapper
/// level `ssh_key` overrides the key of every ssh-based action.
pub fn preprocess(
    job_directory: &JobDirectory,
    staging: &RemoteStaging,
    executor: &RetryActionExecutor,
    object_store: Option<&dyn ObjectStore>,
) -> Result<()> {
    let ssh_key = staging
        .action_mapper
        .as_ref()
        .and_then(|config| config.ssh_key.clone());
    let mut ledger: Vec<TransferRecord> = Vec::new();

    for input in &staging.setup {
        let mut action = input.action.clone();
        if let (Some(key), Some(target)) = (&ssh_key, action.as_needs_ssh_mut()) {
            target.set_ssh_key(key.clone());
        }
        let path = job_directory.calculate_path(&input.name, input.path_type)?;
        tracing::debug!(
            "Staging {} '{}' for job '{}' with action {}",
            input.path_type,
            input.name,
            job_directory.job_id(),
            action
        );
        executor.execute(&format!("stage input '{}'", input.name), || {
            action.write_to_path(&path, object_store)
        })?;
        ledger.extend(action.finalize());
    }

    if !ledger.is_empty() {
        job_directory.store_metadata(job_files::INPUT_TRANSFERS, &ledger)?;
    }
    Ok(())
}

/// Collects the outputs the launch request asked the server to deliver.
/// Returns whether every collection succeeded; a job launched without
/// staging instructions has nothing to collect.
pub fn postprocess(
    job_directory: &JobDirectory,
    launch: &LaunchRequest,
    executor: &RetryActionExecutor,
    object_store: Option<&dyn ObjectStore>,
) -> Result<bool> {
    let Some(config) = launch.remote_staging.action_mapper.clone() else {
        return Ok(true);
    };
    let client_outputs = launch
        .remote_staging
        .client_outputs
        .clone()
        .unwrap_or_default();
    let mut mapper = FileActionMapper::new(config)?;
    let pulsar_outputs = PulsarOutputs {
        working_directory_contents: job_directory.working_directory_contents()?,
        output_directory_contents: Some(job_directory.outputs_directory_contents()?),
        metadata_directory_contents: job_directory.metadata_directory_contents()?,
        job_directory_contents: job_directory.job_directory_contents()?,
        realized_dynamic_file_sources: job_directory
            .realized_dynamic_file_sources(&launch.dynamic_file_sources),
        path_helper: PathHelper::default(),
    };

    let collector = ServerOutputCollector {
        job_directory,
        executor,
        object_store,
    };
    let failures =
        ResultsCollector::new(&collector, &mut mapper, &client_outputs, &pulsar_outputs).collect();
    for failure in &failures {
        tracing::warn!(
            "Postprocessing of job '{}' failed to collect an output: {}",
            job_directory.job_id(),
            failure
        );
    }

    let ledger = mapper.finalize();
    if !ledger.is_empty() {
        job_directory.store_metadata(job_files::OUTPUT_TRANSFERS, &ledger)?;
    }
    Ok(failures.is_empty())
}

/// Ships job-directory outputs to their destinations for actions the server
/// executes; client-local actions are left to the client.
pub struct ServerOutputCollector<'a> {
    job_directory: &'a JobDirectory,
    executor: &'a RetryActionExecutor,
    object_store: Option<&'a dyn ObjectStore>,
}

impl<'a> ServerOutputCollector<'a> {
    pub fn new(
        job_directory: &'a JobDirectory,
        executor: &'a RetryActionExecutor,
        object_store: Option<&'a dyn ObjectStore>,
    ) -> Self {
        Self {
            job_directory,
            executor,
            object_store,
        }
    }
}

impl OutputCollector for ServerOutputCollector<'_> {
    fn collect_output(
        &self,
        action: &Action,
        output_type: PathType,
        path: &Path,
        name: Option<&str>,
    ) -> pulsar_staging::Result<bool> {
        if !action.staging_needed() || action.staging_action_local() {
            return Ok(false);
        }
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        let source = self.job_directory.calculate_path(&name, output_type)?;
        self.executor
            .execute(&format!("collect output '{}'", name), || {
                action.write_from_path(&source, self.object_store)
            })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsar_core::locks::LockManager;
    use pulsar_core::model::JobId;
    use pulsar_staging::action::ActionKwds;
    use pulsar_staging::{ActionSource, ActionType, ClientOutputs, RemoteStagingInput, StagingConfig};
    use std::sync::Arc;

    fn job_directory(root: &Path) -> JobDirectory {
        let job_directory = JobDirectory::new(root, &JobId::from("1"), Arc::new(LockManager::new()));
        job_directory.setup().unwrap();
        for name in pulsar_core::constants::dirs::JOB_SUBDIRECTORIES {
            job_directory.make_directory(name).unwrap();
        }
        job_directory
    }

    fn remote_copy(path: &Path) -> Action {
        Action::build(
            ActionType::RemoteCopy,
            &ActionSource::from_path(path),
            &ActionKwds::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_preprocess_materializes_setup_inputs() {
        let staging_root = tempfile::tempdir().unwrap();
        let client = tempfile::tempdir().unwrap();
        let source = client.path().join("a.dat");
        fs_err::write(&source, "abc").unwrap();
        let job_directory = job_directory(staging_root.path());

        let staging = RemoteStaging {
            setup: vec![
                RemoteStagingInput {
                    name: "a.dat".to_string(),
                    path_type: PathType::Input,
                    action: remote_copy(&source),
                },
                RemoteStagingInput {
                    name: "note.txt".to_string(),
                    path_type: PathType::Workdir,
                    action: Action::message("hello"),
                },
            ],
            ..Default::default()
        };
        preprocess(&job_directory, &staging, &RetryActionExecutor::default(), None).unwrap();

        assert_eq!(
            fs_err::read_to_string(job_directory.inputs_directory().join("a.dat")).unwrap(),
            "abc"
        );
        assert_eq!(
            fs_err::read_to_string(job_directory.working_directory().join("note.txt")).unwrap(),
            "hello"
        );
        assert!(!job_directory.has_metadata(job_files::INPUT_TRANSFERS));
    }

    #[test]
    fn test_preprocess_rejects_escaping_names() {
        let staging_root = tempfile::tempdir().unwrap();
        let job_directory = job_directory(staging_root.path());
        let staging = RemoteStaging {
            setup: vec![RemoteStagingInput {
                name: "../../etc/passwd".to_string(),
                path_type: PathType::Input,
                action: Action::message("x"),
            }],
            ..Default::default()
        };
        assert!(preprocess(&job_directory, &staging, &RetryActionExecutor::default(), None).is_err());
    }

    #[test]
    fn test_postprocess_without_staging_config_succeeds() {
        let staging_root = tempfile::tempdir().unwrap();
        let job_directory = job_directory(staging_root.path());
        let launch = LaunchRequest::new(JobId::from("1"), "true");
        assert!(postprocess(&job_directory, &launch, &RetryActionExecutor::default(), None).unwrap());
    }

    #[test]
    fn test_postprocess_delivers_remote_copy_outputs() {
        let staging_root = tempfile::tempdir().unwrap();
        let client = tempfile::tempdir().unwrap();
        let job_directory = job_directory(staging_root.path());
        fs_err::write(job_directory.outputs_directory().join("out.txt"), "hello\n").unwrap();

        let destination = client.path().join("out.txt");
        let mut launch = LaunchRequest::new(JobId::from("1"), "true");
        launch.remote_staging.action_mapper =
            Some(StagingConfig::with_default_action(ActionType::RemoteCopy));
        launch.remote_staging.client_outputs = Some(ClientOutputs {
            output_files: vec![destination.clone()],
            ..Default::default()
        });

        let succeeded =
            postprocess(&job_directory, &launch, &RetryActionExecutor::default(), None).unwrap();
        assert!(succeeded);
        assert_eq!(fs_err::read_to_string(&destination).unwrap(), "hello\n");
    }

    #[test]
    fn test_server_collector_leaves_local_actions_to_client() {
        let staging_root = tempfile::tempdir().unwrap();
        let job_directory = job_directory(staging_root.path());
        let executor = RetryActionExecutor::default();
        let collector = ServerOutputCollector::new(&job_directory, &executor, None);
        let copy = Action::build(
            ActionType::Copy,
            &ActionSource::from_path("/client/out.txt"),
            &ActionKwds::default(),
        )
        .unwrap();
        assert!(!collector
            .collect_output(&copy, PathType::Output, Path::new("/client/out.txt"), None)
            .unwrap());
    }
}
