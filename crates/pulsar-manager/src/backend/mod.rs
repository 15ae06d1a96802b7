mod coexecution;
mod condor;
mod drmaa;
mod external;
mod process;
mod queued;
mod unqueued;

pub mod cli;

pub use coexecution::CoexecutionBackend;
pub use condor::CondorBackend;
pub use drmaa::{DrmaaBackend, DrmaaJobState, DrmaaJobTemplate, DrmaaSession};
pub use queued::ThreadPoolQueueBackend;
pub use unqueued::UnqueuedBackend;

use crate::dependencies::DependencyResolver;
use crate::error::{ManagerError, Result};
use crate::id_assigner::IdAssigner;
use crate::job_script::JobScript;
use pulsar_core::config::{AppConfig, ManagerConfig};
use pulsar_core::constants::{dirs, job_files};
use pulsar_core::job_directory::JobDirectory;
use pulsar_core::locks::LockManager;
use pulsar_core::model::{DependenciesDescription, EnvVar, JobId, JobStatus, SetupParams};
use pulsar_staging::LaunchRequest;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// The part of a launch request a backend acts on.
#[derive(Debug, Clone, Default)]
pub struct LaunchParams {
    pub command_line: String,
    pub submit_params: BTreeMap<String, String>,
    pub dependencies_description: Option<DependenciesDescription>,
    pub env: Vec<EnvVar>,
    pub setup_params: Option<SetupParams>,
}

impl LaunchParams {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            ..Default::default()
        }
    }
}

impl From<&LaunchRequest> for LaunchParams {
    fn from(request: &LaunchRequest) -> Self {
        Self {
            command_line: request.command_line.clone(),
            submit_params: request.submit_params.clone(),
            dependencies_description: request.dependencies_description.clone(),
            env: request.env.clone(),
            setup_params: request.setup_params.clone(),
        }
    }
}

/// An execution substrate for jobs living in job directories.
///
/// Implementors provide `launch`, `get_status` and `kill`; everything that only
/// touches the job directory comes from the shared [`DirectoryManager`].
/// `get_status` and `kill` may race an in-flight `launch` for the same job and
/// must serialize on the job's `execution` lock.
pub trait Backend: Send + Sync {
    fn base(&self) -> &DirectoryManager;

    fn launch(&self, job_id: &JobId, params: &LaunchParams) -> Result<()>;

    fn get_status(&self, job_id: &JobId) -> Result<JobStatus>;

    fn kill(&self, job_id: &JobId) -> Result<()>;

    /// Rebuilds in-memory tracking for a job found in the active index after a
    /// restart. An error means the job cannot be tracked anymore.
    fn recover_active_job(&self, _job_id: &JobId) -> Result<()> {
        Ok(())
    }

    /// Drops per-job caches once the job reached a final state.
    fn deactivate_job(&self, _job_id: &JobId) {}

    /// Stops background threads, waiting at most `timeout` for each.
    fn shutdown(&self, _timeout: Option<Duration>) {}

    fn name(&self) -> &str {
        self.base().name()
    }

    fn setup_job(
        &self,
        input_job_id: &str,
        tool_id: Option<&str>,
        tool_version: Option<&str>,
    ) -> Result<JobId> {
        self.base().setup_job(input_job_id, tool_id, tool_version)
    }

    fn job_directory(&self, job_id: &JobId) -> JobDirectory {
        self.base().job_directory(job_id)
    }

    fn return_code(&self, job_id: &JobId) -> Option<i32> {
        self.base().return_code(job_id)
    }

    fn stdout_contents(&self, job_id: &JobId) -> Vec<u8> {
        self.base().job_directory(job_id).read_file_or(job_files::STDOUT, b"")
    }

    fn stderr_contents(&self, job_id: &JobId) -> Vec<u8> {
        self.base().job_directory(job_id).read_file_or(job_files::STDERR, b"")
    }

    fn clean(&self, job_id: &JobId) -> Result<()> {
        self.base().clean(job_id)
    }
}

/// Job-directory bookkeeping shared by every backend.
#[derive(Debug, Clone)]
pub struct DirectoryManager {
    name: String,
    staging_directory: PathBuf,
    lock_manager: Arc<LockManager>,
    id_assigner: IdAssigner,
    dependency_resolver: DependencyResolver,
    debug: bool,
}

impl DirectoryManager {
    pub fn new(
        name: &str,
        staging_directory: &Path,
        id_assigner: IdAssigner,
        dependency_resolver: DependencyResolver,
        debug: bool,
    ) -> Result<Self> {
        fs_err::create_dir_all(staging_directory)?;
        Ok(Self {
            name: name.to_string(),
            staging_directory: staging_directory.to_path_buf(),
            lock_manager: Arc::new(LockManager::new()),
            id_assigner,
            dependency_resolver,
            debug,
        })
    }

    pub fn from_config(name: &str, config: &ManagerConfig, app: &AppConfig) -> Result<Self> {
        Self::new(
            name,
            &app.staging_directory,
            IdAssigner::new(config.assign_ids),
            DependencyResolver::new(app.tool_dependency_dir.as_deref()),
            app.debug,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn staging_directory(&self) -> &Path {
        &self.staging_directory
    }

    pub fn job_directory(&self, job_id: &JobId) -> JobDirectory {
        JobDirectory::new(&self.staging_directory, job_id, self.lock_manager.clone())
    }

    pub fn setup_job(
        &self,
        input_job_id: &str,
        tool_id: Option<&str>,
        tool_version: Option<&str>,
    ) -> Result<JobId> {
        let job_id = self.id_assigner.assign(input_job_id)?;
        let job_directory = self.job_directory(&job_id);
        job_directory.setup()?;
        for name in dirs::JOB_SUBDIRECTORIES {
            job_directory.make_directory(name)?;
        }
        if let Some(tool_id) = tool_id {
            job_directory.store_metadata(job_files::TOOL_ID, tool_id)?;
        }
        if let Some(tool_version) = tool_version {
            job_directory.store_metadata(job_files::TOOL_VERSION, tool_version)?;
        }
        tracing::info!(
            "Manager '{}' set up job '{}' (requested id '{}')",
            self.name,
            job_id,
            input_job_id
        );
        Ok(job_id)
    }

    /// `None` when the job has not finished or its exit code is unknown.
    pub fn return_code(&self, job_id: &JobId) -> Option<i32> {
        let raw = self
            .job_directory(job_id)
            .read_file_or(job_files::RETURN_CODE, b"");
        String::from_utf8_lossy(&raw).trim().parse().ok()
    }

    pub fn clean(&self, job_id: &JobId) -> Result<()> {
        if self.debug {
            tracing::info!("Debug mode enabled, keeping job directory of '{}'", job_id);
            return Ok(());
        }
        self.job_directory(job_id).delete()?;
        Ok(())
    }

    pub fn was_cancelled(&self, job_directory: &JobDirectory) -> bool {
        job_directory.has_metadata(job_files::CANCELLED)
    }

    pub fn record_submission(&self, job_directory: &JobDirectory) -> Result<()> {
        job_directory.store_metadata(job_files::SUBMITTED, &true)?;
        Ok(())
    }

    pub fn record_cancel(&self, job_directory: &JobDirectory) -> Result<()> {
        job_directory.store_metadata(job_files::CANCELLED, &true)?;
        Ok(())
    }

    pub fn record_external_id(
        &self,
        job_directory: &JobDirectory,
        external_id: &str,
    ) -> Result<()> {
        job_directory.store_metadata(job_files::EXTERNAL_ID, external_id)?;
        Ok(())
    }

    pub fn external_id(&self, job_directory: &JobDirectory) -> Result<String> {
        job_directory
            .load_metadata::<String>(job_files::EXTERNAL_ID)?
            .ok_or_else(|| ManagerError::ExternalIdMissing(job_directory.job_id().clone()))
    }

    /// Writes `command.sh` for the job, with stdout, stderr and the exit code
    /// landing in the job directory, and persists the command line.
    pub fn write_job_script(
        &self,
        job_directory: &JobDirectory,
        params: &LaunchParams,
        headers: Vec<String>,
    ) -> Result<PathBuf> {
        job_directory.store_metadata(job_files::COMMAND_LINE, &params.command_line)?;
        let root = job_directory.path();
        let script_path = root.join(job_files::JOB_SCRIPT);
        JobScript::new(
            &params.command_line,
            &job_directory.working_directory(),
            &root.join(job_files::RETURN_CODE),
        )
        .headers(headers)
        .env(&params.env)
        .setup_commands(
            self.dependency_resolver
                .shell_commands(params.dependencies_description.as_ref()),
        )
        .redirect(&root.join(job_files::STDOUT), &root.join(job_files::STDERR))
        .write_to(&script_path)?;
        Ok(script_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsar_core::config::IdAssignerKind;

    fn manager(root: &Path, debug: bool) -> DirectoryManager {
        DirectoryManager::new(
            "test",
            root,
            IdAssigner::new(IdAssignerKind::Galaxy),
            DependencyResolver::default(),
            debug,
        )
        .unwrap()
    }

    #[test]
    fn test_setup_job_creates_layout_and_rejects_duplicates() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path(), false);

        let job_id = manager.setup_job("7", Some("cat1"), Some("1.0")).unwrap();
        let job_directory = manager.job_directory(&job_id);
        for name in dirs::JOB_SUBDIRECTORIES {
            assert!(job_directory.path().join(name).is_dir());
        }
        assert_eq!(
            job_directory.load_metadata::<String>(job_files::TOOL_ID).unwrap(),
            Some("cat1".to_string())
        );
        assert!(manager.setup_job("7", None, None).is_err());
    }

    #[test]
    fn test_return_code_parsing() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path(), false);
        let job_id = manager.setup_job("1", None, None).unwrap();
        let job_directory = manager.job_directory(&job_id);

        assert_eq!(manager.return_code(&job_id), None);
        job_directory.write_file(job_files::RETURN_CODE, b"2\n").unwrap();
        assert_eq!(manager.return_code(&job_id), Some(2));
    }

    #[test]
    fn test_clean_respects_debug() {
        let root = tempfile::tempdir().unwrap();
        let keeping = manager(root.path(), true);
        let job_id = keeping.setup_job("1", None, None).unwrap();
        keeping.clean(&job_id).unwrap();
        assert!(keeping.job_directory(&job_id).exists());

        let cleaning = manager(root.path(), false);
        cleaning.clean(&job_id).unwrap();
        assert!(!cleaning.job_directory(&job_id).exists());
    }

    #[test]
    fn test_external_id_missing_is_typed() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path(), false);
        let job_id = manager.setup_job("1", None, None).unwrap();
        let job_directory = manager.job_directory(&job_id);

        let err = manager.external_id(&job_directory).unwrap_err();
        assert!(matches!(err, ManagerError::ExternalIdMissing(id) if id == job_id));
        manager.record_external_id(&job_directory, "1234").unwrap();
        assert_eq!(manager.external_id(&job_directory).unwrap(), "1234");
    }
}
