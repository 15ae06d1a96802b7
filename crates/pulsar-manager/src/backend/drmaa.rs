use super::{Backend, DirectoryManager, LaunchParams};
use crate::error::Result;
use pulsar_core::constants::{job_files, job_locks};
use pulsar_core::model::{JobId, JobStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const NATIVE_SPECIFICATION_PARAM: &str = "native_specification";

/// Job states defined by the DRMAA 1.0 API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrmaaJobState {
    Undetermined,
    QueuedActive,
    SystemOnHold,
    UserOnHold,
    UserSystemOnHold,
    Running,
    SystemSuspended,
    UserSuspended,
    UserSystemSuspended,
    Done,
    Failed,
}

impl From<DrmaaJobState> for JobStatus {
    fn from(state: DrmaaJobState) -> Self {
        match state {
            DrmaaJobState::QueuedActive
            | DrmaaJobState::SystemOnHold
            | DrmaaJobState::UserOnHold
            | DrmaaJobState::UserSystemOnHold
            | DrmaaJobState::SystemSuspended
            | DrmaaJobState::UserSuspended
            | DrmaaJobState::UserSystemSuspended => JobStatus::Queued,
            DrmaaJobState::Running => JobStatus::Running,
            DrmaaJobState::Undetermined | DrmaaJobState::Done | DrmaaJobState::Failed => {
                JobStatus::Complete
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmaaJobTemplate {
    pub job_name: String,
    pub remote_command: PathBuf,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub output_path: PathBuf,
    pub error_path: PathBuf,
    pub native_specification: Option<String>,
}

/// An open DRMAA session. The backend owns its session and closes it on
/// shutdown.
pub trait DrmaaSession: Send + Sync {
    /// Submits a job, returning its external id.
    fn run_job(&self, template: &DrmaaJobTemplate) -> Result<String>;

    fn job_status(&self, external_id: &str) -> Result<DrmaaJobState>;

    fn kill(&self, external_id: &str) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct DrmaaBackend {
    base: DirectoryManager,
    session: Arc<dyn DrmaaSession>,
    native_specification: Option<String>,
}

impl DrmaaBackend {
    pub fn new(
        base: DirectoryManager,
        session: Arc<dyn DrmaaSession>,
        native_specification: Option<String>,
    ) -> Self {
        Self {
            base,
            session,
            native_specification,
        }
    }
}

impl Backend for DrmaaBackend {
    fn base(&self) -> &DirectoryManager {
        &self.base
    }

    fn launch(&self, job_id: &JobId, params: &LaunchParams) -> Result<()> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        if self.base.was_cancelled(&job_directory) {
            tracing::info!("Job '{}' was cancelled before submission", job_id);
            return Ok(());
        }
        let script = self.base.write_job_script(&job_directory, params, Vec::new())?;
        let root = job_directory.path();
        let template = DrmaaJobTemplate {
            job_name: format!("pulsar_{}_{}", self.base.name(), job_id),
            remote_command: PathBuf::from("/bin/sh"),
            args: vec![script.to_string_lossy().to_string()],
            working_directory: job_directory.working_directory(),
            output_path: root.join(job_files::SCHEDULER_STDOUT),
            error_path: root.join(job_files::SCHEDULER_STDERR),
            native_specification: params
                .submit_params
                .get(NATIVE_SPECIFICATION_PARAM)
                .cloned()
                .or_else(|| self.native_specification.clone()),
        };
        let external_id = self.session.run_job(&template)?;
        self.base.record_external_id(&job_directory, &external_id)?;
        self.base.record_submission(&job_directory)?;
        tracing::info!("Submitted job '{}' to DRMAA as '{}'", job_id, external_id);
        Ok(())
    }

    fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        if self.base.was_cancelled(&job_directory) {
            return Ok(JobStatus::Cancelled);
        }
        let external_id = self.base.external_id(&job_directory)?;
        Ok(self.session.job_status(&external_id)?.into())
    }

    fn kill(&self, job_id: &JobId) -> Result<()> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        self.base.record_cancel(&job_directory)?;
        if let Ok(external_id) = self.base.external_id(&job_directory) {
            if let Err(e) = self.session.kill(&external_id) {
                tracing::warn!("Failed to kill DRMAA job '{}': {}", external_id, e);
            }
        }
        Ok(())
    }

    fn recover_active_job(&self, job_id: &JobId) -> Result<()> {
        self.base.external_id(&self.base.job_directory(job_id))?;
        Ok(())
    }

    fn shutdown(&self, _timeout: Option<Duration>) {
        if let Err(e) = self.session.close() {
            tracing::warn!("Failed to close DRMAA session: {}", e);
        }
    }
}
