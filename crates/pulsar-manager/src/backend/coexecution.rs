use super::{Backend, DirectoryManager, LaunchParams};
use crate::error::Result;
use pulsar_core::constants::{job_files, job_locks};
use pulsar_core::model::{JobId, JobStatus};

/// Leaves execution to a companion process sharing the staging directory.
///
/// `launch` only writes `command.sh` and marks the job submitted; the
/// companion runs the script, which records its own return code.
pub struct CoexecutionBackend {
    base: DirectoryManager,
}

impl CoexecutionBackend {
    pub fn new(base: DirectoryManager) -> Self {
        Self { base }
    }
}

impl Backend for CoexecutionBackend {
    fn base(&self) -> &DirectoryManager {
        &self.base
    }

    fn launch(&self, job_id: &JobId, params: &LaunchParams) -> Result<()> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        if self.base.was_cancelled(&job_directory) {
            return Ok(());
        }
        let script = self.base.write_job_script(&job_directory, params, Vec::new())?;
        self.base.record_submission(&job_directory)?;
        tracing::info!(
            "Job script for '{}' ready for co-execution at '{}'",
            job_id,
            script.display()
        );
        Ok(())
    }

    fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        let status = if self.base.was_cancelled(&job_directory) {
            JobStatus::Cancelled
        } else if job_directory.contains_file(job_files::RETURN_CODE) {
            JobStatus::Complete
        } else if job_directory.has_metadata(job_files::SUBMITTED) {
            JobStatus::Running
        } else {
            JobStatus::Queued
        };
        Ok(status)
    }

    fn kill(&self, job_id: &JobId) -> Result<()> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        self.base.record_cancel(&job_directory)?;
        Ok(())
    }
}
