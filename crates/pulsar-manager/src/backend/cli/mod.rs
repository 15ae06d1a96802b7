mod plugins;
mod remote_command;
mod shell;

pub use plugins::{plugin_for, ExternalState, JobPlugin, Slurm, Torque};
pub use remote_command::RemoteCommand;
pub use shell::{shell_from_config, CommandOutput, LocalShell, SecureShell, ShellInterface};

use super::external::parse_external_id;
use super::{Backend, DirectoryManager, LaunchParams};
use crate::error::{ManagerError, Result};
use pulsar_core::constants::{job_files, job_locks};
use pulsar_core::model::{JobId, JobStatus};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Submits job scripts to a batch system through its command-line tools.
pub struct CliQueueBackend {
    base: DirectoryManager,
    shell: Arc<dyn ShellInterface>,
    plugin: Box<dyn JobPlugin>,
    job_params: BTreeMap<String, String>,
}

impl CliQueueBackend {
    pub fn new(
        base: DirectoryManager,
        shell: Arc<dyn ShellInterface>,
        plugin: Box<dyn JobPlugin>,
        job_params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            base,
            shell,
            plugin,
            job_params,
        }
    }
}

/// Runs a submit command and returns the external id it reports.
pub(super) fn submit_external(
    shell: &dyn ShellInterface,
    command: &RemoteCommand,
    job_id: &JobId,
) -> Result<String> {
    let output = shell.execute(command)?;
    if !output.success() {
        return Err(ManagerError::SubmissionFailed {
            command: command.to_shell_string(),
            code: output.returncode,
            stderr: output.stderr,
        });
    }
    parse_external_id(&output.stdout)
        .ok_or_else(|| ManagerError::ExternalIdMissing(job_id.clone()))
}

impl Backend for CliQueueBackend {
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

        let mut job_params = self.job_params.clone();
        job_params.extend(params.submit_params.clone());
        let root = job_directory.path();
        let headers = self.plugin.headers(
            &job_params,
            &format!("pulsar_{}_{}", self.base.name(), job_id),
            &root.join(job_files::SCHEDULER_STDOUT),
            &root.join(job_files::SCHEDULER_STDERR),
        );
        let script = self.base.write_job_script(&job_directory, params, headers)?;

        let external_id =
            submit_external(self.shell.as_ref(), &self.plugin.submit(&script), job_id)?;
        self.base.record_external_id(&job_directory, &external_id)?;
        self.base.record_submission(&job_directory)?;
        tracing::info!(
            "Submitted job '{}' to {} as '{}'",
            job_id,
            self.plugin.name(),
            external_id
        );
        Ok(())
    }

    fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        if self.base.was_cancelled(&job_directory) {
            return Ok(JobStatus::Cancelled);
        }
        let external_id = self.base.external_id(&job_directory)?;
        let output = self.shell.execute(&self.plugin.status(&external_id))?;
        let state = self.plugin.parse_status(&output.stdout, &external_id)?;
        Ok(state.into())
    }

    fn kill(&self, job_id: &JobId) -> Result<()> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        self.base.record_cancel(&job_directory)?;
        let Ok(external_id) = self.base.external_id(&job_directory) else {
            return Ok(());
        };
        let output = self.shell.execute(&self.plugin.delete(&external_id))?;
        if !output.success() {
            tracing::warn!(
                "Failed to delete {} job '{}': {}",
                self.plugin.name(),
                external_id,
                output.stderr.trim()
            );
        }
        Ok(())
    }

    fn recover_active_job(&self, job_id: &JobId) -> Result<()> {
        self.base.external_id(&self.base.job_directory(job_id))?;
        Ok(())
    }
}
