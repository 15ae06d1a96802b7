use super::{process, Backend, DirectoryManager, LaunchParams};
use crate::error::Result;
use crate::threads::{join_with_timeout, recover};
use pulsar_core::constants::job_locks;
use pulsar_core::model::{JobId, JobStatus};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Runs every job immediately as a child process of the server.
pub struct UnqueuedBackend {
    base: DirectoryManager,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

impl UnqueuedBackend {
    pub fn new(base: DirectoryManager) -> Self {
        Self {
            base,
            monitors: Mutex::new(Vec::new()),
        }
    }
}

impl Backend for UnqueuedBackend {
    fn base(&self) -> &DirectoryManager {
        &self.base
    }

    fn launch(&self, job_id: &JobId, params: &LaunchParams) -> Result<()> {
        let job_directory = self.base.job_directory(job_id);
        let script = self.base.write_job_script(&job_directory, params, Vec::new())?;

        let spawned = {
            let _guard = job_directory.lock(job_locks::EXECUTION);
            if self.base.was_cancelled(&job_directory) {
                tracing::info!("Job '{}' was cancelled before launch", job_id);
                return Ok(());
            }
            self.base.record_submission(&job_directory)?;
            process::spawn_job_script(&job_directory, &script).and_then(|child| {
                process::record_pid(&job_directory, child.id())?;
                Ok(child)
            })
        };
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                process::fail_execution(&job_directory, &e);
                return Err(e);
            }
        };
        tracing::info!("Started job '{}' as pid {}", job_id, child.id());

        let handle = thread::spawn(move || {
            let mut child = child;
            let status = child.wait();
            process::finish_execution(&job_directory, status);
        });
        let mut monitors = recover(self.monitors.lock());
        monitors.retain(|h| !h.is_finished());
        monitors.push(handle);
        Ok(())
    }

    fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        Ok(process::local_status(&self.base, &job_directory))
    }

    fn kill(&self, job_id: &JobId) -> Result<()> {
        process::kill_job(&self.base, &self.base.job_directory(job_id))
    }

    fn shutdown(&self, timeout: Option<Duration>) {
        let monitors = std::mem::take(&mut *recover(self.monitors.lock()));
        join_with_timeout(monitors, timeout, "job monitor");
    }
}
