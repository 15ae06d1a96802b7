use super::{process, Backend, DirectoryManager, LaunchParams};
use crate::error::{ManagerError, Result};
use crate::threads::{join_with_timeout, recover};
use pulsar_core::constants::{job_files, job_locks};
use pulsar_core::model::{JobId, JobStatus};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum WorkItem {
    Run(JobId),
    Stop,
}

/// Runs jobs on a fixed pool of worker threads, at most one job per worker.
pub struct ThreadPoolQueueBackend {
    base: DirectoryManager,
    sender: Mutex<Sender<WorkItem>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolQueueBackend {
    pub fn new(base: DirectoryManager, num_workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..num_workers.max(1))
            .map(|index| {
                let base = base.clone();
                let receiver = receiver.clone();
                thread::spawn(move || worker_loop(index, &base, &receiver))
            })
            .collect();
        tracing::info!(
            "Manager '{}' started {} worker thread(s)",
            base.name(),
            num_workers.max(1)
        );
        Self {
            base,
            sender: Mutex::new(sender),
            workers: Mutex::new(workers),
        }
    }

    fn enqueue(&self, job_id: &JobId) -> Result<()> {
        recover(self.sender.lock())
            .send(WorkItem::Run(job_id.clone()))
            .map_err(|_| {
                ManagerError::Io(std::io::Error::other(format!(
                    "manager '{}' is shut down, cannot queue job '{}'",
                    self.base.name(),
                    job_id
                )))
            })
    }
}

fn worker_loop(index: usize, base: &DirectoryManager, receiver: &Mutex<Receiver<WorkItem>>) {
    loop {
        let item = recover(receiver.lock()).recv();
        match item {
            Ok(WorkItem::Run(job_id)) => run_job(base, &job_id),
            Ok(WorkItem::Stop) | Err(_) => break,
        }
    }
    tracing::debug!("Worker {} of manager '{}' stopped", index, base.name());
}

fn run_job(base: &DirectoryManager, job_id: &JobId) {
    let job_directory = base.job_directory(job_id);
    let script = job_directory.path().join(job_files::JOB_SCRIPT);
    let spawned = {
        let _guard = job_directory.lock(job_locks::EXECUTION);
        if base.was_cancelled(&job_directory) {
            tracing::info!("Job '{}' was cancelled while queued", job_id);
            job_directory.remove_metadata(job_files::SUBMITTED);
            return;
        }
        process::spawn_job_script(&job_directory, &script).and_then(|child| {
            process::record_pid(&job_directory, child.id())?;
            Ok(child)
        })
    };
    match spawned {
        Ok(mut child) => {
            let status = child.wait();
            process::finish_execution(&job_directory, status);
        }
        Err(e) => process::fail_execution(&job_directory, &e),
    }
}

impl Backend for ThreadPoolQueueBackend {
    fn base(&self) -> &DirectoryManager {
        &self.base
    }

    fn launch(&self, job_id: &JobId, params: &LaunchParams) -> Result<()> {
        let job_directory = self.base.job_directory(job_id);
        self.base.write_job_script(&job_directory, params, Vec::new())?;
        {
            let _guard = job_directory.lock(job_locks::EXECUTION);
            self.base.record_submission(&job_directory)?;
        }
        self.enqueue(job_id)
    }

    fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        Ok(process::local_status(&self.base, &job_directory))
    }

    fn kill(&self, job_id: &JobId) -> Result<()> {
        process::kill_job(&self.base, &self.base.job_directory(job_id))
    }

    /// Finished jobs need nothing. A job whose process outlived the previous
    /// server keeps being tracked through its pid; anything else that was
    /// queued or interrupted runs again from its persisted script.
    fn recover_active_job(&self, job_id: &JobId) -> Result<()> {
        let job_directory = self.base.job_directory(job_id);
        {
            let _guard = job_directory.lock(job_locks::EXECUTION);
            if job_directory.contains_file(job_files::RETURN_CODE)
                || self.base.was_cancelled(&job_directory)
            {
                return Ok(());
            }
            if !job_directory.has_metadata(job_files::COMMAND_LINE)
                || !job_directory.contains_file(job_files::JOB_SCRIPT)
            {
                return Err(ManagerError::RecoveryFailed {
                    job_id: job_id.clone(),
                    reason: "no persisted command line".to_string(),
                });
            }
            if process::recorded_pid(&job_directory).is_some_and(process::is_alive) {
                return Ok(());
            }
            job_directory.remove_metadata(job_files::PID);
            self.base.record_submission(&job_directory)?;
        }
        tracing::info!("Re-queueing recovered job '{}'", job_id);
        self.enqueue(job_id)
    }

    fn shutdown(&self, timeout: Option<Duration>) {
        let workers = std::mem::take(&mut *recover(self.workers.lock()));
        {
            let sender = recover(self.sender.lock());
            for _ in 0..workers.len() {
                let _ = sender.send(WorkItem::Stop);
            }
        }
        join_with_timeout(workers, timeout, "queue worker");
    }
}
