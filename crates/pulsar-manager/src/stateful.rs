//! Job lifecycle around a backend: asynchronous pre- and postprocessing,
//! edge-triggered state change notifications, durable tracking of active
//! jobs and their recovery after a restart.

use crate::active_jobs::ActiveJobs;
use crate::backend::{Backend, LaunchParams};
use crate::error::{ManagerError, Result};
use crate::staging;
use crate::threads::{join_with_timeout, recover};
use pulsar_core::config::ManagerConfig;
use pulsar_core::constants::managers::{ACTIVE_JOBS_SUFFIX, PREPROCESSING_JOBS_SUFFIX};
use pulsar_core::constants::{job_files, job_locks};
use pulsar_core::job_directory::JobDirectory;
use pulsar_core::model::{JobId, JobStatus};
use pulsar_staging::{LaunchRequest, ObjectStore, RetryActionExecutor};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Receives every state a job enters that clients should hear about.
pub type StateChangeCallback = Arc<dyn Fn(&JobId, JobStatus) + Send + Sync>;

const MONITOR_SLEEP_STEP: Duration = Duration::from_millis(50);

pub struct StatefulManagerProxy {
    inner: Arc<ProxyInner>,
    monitor: Mutex<Option<ManagerMonitor>>,
}

struct ProxyInner {
    backend: Arc<dyn Backend>,
    active_jobs: ActiveJobs,
    preprocessing_jobs: ActiveJobs,
    preprocess_executor: RetryActionExecutor,
    postprocess_executor: RetryActionExecutor,
    object_store: Option<Arc<dyn ObjectStore>>,
    min_polling_interval: Duration,
    callback: Mutex<Option<StateChangeCallback>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// What a status poll found out, acted upon once the status lock is released.
enum Transition {
    None,
    Notify(JobStatus),
    Finished(JobStatus),
}

impl StatefulManagerProxy {
    pub fn new(
        backend: Arc<dyn Backend>,
        config: &ManagerConfig,
        persistence_directory: Option<&Path>,
        object_store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self> {
        let name = backend.name().to_string();
        let inner = ProxyInner {
            active_jobs: ActiveJobs::new(&name, persistence_directory, ACTIVE_JOBS_SUFFIX)?,
            preprocessing_jobs: ActiveJobs::new(
                &name,
                persistence_directory,
                PREPROCESSING_JOBS_SUFFIX,
            )?,
            backend,
            preprocess_executor: RetryActionExecutor::from_config(&config.preprocess_action),
            postprocess_executor: RetryActionExecutor::from_config(&config.postprocess_action),
            object_store,
            min_polling_interval: config.min_polling_interval(),
            callback: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        };
        Ok(Self {
            inner: Arc::new(inner),
            monitor: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.backend.name()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Installs the callback and starts the background monitor that polls
    /// active jobs, so transitions are observed without client polling.
    pub fn set_state_change_callback(&self, callback: StateChangeCallback) {
        *recover(self.inner.callback.lock()) = Some(callback);
        let mut monitor = recover(self.monitor.lock());
        if monitor.is_none() {
            *monitor = Some(ManagerMonitor::start(self.inner.clone()));
        }
    }

    pub fn setup_job(
        &self,
        input_job_id: &str,
        tool_id: Option<&str>,
        tool_version: Option<&str>,
    ) -> Result<JobId> {
        self.inner.backend.setup_job(input_job_id, tool_id, tool_version)
    }

    pub fn job_directory(&self, job_id: &JobId) -> JobDirectory {
        self.inner.backend.job_directory(job_id)
    }

    /// Persists the request as the job's launch config and returns at once;
    /// staging and the backend launch happen on a worker thread.
    pub fn launch(&self, request: LaunchRequest) -> Result<()> {
        let job_directory = self.job_directory(&request.job_id);
        job_directory.store_metadata(job_files::LAUNCH_CONFIG, &request)?;
        self.inner.preprocessing_jobs.activate_job(&request.job_id)?;
        tracing::info!(
            "Manager '{}' accepted job '{}' for launch",
            self.name(),
            request.job_id
        );
        self.inner.spawn_preprocess(request);
        Ok(())
    }

    pub fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        self.inner.get_status(job_id)
    }

    /// Cancels the job unless it already reached a final state. The
    /// `cancelled` notification fires right away.
    pub fn kill(&self, job_id: &JobId) -> Result<()> {
        let job_directory = self.job_directory(job_id);
        if job_directory.has_metadata(job_files::FINAL_STATUS) {
            tracing::info!("Job '{}' already finished, not cancelling it", job_id);
            return Ok(());
        }
        self.inner.backend.kill(job_id)?;

        let newly_cancelled = {
            let _guard = job_directory.lock(job_locks::STATUS);
            let finished = job_directory.has_metadata(job_files::FINAL_STATUS)
                || job_directory.has_metadata(job_files::PREPROCESSING_FAILED);
            if !finished {
                job_directory.store_metadata(job_files::FINAL_STATUS, &JobStatus::Cancelled)?;
            }
            !finished
        };
        if newly_cancelled {
            self.inner.finish_tracking(job_id);
            self.inner.notify(job_id, JobStatus::Cancelled);
        }
        Ok(())
    }

    pub fn return_code(&self, job_id: &JobId) -> Option<i32> {
        self.inner.backend.return_code(job_id)
    }

    pub fn stdout_contents(&self, job_id: &JobId) -> Vec<u8> {
        self.inner.backend.stdout_contents(job_id)
    }

    pub fn stderr_contents(&self, job_id: &JobId) -> Vec<u8> {
        self.inner.backend.stderr_contents(job_id)
    }

    pub fn clean(&self, job_id: &JobId) -> Result<()> {
        self.inner.finish_tracking(job_id);
        self.inner.preprocessing_jobs.deactivate_job(job_id);
        self.inner.backend.clean(job_id)
    }

    /// For submissions rejected before `launch` was reached: the job still
    /// ends `failed` with a return code and stderr like any other failure.
    pub fn handle_failure_before_launch(&self, job_id: &JobId, message: &str) {
        self.inner.fail_before_launch(job_id, message);
    }

    pub fn active_job_ids(&self) -> Vec<JobId> {
        self.inner.active_jobs.active_job_ids()
    }

    /// Resumes tracking after a restart. Interrupted preprocessing is run
    /// again from the persisted launch config; active jobs the backend can no
    /// longer follow are reported `lost` once and dropped.
    pub fn recover_active_jobs(&self) {
        let inner = &self.inner;
        for job_id in inner.preprocessing_jobs.active_job_ids() {
            let job_directory = self.job_directory(&job_id);
            let launch = match job_directory.load_metadata::<LaunchRequest>(job_files::LAUNCH_CONFIG)
            {
                Ok(Some(launch)) => launch,
                Ok(None) => {
                    tracing::warn!("Job '{}' has no launch config, cannot resume it", job_id);
                    inner.preprocessing_jobs.deactivate_job(&job_id);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Unreadable launch config for job '{}': {}", job_id, e);
                    inner.preprocessing_jobs.deactivate_job(&job_id);
                    continue;
                }
            };
            if job_directory.has_metadata(job_files::PREPROCESSED)
                || job_directory.has_metadata(job_files::FINAL_STATUS)
            {
                inner.preprocessing_jobs.deactivate_job(&job_id);
                continue;
            }
            tracing::info!("Resuming preprocessing of job '{}'", job_id);
            inner.spawn_preprocess(launch);
        }

        for job_id in inner.active_jobs.active_job_ids() {
            let Err(e) = inner.backend.recover_active_job(&job_id) else {
                tracing::debug!("Recovered active job '{}'", job_id);
                continue;
            };
            tracing::warn!("Lost track of job '{}': {}", job_id, e);
            inner.finish_tracking(&job_id);
            let job_directory = self.job_directory(&job_id);
            {
                let _guard = job_directory.lock(job_locks::STATUS);
                if let Err(e) = job_directory.store_metadata(job_files::FINAL_STATUS, &JobStatus::Lost)
                {
                    tracing::error!("Failed to record job '{}' as lost: {}", job_id, e);
                }
            }
            inner.notify(&job_id, JobStatus::Lost);
        }
    }

    /// Stops the monitor, then waits for staging threads and the backend.
    /// Running jobs are left alone.
    pub fn shutdown(&self, timeout: Option<Duration>) {
        if let Some(monitor) = recover(self.monitor.lock()).take() {
            monitor.stop(timeout);
        }
        let workers = std::mem::take(&mut *recover(self.inner.workers.lock()));
        join_with_timeout(workers, timeout, "staging");
        self.inner.backend.shutdown(timeout);
    }
}

impl ProxyInner {
    fn job_directory(&self, job_id: &JobId) -> JobDirectory {
        self.backend.job_directory(job_id)
    }

    fn notify(&self, job_id: &JobId, status: JobStatus) {
        let callback = recover(self.callback.lock()).clone();
        match callback {
            Some(callback) => callback(job_id, status),
            None => tracing::debug!("Job '{}' entered state '{}'", job_id, status),
        }
    }

    fn spawn_worker<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::spawn(work);
        let mut workers = recover(self.workers.lock());
        workers.retain(|h| !h.is_finished());
        workers.push(handle);
    }

    fn finish_tracking(&self, job_id: &JobId) {
        self.active_jobs.deactivate_job(job_id);
        self.backend.deactivate_job(job_id);
    }

    fn spawn_preprocess(self: &Arc<Self>, request: LaunchRequest) {
        let inner = self.clone();
        self.spawn_worker(move || inner.preprocess_and_launch(&request));
    }

    fn preprocess_and_launch(&self, request: &LaunchRequest) {
        let job_id = &request.job_id;
        let job_directory = self.job_directory(job_id);
        if job_directory.has_metadata(job_files::FINAL_STATUS) {
            tracing::info!("Job '{}' finished before launch, skipping it", job_id);
            self.preprocessing_jobs.deactivate_job(job_id);
            return;
        }

        let launched = staging::preprocess(
            &job_directory,
            &request.remote_staging,
            &self.preprocess_executor,
            self.object_store.as_deref(),
        )
        .and_then(|()| self.backend.launch(job_id, &LaunchParams::from(request)))
        .and_then(|()| {
            let _guard = job_directory.lock(job_locks::STATUS);
            job_directory.store_metadata(job_files::PREPROCESSED, &true)?;
            if !job_directory.has_metadata(job_files::FINAL_STATUS) {
                self.active_jobs.activate_job(job_id)?;
            }
            Ok(())
        });

        match launched {
            Ok(()) => {
                self.preprocessing_jobs.deactivate_job(job_id);
                tracing::info!("Launched job '{}'", job_id);
            }
            Err(e) => {
                tracing::error!("Failed to preprocess and launch job '{}': {}", job_id, e);
                self.fail_before_launch(job_id, &e.to_string());
            }
        }
    }

    /// Records a job that never reached its backend as failed, with
    /// `message` as its stderr, and fires `failed`.
    fn fail_before_launch(&self, job_id: &JobId, message: &str) {
        let job_directory = self.job_directory(job_id);
        {
            let _guard = job_directory.lock(job_locks::STATUS);
            let recorded = job_directory
                .store_metadata(job_files::PREPROCESSING_FAILED, &true)
                .and_then(|()| job_directory.write_file(job_files::RETURN_CODE, b"1").map(|_| ()))
                .and_then(|()| {
                    job_directory
                        .write_file(job_files::STDERR, message.as_bytes())
                        .map(|_| ())
                })
                .and_then(|()| {
                    job_directory.store_metadata(job_files::FINAL_STATUS, &JobStatus::Failed)
                });
            if let Err(e) = recorded {
                tracing::error!("Failed to record failure of job '{}': {}", job_id, e);
            }
        }
        self.preprocessing_jobs.deactivate_job(job_id);
        self.notify(job_id, JobStatus::Failed);
    }

    fn get_status(self: &Arc<Self>, job_id: &JobId) -> Result<JobStatus> {
        let job_directory = self.job_directory(job_id);
        let (status, transition) = {
            let _guard = job_directory.lock(job_locks::STATUS);
            self.observe_status(&job_directory)?
        };

        match transition {
            Transition::None => {}
            Transition::Notify(status) => self.notify(job_id, status),
            Transition::Finished(status) => {
                self.finish_tracking(job_id);
                if status == JobStatus::Complete {
                    self.spawn_postprocess(job_id.clone());
                } else {
                    self.notify(job_id, status);
                }
            }
        }
        Ok(status)
    }

    /// Caller holds the job's status lock.
    fn observe_status(&self, job_directory: &JobDirectory) -> Result<(JobStatus, Transition)> {
        if job_directory.has_metadata(job_files::PREPROCESSING_FAILED) {
            return Ok((JobStatus::Failed, Transition::None));
        }
        if let Some(status) = job_directory.load_metadata::<JobStatus>(job_files::FINAL_STATUS)? {
            return Ok((postprocessing_veneer(job_directory, status), Transition::None));
        }
        if !job_directory.has_metadata(job_files::PREPROCESSED) {
            return Ok((JobStatus::Preprocessing, Transition::None));
        }

        let status = self.backend.get_status(job_directory.job_id())?;
        if status.is_done() {
            job_directory.store_metadata(job_files::FINAL_STATUS, &status)?;
            let shown = postprocessing_veneer(job_directory, status);
            return Ok((shown, Transition::Finished(status)));
        }
        if status == JobStatus::Running && !job_directory.has_metadata(job_files::RUNNING) {
            job_directory.store_metadata(job_files::RUNNING, &true)?;
            return Ok((status, Transition::Notify(status)));
        }
        Ok((status, Transition::None))
    }

    fn spawn_postprocess(self: &Arc<Self>, job_id: JobId) {
        let inner = self.clone();
        self.spawn_worker(move || inner.postprocess(&job_id));
    }

    fn postprocess(&self, job_id: &JobId) {
        let job_directory = self.job_directory(job_id);
        let collected = job_directory
            .load_metadata::<LaunchRequest>(job_files::LAUNCH_CONFIG)
            .map_err(ManagerError::from)
            .and_then(|launch| match launch {
                Some(launch) => staging::postprocess(
                    &job_directory,
                    &launch,
                    &self.postprocess_executor,
                    self.object_store.as_deref(),
                ),
                None => Ok(true),
            });
        let succeeded = match collected {
            Ok(succeeded) => succeeded,
            Err(e) => {
                tracing::error!("Failed to postprocess job '{}': {}", job_id, e);
                false
            }
        };

        let final_status = if succeeded {
            JobStatus::Complete
        } else {
            JobStatus::Failed
        };
        {
            let _guard = job_directory.lock(job_locks::STATUS);
            if !succeeded {
                if let Err(e) = job_directory.store_metadata(job_files::FINAL_STATUS, &final_status)
                {
                    tracing::error!("Failed to record failure of job '{}': {}", job_id, e);
                }
            }
            if let Err(e) = job_directory.store_metadata(job_files::POSTPROCESSED, &true) {
                tracing::error!("Failed to mark job '{}' postprocessed: {}", job_id, e);
            }
        }
        tracing::info!("Postprocessing of job '{}' finished: {}", job_id, final_status);
        self.notify(job_id, final_status);
    }
}

/// A completed job reads as `postprocessing` until its outputs were collected.
fn postprocessing_veneer(job_directory: &JobDirectory, status: JobStatus) -> JobStatus {
    if status == JobStatus::Complete && !job_directory.has_metadata(job_files::POSTPROCESSED) {
        JobStatus::Postprocessing
    } else {
        status
    }
}

/// Polls every active job of one manager from a single background thread,
/// spacing passes by the manager's minimum polling interval.
struct ManagerMonitor {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ManagerMonitor {
    fn start(inner: Arc<ProxyInner>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = stop.clone();
        let handle = thread::spawn(move || {
            while !stopped.load(Ordering::SeqCst) {
                let pass_started = Instant::now();
                for job_id in inner.active_jobs.active_job_ids() {
                    if stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Err(e) = inner.get_status(&job_id) {
                        tracing::warn!("Failed to check status of job '{}': {}", job_id, e);
                    }
                }
                let next_pass = pass_started + inner.min_polling_interval;
                while !stopped.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now >= next_pass {
                        break;
                    }
                    thread::sleep((next_pass - now).min(MONITOR_SLEEP_STEP));
                }
            }
        });
        Self { stop, handle }
    }

    fn stop(self, timeout: Option<Duration>) {
        self.stop.store(true, Ordering::SeqCst);
        join_with_timeout(vec![self.handle], timeout, "manager monitor");
    }
}
