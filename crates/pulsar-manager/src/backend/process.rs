//! Local process execution shared by the unqueued and thread-pool backends.

use super::DirectoryManager;
use crate::error::{ManagerError, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use pulsar_core::constants::{job_files, job_locks};
use pulsar_core::constants::managers::KILL_GRACE_PERIOD_MS;
use pulsar_core::job_directory::JobDirectory;
use pulsar_core::logging;
use pulsar_core::model::JobStatus;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const KILL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Starts the job script in its own process group so a kill reaches every
/// process it spawned. Output is redirected by the script itself.
pub(super) fn spawn_job_script(job_directory: &JobDirectory, script: &Path) -> Result<Child> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg(script)
        .current_dir(job_directory.working_directory())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);
    logging::log_and_print_command(&cmd);
    Ok(cmd.spawn()?)
}

/// Caller holds the job's execution lock.
pub(super) fn record_pid(job_directory: &JobDirectory, pid: u32) -> Result<()> {
    job_directory.store_metadata(job_files::PID, &pid)?;
    job_directory.remove_metadata(job_files::SUBMITTED);
    Ok(())
}

fn exit_code(status: &ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|s| -s))
}

/// Records how the process ended. The job script writes its own return code;
/// it is only filled in here when the script never got that far.
pub(super) fn finish_execution(job_directory: &JobDirectory, status: io::Result<ExitStatus>) {
    let _guard = job_directory.lock(job_locks::EXECUTION);
    match status {
        Ok(status) => {
            if !job_directory.contains_file(job_files::RETURN_CODE) {
                if let Some(code) = exit_code(&status) {
                    let recorded = job_directory
                        .write_file(job_files::RETURN_CODE, code.to_string().as_bytes());
                    if let Err(e) = recorded {
                        tracing::error!(
                            "Failed to record return code of job '{}': {}",
                            job_directory.job_id(),
                            e
                        );
                    }
                }
            }
            tracing::info!("Job '{}' finished: {}", job_directory.job_id(), status);
        }
        Err(e) => tracing::error!(
            "Failed to wait for job '{}': {}",
            job_directory.job_id(),
            e
        ),
    }
    job_directory.remove_metadata(job_files::PID);
    job_directory.remove_metadata(job_files::SUBMITTED);
}

/// Records a failure to start the job as its stderr.
pub(super) fn fail_execution(job_directory: &JobDirectory, error: &ManagerError) {
    tracing::error!("Failed to start job '{}': {}", job_directory.job_id(), error);
    let _guard = job_directory.lock(job_locks::EXECUTION);
    if let Err(e) = job_directory.write_file(job_files::STDERR, error.to_string().as_bytes()) {
        tracing::warn!(
            "Failed to record start failure of job '{}': {}",
            job_directory.job_id(),
            e
        );
    }
    job_directory.remove_metadata(job_files::PID);
    job_directory.remove_metadata(job_files::SUBMITTED);
}

fn to_pid(raw: u32) -> Option<Pid> {
    i32::try_from(raw).ok().map(Pid::from_raw)
}

pub(super) fn recorded_pid(job_directory: &JobDirectory) -> Option<Pid> {
    job_directory
        .load_metadata_or::<Option<u32>>(job_files::PID, None)
        .and_then(to_pid)
}

pub(super) fn is_alive(pid: Pid) -> bool {
    signal::kill(pid, None).is_ok()
}

/// Status from the sentinel files. Caller holds the execution lock.
pub(super) fn local_status(base: &DirectoryManager, job_directory: &JobDirectory) -> JobStatus {
    if base.was_cancelled(job_directory) {
        JobStatus::Cancelled
    } else if let Some(pid) = recorded_pid(job_directory) {
        if is_alive(pid) {
            JobStatus::Running
        } else {
            JobStatus::Complete
        }
    } else if job_directory.has_metadata(job_files::SUBMITTED) {
        JobStatus::Queued
    } else {
        JobStatus::Complete
    }
}

/// Marks the job cancelled, then terminates its process group: TERM first,
/// KILL once the grace period passes.
pub(super) fn kill_job(base: &DirectoryManager, job_directory: &JobDirectory) -> Result<()> {
    let pid = {
        let _guard = job_directory.lock(job_locks::EXECUTION);
        base.record_cancel(job_directory)?;
        recorded_pid(job_directory)
    };
    tracing::info!("Cancelling job '{}'", job_directory.job_id());
    if let Some(pid) = pid {
        terminate(pid, Duration::from_millis(KILL_GRACE_PERIOD_MS));
    }
    Ok(())
}

fn terminate(pid: Pid, grace: Duration) {
    if let Err(e) = signal::killpg(pid, Signal::SIGTERM) {
        tracing::debug!("SIGTERM to process group {} failed: {}", pid, e);
        return;
    }
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return;
        }
        thread::sleep(KILL_POLL_INTERVAL);
    }
    tracing::warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
    if let Err(e) = signal::killpg(pid, Signal::SIGKILL) {
        tracing::debug!("SIGKILL to process group {} failed: {}", pid, e);
    }
}
