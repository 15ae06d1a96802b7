use super::cli::{submit_external, RemoteCommand, ShellInterface};
use super::{Backend, DirectoryManager, LaunchParams};
use crate::error::Result;
use crate::threads::recover;
use pulsar_core::constants::{job_files, job_locks};
use pulsar_core::job_directory::JobDirectory;
use pulsar_core::model::{JobId, JobStatus};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};

const EVENT_EXECUTE: &str = "001";
const EVENT_EVICTED: &str = "004";
const EVENT_TERMINATED: &str = "005";
const EVENT_SHADOW_EXCEPTION: &str = "007";
const EVENT_ABORTED: &str = "009";

/// Submits jobs to HTCondor and follows them through the user log.
pub struct CondorBackend {
    base: DirectoryManager,
    shell: Arc<dyn ShellInterface>,
    submit_overrides: BTreeMap<String, String>,
    /// Last parsed status per job, keyed by the log size it was parsed at.
    log_cache: Mutex<HashMap<JobId, (u64, JobStatus)>>,
}

impl CondorBackend {
    pub fn new(
        base: DirectoryManager,
        shell: Arc<dyn ShellInterface>,
        submit_overrides: BTreeMap<String, String>,
    ) -> Self {
        Self {
            base,
            shell,
            submit_overrides,
            log_cache: Mutex::new(HashMap::new()),
        }
    }

    fn submit_description(
        &self,
        job_directory: &JobDirectory,
        script: &Path,
        submit_params: &BTreeMap<String, String>,
    ) -> String {
        let root = job_directory.path();
        let mut entries: Vec<(String, String)> = vec![
            ("universe".to_string(), "vanilla".to_string()),
            ("executable".to_string(), script.display().to_string()),
            (
                "output".to_string(),
                root.join(job_files::SCHEDULER_STDOUT).display().to_string(),
            ),
            (
                "error".to_string(),
                root.join(job_files::SCHEDULER_STDERR).display().to_string(),
            ),
            (
                "log".to_string(),
                root.join(job_files::CONDOR_LOG).display().to_string(),
            ),
            ("getenv".to_string(), "true".to_string()),
        ];
        for (key, value) in self.submit_overrides.iter().chain(submit_params) {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.clone(),
                None => entries.push((key.clone(), value.clone())),
            }
        }

        let mut description = String::new();
        for (key, value) in entries {
            let _ = writeln!(description, "{} = {}", key, value);
        }
        description.push_str("queue\n");
        description
    }

    fn log_status(&self, job_directory: &JobDirectory, external_id: &str) -> JobStatus {
        let log_path = job_directory.path().join(job_files::CONDOR_LOG);
        let Ok(metadata) = fs_err::metadata(&log_path) else {
            return JobStatus::Queued;
        };
        let size = metadata.len();
        let job_id = job_directory.job_id();
        let mut cache = recover(self.log_cache.lock());
        if let Some((cached_size, status)) = cache.get(job_id) {
            if *cached_size == size {
                return *status;
            }
        }
        let contents = fs_err::read_to_string(&log_path).unwrap_or_default();
        let status = parse_user_log(&contents, external_id);
        cache.insert(job_id.clone(), (size, status));
        status
    }
}

/// Events in a user log start with `NNN (CLUSTER.PROC.SUBPROC)`, the
/// cluster padded to three digits.
fn parse_user_log(contents: &str, external_id: &str) -> JobStatus {
    let cluster = match external_id.parse::<u64>() {
        Ok(number) => format!("{:03}", number),
        Err(_) => external_id.to_string(),
    };
    let seen = |event: &str| contents.contains(&format!("{} ({}.", event, cluster));

    if seen(EVENT_TERMINATED) || seen(EVENT_ABORTED) {
        JobStatus::Complete
    } else if seen(EVENT_EXECUTE) && !seen(EVENT_EVICTED) && !seen(EVENT_SHADOW_EXCEPTION) {
        JobStatus::Running
    } else {
        JobStatus::Queued
    }
}

impl Backend for CondorBackend {
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
        let description = self.submit_description(&job_directory, &script, &params.submit_params);
        let submit_file =
            job_directory.write_file(job_files::CONDOR_SUBMIT, description.as_bytes())?;

        let command = RemoteCommand::new("condor_submit").path_arg(&submit_file);
        let external_id = submit_external(self.shell.as_ref(), &command, job_id)?;
        self.base.record_external_id(&job_directory, &external_id)?;
        self.base.record_submission(&job_directory)?;
        tracing::info!("Submitted job '{}' to condor cluster {}", job_id, external_id);
        Ok(())
    }

    fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        if self.base.was_cancelled(&job_directory) {
            return Ok(JobStatus::Cancelled);
        }
        let external_id = self.base.external_id(&job_directory)?;
        Ok(self.log_status(&job_directory, &external_id))
    }

    fn kill(&self, job_id: &JobId) -> Result<()> {
        let job_directory = self.base.job_directory(job_id);
        let _guard = job_directory.lock(job_locks::EXECUTION);
        self.base.record_cancel(&job_directory)?;
        let Ok(external_id) = self.base.external_id(&job_directory) else {
            return Ok(());
        };
        let output = self
            .shell
            .execute(&RemoteCommand::new("condor_rm").arg(&external_id))?;
        if !output.success() {
            tracing::warn!(
                "condor_rm of cluster {} failed: {}",
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

    fn deactivate_job(&self, job_id: &JobId) {
        recover(self.log_cache.lock()).remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_log_parsing() {
        let submitted = "000 (042.000.000) 10/18 12:00:00 Job submitted from host\n...\n";
        assert_eq!(parse_user_log(submitted, "42"), JobStatus::Queued);

        let running = format!("{}001 (042.000.000) 10/18 12:00:05 Job executing\n", submitted);
        assert_eq!(parse_user_log(&running, "42"), JobStatus::Running);

        let evicted = format!("{}004 (042.000.000) 10/18 12:00:09 Job was evicted\n", running);
        assert_eq!(parse_user_log(&evicted, "42"), JobStatus::Queued);

        let done = format!("{}005 (042.000.000) 10/18 12:01:00 Job terminated\n", running);
        assert_eq!(parse_user_log(&done, "42"), JobStatus::Complete);
    }

    #[test]
    fn test_user_log_ignores_other_clusters() {
        let other = "005 (043.000.000) 10/18 12:01:00 Job terminated\n";
        assert_eq!(parse_user_log(other, "42"), JobStatus::Queued);
    }
}
