use super::RemoteCommand;
use crate::error::{ManagerError, Result};
use pulsar_core::config::JobPluginKind;
use pulsar_core::model::JobStatus;
use std::collections::BTreeMap;
use std::path::Path;

/// Batch-system job state, as far as Pulsar cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalState {
    Queued,
    Running,
    /// Finished, or no longer known to the scheduler.
    Ok,
    Failed,
}

impl From<ExternalState> for JobStatus {
    /// A failed batch job still completes; its return code carries the failure.
    fn from(state: ExternalState) -> Self {
        match state {
            ExternalState::Queued => JobStatus::Queued,
            ExternalState::Running => JobStatus::Running,
            ExternalState::Ok | ExternalState::Failed => JobStatus::Complete,
        }
    }
}

/// Scheduler dialect: script headers plus the submit, status and delete
/// commands and their output parsing.
pub trait JobPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn headers(
        &self,
        params: &BTreeMap<String, String>,
        job_name: &str,
        stdout: &Path,
        stderr: &Path,
    ) -> Vec<String>;

    fn submit(&self, script: &Path) -> RemoteCommand;

    fn delete(&self, external_id: &str) -> RemoteCommand;

    fn status(&self, external_id: &str) -> RemoteCommand;

    fn parse_status(&self, output: &str, external_id: &str) -> Result<ExternalState>;
}

pub fn plugin_for(kind: JobPluginKind) -> Box<dyn JobPlugin> {
    match kind {
        JobPluginKind::Slurm => Box::new(Slurm),
        JobPluginKind::Torque => Box::new(Torque),
    }
}

/// Turns `params` into `(flag, value)` pairs. Keys starting with `-` are
/// passed through, known names are mapped, anything else is dropped.
fn scheduler_args<'a>(
    plugin: &str,
    params: &'a BTreeMap<String, String>,
    argmap: &[(&str, &'static str)],
) -> Vec<(String, &'a str)> {
    params
        .iter()
        .filter_map(|(key, value)| {
            if key.starts_with('-') {
                return Some((key.clone(), value.as_str()));
            }
            match argmap.iter().find(|(name, _)| name == key) {
                Some((_, flag)) => Some((flag.to_string(), value.as_str())),
                None => {
                    tracing::warn!("Unrecognized {} parameter '{}' ignored", plugin, key);
                    None
                }
            }
        })
        .collect()
}

fn header(prefix: &str, flag: &str, value: &str) -> String {
    if value.is_empty() {
        format!("{} {}", prefix, flag)
    } else {
        format!("{} {} {}", prefix, flag, value)
    }
}

fn unknown_state(external_id: &str, state: &str) -> ManagerError {
    ManagerError::UnknownExternalState {
        external_id: external_id.to_string(),
        state: state.to_string(),
    }
}

const SLURM_ARGS: &[(&str, &str)] = &[
    ("time", "--time"),
    ("ncpus", "--cpus-per-task"),
    ("partition", "--partition"),
    ("mem", "--mem"),
    ("account", "--account"),
    ("nodes", "--nodes"),
];

pub struct Slurm;

impl JobPlugin for Slurm {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn headers(
        &self,
        params: &BTreeMap<String, String>,
        job_name: &str,
        stdout: &Path,
        stderr: &Path,
    ) -> Vec<String> {
        let mut headers = vec![
            format!("#SBATCH -o {}", stdout.display()),
            format!("#SBATCH -e {}", stderr.display()),
            format!("#SBATCH -J {}", job_name),
        ];
        headers.extend(
            scheduler_args(self.name(), params, SLURM_ARGS)
                .into_iter()
                .map(|(flag, value)| header("#SBATCH", &flag, value)),
        );
        headers
    }

    fn submit(&self, script: &Path) -> RemoteCommand {
        RemoteCommand::new("sbatch").path_arg(script)
    }

    fn delete(&self, external_id: &str) -> RemoteCommand {
        RemoteCommand::new("scancel").arg(external_id)
    }

    fn status(&self, external_id: &str) -> RemoteCommand {
        RemoteCommand::new("squeue")
            .args(["-a", "-o", "%A %t", "-j"])
            .arg(external_id)
    }

    /// `squeue` prints a header line, then `<id> <state>` while the job is
    /// known. A finished job leaves only the header, or an error.
    fn parse_status(&self, output: &str, external_id: &str) -> Result<ExternalState> {
        let Some(line) = output.lines().nth(1) else {
            return Ok(ExternalState::Ok);
        };
        let state = line.split_whitespace().nth(1).unwrap_or_default();
        match state {
            "PD" | "CF" | "S" => Ok(ExternalState::Queued),
            "R" | "CG" => Ok(ExternalState::Running),
            "CD" => Ok(ExternalState::Ok),
            "F" | "CA" | "TO" | "NF" | "OOM" => Ok(ExternalState::Failed),
            other => Err(unknown_state(external_id, other)),
        }
    }
}

const TORQUE_ARGS: &[(&str, &str)] = &[
    ("destination", "-q"),
    ("Execution_Time", "-a"),
    ("Account_Name", "-A"),
    ("Resource_List", "-l"),
    ("Mail_Users", "-M"),
    ("Priority", "-p"),
];

pub struct Torque;

impl JobPlugin for Torque {
    fn name(&self) -> &'static str {
        "torque"
    }

    fn headers(
        &self,
        params: &BTreeMap<String, String>,
        job_name: &str,
        stdout: &Path,
        stderr: &Path,
    ) -> Vec<String> {
        let mut headers = vec![
            format!("#PBS -o {}", stdout.display()),
            format!("#PBS -e {}", stderr.display()),
            format!("#PBS -N {}", job_name),
        ];
        headers.extend(
            scheduler_args(self.name(), params, TORQUE_ARGS)
                .into_iter()
                .map(|(flag, value)| header("#PBS", &flag, value)),
        );
        headers
    }

    fn submit(&self, script: &Path) -> RemoteCommand {
        RemoteCommand::new("qsub").path_arg(script)
    }

    fn delete(&self, external_id: &str) -> RemoteCommand {
        RemoteCommand::new("qdel").arg(external_id)
    }

    fn status(&self, external_id: &str) -> RemoteCommand {
        RemoteCommand::new("qstat").arg("-f").arg(external_id)
    }

    /// Looks for `job_state = X` in `qstat -f` output; none means the job
    /// has left the queue.
    fn parse_status(&self, output: &str, external_id: &str) -> Result<ExternalState> {
        let state = output.lines().find_map(|line| {
            let (key, value) = line.split_once(" = ")?;
            (key.trim() == "job_state").then(|| value.trim())
        });
        match state {
            None | Some("C") => Ok(ExternalState::Ok),
            Some("Q") | Some("H") | Some("W") | Some("T") => Ok(ExternalState::Queued),
            Some("R") | Some("E") => Ok(ExternalState::Running),
            Some(other) => Err(unknown_state(external_id, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slurm_headers_map_known_and_raw_params() {
        let params = BTreeMap::from([
            ("partition".to_string(), "short".to_string()),
            ("--exclusive".to_string(), "".to_string()),
            ("bogus".to_string(), "1".to_string()),
        ]);
        let headers = Slurm.headers(&params, "pulsar_1", Path::new("/j/o"), Path::new("/j/e"));
        assert_eq!(
            headers,
            vec![
                "#SBATCH -o /j/o",
                "#SBATCH -e /j/e",
                "#SBATCH -J pulsar_1",
                "#SBATCH --exclusive",
                "#SBATCH --partition short",
            ]
        );
    }

    #[test]
    fn test_slurm_status_parsing() {
        assert_eq!(
            Slurm.parse_status("JOBID ST\n42 PD\n", "42").unwrap(),
            ExternalState::Queued
        );
        assert_eq!(
            Slurm.parse_status("JOBID ST\n42 R\n", "42").unwrap(),
            ExternalState::Running
        );
        assert_eq!(
            Slurm.parse_status("JOBID ST\n", "42").unwrap(),
            ExternalState::Ok
        );
        assert!(matches!(
            Slurm.parse_status("JOBID ST\n42 ZZ\n", "42"),
            Err(ManagerError::UnknownExternalState { state, .. }) if state == "ZZ"
        ));
    }

    #[test]
    fn test_torque_status_parsing() {
        let running = "Job Id: 7.server\n    Job_Name = pulsar_7\n    job_state = R\n";
        assert_eq!(
            Torque.parse_status(running, "7.server").unwrap(),
            ExternalState::Running
        );
        assert_eq!(
            Torque.parse_status("", "7.server").unwrap(),
            ExternalState::Ok
        );
    }

    #[test]
    fn test_failed_batch_jobs_still_complete() {
        assert_eq!(JobStatus::from(ExternalState::Failed), JobStatus::Complete);
    }
}
