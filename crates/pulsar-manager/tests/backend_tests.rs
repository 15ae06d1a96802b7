use pulsar_core::config::IdAssignerKind;
use pulsar_core::constants::job_files;
use pulsar_core::model::{EnvVar, JobId, JobStatus};
use pulsar_manager::backend::cli::{
    CliQueueBackend, CommandOutput, RemoteCommand, ShellInterface, Slurm,
};
use pulsar_manager::backend::{
    CoexecutionBackend, CondorBackend, DrmaaBackend, DrmaaJobState, DrmaaJobTemplate,
    DrmaaSession, ThreadPoolQueueBackend, UnqueuedBackend,
};
use pulsar_manager::{
    Backend, DependencyResolver, DirectoryManager, IdAssigner, LaunchParams, ManagerError,
};
use pulsar_test_utils::wait_for;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(20);

fn directory_manager(root: &Path) -> DirectoryManager {
    DirectoryManager::new(
        "test",
        root,
        IdAssigner::new(IdAssignerKind::Galaxy),
        DependencyResolver::default(),
        false,
    )
    .unwrap()
}

fn wait_for_status(backend: &dyn Backend, job_id: &JobId, status: JobStatus) -> bool {
    wait_for(TIMEOUT, || backend.get_status(job_id).unwrap() == status)
}

#[test]
fn test_unqueued_runs_command_in_working_directory() {
    let root = tempfile::tempdir().unwrap();
    let backend = UnqueuedBackend::new(directory_manager(root.path()));
    let job_id = backend.setup_job("1", None, None).unwrap();

    let mut params = LaunchParams::new("echo $GREETING > out.txt; echo hello; echo oops >&2");
    params.env = vec![EnvVar {
        name: "GREETING".to_string(),
        value: "hi there".to_string(),
        raw: false,
    }];
    backend.launch(&job_id, &params).unwrap();

    assert!(wait_for_status(&backend, &job_id, JobStatus::Complete));
    assert_eq!(backend.return_code(&job_id), Some(0));
    assert_eq!(backend.stdout_contents(&job_id), b"hello\n");
    assert_eq!(backend.stderr_contents(&job_id), b"oops\n");
    let out = backend.job_directory(&job_id).working_directory().join("out.txt");
    assert_eq!(fs_err::read_to_string(out).unwrap(), "hi there\n");
    backend.shutdown(Some(Duration::from_secs(5)));
}

#[test]
fn test_unqueued_reports_failing_exit_code() {
    let root = tempfile::tempdir().unwrap();
    let backend = UnqueuedBackend::new(directory_manager(root.path()));
    let job_id = backend.setup_job("1", None, None).unwrap();

    backend.launch(&job_id, &LaunchParams::new("exit 3")).unwrap();
    assert!(wait_for_status(&backend, &job_id, JobStatus::Complete));
    assert_eq!(backend.return_code(&job_id), Some(3));
}

#[test]
fn test_kill_marks_job_cancelled() {
    let root = tempfile::tempdir().unwrap();
    let backend = UnqueuedBackend::new(directory_manager(root.path()));
    let job_id = backend.setup_job("1", None, None).unwrap();

    backend.launch(&job_id, &LaunchParams::new("sleep 30")).unwrap();
    assert!(wait_for_status(&backend, &job_id, JobStatus::Running));
    backend.kill(&job_id).unwrap();
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Cancelled);
    assert!(backend
        .job_directory(&job_id)
        .has_metadata(job_files::CANCELLED));
    backend.shutdown(Some(Duration::from_secs(5)));
}

#[test]
fn test_thread_pool_runs_queued_jobs() {
    let root = tempfile::tempdir().unwrap();
    let backend = ThreadPoolQueueBackend::new(directory_manager(root.path()), 1);
    let first = backend.setup_job("1", None, None).unwrap();
    let second = backend.setup_job("2", None, None).unwrap();

    backend.launch(&first, &LaunchParams::new("sleep 0.2; echo one")).unwrap();
    backend.launch(&second, &LaunchParams::new("echo two")).unwrap();

    assert!(wait_for_status(&backend, &second, JobStatus::Complete));
    assert_eq!(backend.get_status(&first).unwrap(), JobStatus::Complete);
    assert_eq!(backend.stdout_contents(&first), b"one\n");
    assert_eq!(backend.stdout_contents(&second), b"two\n");
    backend.shutdown(Some(Duration::from_secs(5)));
}

#[test]
fn test_thread_pool_recovery_requeues_persisted_jobs() {
    let root = tempfile::tempdir().unwrap();
    let base = directory_manager(root.path());
    let job_id = base.setup_job("1", None, None).unwrap();
    let job_directory = base.job_directory(&job_id);
    base.write_job_script(&job_directory, &LaunchParams::new("echo recovered"), Vec::new())
        .unwrap();
    base.record_submission(&job_directory).unwrap();

    let backend = ThreadPoolQueueBackend::new(base.clone(), 1);
    backend.recover_active_job(&job_id).unwrap();
    assert!(wait_for_status(&backend, &job_id, JobStatus::Complete));
    assert_eq!(backend.stdout_contents(&job_id), b"recovered\n");

    let unknown = base.setup_job("2", None, None).unwrap();
    assert!(matches!(
        backend.recover_active_job(&unknown),
        Err(ManagerError::RecoveryFailed { .. })
    ));
    backend.shutdown(Some(Duration::from_secs(5)));
}

#[test]
fn test_coexecution_waits_for_companion() {
    let root = tempfile::tempdir().unwrap();
    let backend = CoexecutionBackend::new(directory_manager(root.path()));
    let job_id = backend.setup_job("1", None, None).unwrap();

    backend.launch(&job_id, &LaunchParams::new("true")).unwrap();
    let job_directory = backend.job_directory(&job_id);
    assert!(job_directory.contains_file(job_files::JOB_SCRIPT));
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Running);

    job_directory.write_file(job_files::RETURN_CODE, b"0\n").unwrap();
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Complete);
}

/// Answers batch-system commands from canned output and remembers them.
#[derive(Default)]
struct FakeShell {
    commands: Mutex<Vec<String>>,
    responses: Mutex<BTreeMap<String, String>>,
}

impl FakeShell {
    fn respond(&self, program: &str, stdout: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(program.to_string(), stdout.to_string());
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl ShellInterface for FakeShell {
    fn execute(&self, command: &RemoteCommand) -> pulsar_manager::Result<CommandOutput> {
        let line = command.to_shell_string();
        self.commands.lock().unwrap().push(line.clone());
        let program = line.split_whitespace().next().unwrap_or_default().to_string();
        let stdout = self
            .responses
            .lock()
            .unwrap()
            .get(&program)
            .cloned()
            .unwrap_or_default();
        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            returncode: 0,
        })
    }
}

#[test]
fn test_cli_backend_submits_polls_and_cancels() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(FakeShell::default());
    shell.respond("sbatch", "Submitted batch job 42\n");
    let backend = CliQueueBackend::new(
        directory_manager(root.path()),
        shell.clone(),
        Box::new(Slurm),
        BTreeMap::from([("partition".to_string(), "short".to_string())]),
    );
    let job_id = backend.setup_job("1", None, None).unwrap();

    backend.launch(&job_id, &LaunchParams::new("hostname")).unwrap();
    let job_directory = backend.job_directory(&job_id);
    assert_eq!(
        job_directory
            .load_metadata::<String>(job_files::EXTERNAL_ID)
            .unwrap(),
        Some("42".to_string())
    );
    let script = fs_err::read_to_string(job_directory.path().join(job_files::JOB_SCRIPT)).unwrap();
    assert!(script.contains("#SBATCH --partition short"));
    assert!(script.contains("#SBATCH -J pulsar_test_1"));

    shell.respond("squeue", "JOBID ST\n42 R\n");
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Running);
    shell.respond("squeue", "JOBID ST\n");
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Complete);

    backend.kill(&job_id).unwrap();
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Cancelled);
    assert!(shell.commands().contains(&"scancel 42".to_string()));
}

#[test]
fn test_cli_backend_without_external_id_fails_submission() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(FakeShell::default());
    let backend = CliQueueBackend::new(
        directory_manager(root.path()),
        shell,
        Box::new(Slurm),
        BTreeMap::new(),
    );
    let job_id = backend.setup_job("1", None, None).unwrap();
    assert!(matches!(
        backend.launch(&job_id, &LaunchParams::new("hostname")),
        Err(ManagerError::ExternalIdMissing(_))
    ));
    assert!(backend.recover_active_job(&job_id).is_err());
}

#[test]
fn test_condor_backend_follows_user_log() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(FakeShell::default());
    shell.respond("condor_submit", "Submitting job(s).\n1 job(s) submitted to cluster 42.\n");
    let backend = CondorBackend::new(
        directory_manager(root.path()),
        shell.clone(),
        BTreeMap::from([("request_memory".to_string(), "2G".to_string())]),
    );
    let job_id = backend.setup_job("1", None, None).unwrap();
    let mut params = LaunchParams::new("hostname");
    params
        .submit_params
        .insert("universe".to_string(), "docker".to_string());
    backend.launch(&job_id, &params).unwrap();

    let job_directory = backend.job_directory(&job_id);
    let submit = fs_err::read_to_string(job_directory.path().join(job_files::CONDOR_SUBMIT)).unwrap();
    assert!(submit.starts_with("universe = docker\n"));
    assert!(submit.contains("request_memory = 2G\n"));
    assert!(submit.ends_with("queue\n"));
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Queued);

    let log = job_directory.path().join(job_files::CONDOR_LOG);
    fs_err::write(&log, "000 (042.000.000) 10/18 12:00:00 Job submitted\n").unwrap();
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Queued);
    fs_err::write(
        &log,
        "000 (042.000.000) 10/18 12:00:00 Job submitted\n001 (042.000.000) 10/18 12:00:03 Job executing\n",
    )
    .unwrap();
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Running);

    backend.kill(&job_id).unwrap();
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Cancelled);
    assert!(shell.commands().contains(&"condor_rm 42".to_string()));
}

#[derive(Default)]
struct FakeSession {
    templates: Mutex<Vec<DrmaaJobTemplate>>,
    state: Mutex<Option<DrmaaJobState>>,
    killed: Mutex<Vec<String>>,
}

impl DrmaaSession for FakeSession {
    fn run_job(&self, template: &DrmaaJobTemplate) -> pulsar_manager::Result<String> {
        self.templates.lock().unwrap().push(template.clone());
        Ok("7".to_string())
    }

    fn job_status(&self, external_id: &str) -> pulsar_manager::Result<DrmaaJobState> {
        self.state
            .lock()
            .unwrap()
            .ok_or_else(|| ManagerError::Drmaa(format!("unknown job {}", external_id)))
    }

    fn kill(&self, external_id: &str) -> pulsar_manager::Result<()> {
        self.killed.lock().unwrap().push(external_id.to_string());
        Ok(())
    }
}

#[test]
fn test_drmaa_backend_uses_injected_session() {
    let root = tempfile::tempdir().unwrap();
    let session = Arc::new(FakeSession::default());
    let backend = DrmaaBackend::new(
        directory_manager(root.path()),
        session.clone(),
        Some("-q default".to_string()),
    );
    let job_id = backend.setup_job("1", None, None).unwrap();
    let mut params = LaunchParams::new("hostname");
    params
        .submit_params
        .insert("native_specification".to_string(), "-q long".to_string());
    backend.launch(&job_id, &params).unwrap();

    let templates = session.templates.lock().unwrap().clone();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].native_specification.as_deref(), Some("-q long"));
    assert_eq!(templates[0].job_name, "pulsar_test_1");

    *session.state.lock().unwrap() = Some(DrmaaJobState::QueuedActive);
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Queued);
    *session.state.lock().unwrap() = Some(DrmaaJobState::Running);
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Running);
    *session.state.lock().unwrap() = Some(DrmaaJobState::Done);
    assert_eq!(backend.get_status(&job_id).unwrap(), JobStatus::Complete);

    backend.kill(&job_id).unwrap();
    assert_eq!(session.killed.lock().unwrap().clone(), vec!["7".to_string()]);
}
