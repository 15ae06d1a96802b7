use pulsar_core::constants::job_files;
use pulsar_core::model::{JobId, JobStatus, PathType};
use pulsar_manager::{build_manager, BackendResources, StateChangeCallback, StatefulManagerProxy};
use pulsar_staging::action::ActionKwds;
use pulsar_staging::{Action, ActionSource, ActionType, LaunchRequest, RemoteStagingInput};
use pulsar_test_utils::{wait_for, TestContext};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(20);

const UNQUEUED: &str = r#"
[managers._default_]
type = "unqueued"
min_polling_interval = 0.05
"#;

const CONDOR: &str = r#"
[managers._default_]
type = "queued_condor"
"#;

type Events = Arc<Mutex<Vec<(JobId, JobStatus)>>>;

fn manager(ctx: &TestContext) -> StatefulManagerProxy {
    let app = ctx.app_config();
    build_manager(
        "_default_",
        &app.managers["_default_"],
        &app,
        &BackendResources::default(),
    )
    .unwrap()
}

fn record_events(proxy: &StatefulManagerProxy) -> Events {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: StateChangeCallback = Arc::new(move |job_id: &JobId, status: JobStatus| {
        sink.lock().unwrap().push((job_id.clone(), status));
    });
    proxy.set_state_change_callback(callback);
    events
}

fn count(events: &Events, status: JobStatus) -> usize {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, s)| *s == status)
        .count()
}

#[test]
fn test_job_lifecycle_is_monotonic_and_notifies_completion() {
    let ctx = TestContext::with_managers(UNQUEUED);
    let proxy = manager(&ctx);
    let events = record_events(&proxy);
    let job_id = proxy.setup_job("1", None, None).unwrap();

    proxy
        .launch(LaunchRequest::new(job_id.clone(), "sleep 0.3; echo hello > out.txt"))
        .unwrap();

    let mut seen = Vec::new();
    assert!(wait_for(TIMEOUT, || {
        let status = proxy.get_status(&job_id).unwrap();
        seen.push(status);
        status == JobStatus::Complete
    }));
    for pair in seen.windows(2) {
        assert!(
            pair[0].progression_rank() <= pair[1].progression_rank(),
            "status regressed: {:?}",
            seen
        );
    }

    assert!(wait_for(TIMEOUT, || count(&events, JobStatus::Complete) == 1));
    let out = proxy.job_directory(&job_id).working_directory().join("out.txt");
    assert_eq!(ctx.read(&out), "hello\n");
    assert_eq!(proxy.return_code(&job_id), Some(0));
    assert!(proxy.active_job_ids().is_empty());
    proxy.shutdown(Some(Duration::from_secs(5)));
    assert_eq!(count(&events, JobStatus::Complete), 1);
}

#[test]
fn test_preprocessing_failure_fails_job_without_launching() {
    let ctx = TestContext::with_managers(UNQUEUED);
    let proxy = manager(&ctx);
    let events = record_events(&proxy);
    let job_id = proxy.setup_job("1", None, None).unwrap();

    let missing = ctx.data_dir.join("missing.dat");
    let mut request = LaunchRequest::new(job_id.clone(), "touch ran");
    request.remote_staging.setup.push(RemoteStagingInput {
        name: "missing.dat".to_string(),
        path_type: PathType::Input,
        action: Action::build(
            ActionType::RemoteCopy,
            &ActionSource::from_path(&missing),
            &ActionKwds::default(),
        )
        .unwrap(),
    });
    proxy.launch(request).unwrap();

    assert!(wait_for(TIMEOUT, || proxy.get_status(&job_id).unwrap() == JobStatus::Failed));
    assert!(wait_for(TIMEOUT, || count(&events, JobStatus::Failed) == 1));
    assert_eq!(proxy.return_code(&job_id), Some(1));
    assert!(!proxy.stderr_contents(&job_id).is_empty());

    let job_directory = proxy.job_directory(&job_id);
    assert!(job_directory.has_metadata(job_files::PREPROCESSING_FAILED));
    assert!(!job_directory.contains_file(job_files::JOB_SCRIPT));
    assert!(!job_directory.working_directory().join("ran").exists());
    proxy.shutdown(Some(Duration::from_secs(5)));
}

#[test]
fn test_kill_cancels_and_notifies_once() {
    let ctx = TestContext::with_managers(UNQUEUED);
    let proxy = manager(&ctx);
    let events = record_events(&proxy);
    let job_id = proxy.setup_job("1", None, None).unwrap();

    proxy
        .launch(LaunchRequest::new(job_id.clone(), "sleep 30"))
        .unwrap();
    assert!(wait_for(TIMEOUT, || proxy.get_status(&job_id).unwrap() == JobStatus::Running));
    proxy.kill(&job_id).unwrap();
    proxy.kill(&job_id).unwrap();

    assert_eq!(proxy.get_status(&job_id).unwrap(), JobStatus::Cancelled);
    assert!(wait_for(TIMEOUT, || count(&events, JobStatus::Cancelled) == 1));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(count(&events, JobStatus::Cancelled), 1);
    assert!(proxy.active_job_ids().is_empty());
    proxy.shutdown(Some(Duration::from_secs(5)));
}

#[test]
fn test_unrecoverable_active_job_is_reported_lost_once() {
    let ctx = TestContext::with_managers(CONDOR);
    let proxy = manager(&ctx);
    let job_id = proxy.setup_job("1", None, None).unwrap();
    proxy
        .job_directory(&job_id)
        .store_metadata(job_files::PREPROCESSED, &true)
        .unwrap();
    let index = ctx.persistence_dir.join("_default_-active-jobs");
    fs_err::write(index.join(job_id.as_str()), "").unwrap();
    assert_eq!(proxy.active_job_ids(), vec![job_id.clone()]);

    let events = record_events(&proxy);
    proxy.recover_active_jobs();
    proxy.recover_active_jobs();

    assert_eq!(count(&events, JobStatus::Lost), 1);
    assert!(proxy.active_job_ids().is_empty());
    assert_eq!(proxy.get_status(&job_id).unwrap(), JobStatus::Lost);
    proxy.shutdown(Some(Duration::from_secs(5)));
}

#[test]
fn test_recovery_resumes_interrupted_preprocessing() {
    let ctx = TestContext::with_managers(UNQUEUED);
    let proxy = manager(&ctx);
    let job_id = proxy.setup_job("1", None, None).unwrap();
    proxy
        .job_directory(&job_id)
        .store_metadata(
            job_files::LAUNCH_CONFIG,
            &LaunchRequest::new(job_id.clone(), "echo resumed"),
        )
        .unwrap();
    let index = ctx.persistence_dir.join("_default_-preprocessing-jobs");
    fs_err::write(index.join(job_id.as_str()), "").unwrap();
    assert_eq!(proxy.get_status(&job_id).unwrap(), JobStatus::Preprocessing);

    proxy.recover_active_jobs();
    assert!(wait_for(TIMEOUT, || proxy.get_status(&job_id).unwrap() == JobStatus::Complete));
    assert_eq!(proxy.stdout_contents(&job_id), b"resumed\n");
    assert!(!index.join(job_id.as_str()).exists());
    proxy.shutdown(Some(Duration::from_secs(5)));
}
