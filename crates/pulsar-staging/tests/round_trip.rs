mod common;

use common::DirectoryClient;
use pulsar_core::model::JobStatus;
use pulsar_staging::description::ClientJobDescription;
use pulsar_staging::mapper::StagingConfig;
use pulsar_staging::submission::{finish_job, submit_job, wait_for_job, CleanupPolicy};
use pulsar_test_utils::TestContext;
use std::time::Duration;

fn run(ctx: &TestContext, client: &DirectoryClient, cleanup: CleanupPolicy) -> Vec<String> {
    let output = ctx.data_dir.join("out.txt");
    let mut description =
        ClientJobDescription::new(format!("echo hello > {}", output.display()));
    description.outputs.output_files = vec![output];
    let config = StagingConfig::default();

    let job_id = submit_job(client, &description, &config).unwrap();
    let status = wait_for_job(
        client,
        &job_id,
        Duration::from_millis(10),
        Some(Duration::from_secs(10)),
    )
    .unwrap();
    assert_eq!(status.status, JobStatus::Complete);
    assert_eq!(status.returncode, Some(0));

    finish_job(client, &status, &description, &config, cleanup)
        .into_iter()
        .map(|e| e.to_string())
        .collect()
}

#[test]
fn test_echo_output_is_collected_and_job_cleaned() {
    let ctx = TestContext::new();
    let client = DirectoryClient::new(&ctx.staging_dir);

    let failures = run(&ctx, &client, CleanupPolicy::Always);
    assert!(failures.is_empty(), "{failures:?}");
    assert_eq!(ctx.read(&ctx.data_dir.join("out.txt")), "hello\n");
    assert!(!ctx.staging_dir.join("1").exists());
}

#[test]
fn test_never_cleanup_keeps_job_directory() {
    let ctx = TestContext::new();
    let client = DirectoryClient::new(&ctx.staging_dir);

    let failures = run(&ctx, &client, CleanupPolicy::Never);
    assert!(failures.is_empty(), "{failures:?}");
    assert!(ctx.staging_dir.join("1").join("outputs").join("out.txt").exists());
}
