use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use pulsar_test_utils::TestContext;

/// The `pulsar` binary pointed at the context's config, with XDG homes kept
/// inside the test root.
fn pulsar(ctx: &TestContext) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pulsar"));
    cmd.env("XDG_CONFIG_HOME", ctx.test_root.join("config-home"))
        .env("XDG_CACHE_HOME", ctx.test_root.join("cache-home"))
        .env("PULSAR_LOG_LEVEL", "debug")
        .arg("--config")
        .arg(&ctx.config_path);
    cmd
}

#[test]
fn test_check_config_lists_managers() {
    let ctx = TestContext::with_managers(
        "[managers.cluster]\ntype = \"queued_cli\"\njob_plugin = \"slurm\"\n",
    );
    pulsar(&ctx)
        .arg("check-config")
        .assert()
        .success()
        .stdout(contains("cluster").and(contains("queued_cli")));
}

#[test]
fn test_missing_config_is_reported() {
    let ctx = TestContext::new();
    Command::new(env!("CARGO_BIN_EXE_pulsar"))
        .arg("--config")
        .arg(ctx.test_root.join("absent.toml"))
        .arg("check-config")
        .assert()
        .failure()
        .stderr(contains("[ERROR]"));
}

#[test]
fn test_invalid_manager_type_is_rejected_at_load() {
    let ctx = TestContext::with_managers("[managers.broken]\ntype = \"mesos\"\n");
    pulsar(&ctx).arg("check-config").assert().failure();
}

#[test]
fn test_submit_runs_job_and_collects_output() {
    let ctx = TestContext::new();
    let input = ctx.data_file("in.txt", "hello\n");
    let output = ctx.data_dir.join("out.txt");

    pulsar(&ctx)
        .arg("submit")
        .arg("--command")
        .arg(format!("cat {} > {}", input.display(), output.display()))
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--timeout")
        .arg("30")
        .assert()
        .success()
        .stdout(contains("complete").and(contains("exit code 0")));

    assert_eq!(ctx.read(&output), "hello\n");
    let leftover = std::fs::read_dir(&ctx.staging_dir).unwrap().count();
    assert_eq!(leftover, 0, "job directory should be cleaned");
}

#[test]
fn test_submit_reports_failing_command() {
    let ctx = TestContext::new();
    pulsar(&ctx)
        .arg("submit")
        .arg("--command")
        .arg("echo oops >&2; exit 3")
        .arg("--keep")
        .assert()
        .failure()
        .stderr(contains("oops").and(contains("exit code 3")));
}

#[test]
fn test_submit_to_unknown_manager_fails() {
    let ctx = TestContext::new();
    pulsar(&ctx)
        .arg("submit")
        .arg("--manager")
        .arg("nowhere")
        .arg("--command")
        .arg("true")
        .assert()
        .failure()
        .stderr(contains("nowhere"));
}
