use crate::app::PulsarApp;
use crate::cli::SubmitArgs;
use crate::error::ServerError;
use crate::local_client::LocalJobClient;
use colored::Colorize;
use pulsar_core::config::AppConfig;
use pulsar_core::model::JobStatus;
use pulsar_staging::description::InputType;
use pulsar_staging::{
    finish_job, submit_job, wait_for_job, CleanupPolicy, ClientInput, ClientJobDescription,
    StagingConfig,
};
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn handle_submit(args: SubmitArgs, config: AppConfig) -> Result<(), ServerError> {
    let app = Arc::new(PulsarApp::new(config)?);
    let client = LocalJobClient::new(app.clone(), args.manager.as_deref());
    let result = run_job(&client, &args);
    app.shutdown(Some(Duration::from_secs(10)));
    result
}

fn run_job(client: &LocalJobClient, args: &SubmitArgs) -> Result<(), ServerError> {
    let staging_config = match &args.staging_config {
        Some(path) => StagingConfig::from_file(path)?,
        None => StagingConfig::default(),
    };
    let mut description = ClientJobDescription::new(args.command.clone());
    description.inputs = args
        .inputs
        .iter()
        .map(|path| ClientInput::new(path.clone(), InputType::InputPath))
        .collect();
    description.outputs.output_files = args.outputs.clone();

    let job_id = submit_job(client, &description, &staging_config)?;
    println!("- Submitted job '{}'", job_id.to_string().cyan());

    let timeout = args.timeout.map(|t| Duration::from_secs_f64(t.max(0.0)));
    let status = wait_for_job(client, &job_id, POLL_INTERVAL, timeout)?;
    let cleanup = if args.keep {
        CleanupPolicy::Never
    } else {
        CleanupPolicy::Always
    };
    let failures = finish_job(client, &status, &description, &staging_config, cleanup);
    for failure in &failures {
        eprintln!("{}", format!("[WARN] {}", failure).yellow());
    }

    if let Some(stdout) = status.stdout.as_deref().filter(|s| !s.is_empty()) {
        print!("{}", stdout);
    }
    if let Some(stderr) = status.stderr.as_deref().filter(|s| !s.is_empty()) {
        eprint!("{}", stderr);
    }
    let returncode = status
        .returncode
        .map_or_else(|| "unknown".to_string(), |code| code.to_string());
    let succeeded = status.status == JobStatus::Complete && status.returncode == Some(0);
    if succeeded && failures.is_empty() {
        println!(
            "{} job '{}' {} (exit code {})",
            "[OK]".green(),
            job_id,
            status.status,
            returncode
        );
        Ok(())
    } else {
        Err(ServerError::JobFailed {
            job_id,
            status: status.status,
            returncode,
            failures: failures.len(),
        })
    }
}
