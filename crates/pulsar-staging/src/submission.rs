use crate::client::JobClient;
use crate::collector::{ClientOutputCollector, ResultsCollector};
use crate::description::{ClientJobDescription, LaunchRequest, PulsarOutputs, RemoteStaging};
use crate::error::{Result, StagingError};
use crate::mapper::{FileActionMapper, StagingConfig};
use crate::stager::FileStager;
use pulsar_core::model::{FullStatus, JobId, JobStatus, SetupParams};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// When `finish_job` asks the server to delete the job directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    #[default]
    Always,
    OnSuccess,
    Never,
}

impl CleanupPolicy {
    pub fn should_clean(&self, failed: bool) -> bool {
        match self {
            CleanupPolicy::Always => true,
            CleanupPolicy::OnSuccess => !failed,
            CleanupPolicy::Never => false,
        }
    }
}

/// Stages a job's files and launches it. Returns the server-assigned id.
pub fn submit_job(
    client: &dyn JobClient,
    description: &ClientJobDescription,
    staging_config: &StagingConfig,
) -> Result<JobId> {
    let mapper = FileActionMapper::new(staging_config.clone())?;
    let staged = FileStager::stage(client, description, mapper)?;
    let job_id = staged.job_config.job_id.clone();

    let mut request = LaunchRequest::new(job_id.clone(), staged.command_line);
    request.setup_params = Some(SetupParams {
        job_id: Some(job_id.to_string()),
        tool_id: description.tool_id().map(str::to_string),
        tool_version: description.tool_version().map(str::to_string),
        use_metadata: description.use_metadata,
    });
    request.submit_params = description.submit_params.clone();
    request.dependencies_description = description.dependencies_description.clone();
    request.env = description.env.clone();
    request.touch_outputs = description.touch_outputs.clone();
    request.dynamic_file_sources = description.dynamic_file_sources.clone();
    request.remote_staging = RemoteStaging {
        setup: staged.remote_staging,
        action_mapper: Some(staged.mapper.config().clone()),
        client_outputs: Some(description.outputs.clone()),
    };

    tracing::info!(
        "Launching job '{}' with {} server-side staging action(s)",
        job_id,
        request.remote_staging.setup.len()
    );
    client.launch(&request)?;
    Ok(job_id)
}

/// Polls `full_status` until the job reports completion.
pub fn wait_for_job(
    client: &dyn JobClient,
    job_id: &JobId,
    poll_interval: Duration,
    timeout: Option<Duration>,
) -> Result<FullStatus> {
    let started = Instant::now();
    loop {
        let status = client.full_status(job_id)?;
        if status.complete {
            return Ok(status);
        }
        if timeout.is_some_and(|t| started.elapsed() >= t) {
            return Err(StagingError::Client(format!(
                "timed out waiting for job '{}' (last status: {})",
                job_id, status.status
            )));
        }
        std::thread::sleep(poll_interval);
    }
}

/// Collects client-side outputs of a finished job and cleans it up per
/// `cleanup`. Returns every collection failure; a non-empty list means the job
/// should be treated as failed.
pub fn finish_job(
    client: &dyn JobClient,
    status: &FullStatus,
    description: &ClientJobDescription,
    staging_config: &StagingConfig,
    cleanup: CleanupPolicy,
) -> Vec<StagingError> {
    let mut failures = match FileActionMapper::new(staging_config.clone()) {
        Ok(mut mapper) => {
            let pulsar_outputs = PulsarOutputs::from_status(status);
            let collector = ClientOutputCollector::new(client, status.job_id.clone());
            ResultsCollector::new(&collector, &mut mapper, &description.outputs, &pulsar_outputs)
                .collect()
        }
        Err(e) => vec![e],
    };

    let completed_normally = status.status == JobStatus::Complete;
    let failed = !failures.is_empty() || !completed_normally;
    if cleanup.should_clean(failed) {
        if let Err(e) = client.clean(&status.job_id) {
            tracing::warn!("Failed to clean up job '{}': {}", status.job_id, e);
            failures.push(e);
        }
    } else {
        tracing::info!("Leaving job '{}' on the server", status.job_id);
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_policy() {
        assert!(CleanupPolicy::Always.should_clean(true));
        assert!(CleanupPolicy::OnSuccess.should_clean(false));
        assert!(!CleanupPolicy::OnSuccess.should_clean(true));
        assert!(!CleanupPolicy::Never.should_clean(false));
    }
}
