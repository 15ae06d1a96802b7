//! Transport-independent job endpoints. HTTP handlers, queue consumers and the
//! in-process client all go through these functions.

use crate::error::{Result, ServerError};
use pulsar_core::constants::{job_files, placeholders};
use pulsar_core::job_directory::JobDirectory;
use pulsar_core::model::{FullStatus, JobConfig, JobId, JobStatus, PathType, SetupParams};
use pulsar_manager::StatefulManagerProxy;
use pulsar_staging::LaunchRequest;
use std::io::Read;
use std::path::PathBuf;

/// Creates the job directory and reports where each kind of file goes.
/// Without a proposed id a fresh one is generated.
pub fn setup_job(manager: &StatefulManagerProxy, params: &SetupParams) -> Result<JobConfig> {
    let proposed = params
        .job_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let job_id = manager.setup_job(
        &proposed,
        params.tool_id.as_deref(),
        params.tool_version.as_deref(),
    )?;
    let job_directory = manager.job_directory(&job_id);
    tracing::info!("Set up job '{}' in '{}'", job_id, job_directory.path().display());
    Ok(build_job_config(
        &job_directory,
        params.tool_id.as_deref(),
        params.tool_version.as_deref(),
    ))
}

pub fn build_job_config(
    job_directory: &JobDirectory,
    tool_id: Option<&str>,
    tool_version: Option<&str>,
) -> JobConfig {
    job_directory.job_config(tool_id, tool_version)
}

/// Hands a launch request to the manager. Any failure before the manager
/// accepted it still leaves the job `failed`, so clients polling it are not
/// left waiting.
pub fn submit_job(manager: &StatefulManagerProxy, mut request: LaunchRequest) -> Result<()> {
    let job_id = request.job_id.clone();
    let job_directory = manager.job_directory(&job_id);
    if let Some(jobs_directory) = job_directory.path().parent() {
        request.command_line = request
            .command_line
            .replace(placeholders::JOBS_DIRECTORY, &jobs_directory.to_string_lossy());
    }

    let submitted = touch_outputs(&job_directory, &request.touch_outputs)
        .and_then(|()| manager.launch(request).map_err(ServerError::from));
    if let Err(e) = submitted {
        tracing::error!("Failed to submit job '{}': {}", job_id, e);
        manager.handle_failure_before_launch(&job_id, &e.to_string());
        return Err(e);
    }
    Ok(())
}

/// Creates each named output empty unless it already exists.
pub fn touch_outputs(job_directory: &JobDirectory, names: &[String]) -> Result<()> {
    for name in names {
        let path = job_directory.calculate_path(name, PathType::Output)?;
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
    }
    Ok(())
}

pub fn status(manager: &StatefulManagerProxy, job_id: &JobId) -> Result<FullStatus> {
    let status = manager.get_status(job_id)?;
    full_status(manager, job_id, status)
}

/// The complete status payload for a job observed in `status`. Done jobs carry
/// their return code, output streams and directory listings.
pub fn full_status(
    manager: &StatefulManagerProxy,
    job_id: &JobId,
    status: JobStatus,
) -> Result<FullStatus> {
    if !status.is_done() {
        return Ok(FullStatus::in_progress(job_id.clone(), status));
    }

    let job_directory = manager.job_directory(job_id);
    let dynamic_file_sources = job_directory
        .load_metadata::<LaunchRequest>(job_files::LAUNCH_CONFIG)?
        .map(|launch| launch.dynamic_file_sources)
        .unwrap_or_default();

    let mut full = FullStatus::in_progress(job_id.clone(), status);
    full.complete = true;
    full.returncode = manager.return_code(job_id);
    full.stdout = Some(String::from_utf8_lossy(&manager.stdout_contents(job_id)).to_string());
    full.stderr = Some(String::from_utf8_lossy(&manager.stderr_contents(job_id)).to_string());
    full.job_directory = Some(job_directory.path().to_path_buf());
    full.working_directory = Some(job_directory.working_directory());
    full.metadata_directory = Some(job_directory.metadata_directory());
    full.working_directory_contents = Some(job_directory.working_directory_contents()?);
    full.metadata_directory_contents = Some(job_directory.metadata_directory_contents()?);
    full.outputs_directory_contents = Some(job_directory.outputs_directory_contents()?);
    full.job_directory_contents = Some(job_directory.job_directory_contents()?);
    full.realized_dynamic_file_sources =
        Some(job_directory.realized_dynamic_file_sources(&dynamic_file_sources));
    Ok(full)
}

/// Stores an uploaded file under the directory of `path_type`; returns where
/// it landed.
pub fn upload_file(
    manager: &StatefulManagerProxy,
    job_id: &JobId,
    name: &str,
    path_type: PathType,
    contents: &mut dyn Read,
) -> Result<PathBuf> {
    let path = manager.job_directory(job_id).calculate_path(name, path_type)?;
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let mut file = fs_err::File::create(&path)?;
    std::io::copy(contents, &mut file)?;
    tracing::debug!("Stored {} '{}' for job '{}'", path_type, name, job_id);
    Ok(path)
}

/// Location of the named file of `path_type`, e.g. an output to download.
pub fn file_path(
    manager: &StatefulManagerProxy,
    job_id: &JobId,
    name: &str,
    path_type: PathType,
) -> Result<PathBuf> {
    Ok(manager.job_directory(job_id).calculate_path(name, path_type)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsar_core::errors::DomainError;
    use pulsar_manager::{build_manager, BackendResources};
    use pulsar_test_utils::TestContext;

    fn unqueued(ctx: &TestContext) -> StatefulManagerProxy {
        let app = ctx.app_config();
        build_manager(
            "local",
            &app.managers["local"],
            &app,
            &BackendResources::default(),
        )
        .unwrap()
    }

    fn context() -> TestContext {
        TestContext::with_managers("[managers.local]\ntype = \"unqueued\"\n")
    }

    #[test]
    fn test_setup_generates_an_id_when_none_is_proposed() {
        let ctx = context();
        let manager = unqueued(&ctx);
        let config = setup_job(
            &manager,
            &SetupParams {
                tool_id: Some("cat1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.job_id.as_str().len(), 32);
        assert_eq!(config.tool_id.as_deref(), Some("cat1"));
        assert!(config.working_directory.is_dir());
        assert!(config.job_directory.starts_with(&ctx.staging_dir));
    }

    #[test]
    fn test_touch_outputs_rejects_escaping_names() {
        let ctx = context();
        let manager = unqueued(&ctx);
        let job_id = manager.setup_job("7", None, None).unwrap();
        let job_directory = manager.job_directory(&job_id);

        touch_outputs(&job_directory, &["a.dat".to_string()]).unwrap();
        assert!(job_directory.outputs_directory().join("a.dat").is_file());

        let result = touch_outputs(&job_directory, &["../../escape".to_string()]);
        assert!(matches!(
            result,
            Err(crate::error::ServerError::Domain(DomainError::PathEscape { .. }))
        ));
    }

    #[test]
    fn test_in_progress_status_is_short() {
        let ctx = context();
        let manager = unqueued(&ctx);
        let job_id = manager.setup_job("7", None, None).unwrap();
        let full = full_status(&manager, &job_id, JobStatus::Running).unwrap();
        assert!(!full.complete);
        assert_eq!(full.status, JobStatus::Running);
        assert!(full.stdout.is_none());
    }

    #[test]
    fn test_upload_lands_in_typed_directory() {
        let ctx = context();
        let manager = unqueued(&ctx);
        let job_id = manager.setup_job("7", None, None).unwrap();
        let path = upload_file(
            &manager,
            &job_id,
            "input.txt",
            PathType::Input,
            &mut "abc".as_bytes(),
        )
        .unwrap();
        assert_eq!(path, ctx.staging_dir.join("7").join("inputs").join("input.txt"));
        assert_eq!(ctx.read(&path), "abc");
    }
}
