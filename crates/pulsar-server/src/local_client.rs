use crate::app::PulsarApp;
use crate::endpoint;
use crate::error::ServerError;
use pulsar_core::model::{FullStatus, JobConfig, JobId, SetupParams};
use pulsar_manager::StatefulManagerProxy;
use pulsar_staging::client::{FetchOutputRequest, JobClient, PutFileRequest};
use pulsar_staging::transfer::copy_file;
use pulsar_staging::{LaunchRequest, StagingError};
use std::sync::Arc;

/// A [`JobClient`] talking to managers of the same process. Client and
/// server share a filesystem, so files move by plain copies.
pub struct LocalJobClient {
    app: Arc<PulsarApp>,
    manager_name: Option<String>,
}

impl LocalJobClient {
    /// `manager_name` of `None` targets the default manager.
    pub fn new(app: Arc<PulsarApp>, manager_name: Option<&str>) -> Self {
        Self {
            app,
            manager_name: manager_name.map(str::to_string),
        }
    }

    fn manager(&self) -> Result<&Arc<StatefulManagerProxy>, StagingError> {
        self.app
            .manager(self.manager_name.as_deref())
            .map_err(into_staging)
    }
}

fn into_staging(error: ServerError) -> StagingError {
    match error {
        ServerError::Staging(e) => e,
        ServerError::Config(e) => StagingError::Config(e),
        ServerError::Domain(e) => StagingError::Domain(e),
        ServerError::Io(e) => StagingError::Io(e),
        other => StagingError::Client(other.to_string()),
    }
}

impl JobClient for LocalJobClient {
    fn setup(&self, params: &SetupParams) -> Result<JobConfig, StagingError> {
        endpoint::setup_job(self.manager()?, params).map_err(into_staging)
    }

    fn put_file(
        &self,
        job_id: &JobId,
        request: &PutFileRequest<'_>,
    ) -> Result<String, StagingError> {
        let manager = self.manager()?;
        let destination = match (request.contents, request.path) {
            (Some(contents), _) => endpoint::upload_file(
                manager,
                job_id,
                request.name,
                request.path_type,
                &mut contents.as_bytes(),
            )
            .map_err(into_staging)?,
            (None, Some(path)) => {
                let destination =
                    endpoint::file_path(manager, job_id, request.name, request.path_type)
                        .map_err(into_staging)?;
                copy_file(path, &destination)?;
                destination
            }
            (None, None) => {
                return Err(StagingError::Client(format!(
                    "nothing to upload for '{}'",
                    request.name
                )))
            }
        };
        Ok(destination.to_string_lossy().to_string())
    }

    fn launch(&self, request: &LaunchRequest) -> Result<(), StagingError> {
        endpoint::submit_job(self.manager()?, request.clone()).map_err(into_staging)
    }

    fn full_status(&self, job_id: &JobId) -> Result<FullStatus, StagingError> {
        endpoint::status(self.manager()?, job_id).map_err(into_staging)
    }

    fn fetch_output(
        &self,
        job_id: &JobId,
        request: &FetchOutputRequest<'_>,
    ) -> Result<(), StagingError> {
        let manager = self.manager()?;
        let source = endpoint::file_path(manager, job_id, request.name, request.output_type)
            .map_err(into_staging)?;
        copy_file(&source, request.path)
    }

    fn kill(&self, job_id: &JobId) -> Result<(), StagingError> {
        self.manager()?
            .kill(job_id)
            .map_err(|e| into_staging(e.into()))
    }

    fn clean(&self, job_id: &JobId) -> Result<(), StagingError> {
        self.manager()?
            .clean(job_id)
            .map_err(|e| into_staging(e.into()))
    }
}
