use crate::action::ActionType;
use crate::description::LaunchRequest;
use crate::error::Result;
use pulsar_core::model::{FullStatus, JobConfig, JobId, PathType, SetupParams};
use std::path::Path;

/// A file the client stages into the server's job directory.
#[derive(Debug, Clone)]
pub struct PutFileRequest<'a> {
    /// Local source; absent when `contents` carries the bytes.
    pub path: Option<&'a Path>,
    /// Name relative to the directory of `path_type`.
    pub name: &'a str,
    pub path_type: PathType,
    pub contents: Option<&'a str>,
    pub action_type: ActionType,
}

/// An output the client retrieves from the server's job directory.
#[derive(Debug, Clone)]
pub struct FetchOutputRequest<'a> {
    /// Final local destination.
    pub path: &'a Path,
    /// Name relative to the directory of `output_type`.
    pub name: &'a str,
    pub output_type: PathType,
    pub action_type: ActionType,
}

/// Client view of a job server. Transports (HTTP, message queue, in-process)
/// implement this; staging code only talks to the trait.
pub trait JobClient: Send + Sync {
    fn setup(&self, params: &SetupParams) -> Result<JobConfig>;

    /// Returns the path the file now has on the server.
    fn put_file(&self, job_id: &JobId, request: &PutFileRequest<'_>) -> Result<String>;

    fn launch(&self, request: &LaunchRequest) -> Result<()>;

    fn full_status(&self, job_id: &JobId) -> Result<FullStatus>;

    fn fetch_output(&self, job_id: &JobId, request: &FetchOutputRequest<'_>) -> Result<()>;

    fn kill(&self, job_id: &JobId) -> Result<()>;

    fn clean(&self, job_id: &JobId) -> Result<()>;

    /// Whether in-memory contents are pushed by the client rather than
    /// written by the server.
    fn prefer_local_staging(&self) -> bool {
        true
    }
}
