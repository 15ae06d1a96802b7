#![allow(dead_code)]

use pulsar_core::constants::{dirs, job_files};
use pulsar_core::job_directory::JobDirectory;
use pulsar_core::locks::LockManager;
use pulsar_core::model::{FullStatus, JobConfig, JobId, JobStatus, PathType, SetupParams};
use pulsar_staging::client::{FetchOutputRequest, JobClient, PutFileRequest};
use pulsar_staging::description::LaunchRequest;
use pulsar_staging::error::Result;
use pulsar_staging::transfer::copy_file;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecord {
    pub name: String,
    pub path_type: PathType,
    pub source: Option<PathBuf>,
    pub contents: Option<String>,
}

/// Serves jobs out of a local staging root and runs them with `/bin/sh`
/// synchronously on launch.
pub struct DirectoryClient {
    staging_root: PathBuf,
    locks: Arc<LockManager>,
    next_id: AtomicUsize,
    pub puts: Mutex<Vec<PutRecord>>,
    pub launched: Mutex<Vec<LaunchRequest>>,
    pub execute: bool,
}

impl DirectoryClient {
    pub fn new(staging_root: &Path) -> Self {
        Self {
            staging_root: staging_root.to_path_buf(),
            locks: Arc::new(LockManager::new()),
            next_id: AtomicUsize::new(1),
            puts: Mutex::new(Vec::new()),
            launched: Mutex::new(Vec::new()),
            execute: true,
        }
    }

    pub fn job_directory(&self, job_id: &JobId) -> JobDirectory {
        JobDirectory::new(&self.staging_root, job_id, self.locks.clone())
    }

    pub fn puts(&self) -> Vec<PutRecord> {
        self.puts.lock().unwrap().clone()
    }

    pub fn last_launch(&self) -> LaunchRequest {
        self.launched.lock().unwrap().last().cloned().unwrap()
    }

    fn run(&self, request: &LaunchRequest) -> Result<()> {
        let job_directory = self.job_directory(&request.job_id);
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(&request.command_line)
            .current_dir(job_directory.working_directory())
            .output()?;
        job_directory.write_file(job_files::STDOUT, &output.stdout)?;
        job_directory.write_file(job_files::STDERR, &output.stderr)?;
        let code = output.status.code().unwrap_or(-1);
        job_directory.write_file(job_files::RETURN_CODE, code.to_string().as_bytes())?;
        Ok(())
    }
}

impl JobClient for DirectoryClient {
    fn setup(&self, params: &SetupParams) -> Result<JobConfig> {
        let job_id = match &params.job_id {
            Some(id) => JobId::from(id.as_str()),
            None => JobId(self.next_id.fetch_add(1, Ordering::SeqCst).to_string()),
        };
        let job_directory = self.job_directory(&job_id);
        job_directory.setup()?;
        for name in dirs::JOB_SUBDIRECTORIES {
            job_directory.make_directory(name)?;
        }
        Ok(job_directory.job_config(params.tool_id.as_deref(), params.tool_version.as_deref()))
    }

    fn put_file(&self, job_id: &JobId, request: &PutFileRequest<'_>) -> Result<String> {
        let job_directory = self.job_directory(job_id);
        let destination = job_directory.calculate_path(request.name, request.path_type)?;
        match (request.contents, request.path) {
            (Some(contents), _) => {
                if let Some(parent) = destination.parent() {
                    fs_err::create_dir_all(parent)?;
                }
                fs_err::write(&destination, contents)?;
            }
            (None, Some(path)) => copy_file(path, &destination)?,
            (None, None) => unreachable!("put_file without source"),
        }
        self.puts.lock().unwrap().push(PutRecord {
            name: request.name.to_string(),
            path_type: request.path_type,
            source: request.path.map(Path::to_path_buf),
            contents: request.contents.map(str::to_string),
        });
        Ok(destination.to_string_lossy().to_string())
    }

    fn launch(&self, request: &LaunchRequest) -> Result<()> {
        self.launched.lock().unwrap().push(request.clone());
        if self.execute {
            self.run(request)?;
        }
        Ok(())
    }

    fn full_status(&self, job_id: &JobId) -> Result<FullStatus> {
        let job_directory = self.job_directory(job_id);
        if !job_directory.contains_file(job_files::RETURN_CODE) {
            return Ok(FullStatus::in_progress(job_id.clone(), JobStatus::Queued));
        }
        let read = |name: &str| {
            String::from_utf8_lossy(&job_directory.read_file_or(name, b"")).to_string()
        };
        let mut status = FullStatus::in_progress(job_id.clone(), JobStatus::Complete);
        status.complete = true;
        status.returncode = read(job_files::RETURN_CODE).trim().parse().ok();
        status.stdout = Some(read(job_files::STDOUT));
        status.stderr = Some(read(job_files::STDERR));
        status.working_directory_contents = Some(job_directory.working_directory_contents()?);
        status.outputs_directory_contents = Some(job_directory.outputs_directory_contents()?);
        status.metadata_directory_contents = Some(job_directory.metadata_directory_contents()?);
        status.job_directory_contents = Some(job_directory.job_directory_contents()?);
        Ok(status)
    }

    fn fetch_output(&self, job_id: &JobId, request: &FetchOutputRequest<'_>) -> Result<()> {
        let job_directory = self.job_directory(job_id);
        let source = job_directory.calculate_path(request.name, request.output_type)?;
        copy_file(&source, request.path)
    }

    fn kill(&self, _job_id: &JobId) -> Result<()> {
        Ok(())
    }

    fn clean(&self, job_id: &JobId) -> Result<()> {
        self.job_directory(job_id).delete()?;
        Ok(())
    }
}
