use crate::error::Result;
use crate::threads::recover;
use pulsar_core::model::JobId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Index of jobs a manager still tracks, kept as one empty sentinel file per
/// job under `<persistence_directory>/<manager><suffix>/` so tracking
/// survives a restart. Without a persistence directory the index lives in
/// memory.
#[derive(Debug)]
pub struct ActiveJobs {
    store: Store,
}

#[derive(Debug)]
enum Store {
    Directory(PathBuf),
    Memory(Mutex<BTreeSet<JobId>>),
}

impl ActiveJobs {
    pub fn new(
        manager_name: &str,
        persistence_directory: Option<&Path>,
        suffix: &str,
    ) -> Result<Self> {
        let store = match persistence_directory {
            Some(root) => {
                let directory = root.join(format!("{}{}", manager_name, suffix));
                fs_err::create_dir_all(&directory)?;
                Store::Directory(directory)
            }
            None => Store::Memory(Mutex::new(BTreeSet::new())),
        };
        Ok(Self { store })
    }

    pub fn activate_job(&self, job_id: &JobId) -> Result<()> {
        match &self.store {
            Store::Directory(directory) => {
                fs_err::File::create(directory.join(job_id.as_str()))?;
            }
            Store::Memory(ids) => {
                recover(ids.lock()).insert(job_id.clone());
            }
        }
        Ok(())
    }

    /// Removing an inactive job is a no-op.
    pub fn deactivate_job(&self, job_id: &JobId) {
        match &self.store {
            Store::Directory(directory) => {
                let path = directory.join(job_id.as_str());
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("Failed to deactivate job '{}': {}", job_id, e);
                    }
                }
            }
            Store::Memory(ids) => {
                recover(ids.lock()).remove(job_id);
            }
        }
    }

    pub fn is_active(&self, job_id: &JobId) -> bool {
        match &self.store {
            Store::Directory(directory) => directory.join(job_id.as_str()).is_file(),
            Store::Memory(ids) => recover(ids.lock()).contains(job_id),
        }
    }

    /// Sorted for stable iteration.
    pub fn active_job_ids(&self) -> Vec<JobId> {
        match &self.store {
            Store::Directory(directory) => {
                let entries = match fs_err::read_dir(directory) {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::warn!("Failed to list active jobs: {}", e);
                        return Vec::new();
                    }
                };
                let mut ids: Vec<JobId> = entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.path().is_file())
                    .map(|entry| JobId(entry.file_name().to_string_lossy().to_string()))
                    .collect();
                ids.sort();
                ids
            }
            Store::Memory(ids) => recover(ids.lock()).iter().cloned().collect(),
        }
    }
}
