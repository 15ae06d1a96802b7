use crate::constants::dirs;
use crate::errors::{ConfigError, DomainError};
use crate::locks::{LockGuard, LockManager};
use crate::model::{
    DynamicFileSource, JobConfig, JobId, PathType, RealizedDynamicFileSource, SystemProperties,
};
use crate::path_helper::{is_strict_descendant, normalize_path, PathHelper};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Where a given path type lives inside a job directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Subdirectory(&'static str),
    Root,
}

/// (placement, nested relative names allowed)
fn placement_for(path_type: PathType) -> (Placement, bool) {
    match path_type {
        PathType::Input => (Placement::Subdirectory(dirs::INPUTS), true),
        PathType::Unstructured => (Placement::Subdirectory(dirs::UNSTRUCTURED), true),
        PathType::Config => (Placement::Subdirectory(dirs::CONFIGS), false),
        PathType::Tool => (Placement::Subdirectory(dirs::TOOL_FILES), true),
        PathType::Workdir | PathType::OutputWorkdir => {
            (Placement::Subdirectory(dirs::WORKING), true)
        }
        PathType::Metadata | PathType::OutputMetadata => {
            (Placement::Subdirectory(dirs::METADATA), true)
        }
        PathType::Output => (Placement::Subdirectory(dirs::OUTPUTS), true),
        PathType::Jobdir | PathType::OutputJobdir => (Placement::Root, true),
    }
}

/// Path arithmetic for a job directory on another host. Used by clients to
/// predict where the server will put remotely staged files.
#[derive(Debug, Clone)]
pub struct RemoteJobDirectory {
    path_helper: PathHelper,
    job_directory: String,
}

impl RemoteJobDirectory {
    pub fn new(job_directory: &str, separator: &str) -> Self {
        Self {
            path_helper: PathHelper::new(separator),
            job_directory: job_directory.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.job_directory
    }

    pub fn path_helper(&self) -> &PathHelper {
        &self.path_helper
    }

    fn sub_dir(&self, name: &str) -> String {
        self.path_helper.remote_join(&self.job_directory, &[name])
    }

    pub fn working_directory(&self) -> String {
        self.sub_dir(dirs::WORKING)
    }

    pub fn outputs_directory(&self) -> String {
        self.sub_dir(dirs::OUTPUTS)
    }

    pub fn configs_directory(&self) -> String {
        self.sub_dir(dirs::CONFIGS)
    }

    pub fn calculate_path(&self, remote_relative_path: &str, path_type: PathType) -> String {
        let (placement, allow_nested) = placement_for(path_type);
        let directory = match placement {
            Placement::Subdirectory(name) => self.sub_dir(name),
            Placement::Root => self.job_directory.clone(),
        };
        let name = if allow_nested {
            remote_relative_path.to_string()
        } else {
            basename(remote_relative_path).to_string()
        };
        self.path_helper.remote_join(&directory, &[name])
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Filesystem record of one job: its staged files plus a flat namespace of
/// JSON metadata files at the job root.
#[derive(Clone)]
pub struct JobDirectory {
    job_id: JobId,
    path: PathBuf,
    lock_manager: Arc<LockManager>,
}

impl std::fmt::Debug for JobDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDirectory")
            .field("job_id", &self.job_id)
            .field("path", &self.path)
            .finish()
    }
}

impl JobDirectory {
    pub fn new(staging_root: &Path, job_id: &JobId, lock_manager: Arc<LockManager>) -> Self {
        Self {
            job_id: job_id.clone(),
            path: staging_root.join(&job_id.0),
            lock_manager,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Creates the job root. Fails if it already exists: job ids are unique.
    pub fn setup(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        std::fs::create_dir(&self.path).map_err(|source| ConfigError::PathIo {
            path: self.path.clone(),
            source,
        })
    }

    pub fn make_directory(&self, name: &str) -> Result<PathBuf, ConfigError> {
        let path = self.path.join(name);
        match std::fs::create_dir(&path) {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(path),
            Err(source) => Err(ConfigError::PathIo { path, source }),
        }
    }

    pub fn inputs_directory(&self) -> PathBuf {
        self.path.join(dirs::INPUTS)
    }

    pub fn outputs_directory(&self) -> PathBuf {
        self.path.join(dirs::OUTPUTS)
    }

    pub fn working_directory(&self) -> PathBuf {
        self.path.join(dirs::WORKING)
    }

    pub fn configs_directory(&self) -> PathBuf {
        self.path.join(dirs::CONFIGS)
    }

    pub fn tool_files_directory(&self) -> PathBuf {
        self.path.join(dirs::TOOL_FILES)
    }

    pub fn metadata_directory(&self) -> PathBuf {
        self.path.join(dirs::METADATA)
    }

    pub fn unstructured_files_directory(&self) -> PathBuf {
        self.path.join(dirs::UNSTRUCTURED)
    }

    /// Setup response describing this directory's layout to a client.
    pub fn job_config(&self, tool_id: Option<&str>, tool_version: Option<&str>) -> JobConfig {
        let system_properties = SystemProperties::default();
        JobConfig {
            job_id: self.job_id.clone(),
            job_directory: self.path.clone(),
            working_directory: self.working_directory(),
            metadata_directory: self.metadata_directory(),
            outputs_directory: self.outputs_directory(),
            configs_directory: self.configs_directory(),
            tools_directory: self.tool_files_directory(),
            inputs_directory: self.inputs_directory(),
            unstructured_files_directory: self.unstructured_files_directory(),
            path_separator: system_properties.separator.clone(),
            system_properties,
            tool_id: tool_id.map(str::to_string),
            tool_version: tool_version.map(str::to_string),
        }
    }

    /// Resolves an untrusted relative name for `path_type`. Any name that would
    /// land outside the type's directory is rejected.
    pub fn calculate_path(
        &self,
        remote_path: &str,
        path_type: PathType,
    ) -> Result<PathBuf, DomainError> {
        let (placement, allow_nested) = placement_for(path_type);
        let directory = match placement {
            Placement::Subdirectory(name) => self.path.join(name),
            Placement::Root => self.path.clone(),
        };

        let escape = || DomainError::PathEscape {
            path: remote_path.to_string(),
            directory: directory.clone(),
        };

        let relative = Path::new(remote_path);
        let has_parent_refs = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if relative.is_absolute() || has_parent_refs {
            return Err(escape());
        }

        let candidate = if allow_nested {
            directory.join(relative)
        } else {
            let name = basename(remote_path);
            if name.is_empty() {
                return Err(escape());
            }
            directory.join(name)
        };

        if !is_strict_descendant(&candidate, &directory) {
            return Err(escape());
        }
        Ok(normalize_path(&candidate))
    }

    fn job_file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn read_file(&self, name: &str) -> Result<Vec<u8>, ConfigError> {
        Ok(fs_err::read(self.job_file(name))?)
    }

    /// Missing or unreadable files yield `default`.
    pub fn read_file_or(&self, name: &str, default: &[u8]) -> Vec<u8> {
        std::fs::read(self.job_file(name)).unwrap_or_else(|_| default.to_vec())
    }

    pub fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf, ConfigError> {
        let path = self.job_file(name);
        fs_err::write(&path, contents)?;
        Ok(path)
    }

    pub fn remove_file(&self, name: &str) {
        let _ = std::fs::remove_file(self.job_file(name));
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.job_file(name).exists()
    }

    pub fn open_file_for_append(&self, name: &str) -> Result<std::fs::File, ConfigError> {
        let path = self.job_file(name);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ConfigError::PathIo { path, source })
    }

    /// Serializes `value` to JSON and swaps it into place with an atomic rename.
    pub fn store_metadata<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), ConfigError> {
        let contents = serde_json::to_vec(value)?;
        let mut staged = tempfile::NamedTempFile::new_in(&self.path).map_err(|source| {
            ConfigError::PathIo {
                path: self.path.clone(),
                source,
            }
        })?;
        staged.write_all(&contents)?;
        let target = self.job_file(name);
        staged
            .persist(&target)
            .map_err(|e| ConfigError::PathIo {
                path: target,
                source: e.error,
            })?;
        Ok(())
    }

    pub fn load_metadata<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        let path = self.job_file(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigError::PathIo { path, source }),
        }
    }

    pub fn load_metadata_or<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        match self.load_metadata(name) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                tracing::warn!(
                    "Unreadable metadata '{}' for job '{}': {}",
                    name,
                    self.job_id,
                    e
                );
                default
            }
        }
    }

    pub fn has_metadata(&self, name: &str) -> bool {
        self.contains_file(name)
    }

    pub fn remove_metadata(&self, name: &str) {
        self.remove_file(name)
    }

    /// Acquires the named lock of this job. Distinct names are independent.
    pub fn lock(&self, name: &str) -> LockGuard {
        self.lock_manager.lock(&self.job_file(name))
    }

    pub fn working_directory_contents(&self) -> Result<Vec<String>, ConfigError> {
        directory_contents(&self.working_directory(), true)
    }

    pub fn outputs_directory_contents(&self) -> Result<Vec<String>, ConfigError> {
        directory_contents(&self.outputs_directory(), true)
    }

    pub fn metadata_directory_contents(&self) -> Result<Vec<String>, ConfigError> {
        directory_contents(&self.metadata_directory(), true)
    }

    /// Top-level files only (e.g. `galaxy.json`), never the staging subtrees.
    pub fn job_directory_contents(&self) -> Result<Vec<String>, ConfigError> {
        directory_contents(&self.path, false)
    }

    pub fn realized_dynamic_file_sources(
        &self,
        sources: &[DynamicFileSource],
    ) -> Vec<RealizedDynamicFileSource> {
        sources
            .iter()
            .filter_map(|source| {
                let path = self.calculate_path(&source.path, PathType::OutputJobdir).ok()?;
                let contents = std::fs::read_to_string(path).ok()?;
                Some(RealizedDynamicFileSource {
                    source_type: source.source_type,
                    contents,
                })
            })
            .collect()
    }

    pub fn delete(&self) -> Result<(), ConfigError> {
        if self.path.exists() {
            fs_err::remove_dir_all(&self.path)?;
        }
        self.lock_manager.free_locks_under(&self.path);
        Ok(())
    }
}

fn directory_contents(directory: &Path, recursive: bool) -> Result<Vec<String>, ConfigError> {
    if !directory.is_dir() {
        return Ok(Vec::new());
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut contents = Vec::new();
    for entry in WalkDir::new(directory).min_depth(1).max_depth(max_depth) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(directory) {
            contents.push(relative.to_string_lossy().to_string());
        }
    }
    contents.sort();
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn job_directory(root: &Path, id: &str) -> JobDirectory {
        JobDirectory::new(root, &JobId::from(id), Arc::new(LockManager::new()))
    }

    #[test]
    fn test_setup_twice_fails() {
        let root = tempdir().unwrap();
        let jd = job_directory(root.path(), "1");
        jd.setup().unwrap();
        let err = jd.setup().unwrap_err();
        match err {
            ConfigError::PathIo { source, .. } => {
                assert_eq!(source.kind(), ErrorKind::AlreadyExists)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_make_directory_is_idempotent() {
        let root = tempdir().unwrap();
        let jd = job_directory(root.path(), "1");
        jd.setup().unwrap();
        jd.make_directory(dirs::INPUTS).unwrap();
        jd.make_directory(dirs::INPUTS).unwrap();
        assert!(jd.inputs_directory().is_dir());
    }

    #[test]
    fn test_calculate_path_rejects_traversal() {
        let root = tempdir().unwrap();
        let jd = job_directory(root.path(), "1");
        for name in ["../../etc/passwd", "a/../../b", "/etc/passwd", ".."] {
            let err = jd.calculate_path(name, PathType::Input).unwrap_err();
            assert!(
                matches!(err, DomainError::PathEscape { .. }),
                "{} should have been rejected",
                name
            );
        }
        assert!(jd.calculate_path("../x", PathType::Config).is_err());
        assert!(jd.calculate_path("../x", PathType::OutputJobdir).is_err());
    }

    #[test]
    fn test_calculate_path_nesting_rules() {
        let root = tempdir().unwrap();
        let jd = job_directory(root.path(), "1");
        assert_eq!(
            jd.calculate_path("dataset_1_files/moo/cow", PathType::Input)
                .unwrap(),
            jd.inputs_directory().join("dataset_1_files/moo/cow")
        );
        assert_eq!(
            jd.calculate_path("dataset_1_files/moo/cow", PathType::Config)
                .unwrap(),
            jd.configs_directory().join("cow")
        );
        assert_eq!(
            jd.calculate_path("galaxy.json", PathType::OutputJobdir)
                .unwrap(),
            jd.path().join("galaxy.json")
        );
    }

    #[test]
    fn test_metadata_round_trip_and_defaults() {
        let root = tempdir().unwrap();
        let jd = job_directory(root.path(), "1");
        jd.setup().unwrap();

        assert!(!jd.has_metadata("external_id"));
        assert_eq!(jd.load_metadata::<String>("external_id").unwrap(), None);

        jd.store_metadata("external_id", "4242").unwrap();
        jd.store_metadata("external_id", "4242").unwrap();
        assert!(jd.has_metadata("external_id"));
        assert_eq!(
            jd.load_metadata::<String>("external_id").unwrap(),
            Some("4242".to_string())
        );

        jd.remove_metadata("external_id");
        jd.remove_metadata("external_id");
        assert_eq!(jd.load_metadata_or("external_id", "none".to_string()), "none");
    }

    #[test]
    fn test_read_file_or_default() {
        let root = tempdir().unwrap();
        let jd = job_directory(root.path(), "1");
        jd.setup().unwrap();
        assert_eq!(jd.read_file_or("stdout", b""), b"".to_vec());
        jd.write_file("stdout", b"hello\n").unwrap();
        assert_eq!(jd.read_file_or("stdout", b""), b"hello\n".to_vec());
    }

    #[test]
    fn test_directory_contents() {
        let root = tempdir().unwrap();
        let jd = job_directory(root.path(), "1");
        jd.setup().unwrap();
        for dir in dirs::JOB_SUBDIRECTORIES {
            jd.make_directory(dir).unwrap();
        }
        std::fs::create_dir_all(jd.working_directory().join("sub")).unwrap();
        std::fs::write(jd.working_directory().join("a.txt"), "a").unwrap();
        std::fs::write(jd.working_directory().join("sub/b.txt"), "b").unwrap();
        std::fs::write(jd.path().join("galaxy.json"), "{}").unwrap();

        assert_eq!(
            jd.working_directory_contents().unwrap(),
            vec!["a.txt".to_string(), "sub/b.txt".to_string()]
        );
        let top = jd.job_directory_contents().unwrap();
        assert_eq!(top, vec!["galaxy.json".to_string()]);
        assert!(jd.outputs_directory_contents().unwrap().is_empty());
    }

    #[test]
    fn test_job_config_describes_layout() {
        let root = tempdir().unwrap();
        let dir = job_directory(root.path(), "5");
        let config = dir.job_config(Some("cat1"), None);
        assert_eq!(config.job_id, JobId::from("5"));
        assert_eq!(config.outputs_directory, root.path().join("5").join("outputs"));
        assert_eq!(config.tools_directory, root.path().join("5").join("tool_files"));
        assert_eq!(config.tool_id.as_deref(), Some("cat1"));
        assert_eq!(config.path_separator, std::path::MAIN_SEPARATOR.to_string());
    }

    #[test]
    fn test_remote_job_directory_paths() {
        let remote = RemoteJobDirectory::new("/srv/staging/12", "/");
        assert_eq!(
            remote.calculate_path("a_files/x.bin", PathType::Input),
            "/srv/staging/12/inputs/a_files/x.bin"
        );
        assert_eq!(
            remote.calculate_path("conf/tool.xml", PathType::Config),
            "/srv/staging/12/configs/tool.xml"
        );
        assert_eq!(remote.outputs_directory(), "/srv/staging/12/outputs");
    }
}
