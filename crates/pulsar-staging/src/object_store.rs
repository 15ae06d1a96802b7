use crate::error::{Result, StagingError};
use crate::transfer::copy_file;
use std::path::{Path, PathBuf};

/// Dataset storage reachable from the compute server, addressed by opaque
/// references.
pub trait ObjectStore: Send + Sync {
    /// Local path holding the referenced object's bytes.
    fn get_filename(&self, object_ref: &str) -> Result<PathBuf>;

    /// Replaces the referenced object with the contents of `path`, creating it
    /// when absent.
    fn update_from_file(&self, object_ref: &str, path: &Path) -> Result<()>;
}

/// Object store laid out as one file per reference below a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, object_ref: &str) -> Result<PathBuf> {
        let valid = !object_ref.is_empty()
            && !object_ref.contains(['/', '\\'])
            && object_ref != "."
            && object_ref != "..";
        if !valid {
            return Err(StagingError::Client(format!(
                "invalid object store reference '{}'",
                object_ref
            )));
        }
        Ok(self.root.join(object_ref))
    }
}

impl ObjectStore for DirectoryObjectStore {
    fn get_filename(&self, object_ref: &str) -> Result<PathBuf> {
        let path = self.object_path(object_ref)?;
        if !path.exists() {
            return Err(StagingError::MissingLocalPath(path));
        }
        Ok(path)
    }

    fn update_from_file(&self, object_ref: &str, path: &Path) -> Result<()> {
        let target = self.object_path(object_ref)?;
        copy_file(path, &target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryObjectStore::new(dir.path().join("objects"));
        let source = dir.path().join("result.txt");
        fs_err::write(&source, "42").unwrap();

        store.update_from_file("dataset_7", &source).unwrap();
        let stored = store.get_filename("dataset_7").unwrap();
        assert_eq!(fs_err::read_to_string(stored).unwrap(), "42");
    }

    #[test]
    fn test_rejects_nested_references() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryObjectStore::new(dir.path());
        assert!(store.get_filename("../etc/passwd").is_err());
        assert!(store.get_filename("").is_err());
    }
}
