use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Builds paths for a remote host whose path separator may differ from ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHelper {
    separator: String,
}

impl Default for PathHelper {
    fn default() -> Self {
        Self::new(&MAIN_SEPARATOR.to_string())
    }
}

impl PathHelper {
    pub fn new(separator: &str) -> Self {
        let separator = if separator.is_empty() {
            MAIN_SEPARATOR.to_string()
        } else {
            separator.to_string()
        };
        Self { separator }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn remote_join<S: AsRef<str>>(&self, base: &str, parts: &[S]) -> String {
        let mut joined = base.trim_end_matches(self.separator.as_str()).to_string();
        for part in parts {
            let part = part.as_ref().trim_matches(|c| c == '/' || c == MAIN_SEPARATOR);
            if part.is_empty() {
                continue;
            }
            joined.push_str(&self.separator);
            joined.push_str(part);
        }
        joined
    }

    /// Local relative name -> name understood by the remote host.
    pub fn remote_name(&self, local_name: &str) -> String {
        local_name.replace(MAIN_SEPARATOR, &self.separator)
    }

    /// Remote relative name -> local relative name.
    pub fn local_name(&self, remote_name: &str) -> String {
        remote_name.replace(self.separator.as_str(), &MAIN_SEPARATOR.to_string())
    }

    /// Re-roots `posix_path` from `old_base` onto `new_base`. Returns `None` when the
    /// path does not live under `old_base`.
    pub fn from_posix_with_new_base(
        &self,
        posix_path: &str,
        old_base: &str,
        new_base: &str,
    ) -> Option<String> {
        let old_base = old_base.trim_end_matches('/');
        let stripped = posix_path.strip_prefix(old_base)?;
        if !stripped.is_empty() && !stripped.starts_with('/') {
            return None;
        }
        let parts: Vec<&str> = stripped
            .trim_start_matches('/')
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();
        Some(self.remote_join(new_base, &parts))
    }
}

/// Lexically resolves `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Absolute, lexically normalized form of `path`, relative paths being resolved
/// against the current directory.
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_default();
        normalize_path(&cwd.join(path))
    }
}

/// True when `path` lies strictly beneath `directory` after normalization.
pub fn is_strict_descendant(path: &Path, directory: &Path) -> bool {
    let path = normalize_path(path);
    let directory = normalize_path(directory);
    path != directory && path.starts_with(&directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_join_with_foreign_separator() {
        let helper = PathHelper::new("\\");
        assert_eq!(
            helper.remote_join("C:\\staging\\1\\", &["outputs", "out.dat"]),
            "C:\\staging\\1\\outputs\\out.dat"
        );
    }

    #[test]
    fn test_remote_join_posix() {
        let helper = PathHelper::new("/");
        assert_eq!(
            helper.remote_join("/staging/1", &["working", "out.txt"]),
            "/staging/1/working/out.txt"
        );
    }

    #[test]
    fn test_from_posix_with_new_base() {
        let helper = PathHelper::new("/");
        assert_eq!(
            helper.from_posix_with_new_base(
                "/galaxy/data/ref/hg19.fa",
                "/galaxy/data/",
                "/cluster/data"
            ),
            Some("/cluster/data/ref/hg19.fa".to_string())
        );
        assert_eq!(
            helper.from_posix_with_new_base("/galaxy/database/x", "/galaxy/data", "/cluster/data"),
            None
        );
    }

    #[test]
    fn test_normalize_and_descendant() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert!(is_strict_descendant(
            Path::new("/job/inputs/a/b.dat"),
            Path::new("/job/inputs")
        ));
        assert!(!is_strict_descendant(
            Path::new("/job/inputs/../../etc/passwd"),
            Path::new("/job/inputs")
        ));
        assert!(!is_strict_descendant(
            Path::new("/job/inputs"),
            Path::new("/job/inputs")
        ));
        assert!(!is_strict_descendant(
            Path::new("/job/inputs2/x"),
            Path::new("/job/inputs")
        ));
    }
}
