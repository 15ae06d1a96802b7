use pulsar_core::model::{DependenciesDescription, Requirement};
use pulsar_staging::transfer::shell_quote;
use std::path::{Path, PathBuf};

const PACKAGE_REQUIREMENT: &str = "package";
const ENV_FILE: &str = "env.sh";
const DEFAULT_VERSION_DIR: &str = "default";

/// Galaxy-packages style resolver: each requirement maps onto an `env.sh`
/// below `<tool_dependency_dir>/<name>/<version>/`.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    tool_dependency_dir: Option<PathBuf>,
}

impl DependencyResolver {
    pub fn new(tool_dependency_dir: Option<&Path>) -> Self {
        Self {
            tool_dependency_dir: tool_dependency_dir.map(Path::to_path_buf),
        }
    }

    /// Shell lines that set up the environment for `description`. Unresolved
    /// requirements are logged and skipped.
    pub fn shell_commands(&self, description: Option<&DependenciesDescription>) -> Vec<String> {
        let Some(description) = description else {
            return Vec::new();
        };
        description
            .requirements
            .iter()
            .filter_map(|requirement| match self.env_file(requirement) {
                Some(env_file) => Some(format!(
                    ". {}",
                    shell_quote(&env_file.to_string_lossy())
                )),
                None => {
                    tracing::warn!(
                        "Failed to resolve dependency on '{}' (version {}), ignoring.",
                        requirement.name,
                        requirement.version.as_deref().unwrap_or("unspecified")
                    );
                    None
                }
            })
            .collect()
    }

    fn env_file(&self, requirement: &Requirement) -> Option<PathBuf> {
        if requirement.requirement_type != PACKAGE_REQUIREMENT {
            return None;
        }
        let base = self.tool_dependency_dir.as_ref()?.join(&requirement.name);
        let version_dir = requirement.version.as_deref().unwrap_or(DEFAULT_VERSION_DIR);
        [version_dir, DEFAULT_VERSION_DIR]
            .iter()
            .map(|dir| base.join(dir).join(ENV_FILE))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(name: &str, version: Option<&str>) -> Requirement {
        Requirement {
            name: name.to_string(),
            version: version.map(str::to_string),
            requirement_type: PACKAGE_REQUIREMENT.to_string(),
        }
    }

    #[test]
    fn test_resolves_versioned_then_default_env_files() {
        let root = tempfile::tempdir().unwrap();
        let versioned = root.path().join("samtools/1.9/env.sh");
        let fallback = root.path().join("bwa/default/env.sh");
        for file in [&versioned, &fallback] {
            fs_err::create_dir_all(file.parent().unwrap()).unwrap();
            fs_err::write(file, "").unwrap();
        }

        let resolver = DependencyResolver::new(Some(root.path()));
        let description = DependenciesDescription {
            requirements: vec![
                requirement("samtools", Some("1.9")),
                requirement("bwa", Some("0.7")),
                requirement("missing", None),
            ],
        };
        let commands = resolver.shell_commands(Some(&description));
        assert_eq!(
            commands,
            vec![
                format!(". '{}'", versioned.display()),
                format!(". '{}'", fallback.display()),
            ]
        );
    }

    #[test]
    fn test_without_dependency_dir_nothing_resolves() {
        let resolver = DependencyResolver::default();
        let description = DependenciesDescription {
            requirements: vec![requirement("samtools", Some("1.9"))],
        };
        assert!(resolver.shell_commands(Some(&description)).is_empty());
        assert!(resolver.shell_commands(None).is_empty());
    }
}
