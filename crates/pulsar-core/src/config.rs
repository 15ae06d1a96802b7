use crate::constants::managers::{DEFAULT_MANAGER_NAME, DEFAULT_MIN_POLLING_INTERVAL_SECS};
use crate::errors::ConfigError;
use crate::path_helper::absolute_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_max_files() -> usize {
    10
}

fn default_max_age_days() -> u64 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_age_days: default_max_age_days(),
            log_dir: None,
        }
    }
}

/// Worker count for the thread-pool backend: a number, or `"*"` for one worker per CPU.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Concurrency {
    Count(usize),
    Keyword(String),
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Count(crate::constants::managers::DEFAULT_NUM_CONCURRENT_JOBS)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdAssignerKind {
    /// Use the client supplied id.
    #[default]
    Galaxy,
    Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobPluginKind {
    #[default]
    Slurm,
    Torque,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "plugin", rename_all = "lowercase")]
pub enum ShellConfig {
    #[default]
    Local,
    Ssh {
        hostname: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        identity_file: Option<PathBuf>,
    },
}

/// Retry policy for staging actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// 0 disables retrying.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_interval_start")]
    pub interval_start: f64,
    #[serde(default = "default_interval_step")]
    pub interval_step: f64,
    #[serde(default = "default_interval_max")]
    pub interval_max: f64,
}

fn default_interval_start() -> f64 {
    2.0
}

fn default_interval_step() -> f64 {
    2.0
}

fn default_interval_max() -> f64 {
    30.0
}

impl RetryConfig {
    /// Intervals must be finite and non-negative seconds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("interval_start", self.interval_start),
            ("interval_step", self.interval_step),
            ("interval_max", self.interval_max),
        ];
        for (key, value) in intervals {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::General(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    key, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            interval_start: default_interval_start(),
            interval_step: default_interval_step(),
            interval_max: default_interval_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Unqueued,
    QueuedPython {
        #[serde(default)]
        num_concurrent_jobs: Concurrency,
    },
    QueuedCli {
        #[serde(default)]
        job_plugin: JobPluginKind,
        #[serde(default)]
        job_params: BTreeMap<String, String>,
        #[serde(default)]
        shell: ShellConfig,
    },
    QueuedDrmaa {
        #[serde(default)]
        native_specification: Option<String>,
    },
    QueuedCondor {
        #[serde(default)]
        submit: BTreeMap<String, String>,
    },
    Coexecution,
}

impl BackendConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            BackendConfig::Unqueued => "unqueued",
            BackendConfig::QueuedPython { .. } => "queued_python",
            BackendConfig::QueuedCli { .. } => "queued_cli",
            BackendConfig::QueuedDrmaa { .. } => "queued_drmaa",
            BackendConfig::QueuedCondor { .. } => "queued_condor",
            BackendConfig::Coexecution => "coexecution",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerConfig {
    #[serde(flatten)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub assign_ids: IdAssignerKind,
    #[serde(default = "default_min_polling_interval")]
    pub min_polling_interval: f64,
    #[serde(default)]
    pub preprocess_action: RetryConfig,
    #[serde(default)]
    pub postprocess_action: RetryConfig,
}

fn default_min_polling_interval() -> f64 {
    DEFAULT_MIN_POLLING_INTERVAL_SECS
}

impl ManagerConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            assign_ids: IdAssignerKind::default(),
            min_polling_interval: default_min_polling_interval(),
            preprocess_action: RetryConfig::default(),
            postprocess_action: RetryConfig::default(),
        }
    }

    pub fn min_polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_polling_interval.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub staging_directory: PathBuf,
    /// Root of the durable active-jobs index. Without it, tracking is in-memory only.
    #[serde(default)]
    pub persistence_directory: Option<PathBuf>,
    #[serde(default)]
    pub tool_dependency_dir: Option<PathBuf>,
    /// Root of the directory-backed object store used by `remote_object_store_copy`.
    #[serde(default)]
    pub object_store_directory: Option<PathBuf>,
    /// Keep job directories on `clean`.
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_managers")]
    pub managers: BTreeMap<String, ManagerConfig>,
}

fn default_managers() -> BTreeMap<String, ManagerConfig> {
    let mut managers = BTreeMap::new();
    managers.insert(
        DEFAULT_MANAGER_NAME.to_string(),
        ManagerConfig::new(BackendConfig::QueuedPython {
            num_concurrent_jobs: Concurrency::default(),
        }),
    );
    managers
}

impl AppConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = toml::from_str(contents)?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs_err::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn expand_paths(&mut self) {
        self.staging_directory = expand(&self.staging_directory);
        self.persistence_directory = self.persistence_directory.as_deref().map(expand);
        self.tool_dependency_dir = self.tool_dependency_dir.as_deref().map(expand);
        self.object_store_directory = self.object_store_directory.as_deref().map(expand);
        self.logging.log_dir = self.logging.log_dir.as_deref().map(expand);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.managers.is_empty() {
            return Err(ConfigError::General(
                "at least one manager must be configured".to_string(),
            ));
        }
        for (name, manager) in &self.managers {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::General(format!(
                    "invalid manager name '{}'",
                    name
                )));
            }
            if let BackendConfig::QueuedPython {
                num_concurrent_jobs,
            } = &manager.backend
            {
                match num_concurrent_jobs {
                    Concurrency::Count(0) => {
                        return Err(ConfigError::General(format!(
                            "manager '{}': num_concurrent_jobs must be at least 1",
                            name
                        )))
                    }
                    Concurrency::Keyword(k) if k != "*" => {
                        return Err(ConfigError::General(format!(
                            "manager '{}': num_concurrent_jobs must be a number or '*', got '{}'",
                            name, k
                        )))
                    }
                    _ => {}
                }
            }
            for (phase, retry) in [
                ("preprocess_action", &manager.preprocess_action),
                ("postprocess_action", &manager.postprocess_action),
            ] {
                retry.validate().map_err(|e| {
                    let reason = match e {
                        ConfigError::General(reason) => reason,
                        other => other.to_string(),
                    };
                    ConfigError::General(format!("manager '{}': {}.{}", name, phase, reason))
                })?;
            }
            if manager.min_polling_interval < 0.0 || !manager.min_polling_interval.is_finite() {
                return Err(ConfigError::General(format!(
                    "manager '{}': min_polling_interval must be a non-negative number",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::tilde(&raw);
    absolute_path(Path::new(expanded.as_ref()))
}

/// Default location: `$XDG_CONFIG_HOME/pulsar/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pulsar");
    let config_home = xdg_dirs.get_config_home().ok_or_else(|| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find config home directory",
        ))
    })?;
    Ok(config_home.join("config.toml"))
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound(path));
    }
    tracing::debug!("Loading configuration from '{}'", path.display());
    AppConfig::from_file(&path)
}
