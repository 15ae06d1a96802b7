use pulsar_core::config::AppConfig;
use pulsar_core::job_directory::JobDirectory;
use pulsar_core::locks::LockManager;
use pulsar_core::model::JobId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_MANAGERS: &str = r#"
[managers._default_]
type = "queued_python"
num_concurrent_jobs = 2
min_polling_interval = 0.05
"#;

/// Temporary server and client roots plus a generated `config.toml`.
pub struct TestContext {
    pub _temp_dir: tempfile::TempDir,
    pub test_root: PathBuf,
    pub staging_dir: PathBuf,
    pub persistence_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_managers(DEFAULT_MANAGERS)
    }

    /// `managers` is appended verbatim to the generated config.
    pub fn with_managers(managers: &str) -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("pulsar-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let test_root = temp_dir.path().to_path_buf();

        let staging_dir = test_root.join("staging");
        let persistence_dir = test_root.join("persisted_data");
        let data_dir = test_root.join("galaxy");
        for dir in [&staging_dir, &persistence_dir, &data_dir] {
            fs_err::create_dir_all(dir).expect("Failed to create test dir");
        }

        let config_path = test_root.join("config.toml");
        let config_content = format!(
            r#"
staging_directory = "{}"
persistence_directory = "{}"

[logging]
max_files = 2
log_dir = "{}"
{}"#,
            staging_dir.display(),
            persistence_dir.display(),
            test_root.join("logs").display(),
            managers
        );
        fs_err::write(&config_path, config_content).expect("Failed to write temp config");

        Self {
            _temp_dir: temp_dir,
            test_root,
            staging_dir,
            persistence_dir,
            data_dir,
            config_path,
        }
    }

    pub fn app_config(&self) -> AppConfig {
        AppConfig::from_file(&self.config_path).expect("Generated config must parse")
    }

    /// Writes a client-side file below the data directory.
    pub fn data_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.data_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent).expect("Failed to create data subdir");
        }
        fs_err::write(&path, contents).expect("Failed to write data file");
        path
    }

    pub fn job_directory(&self, job_id: &str) -> JobDirectory {
        JobDirectory::new(
            &self.staging_dir,
            &JobId::from(job_id),
            Arc::new(LockManager::new()),
        )
    }

    pub fn read(&self, path: &Path) -> String {
        fs_err::read_to_string(path).unwrap_or_default()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `condition` every 20ms until it holds or `timeout` passes.
pub fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let started = Instant::now();
    loop {
        if condition() {
            return true;
        }
        if started.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
