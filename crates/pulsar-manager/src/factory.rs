use crate::backend::cli::{plugin_for, shell_from_config, CliQueueBackend, LocalShell, ShellInterface};
use crate::backend::{
    Backend, CoexecutionBackend, CondorBackend, DirectoryManager, DrmaaBackend, DrmaaSession,
    ThreadPoolQueueBackend, UnqueuedBackend,
};
use crate::error::{ManagerError, Result};
use crate::stateful::StatefulManagerProxy;
use pulsar_core::config::{AppConfig, BackendConfig, Concurrency, ManagerConfig};
use pulsar_core::errors::ConfigError;
use pulsar_staging::ObjectStore;
use std::sync::Arc;

/// Collaborators that cannot be described in a configuration file.
#[derive(Clone, Default)]
pub struct BackendResources {
    /// Required by `queued_drmaa` managers.
    pub drmaa_session: Option<Arc<dyn DrmaaSession>>,
    /// Replaces the configured shell of `queued_cli` and `queued_condor` managers.
    pub shell: Option<Arc<dyn ShellInterface>>,
    pub object_store: Option<Arc<dyn ObjectStore>>,
}

fn worker_count(concurrency: &Concurrency) -> Result<usize> {
    match concurrency {
        Concurrency::Count(n) => Ok(*n),
        Concurrency::Keyword(k) if k == "*" => Ok(num_cpus::get()),
        Concurrency::Keyword(k) => Err(ConfigError::General(format!(
            "num_concurrent_jobs must be a number or '*', got '{}'",
            k
        ))
        .into()),
    }
}

pub fn build_backend(
    name: &str,
    config: &ManagerConfig,
    app: &AppConfig,
    resources: &BackendResources,
) -> Result<Arc<dyn Backend>> {
    let base = DirectoryManager::from_config(name, config, app)?;
    tracing::debug!(
        "Building '{}' backend for manager '{}'",
        config.backend.type_name(),
        name
    );
    let backend: Arc<dyn Backend> = match &config.backend {
        BackendConfig::Unqueued => Arc::new(UnqueuedBackend::new(base)),
        BackendConfig::QueuedPython {
            num_concurrent_jobs,
        } => Arc::new(ThreadPoolQueueBackend::new(
            base,
            worker_count(num_concurrent_jobs)?,
        )),
        BackendConfig::QueuedCli {
            job_plugin,
            job_params,
            shell,
        } => Arc::new(CliQueueBackend::new(
            base,
            resources
                .shell
                .clone()
                .unwrap_or_else(|| shell_from_config(shell)),
            plugin_for(*job_plugin),
            job_params.clone(),
        )),
        BackendConfig::QueuedDrmaa {
            native_specification,
        } => {
            let session = resources.drmaa_session.clone().ok_or_else(|| {
                ManagerError::Config(ConfigError::General(format!(
                    "manager '{}' uses DRMAA but no DRMAA session is available",
                    name
                )))
            })?;
            Arc::new(DrmaaBackend::new(
                base,
                session,
                native_specification.clone(),
            ))
        }
        BackendConfig::QueuedCondor { submit } => Arc::new(CondorBackend::new(
            base,
            resources
                .shell
                .clone()
                .unwrap_or_else(|| Arc::new(LocalShell)),
            submit.clone(),
        )),
        BackendConfig::Coexecution => Arc::new(CoexecutionBackend::new(base)),
    };
    Ok(backend)
}

/// Builds the backend for `name` and wraps it in the lifecycle proxy.
pub fn build_manager(
    name: &str,
    config: &ManagerConfig,
    app: &AppConfig,
    resources: &BackendResources,
) -> Result<StatefulManagerProxy> {
    let backend = build_backend(name, config, app, resources)?;
    StatefulManagerProxy::new(
        backend,
        config,
        app.persistence_directory.as_deref(),
        resources.object_store.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsar_core::config::JobPluginKind;

    fn app(root: &std::path::Path) -> AppConfig {
        AppConfig::from_toml_str(&format!(
            "staging_directory = \"{}\"",
            root.join("staging").display()
        ))
        .unwrap()
    }

    #[test]
    fn test_worker_count_keyword() {
        assert_eq!(worker_count(&Concurrency::Count(3)).unwrap(), 3);
        assert_eq!(
            worker_count(&Concurrency::Keyword("*".to_string())).unwrap(),
            num_cpus::get()
        );
        assert!(worker_count(&Concurrency::Keyword("many".to_string())).is_err());
    }

    #[test]
    fn test_builds_each_configurable_backend() {
        let root = tempfile::tempdir().unwrap();
        let app = app(root.path());
        let configs = [
            BackendConfig::Unqueued,
            BackendConfig::QueuedPython {
                num_concurrent_jobs: Concurrency::Count(2),
            },
            BackendConfig::QueuedCli {
                job_plugin: JobPluginKind::Torque,
                job_params: Default::default(),
                shell: Default::default(),
            },
            BackendConfig::QueuedCondor {
                submit: Default::default(),
            },
            BackendConfig::Coexecution,
        ];
        for backend in configs {
            let manager = build_manager(
                "m",
                &ManagerConfig::new(backend),
                &app,
                &BackendResources::default(),
            )
            .unwrap();
            assert_eq!(manager.name(), "m");
            manager.shutdown(None);
        }
    }

    #[test]
    fn test_drmaa_requires_a_session() {
        let root = tempfile::tempdir().unwrap();
        let config = ManagerConfig::new(BackendConfig::QueuedDrmaa {
            native_specification: None,
        });
        let result = build_backend("m", &config, &app(root.path()), &BackendResources::default());
        assert!(matches!(result, Err(ManagerError::Config(_))));
    }
}
