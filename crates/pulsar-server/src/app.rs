use crate::error::{Result, ServerError};
use pulsar_core::config::AppConfig;
use pulsar_core::constants::managers::DEFAULT_MANAGER_NAME;
use pulsar_manager::{build_manager, BackendResources, StatefulManagerProxy};
use pulsar_staging::{DirectoryObjectStore, ObjectStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// The assembled server: one stateful manager per configured name.
pub struct PulsarApp {
    config: AppConfig,
    managers: BTreeMap<String, Arc<StatefulManagerProxy>>,
}

impl PulsarApp {
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_resources(config, BackendResources::default())
    }

    /// `resources` supplies collaborators a config file cannot describe, such
    /// as a DRMAA session. A configured `object_store_directory` is used when
    /// no object store is given.
    pub fn with_resources(config: AppConfig, mut resources: BackendResources) -> Result<Self> {
        fs_err::create_dir_all(&config.staging_directory)?;
        if let Some(directory) = &config.persistence_directory {
            fs_err::create_dir_all(directory)?;
        }
        if resources.object_store.is_none() {
            if let Some(root) = &config.object_store_directory {
                let store: Arc<dyn ObjectStore> = Arc::new(DirectoryObjectStore::new(root));
                resources.object_store = Some(store);
            }
        }

        let mut managers = BTreeMap::new();
        for (name, manager_config) in &config.managers {
            let manager = build_manager(name, manager_config, &config, &resources)?;
            tracing::info!(
                "Built manager '{}' ({})",
                name,
                manager_config.backend.type_name()
            );
            managers.insert(name.clone(), Arc::new(manager));
        }
        Ok(Self { config, managers })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// `None` selects the default manager.
    pub fn manager(&self, name: Option<&str>) -> Result<&Arc<StatefulManagerProxy>> {
        let name = name.unwrap_or(DEFAULT_MANAGER_NAME);
        self.managers
            .get(name)
            .ok_or_else(|| ServerError::UnknownManager(name.to_string()))
    }

    pub fn managers(&self) -> impl Iterator<Item = (&str, &Arc<StatefulManagerProxy>)> {
        self.managers.iter().map(|(name, manager)| (name.as_str(), manager))
    }

    /// Resumes every manager's interrupted preprocessing and active jobs.
    pub fn recover(&self) {
        for (name, manager) in &self.managers {
            tracing::info!("Recovering jobs of manager '{}'", name);
            manager.recover_active_jobs();
        }
    }

    pub fn shutdown(&self, timeout: Option<Duration>) {
        for (name, manager) in &self.managers {
            tracing::debug!("Shutting down manager '{}'", name);
            manager.shutdown(timeout);
        }
    }
}
