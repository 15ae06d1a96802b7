mod active_jobs;
mod dependencies;
mod error;
mod factory;
mod id_assigner;
mod job_script;
mod stateful;
mod threads;

pub mod backend;
pub mod staging;

pub use active_jobs::ActiveJobs;
pub use backend::{Backend, DirectoryManager, LaunchParams};
pub use dependencies::DependencyResolver;
pub use error::{ManagerError, Result};
pub use factory::{build_backend, build_manager, BackendResources};
pub use id_assigner::IdAssigner;
pub use job_script::JobScript;
pub use stateful::{StateChangeCallback, StatefulManagerProxy};
