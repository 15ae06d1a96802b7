pub mod config;
pub mod constants;
pub mod errors;
pub mod job_directory;
pub mod locks;
pub mod logging;
pub mod model;
pub mod path_helper;
