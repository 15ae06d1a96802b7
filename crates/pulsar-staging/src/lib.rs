pub mod action;
pub mod client;
pub mod collector;
pub mod description;
pub mod error;
pub mod inputs;
pub mod mapper;
pub mod object_store;
pub mod retry;
pub mod stager;
pub mod submission;
pub mod transfer;

pub use action::{Action, ActionSource, ActionType, TransferRecord};
pub use client::{FetchOutputRequest, JobClient, PutFileRequest};
pub use collector::{ClientOutputCollector, OutputCollector, ResultsCollector};
pub use description::{
    ClientInput, ClientJobDescription, ClientOutputs, InputType, LaunchRequest, PulsarOutputs,
    RemoteStaging, RemoteStagingInput, ToolDescription,
};
pub use error::{Result, StagingError};
pub use mapper::{FileActionMapper, StagingConfig};
pub use object_store::{DirectoryObjectStore, ObjectStore};
pub use retry::RetryActionExecutor;
pub use stager::{FileStager, StagedJob, TransferTracker};
pub use submission::{finish_job, submit_job, wait_for_job, CleanupPolicy};
