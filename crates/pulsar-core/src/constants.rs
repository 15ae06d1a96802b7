pub mod dirs {
    pub const INPUTS: &str = "inputs";
    pub const OUTPUTS: &str = "outputs";
    pub const WORKING: &str = "working";
    pub const CONFIGS: &str = "configs";
    pub const TOOL_FILES: &str = "tool_files";
    pub const METADATA: &str = "metadata";
    pub const UNSTRUCTURED: &str = "unstructured";

    /// Subdirectories created for every job by `setup_job`.
    pub const JOB_SUBDIRECTORIES: [&str; 6] =
        [INPUTS, WORKING, OUTPUTS, CONFIGS, TOOL_FILES, METADATA];
}

pub mod job_files {
    pub const SUBMITTED: &str = "submitted";
    pub const PID: &str = "pid";
    pub const RETURN_CODE: &str = "return_code";
    pub const CANCELLED: &str = "cancelled";
    pub const EXTERNAL_ID: &str = "external_id";
    pub const COMMAND_LINE: &str = "command_line";
    pub const TOOL_ID: &str = "tool_id";
    pub const TOOL_VERSION: &str = "tool_version";
    pub const STDOUT: &str = "stdout";
    pub const STDERR: &str = "stderr";
    pub const JOB_SCRIPT: &str = "command.sh";
    pub const LAUNCH_CONFIG: &str = "launch_config";
    pub const FINAL_STATUS: &str = "final_status";
    pub const PREPROCESSED: &str = "preprocessed";
    pub const PREPROCESSING_FAILED: &str = "preprocessing_failed";
    pub const POSTPROCESSED: &str = "postprocessed";
    pub const RUNNING: &str = "running";
    pub const INPUT_TRANSFERS: &str = "input_transfers";
    pub const OUTPUT_TRANSFERS: &str = "output_transfers";
    pub const CONDOR_SUBMIT: &str = "job.condor.submit";
    pub const CONDOR_LOG: &str = "job_log";
    pub const SCHEDULER_STDOUT: &str = "scheduler_stdout";
    pub const SCHEDULER_STDERR: &str = "scheduler_stderr";
}

/// Names of the per-job locks. When both are needed, `STATUS` is taken first.
pub mod job_locks {
    /// Lifecycle transitions observed by the stateful proxy.
    pub const STATUS: &str = "status";
    /// Backend execution state: pid, submission and cancellation records.
    pub const EXECUTION: &str = "execution";
}

pub mod outputs {
    pub const COMMAND_VERSION_FILENAME: &str = "COMMAND_VERSION";
    pub const UNKNOWN_RETURN_CODE: &str = "__unknown__";
}

pub mod managers {
    pub const DEFAULT_MANAGER_NAME: &str = "_default_";
    pub const ACTIVE_JOBS_SUFFIX: &str = "-active-jobs";
    pub const PREPROCESSING_JOBS_SUFFIX: &str = "-preprocessing-jobs";
    pub const DEFAULT_MIN_POLLING_INTERVAL_SECS: f64 = 0.5;
    pub const DEFAULT_NUM_CONCURRENT_JOBS: usize = 1;
    pub const KILL_GRACE_PERIOD_MS: u64 = 1000;
}

pub mod placeholders {
    pub const JOBS_DIRECTORY: &str = "__PULSAR_JOBS_DIRECTORY__";
}

pub mod env {
    pub const LOG_LEVEL: &str = "PULSAR_LOG_LEVEL";
    pub const LOG_TEE: &str = "PULSAR_LOG_TEE";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_subdirectories_are_distinct() {
        let mut names = dirs::JOB_SUBDIRECTORIES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), dirs::JOB_SUBDIRECTORIES.len());
    }

    #[test]
    fn test_manager_constants() {
        assert_eq!(managers::DEFAULT_MANAGER_NAME, "_default_");
        assert_eq!(managers::ACTIVE_JOBS_SUFFIX, "-active-jobs");
    }
}
