use crate::error::{Result, StagingError};
use pulsar_core::logging;
use std::path::Path;
use std::process::Command;

pub mod http;
pub mod ssh;

pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Runs `cmd` to completion, turning a non-zero exit into `CommandFailed`
/// carrying its stderr.
pub fn run_command(cmd: &mut Command) -> Result<String> {
    logging::log_and_print_command(cmd);
    let output = cmd.output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(StagingError::CommandFailed {
            command: logging::format_command_for_display(cmd),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs_err::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Plain filesystem copy used by the shared-filesystem actions.
pub fn copy_file(source: &Path, destination: &Path) -> Result<()> {
    if !source.exists() {
        return Err(StagingError::MissingLocalPath(source.to_path_buf()));
    }
    ensure_parent_dir(destination)?;
    fs_err::copy(source, destination)?;
    Ok(())
}
