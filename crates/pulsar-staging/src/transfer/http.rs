use super::{ensure_parent_dir, run_command};
use crate::error::Result;
use std::path::Path;
use std::process::Command;

/// Downloads `url` into `path` with curl, failing on HTTP errors.
pub fn get_file(url: &str, path: &Path) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut cmd = Command::new("curl");
    cmd.arg("--silent")
        .arg("--show-error")
        .arg("--fail")
        .arg("--location")
        .arg("--output")
        .arg(path)
        .arg(url);
    run_command(&mut cmd)?;
    Ok(())
}

/// Uploads the contents of `path` to `url` as the POST body.
pub fn post_file(url: &str, path: &Path) -> Result<()> {
    let mut cmd = Command::new("curl");
    cmd.arg("--silent")
        .arg("--show-error")
        .arg("--fail")
        .arg("--request")
        .arg("POST")
        .arg("--data-binary")
        .arg(format!("@{}", path.display()))
        .arg(url);
    run_command(&mut cmd)?;
    Ok(())
}
