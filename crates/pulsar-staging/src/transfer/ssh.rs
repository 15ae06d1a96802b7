use super::{ensure_parent_dir, run_command, shell_quote};
use crate::error::{Result, StagingError};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::NamedTempFile;

const DEFAULT_SSH_PORT: u16 = 22;

/// Connection details for rsync/scp transfers. `key` holds the private key
/// contents, not a path.
#[derive(Debug, Clone)]
pub struct SshCredentials<'a> {
    pub user: Option<&'a str>,
    pub host: &'a str,
    pub port: Option<u16>,
    pub key: &'a str,
}

impl SshCredentials<'_> {
    fn remote_spec(&self, path: &str) -> String {
        match self.user {
            Some(user) => format!("{}@{}:{}", user, self.host, path),
            None => format!("{}:{}", self.host, path),
        }
    }

    fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }
}

/// Materializes the key in a private temporary file for the duration of one
/// transfer. The file is removed when the handle drops.
fn write_key_file(key: &str) -> Result<NamedTempFile> {
    let mut key_file = tempfile::Builder::new().prefix("pulsar-key-").tempfile()?;
    key_file.write_all(key.as_bytes())?;
    if !key.ends_with('\n') {
        key_file.write_all(b"\n")?;
    }
    key_file.flush()?;
    Ok(key_file)
}

fn rsync_command(credentials: &SshCredentials<'_>, key_path: &Path) -> Command {
    let mut cmd = Command::new("rsync");
    cmd.arg("-rltp").arg("-e").arg(format!(
        "ssh -i {} -p {} -o StrictHostKeyChecking=no",
        shell_quote(&key_path.to_string_lossy()),
        credentials.port()
    ));
    cmd
}

fn scp_command(credentials: &SshCredentials<'_>, key_path: &Path) -> Command {
    let mut cmd = Command::new("scp");
    cmd.arg("-P")
        .arg(credentials.port().to_string())
        .arg("-i")
        .arg(key_path)
        .arg("-o")
        .arg("StrictHostKeyChecking=no");
    cmd
}

fn require_host(credentials: &SshCredentials<'_>) -> Result<()> {
    if credentials.host.is_empty() {
        return Err(StagingError::Client(
            "ssh transfer requires an ssh_host".to_string(),
        ));
    }
    Ok(())
}

pub fn rsync_get_file(
    remote_path: &str,
    local_path: &Path,
    credentials: &SshCredentials<'_>,
) -> Result<()> {
    require_host(credentials)?;
    ensure_parent_dir(local_path)?;
    let key_file = write_key_file(credentials.key)?;
    let mut cmd = rsync_command(credentials, key_file.path());
    cmd.arg(credentials.remote_spec(remote_path)).arg(local_path);
    run_command(&mut cmd)?;
    Ok(())
}

pub fn rsync_post_file(
    local_path: &Path,
    remote_path: &str,
    credentials: &SshCredentials<'_>,
) -> Result<()> {
    require_host(credentials)?;
    let key_file = write_key_file(credentials.key)?;
    let mut cmd = rsync_command(credentials, key_file.path());
    cmd.arg(local_path).arg(credentials.remote_spec(remote_path));
    run_command(&mut cmd)?;
    Ok(())
}

pub fn scp_get_file(
    remote_path: &str,
    local_path: &Path,
    credentials: &SshCredentials<'_>,
) -> Result<()> {
    require_host(credentials)?;
    ensure_parent_dir(local_path)?;
    let key_file = write_key_file(credentials.key)?;
    let mut cmd = scp_command(credentials, key_file.path());
    cmd.arg(credentials.remote_spec(remote_path)).arg(local_path);
    run_command(&mut cmd)?;
    Ok(())
}

pub fn scp_post_file(
    local_path: &Path,
    remote_path: &str,
    credentials: &SshCredentials<'_>,
) -> Result<()> {
    require_host(credentials)?;
    let key_file = write_key_file(credentials.key)?;
    let mut cmd = scp_command(credentials, key_file.path());
    cmd.arg(local_path).arg(credentials.remote_spec(remote_path));
    run_command(&mut cmd)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn credentials() -> SshCredentials<'static> {
        SshCredentials {
            user: Some("galaxy"),
            host: "cluster.example.org",
            port: Some(2222),
            key: "-----BEGIN KEY-----",
        }
    }

    #[test]
    fn test_remote_spec_with_and_without_user() {
        let with_user = credentials();
        assert_eq!(
            with_user.remote_spec("/data/a.txt"),
            "galaxy@cluster.example.org:/data/a.txt"
        );
        let without_user = SshCredentials {
            user: None,
            ..credentials()
        };
        assert_eq!(
            without_user.remote_spec("/data/a.txt"),
            "cluster.example.org:/data/a.txt"
        );
    }

    #[test]
    fn test_key_file_is_private() {
        let key_file = write_key_file("secret").unwrap();
        let mode = fs_err::metadata(key_file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
        assert_eq!(fs_err::read_to_string(key_file.path()).unwrap(), "secret\n");
    }

    #[test]
    fn test_rsync_command_uses_port_and_key() {
        let key = Path::new("/tmp/k");
        let cmd = rsync_command(&credentials(), key);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args[0], "-rltp");
        assert_eq!(args[2], "ssh -i '/tmp/k' -p 2222 -o StrictHostKeyChecking=no");
    }
}
