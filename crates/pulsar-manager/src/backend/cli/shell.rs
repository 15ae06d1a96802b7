use super::RemoteCommand;
use crate::error::Result;
use pulsar_core::config::ShellConfig;
use pulsar_core::logging;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.returncode == 0
    }
}

/// Where batch-system commands run.
pub trait ShellInterface: Send + Sync {
    fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput>;
}

fn run(cmd: &mut Command) -> Result<CommandOutput> {
    logging::log_and_print_command(cmd);
    let output = cmd.output()?;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        returncode: output.status.code().unwrap_or(-1),
    })
}

/// Runs commands with `/bin/sh -c` on the server host.
#[derive(Debug, Clone, Default)]
pub struct LocalShell;

impl ShellInterface for LocalShell {
    fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        run(Command::new("/bin/sh")
            .arg("-c")
            .arg(command.to_shell_string()))
    }
}

/// Runs commands on a submit host through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SecureShell {
    pub hostname: String,
    pub username: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
}

impl SecureShell {
    fn destination(&self) -> String {
        match &self.username {
            Some(user) => format!("{}@{}", user, self.hostname),
            None => self.hostname.clone(),
        }
    }

    fn command(&self, command: &RemoteCommand) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=no");
        if let Some(port) = self.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(identity_file) = &self.identity_file {
            cmd.arg("-i").arg(identity_file);
        }
        cmd.arg(self.destination()).arg(command.to_shell_string());
        cmd
    }
}

impl ShellInterface for SecureShell {
    fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        run(&mut self.command(command))
    }
}

pub fn shell_from_config(config: &ShellConfig) -> Arc<dyn ShellInterface> {
    match config {
        ShellConfig::Local => Arc::new(LocalShell),
        ShellConfig::Ssh {
            hostname,
            username,
            port,
            identity_file,
        } => Arc::new(SecureShell {
            hostname: hostname.clone(),
            username: username.clone(),
            port: *port,
            identity_file: identity_file.clone(),
        }),
    }
}
