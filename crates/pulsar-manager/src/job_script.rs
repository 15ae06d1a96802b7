use crate::error::Result;
use pulsar_core::model::EnvVar;
use pulsar_staging::transfer::shell_quote;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const DEFAULT_SHELL: &str = "/bin/sh";

/// Shell script wrapping a job's command line: scheduler headers, environment,
/// dependency setup, then the command run from the working directory with its
/// exit code captured to a file.
#[derive(Debug, Clone)]
pub struct JobScript {
    shell: String,
    headers: Vec<String>,
    env: Vec<EnvVar>,
    setup_commands: Vec<String>,
    working_directory: PathBuf,
    command_line: String,
    redirects: Option<(PathBuf, PathBuf)>,
    exit_code_path: PathBuf,
}

impl JobScript {
    pub fn new(command_line: &str, working_directory: &Path, exit_code_path: &Path) -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            headers: Vec::new(),
            env: Vec::new(),
            setup_commands: Vec::new(),
            working_directory: working_directory.to_path_buf(),
            command_line: command_line.to_string(),
            redirects: None,
            exit_code_path: exit_code_path.to_path_buf(),
        }
    }

    pub fn headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.extend(headers.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: &[EnvVar]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    pub fn setup_commands(mut self, commands: Vec<String>) -> Self {
        self.setup_commands.extend(commands);
        self
    }

    pub fn redirect(mut self, stdout: &Path, stderr: &Path) -> Self {
        self.redirects = Some((stdout.to_path_buf(), stderr.to_path_buf()));
        self
    }

    pub fn render(&self) -> String {
        let mut lines = vec![format!("#!{}", self.shell)];
        lines.extend(self.headers.iter().cloned());
        for var in &self.env {
            let value = if var.raw {
                var.value.clone()
            } else {
                shell_quote(&var.value)
            };
            lines.push(format!("{}={}; export {}", var.name, value, var.name));
        }
        lines.extend(self.setup_commands.iter().cloned());
        lines.push(format!(
            "cd {}",
            shell_quote(&self.working_directory.to_string_lossy())
        ));
        match &self.redirects {
            Some((stdout, stderr)) => lines.push(format!(
                "(\n{}\n) > {} 2> {}",
                self.command_line,
                shell_quote(&stdout.to_string_lossy()),
                shell_quote(&stderr.to_string_lossy())
            )),
            None => lines.push(self.command_line.clone()),
        }
        lines.push(format!(
            "echo $? > {}",
            shell_quote(&self.exit_code_path.to_string_lossy())
        ));
        let mut script = lines.join("\n");
        script.push('\n');
        script
    }

    /// Writes the rendered script to `path` and marks it executable.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs_err::write(path, self.render())?;
        fs_err::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }
}
