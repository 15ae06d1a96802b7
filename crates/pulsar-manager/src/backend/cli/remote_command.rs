use pulsar_staging::transfer::shell_quote;
use std::fmt;
use std::path::Path;

/// Program plus arguments destined for a [`super::ShellInterface`]. Arguments
/// stay raw until rendered; words that a shell would split or expand are
/// single-quoted then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
}

fn is_plain_word(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+".contains(c))
}

impl RemoteCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        let rendered = path.to_string_lossy().into_owned();
        self.arg(&rendered)
    }

    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg.as_ref()))
    }

    pub fn to_shell_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if is_plain_word(arg) {
                write!(f, " {}", arg)?;
            } else {
                write!(f, " {}", shell_quote(arg))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_special_words_are_quoted() {
        let cmd = RemoteCommand::new("squeue")
            .args(["-o", "%A %t"])
            .arg("it's")
            .arg("");
        assert_eq!(cmd.to_shell_string(), "squeue -o '%A %t' 'it'\\''s' ''");
    }

    #[test]
    fn test_path_arguments_are_quoted() {
        let submit = RemoteCommand::new("sbatch").path_arg(Path::new("/jobs/my job/command.sh"));
        assert_eq!(submit.to_string(), "sbatch '/jobs/my job/command.sh'");
        let plain = RemoteCommand::new("qsub").path_arg(Path::new("/jobs/7/command.sh"));
        assert_eq!(plain.to_string(), "qsub /jobs/7/command.sh");
    }
}
