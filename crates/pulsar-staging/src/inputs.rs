use crate::error::{Result, StagingError};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// The command line and config file contents of a job, searched for file
/// references and rewritten once staging decides where files go.
#[derive(Debug, Clone)]
pub struct JobInputs {
    command_line: String,
    config_files: BTreeMap<PathBuf, String>,
}

impl JobInputs {
    pub fn new(command_line: &str, config_files: &[PathBuf]) -> Result<Self> {
        let mut contents = BTreeMap::new();
        for config_file in config_files {
            let text = fs_err::read_to_string(config_file)?;
            contents.insert(config_file.clone(), text);
        }
        Ok(Self::from_contents(command_line, contents))
    }

    pub fn from_contents(command_line: &str, config_files: BTreeMap<PathBuf, String>) -> Self {
        Self {
            command_line: command_line.to_string(),
            config_files,
        }
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn config_files(&self) -> &BTreeMap<PathBuf, String> {
        &self.config_files
    }

    fn items(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.command_line.as_str()).chain(self.config_files.values().map(String::as_str))
    }

    /// Paths below `directory` mentioned anywhere, optionally quoted.
    pub fn find_referenced_subfiles(&self, directory: &Path) -> Vec<String> {
        let directory = directory.to_string_lossy();
        let directory = directory.trim_end_matches('/');
        if directory.is_empty() {
            return Vec::new();
        }
        let pattern = format!(r#"['"]?({}/[^\s'"]+)['"]?"#, regex::escape(directory));
        self.find_pattern_references(&pattern).unwrap_or_default()
    }

    pub fn path_referenced(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.items().any(|item| item.contains(path.as_ref()))
    }

    /// Every distinct match of `pattern`; group 1 when the pattern captures.
    pub fn find_pattern_references(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = Regex::new(pattern).map_err(|e| StagingError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let mut seen = BTreeSet::new();
        let mut references = Vec::new();
        for item in self.items() {
            for captures in regex.captures_iter(item) {
                let found = captures.get(1).or_else(|| captures.get(0));
                if let Some(found) = found {
                    let reference = found.as_str().to_string();
                    if seen.insert(reference.clone()) {
                        references.push(reference);
                    }
                }
            }
        }
        Ok(references)
    }

    /// Applies every rename in one pass. At each position the longest matching
    /// local path wins and replaced text is never rescanned, so a remote path
    /// containing another local path is left intact.
    pub fn rewrite_paths(&mut self, renames: &BTreeMap<String, String>) {
        let Some(regex) = rename_regex(renames) else {
            return;
        };
        let rewrite = |text: &str| -> String {
            regex
                .replace_all(text, |caps: &regex::Captures<'_>| {
                    renames
                        .get(&caps[0])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned()
        };
        self.command_line = rewrite(&self.command_line);
        for contents in self.config_files.values_mut() {
            *contents = rewrite(contents);
        }
    }
}

fn rename_regex(renames: &BTreeMap<String, String>) -> Option<Regex> {
    let mut keys: Vec<&String> = renames.keys().filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        return None;
    }
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternation = keys
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&alternation).ok()
}
