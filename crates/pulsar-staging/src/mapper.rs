use crate::action::{Action, ActionKwds, ActionSource, ActionType, TransferRecord};
use crate::error::{Result, StagingError};
use pulsar_core::errors::ConfigError;
use pulsar_core::model::PathType;
use pulsar_core::path_helper::absolute_path;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use wildmatch::WildMatch;

const DEFAULTS_TOKEN: &str = "*defaults*";
const ANY_TOKEN: &str = "*any*";

fn default_action() -> ActionType {
    ActionType::Transfer
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Prefix,
    Glob,
    Regex,
}

/// One declarative staging rule. A rule without `path` applies to every path
/// of its `path_types`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapperConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    /// Comma separated path type names; `*defaults*` and `*any*` expand to
    /// the default-eligible and all types respectively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_types: Option<String>,
    #[serde(default = "default_action")]
    pub action: ActionType,
    #[serde(flatten)]
    pub kwds: ActionKwds,
}

/// Staging behaviour for one job, shipped to the server with the launch
/// request so postprocessing makes the same decisions the client would.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_action")]
    pub default_action: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub paths: Vec<PathMapperConfig>,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            default_action: default_action(),
            files_endpoint: None,
            ssh_user: None,
            ssh_host: None,
            ssh_port: None,
            ssh_key: None,
            paths: Vec::new(),
        }
    }
}

impl StagingConfig {
    pub fn with_default_action(default_action: ActionType) -> Self {
        Self {
            default_action,
            ..Default::default()
        }
    }

    /// Reads a TOML (by extension) or JSON staging description.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path)?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let config = if is_toml {
            toml::from_str(&content).map_err(ConfigError::from)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    fn ssh_defaults(&self) -> ActionKwds {
        ActionKwds {
            ssh_user: self.ssh_user.clone(),
            ssh_host: self.ssh_host.clone(),
            ssh_port: self.ssh_port,
            ssh_key: self.ssh_key.clone(),
            ..Default::default()
        }
    }
}

fn parse_path_types(spec: Option<&str>) -> Result<Vec<PathType>> {
    let mut types = Vec::new();
    for token in spec.unwrap_or(DEFAULTS_TOKEN).split(',') {
        let token = token.trim();
        let expanded: Vec<PathType> = match token {
            "" => continue,
            DEFAULTS_TOKEN => PathType::DEFAULT_ELIGIBLE.to_vec(),
            ANY_TOKEN => PathType::ALL.to_vec(),
            name => vec![name.parse::<PathType>()?],
        };
        for path_type in expanded {
            if !types.contains(&path_type) {
                types.push(path_type);
            }
        }
    }
    Ok(types)
}

const REFERENCE_CHAR: &str = "[^\\s,\"']";

/// Regex finding shell-glob matches inside free text. The match is captured in
/// group 1 and must be followed by a delimiter or the end of the text.
fn glob_to_regex(glob: &str) -> String {
    let mut pattern = String::from("(");
    for c in glob.chars() {
        match c {
            '*' => {
                pattern.push_str(REFERENCE_CHAR);
                pattern.push('*');
            }
            '?' => pattern.push_str(REFERENCE_CHAR),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push_str(")(?:[\\s,\"']|$)");
    pattern
}

#[derive(Debug, Clone)]
enum Matcher {
    Prefix(String),
    Glob(WildMatch, String),
    Regex(Regex, String),
    PathTypeOnly,
}

/// Compiled form of a [`PathMapperConfig`].
#[derive(Debug, Clone)]
pub struct PathMapper {
    matcher: Matcher,
    path_types: Vec<PathType>,
    action_type: ActionType,
    kwds: ActionKwds,
}

impl PathMapper {
    pub fn from_config(config: &PathMapperConfig) -> Result<Self> {
        if !config.action.is_configurable() {
            return Err(StagingError::UnknownActionType(config.action.to_string()));
        }
        let matcher = match &config.path {
            None => Matcher::PathTypeOnly,
            Some(path) => match config.match_type.unwrap_or_default() {
                MatchType::Prefix => {
                    Matcher::Prefix(absolute_path(Path::new(path)).to_string_lossy().to_string())
                }
                MatchType::Glob => Matcher::Glob(WildMatch::new(path), path.clone()),
                MatchType::Regex => {
                    let anchored = Regex::new(&format!("^(?:{})", path)).map_err(|e| {
                        StagingError::InvalidPattern {
                            pattern: path.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    Matcher::Regex(anchored, path.clone())
                }
            },
        };
        Ok(Self {
            matcher,
            path_types: parse_path_types(config.path_types.as_deref())?,
            action_type: config.action,
            kwds: config.kwds.clone(),
        })
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn path_types(&self) -> &[PathType] {
        &self.path_types
    }

    pub fn matches(&self, path: Option<&str>, path_type: PathType) -> bool {
        if !self.path_types.contains(&path_type) {
            return false;
        }
        match (&self.matcher, path) {
            (Matcher::PathTypeOnly, _) => true,
            (_, None) => false,
            (Matcher::Prefix(prefix), Some(path)) => path.starts_with(prefix.as_str()),
            (Matcher::Glob(glob, _), Some(path)) => glob.matches(path),
            (Matcher::Regex(regex, _), Some(path)) => regex.is_match(path),
        }
    }

    /// Regex that finds references to paths this rule would match inside
    /// command lines and config files. When the pattern has a capture group,
    /// group 1 is the reference.
    pub fn to_pattern(&self) -> Option<String> {
        match &self.matcher {
            Matcher::Prefix(prefix) => Some(format!("({}{}+)", regex::escape(prefix), REFERENCE_CHAR)),
            Matcher::Glob(_, glob) => Some(glob_to_regex(glob)),
            Matcher::Regex(_, raw) => Some(raw.clone()),
            Matcher::PathTypeOnly => None,
        }
    }
}

/// Chooses, per file and path type, the [`Action`] that moves it.
#[derive(Debug, Clone)]
pub struct FileActionMapper {
    config: StagingConfig,
    mappers: Vec<PathMapper>,
    actions: Vec<Action>,
}

impl FileActionMapper {
    pub fn new(config: StagingConfig) -> Result<Self> {
        if !config.default_action.is_configurable() {
            return Err(StagingError::UnknownActionType(
                config.default_action.to_string(),
            ));
        }
        let mappers = config
            .paths
            .iter()
            .map(PathMapper::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config,
            mappers,
            actions: Vec::new(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(StagingConfig::from_file(path)?)
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn mappers(&self) -> &[PathMapper] {
        &self.mappers
    }

    /// Rules that also drive discovery of unstructured file references.
    pub fn unstructured_mappers(&self) -> Vec<PathMapper> {
        self.mappers
            .iter()
            .filter(|m| m.path_types.contains(&PathType::Unstructured))
            .cloned()
            .collect()
    }

    fn find_mapper(&self, path: Option<&str>, path_type: PathType) -> Option<&PathMapper> {
        let normalized = path.map(|p| absolute_path(Path::new(p)).to_string_lossy().to_string());
        self.mappers
            .iter()
            .find(|m| m.matches(normalized.as_deref(), path_type))
    }

    fn resolve_action_type(&self, path_type: PathType, mapper: Option<&PathMapper>) -> ActionType {
        let mut action_type = match mapper {
            Some(mapper) => mapper.action_type,
            None if path_type.is_default_eligible() => self.config.default_action,
            None => ActionType::None,
        };
        if path_type.forces_copy() && action_type == ActionType::None {
            action_type = ActionType::Copy;
        }
        action_type
    }

    /// Decides how `source` of `path_type` is staged. An explicit `mapper`
    /// bypasses rule matching.
    pub fn action(
        &mut self,
        source: &ActionSource,
        path_type: PathType,
        mapper: Option<&PathMapper>,
    ) -> Result<Action> {
        let found = match mapper {
            Some(mapper) => Some(mapper),
            None => self.find_mapper(source.path.as_deref(), path_type),
        };
        let action_type = self.resolve_action_type(path_type, found);
        let kwds = found.map(|m| m.kwds.clone()).unwrap_or_default();

        let mut action = Action::build(action_type, source, &kwds)?;
        self.process_action(&mut action, path_type)?;
        tracing::debug!(
            "Mapped {} path {:?} to action {}",
            path_type,
            source.path,
            action_type
        );
        self.actions.push(action.clone());
        Ok(action)
    }

    fn process_action(&self, action: &mut Action, path_type: PathType) -> Result<()> {
        if let Some(target) = action.as_needs_endpoint_mut() {
            let url = self.endpoint_url(target.source_path(), path_type)?;
            target.set_url(url);
        }
        if let Some(target) = action.as_needs_ssh_mut() {
            target.inject_ssh_defaults(&self.config.ssh_defaults());
            if target.ssh_key().is_none() {
                return Err(StagingError::MissingSshKey);
            }
        }
        Ok(())
    }

    fn endpoint_url(&self, path: Option<&str>, path_type: PathType) -> Result<String> {
        let base = self
            .config
            .files_endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or(StagingError::MissingFilesEndpoint)?;
        let separator = if base.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{}path={}&file_type={}",
            base,
            separator,
            urlencoding::encode(path.unwrap_or_default()),
            urlencoding::encode(path_type.as_str())
        ))
    }

    /// Ledger entries of every manifest-building action handed out so far.
    pub fn finalize(&self) -> Vec<TransferRecord> {
        self.actions.iter().filter_map(Action::finalize).collect()
    }
}
