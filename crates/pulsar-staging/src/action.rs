use crate::error::{Result, StagingError};
use crate::object_store::ObjectStore;
use crate::transfer::{
    self, http,
    ssh::{self, SshCredentials},
};
use pulsar_core::path_helper::PathHelper;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    None,
    Rewrite,
    Transfer,
    Copy,
    RemoteCopy,
    RemoteTransfer,
    #[serde(rename = "remote_rsync_transfer")]
    Rsync,
    #[serde(rename = "remote_scp_transfer")]
    Scp,
    JsonTransfer,
    RemoteObjectStoreCopy,
    Message,
}

/// Who moves the bytes for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingKind {
    /// Path is valid on both sides.
    None,
    /// The client moves the file.
    Local,
    /// The compute server moves the file.
    Remote,
    /// Whichever side the client prefers.
    Default,
}

impl ActionType {
    pub const ALL: [ActionType; 11] = [
        ActionType::None,
        ActionType::Rewrite,
        ActionType::Transfer,
        ActionType::Copy,
        ActionType::RemoteCopy,
        ActionType::RemoteTransfer,
        ActionType::Rsync,
        ActionType::Scp,
        ActionType::JsonTransfer,
        ActionType::RemoteObjectStoreCopy,
        ActionType::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::None => "none",
            ActionType::Rewrite => "rewrite",
            ActionType::Transfer => "transfer",
            ActionType::Copy => "copy",
            ActionType::RemoteCopy => "remote_copy",
            ActionType::RemoteTransfer => "remote_transfer",
            ActionType::Rsync => "remote_rsync_transfer",
            ActionType::Scp => "remote_scp_transfer",
            ActionType::JsonTransfer => "json_transfer",
            ActionType::RemoteObjectStoreCopy => "remote_object_store_copy",
            ActionType::Message => "message",
        }
    }

    pub fn staging(&self) -> StagingKind {
        match self {
            ActionType::None | ActionType::Rewrite => StagingKind::None,
            ActionType::Transfer | ActionType::Copy => StagingKind::Local,
            ActionType::Message => StagingKind::Default,
            ActionType::RemoteCopy
            | ActionType::RemoteTransfer
            | ActionType::Rsync
            | ActionType::Scp
            | ActionType::JsonTransfer
            | ActionType::RemoteObjectStoreCopy => StagingKind::Remote,
        }
    }

    /// Message actions only arise from in-memory contents, never from mapper rules.
    pub fn is_configurable(&self) -> bool {
        !matches!(self, ActionType::Message)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self> {
        ActionType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| StagingError::UnknownActionType(s.to_string()))
    }
}

/// The thing an action is requested for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSource {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store_ref: Option<String>,
}

impl ActionSource {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_string_lossy().to_string()),
            object_store_ref: None,
        }
    }
}

/// Extra per-rule parameters handed to the action a rule produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionKwds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAction {
    #[serde(default)]
    pub path: Option<String>,
}

/// Maps paths under `source_directory` onto `destination_directory` without
/// moving any bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteAction {
    #[serde(default)]
    pub path: Option<String>,
    pub source_directory: String,
    pub destination_directory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlAction {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshAction {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default)]
    pub ssh_host: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub ssh_key: Option<String>,
}

/// One entry of the transfer ledger written for an external agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_path: Option<String>,
}

/// Records transfers instead of performing them. Clones share the record so
/// the mapper that handed the action out can report it at finalize time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonTransferAction {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(skip)]
    record: Arc<Mutex<Option<TransferRecord>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreAction {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub object_store_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAction {
    pub contents: String,
}

/// How one file crosses (or does not cross) the client/server boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    None(PathAction),
    Rewrite(RewriteAction),
    Transfer(PathAction),
    Copy(PathAction),
    RemoteCopy(PathAction),
    RemoteTransfer(UrlAction),
    #[serde(rename = "remote_rsync_transfer")]
    Rsync(SshAction),
    #[serde(rename = "remote_scp_transfer")]
    Scp(SshAction),
    JsonTransfer(JsonTransferAction),
    RemoteObjectStoreCopy(ObjectStoreAction),
    Message(MessageAction),
}

/// Actions whose target URL is derived from the mapper's `files_endpoint`.
pub trait NeedsEndpoint {
    fn source_path(&self) -> Option<&str>;
    fn set_url(&mut self, url: String);
}

/// Actions that reach the client over ssh.
pub trait NeedsSshCredentials {
    /// Fills every unset property from the mapper-level defaults.
    fn inject_ssh_defaults(&mut self, defaults: &ActionKwds);
    fn ssh_key(&self) -> Option<&str>;
    fn set_ssh_key(&mut self, key: String);
}

impl NeedsEndpoint for UrlAction {
    fn source_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn set_url(&mut self, url: String) {
        self.url = Some(url);
    }
}

impl NeedsEndpoint for JsonTransferAction {
    fn source_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn set_url(&mut self, url: String) {
        self.url = Some(url);
    }
}

impl NeedsSshCredentials for SshAction {
    fn inject_ssh_defaults(&mut self, defaults: &ActionKwds) {
        if self.ssh_user.is_none() {
            self.ssh_user = defaults.ssh_user.clone();
        }
        if self.ssh_host.is_none() {
            self.ssh_host = defaults.ssh_host.clone();
        }
        if self.ssh_port.is_none() {
            self.ssh_port = defaults.ssh_port;
        }
        if self.ssh_key.is_none() {
            self.ssh_key = defaults.ssh_key.clone();
        }
    }

    fn ssh_key(&self) -> Option<&str> {
        self.ssh_key.as_deref()
    }

    fn set_ssh_key(&mut self, key: String) {
        self.ssh_key = Some(key);
    }
}

impl SshAction {
    fn credentials(&self) -> Result<SshCredentials<'_>> {
        let key = self.ssh_key.as_deref().ok_or(StagingError::MissingSshKey)?;
        Ok(SshCredentials {
            user: self.ssh_user.as_deref(),
            host: self.ssh_host.as_deref().unwrap_or_default(),
            port: self.ssh_port,
            key,
        })
    }
}

impl JsonTransferAction {
    fn record(&self, to_path: Option<&Path>, from_path: Option<&Path>) -> Result<()> {
        let url = self.url.clone().ok_or(StagingError::MissingFilesEndpoint)?;
        let entry = TransferRecord {
            url,
            to_path: to_path.map(|p| p.to_string_lossy().to_string()),
            from_path: from_path.map(|p| p.to_string_lossy().to_string()),
        };
        let mut record = self
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *record = Some(entry);
        Ok(())
    }

    fn recorded(&self) -> Option<TransferRecord> {
        self.record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

fn required_path<'a>(path: &'a Option<String>, action_type: ActionType) -> Result<&'a Path> {
    path.as_deref()
        .map(Path::new)
        .ok_or_else(|| StagingError::ActionNotExecutable {
            action_type: action_type.to_string(),
            operation: "run without a source path",
        })
}

/// Stable, collision-resistant directory name for a staged unstructured source.
pub fn unique_path_prefix(path: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(path.as_bytes()));
    digest[..32].to_string()
}

/// Files below `path` keyed by absolute path, valued by their name relative to
/// the parent of `path`.
fn list_unstructured(path: &str) -> BTreeMap<String, String> {
    let root = Path::new(path);
    let base_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut listing = BTreeMap::new();
    if root.is_dir() {
        for entry in WalkDir::new(root).sort_by_file_name().into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(root) {
                let name = Path::new(&base_name).join(relative);
                listing.insert(
                    entry.path().to_string_lossy().to_string(),
                    name.to_string_lossy().to_string(),
                );
            }
        }
    } else {
        listing.insert(path.to_string(), base_name);
    }
    listing
}

impl Action {
    /// Instantiates the action for `action_type`, pulling rule parameters from `kwds`.
    pub fn build(action_type: ActionType, source: &ActionSource, kwds: &ActionKwds) -> Result<Self> {
        let path = source.path.clone();
        let action = match action_type {
            ActionType::None => Action::None(PathAction { path }),
            ActionType::Transfer => Action::Transfer(PathAction { path }),
            ActionType::Copy => Action::Copy(PathAction { path }),
            ActionType::RemoteCopy => Action::RemoteCopy(PathAction { path }),
            ActionType::Rewrite => {
                let (Some(source_directory), Some(destination_directory)) = (
                    kwds.source_directory.clone(),
                    kwds.destination_directory.clone(),
                ) else {
                    return Err(StagingError::Config(
                        pulsar_core::errors::ConfigError::General(
                            "rewrite action requires source_directory and destination_directory"
                                .to_string(),
                        ),
                    ));
                };
                Action::Rewrite(RewriteAction {
                    path,
                    source_directory,
                    destination_directory,
                })
            }
            ActionType::RemoteTransfer => Action::RemoteTransfer(UrlAction { path, url: None }),
            ActionType::JsonTransfer => Action::JsonTransfer(JsonTransferAction {
                path,
                ..Default::default()
            }),
            ActionType::Rsync | ActionType::Scp => {
                let ssh = SshAction {
                    path,
                    ssh_user: kwds.ssh_user.clone(),
                    ssh_host: kwds.ssh_host.clone(),
                    ssh_port: kwds.ssh_port,
                    ssh_key: kwds.ssh_key.clone(),
                };
                if action_type == ActionType::Rsync {
                    Action::Rsync(ssh)
                } else {
                    Action::Scp(ssh)
                }
            }
            ActionType::RemoteObjectStoreCopy => Action::RemoteObjectStoreCopy(ObjectStoreAction {
                path,
                object_store_ref: source.object_store_ref.clone(),
            }),
            ActionType::Message => {
                return Err(StagingError::UnknownActionType(action_type.to_string()))
            }
        };
        Ok(action)
    }

    pub fn message(contents: impl Into<String>) -> Self {
        Action::Message(MessageAction {
            contents: contents.into(),
        })
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            Action::None(_) => ActionType::None,
            Action::Rewrite(_) => ActionType::Rewrite,
            Action::Transfer(_) => ActionType::Transfer,
            Action::Copy(_) => ActionType::Copy,
            Action::RemoteCopy(_) => ActionType::RemoteCopy,
            Action::RemoteTransfer(_) => ActionType::RemoteTransfer,
            Action::Rsync(_) => ActionType::Rsync,
            Action::Scp(_) => ActionType::Scp,
            Action::JsonTransfer(_) => ActionType::JsonTransfer,
            Action::RemoteObjectStoreCopy(_) => ActionType::RemoteObjectStoreCopy,
            Action::Message(_) => ActionType::Message,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Action::None(a) | Action::Transfer(a) | Action::Copy(a) | Action::RemoteCopy(a) => {
                a.path.as_deref()
            }
            Action::Rewrite(a) => a.path.as_deref(),
            Action::RemoteTransfer(a) => a.path.as_deref(),
            Action::Rsync(a) | Action::Scp(a) => a.path.as_deref(),
            Action::JsonTransfer(a) => a.path.as_deref(),
            Action::RemoteObjectStoreCopy(a) => a.path.as_deref(),
            Action::Message(_) => None,
        }
    }

    pub fn staging(&self) -> StagingKind {
        self.action_type().staging()
    }

    pub fn staging_needed(&self) -> bool {
        self.staging() != StagingKind::None
    }

    pub fn staging_action_local(&self) -> bool {
        matches!(self.staging(), StagingKind::Local | StagingKind::Default)
    }

    pub fn as_needs_endpoint_mut(&mut self) -> Option<&mut dyn NeedsEndpoint> {
        match self {
            Action::RemoteTransfer(a) => Some(a),
            Action::JsonTransfer(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_needs_ssh_mut(&mut self) -> Option<&mut dyn NeedsSshCredentials> {
        match self {
            Action::Rsync(a) | Action::Scp(a) => Some(a),
            _ => None,
        }
    }

    /// The path the remote side should see for `path`, or `None` when no
    /// rewrite applies.
    pub fn path_rewrite(&self, path_helper: &PathHelper, path: Option<&str>) -> Option<String> {
        match self {
            Action::None(_) => None,
            Action::Rewrite(rewrite) => {
                let original = path.or(rewrite.path.as_deref())?;
                let new_path = path_helper.from_posix_with_new_base(
                    original,
                    &rewrite.source_directory,
                    &rewrite.destination_directory,
                )?;
                (new_path != original).then_some(new_path)
            }
            _ => path.map(str::to_string),
        }
    }

    /// Files to stage for an unstructured reference, keyed by local path. Staged
    /// names are placed under a prefix unique to the source path; unstaged ones
    /// map to their rewritten location.
    pub fn unstructured_map(&self, path_helper: &PathHelper) -> BTreeMap<String, String> {
        let Some(path) = self.path() else {
            return BTreeMap::new();
        };
        let listing = list_unstructured(path);
        if self.staging_needed() {
            let prefix = unique_path_prefix(path);
            listing
                .into_iter()
                .map(|(local, name)| {
                    let name = path_helper.remote_join(&prefix, &[path_helper.remote_name(&name)]);
                    (local, name)
                })
                .collect()
        } else {
            listing
                .into_keys()
                .filter_map(|local| {
                    let rewrite = self.path_rewrite(path_helper, Some(&local))?;
                    Some((local, rewrite))
                })
                .collect()
        }
    }

    /// Server side: materializes the file at `path` inside the job directory.
    pub fn write_to_path(&self, path: &Path, object_store: Option<&dyn ObjectStore>) -> Result<()> {
        match self {
            Action::RemoteCopy(a) => {
                transfer::copy_file(required_path(&a.path, ActionType::RemoteCopy)?, path)
            }
            Action::RemoteTransfer(a) => {
                let url = a.url.as_deref().ok_or(StagingError::MissingFilesEndpoint)?;
                http::get_file(url, path)
            }
            Action::Rsync(a) => {
                let source = required_path(&a.path, ActionType::Rsync)?;
                ssh::rsync_get_file(&source.to_string_lossy(), path, &a.credentials()?)
            }
            Action::Scp(a) => {
                let source = required_path(&a.path, ActionType::Scp)?;
                ssh::scp_get_file(&source.to_string_lossy(), path, &a.credentials()?)
            }
            Action::JsonTransfer(a) => a.record(Some(path), None),
            Action::RemoteObjectStoreCopy(a) => {
                let store = object_store.ok_or_else(|| {
                    StagingError::MissingObjectStore(ActionType::RemoteObjectStoreCopy.to_string())
                })?;
                let object_ref = a.object_store_ref.as_deref().ok_or_else(|| {
                    StagingError::ActionNotExecutable {
                        action_type: ActionType::RemoteObjectStoreCopy.to_string(),
                        operation: "run without an object_store_ref",
                    }
                })?;
                let filename = store.get_filename(object_ref)?;
                transfer::copy_file(&filename, path)
            }
            Action::Message(m) => {
                transfer::ensure_parent_dir(path)?;
                fs_err::write(path, m.contents.as_bytes())?;
                Ok(())
            }
            other => Err(StagingError::ActionNotExecutable {
                action_type: other.action_type().to_string(),
                operation: "write to a path on the server",
            }),
        }
    }

    /// Server side: ships the job-directory file at `path` back to the action's
    /// destination.
    pub fn write_from_path(
        &self,
        path: &Path,
        object_store: Option<&dyn ObjectStore>,
    ) -> Result<()> {
        match self {
            Action::RemoteCopy(a) => {
                transfer::copy_file(path, required_path(&a.path, ActionType::RemoteCopy)?)
            }
            Action::RemoteTransfer(a) => {
                let url = a.url.as_deref().ok_or(StagingError::MissingFilesEndpoint)?;
                http::post_file(url, path)
            }
            Action::Rsync(a) => {
                let destination = required_path(&a.path, ActionType::Rsync)?;
                ssh::rsync_post_file(path, &destination.to_string_lossy(), &a.credentials()?)
            }
            Action::Scp(a) => {
                let destination = required_path(&a.path, ActionType::Scp)?;
                ssh::scp_post_file(path, &destination.to_string_lossy(), &a.credentials()?)
            }
            Action::JsonTransfer(a) => a.record(None, Some(path)),
            Action::RemoteObjectStoreCopy(a) => {
                let store = object_store.ok_or_else(|| {
                    StagingError::MissingObjectStore(ActionType::RemoteObjectStoreCopy.to_string())
                })?;
                let object_ref = a.object_store_ref.as_deref().ok_or_else(|| {
                    StagingError::ActionNotExecutable {
                        action_type: ActionType::RemoteObjectStoreCopy.to_string(),
                        operation: "run without an object_store_ref",
                    }
                })?;
                store.update_from_file(object_ref, path)
            }
            other => Err(StagingError::ActionNotExecutable {
                action_type: other.action_type().to_string(),
                operation: "write from a path on the server",
            }),
        }
    }

    /// Ledger entry for manifest-building actions, once executed.
    pub fn finalize(&self) -> Option<TransferRecord> {
        match self {
            Action::JsonTransfer(a) => a.recorded(),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path() {
            Some(path) => write!(f, "{}[path={}]", self.action_type(), path),
            None => write!(f, "{}", self.action_type()),
        }
    }
}
