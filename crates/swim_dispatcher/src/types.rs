//! Core types shared by the dispatch and protocol engines.

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Storage addressing
// ============================================================================

/// Logical container of objects: a bucket of a storage tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Container {
    pub tenant: String,
    pub bucket: String,
}

impl Container {
    pub fn new(tenant: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            bucket: bucket.into(),
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.bucket)
    }
}

/// A stored object addressed by container and full key.
///
/// Recomputed on every listing; never cached across cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct File {
    pub container: Container,
    pub path: String,
    pub size: Option<u64>,
}

impl File {
    pub fn new(container: Container, path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            container,
            path: path.into(),
            size,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.container.bucket
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }

    /// File name without its extension. Errors when the name has none.
    pub fn name_without_extension(&self) -> Result<&str> {
        let name = self.file_name();
        name.rfind('.')
            .map(|idx| &name[..idx])
            .ok_or_else(|| DispatchError::Validation(format!("Filename {} has no extension", name)))
    }

    /// Path of the containing folder, without trailing slash.
    pub fn parent_path(&self) -> &str {
        parent_path(&self.path)
    }

    /// Name of the containing folder.
    pub fn parent_name(&self) -> &str {
        file_name(self.parent_path())
    }

    /// Path of the sibling metadata file: `<parent>/<name>.json`.
    pub fn metadata_path(&self) -> Result<String> {
        let stem = self.name_without_extension()?;
        Ok(join_path(self.parent_path(), &format!("{}.json", stem)))
    }

    /// A file in the same container at another path.
    pub fn sibling(&self, path: impl Into<String>) -> File {
        File::new(self.container.clone(), path, None)
    }
}

pub(crate) fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub(crate) fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

pub(crate) fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Extension-stripped form of a file name; names without extension stay as-is.
pub(crate) fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

// ============================================================================
// Dispatch actions
// ============================================================================

/// How a candidate file is processed, read from the action tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchAction {
    /// Send a dispatch event to the destination.
    Dispatch,
    /// Hand the file to another use case.
    Reroute,
    /// Finish the file without dispatching. Same as `Ignore`.
    Delete,
    /// Finish the file without dispatching. Same as `Delete`.
    Ignore,
}

impl DispatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Reroute => "reroute",
            Self::Delete => "delete",
            Self::Ignore => "ignore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "dispatch" => Some(Self::Dispatch),
            "reroute" => Some(Self::Reroute),
            "delete" => Some(Self::Delete),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }

    /// Whether the action ends processing without forwarding the file.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delete | Self::Ignore)
    }
}

// ============================================================================
// Protocol match state
// ============================================================================

/// Outcome of reconciling a protocol against the observed files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchState {
    Correct,
    MissingFiles,
    MissingInProtocol,
    MissingInProtocolAndFiles,
}

impl MatchState {
    pub fn from_differences(missing_in_protocol: bool, missing_files: bool) -> Self {
        match (missing_in_protocol, missing_files) {
            (false, false) => Self::Correct,
            (true, false) => Self::MissingInProtocol,
            (false, true) => Self::MissingFiles,
            (true, true) => Self::MissingInProtocolAndFiles,
        }
    }

    /// Tag value written to the protocol-match key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::MissingFiles => "missingFiles",
            Self::MissingInProtocol => "missingInProtocol",
            Self::MissingInProtocolAndFiles => "missingInProtocolAndFiles",
        }
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Events
// ============================================================================

/// Event exchanged with handler services: dispatch, finish and error events
/// all share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    pub use_case: String,
    pub presigned_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_presigned_url: Option<String>,
}

/// Failure details attached to an error event by the messaging layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stacktrace: Option<String>,
}

impl ErrorDetails {
    /// Last `;`-separated segment of the message, trimmed.
    pub fn trimmed_message(&self) -> &str {
        self.message.rsplit(';').next().unwrap_or_default().trim()
    }
}
