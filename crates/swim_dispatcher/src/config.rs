//! Dispatcher configuration, loaded once at startup from TOML.

use crate::error::{DispatchError, Result};
use crate::tags::TagSet;
use crate::use_case::{UseCase, UseCaseRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration for the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Tag key and value vocabulary
    #[serde(default)]
    pub tags: TagVocabulary,

    /// Subfolder of each use case holding pending files
    #[serde(default = "default_dispatch_folder")]
    pub dispatch_folder: String,

    /// Subfolder receiving terminated files
    #[serde(default = "default_finished_folder")]
    pub finished_folder: String,

    /// Subfolder receiving processed protocols
    #[serde(default = "default_protocol_finished_folder")]
    pub protocol_finished_folder: String,

    /// Files larger than this (bytes) are rejected
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Recipient when a use case has none or can't be resolved
    #[serde(default)]
    pub fallback_mail: String,

    /// Metadata index field holding a destination override
    #[serde(default = "default_metadata_dispatch_binding_key")]
    pub metadata_dispatch_binding_key: String,

    #[serde(default = "default_protocol_delimiter")]
    pub protocol_delimiter: char,

    /// Lines skipped before the protocol header row
    #[serde(default = "default_protocol_skip_rows")]
    pub protocol_skip_rows: usize,

    #[serde(default = "default_document_extension")]
    pub document_extension: String,

    #[serde(default = "default_protocol_extension")]
    pub protocol_extension: String,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Document name to back-end coordinates, used by name lookups when no
    /// document service is attached
    #[serde(default)]
    pub lookup: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub use_cases: UseCaseRegistry,
}

fn default_dispatch_folder() -> String {
    "inProcess".to_string()
}

fn default_finished_folder() -> String {
    "finished".to_string()
}

fn default_protocol_finished_folder() -> String {
    "finishedProtocols".to_string()
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_metadata_dispatch_binding_key() -> String {
    "SWIM_Dispatch_Binding".to_string()
}

fn default_protocol_delimiter() -> char {
    '|'
}

fn default_protocol_skip_rows() -> usize {
    1
}

fn default_document_extension() -> String {
    "pdf".to_string()
}

fn default_protocol_extension() -> String {
    "csv".to_string()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tags: TagVocabulary::default(),
            dispatch_folder: default_dispatch_folder(),
            finished_folder: default_finished_folder(),
            protocol_finished_folder: default_protocol_finished_folder(),
            max_file_size: default_max_file_size(),
            fallback_mail: String::new(),
            metadata_dispatch_binding_key: default_metadata_dispatch_binding_key(),
            protocol_delimiter: default_protocol_delimiter(),
            protocol_skip_rows: default_protocol_skip_rows(),
            document_extension: default_document_extension(),
            protocol_extension: default_protocol_extension(),
            storage: StorageConfig::default(),
            lookup: BTreeMap::new(),
            use_cases: UseCaseRegistry::default(),
        }
    }
}

impl DispatcherConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DispatchError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("dispatch_folder", &self.dispatch_folder),
            ("finished_folder", &self.finished_folder),
            ("protocol_finished_folder", &self.protocol_finished_folder),
            ("fallback_mail", &self.fallback_mail),
            ("metadata_dispatch_binding_key", &self.metadata_dispatch_binding_key),
            ("document_extension", &self.document_extension),
            ("protocol_extension", &self.protocol_extension),
        ] {
            if value.trim().is_empty() {
                return Err(DispatchError::Config(format!("{} must not be blank", name)));
            }
        }
        if self.dispatch_folder == self.finished_folder {
            return Err(DispatchError::Config(
                "dispatch_folder and finished_folder must differ".to_string(),
            ));
        }
        self.tags.validate()?;
        self.use_cases.validate()
    }

    pub fn find_use_case(&self, name: &str) -> Result<&UseCase> {
        self.use_cases.find(name)
    }

    /// Excludes files already dispatched, finished or errored.
    pub fn dispatch_exclude_tags(&self) -> BTreeMap<String, Vec<String>> {
        let tags = &self.tags;
        BTreeMap::from([(
            tags.dispatch_state_key.clone(),
            vec![
                tags.dispatched_value.clone(),
                tags.finished_value.clone(),
                tags.error_value.clone(),
            ],
        )])
    }

    /// Excludes protocols already processed or errored.
    pub fn protocol_exclude_tags(&self) -> BTreeMap<String, Vec<String>> {
        let tags = &self.tags;
        BTreeMap::from([(
            tags.protocol_state_key.clone(),
            vec![tags.protocol_processed_value.clone(), tags.error_value.clone()],
        )])
    }

    /// Tags written when a file ends in an error.
    pub fn error_tags(&self, state_key: &str, class_name: &str, message: &str) -> TagSet {
        let tags = &self.tags;
        TagSet::from([
            (state_key.to_string(), tags.error_value.clone()),
            (tags.error_class_key.clone(), class_name.to_string()),
            (
                tags.error_message_key.clone(),
                crate::tags::sanitize_tag_value(message),
            ),
        ])
    }
}

/// Tag keys and values written by the engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagVocabulary {
    pub dispatch_state_key: String,
    pub dispatch_action_key: String,
    pub reroute_destination_key: String,
    pub protocol_state_key: String,
    pub protocol_match_key: String,
    pub error_class_key: String,
    pub error_message_key: String,
    pub dispatched_value: String,
    pub finished_value: String,
    pub error_value: String,
    pub protocol_processed_value: String,
    /// Written to documents confirmed by a correct protocol.
    pub protocol_processed_files_value: String,
}

impl Default for TagVocabulary {
    fn default() -> Self {
        Self {
            dispatch_state_key: "SWIM_State".to_string(),
            dispatch_action_key: "SWIM_Action".to_string(),
            reroute_destination_key: "SWIM_Reroute_Destination".to_string(),
            protocol_state_key: "SWIM_Protocol_State".to_string(),
            protocol_match_key: "SWIM_Protocol_Match".to_string(),
            error_class_key: "SWIM_Error_Class".to_string(),
            error_message_key: "SWIM_Error_Message".to_string(),
            dispatched_value: "dispatched".to_string(),
            finished_value: "finished".to_string(),
            error_value: "error".to_string(),
            protocol_processed_value: "processed".to_string(),
            protocol_processed_files_value: "protocolProcessed".to_string(),
        }
    }
}

impl TagVocabulary {
    fn validate(&self) -> Result<()> {
        let entries = [
            ("dispatch_state_key", &self.dispatch_state_key),
            ("dispatch_action_key", &self.dispatch_action_key),
            ("reroute_destination_key", &self.reroute_destination_key),
            ("protocol_state_key", &self.protocol_state_key),
            ("protocol_match_key", &self.protocol_match_key),
            ("error_class_key", &self.error_class_key),
            ("error_message_key", &self.error_message_key),
            ("dispatched_value", &self.dispatched_value),
            ("finished_value", &self.finished_value),
            ("error_value", &self.error_value),
            ("protocol_processed_value", &self.protocol_processed_value),
            ("protocol_processed_files_value", &self.protocol_processed_files_value),
        ];
        match entries.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(DispatchError::Config(format!("tags.{} must not be blank", name))),
            None => Ok(()),
        }
    }
}

/// Storage and outbound adapter locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the local object store
    pub root: PathBuf,
    /// Directory receiving dispatch events as JSON lines
    pub outbox_dir: PathBuf,
    /// Directory holding stored protocol rows
    pub protocol_dir: PathBuf,
    /// Base URL of presigned links
    pub presign_base_url: String,
    /// Key material for presigned link signatures
    pub signing_secret: String,
    pub presign_expiry_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = swim_logging::swim_home();
        Self {
            root: home.join("storage"),
            outbox_dir: home.join("outbox"),
            protocol_dir: home.join("protocols"),
            presign_base_url: "http://localhost:9000".to_string(),
            signing_secret: String::new(),
            presign_expiry_secs: 7 * 24 * 60 * 60,
        }
    }
}
