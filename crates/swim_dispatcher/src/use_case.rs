//! Use case registry: statically configured file routing pipelines.

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::pattern::{compile_full_match, SubstitutionPattern};
use crate::tags::TagSet;
use crate::types::{join_path, Container};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn default_tenant() -> String {
    "default".to_string()
}

/// A named pipeline: where files come from and where they are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseCase {
    /// Unique, case-sensitive name.
    pub name: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    pub bucket: String,
    /// Root of the use case inside the bucket.
    pub path: String,
    /// Also dispatch files in immediate subfolders of the dispatch folder.
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub required_tags: TagSet,
    /// Identifier of the downstream consumer receiving dispatch events.
    pub destination: String,
    #[serde(default)]
    pub source: SourceStrategy,
    #[serde(default)]
    pub requires_metadata: bool,
    /// Read the destination from the metadata file instead of `destination`.
    #[serde(default)]
    pub overwrite_destination_via_metadata: bool,
    /// Keep file paths out of logs.
    #[serde(default)]
    pub sensitive_filename: bool,
    /// Tag documents confirmed by a correct protocol.
    #[serde(default)]
    pub tag_protocol_processed: bool,
    /// Regex for document names that are expected to be absent from protocols.
    #[serde(default)]
    pub ignore_pattern: Option<String>,
    #[serde(default)]
    pub mail_addresses: Vec<String>,
}

impl UseCase {
    pub fn container(&self) -> Container {
        Container::new(&self.tenant, &self.bucket)
    }

    pub fn path_without_slash(&self) -> &str {
        self.path.trim_end_matches('/')
    }

    /// Folder holding pending files: `<path>/<dispatch folder>`.
    pub fn dispatch_path(&self, config: &DispatcherConfig) -> String {
        join_path(self.path_without_slash(), &config.dispatch_folder)
    }

    /// Folder receiving terminated files: `<path>/<finished folder>`.
    pub fn finished_path(&self, config: &DispatcherConfig) -> String {
        join_path(self.path_without_slash(), &config.finished_folder)
    }

    /// Folder receiving processed protocols.
    pub fn protocol_finished_path(&self, config: &DispatcherConfig) -> String {
        join_path(self.path_without_slash(), &config.protocol_finished_folder)
    }

    /// Path of a dispatch-folder file relative to the dispatch folder.
    pub fn relative_to_dispatch<'a>(
        &self,
        config: &DispatcherConfig,
        path: &'a str,
    ) -> Result<&'a str> {
        let dispatch_path = self.dispatch_path(config);
        path.strip_prefix(&dispatch_path)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                DispatchError::Validation(format!(
                    "Path {} is not inside dispatch folder {} of use case {}",
                    path, dispatch_path, self.name
                ))
            })
    }

    /// Same file moved from the dispatch folder into the finished folder.
    pub fn finished_path_for(&self, config: &DispatcherConfig, path: &str) -> Result<String> {
        let relative = self.relative_to_dispatch(config, path)?;
        Ok(join_path(&self.finished_path(config), relative))
    }

    /// Same protocol moved into the finished-protocol folder.
    pub fn protocol_finished_path_for(
        &self,
        config: &DispatcherConfig,
        path: &str,
    ) -> Result<String> {
        let relative = self.relative_to_dispatch(config, path)?;
        Ok(join_path(&self.protocol_finished_path(config), relative))
    }

    /// Notification recipients, falling back to the global address.
    pub fn recipients(&self, config: &DispatcherConfig) -> Vec<String> {
        if self.mail_addresses.is_empty() {
            vec![config.fallback_mail.clone()]
        } else {
            self.mail_addresses.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| DispatchError::Config(format!("use case '{}': {}", self.name, msg));

        if self.name.trim().is_empty() {
            return Err(DispatchError::Config("use case name must not be blank".to_string()));
        }
        for (field, value) in [
            ("tenant", &self.tenant),
            ("bucket", &self.bucket),
            ("path", &self.path),
            ("destination", &self.destination),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("{} must not be blank", field)));
            }
        }
        if self.overwrite_destination_via_metadata && !self.requires_metadata {
            return Err(invalid(
                "overwrite_destination_via_metadata requires requires_metadata".to_string(),
            ));
        }
        if let Some(pattern) = self.ignore_pattern.as_deref().filter(|p| !p.trim().is_empty()) {
            compile_full_match(pattern).map_err(|e| invalid(e.to_string()))?;
        }
        self.source.validate().map_err(|e| invalid(e.to_string()))
    }
}

/// One ordered filename → target mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilenameMapEntry {
    /// Case-insensitive regex searched in the file name.
    pub pattern: String,
    pub target: String,
}

/// How a use case finds the target coordinate of a document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceStrategy {
    /// Fixed target from configuration.
    Static { target: String },
    /// Target derived from the file name with a substitution pattern.
    Filename { pattern: String },
    /// First matching entry of an ordered map.
    FilenameMap { entries: Vec<FilenameMapEntry> },
    /// Name derived with a substitution pattern, then looked up.
    LookupByName { pattern: String },
    /// Index field of the metadata file.
    Metadata { field: String },
    /// No target; the consumer files documents into its default queue.
    #[default]
    DefaultQueue,
}

impl SourceStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static",
            Self::Filename { .. } => "filename",
            Self::FilenameMap { .. } => "filename_map",
            Self::LookupByName { .. } => "lookup_by_name",
            Self::Metadata { .. } => "metadata",
            Self::DefaultQueue => "default_queue",
        }
    }

    pub fn validate(&self) -> Result<()> {
        let blank = |field: &str| {
            DispatchError::Config(format!("{} strategy requires non-blank {}", self.name(), field))
        };
        match self {
            Self::Static { target } if target.trim().is_empty() => Err(blank("target")),
            Self::Filename { pattern } | Self::LookupByName { pattern } => {
                if pattern.trim().is_empty() {
                    return Err(blank("pattern"));
                }
                SubstitutionPattern::parse(pattern).map(|_| ())
            }
            Self::FilenameMap { entries } => {
                if entries.is_empty() {
                    return Err(blank("entries"));
                }
                for entry in entries {
                    RegexBuilder::new(&entry.pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            DispatchError::Pattern(format!("Invalid regex '{}': {}", entry.pattern, e))
                        })?;
                    if entry.target.trim().is_empty() {
                        return Err(blank("entry target"));
                    }
                }
                Ok(())
            }
            Self::Metadata { field } if field.trim().is_empty() => Err(blank("field")),
            _ => Ok(()),
        }
    }
}

/// All configured use cases, looked up by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UseCaseRegistry {
    use_cases: Vec<UseCase>,
}

impl UseCaseRegistry {
    pub fn new(use_cases: Vec<UseCase>) -> Self {
        Self { use_cases }
    }

    pub fn find(&self, name: &str) -> Result<&UseCase> {
        self.use_cases
            .iter()
            .find(|uc| uc.name == name)
            .ok_or_else(|| DispatchError::UnknownUseCase(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &UseCase> {
        self.use_cases.iter()
    }

    pub fn len(&self) -> usize {
        self.use_cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.use_cases.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for use_case in &self.use_cases {
            use_case.validate()?;
            if !seen.insert(use_case.name.as_str()) {
                return Err(DispatchError::Config(format!(
                    "duplicate use case name '{}'",
                    use_case.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn use_case(name: &str) -> UseCase {
        UseCase {
            name: name.to_string(),
            tenant: "t".to_string(),
            bucket: "bucket".to_string(),
            path: "test/".to_string(),
            recursive: false,
            required_tags: TagSet::new(),
            destination: "dms".to_string(),
            source: SourceStrategy::DefaultQueue,
            requires_metadata: false,
            overwrite_destination_via_metadata: false,
            sensitive_filename: false,
            tag_protocol_processed: false,
            ignore_pattern: None,
            mail_addresses: Vec::new(),
        }
    }

    #[test]
    fn test_paths_are_derived_from_root() {
        let config = DispatcherConfig::default();
        let uc = use_case("a");
        assert_eq!(uc.dispatch_path(&config), "test/inProcess");
        assert_eq!(uc.finished_path(&config), "test/finished");
        assert_eq!(uc.protocol_finished_path(&config), "test/finishedProtocols");
        assert_eq!(
            uc.finished_path_for(&config, "test/inProcess/sub/a.pdf").unwrap(),
            "test/finished/sub/a.pdf"
        );
        assert_eq!(
            uc.protocol_finished_path_for(&config, "test/inProcess/sub/sub.csv").unwrap(),
            "test/finishedProtocols/sub/sub.csv"
        );
        assert!(uc.finished_path_for(&config, "other/inProcess/a.pdf").is_err());
        assert!(uc.finished_path_for(&config, "test/inProcessX/a.pdf").is_err());
    }

    #[test]
    fn test_recipients_fall_back_to_global_mail() {
        let mut config = DispatcherConfig::default();
        config.fallback_mail = "ops@example.com".to_string();
        let mut uc = use_case("a");
        assert_eq!(uc.recipients(&config), vec!["ops@example.com".to_string()]);
        uc.mail_addresses = vec!["team@example.com".to_string()];
        assert_eq!(uc.recipients(&config), vec!["team@example.com".to_string()]);
    }

    #[test]
    fn test_registry_find() {
        let registry = UseCaseRegistry::new(vec![use_case("a"), use_case("b")]);
        assert_eq!(registry.find("b").unwrap().name, "b");
        assert!(matches!(registry.find("B"), Err(DispatchError::UnknownUseCase(_))));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = UseCaseRegistry::new(vec![use_case("a"), use_case("a")]);
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_overwrite_requires_metadata() {
        let mut uc = use_case("a");
        uc.overwrite_destination_via_metadata = true;
        assert!(uc.validate().is_err());
        uc.requires_metadata = true;
        assert!(uc.validate().is_ok());
    }

    #[test]
    fn test_strategy_validation() {
        let mut uc = use_case("a");
        uc.source = SourceStrategy::Filename {
            pattern: "not a pattern".to_string(),
        };
        assert!(uc.validate().is_err());
        uc.source = SourceStrategy::Filename {
            pattern: r"s/(.+)-(.+)/${1}/".to_string(),
        };
        assert!(uc.validate().is_ok());
        uc.source = SourceStrategy::Static {
            target: " ".to_string(),
        };
        assert!(uc.validate().is_err());
        uc.source = SourceStrategy::FilenameMap { entries: vec![] };
        assert!(uc.validate().is_err());
        uc.ignore_pattern = Some("(unclosed".to_string());
        uc.source = SourceStrategy::DefaultQueue;
        assert!(uc.validate().is_err());
    }

    #[test]
    fn test_strategy_deserializes_from_toml() {
        let uc: UseCase = toml::from_str(
            r#"
            name = "invoices"
            bucket = "b"
            path = "invoices"
            destination = "dms"
            source = { type = "filename_map", entries = [{ pattern = "^inv", target = "COO.1" }] }
            "#,
        )
        .unwrap();
        assert_eq!(uc.tenant, "default");
        assert_eq!(uc.source.name(), "filename_map");
        assert!(!uc.recursive);
    }
}
