//! Target resolution: where in the back end a document is filed.

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::metadata::Metadata;
use crate::pattern::apply_pattern;
use crate::types::File;
use crate::use_case::{SourceStrategy, UseCase};
use regex::RegexBuilder;
use std::collections::BTreeMap;
use std::fmt;

/// Everything a resolution step needs about the file being processed.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub use_case: &'a UseCase,
    pub config: &'a DispatcherConfig,
    pub file: &'a File,
}

impl<'a> DispatchContext<'a> {
    pub fn new(use_case: &'a UseCase, config: &'a DispatcherConfig, file: &'a File) -> Self {
        Self {
            use_case,
            config,
            file,
        }
    }

    /// File path for log fields; hidden for sensitive use cases.
    pub fn loggable_path(&self) -> &str {
        loggable_path(self.use_case, &self.file.path)
    }
}

const HIDDEN: &str = "<hidden>";

pub(crate) fn loggable_path<'a>(use_case: &UseCase, path: &'a str) -> &'a str {
    if use_case.sensitive_filename {
        HIDDEN
    } else {
        path
    }
}

/// Error text for log fields. Most errors name the file, so sensitive use
/// cases only log the error class.
pub(crate) fn loggable_error(use_case: &UseCase, error: &DispatchError) -> String {
    if use_case.sensitive_filename {
        error.class_name().to_string()
    } else {
        error.to_string()
    }
}

/// Finds back-end objects by name.
pub trait DocumentLookup {
    /// Coordinates of all objects named `name` for a use case.
    fn find_by_name(&self, use_case: &UseCase, name: &str) -> Result<Vec<String>>;
}

/// Lookup backed by a fixed name → coordinates table.
#[derive(Debug, Clone, Default)]
pub struct TableLookup {
    entries: BTreeMap<String, Vec<String>>,
}

impl TableLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table from the `[lookup]` section of the configuration.
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            entries: config.lookup.clone(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, coordinate: impl Into<String>) -> Self {
        self.entries
            .entry(name.into())
            .or_default()
            .push(coordinate.into());
        self
    }
}

impl DocumentLookup for TableLookup {
    fn find_by_name(&self, _use_case: &UseCase, name: &str) -> Result<Vec<String>> {
        Ok(self.entries.get(name).cloned().unwrap_or_default())
    }
}

/// Resolved target of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Coordinate(String),
    /// The consumer files the document into its default queue.
    DefaultQueue,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinate(coordinate) => f.write_str(coordinate),
            Self::DefaultQueue => f.write_str("<default queue>"),
        }
    }
}

/// Resolve the target of the context's file with its use case's strategy.
pub fn resolve_target(
    ctx: &DispatchContext<'_>,
    metadata: Option<&Metadata>,
    lookup: &dyn DocumentLookup,
) -> Result<Target> {
    let target = match &ctx.use_case.source {
        SourceStrategy::Static { target } => Target::Coordinate(target.clone()),
        SourceStrategy::Filename { pattern } => {
            let subject = ctx.file.name_without_extension()?;
            Target::Coordinate(apply_pattern(Some(pattern), subject, metadata)?)
        }
        SourceStrategy::FilenameMap { entries } => {
            let name = ctx.file.file_name();
            let mut found = None;
            for entry in entries {
                let regex = RegexBuilder::new(&entry.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        DispatchError::Pattern(format!("Invalid regex '{}': {}", entry.pattern, e))
                    })?;
                if regex.is_match(name) {
                    found = Some(entry.target.clone());
                    break;
                }
            }
            let target = found.ok_or_else(|| {
                DispatchError::Validation(format!(
                    "No filename map entry matches {}",
                    ctx.loggable_path()
                ))
            })?;
            Target::Coordinate(target)
        }
        SourceStrategy::LookupByName { pattern } => {
            let subject = ctx.file.name_without_extension()?;
            let name = apply_pattern(Some(pattern), subject, metadata)?;
            let mut hits = lookup.find_by_name(ctx.use_case, &name)?;
            match hits.len() {
                1 => Target::Coordinate(hits.remove(0)),
                0 => {
                    return Err(DispatchError::Validation(format!(
                        "No object found with name {}",
                        name
                    )))
                }
                n => {
                    return Err(DispatchError::Validation(format!(
                        "Name {} is ambiguous: {} objects found",
                        name, n
                    )))
                }
            }
        }
        SourceStrategy::Metadata { field } => {
            let metadata = metadata.ok_or_else(|| {
                DispatchError::Metadata(format!(
                    "Use case {} resolves targets from metadata but none was supplied",
                    ctx.use_case.name
                ))
            })?;
            let value = metadata
                .index_field(field)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    DispatchError::Metadata(format!("Metadata index field {} is missing or blank", field))
                })?;
            Target::Coordinate(value.to_string())
        }
        SourceStrategy::DefaultQueue => Target::DefaultQueue,
    };
    let loggable_target = if ctx.use_case.sensitive_filename {
        HIDDEN.to_string()
    } else {
        target.to_string()
    };
    tracing::debug!(
        use_case = %ctx.use_case.name,
        strategy = ctx.use_case.source.name(),
        path = %ctx.loggable_path(),
        target = %loggable_target,
        "Resolved target"
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagSet;
    use crate::types::Container;
    use crate::use_case::FilenameMapEntry;

    fn use_case(source: SourceStrategy) -> UseCase {
        UseCase {
            name: "uc".to_string(),
            tenant: "t".to_string(),
            bucket: "b".to_string(),
            path: "uc".to_string(),
            recursive: false,
            required_tags: TagSet::new(),
            destination: "dms".to_string(),
            source,
            requires_metadata: false,
            overwrite_destination_via_metadata: false,
            sensitive_filename: false,
            tag_protocol_processed: false,
            ignore_pattern: None,
            mail_addresses: Vec::new(),
        }
    }

    fn resolve(source: SourceStrategy, path: &str, metadata: Option<&Metadata>) -> Result<Target> {
        let config = DispatcherConfig::default();
        let uc = use_case(source);
        let file = File::new(Container::new("t", "b"), path, None);
        let lookup = TableLookup::new()
            .with("Test123", "COO.1.1")
            .with("Dup", "COO.2.1")
            .with("Dup", "COO.2.2");
        resolve_target(&DispatchContext::new(&uc, &config, &file), metadata, &lookup)
    }

    #[test]
    fn test_static_and_default_queue() {
        let target = resolve(
            SourceStrategy::Static {
                target: "COO.9".to_string(),
            },
            "uc/inProcess/a.pdf",
            None,
        )
        .unwrap();
        assert_eq!(target, Target::Coordinate("COO.9".to_string()));
        assert_eq!(
            resolve(SourceStrategy::DefaultQueue, "uc/inProcess/a.pdf", None).unwrap(),
            Target::DefaultQueue
        );
    }

    #[test]
    fn test_filename_pattern() {
        let target = resolve(
            SourceStrategy::Filename {
                pattern: r"s/.+-(COO[\d.]+)-.*/${1}/".to_string(),
            },
            "uc/inProcess/Test123-COO1.2.3-Example.pdf",
            None,
        )
        .unwrap();
        assert_eq!(target, Target::Coordinate("COO1.2.3".to_string()));
    }

    #[test]
    fn test_filename_map_first_match_wins() {
        let source = SourceStrategy::FilenameMap {
            entries: vec![
                FilenameMapEntry {
                    pattern: "invoice".to_string(),
                    target: "COO.inv".to_string(),
                },
                FilenameMapEntry {
                    pattern: ".*".to_string(),
                    target: "COO.any".to_string(),
                },
            ],
        };
        assert_eq!(
            resolve(source.clone(), "uc/inProcess/2024_INVOICE_7.pdf", None).unwrap(),
            Target::Coordinate("COO.inv".to_string())
        );
        assert_eq!(
            resolve(source, "uc/inProcess/letter.pdf", None).unwrap(),
            Target::Coordinate("COO.any".to_string())
        );
    }

    #[test]
    fn test_lookup_by_name_requires_single_hit() {
        let source = |pattern: &str| SourceStrategy::LookupByName {
            pattern: pattern.to_string(),
        };
        assert_eq!(
            resolve(source(r"s/(.+)-COO.*/${1}/"), "uc/inProcess/Test123-COO1.pdf", None).unwrap(),
            Target::Coordinate("COO.1.1".to_string())
        );
        assert!(resolve(source(r"s/(.+)-x/${1}/"), "uc/inProcess/Dup-x.pdf", None).is_err());
        assert!(resolve(source(r"s/(.+)-x/${1}/"), "uc/inProcess/None-x.pdf", None).is_err());
    }

    #[test]
    fn test_metadata_field() {
        let metadata = Metadata::parse(
            br#"{"Document":{"IndexFields":[{"Name":"Target","Value":"COO.m"},{"Name":"Blank","Value":" "}]}}"#,
        )
        .unwrap();
        let source = |field: &str| SourceStrategy::Metadata {
            field: field.to_string(),
        };
        assert_eq!(
            resolve(source("Target"), "uc/inProcess/a.pdf", Some(&metadata)).unwrap(),
            Target::Coordinate("COO.m".to_string())
        );
        assert!(resolve(source("Blank"), "uc/inProcess/a.pdf", Some(&metadata)).is_err());
        assert!(resolve(source("Target"), "uc/inProcess/a.pdf", None).is_err());
    }

    #[test]
    fn test_lookup_table_from_config() {
        let mut config = DispatcherConfig::default();
        config
            .lookup
            .insert("Contract-7".to_string(), vec!["COO.7".to_string()]);
        let uc = use_case(SourceStrategy::LookupByName {
            pattern: r"s/(.+)_scan/${1}/".to_string(),
        });
        let file = File::new(Container::new("t", "b"), "uc/inProcess/Contract-7_scan.pdf", None);
        let target = resolve_target(
            &DispatchContext::new(&uc, &config, &file),
            None,
            &TableLookup::from_config(&config),
        )
        .unwrap();
        assert_eq!(target, Target::Coordinate("COO.7".to_string()));
    }

    #[test]
    fn test_sensitive_use_case_logs_error_class_only() {
        let mut uc = use_case(SourceStrategy::DefaultQueue);
        let err = DispatchError::FileSize {
            path: "uc/inProcess/Jane Doe.pdf".to_string(),
            size: 2,
            max: 1,
        };
        assert_eq!(loggable_error(&uc, &err), "File uc/inProcess/Jane Doe.pdf too large. 2 > 1");
        assert_eq!(loggable_path(&uc, "uc/inProcess/Jane Doe.pdf"), "uc/inProcess/Jane Doe.pdf");

        uc.sensitive_filename = true;
        assert_eq!(loggable_error(&uc, &err), "FileSizeError");
        assert_eq!(loggable_path(&uc, "uc/inProcess/Jane Doe.pdf"), "<hidden>");
    }
}
