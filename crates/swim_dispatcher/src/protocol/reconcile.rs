//! Protocol reconciliation engine.
//!
//! Compares the documents a protocol lists with the documents found in its
//! folder and the matching finished folder, stores the protocol rows, reports
//! the differences and moves the protocol into the finished-protocol folder.

use super::{parse_protocol, ProtocolEntry};
use crate::config::DispatcherConfig;
use crate::dispatch::mark_error;
use crate::error::{DispatchError, Result};
use crate::pattern::compile_full_match;
use crate::ports::{Attachment, Notification, Notifier, ProtocolStore};
use crate::storage::{ListQuery, ObjectStore};
use crate::tags::{TagFilter, TagSet};
use crate::target::{loggable_error, loggable_path};
use crate::types::{strip_extension, File, MatchState};
use crate::use_case::UseCase;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::{error, info, warn};

/// Set differences between a protocol and the observed documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Observed but not listed.
    pub missing_in_protocol: BTreeSet<String>,
    /// Listed but not observed.
    pub missing_files: BTreeSet<String>,
    pub state: MatchState,
}

/// Compare listed and observed file names. Observed names whose
/// extension-stripped form fully matches `ignore` are left out.
pub fn reconcile<'a>(
    listed: impl IntoIterator<Item = &'a str>,
    observed: impl IntoIterator<Item = &'a str>,
    ignore: Option<&Regex>,
) -> Reconciliation {
    let listed: BTreeSet<&str> = listed.into_iter().collect();
    let observed: BTreeSet<&str> = observed
        .into_iter()
        .filter(|name| !ignore.is_some_and(|re| re.is_match(strip_extension(name))))
        .collect();

    let missing_in_protocol: BTreeSet<String> =
        observed.difference(&listed).map(|s| s.to_string()).collect();
    let missing_files: BTreeSet<String> =
        listed.difference(&observed).map(|s| s.to_string()).collect();
    let state = MatchState::from_differences(!missing_in_protocol.is_empty(), !missing_files.is_empty());
    Reconciliation {
        missing_in_protocol,
        missing_files,
        state,
    }
}

/// Result for one protocol file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOutcome {
    Reconciled {
        use_case: String,
        protocol_path: String,
        reconciliation: Reconciliation,
    },
    Failed {
        use_case: String,
        protocol_path: String,
        error: String,
    },
}

impl ProtocolOutcome {
    pub fn protocol_path(&self) -> &str {
        match self {
            Self::Reconciled { protocol_path, .. } | Self::Failed { protocol_path, .. } => protocol_path,
        }
    }
}

pub struct ProtocolEngine<'a> {
    config: &'a DispatcherConfig,
    store: &'a dyn ObjectStore,
    protocols: &'a dyn ProtocolStore,
    notifier: &'a dyn Notifier,
}

impl<'a> ProtocolEngine<'a> {
    pub fn new(
        config: &'a DispatcherConfig,
        store: &'a dyn ObjectStore,
        protocols: &'a dyn ProtocolStore,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            config,
            store,
            protocols,
            notifier,
        }
    }

    /// Run one reconciliation pass over all use cases.
    pub fn run(&self) -> Vec<ProtocolOutcome> {
        info!("Starting protocol processing");
        let mut outcomes = Vec::new();
        for use_case in self.config.use_cases.iter() {
            outcomes.extend(self.process_use_case(use_case));
        }
        info!("Finished protocol processing");
        outcomes
    }

    pub fn process_use_case(&self, use_case: &UseCase) -> Vec<ProtocolOutcome> {
        let query = ListQuery::folder(use_case.dispatch_path(self.config))
            .recursive(use_case.recursive)
            .extension(&self.config.protocol_extension)
            .filter(TagFilter::new(TagSet::new(), self.config.protocol_exclude_tags()));
        let protocol_files = match self.store.list(&use_case.container(), &query) {
            Ok(files) => files,
            Err(e) => {
                error!(use_case = %use_case.name, error = %loggable_error(use_case, &e), "Failed to list protocols");
                let folder = use_case.dispatch_path(self.config);
                self.send_error(use_case, &folder, &e);
                return vec![ProtocolOutcome::Failed {
                    use_case: use_case.name.clone(),
                    protocol_path: folder,
                    error: e.to_string(),
                }];
            }
        };
        info!(use_case = %use_case.name, "Found {} protocol files", protocol_files.len());

        protocol_files
            .iter()
            .map(|file| self.process_protocol(use_case, file))
            .collect()
    }

    /// Reconcile a single protocol. Failures are tagged and reported.
    pub fn process_protocol(&self, use_case: &UseCase, file: &File) -> ProtocolOutcome {
        let path = loggable_path(use_case, &file.path);
        info!(use_case = %use_case.name, path = %path, "Processing protocol");

        let result = self
            .check_protocol_name(file)
            .and_then(|()| self.reconcile_protocol(use_case, file));
        match result {
            Ok(reconciliation) => ProtocolOutcome::Reconciled {
                use_case: use_case.name.clone(),
                protocol_path: file.path.clone(),
                reconciliation,
            },
            Err(e) => {
                warn!(use_case = %use_case.name, path = %path, error = %loggable_error(use_case, &e), "Error while processing protocol");
                let state_key = &self.config.tags.protocol_state_key;
                if let Err(tag_err) = mark_error(self.config, self.store, file, state_key, &e) {
                    error!(use_case = %use_case.name, path = %path, error = %loggable_error(use_case, &tag_err), "Failed to tag protocol as errored");
                }
                self.send_error(use_case, &file.path, &e);
                ProtocolOutcome::Failed {
                    use_case: use_case.name.clone(),
                    protocol_path: file.path.clone(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn send_error(&self, use_case: &UseCase, protocol_path: &str, error: &DispatchError) {
        let notification = Notification::ProtocolError {
            use_case: use_case.name.clone(),
            protocol_path: protocol_path.to_string(),
            error: error.to_string(),
        };
        if let Err(notify_err) = self
            .notifier
            .notify(&use_case.recipients(self.config), &notification)
        {
            error!(use_case = %use_case.name, error = %loggable_error(use_case, &notify_err), "Failed to send protocol error");
        }
    }

    /// A protocol must be named like the folder it describes.
    fn check_protocol_name(&self, file: &File) -> Result<()> {
        if file.name_without_extension()? != file.parent_name() {
            return Err(DispatchError::ProtocolName {
                path: file.path.clone(),
                bucket: file.container.to_string(),
            });
        }
        Ok(())
    }

    fn reconcile_protocol(&self, use_case: &UseCase, file: &File) -> Result<Reconciliation> {
        let content = self.store.read(file)?;
        let entries = parse_protocol(
            &content,
            self.config.protocol_delimiter,
            self.config.protocol_skip_rows,
        )?;

        let folder = file.parent_path();
        let in_process = self.documents_in(use_case, folder)?;
        let finished = self.documents_in(use_case, &self.finished_folder_for(use_case, folder)?)?;

        let ignore = use_case
            .ignore_pattern
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(compile_full_match)
            .transpose()?;
        let reconciliation = reconcile(
            entries.iter().map(|e| e.file_name.as_str()),
            in_process.iter().chain(&finished).map(File::file_name),
            ignore.as_ref(),
        );
        info!(
            use_case = %use_case.name,
            path = %loggable_path(use_case, &file.path),
            state = %reconciliation.state,
            missing_files = reconciliation.missing_files.len(),
            missing_in_protocol = reconciliation.missing_in_protocol.len(),
            "Reconciled protocol"
        );

        if use_case.tag_protocol_processed && reconciliation.state == MatchState::Correct {
            let tags = &self.config.tags;
            let processed = TagSet::from([(
                tags.protocol_state_key.clone(),
                tags.protocol_processed_files_value.clone(),
            )]);
            for document in &in_process {
                self.store.tag(document, &processed)?;
            }
        }

        let protocol_name = use_case
            .relative_to_dispatch(self.config, &file.path)?
            .to_string();
        self.store_rows(use_case, &protocol_name, &entries)?;
        self.send_report(use_case, file, &protocol_name, &content, &reconciliation)?;

        let tags = &self.config.tags;
        self.store.tag(
            file,
            &TagSet::from([
                (tags.protocol_match_key.clone(), reconciliation.state.as_str().to_string()),
                (tags.protocol_state_key.clone(), tags.protocol_processed_value.clone()),
            ]),
        )?;
        let destination = file.sibling(use_case.protocol_finished_path_for(self.config, &file.path)?);
        self.store.move_to(file, &destination)?;
        Ok(reconciliation)
    }

    fn documents_in(&self, use_case: &UseCase, folder: &str) -> Result<Vec<File>> {
        let query = ListQuery::folder(folder).extension(&self.config.document_extension);
        self.store.list(&use_case.container(), &query)
    }

    fn finished_folder_for(&self, use_case: &UseCase, folder: &str) -> Result<String> {
        if folder == use_case.dispatch_path(self.config) {
            Ok(use_case.finished_path(self.config))
        } else {
            use_case.finished_path_for(self.config, folder)
        }
    }

    /// Replace previously stored rows of the protocol.
    fn store_rows(&self, use_case: &UseCase, protocol_name: &str, entries: &[ProtocolEntry]) -> Result<()> {
        self.protocols.delete(&use_case.name, protocol_name)?;
        self.protocols.store(&use_case.name, protocol_name, entries)
    }

    fn send_report(
        &self,
        use_case: &UseCase,
        file: &File,
        protocol_name: &str,
        content: &[u8],
        reconciliation: &Reconciliation,
    ) -> Result<()> {
        let lines = |names: &BTreeSet<String>| names.iter().cloned().collect::<Vec<_>>().join("\n");
        let notification = Notification::ProtocolReport {
            use_case: use_case.name.clone(),
            protocol_name: protocol_name.to_string(),
            match_state: reconciliation.state,
            attachments: vec![
                Attachment {
                    name: file.file_name().to_string(),
                    content: String::from_utf8_lossy(content).into_owned(),
                },
                Attachment {
                    name: "missingFiles.txt".to_string(),
                    content: lines(&reconciliation.missing_files),
                },
                Attachment {
                    name: "missingInProtocol.txt".to_string(),
                    content: lines(&reconciliation.missing_in_protocol),
                },
            ],
        };
        self.notifier
            .notify(&use_case.recipients(self.config), &notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_algebra() {
        let result = reconcile(["x.pdf", "y.pdf"], ["y.pdf", "z.pdf"], None);
        assert_eq!(result.missing_files, set(&["x.pdf"]));
        assert_eq!(result.missing_in_protocol, set(&["z.pdf"]));
        assert_eq!(result.state, MatchState::MissingInProtocolAndFiles);
    }

    #[test]
    fn test_equal_sets_are_correct() {
        let result = reconcile(["a.pdf", "b.pdf"], ["b.pdf", "a.pdf", "a.pdf"], None);
        assert_eq!(result.state, MatchState::Correct);
        assert!(result.missing_files.is_empty());
        assert!(result.missing_in_protocol.is_empty());
    }

    #[test]
    fn test_one_sided_differences() {
        let none: Vec<&str> = Vec::new();
        assert_eq!(reconcile(["a.pdf"], none.clone(), None).state, MatchState::MissingFiles);
        assert_eq!(reconcile(none, ["a.pdf"], None).state, MatchState::MissingInProtocol);
    }

    #[test]
    fn test_ignore_pattern_drops_observed_names() {
        let ignore = compile_full_match(r".*_generated").unwrap();
        let result = reconcile(
            ["a.pdf"],
            ["a.pdf", "a_generated.pdf", "b_generated_v2.pdf"],
            Some(&ignore),
        );
        assert_eq!(result.missing_in_protocol, set(&["b_generated_v2.pdf"]));
        assert_eq!(result.state, MatchState::MissingInProtocol);
    }
}
