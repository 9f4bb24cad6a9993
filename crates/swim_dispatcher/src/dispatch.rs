//! Dispatch engine.
//!
//! One pass lists the pending files of every use case and handles each file
//! by the action read from its tags:
//!
//! - `dispatch`: send a dispatch event with presigned URLs, tag dispatched
//! - `reroute`: copy into another use case's dispatch folder, then finish
//! - `delete` / `ignore`: finish without dispatching
//!
//! A failing file is tagged as errored and reported once per use case at the
//! end of its batch. No failure aborts the pass.

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::metadata::Metadata;
use crate::ports::{EventSink, Notification, Notifier};
use crate::storage::{ListQuery, ObjectStore, UrlSigner};
use crate::tags::{TagFilter, TagSet};
use crate::target::{loggable_error, loggable_path};
use crate::types::{join_path, DispatchAction, File, FileEvent};
use crate::use_case::UseCase;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// What happened to a successfully processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Dispatched,
    Rerouted,
    Finished,
}

/// Result of one use case's dispatch batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub use_case: String,
    pub dispatched: usize,
    pub rerouted: usize,
    pub finished: usize,
    /// Failure message by file path.
    pub errors: BTreeMap<String, String>,
}

impl DispatchReport {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Dispatched => self.dispatched += 1,
            FileOutcome::Rerouted => self.rerouted += 1,
            FileOutcome::Finished => self.finished += 1,
        }
    }
}

pub struct DispatchEngine<'a> {
    config: &'a DispatcherConfig,
    store: &'a dyn ObjectStore,
    signer: &'a UrlSigner,
    events: &'a dyn EventSink,
    notifier: &'a dyn Notifier,
}

impl<'a> DispatchEngine<'a> {
    pub fn new(
        config: &'a DispatcherConfig,
        store: &'a dyn ObjectStore,
        signer: &'a UrlSigner,
        events: &'a dyn EventSink,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            config,
            store,
            signer,
            events,
            notifier,
        }
    }

    /// Run one dispatch pass over all use cases.
    pub fn run(&self) -> Vec<DispatchReport> {
        info!("Starting dispatching");
        let reports: Vec<DispatchReport> = self
            .config
            .use_cases
            .iter()
            .map(|use_case| self.dispatch_use_case(use_case))
            .collect();
        info!("Finished dispatching");
        reports
    }

    /// Process every pending file of one use case.
    pub fn dispatch_use_case(&self, use_case: &UseCase) -> DispatchReport {
        let mut report = DispatchReport {
            use_case: use_case.name.clone(),
            ..Default::default()
        };

        let folders = match self.candidate_folders(use_case) {
            Ok(folders) => folders,
            Err(e) => {
                error!(use_case = %use_case.name, error = %loggable_error(use_case, &e), "Failed to list dispatch folders");
                report
                    .errors
                    .insert(use_case.dispatch_path(self.config), e.to_string());
                self.send_errors(use_case, &report);
                return report;
            }
        };

        for folder in folders {
            let files = match self.list_candidates(use_case, &folder) {
                Ok(files) => files,
                Err(e) => {
                    error!(use_case = %use_case.name, folder = %loggable_path(use_case, &folder), error = %loggable_error(use_case, &e), "Failed to list files");
                    report.errors.insert(folder, e.to_string());
                    continue;
                }
            };
            info!(
                use_case = %use_case.name,
                folder = %loggable_path(use_case, &folder),
                "Found {} ready to process files",
                files.len()
            );

            for file in files {
                let path = loggable_path(use_case, &file.path);
                debug!(use_case = %use_case.name, path = %path, "Processing file");
                match self.process_file(use_case, &file) {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => {
                        warn!(use_case = %use_case.name, path = %path, error = %loggable_error(use_case, &e), "Error while processing file");
                        let state_key = &self.config.tags.dispatch_state_key;
                        if let Err(tag_err) = mark_error(self.config, self.store, &file, state_key, &e) {
                            error!(use_case = %use_case.name, path = %path, error = %loggable_error(use_case, &tag_err), "Failed to tag file as errored");
                        }
                        report.errors.insert(file.path.clone(), e.to_string());
                    }
                }
            }
        }

        self.send_errors(use_case, &report);
        report
    }

    /// The dispatch folder and, for recursive use cases, each immediate
    /// subfolder except the finished folder.
    fn candidate_folders(&self, use_case: &UseCase) -> Result<Vec<String>> {
        let dispatch_path = use_case.dispatch_path(self.config);
        let mut folders = vec![dispatch_path.clone()];
        if use_case.recursive {
            let subfolders = self
                .store
                .sub_directories(&use_case.container(), &dispatch_path)?;
            folders.extend(
                subfolders
                    .into_iter()
                    .filter(|folder| crate::types::file_name(folder) != self.config.finished_folder),
            );
        }
        Ok(folders)
    }

    fn list_candidates(&self, use_case: &UseCase, folder: &str) -> Result<Vec<File>> {
        let query = ListQuery::folder(folder)
            .extension(&self.config.document_extension)
            .filter(TagFilter::new(
                use_case.required_tags.clone(),
                self.config.dispatch_exclude_tags(),
            ));
        self.store.list(&use_case.container(), &query)
    }

    /// Handle a single file. Errors are returned, not tagged.
    pub fn process_file(&self, use_case: &UseCase, file: &File) -> Result<FileOutcome> {
        if let Some(size) = file.size {
            if size > self.config.max_file_size {
                return Err(DispatchError::FileSize {
                    path: file.path.clone(),
                    size,
                    max: self.config.max_file_size,
                });
            }
        }

        let tags = self.store.tags(file)?;
        match self.resolve_action(file, &tags)? {
            DispatchAction::Dispatch => {
                self.dispatch_file(use_case, file)?;
                Ok(FileOutcome::Dispatched)
            }
            DispatchAction::Reroute => {
                self.reroute_file(use_case, file, &tags)?;
                Ok(FileOutcome::Rerouted)
            }
            DispatchAction::Delete | DispatchAction::Ignore => {
                finish_file(self.config, self.store, use_case, file)?;
                Ok(FileOutcome::Finished)
            }
        }
    }

    /// Action from the action tag; files without one are dispatched.
    pub fn resolve_action(&self, file: &File, tags: &TagSet) -> Result<DispatchAction> {
        match tags
            .get(&self.config.tags.dispatch_action_key)
            .filter(|v| !v.trim().is_empty())
        {
            None => Ok(DispatchAction::Dispatch),
            Some(value) => {
                DispatchAction::parse(value).ok_or_else(|| DispatchError::UnknownAction {
                    path: file.path.clone(),
                    value: value.clone(),
                })
            }
        }
    }

    fn dispatch_file(&self, use_case: &UseCase, file: &File) -> Result<()> {
        let metadata_file = if use_case.requires_metadata {
            let metadata_file = file.sibling(file.metadata_path()?);
            if !self.store.exists(&metadata_file)? {
                return Err(DispatchError::Metadata(format!(
                    "Metadata file {} missing",
                    metadata_file.path
                )));
            }
            Some(metadata_file)
        } else {
            None
        };

        let destination = match &metadata_file {
            Some(metadata_file) if use_case.overwrite_destination_via_metadata => {
                let metadata = Metadata::parse(&self.store.read(metadata_file)?)?;
                metadata_destination(&metadata, &self.config.metadata_dispatch_binding_key)
                    .unwrap_or_else(|| use_case.destination.clone())
            }
            _ => use_case.destination.clone(),
        };

        let event = FileEvent {
            use_case: use_case.name.clone(),
            presigned_url: self.signer.presign(file)?,
            metadata_presigned_url: metadata_file
                .as_ref()
                .map(|f| self.signer.presign(f))
                .transpose()?,
        };
        self.events.dispatch(&destination, &event)?;

        let tags = &self.config.tags;
        self.store.tag(
            file,
            &TagSet::from([(tags.dispatch_state_key.clone(), tags.dispatched_value.clone())]),
        )?;
        info!(
            use_case = %use_case.name,
            path = %loggable_path(use_case, &file.path),
            destination = %destination,
            "Dispatched file"
        );
        Ok(())
    }

    /// Copy the file into the target use case, then finish it here.
    ///
    /// Not atomic: a crash between copy and finish leaves the file in both
    /// use cases.
    fn reroute_file(&self, use_case: &UseCase, file: &File, tags: &TagSet) -> Result<()> {
        let target_name = tags
            .get(&self.config.tags.reroute_destination_key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                DispatchError::Reroute(format!(
                    "Missing reroute destination tag {}",
                    self.config.tags.reroute_destination_key
                ))
            })?;
        if target_name == use_case.name {
            return Err(DispatchError::Reroute(format!(
                "Can't reroute file to its own use case {}",
                use_case.name
            )));
        }
        let target = self
            .config
            .find_use_case(target_name)
            .map_err(|_| DispatchError::Reroute(format!("Unknown reroute use case {}", target_name)))?;

        let relative = use_case.relative_to_dispatch(self.config, &file.path)?;
        let destination_path = join_path(
            &target.dispatch_path(self.config),
            &format!("from_{}/{}", use_case.name, relative),
        );
        let destination = File::new(target.container(), destination_path, None);

        let metadata_file = if use_case.requires_metadata {
            let metadata_file = file.sibling(file.metadata_path()?);
            self.store
                .exists(&metadata_file)?
                .then_some(metadata_file)
        } else {
            None
        };

        self.store.copy(file, &destination, true)?;
        if let Some(metadata_file) = &metadata_file {
            let metadata_destination = destination.sibling(destination.metadata_path()?);
            self.store.copy(metadata_file, &metadata_destination, true)?;
        }
        finish_file(self.config, self.store, use_case, file)?;
        info!(
            use_case = %use_case.name,
            target_use_case = %target.name,
            path = %loggable_path(use_case, &file.path),
            "Rerouted file"
        );
        Ok(())
    }

    fn send_errors(&self, use_case: &UseCase, report: &DispatchReport) {
        if report.errors.is_empty() {
            return;
        }
        let notification = Notification::DispatchErrors {
            use_case: use_case.name.clone(),
            errors: report.errors.clone(),
        };
        if let Err(e) = self
            .notifier
            .notify(&use_case.recipients(self.config), &notification)
        {
            error!(use_case = %use_case.name, error = %loggable_error(use_case, &e), "Failed to send dispatch errors");
        }
    }
}

fn metadata_destination(metadata: &Metadata, binding_key: &str) -> Option<String> {
    metadata
        .index_field(binding_key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Tag a file finished and move it into the finished folder. A metadata
/// sibling is finished with it when the use case requires one.
pub(crate) fn finish_file(
    config: &DispatcherConfig,
    store: &dyn ObjectStore,
    use_case: &UseCase,
    file: &File,
) -> Result<()> {
    finish_object(config, store, use_case, file)?;
    if use_case.requires_metadata {
        let metadata_file = file.sibling(file.metadata_path()?);
        if store.exists(&metadata_file)? {
            finish_object(config, store, use_case, &metadata_file)?;
        }
    }
    Ok(())
}

pub(crate) fn finish_object(
    config: &DispatcherConfig,
    store: &dyn ObjectStore,
    use_case: &UseCase,
    file: &File,
) -> Result<()> {
    let tags = &config.tags;
    store.tag(
        file,
        &TagSet::from([(tags.dispatch_state_key.clone(), tags.finished_value.clone())]),
    )?;
    let destination = file.sibling(use_case.finished_path_for(config, &file.path)?);
    store.move_to(file, &destination)?;
    debug!(
        use_case = %use_case.name,
        path = %loggable_path(use_case, &file.path),
        "Finished file"
    );
    Ok(())
}

/// Tag a file as errored under `state_key`.
pub(crate) fn mark_error(
    config: &DispatcherConfig,
    store: &dyn ObjectStore,
    file: &File,
    state_key: &str,
    error: &DispatchError,
) -> Result<()> {
    store.tag(
        file,
        &config.error_tags(state_key, error.class_name(), &error.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MemoryEventSink, MemoryNotifier};
    use crate::storage::MemoryObjectStore;
    use crate::tags::tag_set;
    use crate::types::Container;
    use crate::use_case::{SourceStrategy, UseCaseRegistry};

    struct Fixture {
        config: DispatcherConfig,
        store: MemoryObjectStore,
        signer: UrlSigner,
        events: MemoryEventSink,
        notifier: MemoryNotifier,
    }

    impl Fixture {
        fn new(use_cases: Vec<UseCase>) -> Self {
            let mut config = DispatcherConfig::default();
            config.fallback_mail = "ops@example.com".to_string();
            config.max_file_size = 10;
            config.use_cases = UseCaseRegistry::new(use_cases);
            Self {
                config,
                store: MemoryObjectStore::new(),
                signer: UrlSigner::new("http://files.local", "secret", 60).unwrap(),
                events: MemoryEventSink::new(),
                notifier: MemoryNotifier::new(),
            }
        }

        fn engine(&self) -> DispatchEngine<'_> {
            DispatchEngine::new(&self.config, &self.store, &self.signer, &self.events, &self.notifier)
        }

        fn put(&self, path: &str, content: &[u8], tags: TagSet) -> File {
            let file = File::new(Container::new("t", "b"), path, Some(content.len() as u64));
            self.store.insert(&file, content, tags).unwrap();
            file
        }

        fn tags(&self, path: &str) -> TagSet {
            self.store
                .tags(&File::new(Container::new("t", "b"), path, None))
                .unwrap()
        }
    }

    fn use_case(name: &str) -> UseCase {
        UseCase {
            name: name.to_string(),
            tenant: "t".to_string(),
            bucket: "b".to_string(),
            path: name.to_string(),
            recursive: false,
            required_tags: TagSet::new(),
            destination: format!("{}-handler", name),
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
    fn test_oversized_file_is_tagged_and_reported() {
        let fx = Fixture::new(vec![use_case("a")]);
        fx.put("a/inProcess/big.pdf", b"0123456789AB", TagSet::new());

        let report = fx.engine().dispatch_use_case(fx.config.find_use_case("a").unwrap());
        assert_eq!(report.errors.len(), 1);
        let tags = fx.tags("a/inProcess/big.pdf");
        assert_eq!(tags.get("SWIM_State").unwrap(), "error");
        assert_eq!(tags.get("SWIM_Error_Class").unwrap(), "FileSizeError");
        assert!(fx.events.events().is_empty());

        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec!["ops@example.com".to_string()]);
    }

    #[test]
    fn test_missing_action_tag_defaults_to_dispatch() {
        let fx = Fixture::new(vec![use_case("a")]);
        let file = fx.put("a/inProcess/x.pdf", b"1", TagSet::new());
        let action = fx.engine().resolve_action(&file, &TagSet::new()).unwrap();
        assert_eq!(action, DispatchAction::Dispatch);
    }

    #[test]
    fn test_unknown_action_fails_only_that_file() {
        let fx = Fixture::new(vec![use_case("a")]);
        fx.put("a/inProcess/bad.pdf", b"1", tag_set([("SWIM_Action", "shred")]));
        fx.put("a/inProcess/good.pdf", b"1", TagSet::new());

        let report = fx.engine().dispatch_use_case(fx.config.find_use_case("a").unwrap());
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            fx.tags("a/inProcess/bad.pdf").get("SWIM_Error_Class").unwrap(),
            "DispatchActionError"
        );
    }

    #[test]
    fn test_delete_finishes_file_and_metadata() {
        let mut uc = use_case("a");
        uc.requires_metadata = true;
        let fx = Fixture::new(vec![uc]);
        fx.put("a/inProcess/sub/x.pdf", b"1", tag_set([("SWIM_Action", "delete")]));
        fx.put("a/inProcess/sub/x.json", b"{}", TagSet::new());

        let mut uc = fx.config.find_use_case("a").unwrap().clone();
        uc.recursive = true;
        let report = fx.engine().dispatch_use_case(&uc);
        assert_eq!(report.finished, 1);
        assert_eq!(fx.tags("a/finished/sub/x.pdf").get("SWIM_State").unwrap(), "finished");
        assert_eq!(fx.tags("a/finished/sub/x.json").get("SWIM_State").unwrap(), "finished");
        assert!(fx.events.events().is_empty());
    }

    #[test]
    fn test_metadata_overrides_destination() {
        let mut uc = use_case("a");
        uc.requires_metadata = true;
        uc.overwrite_destination_via_metadata = true;
        let fx = Fixture::new(vec![uc]);
        fx.put("a/inProcess/x.pdf", b"1", TagSet::new());
        fx.put(
            "a/inProcess/x.json",
            br#"{"Document":{"IndexFields":[{"Name":"SWIM_Dispatch_Binding","Value":"special"}]}}"#,
            TagSet::new(),
        );

        let report = fx.engine().dispatch_use_case(fx.config.find_use_case("a").unwrap());
        assert_eq!(report.dispatched, 1);
        let events = fx.events.events();
        assert_eq!(events[0].0, "special");
        assert!(events[0].1.metadata_presigned_url.is_some());
    }

    #[test]
    fn test_blank_metadata_destination_falls_back() {
        let metadata = Metadata::parse(
            br#"{"Document":{"IndexFields":[{"Name":"SWIM_Dispatch_Binding","Value":"  "}]}}"#,
        )
        .unwrap();
        assert_eq!(metadata_destination(&metadata, "SWIM_Dispatch_Binding"), None);
    }

    #[test]
    fn test_missing_metadata_fails() {
        let mut uc = use_case("a");
        uc.requires_metadata = true;
        let fx = Fixture::new(vec![uc]);
        fx.put("a/inProcess/x.pdf", b"1", TagSet::new());

        let report = fx.engine().dispatch_use_case(fx.config.find_use_case("a").unwrap());
        assert_eq!(report.dispatched, 0);
        assert!(report.errors["a/inProcess/x.pdf"].contains("Metadata file a/inProcess/x.json missing"));
        assert_eq!(fx.tags("a/inProcess/x.pdf").get("SWIM_Error_Class").unwrap(), "MetadataError");
    }

    #[test]
    fn test_recursive_skips_finished_folder() {
        let mut uc = use_case("a");
        uc.recursive = true;
        let fx = Fixture::new(vec![uc]);
        fx.put("a/inProcess/top.pdf", b"1", TagSet::new());
        fx.put("a/inProcess/sub/nested.pdf", b"1", TagSet::new());
        fx.put("a/inProcess/sub/deeper/skipped.pdf", b"1", TagSet::new());
        fx.put("a/inProcess/finished/old.pdf", b"1", TagSet::new());

        let report = fx.engine().dispatch_use_case(fx.config.find_use_case("a").unwrap());
        assert_eq!(report.dispatched, 2);
        assert!(fx.tags("a/inProcess/finished/old.pdf").is_empty());
        assert!(fx.tags("a/inProcess/sub/deeper/skipped.pdf").is_empty());
    }

    #[test]
    fn test_required_tags_limit_candidates() {
        let mut uc = use_case("a");
        uc.required_tags = tag_set([("ready", "yes")]);
        let fx = Fixture::new(vec![uc]);
        fx.put("a/inProcess/x.pdf", b"1", TagSet::new());
        fx.put("a/inProcess/y.pdf", b"1", tag_set([("ready", "yes")]));

        let report = fx.engine().dispatch_use_case(fx.config.find_use_case("a").unwrap());
        assert_eq!(report.dispatched, 1);
        assert!(fx.tags("a/inProcess/x.pdf").is_empty());
    }
}
