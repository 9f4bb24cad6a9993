//! Inbound events from handler services.
//!
//! A handler reports back either that it finished a dispatched file or that
//! it failed. Both events carry the presigned URLs issued at dispatch time,
//! which are verified before any file is touched.

use crate::config::DispatcherConfig;
use crate::dispatch::finish_object;
use crate::error::{DispatchError, Result};
use crate::ports::{Notification, Notifier};
use crate::storage::{ObjectStore, UrlSigner};
use crate::target::{loggable_error, loggable_path};
use crate::types::{ErrorDetails, File, FileEvent};
use crate::use_case::UseCase;
use tracing::{info, warn};

pub struct EventHandler<'a> {
    config: &'a DispatcherConfig,
    store: &'a dyn ObjectStore,
    signer: &'a UrlSigner,
    notifier: &'a dyn Notifier,
}

impl<'a> EventHandler<'a> {
    pub fn new(
        config: &'a DispatcherConfig,
        store: &'a dyn ObjectStore,
        signer: &'a UrlSigner,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            config,
            store,
            signer,
            notifier,
        }
    }

    /// Finish the file of a finish event, and its metadata file when the
    /// event carries one.
    pub fn mark_file_finished(&self, event: &FileEvent) -> Result<()> {
        let use_case = self.config.find_use_case(&event.use_case)?;
        let file = self.resolve(use_case, &event.presigned_url)?;
        finish_object(self.config, self.store, use_case, &file)?;

        if let Some(metadata_url) = event
            .metadata_presigned_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
        {
            let metadata_file = self.resolve(use_case, metadata_url)?;
            finish_object(self.config, self.store, use_case, &metadata_file)?;
        }
        info!(
            use_case = %use_case.name,
            path = %loggable_path(use_case, &file.path),
            "Marked file finished"
        );
        Ok(())
    }

    /// Tag the file of an error event as errored and notify the use case.
    ///
    /// When the use case or the file can't be resolved the failure is
    /// reported to the fallback address instead.
    pub fn handle_error(&self, event: &FileEvent, details: &ErrorDetails) -> Result<()> {
        let message = details.trimmed_message();
        let resolved = self
            .config
            .find_use_case(&event.use_case)
            .and_then(|use_case| Ok((use_case, self.resolve(use_case, &event.presigned_url)?)));

        match resolved {
            Ok((use_case, file)) => {
                self.store.tag(
                    &file,
                    &self.config.error_tags(
                        &self.config.tags.dispatch_state_key,
                        &details.class_name,
                        message,
                    ),
                )?;
                warn!(
                    use_case = %use_case.name,
                    path = %loggable_path(use_case, &file.path),
                    class_name = %details.class_name,
                    "Handler reported error for file"
                );
                let notification = Notification::FileError {
                    use_case: Some(use_case.name.clone()),
                    file_path: Some(file.path.clone()),
                    class_name: details.class_name.clone(),
                    message: message.to_string(),
                    source: details.source.clone(),
                };
                self.notifier
                    .notify(&use_case.recipients(self.config), &notification)
            }
            Err(e) => {
                let error_text = match self.config.find_use_case(&event.use_case) {
                    Ok(use_case) => loggable_error(use_case, &e),
                    Err(_) => e.to_string(),
                };
                warn!(
                    use_case = %event.use_case,
                    error = %error_text,
                    "Can't resolve file of error event, notifying fallback address"
                );
                let notification = Notification::FileError {
                    use_case: Some(event.use_case.clone()),
                    file_path: None,
                    class_name: details.class_name.clone(),
                    message: format!("{} (unresolved: {})", message, e),
                    source: details.source.clone(),
                };
                self.notifier
                    .notify(&[self.config.fallback_mail.clone()], &notification)
            }
        }
    }

    /// Verify a presigned URL and check it addresses a pending file of the
    /// use case.
    fn resolve(&self, use_case: &UseCase, presigned_url: &str) -> Result<File> {
        let file = self.signer.verify(presigned_url, self.store)?;
        if file.container != use_case.container() {
            return Err(DispatchError::PresignedUrl(format!(
                "URL addresses {} but use case {} lives in {}",
                file.container,
                use_case.name,
                use_case.container()
            )));
        }
        use_case.relative_to_dispatch(self.config, &file.path)?;
        Ok(file)
    }
}
