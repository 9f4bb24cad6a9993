use super::{Notification, Notifier};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Writes notifications to the log. Mail transport is handled elsewhere.
///
/// Subjects and bodies carry file names, so for use cases with sensitive
/// file names only the kind and recipients are logged.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier {
    sensitive_use_cases: BTreeSet<String>,
}

impl LogNotifier {
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            sensitive_use_cases: config
                .use_cases
                .iter()
                .filter(|use_case| use_case.sensitive_filename)
                .map(|use_case| use_case.name.clone())
                .collect(),
        }
    }

    fn is_sensitive(&self, notification: &Notification) -> bool {
        notification
            .use_case()
            .is_some_and(|name| self.sensitive_use_cases.contains(name))
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, recipients: &[String], notification: &Notification) -> Result<()> {
        if recipients.is_empty() {
            return Err(DispatchError::Notification(format!(
                "No recipients for {} notification",
                notification.kind()
            )));
        }
        if self.is_sensitive(notification) {
            tracing::info!(
                kind = notification.kind(),
                recipients = %recipients.join(","),
                use_case = notification.use_case().unwrap_or_default(),
                "Notification"
            );
            return Ok(());
        }
        tracing::info!(
            kind = notification.kind(),
            recipients = %recipients.join(","),
            subject = %notification.subject(),
            "Notification"
        );
        let body = serde_json::to_string(notification)?;
        tracing::debug!(kind = notification.kind(), body = %body, "Notification body");
        Ok(())
    }
}

/// Records notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(Vec<String>, Notification)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(recipients, notification)` pairs.
    pub fn sent(&self) -> Vec<(Vec<String>, Notification)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, recipients: &[String], notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| DispatchError::Notification("notifier lock poisoned".to_string()))?
            .push((recipients.to_vec(), notification.clone()));
        Ok(())
    }
}
