//! Outbound collaborators of the engines: dispatch events, notifications and
//! protocol persistence.
//!
//! Each port has a file-backed adapter used by the binary and an in-memory
//! adapter that records calls for tests.

mod events;
mod notify;
mod protocols;

pub use events::{MemoryEventSink, OutboxEventSink, OutboxRecord};
pub use notify::{LogNotifier, MemoryNotifier};
pub use protocols::{JsonProtocolStore, MemoryProtocolStore};

use crate::error::Result;
use crate::protocol::ProtocolEntry;
use crate::types::{FileEvent, MatchState};
use serde::Serialize;
use std::collections::BTreeMap;

/// Receives dispatch events for downstream consumers.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, destination: &str, event: &FileEvent) -> Result<()>;
}

/// Sends notifications to people.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipients: &[String], notification: &Notification) -> Result<()>;
}

/// Durable storage of parsed protocol rows.
pub trait ProtocolStore: Send + Sync {
    /// Remove every stored row of a protocol.
    fn delete(&self, use_case: &str, protocol_name: &str) -> Result<()>;

    fn store(&self, use_case: &str, protocol_name: &str, entries: &[ProtocolEntry]) -> Result<()>;

    fn load(&self, use_case: &str, protocol_name: &str) -> Result<Vec<ProtocolEntry>>;
}

/// Attachment of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

/// Messages sent to the recipients of a use case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Failures of one dispatch batch, by file path.
    DispatchErrors {
        use_case: String,
        errors: BTreeMap<String, String>,
    },
    /// Result of reconciling one protocol.
    ProtocolReport {
        use_case: String,
        protocol_name: String,
        match_state: MatchState,
        attachments: Vec<Attachment>,
    },
    /// A protocol that could not be processed.
    ProtocolError {
        use_case: String,
        protocol_path: String,
        error: String,
    },
    /// A handler reported a failure for a dispatched file.
    FileError {
        use_case: Option<String>,
        file_path: Option<String>,
        class_name: String,
        message: String,
        source: Option<String>,
    },
}

impl Notification {
    pub fn subject(&self) -> String {
        match self {
            Self::DispatchErrors { use_case, errors } => {
                format!("[{}] Dispatching failed for {} file(s)", use_case, errors.len())
            }
            Self::ProtocolReport {
                use_case,
                protocol_name,
                match_state,
                ..
            } => format!("[{}] Protocol {}: {}", use_case, protocol_name, match_state),
            Self::ProtocolError { use_case, .. } => format!("[{}] Protocol processing failed", use_case),
            Self::FileError { use_case, .. } => format!(
                "[{}] Processing of file failed",
                use_case.as_deref().unwrap_or("unknown use case")
            ),
        }
    }

    /// Name of the use case the notification is about, when known.
    pub fn use_case(&self) -> Option<&str> {
        match self {
            Self::DispatchErrors { use_case, .. }
            | Self::ProtocolReport { use_case, .. }
            | Self::ProtocolError { use_case, .. } => Some(use_case),
            Self::FileError { use_case, .. } => use_case.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DispatchErrors { .. } => "dispatch_errors",
            Self::ProtocolReport { .. } => "protocol_report",
            Self::ProtocolError { .. } => "protocol_error",
            Self::FileError { .. } => "file_error",
        }
    }
}
