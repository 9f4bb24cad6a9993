//! SWIM Dispatcher - Tag-Driven File Dispatching
//!
//! The dispatcher watches use-case folders in object storage, forwards ready
//! files to handler services and reconciles delivery protocols against the
//! files that actually arrived. Object tags are the only state: every step
//! reads and writes tags, so a pass can be repeated safely.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │   Object    │     │  Dispatch   │     │  EventSink  │     │   Handler     │
//! │   Storage   │────▶│   Engine    │────▶│  (outbox)   │────▶│   services    │
//! │ (tags=state)│     │ (tag→action)│     │             │     │               │
//! └─────────────┘     └─────────────┘     └─────────────┘     └───────┬───────┘
//!        ▲                                                            │
//!        │            ┌─────────────┐      finish / error events      │
//!        └────────────│ EventHandler│◀────────────────────────────────┘
//!                     └─────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **UseCase**: A storage folder with its dispatch destination and options
//! - **Action tag**: Decides per file whether to dispatch, reroute or finish
//! - **Protocol**: CSV manifest listing the documents a delivery should contain
//! - **SubstitutionPattern**: `s/regex/template/` rule deriving targets from names

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod metadata;
pub mod pattern;
pub mod ports;
pub mod protocol;
pub mod storage;
pub mod tags;
pub mod target;
pub mod types;
pub mod use_case;

// Re-exports for convenience
pub use config::{DispatcherConfig, StorageConfig, TagVocabulary};
pub use dispatch::{DispatchEngine, DispatchReport, FileOutcome};
pub use error::{DispatchError, Result};
pub use events::EventHandler;
pub use metadata::Metadata;
pub use pattern::{apply_pattern, SubstitutionPattern};
pub use protocol::{parse_protocol, reconcile, ProtocolEngine, ProtocolEntry, ProtocolOutcome, Reconciliation};
pub use storage::{ListQuery, LocalObjectStore, MemoryObjectStore, ObjectStore, UrlSigner};
pub use tags::{TagFilter, TagSet};
pub use target::{resolve_target, DispatchContext, DocumentLookup, TableLookup, Target};
pub use types::{Container, DispatchAction, ErrorDetails, File, FileEvent, MatchState};
pub use use_case::{FilenameMapEntry, SourceStrategy, UseCase, UseCaseRegistry};
