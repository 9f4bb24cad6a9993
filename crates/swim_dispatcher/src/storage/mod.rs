//! Object storage abstraction.
//!
//! Objects are addressed by [`Container`] and key. Each object carries a tag
//! set that holds its processing state. The trait exposes tag writes only as
//! a merge so no caller can drop keys it did not set.
//!
//! # Example
//!
//! ```rust,ignore
//! use swim_dispatcher::storage::{ListQuery, MemoryObjectStore, ObjectStore};
//!
//! let store = MemoryObjectStore::new();
//! let files = store.list(&container, &ListQuery::folder("test/inProcess").extension("pdf"))?;
//! ```

mod local;
mod memory;
mod presign;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use presign::UrlSigner;

use crate::error::Result;
use crate::tags::{TagFilter, TagSet};
use crate::types::{Container, File};

/// Parameters of a folder listing.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Folder path without trailing slash.
    pub folder: String,
    /// Include files in nested folders.
    pub recursive: bool,
    /// Case-insensitive extension without dot.
    pub extension: Option<String>,
    pub filter: TagFilter,
}

impl ListQuery {
    pub fn folder(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            ..Default::default()
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Whether a key lies in the listed folder and has the wanted extension.
    pub fn matches_key(&self, key: &str) -> bool {
        let folder = self.folder.trim_end_matches('/');
        let rest = if folder.is_empty() {
            key
        } else {
            match key.strip_prefix(folder).and_then(|r| r.strip_prefix('/')) {
                Some(rest) => rest,
                None => return false,
            }
        };
        if rest.is_empty() || (!self.recursive && rest.contains('/')) {
            return false;
        }
        match &self.extension {
            Some(ext) => has_extension(rest, ext),
            None => true,
        }
    }
}

fn has_extension(key: &str, extension: &str) -> bool {
    let name = crate::types::file_name(key);
    match name.rfind('.') {
        Some(idx) => name[idx + 1..].eq_ignore_ascii_case(extension.trim_start_matches('.')),
        None => false,
    }
}

/// Immediate subfolder of `folder` containing `key`, if any.
pub(crate) fn subfolder_of(folder: &str, key: &str) -> Option<String> {
    let folder = folder.trim_end_matches('/');
    let rest = if folder.is_empty() {
        key
    } else {
        key.strip_prefix(folder)?.strip_prefix('/')?
    };
    let (dir, _) = rest.split_once('/')?;
    Some(crate::types::join_path(folder, dir))
}

/// Storage operations used by the engines.
///
/// Every failure surfaces as a storage-class [`crate::DispatchError`].
pub trait ObjectStore: Send + Sync {
    /// Files in a folder whose tags pass the query filter, sorted by key.
    fn list(&self, container: &Container, query: &ListQuery) -> Result<Vec<File>>;

    /// Paths of the immediate subfolders of `folder`, sorted.
    fn sub_directories(&self, container: &Container, folder: &str) -> Result<Vec<String>>;

    /// Current tags of a file.
    fn tags(&self, file: &File) -> Result<TagSet>;

    /// Merge `new_tags` into the file's tags. Keys not supplied are kept.
    fn tag(&self, file: &File, new_tags: &TagSet) -> Result<()>;

    fn exists(&self, file: &File) -> Result<bool>;

    fn read(&self, file: &File) -> Result<Vec<u8>>;

    /// Create or replace an object. Tags of a replaced object are kept.
    fn write(&self, file: &File, content: &[u8]) -> Result<()>;

    /// Copy an object and, unless `clear_tags` is set, its tags.
    fn copy(&self, source: &File, destination: &File, clear_tags: bool) -> Result<()>;

    /// Move an object together with its tags.
    fn move_to(&self, source: &File, destination: &File) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_matches_direct_children() {
        let query = ListQuery::folder("test/inProcess").extension("pdf");
        assert!(query.matches_key("test/inProcess/a.pdf"));
        assert!(query.matches_key("test/inProcess/A.PDF"));
        assert!(!query.matches_key("test/inProcess/a.json"));
        assert!(!query.matches_key("test/inProcess/sub/a.pdf"));
        assert!(!query.matches_key("test/inProcessOther/a.pdf"));
        assert!(!query.matches_key("test/a.pdf"));
    }

    #[test]
    fn test_recursive_query_matches_nested() {
        let query = ListQuery::folder("test/inProcess/").recursive(true);
        assert!(query.matches_key("test/inProcess/sub/deeper/a.csv"));
        assert!(query.matches_key("test/inProcess/README"));
    }

    #[test]
    fn test_subfolder_detection() {
        assert_eq!(
            subfolder_of("test/inProcess", "test/inProcess/sub/a.pdf"),
            Some("test/inProcess/sub".to_string())
        );
        assert_eq!(
            subfolder_of("test/inProcess", "test/inProcess/sub/x/a.pdf"),
            Some("test/inProcess/sub".to_string())
        );
        assert_eq!(subfolder_of("test/inProcess", "test/inProcess/a.pdf"), None);
        assert_eq!(subfolder_of("test/inProcess", "other/sub/a.pdf"), None);
    }
}
