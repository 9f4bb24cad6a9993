//! Filesystem-backed object store.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/<tenant>/<bucket>/<key>               object content
//! <root>/<tenant>/.tags/<bucket>/<key>.json    tag set as a JSON object
//! ```
//!
//! `.tags` is not a valid bucket name. Folders only exist through the objects
//! they contain, like in an S3 bucket.

use super::{subfolder_of, ListQuery, ObjectStore};
use crate::error::{DispatchError, Result};
use crate::tags::TagSet;
use crate::types::{Container, File};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TAGS_DIR: &str = ".tags";

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, container: &Container) -> Result<PathBuf> {
        validate_container(container)?;
        Ok(self.root.join(&container.tenant).join(&container.bucket))
    }

    fn object_path(&self, file: &File) -> Result<PathBuf> {
        validate_key(&file.path)?;
        Ok(self.bucket_dir(&file.container)?.join(&file.path))
    }

    fn tags_path(&self, file: &File) -> Result<PathBuf> {
        validate_key(&file.path)?;
        validate_container(&file.container)?;
        Ok(self
            .root
            .join(&file.container.tenant)
            .join(TAGS_DIR)
            .join(&file.container.bucket)
            .join(format!("{}.json", file.path)))
    }

    fn read_tags(&self, file: &File) -> Result<TagSet> {
        let path = self.tags_path(file)?;
        match fs::read(&path) {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(TagSet::new()),
            Err(e) => Err(storage_error("read tags of", file, e)),
        }
    }

    fn write_tags(&self, file: &File, tags: &TagSet) -> Result<()> {
        let path = self.tags_path(file)?;
        if tags.is_empty() {
            return remove_if_exists(&path).map_err(|e| storage_error("clear tags of", file, e));
        }
        ensure_parent(&path).map_err(|e| storage_error("tag", file, e))?;
        fs::write(&path, serde_json::to_vec_pretty(tags)?)
            .map_err(|e| storage_error("tag", file, e))
    }

    fn require_object(&self, file: &File) -> Result<PathBuf> {
        let path = self.object_path(file)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(DispatchError::ObjectNotFound {
                bucket: file.container.to_string(),
                path: file.path.clone(),
            })
        }
    }

    /// Object keys below `folder` with their sizes, sorted. Without
    /// `recursive` only direct children are visited.
    fn walk(&self, container: &Container, folder: &str, recursive: bool) -> Result<Vec<(String, u64)>> {
        let dir = self.bucket_dir(container)?;
        let folder = folder.trim_matches('/');
        let start = if folder.is_empty() {
            dir.clone()
        } else {
            validate_key(folder)?;
            dir.join(folder)
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }
        let mut walker = WalkDir::new(&start).follow_links(false);
        if !recursive {
            walker = walker.max_depth(1);
        }
        let mut keys = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                DispatchError::storage(format!("Failed to list bucket {}: {}", container, e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let size = entry
                .metadata()
                .map_err(|e| DispatchError::storage(format!("Failed to stat {}: {}", key, e)))?
                .len();
            keys.push((key, size));
        }
        keys.sort();
        Ok(keys)
    }
}

impl ObjectStore for LocalObjectStore {
    fn list(&self, container: &Container, query: &ListQuery) -> Result<Vec<File>> {
        let mut files = Vec::new();
        for (key, size) in self.walk(container, &query.folder, query.recursive)? {
            if !query.matches_key(&key) {
                continue;
            }
            let file = File::new(container.clone(), key, Some(size));
            if query.filter.matches(&self.read_tags(&file)?) {
                files.push(file);
            }
        }
        Ok(files)
    }

    fn sub_directories(&self, container: &Container, folder: &str) -> Result<Vec<String>> {
        let dirs: BTreeSet<String> = self
            .walk(container, folder, true)?
            .iter()
            .filter_map(|(key, _)| subfolder_of(folder, key))
            .collect();
        Ok(dirs.into_iter().collect())
    }

    fn tags(&self, file: &File) -> Result<TagSet> {
        self.require_object(file)?;
        self.read_tags(file)
    }

    fn tag(&self, file: &File, new_tags: &TagSet) -> Result<()> {
        self.require_object(file)?;
        let mut tags = self.read_tags(file)?;
        tags.extend(new_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.write_tags(file, &tags)
    }

    fn exists(&self, file: &File) -> Result<bool> {
        Ok(self.object_path(file)?.is_file())
    }

    fn read(&self, file: &File) -> Result<Vec<u8>> {
        let path = self.require_object(file)?;
        fs::read(path).map_err(|e| storage_error("read", file, e))
    }

    fn write(&self, file: &File, content: &[u8]) -> Result<()> {
        let path = self.object_path(file)?;
        ensure_parent(&path).map_err(|e| storage_error("write", file, e))?;
        fs::write(path, content).map_err(|e| storage_error("write", file, e))
    }

    fn copy(&self, source: &File, destination: &File, clear_tags: bool) -> Result<()> {
        let from = self.require_object(source)?;
        let to = self.object_path(destination)?;
        ensure_parent(&to).map_err(|e| storage_error("copy to", destination, e))?;
        fs::copy(from, to).map_err(|e| storage_error("copy", source, e))?;
        let tags = if clear_tags {
            TagSet::new()
        } else {
            self.read_tags(source)?
        };
        self.write_tags(destination, &tags)
    }

    fn move_to(&self, source: &File, destination: &File) -> Result<()> {
        let from = self.require_object(source)?;
        let to = self.object_path(destination)?;
        let tags = self.read_tags(source)?;
        ensure_parent(&to).map_err(|e| storage_error("move to", destination, e))?;
        fs::rename(from, to).map_err(|e| storage_error("move", source, e))?;
        self.write_tags(destination, &tags)?;
        remove_if_exists(&self.tags_path(source)?).map_err(|e| storage_error("move", source, e))
    }
}

/// Tenant and bucket are single path segments, and the bucket is not the
/// reserved tags directory.
fn validate_container(container: &Container) -> Result<()> {
    let segment_ok = |s: &str| !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\']);
    if !segment_ok(&container.tenant) || !segment_ok(&container.bucket) || container.bucket == TAGS_DIR {
        return Err(DispatchError::storage(format!("Invalid container '{}'", container)));
    }
    Ok(())
}

/// Keys are relative, slash separated and free of `.`/`..` segments.
fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|s| s.is_empty() || s == "." || s == "..");
    if invalid {
        return Err(DispatchError::storage(format!("Invalid object key '{}'", key)));
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn storage_error(action: &str, file: &File, e: io::Error) -> DispatchError {
    DispatchError::storage(format!(
        "Failed to {} {} in {}: {}",
        action, file.path, file.container, e
    ))
}
