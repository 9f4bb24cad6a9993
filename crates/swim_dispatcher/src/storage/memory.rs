//! In-process object store.

use super::{subfolder_of, ListQuery, ObjectStore};
use crate::error::{DispatchError, Result};
use crate::tags::TagSet;
use crate::types::{Container, File};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StoredObject {
    content: Vec<u8>,
    tags: TagSet,
}

type ObjectKey = (Container, String);

/// Object store kept in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<ObjectKey, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object with initial tags.
    pub fn insert(&self, file: &File, content: &[u8], tags: TagSet) -> Result<()> {
        self.lock()?.insert(
            key_of(file),
            StoredObject {
                content: content.to_vec(),
                tags,
            },
        );
        Ok(())
    }

    /// All keys of a container, sorted.
    pub fn keys(&self, container: &Container) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, path)| path.clone())
            .collect())
    }

    /// Snapshot of every key with its tags.
    pub fn snapshot(&self) -> Result<BTreeMap<(Container, String), TagSet>> {
        Ok(self
            .lock()?
            .iter()
            .map(|(key, object)| (key.clone(), object.tags.clone()))
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<ObjectKey, StoredObject>>> {
        self.objects
            .lock()
            .map_err(|_| DispatchError::storage("memory store lock poisoned"))
    }
}

fn key_of(file: &File) -> ObjectKey {
    (file.container.clone(), file.path.clone())
}

fn not_found(file: &File) -> DispatchError {
    DispatchError::ObjectNotFound {
        bucket: file.container.to_string(),
        path: file.path.clone(),
    }
}

impl ObjectStore for MemoryObjectStore {
    fn list(&self, container: &Container, query: &ListQuery) -> Result<Vec<File>> {
        let objects = self.lock()?;
        Ok(objects
            .iter()
            .filter(|((c, path), object)| {
                c == container && query.matches_key(path) && query.filter.matches(&object.tags)
            })
            .map(|((c, path), object)| {
                File::new(c.clone(), path.clone(), Some(object.content.len() as u64))
            })
            .collect())
    }

    fn sub_directories(&self, container: &Container, folder: &str) -> Result<Vec<String>> {
        let objects = self.lock()?;
        let dirs: BTreeSet<String> = objects
            .keys()
            .filter(|(c, _)| c == container)
            .filter_map(|(_, path)| subfolder_of(folder, path))
            .collect();
        Ok(dirs.into_iter().collect())
    }

    fn tags(&self, file: &File) -> Result<TagSet> {
        self.lock()?
            .get(&key_of(file))
            .map(|object| object.tags.clone())
            .ok_or_else(|| not_found(file))
    }

    fn tag(&self, file: &File, new_tags: &TagSet) -> Result<()> {
        let mut objects = self.lock()?;
        let object = objects.get_mut(&key_of(file)).ok_or_else(|| not_found(file))?;
        object
            .tags
            .extend(new_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn exists(&self, file: &File) -> Result<bool> {
        Ok(self.lock()?.contains_key(&key_of(file)))
    }

    fn read(&self, file: &File) -> Result<Vec<u8>> {
        self.lock()?
            .get(&key_of(file))
            .map(|object| object.content.clone())
            .ok_or_else(|| not_found(file))
    }

    fn write(&self, file: &File, content: &[u8]) -> Result<()> {
        let mut objects = self.lock()?;
        let object = objects.entry(key_of(file)).or_default();
        object.content = content.to_vec();
        Ok(())
    }

    fn copy(&self, source: &File, destination: &File, clear_tags: bool) -> Result<()> {
        let mut objects = self.lock()?;
        let mut object = objects.get(&key_of(source)).cloned().ok_or_else(|| not_found(source))?;
        if clear_tags {
            object.tags.clear();
        }
        objects.insert(key_of(destination), object);
        Ok(())
    }

    fn move_to(&self, source: &File, destination: &File) -> Result<()> {
        let mut objects = self.lock()?;
        let object = objects.remove(&key_of(source)).ok_or_else(|| not_found(source))?;
        objects.insert(key_of(destination), object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{tag_set, TagFilter};

    fn container() -> Container {
        Container::new("t", "b")
    }

    fn file(path: &str) -> File {
        File::new(container(), path, None)
    }

    #[test]
    fn test_tag_merges_existing_keys() {
        let store = MemoryObjectStore::new();
        store
            .insert(&file("a.pdf"), b"x", tag_set([("keep", "me"), ("state", "old")]))
            .unwrap();
        store.tag(&file("a.pdf"), &tag_set([("state", "new")])).unwrap();

        let tags = store.tags(&file("a.pdf")).unwrap();
        assert_eq!(tags.get("keep").unwrap(), "me");
        assert_eq!(tags.get("state").unwrap(), "new");
    }

    #[test]
    fn test_list_applies_tag_filter() {
        let store = MemoryObjectStore::new();
        store.insert(&file("in/a.pdf"), b"1", TagSet::new()).unwrap();
        store
            .insert(&file("in/b.pdf"), b"22", tag_set([("state", "dispatched")]))
            .unwrap();
        let mut exclude = BTreeMap::new();
        exclude.insert("state".to_string(), vec!["dispatched".to_string()]);

        let query = ListQuery::folder("in").filter(TagFilter::new(TagSet::new(), exclude));
        let files = store.list(&container(), &query).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "in/a.pdf");
        assert_eq!(files[0].size, Some(1));
    }

    #[test]
    fn test_copy_and_move() {
        let store = MemoryObjectStore::new();
        store.insert(&file("a.pdf"), b"x", tag_set([("k", "v")])).unwrap();

        store.copy(&file("a.pdf"), &file("b.pdf"), true).unwrap();
        assert!(store.tags(&file("b.pdf")).unwrap().is_empty());

        store.move_to(&file("a.pdf"), &file("done/a.pdf")).unwrap();
        assert!(!store.exists(&file("a.pdf")).unwrap());
        assert_eq!(store.tags(&file("done/a.pdf")).unwrap().get("k").unwrap(), "v");
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.read(&file("nope")).unwrap_err();
        assert!(matches!(err, DispatchError::ObjectNotFound { .. }));
    }

    #[test]
    fn test_sub_directories_are_immediate() {
        let store = MemoryObjectStore::new();
        for path in ["in/a.pdf", "in/x/b.pdf", "in/x/y/c.pdf", "in/z/d.pdf", "out/e.pdf"] {
            store.insert(&file(path), b"", TagSet::new()).unwrap();
        }
        assert_eq!(
            store.sub_directories(&container(), "in").unwrap(),
            vec!["in/x".to_string(), "in/z".to_string()]
        );
    }
}
