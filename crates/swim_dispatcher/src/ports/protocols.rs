use super::ProtocolStore;
use crate::error::{DispatchError, Result};
use crate::protocol::ProtocolEntry;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

/// Keeps one JSON document per protocol at
/// `<dir>/<use case>/<protocol name>.json`. Slashes in protocol names map to
/// `__`.
#[derive(Debug, Clone)]
pub struct JsonProtocolStore {
    dir: PathBuf,
}

impl JsonProtocolStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn document_path(&self, use_case: &str, protocol_name: &str) -> PathBuf {
        self.dir
            .join(encode_segment(use_case))
            .join(format!("{}.json", encode_segment(protocol_name)))
    }
}

fn encode_segment(segment: &str) -> String {
    segment
        .split('/')
        .map(|part| part.replace("..", "_"))
        .collect::<Vec<_>>()
        .join("__")
}

impl ProtocolStore for JsonProtocolStore {
    fn delete(&self, use_case: &str, protocol_name: &str) -> Result<()> {
        match fs::remove_file(self.document_path(use_case, protocol_name)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn store(&self, use_case: &str, protocol_name: &str, entries: &[ProtocolEntry]) -> Result<()> {
        let path = self.document_path(use_case, protocol_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut existing = self.load(use_case, protocol_name)?;
        existing.extend_from_slice(entries);
        fs::write(path, serde_json::to_vec_pretty(&existing)?)?;
        Ok(())
    }

    fn load(&self, use_case: &str, protocol_name: &str) -> Result<Vec<ProtocolEntry>> {
        match fs::read(self.document_path(use_case, protocol_name)) {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Stores protocol rows in memory.
#[derive(Debug, Default)]
pub struct MemoryProtocolStore {
    rows: Mutex<BTreeMap<(String, String), Vec<ProtocolEntry>>>,
}

impl MemoryProtocolStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_rows<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<(String, String), Vec<ProtocolEntry>>) -> T,
    ) -> Result<T> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| DispatchError::storage("protocol store lock poisoned"))?;
        Ok(f(&mut rows))
    }
}

impl ProtocolStore for MemoryProtocolStore {
    fn delete(&self, use_case: &str, protocol_name: &str) -> Result<()> {
        self.with_rows(|rows| {
            rows.remove(&(use_case.to_string(), protocol_name.to_string()));
        })
    }

    fn store(&self, use_case: &str, protocol_name: &str, entries: &[ProtocolEntry]) -> Result<()> {
        self.with_rows(|rows| {
            rows.entry((use_case.to_string(), protocol_name.to_string()))
                .or_default()
                .extend_from_slice(entries);
        })
    }

    fn load(&self, use_case: &str, protocol_name: &str) -> Result<Vec<ProtocolEntry>> {
        self.with_rows(|rows| {
            rows.get(&(use_case.to_string(), protocol_name.to_string()))
                .cloned()
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str) -> ProtocolEntry {
        ProtocolEntry {
            file_name: name.to_string(),
            page_count: 1,
            department: None,
            box_id: None,
            pagination_id: None,
            document_type: None,
            coo_address: None,
            additional_properties: BTreeMap::new(),
        }
    }

    fn assert_replace_semantics(store: &dyn ProtocolStore) {
        store.store("uc", "batch/batch.csv", &[entry("a.pdf")]).unwrap();
        store.delete("uc", "batch/batch.csv").unwrap();
        store
            .store("uc", "batch/batch.csv", &[entry("b.pdf"), entry("c.pdf")])
            .unwrap();
        let rows = store.load("uc", "batch/batch.csv").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].file_name, "b.pdf");
        assert!(store.load("uc", "other.csv").unwrap().is_empty());
    }

    #[test]
    fn test_json_store_delete_then_store() {
        let temp = TempDir::new().unwrap();
        assert_replace_semantics(&JsonProtocolStore::new(temp.path()));
        assert!(temp.path().join("uc/batch__batch.csv.json").exists());
    }

    #[test]
    fn test_memory_store_delete_then_store() {
        assert_replace_semantics(&MemoryProtocolStore::new());
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        assert!(JsonProtocolStore::new(temp.path()).delete("uc", "x").is_ok());
    }
}
