//! Metadata side files (`<name>.json` next to a document).

use crate::error::{DispatchError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

pub const METADATA_DOCUMENT_KEY: &str = "Document";
pub const METADATA_INDEX_FIELDS_KEY: &str = "IndexFields";
pub const METADATA_KEY_KEY: &str = "Name";
pub const METADATA_VALUE_KEY: &str = "Value";

/// Parsed metadata: the raw document plus its index fields by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    raw: Value,
    index_fields: BTreeMap<String, String>,
}

impl Metadata {
    pub fn parse(content: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(content)
            .map_err(|e| DispatchError::Metadata(format!("Error while parsing metadata json: {}", e)))?;
        let index_fields = extract_index_fields(&raw)?;
        Ok(Self { raw, index_fields })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn index_fields(&self) -> &BTreeMap<String, String> {
        &self.index_fields
    }

    /// Value of a single index field.
    pub fn index_field(&self, name: &str) -> Option<&str> {
        self.index_fields.get(name).map(String::as_str)
    }
}

fn extract_index_fields(root: &Value) -> Result<BTreeMap<String, String>> {
    let document = root.get(METADATA_DOCUMENT_KEY).ok_or_else(|| {
        DispatchError::Metadata(format!("Missing '{}' in metadata JSON", METADATA_DOCUMENT_KEY))
    })?;
    let fields = document
        .get(METADATA_INDEX_FIELDS_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            DispatchError::Metadata(format!(
                "Missing or invalid '{}' in metadata JSON",
                METADATA_INDEX_FIELDS_KEY
            ))
        })?;

    let mut index_fields = BTreeMap::new();
    for field in fields {
        let key = text_of(field.get(METADATA_KEY_KEY));
        if key.is_empty() {
            continue;
        }
        index_fields.insert(key, text_of(field.get(METADATA_VALUE_KEY)));
    }
    Ok(index_fields)
}

/// Scalar values as text; missing, null and nested values become empty.
fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}
