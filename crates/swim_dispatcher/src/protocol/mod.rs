//! Protocols: delimited manifest files listing the documents of a folder.

mod reconcile;

pub use reconcile::{reconcile, ProtocolEngine, ProtocolOutcome, Reconciliation};

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One protocol row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolEntry {
    pub file_name: String,
    pub page_count: u32,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub box_id: Option<String>,
    #[serde(default)]
    pub pagination_id: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub coo_address: Option<String>,
    /// Columns without a dedicated field, by header name.
    #[serde(default)]
    pub additional_properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    FileName,
    PageCount,
    Department,
    BoxId,
    PaginationId,
    DocumentType,
    CooAddress,
}

impl Column {
    fn from_header(header: &str) -> Option<Self> {
        match header {
            "PDF" | "Dateiname" => Some(Self::FileName),
            "Seiten" => Some(Self::PageCount),
            "RefEB" => Some(Self::Department),
            "KistenID" => Some(Self::BoxId),
            "Paginiernummer" => Some(Self::PaginationId),
            "Belegart" | "Dokumentart" | "Dokumentenart" | "Dokumenttyp" => Some(Self::DocumentType),
            "COO-Adresse" => Some(Self::CooAddress),
            _ => None,
        }
    }
}

/// Parse protocol content.
///
/// `skip_rows` lines are dropped before the header row. Columns are matched
/// by header name in any order. Blank lines are ignored.
pub fn parse_protocol(content: &[u8], delimiter: char, skip_rows: usize) -> Result<Vec<ProtocolEntry>> {
    let delimiter = u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| DispatchError::Protocol(format!("Delimiter '{}' is not ASCII", delimiter)))?;

    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    let body = skip_lines(content, skip_rows);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body);

    let headers = reader
        .headers()
        .map_err(|e| DispatchError::Protocol(format!("Can't read protocol header: {}", e)))?
        .clone();
    let columns: Vec<Option<Column>> = headers.iter().map(Column::from_header).collect();
    for (required, name) in [(Column::FileName, "PDF"), (Column::PageCount, "Seiten")] {
        if !columns.contains(&Some(required)) {
            return Err(DispatchError::Protocol(format!(
                "Missing required protocol column {}",
                name
            )));
        }
    }

    let mut entries = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| DispatchError::Protocol(format!("Invalid protocol row {}: {}", idx + 1, e)))?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let mut known: HashMap<Column, String> = HashMap::new();
        let mut additional_properties = BTreeMap::new();
        for (i, value) in record.iter().enumerate() {
            match columns.get(i).copied().flatten() {
                Some(column) => {
                    known.insert(column, value.to_string());
                }
                None => {
                    let header = headers.get(i).unwrap_or_default();
                    if !header.is_empty() {
                        additional_properties.insert(header.to_string(), value.to_string());
                    }
                }
            }
        }

        let mut take = |column: Column| known.remove(&column).filter(|v| !v.is_empty());
        let file_name = take(Column::FileName).ok_or_else(|| {
            DispatchError::Protocol(format!("Protocol row {} has no file name", idx + 1))
        })?;
        let page_count = take(Column::PageCount)
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| {
                DispatchError::Protocol(format!("Protocol row {} has no valid page count", idx + 1))
            })?;
        entries.push(ProtocolEntry {
            file_name,
            page_count,
            department: take(Column::Department),
            box_id: take(Column::BoxId),
            pagination_id: take(Column::PaginationId),
            document_type: take(Column::DocumentType),
            coo_address: take(Column::CooAddress),
            additional_properties,
        });
    }
    Ok(entries)
}

fn skip_lines(content: &[u8], count: usize) -> &[u8] {
    let mut rest = content;
    for _ in 0..count {
        match rest.iter().position(|b| *b == b'\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return &[],
        }
    }
    rest
}
