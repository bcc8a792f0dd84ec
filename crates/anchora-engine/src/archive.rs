//! The backup artifact format.
//!
//! One ZIP archive per execution, one `<collection>.json` entry per
//! collection. An entry is either a JSON array of extended-JSON documents or
//! the fallback `{"error": "..."}` object for a collection that failed to
//! read.

use std::io::{Cursor, Write};

use serde_json::{json, Value};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{EngineError, EngineResult};

/// DEFLATE level for archive entries.
const DEFLATE_LEVEL: i64 = 9;

/// Streaming-ish archive assembly: collections are appended one at a time
/// and the archive is finalized into a single byte vector.
pub struct ArchiveBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    entries: Vec<String>,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    /// Start an empty archive.
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            entries: Vec::new(),
        }
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(DEFLATE_LEVEL))
    }

    /// Append a collection as a JSON array entry.
    pub fn add_collection(&mut self, name: &str, documents: &[Value]) -> EngineResult<()> {
        let bytes = serde_json::to_vec_pretty(documents)
            .map_err(|e| EngineError::Archive(e.to_string()))?;
        self.add_entry(name, &bytes)
    }

    /// Append the error fallback entry for a collection that failed to read.
    pub fn add_error(&mut self, name: &str, message: &str) -> EngineResult<()> {
        let bytes = serde_json::to_vec_pretty(&json!({ "error": message }))
            .map_err(|e| EngineError::Archive(e.to_string()))?;
        self.add_entry(name, &bytes)
    }

    fn add_entry(&mut self, name: &str, bytes: &[u8]) -> EngineResult<()> {
        let entry = format!("{}.json", name);
        self.writer
            .start_file(entry.clone(), Self::options())
            .map_err(|e| EngineError::Archive(e.to_string()))?;
        self.writer
            .write_all(bytes)
            .map_err(|e| EngineError::Archive(e.to_string()))?;
        self.entries.push(entry);
        Ok(())
    }

    /// Entry names added so far, in order.
    pub fn entry_names(&self) -> &[String] {
        &self.entries
    }

    /// Finalize the archive into its byte stream.
    pub fn finish(self) -> EngineResult<Vec<u8>> {
        let cursor = self
            .writer
            .finish()
            .map_err(|e| EngineError::Archive(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Destination folder path for an execution's artifact.
pub fn artifact_folder(connection_name: &str, database_name: &str) -> String {
    format!(
        "backup/{}/{}",
        sanitize_component(connection_name),
        sanitize_component(database_name)
    )
}

/// Artifact file name, stamped with a compact ISO 8601 instant.
pub fn artifact_file_name(
    connection_name: &str,
    database_name: &str,
    at: chrono::DateTime<chrono::Utc>,
) -> String {
    format!(
        "backup_{}_{}_{}.zip",
        sanitize_component(connection_name),
        sanitize_component(database_name),
        at.format("%Y%m%dT%H%M%SZ")
    )
}
