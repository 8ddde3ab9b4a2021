//! Text output of a built [`OpenApiDocument`].
//!
//! The application serves the document as compact JSON; these helpers produce
//! human-readable JSON or YAML for export, e.g. from a build script or a test that
//! snapshots the API surface.

use crate::openapi_builder::OpenApiDocument;
use anyhow::{Context, Result};
use log::debug;
use std::fs;
use std::path::Path;

/// Serializes a document to YAML.
///
/// # Errors
///
/// Returns an error if serialization fails.
///
/// # Example
///
/// ```
/// use fastapi_reflect::metadata::MetadataCache;
/// use fastapi_reflect::openapi_builder::{Info, OpenApiBuilder};
/// use fastapi_reflect::serializer::serialize_yaml;
/// use std::sync::Arc;
///
/// let builder = OpenApiBuilder::new(Info::new("Pets", "1.0.0"), Arc::new(MetadataCache::new()));
/// let yaml = serialize_yaml(&builder.build()).unwrap();
/// assert!(yaml.contains("title: Pets"));
/// ```
pub fn serialize_yaml(doc: &OpenApiDocument) -> Result<String> {
    debug!("Serializing OpenAPI document to YAML");
    serde_yaml::to_string(doc).context("Failed to serialize OpenAPI document to YAML")
}

/// Serializes a document to indented JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn serialize_json(doc: &OpenApiDocument) -> Result<String> {
    debug!("Serializing OpenAPI document to JSON");
    serde_json::to_string_pretty(doc).context("Failed to serialize OpenAPI document to JSON")
}

/// Writes `content` to `path`, creating missing parent directories and replacing
/// any existing file.
///
/// # Errors
///
/// Returns an error if a directory or the file cannot be written.
pub fn write_to_file(content: &str, path: &Path) -> Result<()> {
    debug!("Writing content to file: {}", path.display());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, content)
        .with_context(|| format!("Failed to write to file: {}", path.display()))?;

    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

/// Writes a document as YAML when `path` ends in `.yaml` or `.yml`, as JSON otherwise.
pub fn write_document(doc: &OpenApiDocument, path: &Path) -> Result<()> {
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let content = if yaml {
        serialize_yaml(doc)?
    } else {
        serialize_json(doc)?
    };
    write_to_file(&content, path)
}
