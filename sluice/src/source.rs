//! Local document source.
//!
//! Documents are read from `.json` files, holding one document or an array of
//! documents, and from `.ndjson` files, holding one document per line. The
//! file name is used as partition key for documents without
//! `Metadata.Filename`.
use std::path::{Path, PathBuf};

use futures::{Stream, StreamExt, stream};
use serde_json::Value;
use sluice_import_core::Document;
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::error::{IoSnafu, JsonParseSnafu, Result};

const JSON_EXTENSION: &str = "json";
const NDJSON_EXTENSION: &str = "ndjson";

/// Returns the document files at `path`, sorted by name.
///
/// `path` is either a file or a directory. Files in a directory without a
/// `.json` or `.ndjson` extension are ignored.
pub async fn list_files(path: &Path) -> Result<Vec<PathBuf>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .context(IoSnafu { path })?;

    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut entries = tokio::fs::read_dir(path)
        .await
        .context(IoSnafu { path })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.context(IoSnafu { path })? {
        let file_type = entry.file_type().await.context(IoSnafu { path })?;
        let file = entry.path();
        if file_type.is_file() && is_document_file(&file) {
            files.push(file);
        }
    }

    files.sort();
    Ok(files)
}

/// Reads all documents of a file.
pub async fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .context(IoSnafu { path })?;

    let partition_key = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    let values = if has_extension(path, NDJSON_EXTENSION) {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()
            .context(JsonParseSnafu { path })?
    } else {
        match serde_json::from_str(&content).context(JsonParseSnafu { path })? {
            Value::Array(values) => values,
            value => vec![value],
        }
    };

    let mut documents = Vec::with_capacity(values.len());
    for value in values {
        if !value.is_object() {
            warn!(path = %path.display(), "Skipping value that is not a JSON object");
            continue;
        }
        documents.push(Document::from_json(value, partition_key.as_deref()));
    }

    debug!(path = %path.display(), documents = documents.len(), "Read documents");
    Ok(documents)
}

/// Streams the documents of the files, one file at a time.
///
/// Files that cannot be read are logged and skipped.
pub fn document_stream(files: Vec<PathBuf>) -> impl Stream<Item = Document> {
    stream::iter(files)
        .then(|file| async move {
            match read_documents(&file).await {
                Ok(documents) => documents,
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable file");
                    Vec::new()
                }
            }
        })
        .flat_map(stream::iter)
}

fn is_document_file(path: &Path) -> bool {
    has_extension(path, JSON_EXTENSION) || has_extension(path, NDJSON_EXTENSION)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
