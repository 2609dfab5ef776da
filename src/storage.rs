// src/storage.rs

use crate::dates;
use crate::document::Document;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// File stem for a document: its number made path-safe, or a timestamp.
pub fn file_stem(document: &Document) -> String {
    match document.number() {
        Some(number) => sanitize(number),
        None => dates::timestamp(),
    }
}

pub(crate) fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Write `<base_dir>/json/<document_type>/<stem>.json`, pretty-printed
/// UTF-8 with non-ASCII text kept as is. An existing file with the same name
/// is overwritten.
pub fn save_document_json(
    document: &Document,
    base_dir: impl AsRef<Path>,
) -> Result<PathBuf, PersistenceError> {
    let save_dir = base_dir
        .as_ref()
        .join("json")
        .join(document.document_type().as_str());
    fs::create_dir_all(&save_dir).map_err(|source| PersistenceError::Io {
        path: save_dir.clone(),
        source,
    })?;

    let path = save_dir.join(format!("{}.json", file_stem(document)));
    let json = serde_json::to_string_pretty(document)?;
    fs::write(&path, json).map_err(|source| PersistenceError::Io {
        path: path.clone(),
        source,
    })?;

    info!(path = %path.display(), document_type = %document.document_type(), "Document saved");
    Ok(path)
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not a document: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn load_document_json(path: impl AsRef<Path>) -> Result<Document, LoadError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    })
}
