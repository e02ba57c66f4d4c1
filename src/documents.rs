//! Lookup of the per-model documents shipped alongside the database.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::debug;

/// A document that exists and can be handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentHandle {
    /// Identifier as stored on the model row.
    pub document_id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

pub trait DocumentResolver {
    /// Resolve a stored document identifier; `None` when nothing is available for it.
    fn resolve(&self, document_id: &str) -> Option<DocumentHandle>;
}

/// Resolves document identifiers as file names inside one directory.
#[derive(Debug, Clone)]
pub struct FsDocumentResolver {
    docs_dir: PathBuf,
}

impl FsDocumentResolver {
    pub fn new(docs_dir: impl Into<PathBuf>) -> Self {
        Self {
            docs_dir: docs_dir.into(),
        }
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }
}

/// Only a bare file name is accepted; anything that would leave the directory is refused.
fn is_plain_file_name(document_id: &str) -> bool {
    let mut components = Path::new(document_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

impl DocumentResolver for FsDocumentResolver {
    fn resolve(&self, document_id: &str) -> Option<DocumentHandle> {
        let document_id = document_id.trim();
        if document_id.is_empty() || !is_plain_file_name(document_id) {
            debug!(document_id, "refusing document identifier that is not a plain file name");
            return None;
        }
        let path = self.docs_dir.join(document_id);
        let meta = std::fs::metadata(&path).ok().filter(|m| m.is_file())?;
        Some(DocumentHandle {
            document_id: document_id.to_string(),
            path,
            size_bytes: meta.len(),
        })
    }
}
