//! Template store interface.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::Result;

/// File every template must carry at its root to be structurally valid.
pub const MANIFEST_FILE: &str = "template.json";

/// A file within a template tree, path relative to the template root.
#[derive(Debug, Clone)]
pub struct TemplateFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

impl TemplateFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// Read-only, file-tree-shaped template source keyed by template id.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Whether a template with this id exists.
    async fn exists(&self, template_id: &str) -> Result<bool>;

    /// The full file tree of a template.
    async fn list_files(&self, template_id: &str) -> Result<Vec<TemplateFile>>;
}
