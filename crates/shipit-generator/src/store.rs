//! Filesystem-backed template store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shipit_core::template::{TemplateFile, TemplateStore};
use shipit_core::{Error, Result};

/// Template store over a directory tree: one subdirectory per template id.
pub struct FsTemplateStore {
    root: PathBuf,
}

impl FsTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Template ids are plain directory names; path separators and parent
    /// references are rejected rather than resolved.
    fn template_dir(&self, template_id: &str) -> Result<PathBuf> {
        if template_id.is_empty()
            || template_id.contains('/')
            || template_id.contains('\\')
            || template_id.contains("..")
        {
            return Err(Error::InvalidPayload(format!(
                "invalid template id: {template_id}"
            )));
        }
        Ok(self.root.join(template_id))
    }
}

#[async_trait]
impl TemplateStore for FsTemplateStore {
    async fn exists(&self, template_id: &str) -> Result<bool> {
        let dir = self.template_dir(template_id)?;
        Ok(tokio::fs::try_exists(&dir).await? && tokio::fs::metadata(&dir).await?.is_dir())
    }

    async fn list_files(&self, template_id: &str) -> Result<Vec<TemplateFile>> {
        let root = self.template_dir(template_id)?;
        if !self.exists(template_id).await? {
            return Err(Error::NotFound(format!("template {template_id}")));
        }

        let mut files = Vec::new();
        let mut pending: Vec<PathBuf> = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else {
                    let contents = tokio::fs::read(&path).await?;
                    let relative = path
                        .strip_prefix(&root)
                        .map_err(|e| Error::Internal(e.to_string()))?
                        .to_path_buf();
                    files.push(TemplateFile::new(relative, contents));
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}
