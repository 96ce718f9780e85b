//! Per-job working directories.

use std::path::{Path, PathBuf};

use shipit_core::{JobId, Result};
use tracing::debug;

/// Directory name for one job's workspace.
///
/// Unique per job id, so concurrent jobs generating the same service name
/// cannot delete each other's tree.
pub fn workspace_dir(root: &Path, service_name: &str, job_id: &JobId) -> PathBuf {
    root.join(format!("{}-{}", sanitize(service_name), job_id))
}

/// Allocate an isolated working directory for the current attempt.
///
/// A leftover directory from a prior attempt of the same job is deleted
/// first; each attempt starts from an empty tree.
pub async fn prepare(root: &Path, service_name: &str, job_id: &JobId) -> Result<PathBuf> {
    let dir = workspace_dir(root, service_name, job_id);
    if tokio::fs::try_exists(&dir).await? {
        debug!(path = %dir.display(), "removing leftover workspace from prior attempt");
        tokio::fs::remove_dir_all(&dir).await?;
    }
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Keep workspace names filesystem-safe; anything else becomes a dash.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_separators() {
        assert_eq!(sanitize("billing-api"), "billing-api");
        assert_eq!(sanitize("../evil name"), "---evil-name");
    }

    #[tokio::test]
    async fn test_prepare_resets_prior_attempt() {
        let root = tempfile::tempdir().unwrap();
        let id = JobId::from("job-1");

        let dir = prepare(root.path(), "svc", &id).await.unwrap();
        tokio::fs::write(dir.join("stale.txt"), b"old").await.unwrap();

        let dir = prepare(root.path(), "svc", &id).await.unwrap();
        assert!(!dir.join("stale.txt").exists());
    }
}
