//! Cleanup processor: removes job workspaces.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use shipit_core::job::{Job, QueueName};
use shipit_core::processor::{Processor, ProgressReporter, StageError};
use shipit_core::stage::Stage;
use tracing::info;

/// Payload of a cleanup job: the workspace directory name to delete,
/// relative to the workspace root.
#[derive(Debug, Deserialize)]
struct CleanupRequest {
    workspace: String,
}

/// Deletes a generated workspace. Runs on the cleanup queue, which never
/// retries: a partial delete must not be silently re-run.
pub struct CleanupProcessor {
    workspace_root: PathBuf,
}

impl CleanupProcessor {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

#[async_trait]
impl Processor for CleanupProcessor {
    fn queue(&self) -> QueueName {
        QueueName::Cleanup
    }

    async fn process(
        &self,
        job: &Job,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value, StageError> {
        let request: CleanupRequest = serde_json::from_value(job.payload.clone())
            .map_err(|e| StageError::new(Stage::Initializing, format!("invalid payload: {e}")))?;

        // Directory names only; never resolve a path outside the root.
        if request.workspace.is_empty()
            || request.workspace.contains('/')
            || request.workspace.contains('\\')
            || request.workspace.contains("..")
        {
            return Err(StageError::new(
                Stage::Initializing,
                format!("invalid workspace name: {}", request.workspace),
            ));
        }

        progress(
            Stage::Initializing,
            Stage::Initializing.percentage(),
            "removing workspace",
        );

        let dir = self.workspace_root.join(&request.workspace);
        let removed = match tokio::fs::try_exists(&dir).await {
            Ok(true) => {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .map_err(|e| StageError::new(Stage::Initializing, e.to_string()))?;
                true
            }
            Ok(false) => false,
            Err(e) => return Err(StageError::new(Stage::Initializing, e.to_string())),
        };

        progress(
            Stage::Completed,
            Stage::Completed.percentage(),
            "workspace removed",
        );
        info!(job_id = %job.id, workspace = %request.workspace, removed, "cleanup finished");
        Ok(json!({
            "workspace": request.workspace,
            "removed": removed,
        }))
    }
}
