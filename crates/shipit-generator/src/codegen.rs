//! Template rendering: tree copy, placeholder substitution, derived files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shipit_core::template::TemplateFile;
use shipit_core::{JobId, Result};
use tracing::debug;

use crate::request::GenerationRequest;

/// Directories never copied out of a template tree.
const SKIP_DIRS: [&str; 5] = [".git", "node_modules", "target", "__pycache__", ".terraform"];

/// Derived metadata file recording generation time and inputs.
pub const METADATA_FILE: &str = ".shipit-meta.json";

/// Derived local compose descriptor.
pub const COMPOSE_FILE: &str = "compose.generated.yaml";

// {{KEY}} tokens; keys match case-insensitively.
static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_-]*)\s*\}\}").unwrap());

/// One generated file, as echoed into the job result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub path: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

/// Copy the template tree into the workspace, substituting placeholders and
/// writing the derived configuration files.
pub async fn render(
    workspace: &Path,
    files: &[TemplateFile],
    request: &GenerationRequest,
    job_id: &JobId,
) -> Result<()> {
    let substitutions = request.substitutions();

    for file in files {
        if should_skip(&file.path) {
            continue;
        }
        let target = workspace.join(&file.path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Placeholders are only substituted in text files; binary content is
        // copied verbatim.
        match std::str::from_utf8(&file.contents) {
            Ok(text) => {
                let rendered = substitute(text, &substitutions);
                tokio::fs::write(&target, rendered.as_bytes()).await?;
            }
            Err(_) => {
                tokio::fs::write(&target, &file.contents).await?;
            }
        }
    }

    write_compose_file(workspace, request).await?;
    write_metadata_file(workspace, request, job_id).await?;

    debug!(workspace = %workspace.display(), files = files.len(), "template rendered");
    Ok(())
}

/// Literal `{{KEY}}` substitution, case-insensitive on the key. Unknown
/// tokens are preserved as written.
pub fn substitute(input: &str, substitutions: &HashMap<String, String>) -> String {
    TOKEN_REGEX
        .replace_all(input, |caps: &regex::Captures| {
            let key = caps[1].to_uppercase();
            substitutions
                .get(&key)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

fn should_skip(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
    })
}

async fn write_compose_file(workspace: &Path, request: &GenerationRequest) -> Result<()> {
    let compose = format!(
        "services:\n  {name}:\n    build: .\n    image: {name}:{env}\n    environment:\n      - ENVIRONMENT={env}\n    deploy:\n      resources:\n        limits:\n          cpus: \"{cpu}\"\n          memory: {memory}\n",
        name = request.service_name,
        env = request.environment,
        cpu = request.resources.cpu.as_deref().unwrap_or("1"),
        memory = request.resources.memory.as_deref().unwrap_or("512Mi"),
    );
    tokio::fs::write(workspace.join(COMPOSE_FILE), compose).await?;
    Ok(())
}

async fn write_metadata_file(
    workspace: &Path,
    request: &GenerationRequest,
    job_id: &JobId,
) -> Result<()> {
    let metadata = json!({
        "jobId": job_id.as_str(),
        "template": request.template,
        "serviceName": request.service_name,
        "environment": request.environment,
        "resources": request.resources,
        "requester": request.requester,
        "generatedAt": Utc::now(),
    });
    tokio::fs::write(
        workspace.join(METADATA_FILE),
        serde_json::to_vec_pretty(&metadata)
            .map_err(|e| shipit_core::Error::Internal(e.to_string()))?,
    )
    .await?;
    Ok(())
}

/// Walk the workspace and list every generated file with size and mtime.
pub async fn list_artifacts(workspace: &Path) -> Result<Vec<GeneratedFile>> {
    let mut artifacts = Vec::new();
    let mut pending: Vec<PathBuf> = vec![workspace.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            let metadata = entry.metadata().await?;
            let modified_at: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());
            let relative = path
                .strip_prefix(workspace)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            artifacts.push(GeneratedFile {
                path: relative,
                size_bytes: metadata.len(),
                modified_at,
            });
        }
    }

    artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(artifacts)
}
