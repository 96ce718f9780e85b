//! Tooling stages: dependency install, test run, image build.
//!
//! Everything here is advisory: failures are recorded in the job result and
//! never abort the pipeline.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shipit_core::shell::ShellRunner;
use tracing::{info, warn};

use crate::request::GenerationRequest;

/// Upper bound kept from command output in result objects.
const OUTPUT_SNIPPET_LEN: usize = 4_000;

/// Outcome of one advisory tooling step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum StepOutcome {
    Succeeded { note: Option<String> },
    Failed { note: String },
    Skipped { note: String },
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }

    pub fn skipped_with(note: impl Into<String>) -> Self {
        StepOutcome::Skipped { note: note.into() }
    }
}

/// Install the generated project's dependencies.
pub async fn install_dependencies(
    shell: &Arc<dyn ShellRunner>,
    workspace: &Path,
    request: &GenerationRequest,
) -> StepOutcome {
    let Some(command) = detect_install_command(workspace) else {
        return StepOutcome::skipped_with("no dependency manifest found");
    };

    info!(service = %request.service_name, command, "installing dependencies");
    match shell.run(command, workspace).await {
        Ok(output) if output.success() => StepOutcome::Succeeded { note: None },
        Ok(output) => {
            warn!(service = %request.service_name, exit_code = output.exit_code, "dependency install failed");
            StepOutcome::Failed {
                note: snippet(&output.combined()),
            }
        }
        Err(e) => {
            warn!(service = %request.service_name, error = %e, "dependency install did not run");
            StepOutcome::Failed {
                note: e.to_string(),
            }
        }
    }
}

/// Run the generated project's tests, if it declares a test command.
pub async fn run_tests(
    shell: &Arc<dyn ShellRunner>,
    workspace: &Path,
    request: &GenerationRequest,
) -> StepOutcome {
    let Some(command) = detect_test_command(workspace) else {
        // Absence of a test command is success-with-note, not failure.
        return StepOutcome::skipped_with("no test command declared");
    };

    info!(service = %request.service_name, command, "running tests");
    match shell.run(command, workspace).await {
        Ok(output) if output.success() => StepOutcome::Succeeded {
            note: Some(snippet(&output.combined())),
        },
        Ok(output) => StepOutcome::Failed {
            note: snippet(&output.combined()),
        },
        Err(e) => StepOutcome::Failed {
            note: e.to_string(),
        },
    }
}

/// Build a container image for the generated service.
///
/// Returns the image tag on success, `None` when the build failed or was
/// impossible; the tag is recorded as absent and the job still completes.
pub async fn build_image(
    shell: &Arc<dyn ShellRunner>,
    workspace: &Path,
    request: &GenerationRequest,
) -> (Option<String>, StepOutcome) {
    let tag = format!(
        "{}:{}-{}",
        request.service_name,
        request.environment,
        Utc::now().timestamp()
    );
    let command = format!("docker build -t {tag} .");

    info!(service = %request.service_name, tag, "building image");
    match shell.run(&command, workspace).await {
        Ok(output) if output.success() => (Some(tag), StepOutcome::Succeeded { note: None }),
        Ok(output) => {
            warn!(service = %request.service_name, exit_code = output.exit_code, "image build failed");
            (
                None,
                StepOutcome::Failed {
                    note: snippet(&output.combined()),
                },
            )
        }
        Err(e) => (
            None,
            StepOutcome::Failed {
                note: e.to_string(),
            },
        ),
    }
}

fn detect_install_command(workspace: &Path) -> Option<&'static str> {
    if workspace.join("package.json").exists() {
        Some("npm install")
    } else if workspace.join("Cargo.toml").exists() {
        Some("cargo fetch")
    } else if workspace.join("go.mod").exists() {
        Some("go mod download")
    } else if workspace.join("requirements.txt").exists() {
        Some("pip install -r requirements.txt")
    } else {
        None
    }
}

fn detect_test_command(workspace: &Path) -> Option<&'static str> {
    if has_npm_test_script(workspace) {
        Some("npm test")
    } else if workspace.join("Cargo.toml").exists() {
        Some("cargo test")
    } else if workspace.join("go.mod").exists() {
        Some("go test ./...")
    } else if has_make_test_target(workspace) {
        Some("make test")
    } else {
        None
    }
}

fn has_npm_test_script(workspace: &Path) -> bool {
    let Ok(raw) = std::fs::read(workspace.join("package.json")) else {
        return false;
    };
    let Ok(manifest) = serde_json::from_slice::<serde_json::Value>(&raw) else {
        return false;
    };
    manifest
        .get("scripts")
        .and_then(|s| s.get("test"))
        .and_then(|t| t.as_str())
        .is_some_and(|t| !t.trim().is_empty())
}

fn has_make_test_target(workspace: &Path) -> bool {
    std::fs::read_to_string(workspace.join("Makefile"))
        .map(|m| m.lines().any(|l| l.starts_with("test:")))
        .unwrap_or(false)
}

fn snippet(output: &str) -> String {
    if output.len() <= OUTPUT_SNIPPET_LEN {
        output.to_string()
    } else {
        let mut end = OUTPUT_SNIPPET_LEN;
        while !output.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &output[..end])
    }
}
