//! The service-generation pipeline processor.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipit_core::job::{Job, QueueName};
use shipit_core::processor::{Processor, ProgressReporter, StageError};
use shipit_core::shell::ShellRunner;
use shipit_core::stage::Stage;
use shipit_core::template::{MANIFEST_FILE, TemplateFile, TemplateStore};
use tracing::info;

use crate::codegen::{self, GeneratedFile};
use crate::request::{GenerationRequest, ResourceHints};
use crate::toolchain::{self, StepOutcome};
use crate::workspace;

/// Structured output of a completed generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub artifacts: ArtifactListing,
    pub dependency_install: StepOutcome,
    pub test_results: StepOutcome,
    pub image_build: StepOutcome,
    pub image_tag: Option<String>,
    pub metadata: GenerationMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactListing {
    pub files: Vec<GeneratedFile>,
}

/// Echo of the inputs, recorded alongside the artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub template: String,
    pub service_name: String,
    pub environment: String,
    pub resources: ResourceHints,
    pub requester: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Executes generation jobs stage by stage.
///
/// Failures in the structural stages (workspace, template, codegen) abort the
/// attempt; failures in the tooling stages (install, test, image) are folded
/// into the result and the job still completes.
pub struct GenerationProcessor {
    templates: Arc<dyn TemplateStore>,
    shell: Arc<dyn ShellRunner>,
    workspace_root: PathBuf,
}

impl GenerationProcessor {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        shell: Arc<dyn ShellRunner>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            templates,
            shell,
            workspace_root: workspace_root.into(),
        }
    }

    /// Resolve and structurally validate the template, returning its tree.
    async fn validate_template(&self, template_id: &str) -> Result<Vec<TemplateFile>, String> {
        let exists = self
            .templates
            .exists(template_id)
            .await
            .map_err(|e| e.to_string())?;
        if !exists {
            return Err(format!("template '{template_id}' does not exist"));
        }

        let files = self
            .templates
            .list_files(template_id)
            .await
            .map_err(|e| e.to_string())?;
        let has_manifest = files
            .iter()
            .any(|f| f.path.as_os_str() == MANIFEST_FILE);
        if !has_manifest {
            return Err(format!(
                "template '{template_id}' is invalid: missing {MANIFEST_FILE}"
            ));
        }
        Ok(files)
    }
}

#[async_trait]
impl Processor for GenerationProcessor {
    fn queue(&self) -> QueueName {
        QueueName::Generation
    }

    async fn process(
        &self,
        job: &Job,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value, StageError> {
        let request = GenerationRequest::from_payload(&job.payload)
            .map_err(|e| StageError::new(Stage::Initializing, e))?;

        progress(
            Stage::Initializing,
            Stage::Initializing.percentage(),
            "preparing workspace",
        );
        let workspace = workspace::prepare(&self.workspace_root, &request.service_name, &job.id)
            .await
            .map_err(|e| StageError::new(Stage::Initializing, e.to_string()))?;

        progress(
            Stage::ValidatingTemplate,
            Stage::ValidatingTemplate.percentage(),
            &format!("resolving template '{}'", request.template),
        );
        let files = self
            .validate_template(&request.template)
            .await
            .map_err(|e| StageError::new(Stage::ValidatingTemplate, e))?;

        progress(
            Stage::GeneratingCode,
            Stage::GeneratingCode.percentage(),
            "rendering template",
        );
        codegen::render(&workspace, &files, &request, &job.id)
            .await
            .map_err(|e| StageError::new(Stage::GeneratingCode, e.to_string()))?;
        let artifacts = codegen::list_artifacts(&workspace)
            .await
            .map_err(|e| StageError::new(Stage::GeneratingCode, e.to_string()))?;

        progress(
            Stage::InstallingDependencies,
            Stage::InstallingDependencies.percentage(),
            "installing dependencies",
        );
        let dependency_install =
            toolchain::install_dependencies(&self.shell, &workspace, &request).await;

        // A failed install leaves the tree unusable for the later tooling
        // steps; the generated source itself is still valid.
        let deps_ok = !matches!(dependency_install, StepOutcome::Failed { .. });

        progress(
            Stage::RunningTests,
            Stage::RunningTests.percentage(),
            "running tests",
        );
        let test_results = if deps_ok {
            toolchain::run_tests(&self.shell, &workspace, &request).await
        } else {
            StepOutcome::skipped_with("dependency install failed")
        };

        progress(
            Stage::BuildingImage,
            Stage::BuildingImage.percentage(),
            "building image",
        );
        let (image_tag, image_build) = if request.skip_image_build {
            (None, StepOutcome::skipped_with("disabled by caller"))
        } else if !deps_ok {
            (None, StepOutcome::skipped_with("dependency install failed"))
        } else {
            toolchain::build_image(&self.shell, &workspace, &request).await
        };

        progress(
            Stage::Completed,
            Stage::Completed.percentage(),
            "generation complete",
        );
        info!(
            job_id = %job.id,
            service = %request.service_name,
            files = artifacts.len(),
            image_tag = image_tag.as_deref().unwrap_or("none"),
            "service generated"
        );

        let result = GenerationResult {
            artifacts: ArtifactListing { files: artifacts },
            dependency_install,
            test_results,
            image_build,
            image_tag,
            metadata: GenerationMetadata {
                template: request.template.clone(),
                service_name: request.service_name.clone(),
                environment: request.environment.clone(),
                resources: request.resources.clone(),
                requester: request.requester.clone(),
                generated_at: Utc::now(),
            },
        };
        serde_json::to_value(&result).map_err(|e| StageError::new(Stage::Completed, e.to_string()))
    }
}
