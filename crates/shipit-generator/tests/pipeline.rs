//! End-to-end pipeline tests with scripted collaborators.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use shipit_core::job::{Job, JobProgress, JobStatus, QueueName};
use shipit_core::processor::{Processor, ProgressReporter};
use shipit_core::shell::{CommandOutput, ShellRunner};
use shipit_core::stage::Stage;
use shipit_core::template::{MANIFEST_FILE, TemplateFile, TemplateStore};
use shipit_core::{JobId, Result};
use shipit_generator::GenerationProcessor;

/// In-memory template store seeded per test.
struct MemoryTemplateStore {
    templates: HashMap<String, Vec<TemplateFile>>,
}

impl MemoryTemplateStore {
    fn with_rest_api() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "rest-api".to_string(),
            vec![
                TemplateFile::new(MANIFEST_FILE, br#"{"name":"rest-api"}"#.to_vec()),
                TemplateFile::new(
                    "package.json",
                    br#"{"name": "{{SERVICE_NAME}}", "scripts": {"test": "node test.js"}}"#
                        .to_vec(),
                ),
                TemplateFile::new(
                    "src/server.js",
                    b"// {{SERVICE_NAME}} on {{ENVIRONMENT}}".to_vec(),
                ),
                TemplateFile::new(".git/HEAD", b"ref: refs/heads/main".to_vec()),
            ],
        );
        Self { templates }
    }

    fn with_manifestless(mut self) -> Self {
        self.templates.insert(
            "broken".to_string(),
            vec![TemplateFile::new("README.md", b"no manifest here".to_vec())],
        );
        self
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn exists(&self, template_id: &str) -> Result<bool> {
        Ok(self.templates.contains_key(template_id))
    }

    async fn list_files(&self, template_id: &str) -> Result<Vec<TemplateFile>> {
        self.templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| shipit_core::Error::NotFound(format!("template {template_id}")))
    }
}

/// Shell runner that scripts exit codes by command substring.
struct ScriptedShell {
    failures: Vec<&'static str>,
    invocations: Mutex<Vec<String>>,
}

impl ScriptedShell {
    fn succeeding() -> Self {
        Self {
            failures: Vec::new(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(failures: Vec<&'static str>) -> Self {
        Self {
            failures,
            invocations: Mutex::new(Vec::new()),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShellRunner for ScriptedShell {
    async fn run(&self, command: &str, _cwd: &Path) -> Result<CommandOutput> {
        self.invocations.lock().unwrap().push(command.to_string());
        let fail = self.failures.iter().any(|f| command.contains(f));
        Ok(CommandOutput {
            exit_code: if fail { 1 } else { 0 },
            stdout: String::new(),
            stderr: if fail { "scripted failure".to_string() } else { String::new() },
        })
    }
}

fn generation_job(payload: serde_json::Value) -> Job {
    let now = Utc::now();
    Job {
        id: JobId::generate(),
        queue: QueueName::Generation,
        payload,
        status: JobStatus::Active,
        progress: JobProgress::initial("attempt 1 started", now),
        priority: 0,
        attempts_made: 1,
        max_attempts: 3,
        result: None,
        failure: None,
        created_at: now,
        processed_at: Some(now),
        finished_at: None,
        not_before: None,
    }
}

/// Collects every progress report for order/monotonicity assertions.
fn recording_progress() -> (ProgressReporter, Arc<Mutex<Vec<(Stage, u8)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reporter: ProgressReporter = Arc::new(move |stage, percentage, _message| {
        sink.lock().unwrap().push((stage, percentage));
    });
    (reporter, seen)
}

fn processor(
    store: MemoryTemplateStore,
    shell: Arc<ScriptedShell>,
    root: &Path,
) -> GenerationProcessor {
    GenerationProcessor::new(Arc::new(store), shell, root)
}

#[tokio::test]
async fn full_pipeline_reports_stages_in_order() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(ScriptedShell::succeeding());
    let processor = processor(MemoryTemplateStore::with_rest_api(), shell.clone(), root.path());

    let job = generation_job(json!({
        "serviceName": "billing-api",
        "template": "rest-api",
        "environment": "dev",
    }));
    let (reporter, seen) = recording_progress();

    let result = processor.process(&job, reporter).await.unwrap();

    let reports = seen.lock().unwrap().clone();
    let expected = [
        (Stage::Initializing, 5),
        (Stage::ValidatingTemplate, 15),
        (Stage::GeneratingCode, 30),
        (Stage::InstallingDependencies, 50),
        (Stage::RunningTests, 70),
        (Stage::BuildingImage, 85),
        (Stage::Completed, 100),
    ];
    assert_eq!(reports, expected);

    // Percentages are non-decreasing and finish at 100.
    assert!(reports.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(reports.last().unwrap().1, 100);

    // Artifacts present, inputs echoed back.
    assert!(!result["artifacts"]["files"].as_array().unwrap().is_empty());
    assert_eq!(result["metadata"]["template"], "rest-api");
    assert_eq!(result["metadata"]["environment"], "dev");
    let tag = result["imageTag"].as_str().unwrap();
    assert!(tag.starts_with("billing-api:dev-"));

    // Placeholders got substituted in the rendered tree.
    let rendered = std::fs::read_to_string(
        shipit_generator::workspace::workspace_dir(root.path(), "billing-api", &job.id)
            .join("src/server.js"),
    )
    .unwrap();
    assert_eq!(rendered, "// billing-api on dev");

    // Skipped directories never land in the workspace.
    assert!(
        !shipit_generator::workspace::workspace_dir(root.path(), "billing-api", &job.id)
            .join(".git")
            .exists()
    );
}

#[tokio::test]
async fn missing_template_fails_at_validating_template() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(ScriptedShell::succeeding());
    let processor = processor(MemoryTemplateStore::with_rest_api(), shell.clone(), root.path());

    let job = generation_job(json!({
        "serviceName": "billing-api",
        "template": "does-not-exist",
    }));
    let (reporter, _) = recording_progress();

    let err = processor.process(&job, reporter).await.unwrap_err();
    assert_eq!(err.stage, Stage::ValidatingTemplate);
    assert!(err.message.contains("does-not-exist"));

    // The pipeline aborted before any tooling ran.
    assert!(shell.commands().is_empty());
}

#[tokio::test]
async fn manifestless_template_is_structurally_invalid() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(ScriptedShell::succeeding());
    let processor = processor(
        MemoryTemplateStore::with_rest_api().with_manifestless(),
        shell,
        root.path(),
    );

    let job = generation_job(json!({
        "serviceName": "billing-api",
        "template": "broken",
    }));
    let (reporter, _) = recording_progress();

    let err = processor.process(&job, reporter).await.unwrap_err();
    assert_eq!(err.stage, Stage::ValidatingTemplate);
    assert!(err.message.contains(MANIFEST_FILE));
}

#[tokio::test]
async fn failed_dependency_install_still_completes() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(ScriptedShell::failing_on(vec!["npm install"]));
    let processor = processor(MemoryTemplateStore::with_rest_api(), shell.clone(), root.path());

    let job = generation_job(json!({
        "serviceName": "billing-api",
        "template": "rest-api",
    }));
    let (reporter, seen) = recording_progress();

    let result = processor.process(&job, reporter).await.unwrap();

    assert_eq!(result["dependencyInstall"]["status"], "failed");
    assert_eq!(result["testResults"]["status"], "skipped");
    assert_eq!(result["imageTag"], serde_json::Value::Null);

    // The pipeline still walked every stage to completion.
    let reports = seen.lock().unwrap().clone();
    assert_eq!(reports.last().unwrap(), &(Stage::Completed, 100));

    // Neither tests nor the image build were attempted on a broken tree.
    let commands = shell.commands();
    assert!(commands.iter().any(|c| c.contains("npm install")));
    assert!(!commands.iter().any(|c| c.contains("npm test")));
    assert!(!commands.iter().any(|c| c.contains("docker build")));
}

#[tokio::test]
async fn failed_tests_are_recorded_not_fatal() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(ScriptedShell::failing_on(vec!["npm test"]));
    let processor = processor(MemoryTemplateStore::with_rest_api(), shell, root.path());

    let job = generation_job(json!({
        "serviceName": "billing-api",
        "template": "rest-api",
    }));
    let (reporter, _) = recording_progress();

    let result = processor.process(&job, reporter).await.unwrap();
    assert_eq!(result["testResults"]["status"], "failed");
    // A failing test run does not block the image build.
    assert!(result["imageTag"].is_string());
}

#[tokio::test]
async fn image_build_can_be_disabled_by_caller() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(ScriptedShell::succeeding());
    let processor = processor(MemoryTemplateStore::with_rest_api(), shell.clone(), root.path());

    let job = generation_job(json!({
        "serviceName": "billing-api",
        "template": "rest-api",
        "skipImageBuild": true,
    }));
    let (reporter, _) = recording_progress();

    let result = processor.process(&job, reporter).await.unwrap();
    assert_eq!(result["imageTag"], serde_json::Value::Null);
    assert_eq!(result["imageBuild"]["status"], "skipped");
    assert!(!shell.commands().iter().any(|c| c.contains("docker build")));
}

#[tokio::test]
async fn failed_image_build_records_absent_tag() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(ScriptedShell::failing_on(vec!["docker build"]));
    let processor = processor(MemoryTemplateStore::with_rest_api(), shell, root.path());

    let job = generation_job(json!({
        "serviceName": "billing-api",
        "template": "rest-api",
    }));
    let (reporter, _) = recording_progress();

    let result = processor.process(&job, reporter).await.unwrap();
    assert_eq!(result["imageTag"], serde_json::Value::Null);
    assert_eq!(result["imageBuild"]["status"], "failed");
    assert_eq!(result["testResults"]["status"], "succeeded");
}
