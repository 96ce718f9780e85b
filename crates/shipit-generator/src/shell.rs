//! Process-backed shell runner with bounded duration.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use shipit_core::shell::{CommandOutput, ShellRunner};
use shipit_core::{Error, Result};
use tracing::debug;

/// Runs commands through `sh -c` with a hard timeout, so a hung tool cannot
/// occupy a worker slot forever.
pub struct ProcessShellRunner {
    timeout: Duration,
}

impl ProcessShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ShellRunner for ProcessShellRunner {
    async fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutput> {
        debug!(command, cwd = %cwd.display(), "running command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "command exceeded {}s: {command}",
                    self.timeout.as_secs()
                ))
            })??;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_exit_code_and_output() {
        let runner = ProcessShellRunner::new(Duration::from_secs(5));
        let dir = tempfile::tempdir().unwrap();

        let ok = runner.run("echo hello", dir.path()).await.unwrap();
        assert!(ok.success());
        assert_eq!(ok.stdout.trim(), "hello");

        let bad = runner.run("exit 3", dir.path()).await.unwrap();
        assert!(!bad.success());
        assert_eq!(bad.exit_code, 3);
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let runner = ProcessShellRunner::new(Duration::from_millis(50));
        let dir = tempfile::tempdir().unwrap();

        let err = runner.run("sleep 5", dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
