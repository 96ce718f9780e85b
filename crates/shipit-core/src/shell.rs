//! Shell runner interface.

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

/// Captured output of an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output, stderr last, trimmed for result objects and logs.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

/// Executes external commands (dependency install, test run, image build).
///
/// Invocations are bounded-duration, carry no implicit retry, and block only
/// the calling worker's slot.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutput>;
}
