//! Stage registry for the service-generation pipeline.

use serde::{Deserialize, Serialize};

/// Ordered checkpoints within the generation pipeline.
///
/// Stages are statically defined; only the current stage is recorded on the
/// job's progress. Failures in the first three stages abort the attempt,
/// failures in the tooling stages are absorbed into the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Initializing,
    ValidatingTemplate,
    GeneratingCode,
    InstallingDependencies,
    RunningTests,
    BuildingImage,
    Completed,
}

impl Stage {
    /// All stages in execution order.
    pub const SEQUENCE: [Stage; 7] = [
        Stage::Initializing,
        Stage::ValidatingTemplate,
        Stage::GeneratingCode,
        Stage::InstallingDependencies,
        Stage::RunningTests,
        Stage::BuildingImage,
        Stage::Completed,
    ];

    /// Progress percentage reported when the stage is entered.
    pub fn percentage(&self) -> u8 {
        match self {
            Stage::Initializing => 5,
            Stage::ValidatingTemplate => 15,
            Stage::GeneratingCode => 30,
            Stage::InstallingDependencies => 50,
            Stage::RunningTests => 70,
            Stage::BuildingImage => 85,
            Stage::Completed => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initializing => "Initializing",
            Stage::ValidatingTemplate => "ValidatingTemplate",
            Stage::GeneratingCode => "GeneratingCode",
            Stage::InstallingDependencies => "InstallingDependencies",
            Stage::RunningTests => "RunningTests",
            Stage::BuildingImage => "BuildingImage",
            Stage::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
