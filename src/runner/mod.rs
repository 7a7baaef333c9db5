//! Step runners - execute resolved steps against external tools

pub mod actions;
pub mod config;
pub mod error;
pub mod process;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use actions::BuiltinAction;
pub use config::{CancelMode, RunnerConfig};
pub use error::{RunnerError, StepOutput};
pub use process::ProcessRunner;

/// A step with templates rendered and actions resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run a command through a shell
    Shell {
        command: String,
        shell: Option<String>,
    },
    /// Clone the source into the workspace
    Checkout {
        target: Option<String>,
    },
    /// Install a toolchain and pin it for later steps
    Toolchain {
        toolchain: String,
        components: Vec<String>,
    },
}

/// Everything a runner needs to execute one step
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// Step display name
    pub name: String,

    /// What to run
    pub invocation: Invocation,

    /// Instance workspace root
    pub workspace: PathBuf,

    /// Directory to run in (workspace or below)
    pub working_dir: PathBuf,

    /// Merged environment
    pub env: BTreeMap<String, String>,
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Create the isolated workspace of a job instance
    async fn prepare_workspace(&self, run_id: Uuid, slug: &str) -> Result<PathBuf, RunnerError>;

    /// Execute one step; `cancel` fires when the run is superseded
    async fn run(
        &self,
        request: &StepRequest,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, RunnerError>;

    /// Dispose of an instance workspace
    async fn release_workspace(&self, _workspace: &std::path::Path) {}
}
