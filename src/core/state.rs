//! Execution state models

use crate::core::matrix::MatrixCombination;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall workflow run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run is waiting for its concurrency group
    Pending,
    /// Run is currently executing
    Running,
    /// Every job instance passed
    Completed,
    /// At least one job instance failed
    Failed,
    /// Run was superseded by a newer run in its concurrency group
    Cancelled,
}

impl ExecutionStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionStatus::Completed => 0,
            ExecutionStatus::Cancelled => 2,
            _ => 1,
        }
    }
}

/// Verdict of a single job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Passed,
    Failed,
    Canceled,
}

/// Which class of failure stopped a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// An external tool exited nonzero or could not be started
    ToolInvocation,
    /// Checkout or toolchain installation failed
    EnvironmentSetup,
    /// The step exceeded its timeout
    Timeout,
    /// The run was superseded while the step was in progress
    Cancellation,
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Step has not started (and, once the instance is done, never will)
    Pending,
    /// Step is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Step exited successfully
    Completed {
        output: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed
    Failed {
        kind: FailureKind,
        error: String,
        output: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step guard evaluated to false
    Skipped {
        reason: String,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    /// Whether the step was dispatched to a runner
    pub fn was_executed(&self) -> bool {
        matches!(
            self,
            StepState::Running { .. } | StepState::Completed { .. } | StepState::Failed { .. }
        )
    }
}

/// Record of one step within a job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Display name of the step
    pub name: String,

    /// Final state
    pub state: StepState,
}

/// Result of one job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstanceResult {
    /// Job id from the definition
    pub job_id: String,

    /// Display name, including the matrix suffix
    pub name: String,

    /// Matrix values of this instance
    pub matrix: MatrixCombination,

    /// Instance verdict
    pub verdict: Verdict,

    /// Per-step detail, in definition order
    pub steps: Vec<StepRecord>,
}

impl JobInstanceResult {
    /// First failed step, if any
    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps
            .iter()
            .find(|s| matches!(s.state, StepState::Failed { .. }))
    }

    /// Number of steps that were dispatched to a runner
    pub fn executed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.state.was_executed()).count()
    }
}

/// Aggregate result of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow: String,

    /// Name of the triggering event
    pub event_name: String,

    /// Ref of the triggering event
    pub git_ref: String,

    /// Concurrency key, if the workflow declares a group
    pub concurrency_key: Option<String>,

    /// Final status
    pub status: ExecutionStatus,

    /// When the run was accepted
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub completed_at: DateTime<Utc>,

    /// Per-instance detail
    pub instances: Vec<JobInstanceResult>,
}

impl RunResult {
    /// Aggregate instance verdicts into a run status
    ///
    /// A canceled run is reported as canceled regardless of instance verdicts.
    pub fn aggregate(cancelled: bool, instances: &[JobInstanceResult]) -> ExecutionStatus {
        if cancelled || instances.iter().any(|i| i.verdict == Verdict::Canceled) {
            ExecutionStatus::Cancelled
        } else if instances.iter().any(|i| i.verdict == Verdict::Failed) {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Passed instances; a canceled run counts none
    pub fn passed_instances(&self) -> usize {
        if self.status == ExecutionStatus::Cancelled {
            return 0;
        }
        self.count(Verdict::Passed)
    }

    pub fn failed_instances(&self) -> usize {
        self.count(Verdict::Failed)
    }

    pub fn canceled_instances(&self) -> usize {
        self.count(Verdict::Canceled)
    }

    fn count(&self, verdict: Verdict) -> usize {
        self.instances.iter().filter(|i| i.verdict == verdict).count()
    }

    /// Look up an instance by display name
    pub fn instance(&self, name: &str) -> Option<&JobInstanceResult> {
        self.instances.iter().find(|i| i.name == name)
    }
}
