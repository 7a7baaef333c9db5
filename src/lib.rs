//! buildgate - an event-driven CI workflow runner

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use core::{Event, ExecutionStatus, JobInstance, RunResult, Verdict, Workflow};
pub use core::config::WorkflowConfig;
pub use execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
pub use runner::{CancelMode, ProcessRunner, RunnerConfig, RunnerError, StepRunner};
