//! Workflow execution engine

pub mod concurrency;
pub mod engine;
pub mod executor;
pub mod scheduler;

pub use concurrency::{ConcurrencyRegistry, GroupEntry, RunPermit};
pub use engine::{EventHandler, EventSink, ExecutionEngine, ExecutionEvent};
pub use executor::StepExecutor;
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
