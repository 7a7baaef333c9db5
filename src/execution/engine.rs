//! Main execution engine - orchestrates workflow runs

use crate::{
    core::{
        Event, ExecutionStatus, FailureKind, JobInstance, JobInstanceResult, RunResult, StepRecord,
        StepState, Verdict, Workflow,
        expression::ExpressionError,
    },
    execution::{
        concurrency::{ConcurrencyRegistry, GroupEntry},
        scheduler::{ExecutionScheduler, SchedulingStrategy},
        StepExecutor,
    },
    runner::StepRunner,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a workflow run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// No trigger matched the event
    RunSkipped {
        workflow: String,
        event_name: String,
        git_ref: String,
    },
    /// A newer run cancelled `run_id`
    RunSuperseded {
        run_id: Uuid,
        superseded_by: Uuid,
        concurrency_key: String,
    },
    RunStarted {
        run_id: Uuid,
        workflow: String,
        event_name: String,
        git_ref: String,
        concurrency_key: Option<String>,
        instances: usize,
    },
    InstanceStarted {
        run_id: Uuid,
        instance: String,
    },
    StepStarted {
        run_id: Uuid,
        instance: String,
        step: String,
    },
    StepSkipped {
        run_id: Uuid,
        instance: String,
        step: String,
        reason: String,
    },
    StepCompleted {
        run_id: Uuid,
        instance: String,
        step: String,
        output: String,
    },
    StepFailed {
        run_id: Uuid,
        instance: String,
        step: String,
        kind: FailureKind,
        error: String,
    },
    InstanceFinished {
        run_id: Uuid,
        instance: String,
        verdict: Verdict,
    },
    RunFinished {
        run_id: Uuid,
        workflow: String,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of execution events to registered handlers
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Arc<Vec<EventHandler>>,
}

impl EventSink {
    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(event.clone());
        }
    }

    fn push(&mut self, handler: EventHandler) {
        Arc::make_mut(&mut self.handlers).push(handler);
    }
}

/// A run that matched a trigger and joined its concurrency group
pub struct AcceptedRun {
    run_id: Uuid,
    event: Event,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    concurrency_key: Option<String>,
    instances: Vec<JobInstance>,
    entry: Option<GroupEntry>,
}

impl AcceptedRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn concurrency_key(&self) -> Option<&str> {
        self.concurrency_key.as_deref()
    }

    /// Whether a newer run has already superseded this one
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Main workflow execution engine
///
/// One engine serves any number of concurrent dispatches; runs that share a
/// concurrency key are serialized through its registry.
pub struct ExecutionEngine<R> {
    executor: Arc<StepExecutor<R>>,
    registry: ConcurrencyRegistry,
    strategy: SchedulingStrategy,
    events: EventSink,
}

impl<R: StepRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, strategy: SchedulingStrategy) -> Self {
        Self {
            executor: Arc::new(StepExecutor::new(Arc::new(runner))),
            registry: ConcurrencyRegistry::new(),
            strategy,
            events: EventSink::default(),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.push(Arc::new(handler));
        self
    }

    pub fn registry(&self) -> &ConcurrencyRegistry {
        &self.registry
    }

    pub fn runner(&self) -> &R {
        self.executor.runner()
    }

    /// Evaluate `event` against `workflow` and, when a trigger matches, run it
    ///
    /// Returns `None` when no trigger matched. Template errors in the
    /// concurrency group or environment are returned before anything runs.
    pub async fn dispatch(
        &self,
        workflow: &Workflow,
        event: &Event,
    ) -> Result<Option<RunResult>, ExpressionError> {
        match self.accept(workflow, event)? {
            Some(run) => Ok(Some(self.execute(workflow, run).await)),
            None => Ok(None),
        }
    }

    /// Accept a run without executing it
    ///
    /// Joins the run's concurrency group immediately, superseding older runs
    /// when the policy cancels in progress. Accepting in arrival order and
    /// executing later keeps newest-wins ordering for concurrent dispatches.
    pub fn accept(
        &self,
        workflow: &Workflow,
        event: &Event,
    ) -> Result<Option<AcceptedRun>, ExpressionError> {
        if !workflow.is_triggered_by(event) {
            info!(
                "No trigger of '{}' matches {} {}",
                workflow.name,
                event.name(),
                event.git_ref()
            );
            self.events.emit(ExecutionEvent::RunSkipped {
                workflow: workflow.name.clone(),
                event_name: event.name().to_string(),
                git_ref: event.git_ref(),
            });
            return Ok(None);
        }

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let concurrency_key = workflow.concurrency_key(event)?;
        let instances = workflow.expand(event)?;

        let entry = match (&concurrency_key, &workflow.concurrency) {
            (Some(key), Some(policy)) => {
                let entry = self
                    .registry
                    .enter(key, run_id, cancel.clone(), policy.cancel_in_progress);
                if let Some(previous) = entry.superseded() {
                    self.events.emit(ExecutionEvent::RunSuperseded {
                        run_id: previous,
                        superseded_by: run_id,
                        concurrency_key: key.clone(),
                    });
                }
                Some(entry)
            }
            _ => None,
        };

        Ok(Some(AcceptedRun {
            run_id,
            event: event.clone(),
            started_at: Utc::now(),
            cancel,
            concurrency_key,
            instances,
            entry,
        }))
    }

    /// Wait for the run's concurrency group, then run all of its instances
    pub async fn execute(&self, workflow: &Workflow, run: AcceptedRun) -> RunResult {
        let AcceptedRun {
            run_id,
            event,
            started_at,
            cancel,
            concurrency_key,
            instances,
            entry,
        } = run;

        let _permit = match entry {
            Some(entry) => Some(entry.wait().await),
            None => None,
        };

        info!(
            "Starting run {} of '{}' for {} {} ({} instances)",
            run_id,
            workflow.name,
            event.name(),
            event.git_ref(),
            instances.len()
        );
        self.events.emit(ExecutionEvent::RunStarted {
            run_id,
            workflow: workflow.name.clone(),
            event_name: event.name().to_string(),
            git_ref: event.git_ref(),
            concurrency_key: concurrency_key.clone(),
            instances: instances.len(),
        });

        let results = self.run_instances(run_id, &instances, &cancel).await;
        let status = RunResult::aggregate(cancel.is_cancelled(), &results);

        info!("Run {} of '{}' finished: {:?}", run_id, workflow.name, status);
        self.events.emit(ExecutionEvent::RunFinished {
            run_id,
            workflow: workflow.name.clone(),
            status,
        });

        RunResult {
            run_id,
            workflow: workflow.name.clone(),
            event_name: event.name().to_string(),
            git_ref: event.git_ref(),
            concurrency_key,
            status,
            started_at,
            completed_at: Utc::now(),
            instances: results,
        }
    }

    /// Run every instance on its own task and collect results in declaration order
    async fn run_instances(
        &self,
        run_id: Uuid,
        instances: &[JobInstance],
        cancel: &CancellationToken,
    ) -> Vec<JobInstanceResult> {
        let scheduler = Arc::new(ExecutionScheduler::new(self.strategy, instances));
        let mut tasks = JoinSet::new();

        for (index, instance) in instances.iter().cloned().enumerate() {
            let executor = Arc::clone(&self.executor);
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            let events = self.events.clone();

            tasks.spawn(async move {
                let _slot = scheduler.acquire(&instance.job_id).await;
                let result = executor.execute(run_id, &instance, &cancel, &events).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<JobInstanceResult>> = vec![None; instances.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!("Instance task of run {} aborted: {}", run_id, e),
            }
        }

        results
            .into_iter()
            .zip(instances)
            .map(|(result, instance)| {
                result.unwrap_or_else(|| {
                    warn!("Instance '{}' produced no result", instance.name);
                    aborted(instance)
                })
            })
            .collect()
    }
}

/// Result for an instance whose task died without reporting
fn aborted(instance: &JobInstance) -> JobInstanceResult {
    JobInstanceResult {
        job_id: instance.job_id.clone(),
        name: instance.name.clone(),
        matrix: instance.matrix.clone(),
        verdict: Verdict::Failed,
        steps: instance
            .steps
            .iter()
            .map(|step| StepRecord {
                name: step.display_name(&instance.context),
                state: StepState::Pending,
            })
            .collect(),
    }
}
