//! Step executor - runs the steps of one job instance

use crate::{
    core::{
        ExpressionContext, FailureKind, JobInstance, JobInstanceResult, Step, StepAction,
        StepRecord, StepState, Verdict,
    },
    execution::engine::{EventSink, ExecutionEvent},
    runner::{BuiltinAction, Invocation, RunnerError, StepRequest, StepRunner},
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Executes the steps of a job instance, strictly in order, stopping at the first failure
pub struct StepExecutor<R> {
    runner: Arc<R>,
}

impl<R: StepRunner> StepExecutor<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Execute a job instance and report its verdict with per-step detail
    pub async fn execute(
        &self,
        run_id: Uuid,
        instance: &JobInstance,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> JobInstanceResult {
        let mut records: Vec<StepRecord> = instance
            .steps
            .iter()
            .map(|step| StepRecord {
                name: step.display_name(&instance.context),
                state: StepState::Pending,
            })
            .collect();

        if cancel.is_cancelled() {
            info!("Instance '{}' cancelled before start", instance.name);
            return finish(instance, Verdict::Canceled, records, run_id, events);
        }

        info!("Starting instance: {}", instance.name);
        events.emit(ExecutionEvent::InstanceStarted {
            run_id,
            instance: instance.name.clone(),
        });

        let workspace = match self.runner.prepare_workspace(run_id, &instance.slug()).await {
            Ok(path) => path,
            Err(e) => {
                error!("Workspace for '{}' unavailable: {}", instance.name, e);
                if let Some(first) = records.first_mut() {
                    let now = Utc::now();
                    first.state = StepState::Failed {
                        kind: FailureKind::EnvironmentSetup,
                        error: e.to_string(),
                        output: String::new(),
                        started_at: now,
                        failed_at: now,
                    };
                }
                return finish(instance, Verdict::Failed, records, run_id, events);
            }
        };

        let steps = self.run_steps(run_id, instance, &workspace, &mut records, cancel, events);
        let verdict = match instance.timeout_secs {
            Some(secs) => match timeout(Duration::from_secs(secs), steps).await {
                Ok(verdict) => verdict,
                Err(_) => {
                    warn!("Instance '{}' timed out after {}s", instance.name, secs);
                    time_out_running(&mut records, secs, run_id, &instance.name, events);
                    Verdict::Failed
                }
            },
            None => steps.await,
        };

        self.runner.release_workspace(&workspace).await;
        finish(instance, verdict, records, run_id, events)
    }

    async fn run_steps(
        &self,
        run_id: Uuid,
        instance: &JobInstance,
        workspace: &Path,
        records: &mut [StepRecord],
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Verdict {
        let mut exports = BTreeMap::new();

        for (index, step) in instance.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "Instance '{}' cancelled; {} step(s) not started",
                    instance.name,
                    records.len() - index
                );
                return Verdict::Canceled;
            }

            let record = &mut records[index];
            if !step.should_run(&instance.context) {
                let reason = format!(
                    "condition `{}` is false",
                    step.guard_source.as_deref().unwrap_or_default()
                );
                debug!("Skipping step '{}': {}", record.name, reason);
                events.emit(ExecutionEvent::StepSkipped {
                    run_id,
                    instance: instance.name.clone(),
                    step: record.name.clone(),
                    reason: reason.clone(),
                });
                record.state = StepState::Skipped { reason };
                continue;
            }

            let started_at = Utc::now();
            record.state = StepState::Running { started_at };
            events.emit(ExecutionEvent::StepStarted {
                run_id,
                instance: instance.name.clone(),
                step: record.name.clone(),
            });

            let result = match build_request(&record.name, step, instance, workspace, &exports) {
                Ok(request) => {
                    debug!("Step '{}' invocation: {:?}", record.name, request.invocation);
                    match step.timeout_secs {
                        Some(secs) => timeout(Duration::from_secs(secs), self.runner.run(&request, cancel))
                            .await
                            .unwrap_or(Err(RunnerError::Timeout(secs))),
                        None => self.runner.run(&request, cancel).await,
                    }
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(output) => {
                    exports.extend(output.exports);
                    events.emit(ExecutionEvent::StepCompleted {
                        run_id,
                        instance: instance.name.clone(),
                        step: record.name.clone(),
                        output: output.output.clone(),
                    });
                    record.state = StepState::Completed {
                        output: output.output,
                        started_at,
                        completed_at: Utc::now(),
                    };
                }
                Err(e) => {
                    error!("Step '{}' of '{}' failed: {}", record.name, instance.name, e);
                    events.emit(ExecutionEvent::StepFailed {
                        run_id,
                        instance: instance.name.clone(),
                        step: record.name.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                    record.state = StepState::Failed {
                        kind: e.kind(),
                        error: e.to_string(),
                        output: e.output().to_string(),
                        started_at,
                        failed_at: Utc::now(),
                    };
                    return match e {
                        RunnerError::Cancelled => Verdict::Canceled,
                        _ => Verdict::Failed,
                    };
                }
            }
        }

        Verdict::Passed
    }
}

/// Render templates and resolve actions for one step
fn build_request(
    name: &str,
    step: &Step,
    instance: &JobInstance,
    workspace: &Path,
    exports: &BTreeMap<String, String>,
) -> Result<StepRequest, RunnerError> {
    let mut env = instance.env.clone();
    env.extend(exports.iter().map(|(k, v)| (k.clone(), v.clone())));
    let ctx = instance.context.clone().with_env(&env);
    env.extend(ctx.render_map(&step.env)?);
    let ctx: ExpressionContext = ctx.with_env(&env);

    let (invocation, working_dir) = match &step.action {
        StepAction::Run {
            command,
            shell,
            working_directory,
        } => {
            let working_dir = match working_directory {
                Some(dir) => workspace.join(ctx.render(dir)?),
                None => workspace.to_path_buf(),
            };
            let invocation = Invocation::Shell {
                command: ctx.render(command)?,
                shell: shell.clone(),
            };
            (invocation, working_dir)
        }
        StepAction::Uses { action, with } => {
            let with = ctx.render_map(with)?;
            let sha = ctx.get("github.sha").map(String::as_str);
            let invocation = BuiltinAction::parse(action)?.invocation(&with, sha)?;
            (invocation, workspace.to_path_buf())
        }
    };

    Ok(StepRequest {
        name: name.to_string(),
        invocation,
        workspace: workspace.to_path_buf(),
        working_dir,
        env,
    })
}

/// Mark the step that was running when the instance timeout fired
fn time_out_running(
    records: &mut [StepRecord],
    secs: u64,
    run_id: Uuid,
    instance: &str,
    events: &EventSink,
) {
    for record in records.iter_mut() {
        if let StepState::Running { started_at } = record.state {
            let error = RunnerError::Timeout(secs).to_string();
            events.emit(ExecutionEvent::StepFailed {
                run_id,
                instance: instance.to_string(),
                step: record.name.clone(),
                kind: FailureKind::Timeout,
                error: error.clone(),
            });
            record.state = StepState::Failed {
                kind: FailureKind::Timeout,
                error,
                output: String::new(),
                started_at,
                failed_at: Utc::now(),
            };
        }
    }
}

fn finish(
    instance: &JobInstance,
    verdict: Verdict,
    steps: Vec<StepRecord>,
    run_id: Uuid,
    events: &EventSink,
) -> JobInstanceResult {
    info!("Instance '{}' finished: {:?}", instance.name, verdict);
    events.emit(ExecutionEvent::InstanceFinished {
        run_id,
        instance: instance.name.clone(),
        verdict,
    });
    JobInstanceResult {
        job_id: instance.job_id.clone(),
        name: instance.name.clone(),
        matrix: instance.matrix.clone(),
        verdict,
        steps,
    }
}
