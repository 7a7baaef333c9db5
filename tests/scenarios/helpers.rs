//! Test utility functions for buildgate scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use buildgate::core::config::WorkflowConfig;
use buildgate::core::{JobInstanceResult, RunResult, StepState, Verdict};
use buildgate::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use buildgate::runner::{Invocation, RunnerError, StepOutput, StepRequest, StepRunner};
use buildgate::Workflow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One step handed to the mock runner
#[derive(Debug, Clone)]
pub struct Invoked {
    pub run_id: Uuid,
    pub slug: String,
    pub step: String,
    pub invocation: Invocation,
    pub working_dir: PathBuf,
    pub env: std::collections::BTreeMap<String, String>,
}

/// Mock runner with scripted failures and delays
///
/// Commands containing one of the failure substrings exit with code 1.
/// Delays are keyed by command substring and are never interrupted by
/// cancellation, mirroring a step that runs to completion.
#[derive(Default, Clone)]
pub struct MockRunner {
    failures: Vec<String>,
    delays: Vec<(String, Duration)>,
    workspaces: Arc<Mutex<HashMap<PathBuf, (Uuid, String)>>>,
    log: Arc<Mutex<Vec<Invoked>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every shell step whose command contains `pattern`
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    /// Sleep before completing shell steps whose command contains `pattern`
    pub fn delaying(mut self, pattern: &str, delay: Duration) -> Self {
        self.delays.push((pattern.to_string(), delay));
        self
    }

    /// Handle to the invocation log, usable after the runner moved into an engine
    pub fn log(&self) -> Arc<Mutex<Vec<Invoked>>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl StepRunner for MockRunner {
    async fn prepare_workspace(&self, run_id: Uuid, slug: &str) -> Result<PathBuf, RunnerError> {
        let workspace = PathBuf::from("/ws").join(run_id.to_string()).join(slug);
        self.workspaces
            .lock()
            .unwrap()
            .insert(workspace.clone(), (run_id, slug.to_string()));
        Ok(workspace)
    }

    async fn run(
        &self,
        request: &StepRequest,
        _cancel: &CancellationToken,
    ) -> Result<StepOutput, RunnerError> {
        let (run_id, slug) = self
            .workspaces
            .lock()
            .unwrap()
            .get(&request.workspace)
            .cloned()
            .unwrap_or_default();

        self.log.lock().unwrap().push(Invoked {
            run_id,
            slug,
            step: request.name.clone(),
            invocation: request.invocation.clone(),
            working_dir: request.working_dir.clone(),
            env: request.env.clone(),
        });

        match &request.invocation {
            Invocation::Shell { command, .. } => {
                if let Some((_, delay)) = self.delays.iter().find(|(p, _)| command.contains(p.as_str())) {
                    tokio::time::sleep(*delay).await;
                }
                if self.failures.iter().any(|p| command.contains(p.as_str())) {
                    return Err(RunnerError::ToolInvocation {
                        program: "bash".to_string(),
                        code: 1,
                        output: format!("{}: failed", command),
                    });
                }
                Ok(StepOutput::new(format!("{}: ok", command)))
            }
            Invocation::Checkout { .. } => Ok(StepOutput::new(String::new())),
            Invocation::Toolchain { toolchain, .. } => {
                Ok(StepOutput::new(String::new()).with_export("RUSTUP_TOOLCHAIN", toolchain))
            }
        }
    }
}

/// Build a workflow from YAML
pub fn workflow_from_yaml(yaml: &str) -> Workflow {
    WorkflowConfig::from_yaml(yaml)
        .expect("Should parse YAML")
        .to_workflow()
        .expect("Should build workflow")
}

/// The CI workflow shipped with the repository
pub fn shipped_ci_workflow() -> Workflow {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/workflows/ci.yaml");
    WorkflowConfig::from_file(path)
        .expect("Should load workflows/ci.yaml")
        .to_workflow()
        .expect("Should build workflow")
}

/// Engine over a mock runner that records every execution event
pub fn recording_engine(
    runner: MockRunner,
) -> (ExecutionEngine<MockRunner>, Arc<Mutex<Vec<ExecutionEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let engine = ExecutionEngine::new(runner, SchedulingStrategy::Parallel)
        .with_event_handler(move |event| sink.lock().unwrap().push(event));
    (engine, events)
}

/// Commands the runner executed for one instance, in order
pub fn commands_for(log: &Mutex<Vec<Invoked>>, run_id: Uuid, slug: &str) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|i| i.run_id == run_id && i.slug == slug)
        .filter_map(|i| match &i.invocation {
            Invocation::Shell { command, .. } => Some(command.clone()),
            _ => None,
        })
        .collect()
}

pub fn instance<'a>(run: &'a RunResult, name: &str) -> &'a JobInstanceResult {
    run.instance(name)
        .unwrap_or_else(|| panic!("Instance '{}' not in run; have {:?}", name, instance_names(run)))
}

pub fn instance_names(run: &RunResult) -> Vec<String> {
    run.instances.iter().map(|i| i.name.clone()).collect()
}

/// Assert the verdict of one instance
pub fn assert_verdict(run: &RunResult, name: &str, verdict: Verdict) {
    let actual = instance(run, name).verdict;
    assert_eq!(actual, verdict, "Instance '{}' should be {:?}, got {:?}", name, verdict, actual);
}

/// Assert the state of one step of an instance
pub fn assert_step_state(run: &RunResult, name: &str, step: &str, expected: &str) {
    let inst = instance(run, name);
    let record = inst
        .steps
        .iter()
        .find(|s| s.name == step)
        .unwrap_or_else(|| panic!("Step '{}' not in instance '{}'", step, name));
    let actual = match record.state {
        StepState::Pending => "pending",
        StepState::Running { .. } => "running",
        StepState::Completed { .. } => "completed",
        StepState::Failed { .. } => "failed",
        StepState::Skipped { .. } => "skipped",
    };
    assert_eq!(actual, expected, "Step '{}' of '{}' should be {}", step, name, expected);
}
