//! Persistence layer for workflow run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::core::RunResult;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow: String,

    /// Triggering event name
    pub event_name: String,

    /// Triggering ref
    pub git_ref: String,

    /// Concurrency key, if any
    pub concurrency_key: Option<String>,

    /// Final status
    pub status: ExecutionStatus,

    /// When the run was accepted
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub completed_at: DateTime<Utc>,

    pub passed_instances: usize,
    pub failed_instances: usize,
    pub canceled_instances: usize,
    pub total_instances: usize,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List the runs of a workflow, newest first
    async fn list_runs(&self, workflow: &str, limit: usize) -> Result<Vec<RunSummary>>;

    /// List all workflow names with recorded runs
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
    by_workflow: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let previous = self.runs.write().await.insert(run.run_id, run.clone());

        if previous.is_none() {
            self.by_workflow
                .write()
                .await
                .entry(run.workflow.clone())
                .or_default()
                .push(run.run_id);
        }

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow: &str, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let by_workflow = self.by_workflow.read().await;

        let mut result: Vec<RunSummary> = by_workflow
            .get(workflow)
            .map(|ids| ids.iter().filter_map(|id| runs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.by_workflow.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Create a summary from a run result
pub fn create_summary(run: &RunResult) -> RunSummary {
    RunSummary {
        run_id: run.run_id,
        workflow: run.workflow.clone(),
        event_name: run.event_name.clone(),
        git_ref: run.git_ref.clone(),
        concurrency_key: run.concurrency_key.clone(),
        status: run.status,
        started_at: run.started_at,
        completed_at: run.completed_at,
        passed_instances: run.passed_instances(),
        failed_instances: run.failed_instances(),
        canceled_instances: run.canceled_instances(),
        total_instances: run.instances.len(),
    }
}
