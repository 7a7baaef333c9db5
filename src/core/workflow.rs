//! Workflow domain model

use crate::core::{
    config::{scalar_to_string, JobConfig, WorkflowConfig},
    context::ExpressionContext,
    expression::ExpressionError,
    matrix::{describe_combination, Matrix, MatrixCombination},
    step::Step,
    trigger::{Event, Trigger},
};
use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Concurrency group template plus cancellation flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyPolicy {
    /// Group template, e.g. `${{ github.workflow }}-${{ github.ref }}`
    pub group: String,

    /// Cancel an in-flight run when a newer one joins the group
    pub cancel_in_progress: bool,
}

impl ConcurrencyPolicy {
    /// Render the concurrency key for a run
    pub fn key(&self, ctx: &ExpressionContext) -> Result<String, ExpressionError> {
        ctx.render(&self.group)
    }
}

/// A job definition
#[derive(Debug, Clone)]
pub struct Job {
    /// Job ID (key under `jobs:`)
    pub id: String,

    /// Optional display name template
    pub name: Option<String>,

    /// Runner label, display only
    pub runs_on: Option<String>,

    /// Matrix (empty when the job has none)
    pub matrix: Matrix,

    /// Maximum instances of this job running at once
    pub max_parallel: Option<usize>,

    /// Job-level environment
    pub env: BTreeMap<String, String>,

    /// Timeout for each instance in seconds
    pub timeout_secs: Option<u64>,

    /// Steps in execution order
    pub steps: Arc<[Step]>,
}

impl Job {
    fn from_config(id: &str, config: &JobConfig) -> Result<Self> {
        let steps = config
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                Step::from_config(step)
                    .with_context(|| format!("Job '{}' step {} is invalid", id, i + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        let strategy = config.strategy.clone().unwrap_or_default();
        let matrix = match &strategy.matrix {
            Some(mapping) => parse_matrix(mapping)
                .with_context(|| format!("Job '{}' has an invalid matrix", id))?,
            None => Matrix::default(),
        };
        if matrix.expand().is_empty() {
            anyhow::bail!("Job '{}' matrix expands to no combinations", id);
        }

        Ok(Job {
            id: id.to_string(),
            name: config.name.clone(),
            runs_on: config.runs_on.as_ref().and_then(|v| match v {
                Value::Sequence(labels) => Some(
                    labels
                        .iter()
                        .filter_map(scalar_to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                other => scalar_to_string(other),
            }),
            matrix,
            max_parallel: strategy.max_parallel,
            env: config.env.clone(),
            timeout_secs: config.timeout_minutes.map(|m| m.saturating_mul(60)),
            steps: steps.into(),
        })
    }

    /// Display name of one instance of this job
    fn instance_name(&self, combination: &MatrixCombination, ctx: &ExpressionContext) -> String {
        let suffix = describe_combination(combination);
        match &self.name {
            Some(name) if name.contains("${{") => ctx.render(name).unwrap_or_else(|_| name.clone()),
            Some(name) if suffix.is_empty() => name.clone(),
            Some(name) => format!("{} ({})", name, suffix),
            None if suffix.is_empty() => self.id.clone(),
            None => format!("{} ({})", self.id, suffix),
        }
    }
}

fn parse_matrix(mapping: &Mapping) -> Result<Matrix> {
    let mut axes = Vec::new();
    let mut include = Vec::new();
    let mut exclude = Vec::new();

    for (key, value) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("matrix keys must be strings"))?;
        match name {
            "include" => include = parse_combinations(value)?,
            "exclude" => exclude = parse_combinations(value)?,
            axis => {
                let Value::Sequence(items) = value else {
                    anyhow::bail!("matrix axis '{}' must be a list", axis);
                };
                let values = items
                    .iter()
                    .map(|item| {
                        scalar_to_string(item).ok_or_else(|| {
                            anyhow::anyhow!("matrix axis '{}' must contain scalars", axis)
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                if values.is_empty() {
                    anyhow::bail!("matrix axis '{}' has no values", axis);
                }
                axes.push((axis.to_string(), values));
            }
        }
    }

    Ok(Matrix::new(axes).with_include(include).with_exclude(exclude))
}

fn parse_combinations(value: &Value) -> Result<Vec<MatrixCombination>> {
    let Value::Sequence(items) = value else {
        anyhow::bail!("matrix include/exclude must be a list");
    };
    items
        .iter()
        .map(|item| {
            let Value::Mapping(entry) = item else {
                anyhow::bail!("matrix include/exclude entries must be mappings");
            };
            entry
                .iter()
                .map(|(k, v)| {
                    let key = k
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("matrix keys must be strings"))?;
                    let value = scalar_to_string(v)
                        .ok_or_else(|| anyhow::anyhow!("matrix value for '{}' must be a scalar", key))?;
                    Ok((key.to_string(), value))
                })
                .collect()
        })
        .collect()
}

/// One concrete, independently executed instance of a job
#[derive(Debug, Clone)]
pub struct JobInstance {
    /// Job ID
    pub job_id: String,

    /// Display name (`clippy (stable)`)
    pub name: String,

    /// Matrix values of this instance
    pub matrix: MatrixCombination,

    /// Workflow and job environment, rendered
    pub env: BTreeMap<String, String>,

    /// Expression context (github, matrix and env values)
    pub context: ExpressionContext,

    /// Steps in execution order
    pub steps: Arc<[Step]>,

    /// Instance timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Per-job parallelism cap
    pub max_parallel: Option<usize>,
}

impl JobInstance {
    /// Directory-safe identifier for the instance workspace
    pub fn slug(&self) -> String {
        let mut slug: String = self
            .job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        for value in self.matrix.values() {
            slug.push('-');
            slug.extend(
                value
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' }),
            );
        }
        slug
    }
}

/// A workflow (pipeline definition)
///
/// Built once from configuration and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Workflow name
    pub name: String,

    /// Events that start a run
    pub triggers: Vec<Trigger>,

    /// Concurrency policy, if a group is declared
    pub concurrency: Option<ConcurrencyPolicy>,

    /// Workflow-level environment
    pub env: BTreeMap<String, String>,

    /// Jobs in declaration order
    pub jobs: Vec<Job>,
}

impl Workflow {
    /// Create a workflow from configuration
    pub fn from_config(config: &WorkflowConfig) -> Result<Self> {
        let jobs = config
            .jobs
            .iter()
            .map(|(id, job)| Job::from_config(id, job))
            .collect::<Result<Vec<_>>>()?;

        Ok(Workflow {
            name: config.name.clone(),
            triggers: config.triggers.to_triggers()?,
            concurrency: config.concurrency.as_ref().map(|c| ConcurrencyPolicy {
                group: c.group().to_string(),
                cancel_in_progress: c.cancel_in_progress(),
            }),
            env: config.env.clone(),
            jobs,
        })
    }

    /// Get a job by ID
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Whether any trigger matches the event
    pub fn is_triggered_by(&self, event: &Event) -> bool {
        self.triggers.iter().any(|t| t.matches(event))
    }

    /// Base expression context for a run
    pub fn context_for(&self, event: &Event) -> ExpressionContext {
        ExpressionContext::for_event(&self.name, event)
    }

    /// Concurrency key for a run triggered by `event`
    pub fn concurrency_key(&self, event: &Event) -> Result<Option<String>, ExpressionError> {
        self.concurrency
            .as_ref()
            .map(|policy| policy.key(&self.context_for(event)))
            .transpose()
    }

    /// Total number of job instances after matrix expansion
    pub fn instance_count(&self) -> usize {
        self.jobs.iter().map(|j| j.matrix.expand().len()).sum()
    }

    /// Expand every job into its matrix instances
    pub fn expand(&self, event: &Event) -> Result<Vec<JobInstance>, ExpressionError> {
        let base = self.context_for(event);
        let mut instances = Vec::new();

        for job in &self.jobs {
            for combination in job.matrix.expand() {
                let matrix_ctx = base.clone().with_matrix(&combination);

                let mut env = matrix_ctx.render_map(&self.env)?;
                let with_workflow_env = matrix_ctx.clone().with_env(&env);
                env.extend(with_workflow_env.render_map(&job.env)?);

                let context = matrix_ctx.with_env(&env);
                instances.push(JobInstance {
                    job_id: job.id.clone(),
                    name: job.instance_name(&combination, &context),
                    matrix: combination,
                    env,
                    context,
                    steps: Arc::clone(&job.steps),
                    timeout_secs: job.timeout_secs,
                    max_parallel: job.max_parallel,
                });
            }
        }

        Ok(instances)
    }
}
