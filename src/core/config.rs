//! Workflow configuration from YAML

use crate::core::{context::ExpressionContext, trigger::Trigger, Workflow};
use anyhow::{Context, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Events that start a run
    #[serde(rename = "on")]
    pub triggers: TriggerConfig,

    /// Concurrency group and cancellation policy
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,

    /// Environment passed to every step
    #[serde(default, deserialize_with = "string_map")]
    pub env: BTreeMap<String, String>,

    /// Jobs, in declaration order
    #[serde(deserialize_with = "ordered_jobs", serialize_with = "serialize_jobs")]
    pub jobs: Vec<(String, JobConfig)>,
}

/// The `on:` section: a single event, a list of events, or events with filters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerConfig {
    Event(String),
    Events(Vec<String>),
    Filtered(BTreeMap<String, Option<EventFilterConfig>>),
}

/// Filters attached to an event in the `on:` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventFilterConfig {
    #[serde(default)]
    pub branches: Option<Vec<String>>,

    #[serde(default)]
    pub branches_ignore: Option<Vec<String>>,

    #[serde(default)]
    pub tags: Option<Vec<String>>,

    #[serde(default)]
    pub types: Option<Vec<String>>,
}

/// Group used when `concurrency:` sets only the cancellation flag
pub const DEFAULT_CONCURRENCY_GROUP: &str = "${{ github.workflow }}-${{ github.ref }}";

fn default_concurrency_group() -> String {
    DEFAULT_CONCURRENCY_GROUP.to_string()
}

/// The `concurrency:` section: a bare group or a group with a cancellation flag
///
/// Workflows without the section have no group and never wait on each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConcurrencyConfig {
    Group(String),
    Policy {
        #[serde(default = "default_concurrency_group")]
        group: String,
        #[serde(default, rename = "cancel-in-progress")]
        cancel_in_progress: bool,
    },
}

impl ConcurrencyConfig {
    pub fn group(&self) -> &str {
        match self {
            ConcurrencyConfig::Group(group) => group,
            ConcurrencyConfig::Policy { group, .. } => group,
        }
    }

    pub fn cancel_in_progress(&self) -> bool {
        match self {
            ConcurrencyConfig::Group(_) => false,
            ConcurrencyConfig::Policy {
                cancel_in_progress, ..
            } => *cancel_in_progress,
        }
    }
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobConfig {
    /// Human-readable job name (may contain templates)
    #[serde(default)]
    pub name: Option<String>,

    /// Runner label; recorded for display only
    #[serde(default)]
    pub runs_on: Option<Value>,

    /// Matrix strategy
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    /// Job-level environment
    #[serde(default, deserialize_with = "string_map")]
    pub env: BTreeMap<String, String>,

    /// Timeout for each instance of the job
    #[serde(default)]
    pub timeout_minutes: Option<u64>,

    /// Steps, executed in order
    pub steps: Vec<StepConfig>,
}

/// `strategy:` section of a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrategyConfig {
    /// Axes plus optional `include`/`exclude` lists
    #[serde(default)]
    pub matrix: Option<Mapping>,

    /// Maximum instances of this job running at once
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepConfig {
    /// Optional step identifier
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command
    #[serde(default)]
    pub run: Option<String>,

    /// Built-in action reference
    #[serde(default)]
    pub uses: Option<String>,

    /// Action inputs
    #[serde(default, deserialize_with = "string_map")]
    pub with: BTreeMap<String, String>,

    /// Guard condition
    #[serde(default, rename = "if", deserialize_with = "optional_scalar")]
    pub guard: Option<String>,

    /// Step-level environment
    #[serde(default, deserialize_with = "string_map")]
    pub env: BTreeMap<String, String>,

    /// Shell used for `run` (default: bash)
    #[serde(default)]
    pub shell: Option<String>,

    /// Directory below the workspace to run in
    #[serde(default)]
    pub working_directory: Option<String>,

    /// Step timeout
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}

/// Convert a scalar YAML value to the string a template would see
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            scalar_to_string(&value)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| D::Error::custom(format!("value of '{}' must be a scalar", key)))
        })
        .collect()
}

fn optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar_to_string(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected a scalar")),
    }
}

fn ordered_jobs<'de, D>(deserializer: D) -> Result<Vec<(String, JobConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = Mapping::deserialize(deserializer)?;
    mapping
        .into_iter()
        .map(|(key, value)| {
            let id = key
                .as_str()
                .ok_or_else(|| D::Error::custom("job ids must be strings"))?
                .to_string();
            let job = serde_yaml::from_value(value)
                .map_err(|e| D::Error::custom(format!("job '{}': {}", id, e)))?;
            Ok((id, job))
        })
        .collect()
}

fn serialize_jobs<S>(jobs: &[(String, JobConfig)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(jobs.iter().map(|(id, job)| (id, job)))
}

impl TriggerConfig {
    /// Convert to trigger domain models
    pub fn to_triggers(&self) -> Result<Vec<Trigger>> {
        let entries: Vec<(String, EventFilterConfig)> = match self {
            TriggerConfig::Event(name) => vec![(name.clone(), EventFilterConfig::default())],
            TriggerConfig::Events(names) => names
                .iter()
                .map(|n| (n.clone(), EventFilterConfig::default()))
                .collect(),
            TriggerConfig::Filtered(map) => map
                .iter()
                .map(|(n, f)| (n.clone(), f.clone().unwrap_or_default()))
                .collect(),
        };

        entries
            .into_iter()
            .map(|(name, filter)| match name.as_str() {
                "push" => Ok(Trigger::Push {
                    branches: filter.branches,
                    branches_ignore: filter.branches_ignore.unwrap_or_default(),
                    tags: filter.tags,
                }),
                "create" => Ok(Trigger::Create),
                "pull_request" => Ok(Trigger::PullRequest {
                    branches: filter.branches,
                    types: filter.types.unwrap_or_default(),
                }),
                other => anyhow::bail!("Unsupported trigger event: {}", other),
            })
            .collect()
    }
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Workflow name must not be empty");
        }

        if self.triggers.to_triggers()?.is_empty() {
            anyhow::bail!("Workflow '{}' has no triggers", self.name);
        }

        if let Some(concurrency) = &self.concurrency {
            if concurrency.group().trim().is_empty() {
                anyhow::bail!("Concurrency group must not be empty");
            }
            ExpressionContext::new()
                .render(concurrency.group())
                .context("Invalid concurrency group")?;
        }

        if self.jobs.is_empty() {
            anyhow::bail!("Workflow '{}' has no jobs", self.name);
        }

        let mut seen_ids = HashSet::new();
        for (id, job) in &self.jobs {
            if !seen_ids.insert(id) {
                anyhow::bail!("Duplicate job ID: {}", id);
            }
            if job.steps.is_empty() {
                anyhow::bail!("Job '{}' has no steps", id);
            }
            if let Some(strategy) = &job.strategy {
                if strategy.max_parallel == Some(0) {
                    anyhow::bail!("Job '{}' has max-parallel of 0", id);
                }
            }
        }

        // Building the domain model checks steps, guards and matrices
        Workflow::from_config(self)?;

        Ok(())
    }

    /// Convert config to a Workflow domain model
    pub fn to_workflow(&self) -> Result<Workflow> {
        Workflow::from_config(self)
    }
}
