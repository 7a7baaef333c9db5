//! Step domain model

use crate::core::{
    config::StepConfig,
    context::ExpressionContext,
    expression::{Expression, ExpressionError},
};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// What a step does
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Run a shell command
    Run {
        command: String,
        shell: Option<String>,
        working_directory: Option<String>,
    },
    /// Invoke a built-in action (`actions/checkout@v4`)
    Uses {
        action: String,
        with: BTreeMap<String, String>,
    },
}

/// A single step of a job
#[derive(Debug, Clone)]
pub struct Step {
    /// Optional step identifier
    pub id: Option<String>,

    /// Optional human-readable name (may contain templates)
    pub name: Option<String>,

    /// The action to perform
    pub action: StepAction,

    /// Guard condition; the step is skipped when it evaluates false
    pub guard: Option<Expression>,

    /// Source text of the guard, for display
    pub guard_source: Option<String>,

    /// Step-level environment
    pub env: BTreeMap<String, String>,

    /// Step timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl Step {
    /// Create a step from a step config
    pub fn from_config(config: &StepConfig) -> Result<Self> {
        let action = match (&config.run, &config.uses) {
            (Some(command), None) => StepAction::Run {
                command: command.clone(),
                shell: config.shell.clone(),
                working_directory: config.working_directory.clone(),
            },
            (None, Some(action)) => StepAction::Uses {
                action: action.clone(),
                with: config.with.clone(),
            },
            (Some(_), Some(_)) => anyhow::bail!("step cannot have both 'run' and 'uses'"),
            (None, None) => anyhow::bail!("step needs either 'run' or 'uses'"),
        };

        let guard = config
            .guard
            .as_deref()
            .map(Expression::parse)
            .transpose()
            .with_context(|| format!("invalid 'if' condition: {}", config.guard.as_deref().unwrap_or_default()))?;

        Ok(Step {
            id: config.id.clone(),
            name: config.name.clone(),
            action,
            guard,
            guard_source: config.guard.clone(),
            env: config.env.clone(),
            timeout_secs: config.timeout_minutes.map(|m| m.saturating_mul(60)),
        })
    }

    /// Display name with templates rendered
    pub fn display_name(&self, ctx: &ExpressionContext) -> String {
        if let Some(name) = &self.name {
            return ctx.render(name).unwrap_or_else(|_| name.clone());
        }
        match &self.action {
            StepAction::Run { command, .. } => {
                format!("Run {}", command.lines().next().unwrap_or_default().trim())
            }
            StepAction::Uses { action, .. } => format!("Run {}", action),
        }
    }

    /// Evaluate the guard; steps without a guard always run
    pub fn should_run(&self, ctx: &ExpressionContext) -> bool {
        self.guard
            .as_ref()
            .map_or(true, |guard| guard.is_satisfied(ctx))
    }

    /// Render the templates of a `run` step's command
    pub fn render_command(&self, ctx: &ExpressionContext) -> Result<Option<String>, ExpressionError> {
        match &self.action {
            StepAction::Run { command, .. } => ctx.render(command).map(Some),
            StepAction::Uses { .. } => Ok(None),
        }
    }
}
