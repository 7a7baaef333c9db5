//! CLI output formatting

use crate::{
    core::{ExecutionStatus, JobInstanceResult, RunResult, StepState, Verdict},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "x ");

/// Create a spinner shown while runs are in flight
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Horizontal rule sized to the terminal
pub fn rule() -> String {
    let width = term_size::dimensions().map(|(w, _)| w.min(80)).unwrap_or(60);
    style("─".repeat(width)).dim().to_string()
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("NOT RUN").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Completed { .. } => style("PASSED").green().to_string(),
        StepState::Failed { kind, .. } => style(format!("FAILED ({:?})", kind)).red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("PASSED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELED").yellow().to_string(),
    }
}

/// Format an instance verdict for display
pub fn format_verdict(verdict: Verdict) -> String {
    match verdict {
        Verdict::Passed => style("passed").green().to_string(),
        Verdict::Failed => style("failed").red().to_string(),
        Verdict::Canceled => style("canceled").yellow().to_string(),
    }
}

fn verdict_icon(verdict: Verdict) -> Emoji<'static, 'static> {
    match verdict {
        Verdict::Passed => CHECK,
        Verdict::Failed => CROSS,
        Verdict::Canceled => STOP,
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunSkipped {
            workflow,
            event_name,
            git_ref,
        } => format!(
            "{} {} not triggered by {} {}",
            INFO,
            style(workflow).bold(),
            event_name,
            style(git_ref).dim()
        ),
        ExecutionEvent::RunSuperseded {
            run_id,
            superseded_by,
            concurrency_key,
        } => format!(
            "{} Run {} superseded by {} in group {}",
            WARN,
            style(short_id(run_id)).dim(),
            style(short_id(superseded_by)).cyan(),
            style(concurrency_key).bold()
        ),
        ExecutionEvent::RunStarted {
            run_id,
            workflow,
            event_name,
            git_ref,
            instances,
            ..
        } => format!(
            "{} Starting {} ({}) for {} {} with {} instance(s)",
            ROCKET,
            style(workflow).bold(),
            style(short_id(run_id)).dim(),
            event_name,
            style(git_ref).cyan(),
            instances
        ),
        ExecutionEvent::InstanceStarted { instance, .. } => {
            format!("{} {}", SPINNER, style(instance).cyan())
        }
        ExecutionEvent::StepStarted { instance, step, .. } => {
            format!("  {} {} › {}", SPINNER, style(instance).dim(), step)
        }
        ExecutionEvent::StepSkipped {
            instance,
            step,
            reason,
            ..
        } => format!(
            "  {} {} › {} ({})",
            SKIP,
            style(instance).dim(),
            style(step).dim(),
            reason
        ),
        ExecutionEvent::StepCompleted { instance, step, .. } => {
            format!("  {} {} › {}", CHECK, style(instance).dim(), style(step).green())
        }
        ExecutionEvent::StepFailed {
            instance,
            step,
            error,
            ..
        } => format!(
            "  {} {} › {}: {}",
            CROSS,
            style(instance).dim(),
            style(step).red(),
            style(error).dim()
        ),
        ExecutionEvent::InstanceFinished {
            instance, verdict, ..
        } => format!(
            "{} {} {}",
            verdict_icon(*verdict),
            style(instance).bold(),
            format_verdict(*verdict)
        ),
        ExecutionEvent::RunFinished {
            run_id,
            workflow,
            status,
        } => format!(
            "{} {} ({}) {}",
            INFO,
            style(workflow).bold(),
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
    }
}

/// Per-instance detail of a run, with the failing step and its output
pub fn format_instance(instance: &JobInstanceResult) -> String {
    let mut lines = vec![format!(
        "{} {} {}",
        verdict_icon(instance.verdict),
        style(&instance.name).bold(),
        format_verdict(instance.verdict)
    )];

    for step in &instance.steps {
        lines.push(format!("    {:<40} {}", step.name, format_step_state(&step.state)));
        if let StepState::Failed { error, output, .. } = &step.state {
            lines.push(format!("      {}", style(error).red()));
            if !output.trim().is_empty() {
                for line in format_output(output.trim_end(), 10).lines() {
                    lines.push(format!("      {}", style(line).dim()));
                }
            }
        }
    }

    lines.join("\n")
}

/// Full report of a finished run
pub fn format_run_result(run: &RunResult) -> String {
    let mut out = vec![rule()];
    for instance in &run.instances {
        out.push(format_instance(instance));
    }
    out.push(rule());

    let icon = match run.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Cancelled => STOP,
        _ => CROSS,
    };
    out.push(format!(
        "{} {} {} - {} passed, {} failed, {} canceled ({})",
        icon,
        style(&run.workflow).bold(),
        format_status(run.status),
        style(run.passed_instances()).green(),
        style(run.failed_instances()).red(),
        style(run.canceled_instances()).yellow(),
        format_duration(
            run.completed_at
                .signed_duration_since(run.started_at)
                .to_std()
                .unwrap_or_default()
        )
    ));

    out.join("\n")
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Cancelled => STOP,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {} {} - {} ({}/{})",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.workflow).bold(),
        summary.event_name,
        style(&summary.git_ref).cyan(),
        format_status(summary.status),
        summary.passed_instances,
        summary.total_instances
    )
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
