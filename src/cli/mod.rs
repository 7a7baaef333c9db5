//! Command-line interface

pub mod commands;
pub mod output;

use crate::execution::SchedulingStrategy;
use crate::runner::{CancelMode, RunnerConfig};
use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListenCommand, PlanCommand, RunCommand, SchedulingStrategyArg, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Event-driven CI workflow runner
#[derive(Debug, Parser, Clone)]
#[command(name = "buildgate")]
#[command(version)]
#[command(about = "Runs CI workflows: triggers, concurrency groups, matrices and fail-fast steps", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print step output as steps finish
    #[arg(short, long, global = true)]
    pub stream: bool,

    /// Directory for per-instance workspaces
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Repository the checkout action clones (defaults to the current directory)
    #[arg(long, global = true)]
    pub source: Option<String>,

    /// Instance scheduling strategy
    #[arg(long, value_enum, global = true, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Instance cap for the parallel-limited strategy
    #[arg(long, global = true, default_value_t = 4)]
    pub max_instances: usize,

    /// Kill the running step of a superseded run instead of letting it finish
    #[arg(long, global = true)]
    pub kill_on_cancel: bool,

    /// Keep instance workspaces after the run
    #[arg(long, global = true)]
    pub keep_workspaces: bool,

    /// Don't save runs to history
    #[arg(long, global = true)]
    pub no_history: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Evaluate one event and run the workflow if it triggers
    Run(RunCommand),

    /// Read newline-delimited JSON events from stdin and dispatch each
    Listen(ListenCommand),

    /// Show what an event would run, without running it
    Plan(PlanCommand),

    /// Validate a workflow definition
    Validate(ValidateCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// Scheduling strategy selected by the global flags
    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_instances)
            }
        }
    }

    /// Runner configuration selected by the global flags
    pub fn runner_config(&self) -> RunnerConfig {
        let mut config = RunnerConfig::new()
            .with_cancel_mode(if self.kill_on_cancel {
                CancelMode::Kill
            } else {
                CancelMode::Graceful
            })
            .keep_workspaces(self.keep_workspaces);
        if let Some(root) = &self.workspace {
            config = config.with_workspace_root(root.clone());
        }
        if let Some(source) = &self.source {
            config = config.with_source(source.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Event;

    #[test]
    fn test_parse_run_push() {
        let cli = Cli::try_parse_from([
            "buildgate",
            "run",
            "-f",
            "workflows/ci.yaml",
            "--ref",
            "master",
            "--sha",
            "abc123",
            "--kill-on-cancel",
        ])
        .unwrap();

        assert_eq!(cli.runner_config().cancel_mode, CancelMode::Kill);
        assert_eq!(cli.scheduling_strategy(), SchedulingStrategy::Parallel);
        let Command::Run(cmd) = &cli.command else {
            panic!("expected run command");
        };
        assert_eq!(
            cmd.event.to_event().unwrap(),
            Event::Push {
                git_ref: "refs/heads/master".to_string(),
                sha: Some("abc123".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_plan_pull_request_with_global_flags() {
        let cli = Cli::try_parse_from([
            "buildgate",
            "--strategy",
            "parallel-limited",
            "--max-instances",
            "2",
            "plan",
            "-f",
            "ci.yaml",
            "--event",
            "pull-request",
            "--number",
            "7",
            "--head",
            "feature",
            "--base",
            "master",
        ])
        .unwrap();

        assert_eq!(cli.scheduling_strategy(), SchedulingStrategy::LimitedParallel(2));
        let Command::Plan(cmd) = &cli.command else {
            panic!("expected plan command");
        };
        assert_eq!(cmd.event.to_event().unwrap(), Event::pull_request(7, "feature", "master"));
    }

    #[test]
    fn test_listen_and_history() {
        let cli = Cli::try_parse_from(["buildgate", "--no-history", "listen", "-f", "ci.yaml"]).unwrap();
        assert!(cli.no_history);
        assert!(matches!(cli.command, Command::Listen(_)));

        let cli = Cli::try_parse_from(["buildgate", "history", "--workflow", "ci", "--limit", "3"]).unwrap();
        let Command::History(cmd) = &cli.command else {
            panic!("expected history command");
        };
        assert_eq!(cmd.workflow.as_deref(), Some("ci"));
        assert_eq!(cmd.limit, 3);
    }
}
