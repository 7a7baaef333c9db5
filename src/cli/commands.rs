//! CLI command definitions

use crate::core::{Event, RefType};
use clap::Args;

/// Event that drives `run` and `plan`
#[derive(Debug, Args, Clone)]
pub struct EventArgs {
    /// Event kind
    #[arg(long, value_enum, default_value_t = EventKind::Push)]
    pub event: EventKind,

    /// Pushed or created ref; bare names are branches
    #[arg(long = "ref", value_name = "REF")]
    pub git_ref: Option<String>,

    /// Commit the event points at
    #[arg(long)]
    pub sha: Option<String>,

    /// Kind of ref for `create` events
    #[arg(long, value_enum, default_value_t = RefTypeArg::Branch)]
    pub ref_type: RefTypeArg,

    /// Pull request number
    #[arg(long, default_value_t = 1)]
    pub number: u64,

    /// Pull request head branch
    #[arg(long)]
    pub head: Option<String>,

    /// Pull request base branch
    #[arg(long)]
    pub base: Option<String>,

    /// Pull request action
    #[arg(long, default_value = "opened")]
    pub action: String,
}

/// Event kind argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventKind {
    Push,
    Create,
    PullRequest,
}

/// Ref type argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RefTypeArg {
    Branch,
    Tag,
}

impl EventArgs {
    /// Build the event described by the arguments
    pub fn to_event(&self) -> Result<Event, String> {
        match self.event {
            EventKind::Push => {
                let git_ref = self.git_ref.clone().ok_or("push events need --ref")?;
                let mut event = Event::push(git_ref);
                if let Event::Push { sha, .. } = &mut event {
                    *sha = self.sha.clone();
                }
                Ok(event)
            }
            EventKind::Create => {
                let name = self.git_ref.clone().ok_or("create events need --ref")?;
                Ok(Event::Create {
                    ref_type: match self.ref_type {
                        RefTypeArg::Branch => RefType::Branch,
                        RefTypeArg::Tag => RefType::Tag,
                    },
                    name,
                })
            }
            EventKind::PullRequest => Ok(Event::PullRequest {
                action: self.action.clone(),
                number: self.number,
                head_ref: self.head.clone().ok_or("pull request events need --head")?,
                base_ref: self.base.clone().ok_or("pull request events need --base")?,
                sha: self.sha.clone(),
            }),
        }
    }
}

/// Run a workflow for one event
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    #[command(flatten)]
    pub event: EventArgs,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Dispatch events read from stdin
#[derive(Debug, Args, Clone)]
pub struct ListenCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,
}

/// Show the runs an event would produce
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    #[command(flatten)]
    pub event: EventArgs,
}

/// Validate a workflow definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub details: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}
