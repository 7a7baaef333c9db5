//! Source-control events and the triggers that match them

use glob_match::glob_match;
use serde::{Deserialize, Serialize};

/// Kind of ref created by a `create` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Branch,
    Tag,
}

/// An incoming source-control event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Commits pushed to a branch or a tag
    Push {
        #[serde(rename = "ref")]
        git_ref: String,
        #[serde(default)]
        sha: Option<String>,
    },
    /// A branch or tag was created
    Create {
        ref_type: RefType,
        #[serde(rename = "ref")]
        name: String,
    },
    /// Pull request activity
    PullRequest {
        #[serde(default = "default_pull_request_action")]
        action: String,
        number: u64,
        head_ref: String,
        base_ref: String,
        #[serde(default)]
        sha: Option<String>,
    },
}

fn default_pull_request_action() -> String {
    "opened".to_string()
}

impl Event {
    /// Push event; bare branch names are qualified as `refs/heads/<name>`
    pub fn push(git_ref: impl Into<String>) -> Self {
        Event::Push {
            git_ref: qualify_ref(git_ref.into()),
            sha: None,
        }
    }

    /// Pull request event with the `opened` action
    pub fn pull_request(number: u64, head_ref: impl Into<String>, base_ref: impl Into<String>) -> Self {
        Event::PullRequest {
            action: default_pull_request_action(),
            number,
            head_ref: head_ref.into(),
            base_ref: base_ref.into(),
            sha: None,
        }
    }

    /// Event name as used in workflow definitions
    pub fn name(&self) -> &'static str {
        match self {
            Event::Push { .. } => "push",
            Event::Create { .. } => "create",
            Event::PullRequest { .. } => "pull_request",
        }
    }

    /// Fully qualified ref the event refers to
    ///
    /// Pull requests resolve to their head branch, so a pull request and a
    /// push to the same branch share a ref.
    pub fn git_ref(&self) -> String {
        match self {
            Event::Push { git_ref, .. } => git_ref.clone(),
            Event::Create {
                ref_type: RefType::Branch,
                name,
            } => format!("refs/heads/{}", name),
            Event::Create {
                ref_type: RefType::Tag,
                name,
            } => format!("refs/tags/{}", name),
            Event::PullRequest { head_ref, .. } => format!("refs/heads/{}", head_ref),
        }
    }

    /// Short ref name (`master`, `v1.0`)
    pub fn ref_name(&self) -> String {
        let git_ref = self.git_ref();
        git_ref
            .strip_prefix("refs/heads/")
            .or_else(|| git_ref.strip_prefix("refs/tags/"))
            .unwrap_or(&git_ref)
            .to_string()
    }

    /// `branch` or `tag`
    pub fn ref_type(&self) -> &'static str {
        if self.git_ref().starts_with("refs/tags/") {
            "tag"
        } else {
            "branch"
        }
    }

    /// Commit the event points at, when known
    pub fn sha(&self) -> Option<&str> {
        match self {
            Event::Push { sha, .. } | Event::PullRequest { sha, .. } => sha.as_deref(),
            Event::Create { .. } => None,
        }
    }
}

fn qualify_ref(git_ref: String) -> String {
    if git_ref.starts_with("refs/") {
        git_ref
    } else {
        format!("refs/heads/{}", git_ref)
    }
}

/// Pull request actions that trigger when no `types` filter is configured
pub const DEFAULT_PULL_REQUEST_TYPES: [&str; 3] = ["opened", "synchronize", "reopened"];

/// Condition under which a workflow run is initiated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Push {
        branches: Option<Vec<String>>,
        branches_ignore: Vec<String>,
        tags: Option<Vec<String>>,
    },
    Create,
    PullRequest {
        branches: Option<Vec<String>>,
        types: Vec<String>,
    },
}

impl Trigger {
    /// Check whether an event satisfies this trigger
    pub fn matches(&self, event: &Event) -> bool {
        match (self, event) {
            (
                Trigger::Push {
                    branches,
                    branches_ignore,
                    tags,
                },
                Event::Push { git_ref, .. },
            ) => {
                if let Some(branch) = git_ref.strip_prefix("refs/heads/") {
                    if branches.is_none() && tags.is_some() {
                        return false;
                    }
                    let included = branches
                        .as_ref()
                        .map_or(true, |patterns| any_match(patterns, branch));
                    included && !any_match(branches_ignore, branch)
                } else if let Some(tag) = git_ref.strip_prefix("refs/tags/") {
                    match tags {
                        Some(patterns) => any_match(patterns, tag),
                        None => branches.is_none() && branches_ignore.is_empty(),
                    }
                } else {
                    false
                }
            }
            (Trigger::Create, Event::Create { .. }) => true,
            (
                Trigger::PullRequest { branches, types },
                Event::PullRequest {
                    action, base_ref, ..
                },
            ) => {
                let type_ok = if types.is_empty() {
                    DEFAULT_PULL_REQUEST_TYPES.contains(&action.as_str())
                } else {
                    types.iter().any(|t| t == action)
                };
                let base = base_ref.strip_prefix("refs/heads/").unwrap_or(base_ref);
                type_ok
                    && branches
                        .as_ref()
                        .map_or(true, |patterns| any_match(patterns, base))
            }
            _ => false,
        }
    }

    /// Event name this trigger listens to
    pub fn event_name(&self) -> &'static str {
        match self {
            Trigger::Push { .. } => "push",
            Trigger::Create => "create",
            Trigger::PullRequest { .. } => "pull_request",
        }
    }
}

fn any_match(patterns: &[String], value: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| pattern == value || glob_match(pattern, value))
}
