//! Runner configuration

use std::path::PathBuf;

/// What happens to an in-progress step when its run is superseded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelMode {
    /// Let the in-progress step finish; no further steps start
    #[default]
    Graceful,
    /// Kill the in-progress step's process
    Kill,
}

/// Configuration for the process runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory under which per-instance workspaces are created
    pub workspace_root: PathBuf,

    /// Repository cloned by the checkout action
    ///
    /// Defaults to the current directory.
    pub source: Option<String>,

    /// Shell used for `run` steps without an explicit `shell`
    pub default_shell: String,

    /// Handling of in-progress steps on cancellation
    pub cancel_mode: CancelMode,

    /// Keep instance workspaces after the instance finishes
    pub keep_workspaces: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let workspace_root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("buildgate")
            .join("workspaces");

        Self {
            workspace_root,
            source: None,
            default_shell: "bash".to_string(),
            cancel_mode: CancelMode::Graceful,
            keep_workspaces: false,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace_root(mut self, root: PathBuf) -> Self {
        self.workspace_root = root;
        self
    }

    pub fn with_source(mut self, source: String) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_shell(mut self, shell: String) -> Self {
        self.default_shell = shell;
        self
    }

    pub fn with_cancel_mode(mut self, mode: CancelMode) -> Self {
        self.cancel_mode = mode;
        self
    }

    pub fn keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }

    /// Checkout source, falling back to the current directory
    pub fn source_or_cwd(&self) -> String {
        self.source.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| ".".to_string())
        })
    }
}
