//! Process runner - executes steps as local subprocesses

use crate::runner::{
    CancelMode, Invocation, RunnerConfig, RunnerError, StepOutput, StepRequest, StepRunner,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Runner that spawns shells, git and rustup on the local machine
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Program and arguments for a `run` command
    ///
    /// `bash` and `sh` get fail-on-error flags; any other shell is split on
    /// whitespace and receives the command as its last argument.
    fn shell_command(&self, shell: Option<&str>, command: &str) -> (String, Vec<String>) {
        let shell = shell.unwrap_or(&self.config.default_shell);
        let mut args: Vec<String> = match shell {
            "bash" => ["bash", "--noprofile", "--norc", "-eo", "pipefail", "-c"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            "sh" => ["sh", "-e", "-c"].iter().map(|s| s.to_string()).collect(),
            custom => custom.split_whitespace().map(str::to_string).collect(),
        };
        args.push(command.to_string());
        let program = args.remove(0);
        (program, args)
    }

    /// Spawn a process and wait for it, honoring the cancel mode
    async fn execute(
        &self,
        program: &str,
        args: &[String],
        request: &StepRequest,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, RunnerError> {
        debug!("Spawning {} {:?} in {}", program, args, cwd.display());

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .envs(&request.env)
            .kill_on_drop(true);
        let child = command.output();

        let result = match self.config.cancel_mode {
            CancelMode::Graceful => child.await,
            CancelMode::Kill => {
                tokio::select! {
                    result = child => result,
                    _ = cancel.cancelled() => {
                        warn!("Killing '{}' after cancellation", request.name);
                        return Err(RunnerError::Cancelled);
                    }
                }
            }
        };

        let output = result.map_err(|e| RunnerError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

        let combined = combine_output(&output);
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!("{} exited with code {}", program, code);
            return Err(RunnerError::ToolInvocation {
                program: program.to_string(),
                code,
                output: combined,
            });
        }

        debug!("{} returned {} bytes of output", program, combined.len());
        Ok(combined)
    }

    async fn checkout(
        &self,
        request: &StepRequest,
        target: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, RunnerError> {
        let source = self.config.source_or_cwd();
        let workspace = request.workspace.display().to_string();

        // The workspace exists but must be empty for git to clone into it
        let clone_args = vec![
            "clone".to_string(),
            "--quiet".to_string(),
            "--no-hardlinks".to_string(),
            source.clone(),
            workspace.clone(),
        ];
        let parent = request
            .workspace
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| request.workspace.clone());

        let mut log = self
            .execute("git", &clone_args, request, &parent, cancel)
            .await
            .map_err(|e| as_setup(e, format!("failed to clone {}", source)))?;

        if let Some(target) = target {
            let checkout_args = vec![
                "-C".to_string(),
                workspace,
                "checkout".to_string(),
                "--quiet".to_string(),
                "--detach".to_string(),
                target.to_string(),
            ];
            log.push_str(
                &self
                    .execute("git", &checkout_args, request, &parent, cancel)
                    .await
                    .map_err(|e| as_setup(e, format!("failed to check out {}", target)))?,
            );
        }

        Ok(StepOutput::new(log))
    }

    async fn toolchain(
        &self,
        request: &StepRequest,
        toolchain: &str,
        components: &[String],
        cancel: &CancellationToken,
    ) -> Result<StepOutput, RunnerError> {
        let mut args = vec![
            "toolchain".to_string(),
            "install".to_string(),
            toolchain.to_string(),
            "--profile".to_string(),
            "minimal".to_string(),
            "--no-self-update".to_string(),
        ];
        if !components.is_empty() {
            args.push("--component".to_string());
            args.push(components.join(","));
        }

        let log = self
            .execute("rustup", &args, request, &request.workspace, cancel)
            .await
            .map_err(|e| as_setup(e, format!("failed to install toolchain {}", toolchain)))?;

        Ok(StepOutput::new(log).with_export("RUSTUP_TOOLCHAIN", toolchain))
    }
}

/// Reclassify a process failure during setup, keeping cancellation as-is
fn as_setup(error: RunnerError, message: String) -> RunnerError {
    match error {
        RunnerError::Cancelled => RunnerError::Cancelled,
        RunnerError::ToolInvocation { output, .. } => RunnerError::EnvironmentSetup { message, output },
        other => RunnerError::EnvironmentSetup {
            message: format!("{}: {}", message, other),
            output: String::new(),
        },
    }
}

fn combine_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    combined
}

#[async_trait]
impl StepRunner for ProcessRunner {
    async fn prepare_workspace(&self, run_id: Uuid, slug: &str) -> Result<PathBuf, RunnerError> {
        let path = self.config.workspace_root.join(run_id.to_string()).join(slug);
        if path.exists() {
            tokio::fs::remove_dir_all(&path).await.map_err(|e| {
                RunnerError::setup(format!("cannot clear workspace {}: {}", path.display(), e))
            })?;
        }
        // A sibling releasing its workspace may remove the run directory mid-create
        let created = match tokio::fs::create_dir_all(&path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&path).await
            }
            other => other,
        };
        created.map_err(|e| {
            RunnerError::setup(format!("cannot create workspace {}: {}", path.display(), e))
        })?;
        debug!("Prepared workspace {}", path.display());
        Ok(path)
    }

    async fn run(
        &self,
        request: &StepRequest,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, RunnerError> {
        match &request.invocation {
            Invocation::Shell { command, shell } => {
                if !request.working_dir.is_dir() {
                    return Err(RunnerError::setup(format!(
                        "working directory {} does not exist",
                        request.working_dir.display()
                    )));
                }
                let (program, args) = self.shell_command(shell.as_deref(), command);
                self.execute(&program, &args, request, &request.working_dir, cancel)
                    .await
                    .map(StepOutput::new)
            }
            Invocation::Checkout { target } => self.checkout(request, target.as_deref(), cancel).await,
            Invocation::Toolchain {
                toolchain,
                components,
            } => self.toolchain(request, toolchain, components, cancel).await,
        }
    }

    async fn release_workspace(&self, workspace: &Path) {
        if self.config.keep_workspaces {
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(workspace).await {
            warn!("Failed to remove workspace {}: {}", workspace.display(), e);
        }

        // The run directory goes with its last instance; remove_dir fails while siblings remain
        if let Some(run_dir) = workspace
            .parent()
            .filter(|dir| *dir != self.config.workspace_root.as_path())
        {
            if tokio::fs::remove_dir(run_dir).await.is_ok() {
                debug!("Removed run directory {}", run_dir.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn runner(root: &Path, mode: CancelMode) -> ProcessRunner {
        ProcessRunner::new(
            RunnerConfig::new()
                .with_workspace_root(root.to_path_buf())
                .with_shell("sh".to_string())
                .with_cancel_mode(mode),
        )
    }

    fn shell_request(workspace: &Path, command: &str) -> StepRequest {
        StepRequest {
            name: "test".to_string(),
            invocation: Invocation::Shell {
                command: command.to_string(),
                shell: None,
            },
            workspace: workspace.to_path_buf(),
            working_dir: workspace.to_path_buf(),
            env: BTreeMap::from([("GREETING".to_string(), "hello".to_string())]),
        }
    }

    #[test]
    fn test_shell_command_flags() {
        let runner = ProcessRunner::default();
        let (program, args) = runner.shell_command(None, "cargo check");
        assert_eq!(program, "bash");
        assert_eq!(args, vec!["--noprofile", "--norc", "-eo", "pipefail", "-c", "cargo check"]);

        let (program, args) = runner.shell_command(Some("python3 -u"), "print(1)");
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["-u", "print(1)"]);
    }

    #[tokio::test]
    async fn test_run_captures_output_and_env() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path(), CancelMode::Graceful);
        let ws = runner.prepare_workspace(Uuid::new_v4(), "check-stable").await.unwrap();
        assert!(ws.is_dir());

        let output = runner
            .run(&shell_request(&ws, "echo $GREETING; echo oops >&2"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(output.output.contains("hello"));
        assert!(output.output.contains("oops"));

        runner.release_workspace(&ws).await;
        assert!(!ws.exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_tool_invocation_failure() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path(), CancelMode::Graceful);
        let ws = runner.prepare_workspace(Uuid::new_v4(), "fmt").await.unwrap();

        let err = runner
            .run(&shell_request(&ws, "echo diff; exit 3"), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            RunnerError::ToolInvocation { code, output, .. } => {
                assert_eq!(code, 3);
                assert!(output.contains("diff"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_working_directory_is_setup_failure() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path(), CancelMode::Graceful);
        let ws = runner.prepare_workspace(Uuid::new_v4(), "derive").await.unwrap();

        let mut request = shell_request(&ws, "true");
        request.working_dir = ws.join("astarte-device-sdk-derive");
        let err = runner.run(&request, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunnerError::EnvironmentSetup { .. }));
    }

    #[tokio::test]
    async fn test_kill_mode_stops_process_on_cancel() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path(), CancelMode::Kill);
        let ws = runner.prepare_workspace(Uuid::new_v4(), "slow").await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = runner.run(&shell_request(&ws, "sleep 10"), &cancel).await.unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_directory_removed_with_last_workspace() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path(), CancelMode::Graceful);
        let run_id = Uuid::new_v4();
        let run_dir = root.path().join(run_id.to_string());

        let fmt = runner.prepare_workspace(run_id, "fmt").await.unwrap();
        let check = runner.prepare_workspace(run_id, "check-stable").await.unwrap();

        runner.release_workspace(&fmt).await;
        assert!(!fmt.exists());
        assert!(check.is_dir());

        runner.release_workspace(&check).await;
        assert!(!run_dir.exists());
        assert!(root.path().is_dir());
    }

    #[tokio::test]
    async fn test_keep_workspaces() {
        let root = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(
            RunnerConfig::new()
                .with_workspace_root(root.path().to_path_buf())
                .keep_workspaces(true),
        );
        let ws = runner.prepare_workspace(Uuid::new_v4(), "fmt").await.unwrap();
        runner.release_workspace(&ws).await;
        assert!(ws.exists());
    }

    #[tokio::test]
    #[ignore] // Requires git
    async fn test_checkout_clones_source() {
        let source = tempfile::tempdir().unwrap();
        let sh = |cmd: &str| {
            std::process::Command::new("sh")
                .args(["-e", "-c", cmd])
                .current_dir(source.path())
                .status()
                .unwrap()
        };
        assert!(sh("git init -q && echo hi > README && git add README && \
                    git -c user.name=t -c user.email=t@t commit -qm init")
            .success());

        let root = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(
            RunnerConfig::new()
                .with_workspace_root(root.path().to_path_buf())
                .with_source(source.path().display().to_string()),
        );
        let ws = runner.prepare_workspace(Uuid::new_v4(), "fmt").await.unwrap();
        let request = StepRequest {
            name: "checkout".to_string(),
            invocation: Invocation::Checkout {
                target: Some("HEAD".to_string()),
            },
            workspace: ws.clone(),
            working_dir: ws.clone(),
            env: BTreeMap::new(),
        };
        runner.run(&request, &CancellationToken::new()).await.unwrap();
        assert!(ws.join("README").exists());
    }
}
