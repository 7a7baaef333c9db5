use anyhow::{Context, Result};
use buildgate::cli::commands::{HistoryCommand, ListenCommand, PlanCommand, RunCommand, ValidateCommand};
use buildgate::cli::output::*;
use buildgate::cli::{Cli, Command};
use buildgate::core::{config::WorkflowConfig, Event, ExecutionStatus, RunResult, StepAction, Workflow};
use buildgate::execution::{ExecutionEngine, ExecutionEvent};
use buildgate::persistence::{create_summary, InMemoryPersistence, PersistenceBackend, RunSummary};
use buildgate::runner::ProcessRunner;
use indicatif::ProgressBar;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{error, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides the verbosity flag
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd, &cli).await?,
        Command::Listen(cmd) => listen(cmd, &cli).await?,
        Command::Plan(cmd) => plan_workflow(cmd)?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn load_workflow(file: &str) -> Result<Workflow> {
    WorkflowConfig::from_file(file)
        .and_then(|config| config.to_workflow())
        .with_context(|| format!("Failed to load workflow {}", file))
}

async fn open_store(no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }

    #[cfg(feature = "sqlite")]
    let store: Arc<dyn PersistenceBackend> =
        Arc::new(buildgate::persistence::SqliteRunStore::with_default_path().await?);
    #[cfg(not(feature = "sqlite"))]
    let store: Arc<dyn PersistenceBackend> = Arc::new(InMemoryPersistence::new());

    Ok(store)
}

/// Engine printing events above a spinner
fn console_engine(cli: &Cli, spinner: &ProgressBar) -> ExecutionEngine<ProcessRunner> {
    let stream = cli.stream;
    let spinner = spinner.clone();
    ExecutionEngine::new(ProcessRunner::new(cli.runner_config()), cli.scheduling_strategy())
        .with_event_handler(move |event| {
            spinner.println(format_execution_event(&event));

            // For streaming, show step output as it arrives
            if stream {
                if let ExecutionEvent::StepCompleted { output, .. } = &event {
                    if !output.trim().is_empty() {
                        spinner.println(format_output(output.trim_end(), 20));
                    }
                }
            }
        })
}

async fn run_workflow(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    let workflow = load_workflow(&cmd.file)?;
    let event = cmd.event.to_event().map_err(anyhow::Error::msg)?;
    let store = open_store(cli.no_history).await?;

    println!("{} Loaded workflow: {}", INFO, style(&workflow.name).bold());

    let spinner = create_spinner(&format!("{} {}", event.name(), event.git_ref()));
    let engine = console_engine(cli, &spinner);
    let result = engine.dispatch(&workflow, &event).await;
    spinner.finish_and_clear();

    let Some(run) = result.context("Failed to start run")? else {
        println!(
            "{} No trigger of {} matches {} {}; nothing to run",
            INFO,
            style(&workflow.name).bold(),
            event.name(),
            style(event.git_ref()).dim()
        );
        return Ok(());
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        println!("{}", format_run_result(&run));
    }

    save_run(store.as_ref(), &run, cli.no_history).await;

    if run.status != ExecutionStatus::Completed {
        std::process::exit(run.status.exit_code());
    }
    Ok(())
}

async fn save_run(store: &dyn PersistenceBackend, run: &RunResult, quiet: bool) {
    let summary = create_summary(run);
    match store.save_run(&summary).await {
        Ok(()) if !quiet => println!(
            "{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        ),
        Ok(()) => {}
        Err(e) => warn!("Failed to save run {}: {:#}", summary.run_id, e),
    }
}

async fn listen(cmd: &ListenCommand, cli: &Cli) -> Result<()> {
    let workflow = Arc::new(load_workflow(&cmd.file)?);
    let store = open_store(cli.no_history).await?;

    let spinner = create_spinner(&format!("listening for {} events", workflow.name));
    let engine = Arc::new(console_engine(cli, &spinner));
    let mut runs = JoinSet::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed event {:?}: {}", line, e);
                continue;
            }
        };

        // Accept in arrival order so later events supersede earlier ones
        let accepted = match engine.accept(&workflow, &event) {
            Ok(Some(run)) => run,
            Ok(None) => continue,
            Err(e) => {
                error!("Cannot start run for {} {}: {}", event.name(), event.git_ref(), e);
                continue;
            }
        };

        let engine = Arc::clone(&engine);
        let workflow = Arc::clone(&workflow);
        let store = Arc::clone(&store);
        let spinner = spinner.clone();
        let no_history = cli.no_history;
        runs.spawn(async move {
            let run = engine.execute(&workflow, accepted).await;
            spinner.println(format_run_result(&run));
            save_run(store.as_ref(), &run, no_history).await;
            run.status
        });
    }

    let mut failed = 0;
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok(ExecutionStatus::Failed) => failed += 1,
            Ok(_) => {}
            Err(e) => error!("Run task aborted: {}", e),
        }
    }
    spinner.finish_and_clear();

    if failed > 0 {
        println!("{} {} run(s) failed", CROSS, failed);
        std::process::exit(ExecutionStatus::Failed.exit_code());
    }
    Ok(())
}

fn plan_workflow(cmd: &PlanCommand) -> Result<()> {
    let workflow = load_workflow(&cmd.file)?;
    let event = cmd.event.to_event().map_err(anyhow::Error::msg)?;

    if !workflow.is_triggered_by(&event) {
        println!(
            "{} {} is not triggered by {} {}",
            INFO,
            style(&workflow.name).bold(),
            event.name(),
            style(event.git_ref()).dim()
        );
        return Ok(());
    }

    println!(
        "{} {} triggered by {} {}",
        ROCKET,
        style(&workflow.name).bold(),
        event.name(),
        style(event.git_ref()).cyan()
    );
    if let Some(key) = workflow.concurrency_key(&event)? {
        let cancels = workflow
            .concurrency
            .as_ref()
            .is_some_and(|policy| policy.cancel_in_progress);
        println!(
            "  Concurrency group: {}{}",
            style(key).bold(),
            if cancels { " (cancels in-progress runs)" } else { "" }
        );
    }

    let instances = workflow.expand(&event)?;
    println!("  Job instances: {}", style(instances.len()).cyan());
    println!("{}", rule());
    for instance in &instances {
        println!("{} {}", SPINNER, style(&instance.name).bold());
        for step in instance.steps.iter() {
            let name = step.display_name(&instance.context);
            if !step.should_run(&instance.context) {
                println!("    {} {}", SKIP, style(name).dim());
                continue;
            }
            match &step.action {
                StepAction::Run { .. } => {
                    let command = step.render_command(&instance.context)?.unwrap_or_default();
                    println!("    {} {}", style("▸").cyan(), name);
                    for line in command.lines() {
                        println!("        {}", style(line).dim());
                    }
                }
                StepAction::Uses { action, .. } => {
                    println!("    {} {} {}", style("▸").cyan(), name, style(action).dim());
                }
            }
        }
    }

    Ok(())
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating workflow...", INFO);

    let result = WorkflowConfig::from_file(&cmd.file);

    match result {
        Ok(config) => {
            let workflow = config.to_workflow()?;
            println!("{} Workflow definition is valid!", CHECK);
            println!("  Name: {}", style(&workflow.name).bold());
            println!("  Triggers: {}", style(workflow.triggers.len()).cyan());
            println!("  Jobs: {}", style(workflow.jobs.len()).cyan());
            println!("  Job instances: {}", style(workflow.instance_count()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store(false).await?;

    // If specific run ID is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.details)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = match &cmd.workflow {
        Some(workflow) => store.list_runs(workflow, cmd.limit).await?,
        None => {
            let mut all_runs = Vec::new();
            for workflow in store.list_workflows().await? {
                all_runs.extend(store.list_runs(&workflow, cmd.limit).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs.truncate(cmd.limit);
            all_runs
        }
    };

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, details: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Workflow: {}", style(&summary.workflow).bold());
    println!("  Event: {} {}", summary.event_name, style(&summary.git_ref).cyan());
    if let Some(key) = &summary.concurrency_key {
        println!("  Concurrency group: {}", style(key).dim());
    }
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    println!("  Completed: {}", style(summary.completed_at.to_rfc3339()).dim());
    if let Ok(duration) = summary
        .completed_at
        .signed_duration_since(summary.started_at)
        .to_std()
    {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }
    println!(
        "  Instances: {} passed, {} failed, {} canceled of {}",
        style(summary.passed_instances).green(),
        style(summary.failed_instances).red(),
        style(summary.canceled_instances).yellow(),
        summary.total_instances
    );

    if details {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
