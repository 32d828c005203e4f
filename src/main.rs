use anyhow::{Context, Result};
use repoforge::cli::commands::{HistoryCommand, RunCommand, ValidateCommand};
use repoforge::cli::output::*;
use repoforge::cli::{Cli, Command};
use repoforge::core::config::PipelineConfig;
use repoforge::execution::{PipelineRunner, RunEvent, SubprocessRunner};
use repoforge::persistence::{PersistenceBackend, RunSummary};
use repoforge::OverallStatus;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("{} Failed to set logging subscriber: {}", WARN, e);
    }

    let result = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, false).await,
        Command::DryRun(cmd) => run_pipeline(cmd, true).await,
        Command::Validate(cmd) => validate_pipeline(cmd),
        Command::History(cmd) => show_history(cmd).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", CROSS, style(format!("{:#}", e)).red());
            ExitCode::from(OverallStatus::Aborted.exit_code())
        }
    }
}

async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(repoforge::persistence::SqliteRunStore::with_default_path().await?))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(repoforge::persistence::InMemoryPersistence::new()))
    }
}

async fn run_pipeline(cmd: &RunCommand, dry_run: bool) -> Result<ExitCode> {
    let config =
        PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline definition")?;
    let pipeline = config.to_pipeline()?;

    let workspace = cmd.workspace_dir(&pipeline)?;
    let ctx = cmd.context(&pipeline, workspace, dry_run);
    let strategy = cmd.strategy(&pipeline);

    if !cmd.json {
        eprintln!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());
        for (key, value) in &cmd.var {
            eprintln!("{} Variable override: {} = {}", INFO, style(key).cyan(), style(value).dim());
        }
    }

    let progress = if cmd.json {
        indicatif::ProgressBar::hidden()
    } else {
        create_progress_bar(pipeline.graph.len())
    };

    let bar = progress.clone();
    let runner = PipelineRunner::new(SubprocessRunner, strategy).with_event_handler(move |event| {
        if let Some(line) = format_run_event(&event) {
            bar.println(line);
        }
        match &event {
            RunEvent::StageStarted { stage, .. } => bar.set_message(stage.clone()),
            RunEvent::StageFinished { .. } | RunEvent::StageSkipped { .. } => bar.inc(1),
            RunEvent::RunFinished { .. } => bar.finish_and_clear(),
            _ => {}
        }
    });

    // Ctrl-C cancels the run; stage results gathered so far are kept
    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    let report = match runner.run(&pipeline, &ctx).await {
        Ok(report) => report,
        Err(e) => {
            progress.finish_and_clear();
            return Err(e.into());
        }
    };

    if let Some(path) = &cmd.report {
        report.write_to(path)?;
    }

    if !cmd.no_history {
        let summary = RunSummary::from_report(&report);
        let saved = match open_store().await {
            Ok(store) => store.save_run(&summary).await,
            Err(e) => Err(e),
        };
        match saved {
            Ok(()) if !cmd.json => eprintln!(
                "{} Run saved to history (ID: {})",
                INFO,
                style(&summary.run_id.to_string()[..8]).dim()
            ),
            Ok(()) => {}
            Err(e) => warn!("Failed to save run history: {:#}", e),
        }
    }

    if cmd.json {
        println!("{}", report.to_json()?);
    } else {
        println!("\n{}", format_report_summary(&report));
    }

    if report.overall_status != OverallStatus::Completed {
        error!("Pipeline {} ended {}", report.pipeline, report.overall_status);
    }

    Ok(ExitCode::from(report.overall_status.exit_code()))
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<ExitCode> {
    if !cmd.json {
        println!("{} Validating pipeline...", INFO);
    }

    let checked = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let pipeline = config.to_pipeline()?;
        let ctx = pipeline
            .context(config.workspace_dir().unwrap_or_default())
            .with_variables(cmd.var.iter().cloned());
        pipeline.prepare(&ctx)?;
        Ok(pipeline)
    });

    let pipeline = match checked {
        Ok(pipeline) => pipeline,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            return Ok(ExitCode::from(OverallStatus::Aborted.exit_code()));
        }
    };

    if cmd.json {
        let data = serde_json::json!({
            "name": pipeline.name,
            "rules": pipeline.rules.rules().iter().map(|r| r.id()).collect::<Vec<_>>(),
            "run_order": pipeline.graph.names(),
            "variables": pipeline.variables,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{} Pipeline definition is valid!", CHECK);
    println!("  Name: {}", style(&pipeline.name).bold());
    println!("  Rules: {}", style(pipeline.rules.len()).cyan());
    println!("  Variables: {}", style(pipeline.variables.len()).cyan());
    println!("  Run order:");
    for (i, stage) in pipeline.graph.stages().iter().enumerate() {
        let deps = if stage.depends_on.is_empty() {
            String::new()
        } else {
            format!(" (after {})", stage.depends_on.join(", "))
        };
        println!("    {}. {}{}", i + 1, style(&stage.name).cyan(), style(deps).dim());
    }

    Ok(ExitCode::SUCCESS)
}

async fn show_history(cmd: &HistoryCommand) -> Result<ExitCode> {
    let store = open_store().await?;

    if let Some(id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => println!("{}", format_run_summary(&summary)),
            None => println!("{} Run not found", WARN),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let runs = store.list_runs(cmd.pipeline.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(ExitCode::SUCCESS);
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        if cmd.pipeline.is_some() {
            let known = store.list_pipelines().await?;
            if let Some(hint) = format_known_pipelines(&known) {
                println!("{}", hint);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(ExitCode::SUCCESS)
}
