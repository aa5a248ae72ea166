use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use remedy_core::config::{BackendKind, ConfigLoader, EngineBuilder, EngineConfig};
use remedy_core::{FileSet, HealOutcome};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_FILE: &str = "remedy.yaml";

#[derive(Parser, Debug)]
#[clap(name = "remedy", author, version = "0.1.0", about = "Run generated code in a sandbox and repair what fails")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "info")]
    log_level: String,

    #[clap(long, help = "Append logs to this file instead of stderr")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a project directory and repair failing files
    Run {
        /// Directory holding the project files
        dir: PathBuf,

        #[clap(
            long,
            short,
            help = "Engine configuration file (defaults to remedy.yaml when present)"
        )]
        config: Option<PathBuf>,

        #[clap(long, help = "Execute once and report; never repair")]
        no_heal: bool,

        #[clap(long, help = "Override healing.max_fix_attempts")]
        max_fix_attempts: Option<u32>,

        #[clap(long, help = "Override execution.backend (docker or process)")]
        backend: Option<String>,

        #[clap(long, help = "Override healing.repair_command")]
        repair_command: Option<String>,

        #[clap(long, help = "Write repaired files back into DIR")]
        write: bool,

        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    match &cli.log_file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            env_logger::Builder::new()
                .filter_level(log_level_filter)
                .target(env_logger::Target::Pipe(Box::new(log_file)))
                .init();
        }
        None => {
            env_logger::Builder::new()
                .filter_level(log_level_filter)
                .init();
        }
    }

    match cli.command {
        Commands::Run {
            dir,
            config,
            no_heal,
            max_fix_attempts,
            backend,
            repair_command,
            write,
            format,
        } => {
            let mut engine_config = load_engine_config(config.as_deref()).await?;
            if no_heal {
                engine_config.healing.enabled = false;
            }
            if let Some(max) = max_fix_attempts {
                engine_config.healing.max_fix_attempts = max;
            }
            if let Some(backend) = backend {
                engine_config.execution.backend = backend.parse::<BackendKind>()?;
            }
            if repair_command.is_some() {
                engine_config.healing.repair_command = repair_command;
            }
            if engine_config.healing.enabled && engine_config.healing.repair_command.is_none() {
                log::warn!("No repair command configured; running without self-healing");
                engine_config.healing.enabled = false;
            }
            engine_config.validate()?;

            let succeeded = run_project(&dir, engine_config, write, format).await?;
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => Ok(ConfigLoader::from_file(path).await?),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            log::info!("Using configuration from {}", DEFAULT_CONFIG_FILE);
            Ok(ConfigLoader::from_file(DEFAULT_CONFIG_FILE).await?)
        }
        None => Ok(EngineConfig::default()),
    }
}

async fn run_project(dir: &Path, config: EngineConfig, write: bool, format: OutputFormat) -> Result<bool> {
    let files = FileSet::load_dir(dir)
        .with_context(|| format!("Failed to load project from {}", dir.display()))?;
    log::info!("Loaded {} file(s) from {}", files.len(), dir.display());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; stopping after the current file");
            on_interrupt.cancel();
        }
    });

    let stack = config.tech_stack.clone();
    let options = config.heal_options();
    let engine = EngineBuilder::new(config).cancellation(cancel).build().await?;
    let outcome = engine.run_and_heal(files, &stack, &options).await?;

    if write {
        outcome
            .files
            .write_to(dir)
            .with_context(|| format!("Failed to write repaired files to {}", dir.display()))?;
        log::info!("Wrote {} file(s) back to {}", outcome.files.len(), dir.display());
    }

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => print_text(&outcome),
    }

    Ok(outcome.state.errors.is_empty())
}

fn print_json(outcome: &HealOutcome) -> Result<()> {
    let report = json!({
        "needs_revision": outcome.needs_revision(),
        "passes": outcome.state.passes,
        "sandbox_unavailable": outcome.state.sandbox_unavailable,
        "statuses": outcome.state.statuses,
        "errors": outcome.state.errors,
        "fix_attempts": outcome.state.fix_attempts,
        "results": outcome.state.results,
        "history": outcome.state.history,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_text(outcome: &HealOutcome) {
    let state = &outcome.state;
    if state.results.is_empty() {
        println!("Nothing was executed.");
        return;
    }

    for (path, result) in &state.results {
        let status = state
            .status(path)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{:<40} {:<12} exit {:>4}  {:>7.2}s  repairs {}",
            path,
            status,
            result.exit_code(),
            result.duration().as_secs_f64(),
            state.attempts(path)
        );
        if let Some(errors) = state.errors.get(path) {
            for error in errors {
                println!("    {}", error);
            }
        }
    }

    println!();
    println!(
        "{} pass(es), {} failing, needs revision: {}",
        state.passes,
        state.errors.len(),
        outcome.needs_revision()
    );
}
