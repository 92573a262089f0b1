mod ml_backend;
mod serve;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use vislabel_contracts::events::EventWriter;
use vislabel_contracts::predictions::PredictionRecord;
use vislabel_contracts::tasks::parse_task_batch;
use vislabel_engine::logging::parse_level;
use vislabel_engine::{
    init_logging, ArkClientConfig, ArkVisionClient, BackendConfig, DryrunVisionClient,
    InferenceBackend, LogConfig, LogSink, VisionBackend, VisionClient, VisionClientRegistry,
};

#[derive(Debug, Parser)]
#[command(
    name = "vislabel",
    version,
    about = "Describe annotation-task images with a hosted vision model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a task batch and print one prediction per task.
    Predict(PredictArgs),
    /// Serve the storage root over HTTP for the labeling UI.
    Serve(ServeArgs),
    /// Answer the annotation host's `/predict`, `/setup` and `/health` calls.
    Backend(BackendArgs),
}

#[derive(Debug, Args)]
struct PredictArgs {
    /// Task batch JSON file, or `-` for stdin.
    #[arg(long)]
    tasks: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    backend: BackendOptions,
    #[command(flatten)]
    log: LogArgs,
}

#[derive(Debug, Args)]
struct BackendArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = 9090)]
    port: u16,
    #[command(flatten)]
    backend: BackendOptions,
    #[command(flatten)]
    log: LogArgs,
}

/// How to build the prediction backend, shared by `predict` and `backend`.
#[derive(Debug, Args)]
struct BackendOptions {
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "ark")]
    client: String,
    #[arg(long)]
    storage_root: Option<PathBuf>,
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long)]
    root: Option<PathBuf>,
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = 8000)]
    port: u16,
    #[command(flatten)]
    log: LogArgs,
}

#[derive(Debug, Args)]
struct LogArgs {
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl LogArgs {
    fn to_config(&self) -> Result<LogConfig> {
        let sink = match &self.log_file {
            Some(path) => LogSink::File(path.clone()),
            None => LogSink::Stderr,
        };
        Ok(LogConfig::new(parse_level(&self.log_level)?, sink))
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vislabel error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    match cli.command {
        Command::Predict(args) => run_predict(args),
        Command::Serve(args) => run_serve(args),
        Command::Backend(args) => run_backend(args),
    }
}

fn run_predict(args: PredictArgs) -> Result<i32> {
    init_logging(&args.log.to_config()?)?;
    let predictions = execute_predict(&args)?;
    let rendered = serde_json::to_string_pretty(&predictions)?;
    match &args.out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, rendered)
                .with_context(|| format!("failed writing {}", path.display()))?;
            log::info!(
                "Wrote {} predictions to {}",
                predictions.len(),
                path.display()
            );
        }
        None => println!("{rendered}"),
    }
    Ok(0)
}

fn execute_predict(args: &PredictArgs) -> Result<Vec<PredictionRecord>> {
    let raw = read_tasks(&args.tasks)?;
    let tasks = parse_task_batch(&raw)
        .with_context(|| format!("invalid task batch in {}", args.tasks.display()))?;
    let backend = build_backend(&args.backend)?;
    Ok(backend.predict(&tasks))
}

fn build_backend(options: &BackendOptions) -> Result<VisionBackend> {
    let mut config = BackendConfig::from_env()?;
    if let Some(root) = &options.storage_root {
        config.storage_root = root.clone();
    }
    if let Some(base_url) = &options.base_url {
        config.base_url = base_url.clone();
    }

    let mut backend = VisionBackend::new(config, build_client(&options.client)?);
    if let Some(events_path) = &options.events {
        let batch_id = uuid::Uuid::new_v4().to_string();
        log::info!("Recording task events for batch {batch_id} to {}", events_path.display());
        backend = backend.with_events(EventWriter::new(events_path, batch_id));
    }
    Ok(backend)
}

fn read_tasks(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("failed reading tasks from stdin")?;
        return Ok(raw);
    }
    fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))
}

fn build_client(name: &str) -> Result<Box<dyn VisionClient>> {
    let mut registry = VisionClientRegistry::new();
    registry.register(DryrunVisionClient);
    if name == "ark" {
        registry.register(ArkVisionClient::new(ArkClientConfig::from_env()?)?);
    }
    registry
        .take(name)
        .with_context(|| format!("unknown client '{name}' (expected 'ark' or 'dryrun')"))
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    init_logging(&args.log.to_config()?)?;
    let root = match args.root.clone() {
        Some(root) => root,
        None => BackendConfig::from_env()?.storage_root,
    };
    serve::run_static_server(root, &args.host, args.port)?;
    Ok(0)
}

fn run_backend(args: BackendArgs) -> Result<i32> {
    init_logging(&args.log.to_config()?)?;
    let backend: Arc<dyn InferenceBackend> = Arc::new(build_backend(&args.backend)?);
    ml_backend::run_ml_backend(backend, &args.host, args.port)?;
    Ok(0)
}
