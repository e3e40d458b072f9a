use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatewright_core::wire::ExecutionRequest;
use gatewright_planner::config::GatewrightConfig;
use gatewright_planner::metrics::{GateMetrics, LoggingMetricsBackend};
use gatewright_planner::operators::parse_command;
use gatewright_planner::pipeline::GateResolutionPipeline;
use gatewright_planner::types::PromptCatalog;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "gatewright",
    about = "Gatewright: resolve quality gates and execution plans for prompt requests"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve gates for a request and print the result as JSON
    Resolve {
        /// Request JSON file, or `-` for stdin
        #[arg(long)]
        request: PathBuf,
        /// Prompt catalog JSON file
        #[arg(long)]
        prompts: PathBuf,
        /// Config file (defaults to ~/.gatewright/config.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check a request against the wire format without resolving it
    Validate {
        /// Request JSON file, or `-` for stdin
        #[arg(long)]
        request: PathBuf,
    },
    /// Show how a command string parses into steps and operators
    Parse {
        /// Command text, e.g. ">>analyze :: 'cite sources'"
        command: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only JSON output
    fmt()
        .with_env_filter(EnvFilter::from_env("GATEWRIGHT_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Resolve {
            request,
            prompts,
            config,
        } => run_resolve(&request, &prompts, config.as_deref()).await,
        Command::Validate { request } => run_validate(&request),
        Command::Parse { command } => {
            let parsed = parse_command(&command);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
            Ok(())
        }
    }
}

async fn run_resolve(request: &Path, prompts: &Path, config: Option<&Path>) -> Result<()> {
    let request = read_request(request)?;
    let config = GatewrightConfig::load(config).context("Failed to load config")?;
    let catalog = PromptCatalog::load(prompts)
        .await
        .context("Failed to load prompt catalog")?;

    let pipeline = GateResolutionPipeline::with_defaults(config, catalog)
        .with_metrics(Arc::new(GateMetrics::with_backend(Arc::new(LoggingMetricsBackend))))
        .with_metrics_sink(Arc::new(LoggingMetricsBackend));

    let resolved = pipeline.resolve(&request).await?;
    tracing::info!(
        gates = resolved.gates.len(),
        diagnostics = resolved.diagnostics.len(),
        "Request resolved"
    );
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}

fn run_validate(request: &Path) -> Result<()> {
    let request = read_request(request)?;
    request.validate()?;
    println!("Request is valid");
    Ok(())
}

fn read_request(path: &Path) -> Result<ExecutionRequest> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request {}", path.display()))?
    };
    serde_json::from_str(&content).context("Request is not valid JSON for an execution request")
}
