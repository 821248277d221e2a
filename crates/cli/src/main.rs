//! AgentX CLI — the main entry point.
//!
//! Commands:
//! - `plan validate` — Check a plan file and report its shape
//! - `plan run`      — Dry-run a plan against the echo handler
//! - `code`          — Evaluate an inline code block
//! - `config`        — Show or initialise configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agentx",
    about = "AgentX — declarative task plans, goal-verified agents and agent pipes",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or execute task plans
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },

    /// Evaluate an inline code block and print its bindings
    Code {
        /// The code block, e.g. "x = 1; y = x + 2"
        source: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PlanAction {
    /// Parse a plan file and report its instruction and step counts
    Validate {
        /// Path to a JSON plan
        file: PathBuf,
    },

    /// Execute a plan and print the JSON result history
    Run {
        /// Path to a JSON plan
        file: PathBuf,

        /// Answer every operation with its resolved parameters
        #[arg(long)]
        dry_run: bool,

        /// Code block to run before the first instruction
        #[arg(long)]
        code: Option<String>,

        /// Override engine.max_steps
        #[arg(long)]
        max_steps: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default config file if none exists
    Init,

    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Plan { action } => match action {
            PlanAction::Validate { file } => commands::plan::validate(&file).await?,
            PlanAction::Run {
                file,
                dry_run,
                code,
                max_steps,
            } => commands::plan::run(&file, dry_run, code, max_steps).await?,
        },
        Commands::Code { source } => commands::code::run(&source)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
