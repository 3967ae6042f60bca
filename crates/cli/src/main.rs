use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use cli::commands::{
    ClassifyCommand, ConfigCommand, EntitiesCommand, PoliciesCommand, RunCommand,
};
use common::init_structured_logging;
use infrastructure::config::{validated, ConfigLoader};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Parser)]
#[command(name = "execq")]
#[command(about = "Run code snippets one at a time with classified, self-cleaning retries")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML or JSON); searched in the usual places when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Execution policy to make current
    #[arg(long, global = true)]
    policy: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    /// -v for debug, -vv for trace
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit snippets back to back and print each outcome
    Run(RunCommand),
    /// Classify an error message with the default rules
    Classify(ClassifyCommand),
    /// List execution and retry policies
    Policies(PoliciesCommand),
    /// Print the effective configuration
    Config(ConfigCommand),
    /// List entity identifiers in the configured stores
    Entities(EntitiesCommand),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path.clone());
    }
    let (mut config, source) = loader.load_with_source().await?;

    if let Some(policy) = cli.policy {
        config.engine.current_policy = policy;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    match cli.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }

    let config = validated(config)?;
    init_structured_logging(config.logging.to_logging_config())?;
    debug!(?source, "Configuration loaded");

    match cli.command {
        Commands::Run(command) => {
            if !command.execute(&config).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Classify(command) => command.execute()?,
        Commands::Policies(command) => command.execute(&config)?,
        Commands::Config(command) => command.execute(&config).await?,
        Commands::Entities(command) => command.execute(&config).await?,
    }

    Ok(ExitCode::SUCCESS)
}
