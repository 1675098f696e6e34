use clap::{Parser, Subcommand};
use logtide::cli::analyze::AnalyzeArgs;
use logtide::cli::follow::FollowArgs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logtide")]
#[command(about = "Incremental and live analysis of robot launch logs", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarise a log file, resuming from the last checkpoint
    Analyze(AnalyzeArgs),
    /// Follow a growing log file with a live dashboard
    Follow(FollowArgs),
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a commented starter config
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; reports own stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logtide=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze(args) => {
            let (config, _) = logtide::config::load_or_default(cli.config.as_deref())?;
            logtide::cli::analyze::run(args, config).await?;
        }
        Commands::Follow(args) => {
            let (config, _) = logtide::config::load_or_default(cli.config.as_deref())?;
            logtide::cli::follow::run(args, config).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { stdout } => {
                logtide::cli::config::init(stdout)?;
            }
        },
    }

    Ok(())
}
