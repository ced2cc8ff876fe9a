#[cfg(not(unix))]
compile_error!("shelfmerged only supports Unix-like platforms; union mounts need FUSE.");

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use shelfmerge_core::daemon::ExitCode;

#[derive(Parser)]
#[command(name = "shelfmerged")]
#[command(about = "Daemon maintaining merged mergerfs views of manga library sources")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to settings.yml (the other documents live beside it)
    #[arg(
        short,
        long,
        env = "SHELFMERGE_CONFIG",
        default_value = "/etc/shelfmerge/settings.yml"
    )]
    config: PathBuf,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the merge daemon
    Run,

    /// Run a single merge pass and exit
    Merge {
        /// Remount every existing managed mount even when unchanged
        #[arg(short, long)]
        force: bool,
    },

    /// Show managed union mounts
    Status {
        /// Include branch and option details
        #[arg(short, long)]
        detailed: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective settings
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Validate all configuration documents
    Validate,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer.with_writer(std::io::stderr))
        .init();

    info!("Starting shelfmerged v{}", env!("CARGO_PKG_VERSION"));

    let exit = match cli.command {
        Commands::Run => commands::run::execute(&cli.config).await,
        Commands::Merge { force } => commands::merge::execute(&cli.config, force).await,
        Commands::Status { detailed } => commands::status::execute(&cli.config, detailed).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show { json } => commands::config::show(&cli.config, json),
            ConfigCommands::Validate => commands::config::validate(&cli.config),
        },
    };
    std::process::ExitCode::from(exit.code())
}

/// Load settings and the sibling documents, mapping failures to exit codes.
pub(crate) fn load_all(
    config_path: &std::path::Path,
) -> Result<(shelfmerge_core::Settings, shelfmerge_core::config::Documents), ExitCode> {
    let settings = shelfmerge_core::load_settings(config_path).map_err(|e| {
        eprintln!("Error: {e}");
        ExitCode::from_error(&e)
    })?;
    let config_dir = config_path.parent().unwrap_or(std::path::Path::new("."));
    let documents = shelfmerge_core::load_documents(config_dir).map_err(|e| {
        eprintln!("Error: {e}");
        ExitCode::from_error(&e)
    })?;
    Ok((settings, documents))
}
