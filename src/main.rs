use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use virtual_board::{
    config::{BoardConfig, Config, LogFormat, LoggingConfig, PathConfig, EXAMPLE_BOARD_CONFIG},
    langbase::LangbaseClient,
    Orchestrator, ProductionMiddleware, Session, SessionExporter,
};

#[derive(Debug, Parser)]
#[command(name = "virtual-board", version, about = "Run a virtual product validation board")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a full board session (default)
    Run {
        /// Board configuration YAML (overrides BOARD_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Export directory (overrides EXPORT_DIR)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write an example board configuration
    Init {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check a board configuration without running it
    Validate {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run {
        config: None,
        output: None,
    }) {
        Command::Run { config, output } => run(config, output).await,
        Command::Init { config, force } => {
            init_logging(&LoggingConfig::default());
            init(&board_path(config), force)
        }
        Command::Validate { config } => {
            init_logging(&LoggingConfig::default());
            validate(&board_path(config))
        }
    }
}

async fn run(board_override: Option<PathBuf>, output: Option<PathBuf>) -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Virtual board starting..."
    );

    let board_file = board_override.unwrap_or_else(|| config.paths.board_config.clone());
    let board = match BoardConfig::load(&board_file) {
        Ok(b) => {
            info!(path = %board_file.display(), product = %b.product.name, "Board configuration loaded");
            b
        }
        Err(e) => {
            error!(error = %e, path = %board_file.display(), "Failed to load board configuration");
            return Err(e.into());
        }
    };
    for warning in board.validate() {
        warn!(warning = %warning, "Board configuration warning");
    }

    // Initialize Langbase client
    let langbase = match LangbaseClient::new(&config.langbase, &config.request) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    let middleware = Arc::new(ProductionMiddleware::new(config.retry.clone()));
    let session = Session::new(board, &config.pipes, Arc::new(langbase.clone()), middleware)?;

    // Ensure required pipes exist (create if needed)
    info!("Ensuring role pipes exist...");
    if let Err(e) = langbase.ensure_role_pipes(session.roles()).await {
        error!(error = %e, "Failed to ensure role pipes exist");
        return Err(e.into());
    }

    let export_dir = output.unwrap_or_else(|| config.paths.export_dir.clone());
    let mut orchestrator = Orchestrator::new(session).with_exporter(SessionExporter::new(export_dir));

    let report = match orchestrator.run().await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Session failed");
            return Err(e.into());
        }
    };

    println!("{}", report.to_markdown());
    info!("Session complete");
    Ok(())
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, EXAMPLE_BOARD_CONFIG)?;
    info!(path = %path.display(), "Example board configuration written");
    println!("Created {}", path.display());
    Ok(())
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let board = BoardConfig::load(path)?;
    let warnings = board.validate();
    let strict = board.validate_strict();

    println!(
        "{}: {} personas, {} hypotheses",
        path.display(),
        board.personas.len(),
        board.hypotheses.len()
    );
    for warning in &warnings {
        println!("warning: {}", warning);
    }
    if let Err(e) = strict {
        println!("error: {}", e);
        return Err(e.into());
    }
    if warnings.is_empty() {
        println!("Configuration is valid");
    }
    Ok(())
}

fn board_path(config: Option<PathBuf>) -> PathBuf {
    config.unwrap_or_else(PathConfig::board_config_from_env)
}

/// Initialize tracing/logging
fn init_logging(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
