//! Token Radar - tiered token discovery with a staged alert gate
//!
//! Alerts are informational. Nothing here trades or signs transactions.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use token_radar::cli::commands;
use token_radar::config::Config;

/// Token Radar - discover momentum tokens and raise vetted alerts
#[derive(Parser)]
#[command(name = "radar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, env = "RADAR_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan on an interval until Ctrl-C
    Run {
        /// Seconds between scans (default: scan.interval_secs)
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Candidates requested per scan (default: discovery.requested_count)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Run a single scan and print the report
    Scan {
        /// Candidates requested
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check data directory and market data API
    Health,

    /// Show a strategy's appearance ledger
    Ledger {
        /// Strategy name
        strategy: String,

        /// Drop records older than ledger.max_age_days first
        #[arg(long)]
        prune: bool,

        /// Number of records to show
        #[arg(short, long, default_value = "25")]
        limit: usize,
    },

    /// Blocklist management
    Blocklist {
        #[command(subcommand)]
        action: BlocklistAction,
    },
}

#[derive(Subcommand)]
enum BlocklistAction {
    /// List blocklisted tokens
    List,

    /// Blocklist a token address
    Add {
        /// Token address
        token: String,

        /// Reason recorded with the entry
        #[arg(default_value = "manual")]
        reason: String,
    },

    /// Remove every entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(cli.json_logs);
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_tracing(cli.json_logs || config.logging.json);

    // Execute command
    let result = match cli.command {
        Commands::Run {
            interval_secs,
            count,
        } => commands::run(&config, interval_secs, count).await,
        Commands::Scan { count } => commands::scan(&config, count).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
        Commands::Ledger {
            strategy,
            prune,
            limit,
        } => commands::ledger(&config, &strategy, prune, limit).await,
        Commands::Blocklist { action } => match action {
            BlocklistAction::List => commands::blocklist_list(&config).await,
            BlocklistAction::Add { token, reason } => {
                commands::blocklist_add(&config, &token, &reason).await
            }
            BlocklistAction::Clear => commands::blocklist_clear(&config).await,
        },
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("token_radar=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.with_thread_ids(true).init();
    }
}
