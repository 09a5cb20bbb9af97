//! CLI command implementations

use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::alert::Blocklist;
use crate::config::Config;
use crate::discovery::{
    DexScreenerProvider, DiscoveryStrategy, MajorTokenDenylist, MarketDataProvider, ProviderQuery,
    QueryFilters, StrategyDeps,
};
use crate::scanner::{ScanPipeline, ScanReport};
use crate::store::{JsonFileStore, PersistentStore};

/// Scan continuously until Ctrl-C
pub async fn run(config: &Config, interval_secs: Option<u64>, count: Option<usize>) -> Result<()> {
    let interval = Duration::from_secs(interval_secs.unwrap_or(config.scan.interval_secs).max(1));
    let count = count.unwrap_or(config.discovery.requested_count);

    info!(
        interval_secs = interval.as_secs(),
        count,
        strategies = config.strategies.len(),
        "Starting token radar"
    );

    let pipeline = ScanPipeline::from_config(config).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        shutdown.cancel();
    });

    let scans = pipeline.run(interval, count, cancel).await;
    info!(scans, "Token radar stopped");
    Ok(())
}

/// Run a single scan and print the outcome
pub async fn scan(config: &Config, count: Option<usize>) -> Result<()> {
    let count = count.unwrap_or(config.discovery.requested_count);
    let pipeline = ScanPipeline::from_config(config).await?;

    let report = pipeline.run_once(count).await;
    pipeline.orchestrator().wait_for_flushes().await;

    print_report(&report);
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!("\n=== SCAN REPORT ===\n");
    println!("Started:        {}", report.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Tiers run:      {}", report.tiers_run);
    println!("Final level:    {}", report.final_level);
    println!("Discovered:     {}", report.discovered);
    println!("Accepted:       {}", report.accepted.len());
    println!("Rejected:       {}", report.rejected_total());
    println!("Blocklisted:    {}", report.blocklisted.len());
    println!("Elapsed:        {}ms", report.elapsed_ms);
    if report.dedup_cleared {
        println!("\nNo candidates found; dedup cache was reset.");
    }

    if !report.accepted.is_empty() {
        println!("\n=== ALERTS ===\n");
        for symbol in &report.accepted {
            println!("  {}", symbol);
        }
    }

    if !report.rejected.is_empty() {
        println!("\n=== REJECTIONS BY STAGE ===\n");
        for (stage, count) in &report.rejected {
            println!("  {:<20} {}", stage.to_string(), count);
        }
    }
    println!();
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check that storage and the market data API are reachable
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("Data directory... ");
    std::io::stdout().flush().ok();
    let store = JsonFileStore::new(&config.storage.data_dir);
    let marker = serde_json::json!({ "checked_at": Utc::now() });
    match store.save("health_check", &marker).await {
        Ok(()) => println!("OK ({})", config.storage.data_dir.display()),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("DexScreener API... ");
    std::io::stdout().flush().ok();
    let started = std::time::Instant::now();
    let provider = DexScreenerProvider::new(config.dexscreener.clone())?;
    let Some(first) = config.strategies.first() else {
        anyhow::bail!("no strategies configured");
    };
    let (endpoint, sort_by, direction) = first.kind.default_sort();
    let query = ProviderQuery {
        endpoint,
        sort_by,
        direction,
        page_size: 1,
        filters: QueryFilters::default(),
    };
    match provider.query(&query).await {
        Ok(tokens) => println!(
            "OK ({} tokens, {}ms)",
            tokens.len(),
            started.elapsed().as_millis()
        ),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    println!();
    if all_healthy {
        println!("All systems healthy.");
        Ok(())
    } else {
        anyhow::bail!("health check failed")
    }
}

/// Show a strategy's appearance ledger
pub async fn ledger(config: &Config, strategy: &str, prune: bool, limit: usize) -> Result<()> {
    let definition = config
        .strategies
        .iter()
        .find(|d| d.name == strategy)
        .cloned()
        .with_context(|| {
            let names: Vec<&str> = config.strategies.iter().map(|d| d.name.as_str()).collect();
            format!("unknown strategy '{}' (configured: {})", strategy, names.join(", "))
        })?;

    let store: Arc<dyn PersistentStore> = Arc::new(JsonFileStore::new(&config.storage.data_dir));
    let flushes = TaskTracker::new();
    let deps = StrategyDeps {
        store,
        classifier: None,
        denylist: Arc::new(MajorTokenDenylist::default()),
        flushes: flushes.clone(),
        classifier_batch_size: config.discovery.classifier_batch_size,
    };
    let strategy = DiscoveryStrategy::new(definition, config.ledger.clone(), deps).await?;

    if prune {
        let removed = strategy.prune(Utc::now()).await;
        println!("Pruned {} stale records", removed);
    }

    let records = strategy.appearance_records().await;
    let promising = strategy.promising_tokens().await;

    println!("\n=== LEDGER: {} ===\n", strategy.name());
    println!("{}", strategy.description());
    match strategy.last_execution_time().await {
        Some(at) => println!("Last run: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last run: never"),
    }
    println!("Records: {} ({} promising)\n", records.len(), promising.len());

    println!(
        "{:<12} {:<46} {:>6} {:>6} {:>14} {}",
        "SYMBOL", "ADDRESS", "CONSEC", "TOTAL", "LIQUIDITY", "LAST SEEN"
    );
    println!("{}", "-".repeat(110));
    for record in records.iter().take(limit) {
        let marker = if promising.contains(&record.token_address) {
            "*"
        } else {
            " "
        };
        println!(
            "{}{:<11} {:<46} {:>6} {:>6} {:>14.0} {}",
            marker,
            record.last_observed_payload.symbol,
            record.token_address,
            record.consecutive_appearances,
            record.total_appearances,
            record.last_observed_payload.liquidity_usd,
            record.last_seen_at.format("%m-%d %H:%M")
        );
    }
    println!();

    flushes.close();
    flushes.wait().await;
    Ok(())
}

fn open_blocklist(config: &Config) -> (Arc<dyn PersistentStore>, TaskTracker) {
    let store: Arc<dyn PersistentStore> = Arc::new(JsonFileStore::new(&config.storage.data_dir));
    (store, TaskTracker::new())
}

/// List blocklisted tokens
pub async fn blocklist_list(config: &Config) -> Result<()> {
    let (store, flushes) = open_blocklist(config);
    let blocklist = Blocklist::load(store, flushes).await;
    let entries = blocklist.list().await;

    println!("\n=== BLOCKLIST ===\n");
    if entries.is_empty() {
        println!("No blocklisted tokens.\n");
        return Ok(());
    }

    println!("{:<46} {:<18} {}", "TOKEN", "ADDED", "REASON");
    println!("{}", "-".repeat(100));
    for (token, entry) in entries {
        println!(
            "{:<46} {:<18} {}",
            token,
            entry.added_at.format("%Y-%m-%d %H:%M"),
            entry.reason
        );
    }
    println!();
    Ok(())
}

/// Blocklist a token manually
pub async fn blocklist_add(config: &Config, token: &str, reason: &str) -> Result<()> {
    let (store, flushes) = open_blocklist(config);
    let blocklist = Blocklist::load(store, flushes.clone()).await;

    if blocklist.add(token, reason).await {
        println!("Blocklisted {}", token);
    } else {
        println!("{} is already blocklisted", token);
    }

    flushes.close();
    flushes.wait().await;
    Ok(())
}

/// Remove every blocklist entry
pub async fn blocklist_clear(config: &Config) -> Result<()> {
    let (store, flushes) = open_blocklist(config);
    let blocklist = Blocklist::load(store, flushes.clone()).await;

    let removed = blocklist.clear().await;
    println!("Removed {} blocklist entries", removed);

    flushes.close();
    flushes.wait().await;
    Ok(())
}
