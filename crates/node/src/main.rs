//! newsnet node
//!
//! This binary provides:
//! - The crawler for every configured path
//! - The HTTP API over the message trie
//! - Offline maintenance: status, dedup migration, export

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use newsnet_core::{MessageKey, SignedMessage};
use newsnet_node::config::{Config, LoggingConfig};
use newsnet_node::crawler::{build_sources, Crawler};
use newsnet_node::migration::DedupMigration;
use newsnet_node::registry::Registry;
use newsnet_node::server::{self, AppState};
use newsnet_node::storage::{SqliteNodeDb, Storage};
use newsnet_node::writer::{MessageStore, StoredMessage};
use newsnet_trie::{Trie, TrieWalker};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "newsnet-node")]
#[command(version, about = "Crawler, allowlist and message store for newsnet", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "node.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the crawler and the API server
    Run,

    /// Show checkpoints, database statistics and the trie root
    Status,

    /// Rebuild the message trie without duplicates (node must be stopped)
    Migrate {
        /// Swap in the rebuilt trie even if it kept no messages
        #[arg(long)]
        force: bool,
    },

    /// Write every stored message to stdout as NDJSON
    Export,

    /// Initialize the crawler database and the trie file
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config);
    init_logging(cli.debug, config.as_ref().ok().map(|c| &c.logging))?;
    let config = config.context("Failed to load configuration")?;

    info!("newsnet node starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_node(&config).await?,
        Commands::Status => show_status(&config).await?,
        Commands::Migrate { force } => migrate(&config, force).await?,
        Commands::Export => export(&config).await?,
        Commands::InitDb => init_database(&config).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: Option<&LoggingConfig>) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = logging.map(|l| l.level.as_str()).unwrap_or("info");
    let env_filter = if debug {
        EnvFilter::new("newsnet_node=debug,newsnet_trie=debug,tower_http=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "newsnet_node={level},newsnet_trie={level},tower_http={level}"
            ))
        })
    };

    let json = logging.is_some_and(|l| l.format == "json");
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .context("Failed to install logger")?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()
            .context("Failed to install logger")?;
    }

    Ok(())
}

async fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::new(
        &config.storage.crawler_database_url,
        Some(config.storage.max_connections),
        Some(config.storage.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

async fn open_registry(config: &Config, storage: &Storage) -> Result<Registry> {
    let registry = Registry::new(
        storage.clone(),
        config.registry.accounts_path.clone(),
        config.registry.delegations_path.clone(),
    );
    registry
        .refresh_all()
        .await
        .context("Failed to load allowlist")?;
    Ok(registry)
}

async fn open_trie(config: &Config) -> Result<(Trie, Arc<SqliteNodeDb>)> {
    let db = Arc::new(SqliteNodeDb::open(&config.storage.trie_path).await?);
    let trie = Trie::open(db.clone())
        .await
        .with_context(|| format!("Failed to open trie {}", config.storage.trie_path))?;
    Ok((trie, db))
}

/// Main node service - runs every crawler path and the API server
async fn run_node(config: &Config) -> Result<()> {
    info!("Starting node");
    info!("  Trie: {}", config.storage.trie_path);
    info!("  Crawler database: {}", config.storage.crawler_database_url);
    info!("  Paths: {}", config.paths.len());

    let storage = open_storage(config).await?;
    let registry = open_registry(config, &storage).await?;
    info!(
        "Allowlist loaded: {} entries",
        registry.snapshot().allowlist_size()
    );

    let (trie, node_db) = open_trie(config).await?;
    info!("Trie opened at root {}", trie.root());

    let sources = build_sources(&config.endpoints)?;
    let crawler = Crawler::new(&config.paths, &sources, storage.clone(), registry.clone())?;
    let handles = crawler.spawn();

    let result = if config.api.enabled {
        let state = AppState::new(
            MessageStore::new(trie, registry.clone()),
            registry,
            storage.clone(),
            config.trie.walk_concurrency,
            config.api.max_page_size,
        );
        server::serve(state, config.api.port).await
    } else {
        info!("API disabled. Press Ctrl+C to stop.");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")
    };

    info!("Shutting down crawler");
    for handle in handles {
        handle.abort();
    }
    node_db.close().await;
    storage.close().await;

    result
}

/// Show checkpoints, database statistics and the trie root
async fn show_status(config: &Config) -> Result<()> {
    let storage = open_storage(config).await?;
    let registry = open_registry(config, &storage).await?;
    let checkpoints = storage.list_checkpoints().await?;
    let stats = storage.stats().await?;

    let (trie, node_db) = open_trie(config).await?;
    let root = trie.root();
    let walk = TrieWalker::new(trie, config.trie.walk_concurrency)
        .walk(root, |_| Ok(()))
        .await
        .context("Failed to walk trie")?;

    println!("\n=== newsnet Node Status ===\n");
    println!("Crawler Paths:");
    if checkpoints.is_empty() {
        println!("  No checkpoints yet.");
    }
    for checkpoint in &checkpoints {
        println!(
            "  {}: block {} (updated {})",
            checkpoint.path,
            checkpoint.last_block,
            chrono::DateTime::from_timestamp(checkpoint.updated_at, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        );
    }

    println!("\nDatabase Statistics:");
    println!("  Records: {}", stats.record_count);
    println!("  Failed logs: {}", stats.failed_count);
    println!("  Archived logs: {}", stats.archived_count);

    let snapshot = registry.snapshot();
    println!("\nAllowlist:");
    println!("  Owners: {}", snapshot.owner_count());
    println!("  Active delegations: {}", snapshot.delegation_count());
    println!("  Allowed addresses: {}", snapshot.allowlist_size());

    println!("\nMessage Trie:");
    println!("  Root: {}", root);
    println!("  Messages: {}", walk.values);
    println!("  Nodes: {} ({} inline)", walk.nodes, walk.inline_nodes);
    println!("  Depth: {}", walk.max_depth);
    println!();

    node_db.close().await;
    storage.close().await;

    Ok(())
}

/// Deduplicate the message trie in place
async fn migrate(config: &Config, force: bool) -> Result<()> {
    let storage = open_storage(config).await?;
    let registry = open_registry(config, &storage).await?;
    storage.close().await;

    let report = DedupMigration::new(&config.storage.trie_path, registry)
        .force(force)
        .run()
        .await?;

    info!("Migration complete");
    info!("  Scanned: {}", report.scanned);
    info!("  Kept: {}", report.kept);
    info!("  Skipped: {}", report.skipped);
    info!("  Root: {}", report.root);
    info!("  Previous trie kept at {}", report.retired.display());

    Ok(())
}

/// Stream every message to stdout, one JSON object per line
async fn export(config: &Config) -> Result<()> {
    let (trie, node_db) = open_trie(config).await?;
    let root = trie.root();

    let mut stdout = tokio::io::stdout();
    let mut exported = 0u64;
    let mut leaves = trie.leaves_at(root);
    while let Some((key, value)) = leaves.try_next().await? {
        let key = MessageKey::from_slice(&key)?;
        let message: SignedMessage = match serde_json::from_slice(&value) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping unreadable message {}: {}", key, e);
                continue;
            }
        };
        let mut line = serde_json::to_vec(&StoredMessage { key, message })?;
        line.push(b'\n');
        stdout
            .write_all(&line)
            .await
            .context("Failed to write to stdout")?;
        exported += 1;
    }
    stdout.flush().await.context("Failed to flush stdout")?;

    let walk = TrieWalker::new(trie, config.trie.walk_concurrency)
        .walk(root, |_| Ok(()))
        .await
        .context("Failed to walk trie")?;
    info!(
        "Exported {} messages from root {} ({} nodes)",
        exported, root, walk.nodes
    );

    node_db.close().await;
    Ok(())
}

/// Initialize the crawler database and the trie file
async fn init_database(config: &Config) -> Result<()> {
    info!(
        "Initializing database: {}",
        config.storage.crawler_database_url
    );

    let storage = open_storage(config).await?;
    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Paths: {}", stats.path_count);
    info!("  Records: {}", stats.record_count);

    let (trie, node_db) = open_trie(config).await?;
    info!("Trie ready at {} (root {})", config.storage.trie_path, trie.root());

    node_db.close().await;
    storage.close().await;

    Ok(())
}
