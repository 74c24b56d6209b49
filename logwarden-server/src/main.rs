//! # Logwarden Server
//!
//! Central service of the log pipeline: accepts CRLF-framed log lines over
//! long-lived TCP connections, parses and archives them, runs the analysis
//! rule set, and raises alerts through the configured notification channels.
//!
//! Built on:
//! - Tokio for the listener, drainers, and worker pools
//! - PostgreSQL for the normalized log/alert archive
//! - Redis for raw payloads, analysis results, and live alerts

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use logwarden_core::alert::AlertManager;
use logwarden_core::analyze::LogAnalyzer;
use logwarden_core::process::LogProcessor;
use logwarden_core::storage::{Cache, LogStore, PostgresStore, RedisCache};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logwarden_server::ingest::{self, ConnectionRegistry};

/// Command line arguments for the Logwarden server
#[derive(Parser, Debug)]
#[command(name = "logwarden-server")]
#[command(about = "Log ingestion, analysis, and alerting server")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "LOGWARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Listener port (overrides config)
    #[arg(short, long, env = "LOGWARDEN_PORT")]
    port: Option<u16>,

    /// Listener host (overrides config)
    #[arg(long, env = "LOGWARDEN_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "logwarden_server=info,logwarden_core=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config =
        logwarden_config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.processor.tcp_port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    // Storage is optional but not best-effort: a configured backend that
    // cannot be reached refuses startup rather than silently dropping data.
    let cache: Option<Arc<dyn Cache>> = match &config.redis {
        Some(redis) => {
            let cache = RedisCache::connect(&redis.url)
                .await
                .context("failed to connect to Redis")?;
            Some(Arc::new(cache))
        }
        None => {
            warn!("No Redis configured; raw payloads and live alerts will not be cached");
            None
        }
    };

    let store: Option<Arc<dyn LogStore>> = match &config.database.url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.database.max_connections())
                .await
                .context("failed to connect to Postgres")?;
            store
                .initialize()
                .await
                .context("failed to initialize the log schema")?;
            Some(Arc::new(store))
        }
        None => {
            warn!("No database configured; records and alert history will not be persisted");
            None
        }
    };

    // Wire the pipeline back to front: alerts <- analyzer <- processor.
    let alert_manager = Arc::new(AlertManager::with_storage(
        config.alert.clone(),
        cache.clone(),
        store.clone(),
    ));

    let analyzer = Arc::new(LogAnalyzer::with_storage(
        config.analyzer.clone(),
        cache.clone(),
        store.clone(),
    ));
    {
        let alert_manager = Arc::clone(&alert_manager);
        analyzer.set_analysis_callback(Arc::new(move |record, results| {
            let alert_manager = Arc::clone(&alert_manager);
            let record = record.clone();
            let results = results.clone();
            tokio::spawn(async move {
                alert_manager.check_alerts(&record, &results).await;
            });
        }));
    }

    let processor = Arc::new(LogProcessor::new(
        config.processor.clone(),
        Arc::clone(&analyzer),
        cache.clone(),
        store.clone(),
    ));

    alert_manager.start();
    processor.start();

    if alert_manager.rule_count() == 0 {
        info!("No alert rules registered; records will be analyzed but never alerted on");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.processor.tcp_port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("Logwarden server listening on {bind_addr}");

    let registry = Arc::new(ConnectionRegistry::default());
    let shutdown = Arc::new(Notify::new());

    let ingest_task = {
        let processor = Arc::clone(&processor);
        let registry = Arc::clone(&registry);
        let shutdown = Arc::clone(&shutdown);
        let max_frame_len = config.server.max_frame_len;
        tokio::spawn(async move {
            ingest::serve(listener, processor, registry, max_frame_len, shutdown).await;
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    // Stop intake first, then drain the pipeline front to back.
    shutdown.notify_waiters();
    let _ = ingest_task.await;
    processor.stop().await;
    alert_manager.stop().await;

    info!("Logwarden server stopped");
    Ok(())
}
