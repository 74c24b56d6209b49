//! # Logwarden Agent
//!
//! Producer-side collector: tails log files (with truncate-after-consume)
//! and/or reads stdin, filters and batches the lines, and forwards them to
//! the Logwarden server over a reconnecting TCP connection.

mod sink;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use logwarden_core::collect::LogCollector;
use logwarden_model::Level;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::sink::TcpSink;

/// Command line arguments for the Logwarden agent
#[derive(Parser, Debug)]
#[command(name = "logwarden-agent")]
#[command(about = "Tails log files and forwards them to a Logwarden server")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "LOGWARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Server address (overrides config)
    #[arg(short, long, env = "LOGWARDEN_SERVER_ADDR")]
    server: Option<String>,

    /// Files to tail; consumed content is truncated away
    #[arg(short, long)]
    tail: Vec<PathBuf>,

    /// Also forward lines read from stdin
    #[arg(long)]
    stdin: bool,

    /// Level attached to forwarded lines
    #[arg(short, long, default_value = "INFO")]
    level: String,

    /// Tail poll interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Maximum lines consumed per tail round
    #[arg(long, default_value_t = 100)]
    max_lines: usize,

    /// Source name reported with every forwarded line
    #[arg(long, default_value = "logwarden-agent")]
    source: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logwarden_agent=info,logwarden_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.tail.is_empty() && !args.stdin {
        anyhow::bail!("nothing to collect: pass --tail <file> and/or --stdin");
    }

    let mut config =
        logwarden_config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(server) = args.server {
        config.agent.server_addr = server;
    }
    let level = args.level.parse::<Level>().unwrap_or(Level::Info);

    let sink = Arc::new(TcpSink::new(
        config.agent.server_addr.clone(),
        args.source.clone(),
        config.agent.connect_timeout,
    ));
    let collector = Arc::new(LogCollector::new(config.collector.clone(), sink));
    collector.set_error_callback(Arc::new(|message| {
        error!("Collector error: {message}");
    }));

    info!(
        "Forwarding to {} (level {level}, {} tail file(s))",
        config.agent.server_addr,
        args.tail.len()
    );

    for path in &args.tail {
        collector.collect_from_file(
            path.clone(),
            level,
            Duration::from_millis(args.interval_ms),
            args.max_lines,
        );
        info!("Tailing {}", path.display());
    }

    let stdin_task = if args.stdin {
        let collector = Arc::clone(&collector);
        Some(tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    collector.submit(line.as_bytes(), level);
                }
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down, flushing pending entries");

    if let Some(task) = stdin_task {
        task.abort();
    }
    collector.shutdown().await;

    Ok(())
}
