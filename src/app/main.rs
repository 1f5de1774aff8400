/**
 * AuriLog Sync Agent
 *
 * Headless driver for the sync layer. Connectivity edges and user intents
 * arrive as lines on stdin:
 *
 *   online | offline
 *   perform <table> <insert|update|delete> <json>
 *   list <table>
 *   presence
 *   status
 *   quit
 *
 * See `--help` for flags.
 */

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use aurilog_sync::app::config::Config;
use aurilog_sync::app::context::SyncContext;
use aurilog_sync::app::remote::{Backend, MemoryBackend, RestBackend};
use aurilog_sync::app::sync::network_monitor::{probe_status, Connectivity};
use aurilog_sync::app::sync::PerformOutcome;
use aurilog_sync::shared::error::SyncError;
use aurilog_sync::shared::models::{Action, EntityTable, Record};

/// Offline-first sync agent for the AuriLog fleet app
#[derive(Debug, Parser)]
#[command(name = "aurilog-sync", version, about)]
struct Cli {
    /// TOML config file (defaults to the platform config directory)
    #[arg(short, long, env = "AURILOG_CONFIG")]
    config: Option<PathBuf>,

    /// Use an in-process backend instead of the hosted one
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "aurilog_sync=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let config_path = args.config.or_else(Config::default_path);
    let config = Config::load(config_path.as_deref())?;
    let session = config.session()?;
    let app = config.app().clone();

    // Without a real network path the configured start state stands in for the probe
    let (backend, initial): (Arc<dyn Backend>, Connectivity) = if args.memory {
        let initial = if app.start_online { Connectivity::Online } else { Connectivity::Offline };
        (Arc::new(MemoryBackend::new()), initial)
    } else {
        let initial = probe_status(&app.backend_url).await;
        (Arc::new(RestBackend::new(app.backend_url.clone(), app.api_key.clone())), initial)
    };

    tracing::info!("[Startup] Signed in as {} ({})", session.email, session.user_id);
    let context = SyncContext::init(app, session, backend, initial).await?;
    let _presence = match context.start_presence().await {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            tracing::warn!("[Startup] Presence tracking unavailable: {}", e);
            None
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }
        if let Err(e) = run_command(&context, line).await {
            println!("error: {}", e.user_message());
        }
    }

    context.shutdown().await;
    Ok(())
}

async fn run_command(context: &SyncContext, line: &str) -> Result<(), SyncError> {
    let mut parts = line.splitn(4, ' ');
    match parts.next().unwrap_or_default() {
        "online" => {
            context.monitor().signal_online();
        }
        "offline" => {
            context.monitor().signal_offline();
        }
        "perform" => {
            let table: EntityTable = parts.next().unwrap_or_default().parse()?;
            let action: Action = parts.next().unwrap_or_default().parse()?;
            let payload = parse_payload(parts.next().unwrap_or("{}"))?;
            match context.engine().perform(table, action, payload).await? {
                PerformOutcome::Applied(Some(record)) => println!("applied {}", serde_json::to_string(&record)?),
                PerformOutcome::Applied(None) => println!("applied"),
                PerformOutcome::Queued(op) => println!("queued #{}", op.seq),
            }
        }
        "list" => {
            let table: EntityTable = parts.next().unwrap_or_default().parse()?;
            for record in context.cache().list(table).await {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        "presence" => {
            let now = chrono::Utc::now();
            for status in context.presence().drivers_with_presence(now).await {
                let state = if status.online { "online" } else { "offline" };
                println!("{} {}", status.driver.email, state);
            }
        }
        "status" => {
            println!("{}", serde_json::to_string_pretty(&context.engine().status().await?)?);
        }
        other => println!("unknown command '{}'", other),
    }
    Ok(())
}

fn parse_payload(text: &str) -> Result<Record, SyncError> {
    match serde_json::from_str(text)? {
        serde_json::Value::Object(record) => Ok(record),
        _ => Err(SyncError::validation("payload", "must be a JSON object")),
    }
}
