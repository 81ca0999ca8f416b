// Hookwarden - Main Entry Point
//
// Operator CLI for the webhook reliability engine:
// - Recording webhooks and processing them through the HTTP forwarder
// - Listing, inspecting and replaying records
// - One-shot sweeps and retention cleanup
// - A long-running service that sweeps on an interval

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hookwarden::config::{Config, ForwardConfig};
use hookwarden::webhooks::record::{Correlation, RequestMeta};
use hookwarden::webhooks::store::{FileRecordStore, ListQuery, MemoryRecordStore, RecordStore};
use hookwarden::webhooks::{DeliveryHandler, HttpForwardHandler, WebhookEngine};
use hookwarden::{logging, metrics_server, NewRecord, RecordStatus, WebhookError, WebhookSource};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Hookwarden: webhook delivery reliability engine
#[derive(Parser, Debug)]
#[command(name = "hookwarden")]
#[command(author = "Hookwarden Contributors")]
#[command(version)]
#[command(about = "Durable webhook records with retries, sweeps and replay", long_about = None)]
struct Args {
    /// Configuration file (default: ~/.config/hookwarden/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Record store file, overrides [store].path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record an inbound webhook as pending
    Create {
        /// Tenant (organization) owning the webhook
        #[arg(long)]
        tenant: String,

        /// Provider event type, e.g. payment.completed
        #[arg(long)]
        event_type: String,

        /// Provider that sent the webhook
        #[arg(long, default_value = "other")]
        source: WebhookSource,

        /// Payload as a JSON document
        #[arg(long)]
        payload: String,

        /// Provider signature header value
        #[arg(long)]
        signature: Option<String>,

        /// Address the webhook arrived from
        #[arg(long)]
        origin_ip: Option<String>,

        /// Transaction the webhook relates to
        #[arg(long)]
        transaction_id: Option<String>,

        /// Customer the webhook relates to
        #[arg(long)]
        customer_id: Option<String>,
    },
    /// Attempt a record now through the forwarding handler
    Process {
        id: Uuid,
    },
    /// Show a single record
    Get {
        id: Uuid,
    },
    /// List a tenant's records, newest first
    List {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        status: Option<RecordStatus>,

        #[arg(long)]
        source: Option<WebhookSource>,

        #[arg(long)]
        event_type: Option<String>,

        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Reset a success or failed record to pending
    Replay {
        id: Uuid,

        /// Attempt the record immediately after resetting it
        #[arg(long)]
        process: bool,
    },
    /// Attempt due records once
    Sweep {
        /// Maximum records to attempt (default: [sweeper].batch_limit)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete terminal records past retention
    Cleanup {
        /// Days to keep records (default: [retention].retention_days)
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Per-status record counts
    Stats {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Sweep on an interval until Ctrl-C
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", describe(&e));
            ExitCode::FAILURE
        }
    }
}

/// Engine errors are shown through their public message only
fn describe(e: &anyhow::Error) -> String {
    match e.downcast_ref::<WebhookError>() {
        Some(webhook_error) => webhook_error.public_message(),
        None => format!("{:#}", e),
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(store) = args.store {
        config.store.path = Some(store);
    }

    logging::init(&config.logging, args.verbose)?;

    let store = open_store(&config).await?;
    let engine = WebhookEngine::new(store, config.engine_settings());

    match args.command {
        Commands::Create {
            tenant,
            event_type,
            source,
            payload,
            signature,
            origin_ip,
            transaction_id,
            customer_id,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)
                .map_err(|e| WebhookError::Validation(format!("payload is not valid JSON: {}", e)))?;

            let mut input = NewRecord::new(tenant, event_type, source, payload);
            if signature.is_some() || origin_ip.is_some() {
                input = input.with_request_meta(RequestMeta {
                    signature,
                    origin_ip,
                    ..RequestMeta::default()
                });
            }
            if transaction_id.is_some() || customer_id.is_some() {
                input = input.with_correlation(Correlation {
                    transaction_id,
                    customer_id,
                });
            }

            print_json(&engine.create_record(input).await?)
        }
        Commands::Process { id } => {
            let handler = forward_handler(&config.forward)?;
            print_json(&engine.process_now(id, handler).await?)
        }
        Commands::Get { id } => print_json(&engine.get_record(id).await?),
        Commands::List {
            tenant,
            status,
            source,
            event_type,
            page,
            limit,
        } => {
            let mut query = ListQuery::new(tenant).page(page, limit);
            query.status = status;
            query.source = source;
            query.event_type = event_type;
            print_json(&engine.list_records(&query).await?)
        }
        Commands::Replay { id, process } => {
            let record = engine.replay(id).await?;
            if process {
                let handler = forward_handler(&config.forward)?;
                print_json(&engine.process_now(record.id, handler).await?)
            } else {
                print_json(&record)
            }
        }
        Commands::Sweep { limit } => {
            let handler = forward_handler(&config.forward)?;
            let limit = limit.unwrap_or(config.sweeper.batch_limit);
            let processed = engine.sweep_due(limit, handler).await?;
            print_json(&serde_json::json!({ "processed": processed }))
        }
        Commands::Cleanup { retention_days } => {
            let days = retention_days.unwrap_or(config.retention.retention_days);
            let deleted = engine.cleanup(days).await?;
            print_json(&serde_json::json!({ "deleted": deleted, "retention_days": days }))
        }
        Commands::Stats { tenant } => print_json(&engine.stats(tenant.as_deref()).await?),
        Commands::Serve => serve(&config, &engine).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    match &config.store.path {
        Some(path) => {
            let store = FileRecordStore::open(path).await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No store path configured, records are kept in memory only");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
    }
}

fn forward_handler(config: &ForwardConfig) -> Result<Arc<dyn DeliveryHandler>> {
    let url = config.url.as_ref().ok_or_else(|| {
        WebhookError::Validation(
            "no forward url configured; set [forward].url or HOOKWARDEN_FORWARD_URL".to_string(),
        )
    })?;

    Ok(Arc::new(
        HttpForwardHandler::new(url.clone())
            .with_headers(config.headers.clone())
            .with_auth_token(config.auth_token.clone()),
    ))
}

async fn serve(config: &Config, engine: &WebhookEngine) -> Result<()> {
    let handler = forward_handler(&config.forward)?;

    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            if let Err(e) = metrics_server::start_metrics_server(port, shutdown).await {
                error!("Metrics server stopped: {:#}", e);
            }
        });
    }

    info!(
        "Hookwarden v{} sweeping every {}s",
        env!("CARGO_PKG_VERSION"),
        config.sweeper.interval_secs
    );

    engine
        .sweeper(handler)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await;

    info!("Hookwarden stopped");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", text);
    Ok(())
}
