// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensorcast WebSocket server - live sensor history pushed to browsers.
//!
//! Runs the telemetry pipeline (producer, InfluxDB persistence, bounded
//! history) and serves it over HTTP:
//! - `GET /ws` pushes the full recent history on connect, then once per tick
//! - `POST /data` accepts readings from a device (`--source ingest`)
//! - `GET /data` queries recent points from the store
//! - `GET /health` and `GET /stats` for monitoring
//!
//! # Usage
//!
//! ```bash
//! # Simulated sensor, in-memory store
//! sensorcast-ws --store memory
//!
//! # Readings posted by a Raspberry Pi, persisted to InfluxDB
//! sensorcast-ws --config sensorcast.toml --source ingest
//!
//! # Write an example configuration
//! sensorcast-ws gen-config -o sensorcast.toml
//! ```
//!
//! # Frames
//!
//! ```json
//! {"temperature": [{"timestamp": "2024-12-03T10:00:00Z", "value": 24.1}],
//!  "humidity": [{"timestamp": "2024-12-03T10:00:00Z", "value": 61.5}]}
//! ```

mod handlers;
mod protocol;
mod session;

use anyhow::{bail, Context};
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use sensorcast::{
    Broadcaster, IngestHandle, IngestSource, InfluxStore, MemoryStore, Producer, ProducerState,
    ReadingSource, SensorcastConfig, SharedHistory, SimulatedSource, SourceMode, StoreBackend,
    StoreWriter, TimeSeriesStore,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Sensorcast WebSocket server
#[derive(Parser, Debug)]
#[command(name = "sensorcast-ws")]
#[command(about = "Sensorcast - live sensor telemetry over WebSocket")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP/WebSocket port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Maximum concurrent WebSocket connections
    #[arg(long)]
    max_clients: Option<usize>,

    /// Reading source: simulated or ingest
    #[arg(short, long)]
    source: Option<SourceMode>,

    /// Persistence backend: influx or memory
    #[arg(long)]
    store: Option<StoreBackend>,

    /// InfluxDB base URL
    #[arg(long)]
    influx_url: Option<String>,

    /// InfluxDB organization
    #[arg(long)]
    influx_org: Option<String>,

    /// InfluxDB bucket
    #[arg(long)]
    influx_bucket: Option<String>,

    /// InfluxDB API token (falls back to $INFLUX_TOKEN)
    #[arg(long)]
    influx_token: Option<String>,

    /// Tick period in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Points kept per metric kind
    #[arg(long)]
    history: Option<usize>,

    /// Seed for the simulated source
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print or write an example configuration
    GenConfig {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a configuration file and exit
    Validate {
        /// File to check
        path: PathBuf,
    },
}

impl Args {
    /// File (or default) configuration with command-line overrides applied.
    fn load_config(&self) -> anyhow::Result<SensorcastConfig> {
        let mut config = match &self.config {
            Some(path) => SensorcastConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => SensorcastConfig::default(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(max) = self.max_clients {
            config.server.max_clients = max;
        }
        if let Some(source) = self.source {
            config.pipeline.source = source;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.pipeline.tick_period_ms = tick_ms;
        }
        if let Some(history) = self.history {
            config.pipeline.history_capacity = history;
        }
        if self.seed.is_some() {
            config.pipeline.seed = self.seed;
        }
        if let Some(store) = self.store {
            config.store.backend = store;
        }
        if let Some(url) = &self.influx_url {
            config.store.url = url.clone();
        }
        if let Some(org) = &self.influx_org {
            config.store.org = org.clone();
        }
        if let Some(bucket) = &self.influx_bucket {
            config.store.bucket = bucket.clone();
        }
        if let Some(token) = &self.influx_token {
            config.store.token = token.clone();
        }
        if config.store.token.is_empty() {
            if let Ok(token) = std::env::var("INFLUX_TOKEN") {
                config.store.token = token;
            }
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Shared application state
pub struct AppState {
    broadcaster: Arc<Broadcaster>,
    writer: StoreWriter,
    /// Present only in ingest mode.
    ingest: Option<IngestHandle>,
    producer_state: watch::Receiver<ProducerState>,
    source: SourceMode,
    max_clients: usize,
    send_timeout: Duration,
    clients: AtomicUsize,
    started: Instant,
    shutdown: watch::Receiver<bool>,
}

/// Reserved WebSocket slot, released on drop.
pub struct ClientSlot {
    state: Arc<AppState>,
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        let remaining = self.state.clients.fetch_sub(1, Ordering::AcqRel) - 1;
        info!("Client disconnected. Total: {}", remaining);
    }
}

impl AppState {
    fn try_acquire_client(self: &Arc<Self>) -> Option<ClientSlot> {
        let previous = self.clients.fetch_add(1, Ordering::AcqRel);
        if previous >= self.max_clients {
            self.clients.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(ClientSlot {
            state: self.clone(),
        })
    }

    fn client_count(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }
}

/// Wire the pipeline from configuration.
///
/// Provisions the store bucket first; failure there is fatal.
async fn build_pipeline(
    config: &SensorcastConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<(Arc<AppState>, Producer)> {
    let store: Arc<dyn TimeSeriesStore> = match config.store.backend {
        StoreBackend::Influx => Arc::new(
            InfluxStore::new(config.influx_settings()).context("failed to build InfluxDB client")?,
        ),
        StoreBackend::Memory => {
            warn!("Using in-memory store; readings are lost on exit");
            Arc::new(config.memory_store())
        }
    };
    let writer = StoreWriter::spawn(store, config.writer_config());
    writer
        .provision()
        .await
        .context("store provisioning failed")?;
    info!("Store ready: {}", writer.target());

    let (source, ingest): (Box<dyn ReadingSource>, Option<IngestHandle>) =
        match config.pipeline.source {
            SourceMode::Simulated => {
                let source: Box<dyn ReadingSource> = match config.pipeline.seed {
                    Some(seed) => Box::new(SimulatedSource::with_seed(seed)),
                    None => Box::new(SimulatedSource::new()),
                };
                (source, None)
            }
            SourceMode::Ingest => {
                let (source, handle) = IngestSource::new(config.pipeline.ingest_queue_depth);
                let source: Box<dyn ReadingSource> = Box::new(source);
                (source, Some(handle))
            }
        };

    let history = Arc::new(SharedHistory::new(config.pipeline.history_capacity));
    let broadcaster = Arc::new(Broadcaster::new(
        history.clone(),
        config.pipeline.subscriber_queue_depth,
    ));
    let producer = Producer::new(
        source,
        history,
        writer.clone(),
        broadcaster.clone(),
        config.tick_period(),
    );

    let state = Arc::new(AppState {
        broadcaster,
        writer,
        ingest,
        producer_state: producer.watch_state(),
        source: config.pipeline.source,
        max_clients: config.server.max_clients,
        send_timeout: config.send_timeout(),
        clients: AtomicUsize::new(0),
        started: Instant::now(),
        shutdown,
    });
    Ok((state, producer))
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/data", get(handlers::recent).post(handlers::ingest))
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal(stop: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    let _ = stop.send(true);
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match &args.command {
        Some(Command::GenConfig { output }) => {
            let text = SensorcastConfig::default().to_toml()?;
            match output {
                Some(path) => {
                    std::fs::write(path, text)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Wrote {}", path.display());
                }
                None => print!("{}", text),
            }
            return Ok(());
        }
        Some(Command::Validate { path }) => {
            SensorcastConfig::from_file(path)
                .with_context(|| format!("{} is not valid", path.display()))?;
            println!("{}: OK", path.display());
            return Ok(());
        }
        None => {}
    }

    init_tracing(&args.log_level);
    let config = args.load_config()?;

    info!("Sensorcast WebSocket server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Source: {}, store: {}, tick: {:?}, history: {} per kind",
        config.pipeline.source,
        config.store.backend,
        config.tick_period(),
        config.pipeline.history_capacity
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let (state, producer) = build_pipeline(&config, stop_rx.clone()).await?;
    let producer_task = tokio::spawn(producer.run(stop_rx));

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("WebSocket endpoint: ws://{}/ws", addr);
    info!("Ingest endpoint: http://{}/data", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(stop_tx))
        .await
        .context("server error")?;

    if producer_task.await.is_err() {
        bail!("producer task panicked");
    }
    info!("Stopped");
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_state(
    mode: SourceMode,
    ingest_depth: usize,
) -> (Arc<AppState>, Option<IngestSource>) {
    let history = Arc::new(SharedHistory::new(10));
    let broadcaster = Arc::new(Broadcaster::new(history, 8));
    let writer = StoreWriter::spawn(Arc::new(MemoryStore::new()), Default::default());
    let (_, producer_state) = watch::channel(ProducerState::Idle);
    let (_, shutdown) = watch::channel(false);

    let (source, ingest) = match mode {
        SourceMode::Simulated => (None, None),
        SourceMode::Ingest => {
            let (source, handle) = IngestSource::new(ingest_depth);
            (Some(source), Some(handle))
        }
    };

    let state = Arc::new(AppState {
        broadcaster,
        writer,
        ingest,
        producer_state,
        source: mode,
        max_clients: 2,
        send_timeout: Duration::from_secs(1),
        clients: AtomicUsize::new(0),
        started: Instant::now(),
        shutdown,
    });
    (state, source)
}
