use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thermal_view_common::config::Config;
use thermal_view_common::driver::{run_tick_loop, RenderError, Renderer};
use thermal_view_common::extractor::FrameExtractor;
use thermal_view_common::frame::{HEIGHT, WIDTH};
use thermal_view_common::reader::run_reader;
use thermal_view_common::reconciler::{Reconciler, SignalState, TickOutput, TickStatus};
use thermal_view_common::source;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const CHUNK_QUEUE: usize = 256;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct FrameSnapshot {
    width: usize,
    height: usize,
    max: f32,
    min: f32,
    status: &'static str,
    signal: &'static str,
    updated_at: Option<DateTime<Utc>>,
    rows: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct PipelineStats {
    ticks: u64,
    updates: u64,
    records_read: u64,
    records_superseded: u64,
    records_malformed: u64,
    drains_capped: u64,
    records_oversized: u64,
}

#[derive(Debug, Clone)]
struct Snapshot {
    frame: FrameSnapshot,
    stats: PipelineStats,
    signal: SignalState,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            frame: FrameSnapshot {
                width: WIDTH,
                height: HEIGHT,
                max: 0.0,
                min: 0.0,
                status: status_name(TickStatus::Unchanged),
                signal: signal_name(SignalState::Waiting),
                updated_at: None,
                rows: vec![vec![0.0; WIDTH]; HEIGHT],
            },
            stats: PipelineStats::default(),
            signal: SignalState::Waiting,
        }
    }
}

fn status_name(status: TickStatus) -> &'static str {
    match status {
        TickStatus::Updated => "updated",
        TickStatus::Unchanged => "unchanged",
    }
}

fn signal_name(signal: SignalState) -> &'static str {
    match signal {
        SignalState::Waiting => "waiting",
        SignalState::Live => "live",
        SignalState::Lost => "lost",
    }
}

// ---------------------------------------------------------------------------
// Renderer: publishes each tick into a watch channel
// ---------------------------------------------------------------------------

struct SnapshotPublisher {
    tx: watch::Sender<Snapshot>,
}

impl Renderer for SnapshotPublisher {
    fn render(&mut self, tick: &TickOutput<'_>) -> Result<(), RenderError> {
        let rebuild_rows = tick.status == TickStatus::Updated;
        self.tx.send_modify(|snap| {
            if rebuild_rows {
                snap.frame.rows = tick.frame.rows().map(<[f32]>::to_vec).collect();
                snap.frame.min = tick.frame.min();
            }
            snap.frame.max = tick.max;
            snap.frame.status = status_name(tick.status);
            snap.frame.signal = signal_name(tick.signal);
            snap.frame.updated_at = tick.updated_at;
            snap.signal = tick.signal;
            snap.stats = PipelineStats {
                ticks: tick.stats.ticks,
                updates: tick.stats.updates,
                records_read: tick.extraction.records_read,
                records_superseded: tick.extraction.records_superseded,
                records_malformed: tick.extraction.records_malformed,
                drains_capped: tick.extraction.drains_capped,
                records_oversized: tick.extraction.records_oversized,
            };
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "snapshot-publisher"
    }
}

// ---------------------------------------------------------------------------
// App state + handlers
// ---------------------------------------------------------------------------

struct AppState {
    snapshot: watch::Receiver<Snapshot>,
}

/// GET /frame — latest held frame as rows of temperatures
async fn get_frame(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.snapshot.borrow().frame.clone())
}

/// GET /stats — pipeline counters
async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.snapshot.borrow().stats.clone())
}

/// GET /health — 200 while frames are arriving, 503 otherwise
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let signal = state.snapshot.borrow().signal;
    let code = match signal {
        SignalState::Live => StatusCode::OK,
        SignalState::Waiting | SignalState::Lost => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, signal_name(signal))
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/frame", get(get_frame))
        .route("/stats", get(get_stats))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Wait for the tick loop task; a panic in it is logged rather than lost.
async fn join_tick_loop(ticker: JoinHandle<()>) -> bool {
    match ticker.await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "tick loop task failed");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let (chunk_tx, byte_source) =
        source::channel(CHUNK_QUEUE, config.pipeline.max_record_bytes);
    let reader = tokio::spawn(run_reader(config.serial.clone(), chunk_tx));

    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::empty());
    let pipeline = config.pipeline.clone();
    let ticker = tokio::spawn(async move {
        let extractor = FrameExtractor::new(byte_source, pipeline.max_records_per_tick);
        let mut reconciler = Reconciler::new(extractor, pipeline.signal_timeout());
        let mut publisher = SnapshotPublisher { tx: snapshot_tx };
        if let Err(e) = run_tick_loop(
            &mut reconciler,
            &mut publisher,
            pipeline.tick_interval(),
            shutdown_signal(),
        )
        .await
        {
            error!(error = %e, "tick loop failed");
        }
    });

    let state = Arc::new(AppState {
        snapshot: snapshot_rx,
    });
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(addr, device = config.serial.device, "thermal-view API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "API server failed");
    }

    reader.abort();
    join_tick_loop(ticker).await;
    info!("thermal-view API stopped");
}
