mod dump;
mod heatmap;
mod hud;
mod palette;

use std::path::PathBuf;
use std::time::Duration;

use thermal_view_common::config::Config;
use thermal_view_common::driver::run_tick_loop;
use thermal_view_common::extractor::FrameExtractor;
use thermal_view_common::reader::run_reader;
use thermal_view_common::reconciler::Reconciler;
use thermal_view_common::source;
use tokio::time::Instant;
use tracing::{error, info};

use dump::LineDumper;
use heatmap::HeatmapRenderer;

/// Raw chunks buffered between the reader task and the tick loop.
const CHUNK_QUEUE: usize = 256;
const HEARTBEAT: Duration = Duration::from_secs(1);

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

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

    // Logs go to stderr; stdout belongs to the heatmap.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        device = config.serial.device,
        mode = config.viewer.mode,
        tick_ms = config.pipeline.tick_interval_ms,
        "starting thermal-view"
    );

    let (tx, mut byte_source) = source::channel(CHUNK_QUEUE, config.pipeline.max_record_bytes);
    let reader = tokio::spawn(run_reader(config.serial.clone(), tx));

    match config.viewer.mode.as_str() {
        "heatmap" => {
            let extractor = FrameExtractor::new(byte_source, config.pipeline.max_records_per_tick);
            let mut reconciler = Reconciler::new(extractor, config.pipeline.signal_timeout());
            let mut renderer = HeatmapRenderer::new(std::io::stdout(), config.display.clone());

            let result = run_tick_loop(
                &mut reconciler,
                &mut renderer,
                config.pipeline.tick_interval(),
                shutdown_signal(),
            )
            .await;
            // Restore the terminal before anything else is printed.
            drop(renderer);
            if let Err(e) = result {
                error!(error = %e, "renderer failed");
                reader.abort();
                std::process::exit(1);
            }
        }
        "dump" => {
            let mut dumper = LineDumper::new(std::io::stdout(), HEARTBEAT, Instant::now());
            if let Err(e) = dump::run_dump(
                &mut byte_source,
                &mut dumper,
                config.pipeline.tick_interval(),
                shutdown_signal(),
            )
            .await
            {
                error!(error = %e, "failed to write dump output");
                reader.abort();
                std::process::exit(1);
            }
        }
        other => {
            error!(mode = other, "unknown viewer mode, expected 'heatmap' or 'dump'");
            std::process::exit(1);
        }
    }

    reader.abort();
    info!("thermal-view stopped");
}
