use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::reconciler::{Reconciler, TickOutput};
use crate::source::ByteSource;

/// Output collaborator, invoked once per tick whether or not the frame changed.
pub trait Renderer {
    fn render(&mut self, tick: &TickOutput<'_>) -> Result<(), RenderError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("render target closed")]
    Closed,
}

/// Ticks the reconciler every `interval` and hands each result to `renderer`,
/// until `shutdown` resolves or the renderer fails.
///
/// Ticks that overrun are skipped rather than bunched up.
pub async fn run_tick_loop<S, R, F>(
    reconciler: &mut Reconciler<S>,
    renderer: &mut R,
    interval: Duration,
    shutdown: F,
) -> Result<(), RenderError>
where
    S: ByteSource,
    R: Renderer + ?Sized,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    info!(
        renderer = renderer.name(),
        interval_ms = interval.as_millis() as u64,
        "starting tick loop"
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let out = reconciler.tick();
                renderer.render(&out)?;

                if out.stats.ticks % 1000 == 0 {
                    debug!(
                        ticks = out.stats.ticks,
                        updates = out.stats.updates,
                        superseded = out.extraction.records_superseded,
                        malformed = out.extraction.records_malformed,
                        "pipeline progress"
                    );
                }
            }
        }
    }

    let stats = reconciler.stats();
    let ex = reconciler.extractor_stats();
    info!(
        ticks = stats.ticks,
        updates = stats.updates,
        records_read = ex.records_read,
        superseded = ex.records_superseded,
        malformed = ex.records_malformed,
        oversized = ex.records_oversized,
        "tick loop stopped"
    );
    Ok(())
}
