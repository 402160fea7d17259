use std::future::Future;
use std::io::Write;
use std::time::Duration;

use thermal_view_common::source::ByteSource;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

/// Characters of each record shown in dump mode.
const PREVIEW_CHARS: usize = 50;

/// Prints a short preview of every received record, for checking the wiring
/// before running the heatmap. Prints `.` for every `heartbeat` of silence.
pub struct LineDumper<W: Write> {
    out: W,
    heartbeat: Duration,
    last_activity: Instant,
    records: u64,
}

impl<W: Write> LineDumper<W> {
    pub fn new(out: W, heartbeat: Duration, now: Instant) -> Self {
        Self {
            out,
            heartbeat,
            last_activity: now,
            records: 0,
        }
    }

    /// Print every complete record buffered in `source`. Returns how many were printed.
    pub fn poll<S: ByteSource>(&mut self, source: &mut S, now: Instant) -> std::io::Result<usize> {
        let mut printed = 0;
        while source.bytes_available() {
            let Some(record) = source.read_record() else {
                break;
            };
            let text: String = record.utf8_chunks().map(|chunk| chunk.valid()).collect();
            let preview: String = text.trim().chars().take(PREVIEW_CHARS).collect();
            writeln!(self.out, "received: {preview}...")?;
            printed += 1;
        }

        if printed > 0 {
            self.records += printed as u64;
            self.last_activity = now;
        } else if now.saturating_duration_since(self.last_activity) >= self.heartbeat {
            write!(self.out, ".")?;
            self.last_activity = now;
        }
        self.out.flush()?;
        Ok(printed)
    }

    pub fn records(&self) -> u64 {
        self.records
    }
}

/// Poll `source` every `interval` until `shutdown` resolves.
pub async fn run_dump<S, W, F>(
    source: &mut S,
    dumper: &mut LineDumper<W>,
    interval: Duration,
    shutdown: F,
) -> std::io::Result<()>
where
    S: ByteSource,
    W: Write,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                dumper.poll(source, Instant::now())?;
            }
        }
    }
    info!(records = dumper.records(), "dump stopped");
    Ok(())
}
