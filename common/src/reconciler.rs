use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::extractor::{Extraction, ExtractorStats, FrameExtractor, Miss};
use crate::frame::ThermalFrame;
use crate::source::ByteSource;

/// Whether this tick adopted a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Updated,
    /// The held frame was served again.
    Unchanged,
}

/// Freshness of the held frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    /// No valid frame has arrived yet.
    Waiting,
    /// A valid frame arrived within the signal timeout.
    Live,
    /// The last valid frame is older than the signal timeout.
    Lost,
}

/// What the renderer gets on every tick.
#[derive(Debug, Clone, Copy)]
pub struct TickOutput<'a> {
    pub frame: &'a ThermalFrame,
    pub status: TickStatus,
    /// Hottest cell of `frame`.
    pub max: f32,
    pub signal: SignalState,
    /// Wall-clock time the held frame was adopted.
    pub updated_at: Option<DateTime<Utc>>,
    pub stats: ReconcilerStats,
    pub extraction: ExtractorStats,
}

impl TickOutput<'_> {
    /// Title text, e.g. `Thermal Camera - Max Temp: 36.4°C`.
    pub fn label(&self) -> String {
        format!("Thermal Camera - Max Temp: {:.1}°C", self.max)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub ticks: u64,
    pub updates: u64,
}

/// Owns the last good frame and serves it on every tick.
///
/// A single bad or missing read never blanks the display: the held frame is
/// replaced only by a frame that passed validation.
pub struct Reconciler<S> {
    extractor: FrameExtractor<S>,
    last_good: ThermalFrame,
    last_max: f32,
    last_update: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
    signal_timeout: Duration,
    signal: SignalState,
    stats: ReconcilerStats,
}

impl<S: ByteSource> Reconciler<S> {
    pub fn new(extractor: FrameExtractor<S>, signal_timeout: Duration) -> Self {
        let last_good = ThermalFrame::zeroed();
        Self {
            extractor,
            last_max: last_good.max(),
            last_good,
            last_update: None,
            updated_at: None,
            signal_timeout,
            signal: SignalState::Waiting,
            stats: ReconcilerStats::default(),
        }
    }

    pub fn tick(&mut self) -> TickOutput<'_> {
        self.tick_at(Instant::now())
    }

    /// Run one tick as if the clock read `now`.
    pub fn tick_at(&mut self, now: Instant) -> TickOutput<'_> {
        self.stats.ticks += 1;

        let status = match self.extractor.extract() {
            Extraction::Candidate(frame) => {
                self.last_max = frame.max();
                self.last_good = frame;
                self.last_update = Some(now);
                self.updated_at = Some(Utc::now());
                self.stats.updates += 1;
                TickStatus::Updated
            }
            Extraction::NoCandidate(Miss::Idle) => TickStatus::Unchanged,
            Extraction::NoCandidate(Miss::Malformed(e)) => {
                debug!(error = %e, "holding last good frame");
                TickStatus::Unchanged
            }
        };

        let signal = self.signal_at(now);
        if signal != self.signal {
            match signal {
                SignalState::Live => info!(max = self.last_max, "sensor signal live"),
                SignalState::Lost => warn!(
                    timeout_secs = self.signal_timeout.as_secs_f32(),
                    "no valid frame within timeout, signal lost"
                ),
                SignalState::Waiting => {}
            }
            self.signal = signal;
        }

        TickOutput {
            frame: &self.last_good,
            status,
            max: self.last_max,
            signal,
            updated_at: self.updated_at,
            stats: self.stats,
            extraction: self.extractor.stats(),
        }
    }

    fn signal_at(&self, now: Instant) -> SignalState {
        match self.last_update {
            None => SignalState::Waiting,
            Some(at) if now.saturating_duration_since(at) < self.signal_timeout => {
                SignalState::Live
            }
            Some(_) => SignalState::Lost,
        }
    }

    pub fn last_good(&self) -> &ThermalFrame {
        &self.last_good
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.stats
    }

    pub fn extractor_stats(&self) -> ExtractorStats {
        self.extractor.stats()
    }

    pub fn extractor_mut(&mut self) -> &mut FrameExtractor<S> {
        &mut self.extractor
    }
}
