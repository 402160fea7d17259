use tracing::{debug, trace};

use crate::frame::{FrameError, ThermalFrame};
use crate::source::ByteSource;

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The newest record drained this call, fully validated.
    Candidate(ThermalFrame),
    NoCandidate(Miss),
}

/// Why no frame was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Miss {
    /// Nothing complete was buffered.
    Idle,
    /// The newest record failed to parse or had the wrong field count.
    Malformed(FrameError),
}

/// Running counters, readable at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    /// Records consumed from the source.
    pub records_read: u64,
    /// Records dropped because a newer one arrived in the same drain.
    pub records_superseded: u64,
    /// Newest-in-drain records that failed validation.
    pub records_malformed: u64,
    /// Drains that hit the per-call record limit and skipped ahead to the newest record.
    pub drains_capped: u64,
    /// Records the source discarded for exceeding its size limit.
    pub records_oversized: u64,
}

/// Drains a [`ByteSource`] and keeps only the most recent record.
///
/// Under sustained overproduction the sensor can deliver several records
/// between two ticks. Queuing them would make the display fall further and
/// further behind, so every call races to the newest record and discards the
/// rest.
pub struct FrameExtractor<S> {
    source: S,
    max_records_per_call: usize,
    stats: ExtractorStats,
}

impl<S: ByteSource> FrameExtractor<S> {
    /// `max_records_per_call` bounds the record-by-record drain; past it the
    /// source skips straight to its newest record. Clamped to at least 1.
    pub fn new(source: S, max_records_per_call: usize) -> Self {
        Self {
            source,
            max_records_per_call: max_records_per_call.max(1),
            stats: ExtractorStats::default(),
        }
    }

    /// Drain what is buffered right now and validate the last record read.
    pub fn extract(&mut self) -> Extraction {
        let mut latest = None;
        let mut drained = 0usize;

        while drained < self.max_records_per_call && self.source.bytes_available() {
            match self.source.read_record() {
                Some(record) => {
                    drained += 1;
                    latest = Some(record);
                }
                // Only an incomplete tail is left.
                None => break,
            }
        }

        if drained == self.max_records_per_call && self.source.bytes_available() {
            if let Some((record, skipped)) = self.source.skip_to_latest() {
                self.stats.drains_capped += 1;
                debug!(
                    limit = self.max_records_per_call,
                    skipped,
                    "drain hit record limit, skipping to the newest record"
                );
                drained += skipped as usize + 1;
                latest = Some(record);
            }
        }
        self.stats.records_oversized = self.source.oversized_records();

        let Some(record) = latest else {
            return Extraction::NoCandidate(Miss::Idle);
        };

        let superseded = drained.saturating_sub(1) as u64;
        self.stats.records_read += drained as u64;
        self.stats.records_superseded += superseded;
        if superseded > 0 {
            debug!(superseded, "dropped stale records, keeping the newest");
        }

        match ThermalFrame::parse_record(&record) {
            Ok(frame) => Extraction::Candidate(frame),
            Err(e) => {
                self.stats.records_malformed += 1;
                trace!(error = %e, bytes = record.len(), "discarding malformed record");
                Extraction::NoCandidate(Miss::Malformed(e))
            }
        }
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
