use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, warn};

/// Byte terminating every record on the wire.
pub const RECORD_DELIMITER: u8 = b'\n';

/// Non-blocking view of the incoming byte stream.
///
/// Implementations must never wait for data: every method only looks at what
/// has already been received.
pub trait ByteSource {
    /// Returns `true` if any bytes are buffered right now.
    fn bytes_available(&mut self) -> bool;

    /// Consume the next complete record, delimiter included.
    /// Returns `None` when no complete record is buffered; a partial tail stays
    /// buffered until the rest of it arrives.
    fn read_record(&mut self) -> Option<Bytes>;

    /// Consume every complete record buffered right now and return the newest,
    /// together with how many older records were thrown away to reach it.
    fn skip_to_latest(&mut self) -> Option<(Bytes, u64)> {
        let mut latest = self.read_record()?;
        let mut skipped = 0;
        while let Some(next) = self.read_record() {
            latest = next;
            skipped += 1;
        }
        Some((latest, skipped))
    }

    /// Records the source discarded on its own because they grew past its size limit.
    fn oversized_records(&self) -> u64 {
        0
    }
}

/// Accumulates raw chunks and splits them into newline-terminated records.
pub struct LineBuffer {
    buffer: BytesMut,
    /// Offset up to which the buffer is known to contain no delimiter.
    scan_from: usize,
    max_record_bytes: usize,
    /// Dropping the remainder of an oversized record until its delimiter shows up.
    discarding: bool,
    overflows: u64,
}

impl LineBuffer {
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            scan_from: 0,
            max_record_bytes,
            discarding: false,
            overflows: 0,
        }
    }

    pub fn push(&mut self, mut chunk: &[u8]) {
        if self.discarding {
            match chunk.iter().position(|&b| b == RECORD_DELIMITER) {
                Some(pos) => {
                    self.discarding = false;
                    chunk = &chunk[pos + 1..];
                }
                None => return,
            }
        }
        self.buffer.extend_from_slice(chunk);

        // An unterminated tail can only grow; drop it once it cannot be a record.
        let tail_start = self.tail_start();
        let tail_len = self.buffer.len() - tail_start;
        if tail_len > self.max_record_bytes {
            self.overflows += 1;
            warn!(
                tail_len,
                max_record_bytes = self.max_record_bytes,
                "unterminated record exceeds limit, discarding"
            );
            self.buffer.truncate(tail_start);
            self.scan_from = self.scan_from.min(tail_start);
            self.discarding = true;
        }
    }

    pub fn next_record(&mut self) -> Option<Bytes> {
        let pos = self.buffer[self.scan_from..]
            .iter()
            .position(|&b| b == RECORD_DELIMITER);
        match pos {
            Some(pos) => {
                let end = self.scan_from + pos + 1;
                self.scan_from = 0;
                Some(self.buffer.split_to(end).freeze())
            }
            None => {
                self.scan_from = self.buffer.len();
                None
            }
        }
    }

    /// Drop every complete record except the newest and return it, with the
    /// number of records dropped. A partial tail stays buffered.
    pub fn take_latest(&mut self) -> Option<(Bytes, u64)> {
        let end = self.tail_start();
        if end == 0 {
            return None;
        }
        let mut complete = self.buffer.split_to(end);
        self.scan_from = 0;

        let start = complete[..end - 1]
            .iter()
            .rposition(|&b| b == RECORD_DELIMITER)
            .map_or(0, |pos| pos + 1);
        let skipped = complete[..start]
            .iter()
            .filter(|&&b| b == RECORD_DELIMITER)
            .count() as u64;
        Some((complete.split_off(start).freeze(), skipped))
    }

    /// Start of a new transport session: the unterminated tail of the previous
    /// one can never be completed, so drop it. Complete records are kept.
    pub fn begin_session(&mut self) {
        let tail_start = self.tail_start();
        if tail_start < self.buffer.len() {
            debug!(
                dropped = self.buffer.len() - tail_start,
                "dropping partial record from previous session"
            );
        }
        self.buffer.truncate(tail_start);
        self.scan_from = self.scan_from.min(tail_start);
        self.discarding = false;
    }

    fn tail_start(&self) -> usize {
        self.buffer
            .iter()
            .rposition(|&b| b == RECORD_DELIMITER)
            .map_or(0, |pos| pos + 1)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of oversized records discarded so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

/// A [`ByteSource`] fed with raw chunks over a tokio channel by the transport reader.
///
/// An empty chunk marks the start of a new transport session.
pub struct ChannelSource {
    rx: mpsc::Receiver<Bytes>,
    lines: LineBuffer,
    disconnected: bool,
}

/// Create a chunk channel and the source draining it.
pub fn channel(capacity: usize, max_record_bytes: usize) -> (mpsc::Sender<Bytes>, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelSource::new(rx, max_record_bytes))
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Bytes>, max_record_bytes: usize) -> Self {
        Self {
            rx,
            lines: LineBuffer::new(max_record_bytes),
            disconnected: false,
        }
    }

    /// Move every chunk queued so far into the line buffer without waiting.
    fn pull_queued(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) if chunk.is_empty() => self.lines.begin_session(),
                Ok(chunk) => self.lines.push(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        debug!(buffered = self.lines.len(), "byte channel closed");
                        self.disconnected = true;
                    }
                    break;
                }
            }
        }
    }
}

impl ByteSource for ChannelSource {
    fn bytes_available(&mut self) -> bool {
        self.pull_queued();
        !self.lines.is_empty()
    }

    fn read_record(&mut self) -> Option<Bytes> {
        self.lines.next_record()
    }

    fn skip_to_latest(&mut self) -> Option<(Bytes, u64)> {
        self.pull_queued();
        self.lines.take_latest()
    }

    fn oversized_records(&self) -> u64 {
        self.lines.overflows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_records_across_chunks() {
        let mut lines = LineBuffer::new(1024);
        lines.push(b"1.0,2.");
        assert_eq!(lines.next_record(), None);
        lines.push(b"0\n3.0,");
        assert_eq!(lines.next_record().as_deref(), Some(&b"1.0,2.0\n"[..]));
        assert_eq!(lines.next_record(), None);
        lines.push(b"4.0\n");
        assert_eq!(lines.next_record().as_deref(), Some(&b"3.0,4.0\n"[..]));
        assert!(lines.is_empty());
    }

    #[test]
    fn yields_records_in_order() {
        let mut lines = LineBuffer::new(1024);
        lines.push(b"a\nb\nc\n");
        assert_eq!(lines.next_record().as_deref(), Some(&b"a\n"[..]));
        assert_eq!(lines.next_record().as_deref(), Some(&b"b\n"[..]));
        assert_eq!(lines.next_record().as_deref(), Some(&b"c\n"[..]));
        assert_eq!(lines.next_record(), None);
    }

    #[test]
    fn oversized_tail_is_discarded() {
        let mut lines = LineBuffer::new(8);
        lines.push(b"ok\n");
        lines.push(b"0123456789");
        assert_eq!(lines.overflows(), 1);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.next_record().as_deref(), Some(&b"ok\n"[..]));
        assert!(lines.is_empty());
    }

    #[test]
    fn tail_within_limit_is_kept() {
        let mut lines = LineBuffer::new(8);
        lines.push(b"0123");
        lines.push(b"4567");
        assert_eq!(lines.overflows(), 0);
        lines.push(b"\n");
        assert_eq!(lines.next_record().as_deref(), Some(&b"01234567\n"[..]));
    }

    #[test]
    fn channel_source_reports_buffered_bytes() {
        let (tx, mut source) = channel(8, 1024);
        assert!(!source.bytes_available());

        tx.try_send(Bytes::from_static(b"partial")).unwrap();
        assert!(source.bytes_available());
        assert_eq!(source.read_record(), None);

        tx.try_send(Bytes::from_static(b" line\n")).unwrap();
        assert!(source.bytes_available());
        assert_eq!(source.read_record().as_deref(), Some(&b"partial line\n"[..]));
        assert!(!source.bytes_available());
    }

    #[test]
    fn records_survive_sender_drop() {
        let (tx, mut source) = channel(8, 1024);
        tx.try_send(Bytes::from_static(b"last\n")).unwrap();
        drop(tx);
        assert!(source.bytes_available());
        assert_eq!(source.read_record().as_deref(), Some(&b"last\n"[..]));
        assert!(!source.bytes_available());
    }

    #[test]
    fn rest_of_oversized_record_is_skipped() {
        let mut lines = LineBuffer::new(8);
        lines.push(b"0123456789");
        lines.push(b"abc");
        lines.push(b"def\nok\n");
        assert_eq!(lines.overflows(), 1);
        assert_eq!(lines.next_record().as_deref(), Some(&b"ok\n"[..]));
        assert_eq!(lines.next_record(), None);
    }

    #[test]
    fn take_latest_skips_to_newest_record() {
        let mut lines = LineBuffer::new(1024);
        lines.push(b"a\nb\nc\npart");
        assert_eq!(
            lines.take_latest(),
            Some((Bytes::from_static(b"c\n"), 2))
        );
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.take_latest(), None);
        lines.push(b"ial\n");
        assert_eq!(lines.next_record().as_deref(), Some(&b"partial\n"[..]));
    }

    #[test]
    fn take_latest_with_single_record() {
        let mut lines = LineBuffer::new(1024);
        lines.push(b"only\n");
        assert_eq!(
            lines.take_latest(),
            Some((Bytes::from_static(b"only\n"), 0))
        );
        assert!(lines.is_empty());
    }

    #[test]
    fn new_session_drops_previous_partial_record() {
        let (tx, mut source) = channel(8, 1024);
        tx.try_send(Bytes::from_static(b"1.0,2.0\n10.0,10.0,")).unwrap();
        tx.try_send(Bytes::new()).unwrap();
        tx.try_send(Bytes::from_static(b"90.0\n")).unwrap();

        assert!(source.bytes_available());
        assert_eq!(source.read_record().as_deref(), Some(&b"1.0,2.0\n"[..]));
        assert_eq!(source.read_record().as_deref(), Some(&b"90.0\n"[..]));
        assert_eq!(source.read_record(), None);
    }

    #[test]
    fn channel_source_reports_oversized_records() {
        let (tx, mut source) = channel(8, 4);
        tx.try_send(Bytes::from_static(b"123456")).unwrap();
        assert!(!source.bytes_available());
        assert_eq!(source.oversized_records(), 1);
    }
}
