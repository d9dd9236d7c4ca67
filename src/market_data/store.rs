// =============================================================================
// Per-Instrument Data Store — rolling bars, volume history, latest book
// =============================================================================
//
// One store per instrument, owned by the engine coordinator and mutated only
// through it. Each timeframe keeps a bounded ring of bars plus a parallel
// volume history with one entry per *closed* bar; the latest (developing)
// bar is mutable in place until a closed version or a later bar arrives.
//
// Replay is idempotent: bars at or before the newest closed timestamp are
// ignored, so re-feeding history never duplicates volume entries.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::market_data::{Bar, BookSnapshot};

// ---------------------------------------------------------------------------
// SeriesBuffer — one timeframe's rolling window
// ---------------------------------------------------------------------------

/// Bounded bar ring for a single timeframe. At most one developing bar sits
/// at the back; everything before it is closed history.
#[derive(Debug, Clone)]
pub struct SeriesBuffer {
    bars: VecDeque<Bar>,
    /// One entry per closed bar, oldest first. Bounded like `bars`.
    volumes: VecDeque<f64>,
    capacity: usize,
}

impl SeriesBuffer {
    /// `capacity` bounds the closed-bar history; it must cover the longest
    /// indicator look-back plus one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            bars: VecDeque::with_capacity(capacity + 1),
            volumes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Apply one bar in market-timestamp order.
    ///
    /// * Same timestamp as the developing bar: replace it (a closed version
    ///   finalizes it and records its volume).
    /// * Later timestamp: first close the developing bar (if any) into
    ///   history, then append.
    /// * Timestamp at or before the newest closed bar: ignored (closed bars
    ///   are immutable).
    pub fn apply(&mut self, bar: Bar) {
        if let Some(last) = self.bars.back() {
            if bar.ts_ms < last.ts_ms {
                debug!(ts = bar.ts_ms, "stale bar ignored");
                return;
            }
            if bar.ts_ms == last.ts_ms {
                if last.is_closed {
                    // Immutable once closed; duplicate feed.
                    return;
                }
                self.bars.pop_back();
                if bar.is_closed {
                    self.volumes.push_back(bar.volume);
                }
                self.bars.push_back(bar);
                self.trim();
                return;
            }
            // Later timestamp: the previous developing bar will never update
            // again, fold it into closed history first.
            if !last.is_closed {
                if let Some(mut promoted) = self.bars.pop_back() {
                    promoted.is_closed = true;
                    self.volumes.push_back(promoted.volume);
                    self.bars.push_back(promoted);
                }
            }
        }

        if bar.is_closed {
            self.volumes.push_back(bar.volume);
        }
        self.bars.push_back(bar);
        self.trim();
    }

    fn trim(&mut self) {
        while self.closed_len() > self.capacity {
            // The oldest bar is always closed when we are over capacity.
            self.bars.pop_front();
        }
        while self.volumes.len() > self.capacity {
            self.volumes.pop_front();
        }
    }

    /// Number of closed bars currently held.
    pub fn closed_len(&self) -> usize {
        self.bars.iter().filter(|b| b.is_closed).count()
    }

    /// Closed bars, oldest first.
    pub fn closed_bars(&self) -> Vec<Bar> {
        self.bars.iter().filter(|b| b.is_closed).cloned().collect()
    }

    /// The developing (not yet closed) bar, if one exists.
    pub fn developing(&self) -> Option<&Bar> {
        self.bars.back().filter(|b| !b.is_closed)
    }

    /// The most recent closed bar.
    pub fn last_closed(&self) -> Option<&Bar> {
        self.bars.iter().rev().find(|b| b.is_closed)
    }

    /// Close of the closed bar preceding the most recent closed bar.
    pub fn prev_close(&self) -> Option<f64> {
        self.bars
            .iter()
            .rev()
            .filter(|b| b.is_closed)
            .nth(1)
            .map(|b| b.close)
    }

    /// Closed-bar volume history, oldest first.
    pub fn volume_history(&self) -> Vec<f64> {
        self.volumes.iter().copied().collect()
    }

    /// Latest bar regardless of closed state.
    pub fn latest(&self) -> Option<&Bar> {
        self.bars.back()
    }
}

// ---------------------------------------------------------------------------
// InstrumentStore
// ---------------------------------------------------------------------------

/// All rolling market state for one instrument: bar series per timeframe,
/// the two most recent book snapshots, and the last trade price.
#[derive(Debug)]
pub struct InstrumentStore {
    instrument_id: String,
    series: HashMap<String, SeriesBuffer>,
    buffer_capacity: usize,
    book: Option<BookSnapshot>,
    prev_book: Option<BookSnapshot>,
    last_price: Option<f64>,
    last_price_ts: Option<i64>,
}

impl InstrumentStore {
    pub fn new(instrument_id: impl Into<String>, buffer_capacity: usize) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            series: HashMap::new(),
            buffer_capacity,
            book: None,
            prev_book: None,
            last_price: None,
            last_price_ts: None,
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    /// Apply one normalized bar to the given timeframe's ring and refresh
    /// the last trade price from its close.
    pub fn apply_bar(&mut self, timeframe: &str, bar: Bar) {
        if bar.ts_ms >= self.last_price_ts.unwrap_or(i64::MIN) {
            self.last_price = Some(bar.close);
            self.last_price_ts = Some(bar.ts_ms);
        }
        self.series
            .entry(timeframe.to_string())
            .or_insert_with(|| SeriesBuffer::new(self.buffer_capacity))
            .apply(bar);
    }

    /// Apply a book snapshot, rotating the previous one for sweep detection.
    pub fn apply_book(&mut self, snapshot: BookSnapshot) {
        if let Some(current) = self.book.take() {
            if snapshot.ts_ms < current.ts_ms {
                // Stale snapshot; keep what we have.
                self.book = Some(current);
                return;
            }
            self.prev_book = Some(current);
        }
        self.book = Some(snapshot);
    }

    pub fn series(&self, timeframe: &str) -> Option<&SeriesBuffer> {
        self.series.get(timeframe)
    }

    pub fn book(&self) -> Option<&BookSnapshot> {
        self.book.as_ref()
    }

    pub fn prev_book(&self) -> Option<&BookSnapshot> {
        self.prev_book.as_ref()
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    pub fn last_price_ts(&self) -> Option<i64> {
        self.last_price_ts
    }

    /// The freshest market timestamp observed for this instrument, across
    /// trades and book updates. All lifecycle timing uses this; wall clock
    /// never enters the engine.
    pub fn market_ts(&self) -> Option<i64> {
        let book_ts = self.book.as_ref().map(|b| b.ts_ms);
        match (self.last_price_ts, book_ts) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts_ms: i64, close: f64, volume: f64, is_closed: bool) -> Bar {
        Bar {
            ts_ms,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
            is_closed,
        }
    }

    #[test]
    fn developing_bar_replaced_in_place() {
        let mut buf = SeriesBuffer::new(10);
        buf.apply(bar(0, 100.0, 10.0, false));
        buf.apply(bar(0, 101.0, 12.0, false));

        assert_eq!(buf.closed_len(), 0);
        assert_eq!(buf.developing().unwrap().close, 101.0);
        assert!(buf.volume_history().is_empty());
    }

    #[test]
    fn closing_a_developing_bar_adds_one_volume_entry() {
        let mut buf = SeriesBuffer::new(10);
        buf.apply(bar(0, 100.0, 10.0, false));
        buf.apply(bar(0, 100.5, 15.0, true));

        assert_eq!(buf.closed_len(), 1);
        assert!(buf.developing().is_none());
        assert_eq!(buf.volume_history(), vec![15.0]);
    }

    #[test]
    fn later_bar_promotes_previous_developing() {
        let mut buf = SeriesBuffer::new(10);
        buf.apply(bar(0, 100.0, 10.0, false));
        buf.apply(bar(60_000, 101.0, 5.0, false));

        // The old developing bar became closed history with its volume.
        assert_eq!(buf.closed_len(), 1);
        assert_eq!(buf.volume_history(), vec![10.0]);
        assert_eq!(buf.developing().unwrap().ts_ms, 60_000);
    }

    #[test]
    fn closed_bars_are_immutable() {
        let mut buf = SeriesBuffer::new(10);
        buf.apply(bar(0, 100.0, 10.0, true));
        buf.apply(bar(0, 999.0, 99.0, true));

        assert_eq!(buf.closed_len(), 1);
        assert_eq!(buf.last_closed().unwrap().close, 100.0);
        assert_eq!(buf.volume_history(), vec![10.0]);
    }

    #[test]
    fn stale_bar_ignored() {
        let mut buf = SeriesBuffer::new(10);
        buf.apply(bar(60_000, 100.0, 10.0, true));
        buf.apply(bar(0, 50.0, 5.0, true));

        assert_eq!(buf.closed_len(), 1);
        assert_eq!(buf.last_closed().unwrap().ts_ms, 60_000);
    }

    #[test]
    fn ring_trims_to_capacity() {
        let mut buf = SeriesBuffer::new(3);
        for i in 0..6 {
            buf.apply(bar(i * 60_000, 100.0 + i as f64, 10.0, true));
        }
        assert_eq!(buf.closed_len(), 3);
        let closes: Vec<f64> = buf.closed_bars().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![103.0, 104.0, 105.0]);
        assert_eq!(buf.volume_history().len(), 3);
    }

    #[test]
    fn prev_close_skips_latest_closed() {
        let mut buf = SeriesBuffer::new(10);
        buf.apply(bar(0, 100.0, 10.0, true));
        buf.apply(bar(60_000, 101.0, 10.0, true));
        buf.apply(bar(120_000, 102.0, 10.0, false));

        assert_eq!(buf.last_closed().unwrap().close, 101.0);
        assert_eq!(buf.prev_close(), Some(100.0));
    }

    #[test]
    fn incremental_vs_bulk_feed_identical() {
        let bars: Vec<Bar> = (0..8)
            .map(|i| bar(i * 60_000, 100.0 + i as f64, 10.0 + i as f64, true))
            .collect();

        let mut one = SeriesBuffer::new(20);
        for b in &bars {
            one.apply(b.clone());
        }
        let mut two = SeriesBuffer::new(20);
        for b in &bars {
            two.apply(b.clone());
        }
        // Re-feed the full history a second time: no change.
        for b in &bars {
            two.apply(b.clone());
        }

        assert_eq!(one.closed_bars(), two.closed_bars());
        assert_eq!(one.volume_history(), two.volume_history());
    }

    #[test]
    fn store_tracks_last_price_and_market_ts() {
        let mut store = InstrumentStore::new("ETH-USDT-SWAP", 20);
        store.apply_bar("1m", bar(60_000, 100.0, 10.0, true));
        store.apply_bar("1m", bar(120_000, 101.0, 10.0, false));

        assert_eq!(store.last_price(), Some(101.0));
        assert_eq!(store.market_ts(), Some(120_000));

        store.apply_book(BookSnapshot {
            ts_ms: 180_000,
            bids: vec![],
            asks: vec![],
        });
        assert_eq!(store.market_ts(), Some(180_000));
    }

    #[test]
    fn book_rotation_keeps_previous_snapshot() {
        let mut store = InstrumentStore::new("X", 20);
        store.apply_book(BookSnapshot {
            ts_ms: 1,
            bids: vec![],
            asks: vec![],
        });
        store.apply_book(BookSnapshot {
            ts_ms: 2,
            bids: vec![],
            asks: vec![],
        });

        assert_eq!(store.book().unwrap().ts_ms, 2);
        assert_eq!(store.prev_book().unwrap().ts_ms, 1);

        // Stale snapshot does not rotate.
        store.apply_book(BookSnapshot {
            ts_ms: 1,
            bids: vec![],
            asks: vec![],
        });
        assert_eq!(store.book().unwrap().ts_ms, 2);
        assert_eq!(store.prev_book().unwrap().ts_ms, 1);
    }

    #[test]
    fn timeframes_are_independent() {
        let mut store = InstrumentStore::new("X", 20);
        store.apply_bar("1m", bar(60_000, 100.0, 1.0, true));
        store.apply_bar("5m", bar(300_000, 200.0, 2.0, true));

        assert_eq!(store.series("1m").unwrap().closed_len(), 1);
        assert_eq!(store.series("5m").unwrap().closed_len(), 1);
        assert!(store.series("15m").is_none());
    }
}
