//! Throughput counters for the ingestion pipeline.
//!
//! `skipped` and `ignored` are bumped on the producer side without holding the
//! pass lock, `processed` inside it, so every counter is a lock-free atomic. Each
//! arrival lands in exactly one of the three, and `received` is their sum: an
//! interval can never report more skipped frames than it received. The interval
//! start sits behind its own mutex and is only touched on report/reset.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct StatsTracker {
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    ignored: AtomicU64,
    resets: AtomicU64,
    interval_start: Mutex<Instant>,
    first_received_seen: AtomicBool,
    first_processed_seen: AtomicBool,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            interval_start: Mutex::new(Instant::now()),
            first_received_seen: AtomicBool::new(false),
            first_processed_seen: AtomicBool::new(false),
        }
    }

    /// Arrived while the pipeline was switched off.
    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
        self.note_arrival();
    }

    /// Dropped without a pass: another pass was in flight, or no worker could run it.
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.note_arrival();
    }

    /// Admitted. Called from inside the pass.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.note_arrival();
        if !self.first_processed_seen.swap(true, Ordering::Relaxed) {
            log::info!("bot detector processing first frame");
        }
    }

    /// Admitted but the payload did not decode. Also counted as processed.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current interval without resetting it.
    pub fn snapshot(&self) -> RunStats {
        RunStats::new(
            self.processed.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
            self.ignored.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.interval_start().elapsed(),
        )
    }

    /// Close the current interval: return its figures and start a new one.
    pub fn take(&self) -> RunStats {
        let mut start = self
            .interval_start
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stats = RunStats::new(
            self.processed.swap(0, Ordering::Relaxed),
            self.skipped.swap(0, Ordering::Relaxed),
            self.ignored.swap(0, Ordering::Relaxed),
            self.failed.swap(0, Ordering::Relaxed),
            start.elapsed(),
        );
        *start = Instant::now();
        self.resets.fetch_add(1, Ordering::Relaxed);
        stats
    }

    /// Start a new interval, discarding the current counts.
    pub fn reset(&self) {
        let _ = self.take();
    }

    /// Number of closed intervals.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    fn note_arrival(&self) {
        if !self.first_received_seen.swap(true, Ordering::Relaxed) {
            log::info!("bot detector received first frame");
        }
    }

    fn interval_start(&self) -> Instant {
        *self
            .interval_start
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one reporting interval.
#[derive(Clone, Debug, PartialEq)]
pub struct RunStats {
    /// `processed + skipped + ignored`.
    pub received: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub ignored: u64,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn new(processed: u64, skipped: u64, ignored: u64, failed: u64, elapsed: Duration) -> Self {
        Self {
            received: processed + skipped + ignored,
            processed,
            skipped,
            failed,
            ignored,
            elapsed,
        }
    }

    /// Events per second over the interval. A zero-length interval reports 0.
    pub fn rate(&self, count: u64) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            count as f64 / secs
        } else {
            0.0
        }
    }

    pub fn skipped_percent(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            100.0 * self.skipped as f64 / self.received as f64
        }
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "In the last {:.1} s: received {} ({:.1} fps) processed {} ({:.1} fps) skipped {} ({:.1} fps) ({:.0}%)",
            self.elapsed.as_secs_f64(),
            self.received,
            self.rate(self.received),
            self.processed,
            self.rate(self.processed),
            self.skipped,
            self.rate(self.skipped),
            self.skipped_percent(),
        )?;
        if self.failed > 0 {
            write!(f, " failed {}", self.failed)?;
        }
        if self.ignored > 0 {
            write!(f, " ignored {}", self.ignored)?;
        }
        Ok(())
    }
}
