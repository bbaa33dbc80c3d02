//! Transfer statistics: speed, ETA and peak speed.
//!
//! Statistics are derived from counters the transfer engine maintains and
//! are never used to make transfer decisions.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Aggregate transfer statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    /// Bytes moved so far
    pub bytes_transferred: u64,
    /// Bytes of every file in the catalogue
    pub total_bytes: u64,
    /// Current speed in bytes/second
    pub speed: f64,
    /// Seconds remaining at the current speed (0 when unknown)
    pub eta: f64,
    /// Chunks moved so far
    pub chunks_completed: u64,
    /// Chunks of every file in the catalogue
    pub total_chunks: u64,
    /// When the transfer started (Unix millis)
    pub start_time: Option<u64>,
    /// Highest observed speed
    pub peak_speed: f64,
}

impl TransferStats {
    /// Count one moved chunk
    pub fn record_chunk(&mut self, bytes: u64) {
        self.chunks_completed += 1;
        self.bytes_transferred += bytes;
    }

    /// Apply a new speed sample, updating ETA and peak
    pub fn apply_speed(&mut self, speed: f64) {
        self.speed = speed;
        self.peak_speed = self.peak_speed.max(speed);

        let remaining = self.total_bytes.saturating_sub(self.bytes_transferred);
        self.eta = if speed > 0.0 { remaining as f64 / speed } else { 0.0 };
    }

    /// Progress fraction (0.0 to 1.0)
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64).min(1.0)
    }

    /// ETA as a duration, if known
    #[must_use]
    pub fn eta_duration(&self) -> Option<Duration> {
        (self.eta > 0.0 && self.eta.is_finite()).then(|| Duration::from_secs_f64(self.eta))
    }
}

/// Samples bytes moved between stats ticks
#[derive(Debug)]
pub struct SpeedMeter {
    sampled: u64,
    last_tick: Instant,
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedMeter {
    /// Start sampling now
    #[must_use]
    pub fn new() -> Self {
        Self {
            sampled: 0,
            last_tick: Instant::now(),
        }
    }

    /// Add bytes to the current window
    pub fn record(&mut self, bytes: u64) {
        self.sampled += bytes;
    }

    /// Close the window at `now` and return its speed in bytes/second
    pub fn tick(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_tick).as_secs_f64();
        let bytes = std::mem::take(&mut self.sampled);
        self.last_tick = now;

        if elapsed > 0.0 { bytes as f64 / elapsed } else { 0.0 }
    }

    /// Drop the current window
    pub fn reset(&mut self) {
        self.sampled = 0;
        self.last_tick = Instant::now();
    }
}
