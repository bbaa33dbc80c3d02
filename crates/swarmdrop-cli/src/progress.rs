//! Swarm progress display with progress bars.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use swarmdrop_core::node::SwarmState;

const TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes}";

/// Aggregate transfer progress of a swarm node
pub struct SwarmProgress {
    bar: ProgressBar,
    label: &'static str,
}

impl SwarmProgress {
    /// Create a new progress tracker
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        let bar = ProgressBar::new(0);

        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(200));

        Self { bar, label }
    }

    /// Refresh from a state snapshot
    pub fn update(&self, state: &SwarmState) {
        let stats = &state.stats;
        self.bar.set_length(stats.total_bytes);
        self.bar.set_position(stats.bytes_transferred.min(stats.total_bytes));

        let eta = stats
            .eta_duration()
            .map_or_else(|| "-".to_string(), format_duration);
        self.bar.set_message(format!(
            "{}: {}/{} chunks, {} peer(s), {} (peak {}), ETA {eta}",
            self.label,
            stats.chunks_completed,
            stats.total_chunks,
            state.active_peer_count(),
            format_speed(stats.speed),
            format_speed(stats.peak_speed),
        ));
    }

    /// Print a line above the bar
    pub fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line);
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format speed in human-readable format (bytes/sec)
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
