// src/progress.rs

//! Advisory transfer progress reporting
//!
//! The download path emits progress through the [`TransferReporter`] trait
//! so a presentation layer can render it however it likes. Reporting is
//! purely advisory: every implementation may drop events and nothing in the
//! crate depends on progress for correctness.
//!
//! Implementations:
//! - [`SilentReporter`]: no-op, for tests and quiet mode
//! - [`LogReporter`]: start/finish lines through tracing
//! - [`BarReporter`]: per-transfer indicatif bars under one display

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

/// Sink for download progress events
///
/// Implementations must be thread-safe; the scheduler reports from its
/// worker threads concurrently.
pub trait TransferReporter: Send + Sync {
    /// A transfer began; `total` is the expected byte count when known
    fn on_start(&self, label: &str, total: Option<u64>);

    /// Bytes received so far for a transfer
    fn on_advance(&self, label: &str, bytes: u64);

    /// Transfer finished successfully
    fn on_done(&self, label: &str);

    /// Transfer failed (after retries were exhausted)
    fn on_failed(&self, label: &str, reason: &str);
}

/// No-op reporter
#[derive(Debug, Default)]
pub struct SilentReporter;

impl TransferReporter for SilentReporter {
    fn on_start(&self, _label: &str, _total: Option<u64>) {}
    fn on_advance(&self, _label: &str, _bytes: u64) {}
    fn on_done(&self, _label: &str) {}
    fn on_failed(&self, _label: &str, _reason: &str) {}
}

/// Reporter that logs transfer boundaries through tracing
///
/// Byte-level updates are intentionally not logged.
#[derive(Debug, Default)]
pub struct LogReporter;

impl TransferReporter for LogReporter {
    fn on_start(&self, label: &str, total: Option<u64>) {
        match total {
            Some(bytes) => info!("downloading {} ({} bytes)", label, bytes),
            None => info!("downloading {} (unknown size)", label),
        }
    }

    fn on_advance(&self, _label: &str, _bytes: u64) {}

    fn on_done(&self, label: &str) {
        info!("downloaded {}", label);
    }

    fn on_failed(&self, label: &str, reason: &str) {
        warn!("download of {} failed: {}", label, reason);
    }
}

/// Reporter rendering one progress bar per transfer
pub struct BarReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
            .expect("Invalid progress bar template")
            .progress_chars("#>-")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {bytes} ({bytes_per_sec}) {msg}")
            .expect("Invalid spinner template")
    }
}

impl Default for BarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferReporter for BarReporter {
    fn on_start(&self, label: &str, total: Option<u64>) {
        let bar = match total {
            Some(bytes) => {
                let pb = ProgressBar::new(bytes);
                pb.set_style(Self::bar_style());
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(Self::spinner_style());
                pb
            }
        };
        bar.set_message(label.to_string());
        let bar = self.multi.add(bar);
        self.bars.lock().unwrap().insert(label.to_string(), bar);
    }

    fn on_advance(&self, label: &str, bytes: u64) {
        if let Some(bar) = self.bars.lock().unwrap().get(label) {
            bar.set_position(bytes);
        }
    }

    fn on_done(&self, label: &str) {
        if let Some(bar) = self.bars.lock().unwrap().remove(label) {
            bar.finish_with_message(format!("{label} [done]"));
        }
    }

    fn on_failed(&self, label: &str, reason: &str) {
        if let Some(bar) = self.bars.lock().unwrap().remove(label) {
            bar.abandon_with_message(format!("{label} [FAILED: {reason}]"));
        }
    }
}
