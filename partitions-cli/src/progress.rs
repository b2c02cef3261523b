// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use partitions_types::{CopyProgress, format_bytes, format_duration};

/// Minimum time between two rendered lines, in copy time.
const RENDER_INTERVAL_MS: u64 = 250;
const RATE_SMOOTHING: f64 = 0.3;

pub fn compute_progress_percent(bytes_done: u64, bytes_total: u64) -> f64 {
    if bytes_total == 0 {
        return 0.0;
    }

    let ratio = bytes_done as f64 / bytes_total as f64;
    (ratio * 100.0).clamp(0.0, 100.0)
}

pub fn compute_eta_from_throughput(
    bytes_done: u64,
    bytes_total: u64,
    throughput_bytes_per_sec: f64,
) -> Option<Duration> {
    if bytes_total == 0 || bytes_done == 0 {
        return None;
    }

    if bytes_done >= bytes_total {
        return Some(Duration::from_secs(0));
    }

    if throughput_bytes_per_sec <= 0.0 {
        return None;
    }

    let remaining = (bytes_total - bytes_done) as f64;
    Some(Duration::from_secs_f64(remaining / throughput_bytes_per_sec))
}

pub fn ewma_update(previous: Option<f64>, sample: f64, alpha: f64) -> f64 {
    let alpha = alpha.clamp(0.0, 1.0);
    match previous {
        Some(prev) => alpha * sample + (1.0 - alpha) * prev,
        None => sample,
    }
}

pub fn format_eta(eta: Option<Duration>) -> String {
    eta.map(format_duration)
        .unwrap_or_else(|| "--:--:--".to_string())
}

/// Smooths the throughput of one copy step and throttles its output.
#[derive(Debug, Default)]
pub struct ProgressMeter {
    last_bytes: u64,
    last_elapsed_ms: u64,
    last_render_ms: Option<u64>,
    rate: Option<f64>,
}

impl ProgressMeter {
    /// Feed one update; returns a line when it is time to show one.
    pub fn update(&mut self, progress: &CopyProgress) -> Option<String> {
        let dt = progress.elapsed_ms.saturating_sub(self.last_elapsed_ms);
        if dt > 0 && progress.bytes_done >= self.last_bytes {
            let sample = (progress.bytes_done - self.last_bytes) as f64 * 1000.0 / dt as f64;
            self.rate = Some(ewma_update(self.rate, sample, RATE_SMOOTHING));
        }
        self.last_bytes = progress.bytes_done;
        self.last_elapsed_ms = progress.elapsed_ms;

        let done = progress.bytes_done >= progress.bytes_total;
        let due = self
            .last_render_ms
            .is_none_or(|at| progress.elapsed_ms.saturating_sub(at) >= RENDER_INTERVAL_MS);
        if !(done || due) {
            return None;
        }
        self.last_render_ms = Some(progress.elapsed_ms);
        Some(self.render(progress))
    }

    fn render(&self, progress: &CopyProgress) -> String {
        let rate = self.rate.unwrap_or(0.0);
        let eta = compute_eta_from_throughput(progress.bytes_done, progress.bytes_total, rate);
        format!(
            "{:5.1}% {} / {} at {}/s, ETA {}",
            compute_progress_percent(progress.bytes_done, progress.bytes_total),
            format_bytes(progress.bytes_done),
            format_bytes(progress.bytes_total),
            format_bytes(rate as u64),
            format_eta(eta)
        )
    }
}
