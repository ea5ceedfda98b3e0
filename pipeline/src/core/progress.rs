//! Progress and ETA estimation from discrete completion events.
//!
//! The average item duration is an exponential moving average. The first
//! [`WARMUP_SAMPLES`] samples seed it as a plain mean so an early outlier does
//! not dominate the estimate.

use std::time::Duration;

pub const SMOOTHING_ALPHA: f64 = 0.3;
pub const WARMUP_SAMPLES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressTracker {
    total: usize,
    completed: usize,
    samples: u32,
    average_secs: f64,
}

impl ProgressTracker {
    /// `total` is fixed for the tracker's lifetime; `already_completed` covers
    /// items finished by an earlier run of the same session.
    pub fn new(total: usize, already_completed: usize) -> Self {
        Self {
            total,
            completed: already_completed.min(total),
            samples: 0,
            average_secs: 0.0,
        }
    }

    /// Record one completion. Returns the new completed count.
    pub fn record(&mut self, duration: Duration) -> usize {
        let sample = duration.as_secs_f64();
        self.samples += 1;
        if self.samples <= WARMUP_SAMPLES {
            let n = f64::from(self.samples);
            self.average_secs += (sample - self.average_secs) / n;
        } else {
            self.average_secs =
                SMOOTHING_ALPHA * sample + (1.0 - SMOOTHING_ALPHA) * self.average_secs;
        }
        self.completed = (self.completed + 1).min(self.total);
        self.completed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn remaining(&self) -> usize {
        self.total - self.completed
    }

    pub fn average(&self) -> Option<Duration> {
        (self.samples > 0).then(|| Duration::from_secs_f64(self.average_secs))
    }

    /// `remaining * average`, undefined until the first sample.
    pub fn eta(&self) -> Option<Duration> {
        let average = self.average()?;
        Some(Duration::from_secs_f64(
            average.as_secs_f64() * self.remaining() as f64,
        ))
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 * 100.0 / self.total as f64
    }

    /// e.g. `3/10 (30%) eta 4m12s`.
    pub fn render(&self) -> String {
        let eta = self
            .eta()
            .map(format_duration)
            .unwrap_or_else(|| "--".to_string());
        format!(
            "{}/{} ({:.0}%) eta {}",
            self.completed,
            self.total,
            self.percent(),
            eta
        )
    }

    /// True when `completed` lands on a multiple of `interval`.
    pub fn should_log(&self, interval: usize) -> bool {
        interval > 0 && self.completed > 0 && self.completed % interval == 0
    }

    pub fn summary(&self) -> String {
        let average = self
            .average()
            .map(format_duration)
            .unwrap_or_else(|| "--".to_string());
        format!(
            "completed {}/{} items, {} remaining, avg {} per item",
            self.completed,
            self.total,
            self.remaining(),
            average
        )
    }
}

/// Compact `1h02m03s` / `4m12s` / `9s` rendering.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}
