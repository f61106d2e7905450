//! Client-side response-time bookkeeping and output lines.

use crate::stats::{self, Summary};
use std::time::Instant;

/// Response latencies of one client, plus interval throughput tracking.
#[derive(Debug)]
pub struct ResponseStats {
    samples: Vec<f64>,
    since_print: u64,
    last_print: Instant,
    created: Instant,
}

impl Default for ResponseStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseStats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            samples: Vec::new(),
            since_print: 0,
            last_print: now,
            created: now,
        }
    }

    pub fn record(&mut self, ms: f64) {
        self.samples.push(ms);
        self.since_print += 1;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Throughput since the previous interval line.
    ///
    /// Returns `None` when less than a second has passed, unless `force`.
    pub fn interval(&mut self, force: bool) -> Option<String> {
        self.interval_at(Instant::now(), force)
    }

    fn interval_at(&mut self, now: Instant, force: bool) -> Option<String> {
        let elapsed = now.duration_since(self.last_print).as_secs_f64();
        if elapsed < 1.0 && !force {
            return None;
        }
        let tput = rate(self.since_print as f64, elapsed);
        self.last_print = now;
        self.since_print = 0;
        Some(format!(
            "Interval time [s], Throughput [ops/s]: {elapsed}, {tput}"
        ))
    }

    /// Elapsed time and throughput over the client's whole run.
    pub fn totals(&self) -> String {
        let elapsed = self.created.elapsed().as_secs_f64();
        let tput = rate(self.samples.len() as f64, elapsed);
        format!("Total time [s], Throughput [ops/s]: {elapsed}, {tput}")
    }

    /// `docKiB;clients;totalSecs;avg;std;tput`
    pub fn summary_line(&self, doc_kib: f64, clients: i64) -> String {
        let elapsed = self.created.elapsed().as_secs_f64();
        let summary = Summary::of(&self.samples);
        let tput = rate(self.samples.len() as f64, elapsed);
        format!(
            "{doc_kib};{clients};{elapsed};{};{};{tput}",
            summary.mean, summary.std_dev
        )
    }

    pub fn percentile_dump(&self) -> String {
        stats::render_percentiles("Response", &self.samples)
    }
}

fn rate(count: f64, secs: f64) -> f64 {
    if secs > 0.0 {
        count / secs
    } else {
        0.0
    }
}
