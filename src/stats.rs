//! Latency statistics over millisecond samples.
//!
//! Pure functions shared by the server's experiment reports and the client's
//! response-time output. Nothing here holds state between calls.

use std::fmt::Write;

/// Arithmetic mean, `0` for an empty slice.
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation around a precomputed mean.
///
/// Divides by `n`, not `n - 1`. Returns `0` for an empty slice.
pub fn std_dev(samples: &[f64], mean: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|v| (v - mean) * (v - mean)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Concatenate per-client sequences into one flat sequence.
pub fn merge<'a, I>(sequences: I) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut merged = Vec::new();
    for seq in sequences {
        merged.extend_from_slice(seq);
    }
    merged
}

/// Nearest-rank percentiles `1..=100` of the samples.
///
/// The p-th percentile is the value at index `ceil(p * n / 100) - 1` of the
/// ascending order. Empty input yields no percentiles.
pub fn percentiles(samples: &[f64]) -> Vec<(u32, f64)> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    (1..=100u32)
        .map(|p| {
            let rank = (p as usize * n).div_ceil(100);
            (p, sorted[rank - 1])
        })
        .collect()
}

/// Mean and standard deviation of one sample set.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub mean: f64,
    pub std_dev: f64,
}

impl Summary {
    pub fn of(samples: &[f64]) -> Self {
        let mean = mean(samples);
        Self {
            mean,
            std_dev: std_dev(samples, mean),
        }
    }
}

/// Render a percentile dump: a header line then one `p,value` line per rank.
pub fn render_percentiles(name: &str, samples: &[f64]) -> String {
    let mut out = format!("{name} time percentiles [ms]:\n");
    for (p, value) in percentiles(samples) {
        let _ = writeln!(out, "{p},{value}");
    }
    out
}
