use serde::{
    Deserialize,
    Serialize,
};

/// Density-normalized histogram with equal-width bins.
///
/// `edges` has one more element than `density`; the last bin is closed on
/// the right so the maximum value is counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub density: Vec<f64>,
    pub edges: Vec<f64>,
}

impl Histogram {
    /// Histogram of `values` over `n_bins` bins spanning `[min, max]`.
    ///
    /// A constant sample gets the unit-wide range `[v - 0.5, v + 0.5]`.
    pub fn density(values: &[f32], n_bins: usize) -> Self {
        let n_bins = n_bins.max(1);
        let (mut lo, mut hi) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v as f64), hi.max(v as f64))
            });
        if !lo.is_finite() {
            lo = 0.0;
            hi = 1.0;
        } else if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }

        let width = (hi - lo) / n_bins as f64;
        let edges: Vec<f64> = (0..=n_bins).map(|i| lo + i as f64 * width).collect();

        let mut counts = vec![0u64; n_bins];
        let mut total = 0u64;
        for &v in values.iter().filter(|v| v.is_finite()) {
            let bin = (((v as f64 - lo) / width) as usize).min(n_bins - 1);
            counts[bin] += 1;
            total += 1;
        }

        let norm = if total > 0 {
            1.0 / (total as f64 * width)
        } else {
            0.0
        };
        let density = counts.iter().map(|&c| c as f64 * norm).collect();
        Self { density, edges }
    }

    pub fn n_bins(&self) -> usize {
        self.density.len()
    }

    pub fn bin_width(&self) -> f64 {
        self.edges[1] - self.edges[0]
    }

    /// Index of the most populated bin (first one on ties).
    pub fn mode_index(&self) -> usize {
        let mut best = 0;
        for (i, &d) in self.density.iter().enumerate() {
            if d > self.density[best] {
                best = i;
            }
        }
        best
    }
}

/// Evenly spaced samples over `[start, stop]`, both ends included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + i as f64 * step).collect()
        }
    }
}

/// Remap `source` so its grey-level distribution follows `reference`.
///
/// Rank-based: each distinct source value is sent to the reference value at
/// the same quantile. Equal source values stay equal.
pub fn match_histograms(source: &[f32], reference: &[f32]) -> Vec<f32> {
    if source.is_empty() || reference.is_empty() {
        return source.to_vec();
    }
    let mut order: Vec<usize> = (0..source.len()).collect();
    order.sort_unstable_by(|&a, &b| source[a].total_cmp(&source[b]));

    let mut sorted_ref = reference.to_vec();
    sorted_ref.sort_unstable_by(|a, b| a.total_cmp(b));

    let quantile_value = |q: f64| -> f32 {
        let pos = q * (sorted_ref.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(sorted_ref.len() - 1);
        let t = (pos - lo as f64) as f32;
        sorted_ref[lo] * (1.0 - t) + sorted_ref[hi] * t
    };

    let denom = (source.len() - 1).max(1) as f64;
    let mut out = vec![0.0f32; source.len()];
    let mut start = 0;
    while start < order.len() {
        let value = source[order[start]];
        let mut end = start + 1;
        while end < order.len() && source[order[end]] == value {
            end += 1;
        }
        // Ties share the quantile of their middle rank.
        let q = (start + end - 1) as f64 / 2.0 / denom;
        let mapped = quantile_value(q);
        for &i in &order[start..end] {
            out[i] = mapped;
        }
        start = end;
    }
    out
}
