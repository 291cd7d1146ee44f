//! Baseline correction, peak-to-trough amplitude and null-distribution scoring.
//!
//! ```text
//! baseline_correct_inplace   x -= mean(x) on one waveform
//! peak_to_trough             max(x) − min(x)
//! NullSummary::from_samples  mean / SD (ddof = 0) of a null distribution,
//!                            then the Z of a statistic against it
//! ```
use ndarray::{ArrayBase, Data, DataMut, Ix1};

/// Subtract the waveform's own mean.  Empty input is left untouched.
pub fn baseline_correct_inplace<S>(x: &mut ArrayBase<S, Ix1>)
where
    S: DataMut<Elem = f64>,
{
    if let Some(m) = x.mean() {
        x.mapv_inplace(|v| v - m);
    }
}

/// Peak-to-trough amplitude; NaN for an empty waveform or when any sample is NaN.
pub fn peak_to_trough<S>(x: &ArrayBase<S, Ix1>) -> f64
where
    S: Data<Elem = f64>,
{
    if x.is_empty() || x.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let (lo, hi) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    hi - lo
}

/// Summary of an empirical null distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NullSummary {
    pub mean: f64,
    /// Population SD (`ddof = 0`).
    pub std: f64,
}

impl NullSummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        let n = samples.len() as f64;
        if samples.is_empty() {
            return Self { mean: f64::NAN, std: f64::NAN };
        }
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Self { mean, std: var.sqrt() }
    }

    /// `(value − mean) / std`.  A degenerate null (`std == 0`) yields ±∞ or
    /// NaN following IEEE division.
    pub fn zscore(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }
}
