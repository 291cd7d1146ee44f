//! Photodiode trigger detection.
//!
//! Two front ends share one back end:
//!
//! ```text
//! edge mode       trigger − reference ─ baseline ─ (flip) ─ diff ─ threshold
//!                   └─ argmax in ±w refinement window ─ refractory skip
//! amplitude mode  single channel ─ absolute threshold
//!                   └─ argmax in look-ahead window ─ refractory skip
//!                          │
//!                          ▼
//! expand_cycles   keep consecutive base pairs `period ± tol` apart,
//!                 synthesise K sub-triggers per kept cycle
//!                          │
//!                          ▼
//! error_rate      fraction of sub-trigger spacings ≠ period / K
//! ```
//!
//! Finding no triggers is not an error here: the [`TriggerReport`] carries
//! the counts and downstream stages decide what an empty set means.
use ndarray::{Array1, ArrayView1};
use tracing::{debug, info, warn};

use crate::channels::difference;
use crate::config::TriggerConfig;
use crate::error::Result;

/// Result of one detection run.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerReport {
    /// Strictly increasing sub-trigger sample indices.
    pub triggers: Vec<usize>,
    /// Refined base-trigger (rising edge / amplitude peak) sample indices.
    pub base_triggers: Vec<usize>,
    /// Base pairs whose spacing matched the nominal period; each one
    /// contributes `K` sub-triggers.
    pub n_cycles: usize,
    /// Fraction (0–1) of consecutive sub-trigger spacings that differ from
    /// the expected sub-period.  NaN with fewer than two sub-triggers.
    pub error_rate: f64,
}

impl TriggerReport {
    pub fn error_rate_percent(&self) -> f64 {
        self.error_rate * 100.0
    }
}

/// Rising-edge detection on `trigger − reference`.
///
/// Returned trigger indices point at the first sample *after* the steepest
/// rise, i.e. the first "on" sample of a photodiode step.
pub fn detect_edge_triggers(
    trigger: ArrayView1<f64>,
    reference: ArrayView1<f64>,
    cfg: &TriggerConfig,
) -> Result<TriggerReport> {
    cfg.validate()?;
    let mut signal = difference(trigger, reference)?;
    if let Some(m) = signal.mean() {
        signal.mapv_inplace(|v| v - m);
    }
    if cfg.invert {
        signal.mapv_inplace(|v| -v);
    }
    let diff = first_difference(signal.view());
    let base = scan_rising_edges(diff.view(), cfg);
    debug!(n_edges = base.len(), "rising edges found");
    Ok(finish(base, cfg))
}

/// Absolute-threshold detection on a single channel, for sessions without a
/// usable reference.
pub fn detect_amplitude_triggers(channel: ArrayView1<f64>, cfg: &TriggerConfig) -> Result<TriggerReport> {
    cfg.validate()?;
    let n = channel.len();
    let mut base = Vec::new();
    let mut i = 0;
    while i < n {
        if channel[i] > cfg.amplitude_threshold {
            let hi = (i + cfg.amplitude_lookahead).min(n);
            let peak = i + argmax(channel.slice(ndarray::s![i..hi]));
            base.push(peak);
            i += cfg.amplitude_refractory.max(1);
        } else {
            i += 1;
        }
    }
    debug!(n_peaks = base.len(), "amplitude triggers found");
    Ok(finish(base, cfg))
}

/// `d[i] = x[i + 1] − x[i]`.
pub fn first_difference(x: ArrayView1<f64>) -> Array1<f64> {
    if x.len() < 2 {
        return Array1::zeros(0);
    }
    Array1::from_shape_fn(x.len() - 1, |i| x[i + 1] - x[i])
}

/// Threshold scan over a first-difference signal.
///
/// Each crossing is refined to the largest derivative value within
/// `±refine_half_window`; scanning resumes `refine_half_window` samples
/// after the refined peak, so the same edge is never reported twice.
pub fn scan_rising_edges(diff: ArrayView1<f64>, cfg: &TriggerConfig) -> Vec<usize> {
    let n = diff.len();
    let w = cfg.refine_half_window;
    let mut out: Vec<usize> = Vec::new();
    let mut k = cfg.start_offset;
    while k + w < n {
        if diff[k] > cfg.edge_threshold {
            let lo = k.saturating_sub(w);
            let hi = (k + w).min(n);
            let peak = lo + argmax(diff.slice(ndarray::s![lo..hi]));
            let onset = peak + 1;
            if out.last().map_or(true, |&last| onset > last) {
                out.push(onset);
            }
            k = peak.max(k) + w + 1;
        } else {
            k += 1;
        }
    }
    out
}

/// Keep base pairs spaced `nominal_period ± period_tolerance` apart and
/// synthesise `sub_triggers_per_period` evenly spaced sub-triggers for the
/// first trigger of each kept pair.
///
/// Returns `(sub_triggers, n_cycles)`.
pub fn expand_cycles(base: &[usize], cfg: &TriggerConfig) -> (Vec<usize>, usize) {
    let k = cfg.sub_triggers_per_period;
    let sub = cfg.sub_period();
    let mut out = Vec::with_capacity(base.len() * k);
    let mut n_cycles = 0;
    for pair in base.windows(2) {
        let spacing = pair[1].abs_diff(pair[0]);
        if pair[1] > pair[0] && spacing.abs_diff(cfg.nominal_period) <= cfg.period_tolerance {
            out.extend((0..k).map(|j| pair[0] + (j as f64 * sub).round() as usize));
            n_cycles += 1;
        }
    }
    (out, n_cycles)
}

/// Fraction of consecutive spacings that deviate from `expected` by more
/// than half a sample.
pub fn trigger_error_rate(triggers: &[usize], expected: f64) -> f64 {
    if triggers.len() < 2 {
        return f64::NAN;
    }
    let n_spacings = triggers.len() - 1;
    let errors = triggers
        .windows(2)
        .filter(|w| ((w[1] as f64 - w[0] as f64) - expected).abs() > 0.5)
        .count();
    errors as f64 / n_spacings as f64
}

fn finish(base: Vec<usize>, cfg: &TriggerConfig) -> TriggerReport {
    let (triggers, n_cycles) = expand_cycles(&base, cfg);
    let error_rate = trigger_error_rate(&triggers, cfg.sub_period());
    info!(
        base = base.len(),
        cycles = n_cycles,
        triggers = triggers.len(),
        error_rate_pct = error_rate * 100.0,
        "trigger detection done"
    );
    if triggers.is_empty() {
        warn!(base = base.len(), "no usable trigger cycles found");
    }
    TriggerReport { triggers, base_triggers: base, n_cycles, error_rate }
}

/// Index of the first maximum; 0 for an empty view.
fn argmax(x: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (i, &v) in x.iter().enumerate() {
        if v > x[best] {
            best = i;
        }
    }
    best
}
