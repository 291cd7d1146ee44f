//! Segment averaging (the time-domain steady-state response).
//!
//! For every trigger the window `[t, t + L)` is cut from the channel.
//! Segments with a peak-to-peak amplitude below the artifact threshold are
//! kept; the rest are rejected.  The kept segments are averaged sample-wise
//! and the average is baseline corrected; its peak-to-trough amplitude is
//! the effect size.
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::config::SegmentConfig;
use crate::epoch::segments_at;
use crate::error::{Result, SsvepError};
use crate::normalize::{baseline_correct_inplace, peak_to_trough};

/// Averaged response for one (channel set, stage, condition) unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Evoked {
    /// Baseline-corrected average of the accepted segments, length `L`.
    pub waveform: Array1<f64>,
    /// Per-sample standard error of the mean (`ddof = 1`); NaN with fewer
    /// than two accepted segments.
    pub sem: Array1<f64>,
    /// Peak-to-trough amplitude of `waveform`.
    pub amplitude: f64,
    pub n_accepted: usize,
    pub n_rejected: usize,
    pub n_out_of_bounds: usize,
    /// Accepted segments `[n_accepted, L]`, raw (not baseline corrected),
    /// kept for the permutation statistics.
    pub segments: Array2<f64>,
}

/// Extracts, screens and averages segments.
#[derive(Debug, Clone)]
pub struct SegmentAverager {
    cfg: SegmentConfig,
}

impl SegmentAverager {
    pub fn new(cfg: SegmentConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.cfg
    }

    /// Average the segments anchored at `triggers`.
    ///
    /// Fails with [`SsvepError::InsufficientTriggers`] when fewer than
    /// `min_trials` windows fit inside the data or survive screening, and
    /// with [`SsvepError::AllSegmentsRejected`] when in-bounds windows exist
    /// but none pass the artifact check.
    pub fn average(&self, channel: ArrayView1<f64>, triggers: &[usize]) -> Result<Evoked> {
        let required = self.cfg.min_trials.max(1);
        let windows = segments_at(channel, triggers, self.cfg.length);
        let n_candidates = windows.onsets.len();
        if n_candidates < required {
            return Err(SsvepError::InsufficientTriggers { found: n_candidates, required });
        }

        let keep: Vec<usize> = windows
            .data
            .outer_iter()
            .enumerate()
            .filter(|(_, seg)| peak_to_trough(seg) < self.cfg.artifact_threshold)
            .map(|(i, _)| i)
            .collect();
        let n_accepted = keep.len();
        let n_rejected = n_candidates - n_accepted;
        debug!(
            candidates = n_candidates,
            accepted = n_accepted,
            rejected = n_rejected,
            out_of_bounds = windows.out_of_bounds,
            "segments screened"
        );
        if n_accepted == 0 {
            return Err(SsvepError::AllSegmentsRejected {
                rejected: n_rejected,
                out_of_bounds: windows.out_of_bounds,
            });
        }
        if n_accepted < required {
            return Err(SsvepError::InsufficientTriggers { found: n_accepted, required });
        }

        let segments = windows.data.select(Axis(0), &keep);
        let (waveform, amplitude) = grand_average(&segments);
        let sem = standard_error(&segments);
        info!(accepted = n_accepted, rejected = n_rejected, amplitude, "evoked response");

        Ok(Evoked {
            waveform,
            sem,
            amplitude,
            n_accepted,
            n_rejected,
            n_out_of_bounds: windows.out_of_bounds,
            segments,
        })
    }
}

/// Convenience wrapper around [`SegmentAverager::average`].
pub fn average_segments(channel: ArrayView1<f64>, triggers: &[usize], cfg: &SegmentConfig) -> Result<Evoked> {
    SegmentAverager::new(cfg.clone())?.average(channel, triggers)
}

/// Mean over rows, baseline corrected, and its peak-to-trough amplitude.
///
/// An empty matrix yields a NaN waveform and NaN amplitude.
pub fn grand_average(segments: &Array2<f64>) -> (Array1<f64>, f64) {
    match segments.mean_axis(Axis(0)) {
        Some(mut avg) => {
            baseline_correct_inplace(&mut avg);
            let amp = peak_to_trough(&avg);
            (avg, amp)
        }
        None => (Array1::from_elem(segments.ncols(), f64::NAN), f64::NAN),
    }
}

/// Per-column `std(ddof = 1) / sqrt(n)`.
pub fn standard_error(segments: &Array2<f64>) -> Array1<f64> {
    let n = segments.nrows();
    if n < 2 {
        return Array1::from_elem(segments.ncols(), f64::NAN);
    }
    segments.std_axis(Axis(0), 1.0).mapv(|sd| sd / (n as f64).sqrt())
}

/// Reliability of the response: shuffle the segments, split them into two
/// halves (the first `n / 2` and the rest) and correlate the two
/// baseline-corrected grand averages.
///
/// Pearson `r`; NaN when either half-average is flat.
pub fn split_half_correlation<R>(segments: ArrayView2<f64>, rng: &mut R) -> Result<f64>
where
    R: Rng + ?Sized,
{
    let n = segments.nrows();
    if n < 2 {
        return Err(SsvepError::InsufficientTriggers { found: n, required: 2 });
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let (first, second) = order.split_at(n / 2);
    let (a, _) = grand_average(&segments.select(Axis(0), first));
    let (b, _) = grand_average(&segments.select(Axis(0), second));
    Ok(pearson(&a, &b))
}

fn pearson(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let (ma, mb) = match (a.mean(), b.mean()) {
        (Some(ma), Some(mb)) => (ma, mb),
        _ => return f64::NAN,
    };
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        sab += (x - ma) * (y - mb);
        saa += (x - ma) * (x - ma);
        sbb += (y - mb) * (y - mb);
    }
    sab / (saa * sbb).sqrt()
}
