//! Within-subject permutation test between two conditions.
//!
//! Each condition contributes a `[trials, values]` matrix: time-domain
//! segments or per-trial spectra.  Trial `i` of A is paired with trial `i`
//! of B; the longer matrix is truncated from its end.
//!
//! The statistic is always computed on the *averaged* matrix:
//!
//! * [`TrialStatistic::PeakToTrough`]: grand-average waveform, baseline
//!   corrected, then peak-to-trough.  Averaging per-trial amplitudes instead
//!   would give a different (and wrong) null.
//! * [`TrialStatistic::Bin`]: mean over trials of the value at one column.
//!
//! Each permutation swaps the A/B labels of every trial pair independently
//! with probability ½ and recomputes `stat(A′) − stat(B′)`.
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use tracing::{debug, info};

use crate::error::{Result, SsvepError};
use crate::normalize::{peak_to_trough, NullSummary};
use crate::permutation::normal_sf;
use crate::ssvep::grand_average;

/// How a `[trials, values]` matrix is reduced to one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStatistic {
    /// Peak-to-trough amplitude of the baseline-corrected grand average.
    PeakToTrough,
    /// Trial mean of the value at this column (e.g. the PSD bin at f0).
    Bin(usize),
}

impl TrialStatistic {
    /// Statistic of a whole matrix.
    pub fn of(self, trials: ArrayView2<f64>) -> f64 {
        match self {
            TrialStatistic::PeakToTrough => grand_average(&trials.to_owned()).1,
            TrialStatistic::Bin(k) => trials.column(k).mean().unwrap_or(f64::NAN),
        }
    }

    /// Statistic of an already averaged row.
    fn of_mean(self, mean: &Array1<f64>) -> f64 {
        match self {
            // Baseline correction does not change the peak-to-trough value.
            TrialStatistic::PeakToTrough => peak_to_trough(mean),
            TrialStatistic::Bin(k) => mean[k],
        }
    }
}

/// Direction of the one-sided test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alternative {
    /// H1: statistic(A) > statistic(B).
    #[default]
    Greater,
    /// H1: statistic(A) < statistic(B).
    Less,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionResult {
    /// `stat(A) − stat(B)` on the true labels.
    pub true_difference: f64,
    pub null_mean: f64,
    pub null_std: f64,
    pub z: f64,
    /// One-sided p-value in the direction of the [`Alternative`].
    pub p: f64,
    /// Paired trials used.
    pub n_trials: usize,
    /// Trials dropped from the end of the longer matrix.
    pub n_truncated: usize,
    pub num_loops: usize,
}

impl ConditionResult {
    pub fn missing() -> Self {
        Self {
            true_difference: f64::NAN,
            null_mean: f64::NAN,
            null_std: f64::NAN,
            z: f64::NAN,
            p: f64::NAN,
            n_trials: 0,
            n_truncated: 0,
            num_loops: 0,
        }
    }
}

/// Configured paired permutation test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionTest {
    pub statistic: TrialStatistic,
    pub alternative: Alternative,
    pub num_loops: usize,
}

impl ConditionTest {
    pub fn new(statistic: TrialStatistic, num_loops: usize) -> Self {
        Self { statistic, alternative: Alternative::Greater, num_loops }
    }

    pub fn with_alternative(mut self, alternative: Alternative) -> Self {
        self.alternative = alternative;
        self
    }

    pub fn run<'v, R>(&self, a: ArrayView2<'v, f64>, b: ArrayView2<'v, f64>, rng: &mut R) -> Result<ConditionResult>
    where
        R: Rng + ?Sized,
    {
        if self.num_loops < 2 {
            return Err(SsvepError::InvalidConfig(format!("num_loops must be >= 2, got {}", self.num_loops)));
        }
        if a.ncols() != b.ncols() {
            return Err(SsvepError::MismatchedTrialShapes { left: a.ncols(), right: b.ncols() });
        }
        if let TrialStatistic::Bin(k) = self.statistic {
            if k >= a.ncols() {
                return Err(SsvepError::InvalidConfig(format!(
                    "bin {k} out of range for {} values per trial",
                    a.ncols()
                )));
            }
        }
        let (a, b, n_truncated) = truncate_to_common(a, b);
        let n_trials = a.nrows();
        if n_trials == 0 {
            return Err(SsvepError::InsufficientTriggers { found: 0, required: 1 });
        }

        let true_difference = self.statistic.of(a) - self.statistic.of(b);
        debug!(n_trials, n_truncated, true_difference, "condition contrast");

        let width = a.ncols();
        let mut null = Vec::with_capacity(self.num_loops);
        let mut sum_a = Array1::<f64>::zeros(width);
        let mut sum_b = Array1::<f64>::zeros(width);
        for _ in 0..self.num_loops {
            sum_a.fill(0.0);
            sum_b.fill(0.0);
            for (ra, rb) in a.outer_iter().zip(b.outer_iter()) {
                if rng.gen_bool(0.5) {
                    sum_a += &rb;
                    sum_b += &ra;
                } else {
                    sum_a += &ra;
                    sum_b += &rb;
                }
            }
            let mean_a = &sum_a / n_trials as f64;
            let mean_b = &sum_b / n_trials as f64;
            null.push(self.statistic.of_mean(&mean_a) - self.statistic.of_mean(&mean_b));
        }

        let summary = NullSummary::from_samples(&null);
        let z = summary.zscore(true_difference);
        let p = match self.alternative {
            Alternative::Greater => normal_sf(z),
            Alternative::Less => normal_sf(-z),
        };
        info!(n_trials, true_difference, z, p, "condition permutation test");
        Ok(ConditionResult {
            true_difference,
            null_mean: summary.mean,
            null_std: summary.std,
            z,
            p,
            n_trials,
            n_truncated,
            num_loops: self.num_loops,
        })
    }
}

/// Cut the longer matrix from its end so both have the same row count.
///
/// Returns the two views and the number of rows removed.
pub fn truncate_to_common<'a>(
    a: ArrayView2<'a, f64>,
    b: ArrayView2<'a, f64>,
) -> (ArrayView2<'a, f64>, ArrayView2<'a, f64>, usize) {
    let n = a.nrows().min(b.nrows());
    let removed = a.nrows().max(b.nrows()) - n;
    (a.slice_move(s![..n, ..]), b.slice_move(s![..n, ..]), removed)
}

/// Stack per-trial rows from several sources into one matrix.
pub fn stack_trials(parts: &[ArrayView2<f64>]) -> Result<Array2<f64>> {
    match parts.first() {
        None => Ok(Array2::zeros((0, 0))),
        Some(first) => {
            if let Some(p) = parts.iter().find(|p| p.ncols() != first.ncols()) {
                return Err(SsvepError::MismatchedTrialShapes { left: first.ncols(), right: p.ncols() });
            }
            ndarray::concatenate(Axis(0), parts)
                .map_err(|e| SsvepError::InvalidConfig(format!("cannot stack trials: {e}")))
        }
    }
}
