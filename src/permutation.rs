//! Permutation significance of the time-domain response.
//!
//! Shuffling the sample order inside every accepted segment destroys the
//! time-locking that produces a flicker response but keeps each segment's
//! amplitude distribution.  The peak-to-trough amplitudes of the shuffled
//! grand averages form the null distribution:
//!
//! ```text
//! SNR = A_true / mean(null)
//! Z   = (A_true − mean(null)) / sd(null)        sd with ddof = 0
//! p   = P(N(0,1) > Z)                           one-sided, upper tail
//! ```
//!
//! Every stochastic function takes the generator explicitly; use
//! [`derive_seed`] to give each work unit its own reproducible stream.
use ndarray::{ArrayBase, ArrayView2, DataMut, Ix1};
use rand::Rng;
use tracing::{debug, info};

use crate::error::{Result, SsvepError};
use crate::normalize::NullSummary;
use crate::ssvep::grand_average;

/// Outcome of one permutation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PermutationResult {
    /// Statistic on the unshuffled data.
    pub true_value: f64,
    pub null_mean: f64,
    /// Population SD of the null statistics.
    pub null_std: f64,
    /// `true_value / null_mean`.
    pub snr: f64,
    pub z: f64,
    /// One-sided upper-tail normal p-value of `z`.
    pub p: f64,
    pub num_loops: usize,
}

impl PermutationResult {
    /// Assemble from the true statistic and the null samples.
    pub fn from_null(true_value: f64, null: &[f64]) -> Self {
        let summary = NullSummary::from_samples(null);
        let z = summary.zscore(true_value);
        Self {
            true_value,
            null_mean: summary.mean,
            null_std: summary.std,
            snr: true_value / summary.mean,
            z,
            p: normal_sf(z),
            num_loops: null.len(),
        }
    }

    /// All-NaN placeholder for a unit that could not be computed.
    pub fn missing() -> Self {
        Self {
            true_value: f64::NAN,
            null_mean: f64::NAN,
            null_std: f64::NAN,
            snr: f64::NAN,
            z: f64::NAN,
            p: f64::NAN,
            num_loops: 0,
        }
    }
}

/// Permutation SNR of an evoked response.
///
/// `segments` is the `[N, L]` matrix of accepted segments and
/// `true_amplitude` the peak-to-trough amplitude of their baseline-corrected
/// grand average.
pub fn permutation_snr<R>(
    segments: ArrayView2<f64>,
    true_amplitude: f64,
    num_loops: usize,
    rng: &mut R,
) -> Result<PermutationResult>
where
    R: Rng + ?Sized,
{
    if num_loops < 2 {
        return Err(SsvepError::InvalidConfig(format!("num_loops must be >= 2, got {num_loops}")));
    }
    if segments.nrows() == 0 {
        return Err(SsvepError::InsufficientTriggers { found: 0, required: 1 });
    }

    let mut work = segments.to_owned();
    let mut null = Vec::with_capacity(num_loops);
    for _ in 0..num_loops {
        for mut row in work.rows_mut() {
            shuffle(&mut row, rng);
        }
        let (_, amp) = grand_average(&work);
        null.push(amp);
    }

    let res = PermutationResult::from_null(true_amplitude, &null);
    debug!(null_mean = res.null_mean, null_std = res.null_std, "null distribution");
    info!(snr = res.snr, z = res.z, p = res.p, loops = num_loops, "permutation SNR");
    Ok(res)
}

/// In-place Fisher–Yates shuffle of a 1-D array.
pub fn shuffle<S, R>(x: &mut ArrayBase<S, Ix1>, rng: &mut R)
where
    S: DataMut<Elem = f64>,
    R: Rng + ?Sized,
{
    for i in (1..x.len()).rev() {
        let j = rng.gen_range(0..=i);
        x.swap(i, j);
    }
}

/// Upper-tail probability of the standard normal: `P(N(0,1) > z)`.
pub fn normal_sf(z: f64) -> f64 {
    0.5 * libm::erfc(z / std::f64::consts::SQRT_2)
}

/// Per-unit seed from a run seed and a stable unit identifier such as
/// `"sham/N2/ssvep"`.
///
/// FNV-1a of the identifier, xor-ed into the run seed and passed through a
/// SplitMix64 finaliser.
pub fn derive_seed(run_seed: u64, unit_id: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let h = unit_id
        .bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ b as u64).wrapping_mul(FNV_PRIME));
    splitmix64(run_seed ^ h)
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
