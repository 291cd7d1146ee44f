//! Channel derivations: trigger-minus-reference difference and ROI averages.
//!
//! Channel names are matched case-insensitively with spaces removed
//! (`"fp 1"` matches `"Fp1"`).  A missing channel or an ROI left empty after
//! bad-channel exclusion is an error, never a silently substituted null.
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, SsvepError};

/// Lowercase and strip spaces.
pub fn normalize_name(name: &str) -> String {
    name.replace(' ', "").to_lowercase()
}

/// Row index of `name` in `ch_names`.
pub fn find_channel(ch_names: &[String], name: &str) -> Result<usize> {
    let want = normalize_name(name);
    ch_names
        .iter()
        .position(|n| normalize_name(n) == want)
        .ok_or_else(|| SsvepError::ChannelNotFound(name.to_string()))
}

/// `trigger − reference`, sample by sample.
pub fn difference(trigger: ArrayView1<f64>, reference: ArrayView1<f64>) -> Result<Array1<f64>> {
    if trigger.len() != reference.len() {
        return Err(SsvepError::InvalidConfig(format!(
            "trigger channel has {} samples, reference has {}",
            trigger.len(),
            reference.len()
        )));
    }
    Ok(&trigger - &reference)
}

/// Indices of `picks` (all channels when empty) that are not listed in `bad`.
///
/// Every name in `picks` must exist; names in `bad` that do not exist are
/// ignored.
pub fn good_channels(ch_names: &[String], picks: &[String], bad: &[String]) -> Result<Vec<usize>> {
    let bad: Vec<String> = bad.iter().map(|b| normalize_name(b)).collect();
    let candidates: Vec<usize> = if picks.is_empty() {
        (0..ch_names.len()).collect()
    } else {
        picks.iter().map(|p| find_channel(ch_names, p)).collect::<Result<_>>()?
    };
    let good: Vec<usize> = candidates
        .into_iter()
        .filter(|&i| !bad.contains(&normalize_name(&ch_names[i])))
        .collect();
    if good.is_empty() {
        return Err(SsvepError::NoGoodChannels);
    }
    Ok(good)
}

/// Mean across the good ROI channels at each time point.
///
/// `data`: `[C, T]` with `C == ch_names.len()`  →  `[T]`.
pub fn roi_average(
    data: ArrayView2<f64>,
    ch_names: &[String],
    roi: &[String],
    bad: &[String],
) -> Result<Array1<f64>> {
    if data.nrows() != ch_names.len() {
        return Err(SsvepError::InvalidConfig(format!(
            "{} data rows but {} channel names",
            data.nrows(),
            ch_names.len()
        )));
    }
    let idx = good_channels(ch_names, roi, bad)?;
    let picked = data.select(Axis(0), &idx);
    picked.mean_axis(Axis(0)).ok_or(SsvepError::NoGoodChannels)
}
