//! Linear interpolation over stimulator artifacts.
//!
//! The LED driver couples into the EEG at fixed offsets from every flicker
//! onset.  For each trigger `t` and window `(offset, length)` the samples
//! `t + offset ..= t + offset + length` are replaced, on every channel, by
//! the straight line between the two end samples.  Triggers are processed
//! in order on a copy of the data, so a window may start from an end point
//! corrected by the previous trigger.
use ndarray::{s, Array2, ArrayView2};
use tracing::debug;

use crate::config::ArtifactWindow;
use crate::error::{Result, SsvepError};

/// Corrected copy of `data` (`[C, T]`) and the number of (trigger, window)
/// pairs skipped because they reached outside the recording.
pub fn interpolate_flicker_artifacts(
    data: ArrayView2<f64>,
    triggers: &[usize],
    windows: &[ArtifactWindow],
) -> Result<(Array2<f64>, usize)> {
    if let Some(w) = windows.iter().find(|w| w.length == 0) {
        return Err(SsvepError::InvalidConfig(format!("artifact window at offset {} has zero length", w.offset)));
    }
    let n_t = data.ncols() as i64;
    let mut out = data.to_owned();
    let mut skipped = 0;
    for &t in triggers {
        for w in windows {
            let start = t as i64 + w.offset;
            let end = start + w.length as i64;
            if start < 0 || end >= n_t {
                skipped += 1;
                continue;
            }
            let (start, end) = (start as usize, end as usize);
            for mut row in out.rows_mut() {
                let a = row[start];
                let b = row[end];
                let step = (b - a) / w.length as f64;
                for (i, v) in row.slice_mut(s![start..=end]).iter_mut().enumerate() {
                    *v = a + step * i as f64;
                }
            }
        }
    }
    debug!(triggers = triggers.len(), windows = windows.len(), skipped, "flicker artifacts interpolated");
    Ok((out, skipped))
}
