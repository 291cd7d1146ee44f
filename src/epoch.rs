//! Onset-anchored windowing.
//!
//! Cuts `[onset, onset + len)` windows out of a single channel (segments for
//! the evoked average) or out of a `[C, T]` recording (30 s epochs for the
//! spectrum).  Windows that would run past the end of the data are skipped
//! and counted, never zero-padded.
use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2, Axis};
use tracing::debug;

use crate::normalize::peak_to_trough;

/// Windows cut from one channel, one per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Windows<A> {
    pub data: A,
    /// Onsets of the rows in `data`, in input order.
    pub onsets: Vec<usize>,
    /// Onsets skipped because `onset + len` exceeded the data length.
    pub out_of_bounds: usize,
}

/// `[N, len]` matrix of `x[t..t + len]` for every in-bounds onset `t`.
pub fn segments_at(x: ArrayView1<f64>, onsets: &[usize], len: usize) -> Windows<Array2<f64>> {
    let n = x.len();
    let kept: Vec<usize> = onsets.iter().copied().filter(|&t| t + len <= n).collect();
    let mut data = Array2::<f64>::zeros((kept.len(), len));
    for (mut row, &t) in data.rows_mut().into_iter().zip(&kept) {
        row.assign(&x.slice(s![t..t + len]));
    }
    let out_of_bounds = onsets.len() - kept.len();
    Windows { data, onsets: kept, out_of_bounds }
}

/// `[E, C, len]` cube of `data[.., t..t + len]` for every in-bounds start.
pub fn epochs_at(data: ArrayView2<f64>, starts: &[usize], len: usize) -> Windows<Array3<f64>> {
    let (n_ch, n_t) = data.dim();
    let kept: Vec<usize> = starts.iter().copied().filter(|&t| t + len <= n_t).collect();
    let mut out = Array3::<f64>::zeros((kept.len(), n_ch, len));
    for (e, &t) in kept.iter().enumerate() {
        out.slice_mut(s![e, .., ..]).assign(&data.slice(s![.., t..t + len]));
    }
    let out_of_bounds = starts.len() - kept.len();
    if out_of_bounds > 0 {
        debug!(out_of_bounds, "epochs past the end of the recording skipped");
    }
    Windows { data: out, onsets: kept, out_of_bounds }
}

/// Drop epochs whose peak-to-peak amplitude reaches `threshold` on any
/// channel.  Returns the surviving epochs and the number rejected.
pub fn reject_epochs(epochs: Windows<Array3<f64>>, threshold: f64) -> (Windows<Array3<f64>>, usize) {
    let keep: Vec<usize> = epochs
        .data
        .outer_iter()
        .enumerate()
        .filter(|(_, ep)| ep.rows().into_iter().all(|ch| peak_to_trough(&ch) < threshold))
        .map(|(i, _)| i)
        .collect();
    let rejected = epochs.onsets.len() - keep.len();
    let data = epochs.data.select(Axis(0), &keep);
    let onsets = keep.iter().map(|&i| epochs.onsets[i]).collect();
    (Windows { data, onsets, out_of_bounds: epochs.out_of_bounds }, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    #[test]
    fn segment_rows_match_source() {
        let x = Array1::from_shape_fn(100, |i| i as f64);
        let w = segments_at(x.view(), &[0, 10, 90], 5);
        assert_eq!(w.data.dim(), (3, 5));
        assert_eq!(w.data.row(1).to_vec(), vec![10.0, 11.0, 12.0, 13.0, 14.0]);
        assert_eq!(w.out_of_bounds, 0);
    }

    #[test]
    fn window_touching_end_is_kept_past_end_dropped() {
        let x = Array1::<f64>::zeros(100);
        let w = segments_at(x.view(), &[75, 76], 25);
        assert_eq!(w.onsets, vec![75]);
        assert_eq!(w.out_of_bounds, 1);
    }

    #[test]
    fn epoch_cube_shape() {
        let data = Array2::from_elem((3, 1000), 1.0);
        let w = epochs_at(data.view(), &[0, 300, 800], 300);
        assert_eq!(w.data.dim(), (2, 3, 300));
        assert_eq!(w.out_of_bounds, 1);
    }

    #[test]
    fn epoch_rejection_checks_every_channel() {
        let mut data = Array2::<f64>::zeros((2, 200));
        // Large excursion on channel 1 inside the second epoch only.
        data[[1, 150]] = 5000.0;
        let w = epochs_at(data.view(), &[0, 100], 100);
        let (kept, rejected) = reject_epochs(w, 1000.0);
        assert_eq!(rejected, 1);
        assert_eq!(kept.onsets, vec![0]);
        assert_eq!(kept.data.dim(), (1, 2, 100));
    }
}
