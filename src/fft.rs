//! Trigger-locked amplitude spectra.
//!
//! ```text
//! channel [T], stage triggers
//!   │
//!   ├─ non_overlapping_onsets   greedy: next segment starts after the last ends
//!   │
//!   ├─ induced_fft   per segment: baseline → Hann → |FFT|, then mean over
//!   │                segments; band SNR / Z / p at f0
//!   └─ evoked_fft    mean over segments → baseline → Hann → |FFT|
//! ```
//!
//! The induced spectrum keeps power that is not phase-locked to the
//! triggers; the evoked spectrum only keeps what survives time-domain
//! averaging.  Both are one-sided: bin `k` is `k · sfreq / n` Hz.
//!
//! The band statistic compares the mean amplitude in `[f0 − w, f0 + w)`
//! with the flanking bands `[f0 − 2w, f0 − w)` and `[f0 + w, f0 + 2w)`:
//!
//! ```text
//! SNR = mean(signal) / mean(noise)
//! Z   = (mean(signal) − mean(noise)) / sd(noise)     sd with ddof = 0
//! p   = P(N(0,1) > Z)
//! ```
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::{debug, info};

use crate::epoch::segments_at;
use crate::error::{Result, SsvepError};
use crate::normalize::{baseline_correct_inplace, NullSummary};
use crate::permutation::normal_sf;

/// Symmetric Hann window (zero at both ends).
pub fn hann_symmetric(n: usize) -> Array1<f64> {
    if n == 1 {
        return Array1::ones(1);
    }
    let m = (n - 1) as f64;
    Array1::from_shape_fn(n, |i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / m).cos())
}

/// Onsets of non-overlapping `len`-sample windows that end before the last
/// sample; a trigger is taken only when it starts after the previous window.
///
/// `triggers` must be sorted.
pub fn non_overlapping_onsets(triggers: &[usize], len: usize, n_samples: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut next = 0;
    for &t in triggers {
        if t < next {
            continue;
        }
        if t + len >= n_samples {
            break;
        }
        out.push(t);
        next = t + len + 1;
    }
    out
}

/// Hann-windowed one-sided amplitude spectrum of fixed-length inputs.
pub struct AmplitudeSpectrum {
    n: usize,
    sfreq: f64,
    window: Array1<f64>,
    fft: Arc<dyn Fft<f64>>,
}

impl AmplitudeSpectrum {
    pub fn new(n: usize, sfreq: f64) -> Result<Self> {
        if n < 2 {
            return Err(SsvepError::InvalidConfig(format!("FFT segment must be >= 2 samples, got {n}")));
        }
        if !(sfreq > 0.0) {
            return Err(SsvepError::InvalidConfig(format!("sample rate must be > 0, got {sfreq}")));
        }
        Ok(Self {
            n,
            sfreq,
            window: hann_symmetric(n),
            fft: FftPlanner::<f64>::new().plan_fft_forward(n),
        })
    }

    pub fn n_bins(&self) -> usize {
        self.n / 2 + 1
    }

    pub fn freqs(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n_bins(), |k| k as f64 * self.sfreq / self.n as f64)
    }

    /// `|FFT(baseline(x) · hann)|` on bins `0..=n/2`.
    pub fn amplitude(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let mut seg = x.to_owned();
        baseline_correct_inplace(&mut seg);
        let mut buf: Vec<Complex<f64>> = seg
            .iter()
            .zip(self.window.iter())
            .map(|(&v, &w)| Complex { re: v * w, im: 0.0 })
            .collect();
        self.fft.process(&mut buf);
        Array1::from_shape_fn(self.n_bins(), |k| buf[k].norm())
    }
}

/// Signal band against its flanking noise bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandSnr {
    pub signal_mean: f64,
    pub noise_mean: f64,
    pub snr: f64,
    pub z: f64,
    pub p: f64,
}

impl BandSnr {
    pub fn missing() -> Self {
        Self { signal_mean: f64::NAN, noise_mean: f64::NAN, snr: f64::NAN, z: f64::NAN, p: f64::NAN }
    }

    /// Band statistic of `spectrum` (on `freqs`) around `f0` with bands `width` Hz wide.
    pub fn around(freqs: &Array1<f64>, spectrum: &Array1<f64>, f0: f64, width: f64) -> Result<Self> {
        // Tolerates round-off in computed bin frequencies.
        const EPS: f64 = 1e-9;
        let in_band = |f: f64, lo: f64, hi: f64| f >= lo - EPS && f < hi - EPS;
        let mut signal = Vec::new();
        let mut noise = Vec::new();
        for (&f, &v) in freqs.iter().zip(spectrum.iter()) {
            if in_band(f, f0 - width, f0 + width) {
                signal.push(v);
            } else if in_band(f, f0 - 2.0 * width, f0 - width) || in_band(f, f0 + width, f0 + 2.0 * width) {
                noise.push(v);
            }
        }
        if signal.is_empty() || noise.is_empty() {
            return Err(SsvepError::InvalidConfig(format!(
                "no bins in the signal or noise bands around {f0} Hz (±{width} Hz)"
            )));
        }
        let signal_mean = signal.iter().sum::<f64>() / signal.len() as f64;
        let noise_summary = NullSummary::from_samples(&noise);
        let z = noise_summary.zscore(signal_mean);
        Ok(Self {
            signal_mean,
            noise_mean: noise_summary.mean,
            snr: signal_mean / noise_summary.mean,
            z,
            p: normal_sf(z),
        })
    }
}

/// Mean of per-segment amplitude spectra.
#[derive(Debug, Clone, PartialEq)]
pub struct InducedFft {
    pub freqs: Array1<f64>,
    pub spectrum: Array1<f64>,
    /// Per-segment spectra `[S, bins]`.
    pub segments: Array2<f64>,
    pub band: BandSnr,
    pub n_segments: usize,
}

impl InducedFft {
    /// NaN spectrum on the axis a `len`-sample segment would have.
    pub fn missing(len: usize, sfreq: f64) -> Self {
        let freqs = Array1::from_shape_fn(len / 2 + 1, |k| k as f64 * sfreq / len as f64);
        let n = freqs.len();
        Self {
            freqs,
            spectrum: Array1::from_elem(n, f64::NAN),
            segments: Array2::zeros((0, n)),
            band: BandSnr::missing(),
            n_segments: 0,
        }
    }
}

/// Amplitude spectrum of the averaged segment.
#[derive(Debug, Clone, PartialEq)]
pub struct EvokedFft {
    pub freqs: Array1<f64>,
    pub spectrum: Array1<f64>,
    pub n_segments: usize,
}

impl EvokedFft {
    pub fn missing(len: usize, sfreq: f64) -> Self {
        let freqs = Array1::from_shape_fn(len / 2 + 1, |k| k as f64 * sfreq / len as f64);
        let spectrum = Array1::from_elem(freqs.len(), f64::NAN);
        Self { freqs, spectrum, n_segments: 0 }
    }
}

fn collect_segments(channel: ArrayView1<f64>, triggers: &[usize], len: usize) -> Result<(Vec<usize>, Array2<f64>)> {
    let onsets = non_overlapping_onsets(triggers, len, channel.len());
    if onsets.is_empty() {
        return Err(SsvepError::InsufficientTriggers { found: 0, required: 1 });
    }
    let windows = segments_at(channel, &onsets, len);
    Ok((windows.onsets, windows.data))
}

/// Induced spectrum of `len`-sample segments and its band statistic at `f0`.
pub fn induced_fft(
    channel: ArrayView1<f64>,
    triggers: &[usize],
    len: usize,
    sfreq: f64,
    f0: f64,
    band_width: f64,
) -> Result<InducedFft> {
    let amp = AmplitudeSpectrum::new(len, sfreq)?;
    let (onsets, raw) = collect_segments(channel, triggers, len)?;
    let mut segments = Array2::<f64>::zeros((onsets.len(), amp.n_bins()));
    for (mut row, seg) in segments.outer_iter_mut().zip(raw.outer_iter()) {
        row.assign(&amp.amplitude(seg));
    }
    let spectrum = segments
        .mean_axis(Axis(0))
        .ok_or(SsvepError::InsufficientTriggers { found: 0, required: 1 })?;
    let freqs = amp.freqs();
    let band = BandSnr::around(&freqs, &spectrum, f0, band_width)?;
    info!(segments = onsets.len(), snr = band.snr, z = band.z, p = band.p, "induced spectrum");
    Ok(InducedFft { freqs, spectrum, segments, band, n_segments: onsets.len() })
}

/// Spectrum of the grand average of `len`-sample segments.
pub fn evoked_fft(channel: ArrayView1<f64>, triggers: &[usize], len: usize, sfreq: f64) -> Result<EvokedFft> {
    let amp = AmplitudeSpectrum::new(len, sfreq)?;
    let (onsets, raw) = collect_segments(channel, triggers, len)?;
    let avg = raw
        .mean_axis(Axis(0))
        .ok_or(SsvepError::InsufficientTriggers { found: 0, required: 1 })?;
    let spectrum = amp.amplitude(avg.view());
    debug!(segments = onsets.len(), "evoked spectrum");
    Ok(EvokedFft { freqs: amp.freqs(), spectrum, n_segments: onsets.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn hann_is_symmetric_with_zero_ends() {
        let w = hann_symmetric(9);
        assert_abs_diff_eq!(w[0], 0.0);
        assert_abs_diff_eq!(w[8], 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(w[4], 1.0);
        assert_abs_diff_eq!(w[2], w[6], epsilon = 1e-15);
    }

    #[test]
    fn onsets_skip_overlaps_and_the_tail() {
        let triggers: Vec<usize> = (0..40).map(|i| i * 25).collect();
        // 100-sample windows: 0, then the first trigger >= 101 is 125, ...
        assert_eq!(non_overlapping_onsets(&triggers, 100, 1000), vec![0, 125, 250, 375, 500, 625, 750, 875]);
        // A window ending exactly on the last sample is not taken.
        assert_eq!(non_overlapping_onsets(&[0, 900], 100, 1000), vec![0]);
    }

    #[test]
    fn band_statistic_of_flat_spectrum_is_degenerate() {
        let freqs = Array1::from_shape_fn(501, |k| k as f64 * 0.1);
        let flat = Array1::from_elem(501, 2.0);
        let b = BandSnr::around(&freqs, &flat, 40.0, 1.0).unwrap();
        assert_abs_diff_eq!(b.snr, 1.0);
        assert!(b.z.is_nan());
    }

    #[test]
    fn band_bins_at_0_1_hz() {
        // 10 s segments: signal = bins 390..410, noise = 380..390 and 410..420.
        let freqs = Array1::from_shape_fn(5001, |k| k as f64 * 1000.0 / 10_000.0);
        let mut s = Array1::<f64>::zeros(5001);
        for k in 380..420 {
            s[k] = if (390..410).contains(&k) { 10.0 } else { 1.0 + (k % 2) as f64 };
        }
        let b = BandSnr::around(&freqs, &s, 40.0, 1.0).unwrap();
        assert_abs_diff_eq!(b.signal_mean, 10.0);
        assert_abs_diff_eq!(b.noise_mean, 1.5);
        assert_abs_diff_eq!(b.z, 17.0, epsilon = 1e-12);
    }

    #[test]
    fn band_outside_axis_is_a_config_error() {
        let freqs = Array1::from_shape_fn(11, |k| k as f64);
        let s = Array1::<f64>::ones(11);
        assert!(matches!(BandSnr::around(&freqs, &s, 40.0, 1.0), Err(SsvepError::InvalidConfig(_))));
    }

    #[test]
    fn no_segment_fits() {
        let x = Array1::<f64>::zeros(500);
        let err = induced_fft(x.view(), &[100], 1000, 1000.0, 40.0, 1.0).unwrap_err();
        assert!(err.is_local());
    }
}
