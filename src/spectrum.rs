//! Power spectrum and locally normalised SNR spectrum.
//!
//! ```text
//! epochs [E, C, N]
//!   │
//!   ├─ Periodogram          periodic Hamming, one N-point segment per epoch
//!   │                       (Welch with a single segment), density scaling,
//!   │                       one-sided, restricted to [fmin, fmax]
//!   ├─ snr_spectrum         psd / (psd ⊛ noise_kernel), 'valid' convolution
//!   │                       padded back with NaN at both edges
//!   └─ mean / sd over E×C   linear PSD, PSD in dB, SNR
//!        │
//!        └─ peak search     max SNR within ±half-width bins of f0
//! ```
//!
//! The noise kernel for `n` neighbour bins and `s` skipped bins is
//!
//! ```text
//! [1 × n | 0 × (2s + 1) | 1 × n] / 2n
//! ```
//!
//! so the SNR at bin `k` is the PSD at `k` over the mean PSD of the `n`
//! bins on each side that lie beyond the `s`-bin signal zone.  It is
//! undefined (NaN) in the first and last `n + s` bins.
use std::ops::Range;
use std::sync::Arc;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView3, Axis};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::{debug, info};

use crate::config::SpectrumConfig;
use crate::error::{Result, SsvepError};

/// Periodic Hamming window: `0.54 − 0.46 cos(2πi / n)`, period `n` rather than `n − 1`.
pub fn hamming_periodic(n: usize) -> Array1<f64> {
    Array1::from_shape_fn(n, |i| 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos())
}

/// Single-segment Welch estimator for a fixed length and sample rate.
pub struct Periodogram {
    n: usize,
    sfreq: f64,
    window: Array1<f64>,
    /// `1 / (sfreq · Σw²)`.
    scale: f64,
    fft: Arc<dyn Fft<f64>>,
    bins: Range<usize>,
    freqs: Array1<f64>,
}

impl Periodogram {
    /// Estimator over `n`-sample inputs keeping bins with `fmin ≤ f ≤ fmax`.
    pub fn new(n: usize, sfreq: f64, fmin: f64, fmax: f64) -> Result<Self> {
        if n < 2 {
            return Err(SsvepError::InvalidConfig(format!("periodogram length must be >= 2, got {n}")));
        }
        if !(sfreq > 0.0) {
            return Err(SsvepError::InvalidConfig(format!("sample rate must be > 0, got {sfreq}")));
        }
        // k · sfreq / n keeps integer-Hz bins exact.
        let freq = |k: usize| k as f64 * sfreq / n as f64;
        let n_half = n / 2 + 1;
        let lo = (0..n_half).find(|&k| freq(k) >= fmin).unwrap_or(n_half);
        let hi = (0..n_half).rev().find(|&k| freq(k) <= fmax).map_or(0, |k| k + 1);
        if lo >= hi {
            return Err(SsvepError::InvalidConfig(format!(
                "no frequency bins in [{fmin}, {fmax}] Hz at {:.4} Hz resolution",
                sfreq / n as f64
            )));
        }
        let window = hamming_periodic(n);
        let scale = 1.0 / (sfreq * window.iter().map(|w| w * w).sum::<f64>());
        let fft = FftPlanner::<f64>::new().plan_fft_forward(n);
        let freqs = Array1::from_shape_fn(hi - lo, |i| freq(lo + i));
        Ok(Self { n, sfreq, window, scale, fft, bins: lo..hi, freqs })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Hz per bin.
    pub fn resolution(&self) -> f64 {
        self.sfreq / self.n as f64
    }

    pub fn freqs(&self) -> &Array1<f64> {
        &self.freqs
    }

    pub fn n_bins(&self) -> usize {
        self.freqs.len()
    }

    /// Power spectral density of `x` (units²/Hz) on [`Periodogram::freqs`].
    pub fn psd(&self, x: ArrayView1<f64>) -> Result<Array1<f64>> {
        if x.len() != self.n {
            return Err(SsvepError::InvalidConfig(format!(
                "periodogram expects {} samples, got {}",
                self.n,
                x.len()
            )));
        }
        let mut buf: Vec<Complex<f64>> = x
            .iter()
            .zip(self.window.iter())
            .map(|(&v, &w)| Complex { re: v * w, im: 0.0 })
            .collect();
        self.fft.process(&mut buf);

        let nyquist = (self.n % 2 == 0).then_some(self.n / 2);
        Ok(Array1::from_shape_fn(self.bins.len(), |i| {
            let k = self.bins.start + i;
            let p = buf[k].norm_sqr() * self.scale;
            if k == 0 || Some(k) == nyquist {
                p
            } else {
                2.0 * p
            }
        }))
    }
}

/// Noise-averaging kernel; always sums to 1.
pub fn noise_kernel(n_neighbor: usize, n_skip: usize) -> Result<Array1<f64>> {
    if n_neighbor == 0 {
        return Err(SsvepError::InvalidConfig("noise kernel needs at least one neighbour bin".into()));
    }
    let len = 2 * n_neighbor + 2 * n_skip + 1;
    let w = 1.0 / (2 * n_neighbor) as f64;
    Ok(Array1::from_shape_fn(len, |i| {
        if i < n_neighbor || i >= len - n_neighbor {
            w
        } else {
            0.0
        }
    }))
}

/// `psd / (psd ⊛ kernel)` with NaN in the `(kernel.len() − 1) / 2` bins at
/// each edge.
pub fn snr_spectrum(psd: ArrayView1<f64>, kernel: &Array1<f64>) -> Array1<f64> {
    let m = psd.len();
    let k = kernel.len();
    let edge = k / 2;
    let mut out = Array1::from_elem(m, f64::NAN);
    if m < k {
        return out;
    }
    // Kernel is symmetric, so correlation and convolution coincide.
    for i in 0..=m - k {
        let noise: f64 = psd.slice(s![i..i + k]).dot(kernel);
        out[i + edge] = psd[i + edge] / noise;
    }
    out
}

/// Values at one bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeak {
    pub bin: usize,
    pub freq: f64,
    /// Mean PSD in dB.
    pub psd_db: f64,
    /// Mean linear PSD.
    pub psd: f64,
    pub snr: f64,
}

impl SpectralPeak {
    pub fn missing() -> Self {
        Self { bin: 0, freq: f64::NAN, psd_db: f64::NAN, psd: f64::NAN, snr: f64::NAN }
    }
}

/// Spectra averaged over epochs × channels.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumResult {
    pub freqs: Array1<f64>,
    pub psd_mean: Array1<f64>,
    pub psd_std: Array1<f64>,
    pub psd_db_mean: Array1<f64>,
    pub psd_db_std: Array1<f64>,
    pub snr_mean: Array1<f64>,
    pub snr_std: Array1<f64>,
    pub n_epochs: usize,
    pub n_channels: usize,
    /// NaN bins at each edge of the SNR spectrum.
    pub edge_width: usize,
}

/// Borrowed display range of a [`SpectrumResult`].
#[derive(Debug, Clone)]
pub struct SpectrumBand<'a> {
    pub bins: Range<usize>,
    pub freqs: ArrayView1<'a, f64>,
    pub psd_db_mean: ArrayView1<'a, f64>,
    pub psd_db_std: ArrayView1<'a, f64>,
    pub snr_mean: ArrayView1<'a, f64>,
    pub snr_std: ArrayView1<'a, f64>,
}

impl SpectrumResult {
    /// All-NaN spectrum of a fixed size for a unit that could not be computed.
    pub fn missing(freqs: Array1<f64>, edge_width: usize) -> Self {
        let nan = Array1::from_elem(freqs.len(), f64::NAN);
        Self {
            freqs,
            psd_mean: nan.clone(),
            psd_std: nan.clone(),
            psd_db_mean: nan.clone(),
            psd_db_std: nan.clone(),
            snr_mean: nan.clone(),
            snr_std: nan,
            n_epochs: 0,
            n_channels: 0,
            edge_width,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.freqs.len()
    }

    /// Bins where the SNR spectrum is defined.
    pub fn defined_bins(&self) -> Range<usize> {
        let n = self.n_bins();
        self.edge_width.min(n)..n.saturating_sub(self.edge_width)
    }

    /// Bin closest to `freq` (first on ties); `None` on an empty axis.
    pub fn nearest_bin(&self, freq: f64) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &f) in self.freqs.iter().enumerate() {
            let d = (f - freq).abs();
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }
        best.map(|(i, _)| i)
    }

    fn check_defined(&self, lo: usize, hi: usize) -> Result<()> {
        let def = self.defined_bins();
        if lo < def.start || hi >= def.end {
            return Err(SsvepError::SpectrumEdgeUndefined {
                requested_lo: lo,
                requested_hi: hi,
                defined_lo: def.start,
                defined_hi: def.end.saturating_sub(1),
            });
        }
        Ok(())
    }

    /// Values at a single bin, without any search; `None` past the end.
    pub fn at_bin(&self, bin: usize) -> Option<SpectralPeak> {
        Some(SpectralPeak {
            bin,
            freq: *self.freqs.get(bin)?,
            psd_db: *self.psd_db_mean.get(bin)?,
            psd: *self.psd_mean.get(bin)?,
            snr: *self.snr_mean.get(bin)?,
        })
    }

    /// Maximum-SNR bin within `±half_width` bins of the bin nearest `f0`.
    ///
    /// Fails with [`SsvepError::SpectrumEdgeUndefined`] when the search
    /// window reaches the NaN edges.
    pub fn peak_near(&self, f0: f64, half_width: usize) -> Result<SpectralPeak> {
        let center = self.nearest_bin(f0).unwrap_or(0);
        let lo = center.saturating_sub(half_width);
        let hi = center + half_width;
        self.check_defined(lo, hi)?;
        let mut best = lo;
        for b in lo..=hi {
            if self.snr_mean[b] > self.snr_mean[best] {
                best = b;
            }
        }
        Ok(self.at_bin(best).unwrap_or_else(SpectralPeak::missing))
    }

    /// Views of the bins with `fmin ≤ f ≤ fmax`.
    pub fn band(&self, fmin: f64, fmax: f64) -> Result<SpectrumBand<'_>> {
        let lo = self.freqs.iter().position(|&f| f >= fmin);
        let hi = self.freqs.iter().rposition(|&f| f <= fmax);
        let (lo, hi) = match (lo, hi) {
            (Some(lo), Some(hi)) if lo <= hi => (lo, hi),
            _ => {
                return Err(SsvepError::InvalidConfig(format!("no spectrum bins in [{fmin}, {fmax}] Hz")));
            }
        };
        self.check_defined(lo, hi)?;
        let r = s![lo..=hi];
        Ok(SpectrumBand {
            bins: lo..hi + 1,
            freqs: self.freqs.slice(r),
            psd_db_mean: self.psd_db_mean.slice(r),
            psd_db_std: self.psd_db_std.slice(r),
            snr_mean: self.snr_mean.slice(r),
            snr_std: self.snr_std.slice(r),
        })
    }
}

/// Spectrum plus the response peak near the stimulation frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralAnalysis {
    pub spectrum: SpectrumResult,
    /// Maximum SNR within the signal half-width of `f0`.
    pub peak: SpectralPeak,
    /// Values at the bin nearest `f0`.
    pub target: SpectralPeak,
}

/// Computes averaged PSD / SNR spectra of `[E, C, N]` epoch cubes.
#[derive(Debug, Clone)]
pub struct SpectralAnalyzer {
    cfg: SpectrumConfig,
}

impl SpectralAnalyzer {
    pub fn new(cfg: SpectrumConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &SpectrumConfig {
        &self.cfg
    }

    pub fn periodogram(&self, n_samples: usize, sfreq: f64) -> Result<Periodogram> {
        Periodogram::new(n_samples, sfreq, self.cfg.fmin, self.cfg.fmax)
    }

    /// `(noise neighbour bins, skipped bins)` at this resolution.
    pub fn kernel_widths(&self, n_samples: usize, sfreq: f64) -> (usize, usize) {
        self.cfg.kernel_widths(sfreq / n_samples as f64)
    }

    /// Frequency axis and edge width a spectrum of `n_samples` epochs would
    /// have; used to size NaN placeholders.
    pub fn layout(&self, n_samples: usize, sfreq: f64) -> Result<(Array1<f64>, usize)> {
        let pg = self.periodogram(n_samples, sfreq)?;
        let (n, skip) = self.kernel_widths(n_samples, sfreq);
        Ok((pg.freqs().clone(), n + skip))
    }

    /// Mean and SD spectra over epochs × channels.
    pub fn spectrum(&self, epochs: ArrayView3<f64>, sfreq: f64) -> Result<SpectrumResult> {
        let (n_epochs, n_channels, n_samples) = epochs.dim();
        if n_epochs == 0 || n_channels == 0 {
            return Err(SsvepError::InsufficientTriggers { found: n_epochs, required: 1 });
        }
        let pg = self.periodogram(n_samples, sfreq)?;
        let (n_neighbor, n_skip) = self.kernel_widths(n_samples, sfreq);
        let kernel = noise_kernel(n_neighbor, n_skip)?;
        let n_bins = pg.n_bins();
        debug!(n_epochs, n_channels, n_bins, resolution = pg.resolution(), n_neighbor, n_skip, "spectrum");

        let rows = n_epochs * n_channels;
        let mut psd = Array2::<f64>::zeros((rows, n_bins));
        let mut snr = Array2::<f64>::zeros((rows, n_bins));
        for (e, epoch) in epochs.outer_iter().enumerate() {
            for (c, ch) in epoch.outer_iter().enumerate() {
                let r = e * n_channels + c;
                let p = pg.psd(ch)?;
                snr.row_mut(r).assign(&snr_spectrum(p.view(), &kernel));
                psd.row_mut(r).assign(&p);
            }
        }
        let psd_db = psd.mapv(|v| 10.0 * v.log10());

        let mean = |m: &Array2<f64>| m.mean_axis(Axis(0)).unwrap_or_else(|| Array1::from_elem(n_bins, f64::NAN));
        let std = |m: &Array2<f64>| m.std_axis(Axis(0), 0.0);
        Ok(SpectrumResult {
            freqs: pg.freqs().clone(),
            psd_mean: mean(&psd),
            psd_std: std(&psd),
            psd_db_mean: mean(&psd_db),
            psd_db_std: std(&psd_db),
            snr_mean: mean(&snr),
            snr_std: std(&snr),
            n_epochs,
            n_channels,
            edge_width: n_neighbor + n_skip,
        })
    }

    /// Spectrum and the response peak near `target_freq`.
    pub fn analyze(&self, epochs: ArrayView3<f64>, sfreq: f64) -> Result<SpectralAnalysis> {
        let spectrum = self.spectrum(epochs, sfreq)?;
        // The search stays inside the zone the noise kernel skips.
        let (_, half) = self.kernel_widths(epochs.dim().2, sfreq);
        let peak = spectrum.peak_near(self.cfg.target_freq, half)?;
        let target = spectrum
            .nearest_bin(self.cfg.target_freq)
            .and_then(|b| spectrum.at_bin(b))
            .unwrap_or_else(SpectralPeak::missing);
        info!(
            freq = peak.freq,
            snr = peak.snr,
            psd_db = peak.psd_db,
            epochs = spectrum.n_epochs,
            "spectral peak"
        );
        Ok(SpectralAnalysis { spectrum, peak, target })
    }

    /// Per-epoch PSD averaged over channels: `[E, bins]`, with its
    /// frequency axis.
    pub fn trial_spectra(&self, epochs: ArrayView3<f64>, sfreq: f64) -> Result<(Array1<f64>, Array2<f64>)> {
        let (n_epochs, n_channels, n_samples) = epochs.dim();
        if n_channels == 0 {
            return Err(SsvepError::NoGoodChannels);
        }
        let pg = self.periodogram(n_samples, sfreq)?;
        let mut out = Array2::<f64>::zeros((n_epochs, pg.n_bins()));
        for (mut row, epoch) in out.rows_mut().into_iter().zip(epochs.outer_iter()) {
            for ch in epoch.outer_iter() {
                row += &pg.psd(ch)?;
            }
            row /= n_channels as f64;
        }
        Ok((pg.freqs().clone(), out))
    }
}
