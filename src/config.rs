//! Analysis configuration.
//!
//! [`AnalysisConfig`] holds every tunable parameter of the steady-state
//! analysis.  All fields have defaults that match the 1 kHz / 40 Hz flicker
//! studies; use [`AnalysisConfig::for_sample_rate`] for other sampling rates
//! instead of editing sample counts by hand.
//!
//! Every struct deserialises with `#[serde(default)]`, so a JSON file only
//! has to name the fields it overrides:
//!
//! ```
//! use ssvep::AnalysisConfig;
//!
//! let cfg: AnalysisConfig = serde_json::from_str(
//!     r#"{ "segment": { "artifact_threshold": 200.0 }, "permutation": { "seed": 7 } }"#,
//! ).unwrap();
//! assert_eq!(cfg.segment.length, 25);
//! assert_eq!(cfg.permutation.seed, 7);
//! ```
use serde::{Deserialize, Serialize};

use crate::error::{Result, SsvepError};

/// Photodiode trigger detection parameters.
///
/// All widths are in **samples** at the recording's sampling rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Rising-edge threshold applied to the first difference of the
    /// baseline-corrected `trigger − reference` signal.
    ///
    /// Default: `200.0`.
    pub edge_threshold: f64,

    /// Half-width of the argmax refinement window around a threshold
    /// crossing, and width of the refractory skip after an accepted edge.
    ///
    /// Default: `10` (10 ms at 1 kHz).
    pub refine_half_window: usize,

    /// First derivative sample the scan looks at.
    ///
    /// Default: `15`.
    pub start_offset: usize,

    /// Nominal spacing of base (1 Hz) triggers.
    ///
    /// Default: `1000`.
    pub nominal_period: usize,

    /// Accepted deviation of a base-trigger pair from `nominal_period`.
    ///
    /// Must stay below the sub-trigger period so that consecutive cycles
    /// never interleave.
    ///
    /// Default: `2`.
    pub period_tolerance: usize,

    /// Number of evenly spaced sub-triggers synthesised per accepted cycle
    /// (one per flicker period inside the 1 s window).
    ///
    /// Default: `40`.
    pub sub_triggers_per_period: usize,

    /// Flip the difference signal when the photodiode wiring is inverted.
    ///
    /// Default: `false`.
    pub invert: bool,

    /// Absolute amplitude threshold for the single-channel (DC input) mode.
    ///
    /// Default: `300.0` (mV).
    pub amplitude_threshold: f64,

    /// Look-ahead window in which the local maximum is taken once the
    /// amplitude threshold is crossed.
    ///
    /// Default: `5`.
    pub amplitude_lookahead: usize,

    /// Refractory skip after an amplitude-mode trigger.
    ///
    /// Default: `900`.
    pub amplitude_refractory: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 200.0,
            refine_half_window: 10,
            start_offset: 15,
            nominal_period: 1000,
            period_tolerance: 2,
            sub_triggers_per_period: 40,
            invert: false,
            amplitude_threshold: 300.0,
            amplitude_lookahead: 5,
            amplitude_refractory: 900,
        }
    }
}

impl TriggerConfig {
    /// Defaults rescaled from 1 kHz to `sfreq` (e.g. 5 kHz → 50-sample
    /// refinement window, 5000-sample period, 125-sample sub-period).
    pub fn for_sample_rate(sfreq: f64) -> Self {
        let scale = sfreq / 1000.0;
        let s = |n: usize| ((n as f64) * scale).round().max(1.0) as usize;
        let d = Self::default();
        Self {
            refine_half_window: s(d.refine_half_window),
            start_offset: s(d.start_offset),
            nominal_period: s(d.nominal_period),
            period_tolerance: s(d.period_tolerance),
            amplitude_lookahead: s(d.amplitude_lookahead),
            amplitude_refractory: s(d.amplitude_refractory),
            ..d
        }
    }

    /// Expected spacing between consecutive sub-triggers, in samples.
    pub fn sub_period(&self) -> f64 {
        self.nominal_period as f64 / self.sub_triggers_per_period as f64
    }

    pub fn validate(&self) -> Result<()> {
        if self.nominal_period == 0 || self.sub_triggers_per_period == 0 {
            return Err(invalid("nominal_period and sub_triggers_per_period must be > 0"));
        }
        if self.sub_triggers_per_period > self.nominal_period {
            return Err(invalid("more sub-triggers than samples per period"));
        }
        if self.refine_half_window == 0 {
            return Err(invalid("refine_half_window must be > 0"));
        }
        if self.period_tolerance as f64 >= self.sub_period() {
            return Err(invalid(format!(
                "period_tolerance {} must be below the sub-trigger period {:.2}",
                self.period_tolerance,
                self.sub_period()
            )));
        }
        if !self.edge_threshold.is_finite() || !self.amplitude_threshold.is_finite() {
            return Err(invalid("trigger thresholds must be finite"));
        }
        if self.amplitude_lookahead == 0 {
            return Err(invalid("amplitude_lookahead must be > 0"));
        }
        Ok(())
    }
}

/// Hypnogram handling and stimulated-epoch selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Scoring epoch duration in seconds (AASM: 30 s).
    pub epoch_dur: f64,

    /// Epochs scored with a lower classifier confidence are dropped before
    /// triggers are matched to stages.
    ///
    /// Default: `0.5`.
    pub min_confidence: f64,

    /// Minimum number of triggers an epoch must contain to count as
    /// "stimulated" for spectral analysis.
    ///
    /// Default: `1000` (40 Hz × 25 s).
    pub min_triggers_per_epoch: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self { epoch_dur: 30.0, min_confidence: 0.5, min_triggers_per_epoch: 40 * 25 }
    }
}

impl StagingConfig {
    /// Samples per scoring epoch: `floor(epoch_dur × sfreq)`.
    pub fn epoch_samples(&self, sfreq: f64) -> usize {
        (self.epoch_dur * sfreq) as usize
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.epoch_dur > 0.0) {
            return Err(invalid("epoch_dur must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(invalid("min_confidence must lie in [0, 1]"));
        }
        Ok(())
    }
}

/// Time-domain segment averaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Segment length `L` in samples (one flicker period: 25 at 1 kHz).
    pub length: usize,

    /// Segments whose peak-to-peak amplitude is not strictly below this
    /// value are rejected as artifacts.
    ///
    /// Default: `100.0` (µV).
    pub artifact_threshold: f64,

    /// Fewer surviving segments than this is reported as
    /// [`SsvepError::InsufficientTriggers`].
    ///
    /// Default: `1`.
    pub min_trials: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self { length: 25, artifact_threshold: 100.0, min_trials: 1 }
    }
}

impl SegmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.length == 0 {
            return Err(invalid("segment length must be > 0"));
        }
        if !(self.artifact_threshold > 0.0) {
            return Err(invalid("artifact_threshold must be > 0"));
        }
        Ok(())
    }
}

/// PSD / SNR spectrum parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Lowest frequency kept in the spectrum (Hz).
    pub fmin: f64,

    /// Highest frequency kept in the spectrum (Hz).
    pub fmax: f64,

    /// Stimulation frequency `f0` (Hz).
    pub target_freq: f64,

    /// Half-width of the "signal" zone around `f0` (Hz).  Also bounds the
    /// peak search: the response may drift by up to this much from `f0`.
    ///
    /// Default: `0.5`.
    pub signal_half_width: f64,

    /// Noise bins averaged on each side of a frequency.  `None` derives
    /// `3 × half-width bins` from the frequency resolution.
    pub noise_n_neighbor_freqs: Option<usize>,

    /// Bins skipped on each side before the noise bins start.  `None`
    /// derives `half-width bins`.
    pub noise_skip_neighbor_freqs: Option<usize>,

    /// Epochs with a peak-to-peak amplitude at or above this value on any
    /// channel are dropped before the PSD.  `None` disables the check.
    ///
    /// Default: `Some(1000.0)` (1 mV in µV).
    pub epoch_reject_ptp: Option<f64>,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fmin: 0.0,
            fmax: 100.0,
            target_freq: 40.0,
            signal_half_width: 0.5,
            noise_n_neighbor_freqs: None,
            noise_skip_neighbor_freqs: None,
            epoch_reject_ptp: Some(1000.0),
        }
    }
}

impl SpectrumConfig {
    /// Number of bins spanning `signal_half_width` at `resolution` Hz/bin.
    pub fn half_width_bins(&self, resolution: f64) -> usize {
        (self.signal_half_width / resolution).round() as usize
    }

    /// `(noise_n_neighbor_freqs, noise_skip_neighbor_freqs)` at `resolution`.
    pub fn kernel_widths(&self, resolution: f64) -> (usize, usize) {
        let half = self.half_width_bins(resolution);
        (
            self.noise_n_neighbor_freqs.unwrap_or(3 * half),
            self.noise_skip_neighbor_freqs.unwrap_or(half),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fmin >= 0.0 && self.fmax > self.fmin) {
            return Err(invalid(format!("bad PSD band [{}, {}]", self.fmin, self.fmax)));
        }
        if !(self.target_freq > self.fmin && self.target_freq < self.fmax) {
            return Err(invalid("target_freq must lie inside the PSD band"));
        }
        if !(self.signal_half_width >= 0.0) {
            return Err(invalid("signal_half_width must be >= 0"));
        }
        if self.noise_n_neighbor_freqs == Some(0) {
            return Err(invalid("noise_n_neighbor_freqs must be > 0"));
        }
        Ok(())
    }
}

/// Permutation statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermutationConfig {
    /// Shuffles per PermutationSNR run.
    pub num_loops: usize,

    /// Label swaps per between-condition test.
    pub condition_loops: usize,

    /// Run-level seed; every work unit derives its own seed from it.
    pub seed: u64,
}

impl Default for PermutationConfig {
    fn default() -> Self {
        Self { num_loops: 100, condition_loops: 1000, seed: 1 }
    }
}

impl PermutationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_loops < 2 || self.condition_loops < 2 {
            return Err(invalid("permutation loop counts must be >= 2"));
        }
        Ok(())
    }
}

/// One stimulator artifact relative to a trigger: samples
/// `[t + offset, t + offset + length]` are replaced by a straight line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactWindow {
    pub offset: i64,
    pub length: usize,
}

/// Flicker-artifact interpolation before segment averaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Default: `false`.
    pub enabled: bool,

    /// Default: LED-on at −1 and LED-off at +11, 4 samples each (1 kHz).
    pub windows: Vec<ArtifactWindow>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            windows: vec![ArtifactWindow { offset: -1, length: 4 }, ArtifactWindow { offset: 11, length: 4 }],
        }
    }
}

impl ArtifactConfig {
    pub fn validate(&self) -> Result<()> {
        if self.windows.iter().any(|w| w.length == 0) {
            return Err(invalid("artifact window length must be > 0"));
        }
        Ok(())
    }
}

/// Trigger-locked FFT analyses on the ROI channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FftConfig {
    /// Length of the non-overlapping segments whose amplitude spectra are
    /// averaged (induced FFT), in seconds.
    ///
    /// Default: `10.0` (0.1 Hz resolution).
    pub induced_segment_dur: f64,

    /// Length of the segments averaged in the time domain before the
    /// transform (evoked FFT), in seconds.
    ///
    /// Default: `1.0`.
    pub evoked_segment_dur: f64,

    /// Width of the signal band on each side of `f0` and of each flanking
    /// noise band, in Hz.
    ///
    /// Default: `1.0` (signal 39–41 Hz, noise 38–39 and 41–42 Hz).
    pub band_width: f64,
}

impl Default for FftConfig {
    fn default() -> Self {
        Self { induced_segment_dur: 10.0, evoked_segment_dur: 1.0, band_width: 1.0 }
    }
}

impl FftConfig {
    /// `(induced, evoked)` segment lengths in samples.
    pub fn segment_samples(&self, sfreq: f64) -> (usize, usize) {
        (
            (self.induced_segment_dur * sfreq).round() as usize,
            (self.evoked_segment_dur * sfreq).round() as usize,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.induced_segment_dur > 0.0 && self.evoked_segment_dur > 0.0) {
            return Err(invalid("FFT segment durations must be > 0"));
        }
        if !(self.band_width > 0.0) {
            return Err(invalid("band_width must be > 0"));
        }
        Ok(())
    }
}

/// Every tunable of one analysis run.
///
/// ```
/// use ssvep::AnalysisConfig;
///
/// let cfg = AnalysisConfig::for_sample_rate(5000.0);
/// assert_eq!(cfg.segment.length, 125);
/// assert_eq!(cfg.trigger.nominal_period, 5000);
/// cfg.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub trigger: TriggerConfig,
    pub staging: StagingConfig,
    pub segment: SegmentConfig,
    pub spectrum: SpectrumConfig,
    pub permutation: PermutationConfig,
    pub artifact: ArtifactConfig,
    pub fft: FftConfig,
}

impl AnalysisConfig {
    /// Defaults with every sample count rescaled from 1 kHz to `sfreq`.
    pub fn for_sample_rate(sfreq: f64) -> Self {
        let scale = sfreq / 1000.0;
        let d = SegmentConfig::default();
        let a = ArtifactConfig::default();
        Self {
            trigger: TriggerConfig::for_sample_rate(sfreq),
            segment: SegmentConfig {
                length: ((d.length as f64) * scale).round() as usize,
                ..d
            },
            artifact: ArtifactConfig {
                windows: a
                    .windows
                    .iter()
                    .map(|w| ArtifactWindow {
                        offset: ((w.offset as f64) * scale).round() as i64,
                        length: ((w.length as f64) * scale).round().max(1.0) as usize,
                    })
                    .collect(),
                ..a
            },
            ..Self::default()
        }
    }

    /// Reject structurally invalid settings before any data is touched.
    pub fn validate(&self) -> Result<()> {
        self.trigger.validate()?;
        self.staging.validate()?;
        self.segment.validate()?;
        self.spectrum.validate()?;
        self.permutation.validate()?;
        self.artifact.validate()?;
        self.fft.validate()
    }
}

fn invalid(msg: impl Into<String>) -> SsvepError {
    SsvepError::InvalidConfig(msg.into())
}
