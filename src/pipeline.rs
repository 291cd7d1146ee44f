//! Per-stage batch driver.
//!
//! ```text
//! recording [C, T] ─┬─ detect_triggers ─ TriggerReport
//!                   │
//! hypnogram ── confident ── clip / exclude ── align ── StageTriggers
//!                                                   │
//!   for each of W, N1, N2, N3, REM:                 ▼
//!     ROI mean ── (artifact interpolation) ── SegmentAverager ── PermutationSNR
//!                                      │                   └─ split-half r
//!                                      └─ induced / evoked FFT
//!     good chans ── stimulated epochs ── p2p rejection ── SpectralAnalyzer
//! ```
//!
//! Data conditions ([`SsvepError::is_local`]) never abort the run: the
//! affected unit gets NaN scalars, NaN arrays of the normal size and the
//! diagnostic counts.  Anything else is returned as `Err` immediately.
use std::fmt;
use std::ops::Range;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::artifact::interpolate_flicker_artifacts;
use crate::channels::{find_channel, good_channels, roi_average};
use crate::condition::{ConditionResult, ConditionTest, TrialStatistic};
use crate::config::AnalysisConfig;
use crate::epoch::{epochs_at, reject_epochs};
use crate::error::{Result, SsvepError};
use crate::fft::{evoked_fft, induced_fft, EvokedFft, InducedFft};
use crate::permutation::{derive_seed, permutation_snr, PermutationResult};
use crate::spectrum::{SpectralAnalyzer, SpectralPeak, SpectrumResult};
use crate::ssvep::{split_half_correlation, SegmentAverager};
use crate::stage::{clip_triggers, exclude_window, Hypnogram, Stage};
use crate::trigger::{detect_amplitude_triggers, detect_edge_triggers, TriggerReport};

/// Where the flicker onsets come from.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSource {
    /// Rising edges of `trigger − reference`.
    Edge { trigger: String, reference: String },
    /// Absolute threshold on one channel.
    Amplitude { channel: String },
}

/// Run the detector named by `source` on rows of `data`.
pub fn detect_triggers(
    data: ArrayView2<f64>,
    ch_names: &[String],
    source: &TriggerSource,
    cfg: &AnalysisConfig,
) -> Result<TriggerReport> {
    match source {
        TriggerSource::Edge { trigger, reference } => {
            let t = find_channel(ch_names, trigger)?;
            let r = find_channel(ch_names, reference)?;
            detect_edge_triggers(data.row(t), data.row(r), &cfg.trigger)
        }
        TriggerSource::Amplitude { channel } => {
            let c = find_channel(ch_names, channel)?;
            detect_amplitude_triggers(data.row(c), &cfg.trigger)
        }
    }
}

/// One condition's recording and channel selection.
#[derive(Debug, Clone)]
pub struct Session<'a> {
    /// Condition label, part of every derived seed (e.g. `"flicker"`).
    pub condition: &'a str,
    /// `[C, T]` samples.
    pub data: ArrayView2<'a, f64>,
    pub ch_names: &'a [String],
    pub sfreq: f64,
    /// Channels averaged for the time-domain response; empty = all.
    pub roi: &'a [String],
    /// Channels used for the spectrum; empty = all.
    pub psd_channels: &'a [String],
    pub bad_channels: &'a [String],
    /// Sample range removed from analysis (e.g. a disturbed period).
    pub exclude: Option<Range<usize>>,
}

/// Time-domain result of one stage; NaN-filled on local failure.
#[derive(Debug, Clone, PartialEq)]
pub struct SsvepOutcome {
    pub waveform: Array1<f64>,
    pub sem: Array1<f64>,
    pub amplitude: f64,
    pub n_accepted: usize,
    pub n_rejected: usize,
    pub n_out_of_bounds: usize,
    pub permutation: PermutationResult,
    /// Correlation between the averages of two random halves of the
    /// accepted segments; NaN with fewer than two.
    pub split_half: f64,
    /// Accepted segments `[n_accepted, L]`; zero rows on failure.
    pub segments: Array2<f64>,
    pub failure: Option<SsvepError>,
}

impl SsvepOutcome {
    fn failed(len: usize, err: SsvepError) -> Self {
        let (n_rejected, n_out_of_bounds) = match err {
            SsvepError::AllSegmentsRejected { rejected, out_of_bounds } => (rejected, out_of_bounds),
            _ => (0, 0),
        };
        Self {
            waveform: Array1::from_elem(len, f64::NAN),
            sem: Array1::from_elem(len, f64::NAN),
            amplitude: f64::NAN,
            n_accepted: 0,
            n_rejected,
            n_out_of_bounds,
            permutation: PermutationResult::missing(),
            split_half: f64::NAN,
            segments: Array2::zeros((0, len)),
            failure: Some(err),
        }
    }
}

/// Spectral result of one stage; NaN-filled on local failure.
#[derive(Debug, Clone, PartialEq)]
pub struct PsdOutcome {
    pub spectrum: SpectrumResult,
    pub peak: SpectralPeak,
    pub target: SpectralPeak,
    /// Stimulated epochs of this stage before any rejection.
    pub n_epochs_selected: usize,
    pub n_epochs_rejected: usize,
    pub n_epochs_out_of_bounds: usize,
    /// Per-epoch, channel-averaged PSD `[E, bins]`; zero rows on failure.
    pub trials: Array2<f64>,
    pub failure: Option<SsvepError>,
}

/// Trigger-locked amplitude spectra of one stage's ROI series.
#[derive(Debug, Clone, PartialEq)]
pub struct FftOutcome {
    pub induced: InducedFft,
    pub evoked: EvokedFft,
    /// First local failure of the two analyses, if any.
    pub failure: Option<SsvepError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    pub n_triggers: usize,
    pub ssvep: SsvepOutcome,
    pub psd: PsdOutcome,
    pub fft: FftOutcome,
}

/// Everything computed for one condition.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub condition: String,
    pub sfreq: f64,
    /// Triggers outside the scored span or inside the exclusion range.
    pub n_clipped: usize,
    /// Triggers inside low-confidence epochs.
    pub n_unassigned: usize,
    /// Triggers inside epochs scored as excluded.
    pub n_excluded: usize,
    /// One entry per [`Stage::SCORED`] stage, in order.
    pub stages: Vec<StageReport>,
}

impl SessionReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Time-domain and spectral analysis of every stage of one session.
pub fn analyze_stages(
    session: &Session<'_>,
    triggers: &[usize],
    hypnogram: &Hypnogram,
    cfg: &AnalysisConfig,
) -> Result<SessionReport> {
    cfg.validate()?;
    let n_t = session.data.ncols();
    let span = hypnogram.span().unwrap_or(0..0);
    let mut kept = clip_triggers(triggers, span.start..span.end.min(n_t));
    if let Some(range) = &session.exclude {
        kept = exclude_window(&kept, range.clone());
    }
    let n_clipped = triggers.len() - kept.len();
    let hyp = hypnogram.confident(cfg.staging.min_confidence);
    let by_stage = hyp.align(&kept);

    let corrected;
    let data: ArrayView2<'_, f64> = if cfg.artifact.enabled {
        let (d, skipped) = interpolate_flicker_artifacts(session.data, &kept, &cfg.artifact.windows)?;
        if skipped > 0 {
            warn!(skipped, "artifact windows outside the recording");
        }
        corrected = d;
        corrected.view()
    } else {
        session.data.reborrow()
    };

    let roi = roi_average(data, session.ch_names, session.roi, session.bad_channels)?;
    let psd_idx = good_channels(session.ch_names, session.psd_channels, session.bad_channels)?;
    let psd_data = data.select(Axis(0), &psd_idx);

    let averager = SegmentAverager::new(cfg.segment.clone())?;
    let analyzer = SpectralAnalyzer::new(cfg.spectrum.clone())?;
    let epoch_len = hyp.epoch_len();
    let (induced_len, evoked_len) = cfg.fft.segment_samples(session.sfreq);

    let mut stages = Vec::with_capacity(Stage::SCORED.len());
    for stage in Stage::SCORED {
        let stage_triggers = by_stage.get(stage);
        let unit = format!("{}/{}", session.condition, stage);

        let ssvep = match averager.average(roi.view(), stage_triggers).and_then(|ev| {
            let mut rng = StdRng::seed_from_u64(derive_seed(cfg.permutation.seed, &format!("{unit}/ssvep")));
            let perm = permutation_snr(ev.segments.view(), ev.amplitude, cfg.permutation.num_loops, &mut rng)?;
            let mut rng = StdRng::seed_from_u64(derive_seed(cfg.permutation.seed, &format!("{unit}/split")));
            let split_half = split_half_correlation(ev.segments.view(), &mut rng).unwrap_or(f64::NAN);
            Ok(SsvepOutcome {
                waveform: ev.waveform,
                sem: ev.sem,
                amplitude: ev.amplitude,
                n_accepted: ev.n_accepted,
                n_rejected: ev.n_rejected,
                n_out_of_bounds: ev.n_out_of_bounds,
                permutation: perm,
                split_half,
                segments: ev.segments,
                failure: None,
            })
        }) {
            Ok(o) => o,
            Err(e) if e.is_local() => {
                warn!(unit = %unit, triggers = stage_triggers.len(), error = %e, "time-domain analysis skipped");
                SsvepOutcome::failed(cfg.segment.length, e)
            }
            Err(e) => return Err(e),
        };

        let mut fft_failure = None;
        let induced = match induced_fft(
            roi.view(),
            stage_triggers,
            induced_len,
            session.sfreq,
            cfg.spectrum.target_freq,
            cfg.fft.band_width,
        ) {
            Ok(f) => f,
            Err(e) if e.is_local() => {
                warn!(unit = %unit, error = %e, "induced spectrum skipped");
                fft_failure = Some(e);
                InducedFft::missing(induced_len, session.sfreq)
            }
            Err(e) => return Err(e),
        };
        let evoked = match evoked_fft(roi.view(), stage_triggers, evoked_len, session.sfreq) {
            Ok(f) => f,
            Err(e) if e.is_local() => {
                warn!(unit = %unit, error = %e, "evoked spectrum skipped");
                if fft_failure.is_none() {
                    fft_failure = Some(e);
                }
                EvokedFft::missing(evoked_len, session.sfreq)
            }
            Err(e) => return Err(e),
        };
        let fft = FftOutcome { induced, evoked, failure: fft_failure };

        // Counted over all kept triggers, not only this stage's.
        let starts = hyp.stimulated_epochs(stage, &kept, cfg.staging.min_triggers_per_epoch);
        let n_epochs_selected = starts.len();
        let windows = epochs_at(psd_data.view(), &starts, epoch_len);
        let n_epochs_out_of_bounds = windows.out_of_bounds;
        let (windows, n_epochs_rejected) = match cfg.spectrum.epoch_reject_ptp {
            Some(thr) => reject_epochs(windows, thr),
            None => (windows, 0),
        };
        let spectral = analyzer.analyze(windows.data.view(), session.sfreq).and_then(|a| {
            let (_, trials) = analyzer.trial_spectra(windows.data.view(), session.sfreq)?;
            Ok((a, trials))
        });
        let psd = match spectral {
            Ok((a, trials)) => PsdOutcome {
                spectrum: a.spectrum,
                peak: a.peak,
                target: a.target,
                n_epochs_selected,
                n_epochs_rejected,
                n_epochs_out_of_bounds,
                trials,
                failure: None,
            },
            Err(e) if e.is_local() => {
                warn!(unit = %unit, epochs = n_epochs_selected, rejected = n_epochs_rejected, error = %e, "spectral analysis skipped");
                let (freqs, edge) = analyzer.layout(epoch_len, session.sfreq)?;
                let n_bins = freqs.len();
                PsdOutcome {
                    spectrum: SpectrumResult::missing(freqs, edge),
                    peak: SpectralPeak::missing(),
                    target: SpectralPeak::missing(),
                    n_epochs_selected,
                    n_epochs_rejected,
                    n_epochs_out_of_bounds,
                    trials: Array2::zeros((0, n_bins)),
                    failure: Some(e),
                }
            }
            Err(e) => return Err(e),
        };

        info!(
            unit = %unit,
            triggers = stage_triggers.len(),
            accepted = ssvep.n_accepted,
            amplitude = ssvep.amplitude,
            snr = ssvep.permutation.snr,
            p = ssvep.permutation.p,
            epochs = psd.spectrum.n_epochs,
            peak_snr = psd.peak.snr,
            fft_snr = fft.induced.band.snr,
            "stage done"
        );
        stages.push(StageReport { stage, n_triggers: stage_triggers.len(), ssvep, psd, fft });
    }

    Ok(SessionReport {
        condition: session.condition.to_string(),
        sfreq: session.sfreq,
        n_clipped,
        n_unassigned: by_stage.unassigned.len(),
        n_excluded: by_stage.excluded.len(),
        stages,
    })
}

/// Which per-trial matrices a condition contrast uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contrast {
    /// Accepted time-domain segments, peak-to-trough of the grand average.
    Ssvep,
    /// Per-epoch spectra at the bin nearest the stimulation frequency.
    Psd,
    /// Per-segment induced amplitude spectra at the bin nearest the
    /// stimulation frequency.
    InducedFft,
}

impl fmt::Display for Contrast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Contrast::Ssvep => "ssvep",
            Contrast::Psd => "psd",
            Contrast::InducedFft => "fft",
        })
    }
}

/// Permutation test of `a` against `b` for one stage.
///
/// A stage missing from either report, or without trials, yields
/// [`ConditionResult::missing`]; mismatched trial shapes are an error.
pub fn compare_conditions(
    a: &SessionReport,
    b: &SessionReport,
    stage: Stage,
    contrast: Contrast,
    cfg: &AnalysisConfig,
) -> Result<ConditionResult> {
    let (Some(sa), Some(sb)) = (a.stage(stage), b.stage(stage)) else {
        warn!(stage = %stage, "stage missing from a report");
        return Ok(ConditionResult::missing());
    };
    let (ma, mb, statistic) = match contrast {
        Contrast::Ssvep => (sa.ssvep.segments.view(), sb.ssvep.segments.view(), TrialStatistic::PeakToTrough),
        Contrast::Psd => {
            let Some(bin) = sa.psd.spectrum.nearest_bin(cfg.spectrum.target_freq) else {
                return Ok(ConditionResult::missing());
            };
            (sa.psd.trials.view(), sb.psd.trials.view(), TrialStatistic::Bin(bin))
        }
        Contrast::InducedFft => {
            let Some(bin) = nearest(&sa.fft.induced.freqs, cfg.spectrum.target_freq) else {
                return Ok(ConditionResult::missing());
            };
            (sa.fft.induced.segments.view(), sb.fft.induced.segments.view(), TrialStatistic::Bin(bin))
        }
    };
    let unit = format!("{}-vs-{}/{}/{}", a.condition, b.condition, stage, contrast);
    let mut rng = StdRng::seed_from_u64(derive_seed(cfg.permutation.seed, &unit));
    match ConditionTest::new(statistic, cfg.permutation.condition_loops).run(ma, mb, &mut rng) {
        Ok(r) => Ok(r),
        Err(e) if e.is_local() => {
            warn!(unit = %unit, error = %e, "condition contrast skipped");
            Ok(ConditionResult::missing())
        }
        Err(e) => Err(e),
    }
}

fn nearest(freqs: &Array1<f64>, f0: f64) -> Option<usize> {
    freqs
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - f0).abs().total_cmp(&(*b - f0).abs()))
        .map(|(i, _)| i)
}
