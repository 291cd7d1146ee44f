//! # ssvep: steady-state flicker responses in EEG
//!
//! `ssvep` extracts the frequency-tagged response to a periodic visual
//! flicker from long, noisy recordings and tests whether it differs from
//! chance, separately per sleep/wake stage and per experimental condition.
//!
//! Everything runs offline on fully loaded `ndarray` arrays, single
//! threaded, with every random draw coming from an explicitly seeded
//! generator.
//!
//! ## Pipeline overview
//!
//! ```text
//! photodiode − reference
//!   │
//!   ├─ trigger::detect_edge_triggers     rising edges → 1 Hz base triggers
//!   │                                    → K sub-triggers per cycle + error rate
//!   ├─ stage::Hypnogram::align           triggers → W / N1 / N2 / N3 / REM
//!   │
//!   ├─ ssvep::SegmentAverager            [t, t + L) windows, p2p rejection,
//!   │     │                              grand average, baseline, ptp
//!   │     ├─ permutation::permutation_snr   within-segment shuffles → SNR, Z, p
//!   │     └─ ssvep::split_half_correlation  reliability of the average
//!   │
//!   ├─ fft::induced_fft / evoked_fft     10 s / 1 s segments → |FFT|, band SNR
//!   ├─ spectrum::SpectralAnalyzer        30 s epochs → PSD, SNR spectrum,
//!   │                                    peak near f0
//!   └─ condition::ConditionTest          paired label swaps → Z, p (A vs B)
//! ```
//!
//! [`pipeline::analyze_stages`] chains all of it per stage with the
//! local-failure policy: a stage without usable data reports NaN and its
//! diagnostic counts instead of aborting the run.
//!
//! ## Quick start
//!
//! ```no_run
//! use ssvep::{AnalysisConfig, Hypnogram, Stage, TriggerSource};
//! use ssvep::io::Recording;
//! use ssvep::pipeline::{analyze_stages, detect_triggers, Session};
//! use std::path::Path;
//!
//! let rec = Recording::load(Path::new("sub01_flicker.safetensors")).unwrap();
//! let cfg = AnalysisConfig::for_sample_rate(rec.sfreq);
//!
//! let source = TriggerSource::Edge { trigger: "Photo".into(), reference: "Ref".into() };
//! let trig = detect_triggers(rec.view(), &rec.ch_names, &source, &cfg).unwrap();
//! println!("{} triggers, {:.2}% timing errors", trig.triggers.len(), trig.error_rate_percent());
//!
//! let epoch_len = cfg.staging.epoch_samples(rec.sfreq);
//! let hyp = Hypnogram::from_stages(&[Stage::Wake, Stage::N2, Stage::N2], epoch_len).unwrap();
//!
//! let roi = vec!["O1".to_string(), "Oz".to_string(), "O2".to_string()];
//! let session = Session {
//!     condition: "flicker",
//!     data: rec.view(),
//!     ch_names: &rec.ch_names,
//!     sfreq: rec.sfreq,
//!     roi: &roi,
//!     psd_channels: &roi,
//!     bad_channels: &[],
//!     exclude: None,
//! };
//! let report = analyze_stages(&session, &trig.triggers, &hyp, &cfg).unwrap();
//! for s in &report.stages {
//!     println!("{}: ptp {:.3}, SNR {:.2}, p {:.4}", s.stage, s.ssvep.amplitude,
//!              s.ssvep.permutation.snr, s.ssvep.permutation.p);
//! }
//! ```
//!
//! ## Running individual steps
//!
//! ```no_run
//! use ssvep::{average_segments, permutation_snr, SegmentConfig};
//! use ndarray::Array1;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let channel: Array1<f64> = Array1::zeros(60_000);
//! let triggers: Vec<usize> = (0..2000).map(|i| 100 + i * 25).collect();
//!
//! let ev = average_segments(channel.view(), &triggers, &SegmentConfig::default()).unwrap();
//! let mut rng = StdRng::seed_from_u64(1);
//! let perm = permutation_snr(ev.segments.view(), ev.amplitude, 100, &mut rng).unwrap();
//! println!("SNR {:.2}  Z {:.2}  p {:.4}", perm.snr, perm.z, perm.p);
//! ```

pub mod artifact;
pub mod channels;
pub mod condition;
pub mod config;
pub mod epoch;
pub mod error;
pub mod fft;
pub mod io;
pub mod normalize;
pub mod permutation;
pub mod pipeline;
pub mod spectrum;
pub mod ssvep;
pub mod stage;
pub mod trigger;

// ── Crate-root re-exports ─────────────────────────────────────────────────
//
// Everything a downstream user is likely to need is available directly as
// `ssvep::Foo` without having to know the internal module layout.

// config
pub use config::{
    AnalysisConfig, ArtifactConfig, ArtifactWindow, FftConfig, PermutationConfig, SegmentConfig,
    SpectrumConfig, StagingConfig, TriggerConfig,
};

// error
pub use error::{Result, SsvepError};

// trigger
pub use trigger::{
    detect_amplitude_triggers, detect_edge_triggers, expand_cycles, first_difference, scan_rising_edges,
    trigger_error_rate, TriggerReport,
};

// stage
pub use stage::{clip_triggers, exclude_window, Hypnogram, ScoredEpoch, Stage, StageTriggers};

// channels
pub use channels::{difference, find_channel, good_channels, roi_average};

// epoch
pub use epoch::{epochs_at, reject_epochs, segments_at, Windows};

// ssvep
pub use ssvep::{
    average_segments, grand_average, split_half_correlation, standard_error, Evoked, SegmentAverager,
};

// fft
pub use fft::{
    evoked_fft, hann_symmetric, induced_fft, non_overlapping_onsets, AmplitudeSpectrum, BandSnr, EvokedFft,
    InducedFft,
};

// permutation
pub use permutation::{derive_seed, normal_sf, permutation_snr, PermutationResult};

// spectrum
pub use spectrum::{
    hamming_periodic, noise_kernel, snr_spectrum, Periodogram, SpectralAnalysis, SpectralAnalyzer, SpectralPeak,
    SpectrumBand, SpectrumResult,
};

// condition
pub use condition::{
    stack_trials, truncate_to_common, Alternative, ConditionResult, ConditionTest, TrialStatistic,
};

// normalize
pub use normalize::{baseline_correct_inplace, peak_to_trough, NullSummary};

// artifact
pub use artifact::interpolate_flicker_artifacts;

// pipeline
pub use pipeline::{
    analyze_stages, compare_conditions, detect_triggers, Contrast, FftOutcome, PsdOutcome, Session, SessionReport,
    SsvepOutcome, StageReport, TriggerSource,
};
