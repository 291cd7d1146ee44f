/// Whole-session runs on a synthetic two-hour-style recording (four 30 s
/// epochs at 1 kHz: W, N2, N2, excluded).
mod common;

use ndarray::{Array2, ArrayView2};
use ssvep::{
    analyze_stages, compare_conditions, detect_triggers, AnalysisConfig, Contrast, Hypnogram, Session,
    SessionReport, SsvepError, Stage, TriggerSource,
};

use common::{names, noise, onsets, pulse_train, sinusoid};

const SFREQ: f64 = 1000.0;
const EPOCH: usize = 30_000;
const N: usize = 4 * EPOCH;

fn channel_names() -> Vec<String> {
    names(&["O1", "Oz", "O2", "Photo", "Ref"])
}

/// Occipital channels carry a phase-locked 40 Hz response of `amp` µV.
fn recording(amp: f64, seed: u64) -> Array2<f64> {
    let mut data = Array2::<f64>::zeros((5, N));
    let sine = sinusoid(N, 40.0, SFREQ, amp);
    for c in 0..3 {
        data.row_mut(c).assign(&(&sine + &noise(N, 10.0, seed * 10 + c as u64)));
    }
    data.row_mut(3).assign(&pulse_train(N, &onsets(100, 1000, N), 500, 1000.0));
    data
}

fn hypnogram() -> Hypnogram {
    Hypnogram::from_stages(&[Stage::Wake, Stage::N2, Stage::N2, Stage::Excluded], EPOCH).unwrap()
}

fn edge_source() -> TriggerSource {
    TriggerSource::Edge { trigger: "Photo".into(), reference: "Ref".into() }
}

struct Chans {
    names: Vec<String>,
    roi: Vec<String>,
    psd: Vec<String>,
    bad: Vec<String>,
}

impl Chans {
    fn new() -> Self {
        Self { names: channel_names(), roi: names(&["O1", "Oz", "O2"]), psd: names(&["O1", "Oz", "O2"]), bad: vec![] }
    }

    fn session<'a>(&'a self, condition: &'a str, data: ArrayView2<'a, f64>) -> Session<'a> {
        Session {
            condition,
            data,
            ch_names: &self.names,
            sfreq: SFREQ,
            roi: &self.roi,
            psd_channels: &self.psd,
            bad_channels: &self.bad,
            exclude: None,
        }
    }
}

fn run(condition: &str, amp: f64, seed: u64, cfg: &AnalysisConfig) -> SessionReport {
    let data = recording(amp, seed);
    let chans = Chans::new();
    let triggers = detect_triggers(data.view(), &chans.names, &edge_source(), cfg).unwrap();
    analyze_stages(&chans.session(condition, data.view()), &triggers.triggers, &hypnogram(), cfg).unwrap()
}

#[test]
fn triggers_from_the_photodiode_channel() {
    let data = recording(0.0, 1);
    let cfg = AnalysisConfig::default();
    let rep = detect_triggers(data.view(), &channel_names(), &edge_source(), &cfg).unwrap();
    assert_eq!(rep.base_triggers.len(), 120);
    assert_eq!(rep.n_cycles, 119);
    assert_eq!(rep.triggers.len(), 119 * 40);

    let missing = TriggerSource::Edge { trigger: "Photo".into(), reference: "Status".into() };
    let err = detect_triggers(data.view(), &channel_names(), &missing, &cfg).unwrap_err();
    assert_eq!(err, SsvepError::ChannelNotFound("Status".into()));
}

#[test]
fn every_scored_stage_gets_a_report() {
    let report = run("flicker", 5.0, 1, &AnalysisConfig::default());

    assert_eq!(report.stages.len(), 5);
    assert!(report.n_excluded > 0);
    assert_eq!(report.n_unassigned, 0);

    for stage in [Stage::Wake, Stage::N2] {
        let s = report.stage(stage).unwrap();
        assert!(s.n_triggers > 1000);
        assert!(s.ssvep.failure.is_none());
        assert!(s.ssvep.permutation.snr > 1.0, "{stage} snr {}", s.ssvep.permutation.snr);
        assert!(s.ssvep.permutation.p < 0.05, "{stage} p {}", s.ssvep.permutation.p);
        assert!((s.psd.peak.freq - 40.0).abs() <= 0.5 + 1e-9, "{stage} peak {}", s.psd.peak.freq);
        assert!(s.psd.peak.snr > 5.0);
    }
    assert_eq!(report.stage(Stage::Wake).unwrap().psd.spectrum.n_epochs, 1);
    assert_eq!(report.stage(Stage::N2).unwrap().psd.spectrum.n_epochs, 2);
    assert_eq!(report.stage(Stage::N2).unwrap().psd.trials.nrows(), 2);
}

#[test]
fn unstimulated_stages_are_nan_of_normal_size() {
    let report = run("flicker", 5.0, 2, &AnalysisConfig::default());
    let n_bins = report.stage(Stage::Wake).unwrap().psd.spectrum.n_bins();
    assert_eq!(n_bins, 3001);

    for stage in [Stage::N1, Stage::N3, Stage::Rem] {
        let s = report.stage(stage).unwrap();
        assert_eq!(s.n_triggers, 0);
        assert!(matches!(s.ssvep.failure, Some(SsvepError::InsufficientTriggers { .. })));
        assert_eq!(s.ssvep.waveform.len(), 25);
        assert!(s.ssvep.waveform.iter().all(|v| v.is_nan()));
        assert!(s.ssvep.permutation.p.is_nan());
        assert_eq!(s.psd.spectrum.n_bins(), n_bins);
        assert!(s.psd.spectrum.snr_mean.iter().all(|v| v.is_nan()));
        assert!(s.psd.peak.freq.is_nan());
        assert_eq!(s.psd.n_epochs_selected, 0);
    }
}

#[test]
fn exclusion_window_removes_triggers() {
    let data = recording(5.0, 3);
    let chans = Chans::new();
    let cfg = AnalysisConfig::default();
    let triggers = detect_triggers(data.view(), &chans.names, &edge_source(), &cfg).unwrap();

    let full = analyze_stages(&chans.session("flicker", data.view()), &triggers.triggers, &hypnogram(), &cfg).unwrap();
    let mut session = chans.session("flicker", data.view());
    session.exclude = Some(EPOCH..2 * EPOCH);
    let cut = analyze_stages(&session, &triggers.triggers, &hypnogram(), &cfg).unwrap();

    assert!(cut.n_clipped > full.n_clipped);
    let n2_full = full.stage(Stage::N2).unwrap();
    let n2_cut = cut.stage(Stage::N2).unwrap();
    assert!(n2_cut.n_triggers < n2_full.n_triggers);
    assert_eq!(n2_cut.psd.n_epochs_selected, 1);
    // Wake is untouched.
    assert_eq!(cut.stage(Stage::Wake).unwrap().n_triggers, full.stage(Stage::Wake).unwrap().n_triggers);
}

#[test]
fn artifact_interpolation_keeps_the_response() {
    let mut cfg = AnalysisConfig::default();
    cfg.artifact.enabled = true;
    let report = run("flicker", 5.0, 4, &cfg);
    let w = report.stage(Stage::Wake).unwrap();
    assert!(w.ssvep.failure.is_none());
    assert!(w.ssvep.amplitude.is_finite());
    assert!(w.ssvep.permutation.p < 0.05);
}

#[test]
fn flicker_against_sham() {
    let cfg = AnalysisConfig::default();
    let flicker = run("flicker", 5.0, 5, &cfg);
    let sham = run("sham", 0.0, 6, &cfg);

    let wake = compare_conditions(&flicker, &sham, Stage::Wake, Contrast::Ssvep, &cfg).unwrap();
    assert!(wake.true_difference > 0.0);
    assert!(wake.p < 0.05, "p {}", wake.p);

    let n2 = compare_conditions(&flicker, &sham, Stage::N2, Contrast::Psd, &cfg).unwrap();
    assert_eq!(n2.n_trials, 2);
    assert!(n2.true_difference > 0.0);

    // No trials in REM: reported, not raised.
    let rem = compare_conditions(&flicker, &sham, Stage::Rem, Contrast::Ssvep, &cfg).unwrap();
    assert!(rem.p.is_nan());
    assert_eq!(rem.n_trials, 0);
}

#[test]
fn results_are_reproducible() {
    let cfg = AnalysisConfig::default();
    let a = run("flicker", 5.0, 7, &cfg);
    let b = run("flicker", 5.0, 7, &cfg);
    let (wa, wb) = (a.stage(Stage::Wake).unwrap(), b.stage(Stage::Wake).unwrap());
    assert_eq!(wa.ssvep.permutation.z.to_bits(), wb.ssvep.permutation.z.to_bits());
    assert_eq!(wa.psd.peak, wb.psd.peak);
}

#[test]
fn channel_selection_errors_abort() {
    let data = recording(5.0, 8);
    let cfg = AnalysisConfig::default();
    let triggers = detect_triggers(data.view(), &channel_names(), &edge_source(), &cfg).unwrap();

    let mut chans = Chans::new();
    chans.roi = names(&["O1", "Pz"]);
    let err = analyze_stages(&chans.session("x", data.view()), &triggers.triggers, &hypnogram(), &cfg).unwrap_err();
    assert_eq!(err, SsvepError::ChannelNotFound("Pz".into()));

    let mut chans = Chans::new();
    chans.bad = names(&["o1", "OZ", "O2"]);
    let err = analyze_stages(&chans.session("x", data.view()), &triggers.triggers, &hypnogram(), &cfg).unwrap_err();
    assert_eq!(err, SsvepError::NoGoodChannels);
}

#[test]
fn report_tensors_on_disk() {
    let cfg = AnalysisConfig::default();
    let data = recording(5.0, 9);
    let chans = Chans::new();
    let triggers = detect_triggers(data.view(), &chans.names, &edge_source(), &cfg).unwrap();
    let report = analyze_stages(&chans.session("flicker", data.view()), &triggers.triggers, &hypnogram(), &cfg).unwrap();

    let path = std::env::temp_dir().join(format!("ssvep-report-{}.safetensors", std::process::id()));
    ssvep::io::write_report(&[(&report, Some(&triggers))], &path).unwrap();
    let tensors = ssvep::io::read_tensors(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(tensors["flicker_freqs"].0, vec![3001]);
    assert_eq!(tensors["flicker_fft_freqs"].0, vec![5001]);
    assert_eq!(tensors["flicker_trigger_n_cycles"].1, vec![119.0]);
    assert!(tensors["flicker_W_ssvep_p"].1[0] < 0.05);
    assert!(tensors["flicker_W_fft_snr"].1[0] > 1.0);
    let (shape, rem) = &tensors["flicker_REM_ssvep_waveform"];
    assert_eq!(shape, &vec![25]);
    assert!(rem.iter().all(|v| v.is_nan()));
    assert!(tensors.contains_key("flicker_N2_snr_mean"));
}

#[test]
fn both_conditions_land_in_one_report() {
    let cfg = AnalysisConfig::default();
    let chans = Chans::new();
    let flicker_data = recording(5.0, 10);
    let sham_data = recording(0.0, 11);
    let tf = detect_triggers(flicker_data.view(), &chans.names, &edge_source(), &cfg).unwrap();
    let ts = detect_triggers(sham_data.view(), &chans.names, &edge_source(), &cfg).unwrap();
    let flicker =
        analyze_stages(&chans.session("flicker", flicker_data.view()), &tf.triggers, &hypnogram(), &cfg).unwrap();
    let sham = analyze_stages(&chans.session("sham", sham_data.view()), &ts.triggers, &hypnogram(), &cfg).unwrap();

    let mut w = ssvep::io::StWriter::new();
    ssvep::io::add_report(&mut w, &flicker, Some(&tf));
    ssvep::io::add_report(&mut w, &sham, Some(&ts));
    let r = compare_conditions(&flicker, &sham, Stage::Wake, Contrast::Ssvep, &cfg).unwrap();
    ssvep::io::add_contrast(&mut w, "flicker", "sham", Stage::Wake, Contrast::Ssvep, &r);
    let path = std::env::temp_dir().join(format!("ssvep-two-{}.safetensors", std::process::id()));
    w.write(&path).unwrap();
    let tensors = ssvep::io::read_tensors(&path).unwrap();
    std::fs::remove_file(&path).ok();

    for key in ["W_ssvep_amplitude", "N2_psd_peak_snr", "trigger_n_cycles", "W_fft_p"] {
        assert!(tensors.contains_key(&format!("flicker_{key}")), "flicker_{key}");
        assert!(tensors.contains_key(&format!("sham_{key}")), "sham_{key}");
    }
    assert!(tensors["flicker_W_ssvep_amplitude"].1[0] > tensors["sham_W_ssvep_amplitude"].1[0]);
    assert!(tensors.contains_key("flicker_vs_sham_W_ssvep_p"));

    // The same label twice would overwrite one condition with the other.
    let path = std::env::temp_dir().join(format!("ssvep-dup-{}.safetensors", std::process::id()));
    assert!(ssvep::io::write_report(&[(&flicker, None), (&flicker, None)], &path).is_err());
}

#[test]
fn induced_and_evoked_spectra_per_stage() {
    let report = run("flicker", 5.0, 12, &AnalysisConfig::default());
    let w = report.stage(Stage::Wake).unwrap();
    assert!(w.fft.failure.is_none());
    // 10 s windows from the wake triggers: 100, then 10125, then 20150.
    assert_eq!(w.fft.induced.n_segments, 3);
    assert_eq!(w.fft.induced.segments.dim(), (3, 5001));
    assert!(w.fft.induced.band.snr > 1.0, "snr {}", w.fft.induced.band.snr);
    assert!(w.fft.induced.band.p < 0.05);
    let bin40 = w.fft.evoked.freqs.iter().position(|&f| f == 40.0).unwrap();
    let evoked_peak = w.fft.evoked.spectrum.iter().enumerate().skip(2).fold(0, |best, (k, &v)| {
        if v > w.fft.evoked.spectrum[best] { k } else { best }
    });
    assert_eq!(evoked_peak, bin40);
    assert!(w.ssvep.split_half > 0.5, "split-half r {}", w.ssvep.split_half);

    let n1 = report.stage(Stage::N1).unwrap();
    assert!(matches!(n1.fft.failure, Some(SsvepError::InsufficientTriggers { .. })));
    assert!(n1.fft.induced.band.snr.is_nan());
    assert_eq!(n1.fft.induced.spectrum.len(), 5001);
    assert!(n1.ssvep.split_half.is_nan());
}

#[test]
fn induced_fft_contrast_between_conditions() {
    let cfg = AnalysisConfig::default();
    let flicker = run("flicker", 5.0, 13, &cfg);
    let sham = run("sham", 0.0, 14, &cfg);
    let r = compare_conditions(&flicker, &sham, Stage::N2, Contrast::InducedFft, &cfg).unwrap();
    assert_eq!(r.n_trials, flicker.stage(Stage::N2).unwrap().fft.induced.n_segments);
    assert!(r.true_difference > 0.0);
}

#[test]
fn stimulated_epochs_count_triggers_across_stage_boundaries() {
    // 999 triggers inside the N2 epoch plus one on the first sample of the
    // following wake epoch: the inclusive window still sees 1000.
    let data = recording(5.0, 15);
    let chans = Chans::new();
    let cfg = AnalysisConfig::default();
    let mut triggers: Vec<usize> = (0..999).map(|i| EPOCH + 30 * i).collect();
    triggers.push(2 * EPOCH);
    let hyp = Hypnogram::from_stages(&[Stage::Wake, Stage::N2, Stage::Wake, Stage::Excluded], EPOCH).unwrap();

    let report = analyze_stages(&chans.session("flicker", data.view()), &triggers, &hyp, &cfg).unwrap();
    let n2 = report.stage(Stage::N2).unwrap();
    assert_eq!(n2.n_triggers, 999);
    assert_eq!(n2.psd.n_epochs_selected, 1);
    assert_eq!(report.stage(Stage::Wake).unwrap().psd.n_epochs_selected, 0);
}
