/// Trigger detection on synthetic photodiode recordings.
mod common;

use approx::assert_abs_diff_eq;
use ndarray::Array1;
use ssvep::{detect_edge_triggers, scan_rising_edges, trigger_error_rate, TriggerConfig};

use common::{noise, onsets, pulse_train};

const K: usize = 40;

#[test]
fn clean_pulse_train_end_to_end() {
    let n = 10_000;
    let on = onsets(100, 1000, n);
    assert_eq!(on.len(), 10);
    let trig = pulse_train(n, &on, 500, 1000.0);
    let reference = Array1::<f64>::zeros(n);

    let rep = detect_edge_triggers(trig.view(), reference.view(), &TriggerConfig::default()).unwrap();

    assert_eq!(rep.base_triggers, on);
    assert_eq!(rep.n_cycles, 9);
    assert_eq!(rep.triggers.len(), 9 * K);
    assert_eq!(rep.triggers[0], 100);
    assert_eq!(rep.triggers[K], 1100);
    assert_abs_diff_eq!(rep.error_rate, 0.0);
    assert!(rep.triggers.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn perturbed_spacing_raises_error_rate() {
    let n = 10_000;
    let mut on = onsets(100, 1000, n);
    on[5] += 1;
    let trig = pulse_train(n, &on, 500, 1000.0);
    let reference = Array1::<f64>::zeros(n);

    let rep = detect_edge_triggers(trig.view(), reference.view(), &TriggerConfig::default()).unwrap();

    // 1001 and 999 are inside the ±2 tolerance: all cycles kept.
    assert_eq!(rep.n_cycles, 9);
    assert!(rep.error_rate > 0.0);
    assert!(rep.error_rate_percent() < 1.0);
}

#[test]
fn shared_reference_noise_cancels() {
    let n = 10_000;
    let on = onsets(100, 1000, n);
    let shared = noise(n, 50.0, 11);
    let trig = &pulse_train(n, &on, 500, 1000.0) + &shared;

    let rep = detect_edge_triggers(trig.view(), shared.view(), &TriggerConfig::default()).unwrap();

    assert_eq!(rep.base_triggers, on);
    assert_eq!(rep.n_cycles, 9);
}

#[test]
fn inverted_wiring() {
    let n = 10_000;
    let on = onsets(100, 1000, n);
    let trig = pulse_train(n, &on, 500, -1000.0);
    let reference = Array1::<f64>::zeros(n);

    let plain = detect_edge_triggers(trig.view(), reference.view(), &TriggerConfig::default()).unwrap();
    // Rising edges of the flipped signal are the pulse ends.
    assert_eq!(plain.base_triggers[0], 600);

    let cfg = TriggerConfig { invert: true, ..TriggerConfig::default() };
    let flipped = detect_edge_triggers(trig.view(), reference.view(), &cfg).unwrap();
    assert_eq!(flipped.base_triggers, on);
}

#[test]
fn missing_pulse_drops_two_cycles() {
    let n = 10_000;
    let mut on = onsets(100, 1000, n);
    on.remove(4);
    let trig = pulse_train(n, &on, 500, 1000.0);
    let reference = Array1::<f64>::zeros(n);

    let rep = detect_edge_triggers(trig.view(), reference.view(), &TriggerConfig::default()).unwrap();

    // 3100 → 5100 is 2000 apart: that pair is rejected.
    assert_eq!(rep.base_triggers.len(), 9);
    assert_eq!(rep.n_cycles, 7);
    assert_eq!(rep.triggers.len(), 7 * K);
    assert!(rep.error_rate > 0.0);
}

#[test]
fn flat_channel_gives_empty_report() {
    let x = Array1::<f64>::zeros(5000);
    let rep = detect_edge_triggers(x.view(), x.view(), &TriggerConfig::default()).unwrap();
    assert!(rep.triggers.is_empty());
    assert_eq!(rep.n_cycles, 0);
    assert!(rep.error_rate.is_nan());
}

#[test]
fn known_derivative_spikes() {
    // Triangular spikes peaking at known positions.
    let peaks = [40usize, 1040, 2040, 3040];
    let mut d = Array1::<f64>::zeros(4000);
    for &p in &peaks {
        d[p - 1] = 400.0;
        d[p] = 900.0;
        d[p + 1] = 300.0;
    }
    let edges = scan_rising_edges(d.view(), &TriggerConfig::default());
    let expected: Vec<usize> = peaks.iter().map(|p| p + 1).collect();
    assert_eq!(edges, expected);
}

#[test]
fn five_khz_variant() {
    let sfreq = 5000.0;
    let n = 50_000;
    let on = onsets(500, 5000, n);
    let trig = pulse_train(n, &on, 2500, 1000.0);
    let reference = Array1::<f64>::zeros(n);
    let cfg = TriggerConfig::for_sample_rate(sfreq);

    let rep = detect_edge_triggers(trig.view(), reference.view(), &cfg).unwrap();

    assert_eq!(rep.n_cycles, on.len() - 1);
    assert_eq!(rep.triggers[1] - rep.triggers[0], 125);
    assert_abs_diff_eq!(rep.error_rate, 0.0);
}

#[test]
fn error_rate_of_regular_grid() {
    let grid: Vec<usize> = (0..100).map(|i| i * 25).collect();
    assert_abs_diff_eq!(trigger_error_rate(&grid, 25.0), 0.0);
}
