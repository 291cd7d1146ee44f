/// Paired label-swap test between two conditions.
mod common;

use approx::assert_abs_diff_eq;
use ndarray::{s, Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use ssvep::{stack_trials, ConditionTest, SpectralAnalyzer, SpectrumConfig, TrialStatistic};

use common::{mean, noise, noise2, sinusoid};

const L: usize = 25;

/// `n` segments of noise plus a 40 Hz cycle of amplitude `amp`.
fn segments(n: usize, amp: f64, seed: u64) -> Array2<f64> {
    let cycle = sinusoid(L, 40.0, 1000.0, amp);
    let mut m = noise2((n, L), 10.0, seed);
    for mut row in m.rows_mut() {
        row += &cycle;
    }
    m
}

#[test]
fn longer_condition_is_truncated() {
    let a = segments(40, 0.0, 1);
    let b = segments(33, 0.0, 2);
    let r = ConditionTest::new(TrialStatistic::PeakToTrough, 50)
        .run(a.view(), b.view(), &mut StdRng::seed_from_u64(1))
        .unwrap();
    assert_eq!(r.n_trials, 33);
    assert_eq!(r.n_truncated, 7);
    assert_eq!(r.num_loops, 50);
    // The statistic only sees the first 33 rows of A.
    let expected = TrialStatistic::PeakToTrough.of(a.slice(s![..33, ..])) - TrialStatistic::PeakToTrough.of(b.view());
    assert_abs_diff_eq!(r.true_difference, expected, epsilon = 1e-12);
}

#[test]
fn identical_conditions_have_a_degenerate_null() {
    let a = segments(20, 3.0, 3);
    let r = ConditionTest::new(TrialStatistic::PeakToTrough, 100)
        .run(a.view(), a.view(), &mut StdRng::seed_from_u64(2))
        .unwrap();
    assert_eq!(r.true_difference, 0.0);
    assert_eq!(r.null_mean, 0.0);
    assert_eq!(r.null_std, 0.0);
    assert!(r.z.is_nan());
}

#[test]
fn same_distribution_centres_z_on_zero() {
    let t = ConditionTest::new(TrialStatistic::PeakToTrough, 200);
    let mut zs = Vec::new();
    let mut n_significant = 0;
    for seed in 0..30u64 {
        let a = segments(20, 0.0, 1000 + seed);
        let b = segments(20, 0.0, 2000 + seed);
        let r = t.run(a.view(), b.view(), &mut StdRng::seed_from_u64(seed)).unwrap();
        assert!(r.z.is_finite());
        zs.push(r.z);
        if r.p < 0.05 {
            n_significant += 1;
        }
    }
    let m = mean(&zs);
    assert!(m.abs() < 0.6, "mean z {m}");
    assert!(n_significant <= 6, "{n_significant} of 30 significant");
}

#[test]
fn flicker_in_one_condition_is_detected() {
    let a = segments(200, 5.0, 4);
    let b = segments(200, 0.0, 5);
    let t = ConditionTest::new(TrialStatistic::PeakToTrough, 500);
    let r = t.run(a.view(), b.view(), &mut StdRng::seed_from_u64(3)).unwrap();
    assert!(r.true_difference > 0.0);
    assert!(r.p < 0.05, "p {}", r.p);

    // And not in the reverse direction.
    let back = t.run(b.view(), a.view(), &mut StdRng::seed_from_u64(3)).unwrap();
    assert!(back.p > 0.5, "p {}", back.p);
}

#[test]
fn seed_fixes_the_null() {
    let a = segments(30, 1.0, 6);
    let b = segments(30, 0.0, 7);
    let t = ConditionTest::new(TrialStatistic::PeakToTrough, 100);
    let x = t.run(a.view(), b.view(), &mut StdRng::seed_from_u64(11)).unwrap();
    let y = t.run(a.view(), b.view(), &mut StdRng::seed_from_u64(11)).unwrap();
    let z = t.run(a.view(), b.view(), &mut StdRng::seed_from_u64(12)).unwrap();
    assert_eq!(x, y);
    assert_ne!(x.null_std.to_bits(), z.null_std.to_bits());
}

#[test]
fn pooled_sessions_are_stacked_before_testing() {
    let night1 = segments(15, 5.0, 8);
    let night2 = segments(25, 5.0, 9);
    let pooled = stack_trials(&[night1.view(), night2.view()]).unwrap();
    assert_eq!(pooled.nrows(), 40);
    assert_eq!(pooled.row(15), night2.row(0));

    let control = segments(40, 0.0, 10);
    let r = ConditionTest::new(TrialStatistic::PeakToTrough, 300)
        .run(pooled.view(), control.view(), &mut StdRng::seed_from_u64(4))
        .unwrap();
    assert_eq!(r.n_truncated, 0);
    assert!(r.true_difference > 0.0);
}

#[test]
fn psd_bin_contrast_on_epoch_spectra() {
    const SFREQ: f64 = 250.0;
    const EPOCH: usize = 30 * 250;
    let n_epochs = 12;
    let cube = |amp: f64, seed: u64| {
        let sine = sinusoid(EPOCH, 40.0, SFREQ, amp);
        let mut out = Array3::<f64>::zeros((n_epochs, 1, EPOCH));
        for e in 0..n_epochs {
            out.slice_mut(s![e, 0, ..]).assign(&(&noise(EPOCH, 10.0, seed + e as u64) + &sine));
        }
        out
    };
    let analyzer = SpectralAnalyzer::new(SpectrumConfig::default()).unwrap();
    let (freqs, flicker) = analyzer.trial_spectra(cube(2.0, 100).view(), SFREQ).unwrap();
    let (_, sham) = analyzer.trial_spectra(cube(0.0, 200).view(), SFREQ).unwrap();
    let bin = freqs.iter().position(|&f| (f - 40.0).abs() < 1e-9).unwrap();

    let r = ConditionTest::new(TrialStatistic::Bin(bin), 1000)
        .run(flicker.view(), sham.view(), &mut StdRng::seed_from_u64(5))
        .unwrap();
    assert_eq!(r.n_trials, n_epochs);
    assert!(r.true_difference > 0.0);
    assert!(r.p < 0.05, "p {}", r.p);
}
