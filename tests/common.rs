/// Shared synthetic-signal helpers.
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

#[allow(unused)]
/// Rectangular photodiode pulses: `amp` for `width` samples from each onset.
pub fn pulse_train(n: usize, onsets: &[usize], width: usize, amp: f64) -> Array1<f64> {
    let mut x = Array1::<f64>::zeros(n);
    for &t in onsets {
        for i in t..(t + width).min(n) {
            x[i] = amp;
        }
    }
    x
}

#[allow(unused)]
/// Onsets `first, first + period, …` below `n`.
pub fn onsets(first: usize, period: usize, n: usize) -> Vec<usize> {
    (first..n).step_by(period).collect()
}

#[allow(unused)]
/// Seeded Gaussian white noise.
pub fn noise(n: usize, sd: f64, seed: u64) -> Array1<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sd).unwrap();
    Array1::from_shape_simple_fn(n, || normal.sample(&mut rng))
}

#[allow(unused)]
/// Seeded Gaussian noise matrix.
pub fn noise2(shape: (usize, usize), sd: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sd).unwrap();
    Array2::from_shape_simple_fn(shape, || normal.sample(&mut rng))
}

#[allow(unused)]
/// `amp · sin(2π f t / sfreq)`.
pub fn sinusoid(n: usize, freq: f64, sfreq: f64, amp: f64) -> Array1<f64> {
    Array1::from_shape_fn(n, |i| amp * (2.0 * std::f64::consts::PI * freq * i as f64 / sfreq).sin())
}

#[allow(unused)]
pub fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[allow(unused)]
/// Mean of a slice.
pub fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}
