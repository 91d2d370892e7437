//! Shared DSP helpers: level conversions, smoothing coefficients, windows.

use std::f32::consts::PI;

/// Floor used before taking logarithms of levels.
pub const DB_EPS: f32 = 1e-9;

#[inline]
pub fn db_to_lin(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[inline]
pub fn lin_to_db(lin: f32) -> f32 {
    20.0 * lin.max(DB_EPS).log10()
}

/// One-pole smoothing coefficient for a time constant in milliseconds.
///
/// Used as `state = coeff * state + (1 - coeff) * input`.
#[inline]
pub fn time_constant_coeff(ms: f32, sample_rate: f32) -> f32 {
    let samples = (ms * 0.001 * sample_rate).max(1e-6);
    (-1.0 / samples).exp()
}

/// Squared-envelope follower step with separate attack and release coefficients.
#[inline]
pub fn update_env_sq(env_sq: f32, input_sq: f32, attack: f32, release: f32) -> f32 {
    if input_sq > env_sq {
        attack * env_sq + (1.0 - attack) * input_sq
    } else {
        release * env_sq + (1.0 - release) * input_sq
    }
}

/// Periodic Hann window (`N` denominator), which sums to a constant at 50% overlap.
pub fn make_hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / len as f32).cos()))
        .collect()
}

pub fn frame_rms(x: &[f32]) -> f32 {
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    (s / (x.len().max(1) as f32)).sqrt()
}
