//! Biquad Filter (IIR 2nd order, RBJ cookbook)
//!
//! Used by the clarity stack (rumble high-pass, mud shelf, presence peak) and by the
//! measurement tap's speech-band pair.
//!
//! # Design Notes
//! - Transposed direct form II, one instance per channel
//! - Coefficient updates never touch the delay state
//! - No allocations; safe on the render thread

use std::f32::consts::PI;

/// Filter response shapes the chain needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterShape {
    HighPass,
    LowPass,
    LowShelf { gain_db: f32 },
    Peaking { gain_db: f32 },
}

#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Default for Biquad {
    fn default() -> Self {
        Self::new()
    }
}

impl Biquad {
    /// Identity filter.
    pub fn new() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    pub fn designed(shape: FilterShape, freq: f32, q: f32, sample_rate: f32) -> Self {
        let mut f = Self::new();
        f.design(shape, freq, q, sample_rate);
        f
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let out = input * self.b0 + self.z1;

        // Anti-denormal: tiny DC offset
        self.z1 = input * self.b1 + self.z2 - self.a1 * out + 1e-25;
        self.z2 = input * self.b2 - self.a2 * out + 1e-25;

        out
    }

    #[inline]
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    pub fn design(&mut self, shape: FilterShape, freq: f32, q: f32, sample_rate: f32) {
        let nyquist_guard = sample_rate * 0.49;
        let w0 = 2.0 * PI * freq.clamp(1.0, nyquist_guard) / sample_rate;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let cw0 = w0.cos();

        match shape {
            FilterShape::HighPass => {
                let b = (1.0 + cw0) * 0.5;
                self.set(b, -(1.0 + cw0), b, 1.0 + alpha, -2.0 * cw0, 1.0 - alpha);
            }
            FilterShape::LowPass => {
                let b = (1.0 - cw0) * 0.5;
                self.set(b, 1.0 - cw0, b, 1.0 + alpha, -2.0 * cw0, 1.0 - alpha);
            }
            FilterShape::LowShelf { gain_db } => {
                if gain_db.abs() < 0.01 {
                    self.set(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);
                    return;
                }
                let a = 10.0_f32.powf(gain_db / 40.0);
                let sa = 2.0 * a.sqrt() * alpha;
                self.set(
                    a * ((a + 1.0) - (a - 1.0) * cw0 + sa),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cw0),
                    a * ((a + 1.0) - (a - 1.0) * cw0 - sa),
                    (a + 1.0) + (a - 1.0) * cw0 + sa,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cw0),
                    (a + 1.0) + (a - 1.0) * cw0 - sa,
                );
            }
            FilterShape::Peaking { gain_db } => {
                if gain_db.abs() < 0.01 {
                    self.set(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);
                    return;
                }
                let a = 10.0_f32.powf(gain_db / 40.0);
                self.set(
                    1.0 + alpha * a,
                    -2.0 * cw0,
                    1.0 - alpha * a,
                    1.0 + alpha / a,
                    -2.0 * cw0,
                    1.0 - alpha / a,
                );
            }
        }
    }

    #[inline]
    fn set(&mut self, b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) {
        let inv_a0 = 1.0 / a0;
        self.b0 = b0 * inv_a0;
        self.b1 = b1 * inv_a0;
        self.b2 = b2 * inv_a0;
        self.a1 = a1 * inv_a0;
        self.a2 = a2 * inv_a0;
    }
}
