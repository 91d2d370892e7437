//! Output Limiter
//!
//! # Perceptual Contract
//! - **Target Source**: Boosted output, after AutoGain and the clarity stack.
//! - **Intended Effect**: Catch peaks the boost pushes over the ceiling.
//! - **Failure Modes**:
//!   - Audible crunch if driven more than ~6 dB into reduction for long stretches.
//! - **Will Not Do**:
//!   - Color the sound or provide "glue" compression.
//!
//! The chain always terminates here. A final hard clamp at full scale makes the stage a
//! strict guarantee even when the smoothed gain has not caught a transient yet.

use crate::dsp::block::{AudioBlock, Stage};
use crate::dsp::utils::{db_to_lin, lin_to_db, time_constant_coeff, DB_EPS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    pub ceiling_db: f32,
    pub ratio: f32,
    pub knee_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            ceiling_db: -1.0,
            ratio: 20.0,
            knee_db: 1.5,
            attack_ms: 0.3,
            release_ms: 80.0,
        }
    }
}

/// Stereo-linked peak limiter.
pub struct Limiter {
    settings: LimiterSettings,
    peak_attack: f32,
    peak_release: f32,
    gain_attack: f32,
    gain_release: f32,
    peak_env: f32,
    gain_smooth: f32,
}

impl Limiter {
    pub fn new(settings: LimiterSettings, sample_rate: f32) -> Self {
        Self {
            settings,
            peak_attack: time_constant_coeff(settings.attack_ms, sample_rate),
            peak_release: time_constant_coeff(settings.release_ms * 0.5, sample_rate),
            gain_attack: time_constant_coeff(settings.attack_ms, sample_rate),
            gain_release: time_constant_coeff(settings.release_ms, sample_rate),
            peak_env: 0.0,
            gain_smooth: 1.0,
        }
    }

    #[inline]
    fn compute_gain(&mut self, linked_abs: f32) -> f32 {
        self.peak_env = if linked_abs > self.peak_env {
            self.peak_attack * self.peak_env + (1.0 - self.peak_attack) * linked_abs
        } else {
            self.peak_release * self.peak_env + (1.0 - self.peak_release) * linked_abs
        };

        let over_db = lin_to_db(self.peak_env.max(DB_EPS)) - self.settings.ceiling_db;
        let knee = self.settings.knee_db;
        let slope = 1.0 - 1.0 / self.settings.ratio.max(1.0);
        let reduction_db = if over_db <= -knee * 0.5 {
            0.0
        } else if over_db >= knee * 0.5 {
            over_db * slope
        } else {
            let x = over_db + knee * 0.5;
            (x * x) / (2.0 * knee) * slope
        };
        let target_gain = db_to_lin(-reduction_db);

        if target_gain < self.gain_smooth {
            self.gain_smooth = self.gain_attack * self.gain_smooth + (1.0 - self.gain_attack) * target_gain;
        } else {
            self.gain_smooth = self.gain_release * self.gain_smooth + (1.0 - self.gain_release) * target_gain;
        }
        self.gain_smooth
    }

    /// Current gain reduction in dB (for state reporting).
    pub fn gain_reduction_db(&self) -> f32 {
        lin_to_db(self.gain_smooth).abs()
    }
}

impl Stage for Limiter {
    fn process(&mut self, block: &mut AudioBlock) {
        for i in 0..block.frames() {
            let g = self.compute_gain(block.linked_abs(i));
            block.scale_frame(i, g);
        }
        for ch in 0..block.channels() {
            for s in block.channel_mut(ch) {
                *s = s.clamp(-1.0, 1.0);
            }
        }
    }

    fn reset(&mut self) {
        self.peak_env = 0.0;
        self.gain_smooth = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_never_exceeds_full_scale() {
        let mut lim = Limiter::new(LimiterSettings::default(), 48000.0);
        let mut block = AudioBlock::new(2, 128);
        let mut max_out = 0.0f32;
        for b in 0..200 {
            block.set_layout(2, 128);
            for ch in 0..2 {
                for (i, s) in block.channel_mut(ch).iter_mut().enumerate() {
                    let n = (b * 128 + i) as f32;
                    *s = 4.0 * (2.0 * PI * 220.0 * n / 48000.0).sin();
                }
            }
            lim.process(&mut block);
            for ch in 0..2 {
                for s in block.channel(ch) {
                    max_out = max_out.max(s.abs());
                }
            }
        }
        assert!(max_out <= 1.0);
        assert!(lim.gain_reduction_db() > 6.0);
    }

    #[test]
    fn test_quiet_signal_untouched() {
        let mut lim = Limiter::new(LimiterSettings::default(), 48000.0);
        let mut block = AudioBlock::new(1, 256);
        block.set_layout(1, 256);
        block.fill(0.1);
        lim.process(&mut block);
        assert!((block.channel(0)[255] - 0.1).abs() < 1e-6);
    }
}
