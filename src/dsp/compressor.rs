//! Linked Compressor (clarity dynamics)
//!
//! # Perceptual Contract
//! - **Target Source**: Boosted speech from media playback.
//! - **Intended Effect**: Even out syllable-to-syllable level so quiet words stay
//!   intelligible after the presence boost.
//! - **Failure Modes**:
//!   - "Pumping" if release is too fast for the amount of reduction.
//! - **Will Not Do**:
//!   - Brickwall limiting (handled by the limiter).
//!   - Long-term loudness normalization (handled by AutoGain).
//!
//! Several stages can be cascaded: a gentle wide-knee leveler followed by a faster peak
//! tamer. Detection is stereo-linked so the image never shifts.

use crate::dsp::block::{AudioBlock, Stage};
use crate::dsp::utils::{db_to_lin, lin_to_db, time_constant_coeff, update_env_sq, DB_EPS};
use serde::{Deserialize, Serialize};

/// Parameters of one compression stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub ratio: f32,
    pub knee_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub makeup_db: f32,
    /// Detector blend: 1.0 = pure RMS, 0.0 = pure peak.
    pub rms_weight: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -22.0,
            ratio: 3.0,
            knee_db: 6.0,
            attack_ms: 3.0,
            release_ms: 250.0,
            makeup_db: 0.0,
            rms_weight: 0.75,
        }
    }
}

struct CompressorStage {
    settings: CompressorSettings,
    rms_attack: f32,
    rms_release: f32,
    peak_attack: f32,
    peak_release: f32,
    makeup: f32,
    env_sq: f32,
    peak_env: f32,
    gain_reduction_db: f32,
}

impl CompressorStage {
    fn new(settings: CompressorSettings, sample_rate: f32) -> Self {
        Self {
            settings,
            rms_attack: time_constant_coeff(settings.attack_ms * 3.0, sample_rate),
            rms_release: time_constant_coeff(settings.release_ms, sample_rate),
            peak_attack: time_constant_coeff(settings.attack_ms, sample_rate),
            peak_release: time_constant_coeff(settings.release_ms * 0.5, sample_rate),
            makeup: db_to_lin(settings.makeup_db),
            env_sq: 0.0,
            peak_env: 0.0,
            gain_reduction_db: 0.0,
        }
    }

    #[inline]
    fn soft_knee(over_db: f32, ratio: f32, knee_db: f32) -> f32 {
        let half = 0.5 * knee_db;
        let slope = 1.0 - 1.0 / ratio.max(1.0);
        if over_db <= -half {
            0.0
        } else if over_db >= half || knee_db <= 0.0 {
            over_db * slope
        } else {
            let x = over_db + half;
            (x * x) / (2.0 * knee_db) * slope
        }
    }

    #[inline]
    fn gain_for(&mut self, linked_abs: f32) -> f32 {
        self.env_sq = update_env_sq(
            self.env_sq,
            linked_abs * linked_abs,
            self.rms_attack,
            self.rms_release,
        );
        self.peak_env = if linked_abs > self.peak_env {
            self.peak_attack * self.peak_env + (1.0 - self.peak_attack) * linked_abs
        } else {
            self.peak_release * self.peak_env + (1.0 - self.peak_release) * linked_abs
        };

        let w = self.settings.rms_weight.clamp(0.0, 1.0);
        let level = (w * self.env_sq.sqrt() + (1.0 - w) * self.peak_env).max(DB_EPS);
        let over = lin_to_db(level) - self.settings.threshold_db;
        self.gain_reduction_db = Self::soft_knee(over, self.settings.ratio, self.settings.knee_db);
        db_to_lin(-self.gain_reduction_db) * self.makeup
    }

    fn reset(&mut self) {
        self.env_sq = 0.0;
        self.peak_env = 0.0;
        self.gain_reduction_db = 0.0;
    }
}

/// Cascade of linked compression stages, applied in order.
pub struct Compressor {
    stages: Vec<CompressorStage>,
}

impl Compressor {
    pub fn new(stages: &[CompressorSettings], sample_rate: f32) -> Self {
        Self {
            stages: stages
                .iter()
                .map(|s| CompressorStage::new(*s, sample_rate))
                .collect(),
        }
    }

    /// Total gain reduction of the last processed sample, summed over stages.
    pub fn gain_reduction_db(&self) -> f32 {
        self.stages.iter().map(|s| s.gain_reduction_db).sum()
    }
}

impl Stage for Compressor {
    fn process(&mut self, block: &mut AudioBlock) {
        for i in 0..block.frames() {
            for stage in &mut self.stages {
                let g = stage.gain_for(block.linked_abs(i));
                block.scale_frame(i, g);
            }
        }
    }

    fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_constant(comp: &mut Compressor, level: f32, frames: usize) -> f32 {
        let mut block = AudioBlock::new(1, frames);
        block.set_layout(1, frames);
        block.fill(level);
        comp.process(&mut block);
        block.channel(0)[frames - 1]
    }

    #[test]
    fn test_below_threshold_is_transparent() {
        let mut comp = Compressor::new(&[CompressorSettings::default()], 48000.0);
        let out = run_constant(&mut comp, 0.01, 4800);
        assert!((out - 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_loud_signal_is_reduced_by_ratio() {
        let settings = CompressorSettings {
            threshold_db: -20.0,
            ratio: 4.0,
            knee_db: 0.0,
            ..CompressorSettings::default()
        };
        let mut comp = Compressor::new(&[settings], 48000.0);
        // 0 dBFS in, 20 dB over: expect 15 dB reduction at steady state
        let out = run_constant(&mut comp, 1.0, 48000);
        assert!((lin_to_db(out) - (-15.0)).abs() < 0.5, "out = {} dB", lin_to_db(out));
        assert!((comp.gain_reduction_db() - 15.0).abs() < 0.5);
    }

    #[test]
    fn test_soft_knee_is_continuous() {
        let k = 6.0;
        let below = CompressorStage::soft_knee(-k * 0.5 - 1e-4, 3.0, k);
        let at = CompressorStage::soft_knee(-k * 0.5, 3.0, k);
        assert!((below - at).abs() < 1e-4);
        let inside = CompressorStage::soft_knee(k * 0.5 - 1e-4, 3.0, k);
        let above = CompressorStage::soft_knee(k * 0.5, 3.0, k);
        assert!((inside - above).abs() < 1e-3);
    }
}
