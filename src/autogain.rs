//! AutoGain Controller
//!
//! # Perceptual Contract
//! - **Target Source**: Playback whose loudness drifts between sources and scenes.
//! - **Intended Effect**: Keep the speech-band level near a target without audible
//!   breathing; the user's boost is applied on top.
//! - **Failure Modes**:
//!   - Slow to catch a sudden level change: a few dB per second at most.
//! - **Will Not Do**:
//!   - Raise gain through long silences (the silence gate blocks increases).
//!
//! # Design Notes
//! Once per hop the controller compares the measurement tap's RMS with the target, moves
//! the correction a time-constant fraction of the way in dB, and clamps the step to
//! asymmetric per-tick ceilings. Structure follows the slew-limited control pattern:
//! the loop never jumps, only ramps.

use crate::config::{EngineConfig, Settings};
use crate::dsp::utils::{db_to_lin, lin_to_db};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoGainConfig {
    /// Tick interval.
    pub hop_ms: f32,
    /// Speech-band RMS the controller steers toward.
    pub target_db: f32,
    /// Below this the input counts as silence.
    pub silence_db: f32,
    /// Continuous silence before increases are blocked.
    pub silence_hold_ms: f32,
    /// Continuous signal before increases are allowed again.
    pub unblock_ms: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    /// Time constant for increases (seconds).
    pub attack_s: f32,
    /// Time constant for decreases (seconds).
    pub release_s: f32,
    /// Per-tick ceiling on increases (dB).
    pub max_up_db: f32,
    /// Per-tick ceiling on decreases (dB).
    pub max_down_db: f32,
}

impl Default for AutoGainConfig {
    fn default() -> Self {
        Self {
            hop_ms: 80.0,
            target_db: -20.0,
            silence_db: -55.0,
            silence_hold_ms: 600.0,
            unblock_ms: 160.0,
            min_gain: 0.6,
            max_gain: 2.4,
            attack_s: 0.6,
            release_s: 1.5,
            max_up_db: 0.5,
            max_down_db: 1.5,
        }
    }
}

// Added to the RMS before taking its log.
const RMS_EPS: f32 = 1e-9;

/// User gain, automatic correction and mute, combined into the effective gain.
#[derive(Debug, Clone, PartialEq)]
pub struct GainState {
    boost: f32,
    auto_gain: f32,
    muted: bool,
    boost_min: f32,
    boost_max: f32,
    auto_min: f32,
    auto_max: f32,
    max_effective: f32,
    trim: f32,
}

impl GainState {
    pub fn new(cfg: &EngineConfig, settings: &Settings) -> Self {
        let mut s = Self {
            boost: 1.0,
            auto_gain: 1.0,
            muted: settings.muted,
            boost_min: cfg.boost_min,
            boost_max: cfg.boost_max,
            auto_min: cfg.autogain.min_gain,
            auto_max: cfg.autogain.max_gain,
            max_effective: cfg.max_effective_gain,
            trim: cfg.output_trim,
        };
        s.set_boost(settings.boost);
        s
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn auto_gain(&self) -> f32 {
        self.auto_gain
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    /// Clamps into the boost bounds. Non-finite values are ignored.
    pub fn set_boost(&mut self, value: f32) -> f32 {
        if value.is_finite() {
            self.boost = value.clamp(self.boost_min, self.boost_max);
        }
        self.boost
    }

    /// Relative change, rounded to one decimal and clamped.
    pub fn adjust_boost(&mut self, delta: f32) -> f32 {
        if delta.is_finite() {
            let v = ((self.boost + delta) * 10.0).round() / 10.0;
            self.boost = v.clamp(self.boost_min, self.boost_max);
        }
        self.boost
    }

    pub fn reset_boost(&mut self) {
        self.boost = 1.0f32.clamp(self.boost_min, self.boost_max);
        self.auto_gain = 1.0f32.clamp(self.auto_min, self.auto_max);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn toggle_muted(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }

    pub fn set_auto_gain(&mut self, value: f32) {
        self.auto_gain = value.clamp(self.auto_min, self.auto_max);
    }

    /// `(muted ? 0 : clamp(boost * autoGain)) * trim`.
    pub fn effective(&self) -> f32 {
        let g = if self.muted {
            0.0
        } else {
            (self.boost * self.auto_gain).clamp(0.0, self.max_effective)
        };
        g * self.trim
    }
}

pub struct AutoGainController {
    cfg: AutoGainConfig,
    silent_ms: f32,
    signal_ms: f32,
    increase_blocked: bool,
}

impl AutoGainController {
    pub fn new(cfg: AutoGainConfig) -> Self {
        Self {
            cfg,
            silent_ms: 0.0,
            signal_ms: 0.0,
            increase_blocked: false,
        }
    }

    pub fn hop_ms(&self) -> f32 {
        self.cfg.hop_ms
    }

    pub fn is_blocking_increases(&self) -> bool {
        self.increase_blocked
    }

    pub fn reset(&mut self) {
        self.silent_ms = 0.0;
        self.signal_ms = 0.0;
        self.increase_blocked = false;
    }

    fn update_gate(&mut self, rms_db: f32) {
        let hop = self.cfg.hop_ms;
        if rms_db < self.cfg.silence_db {
            self.silent_ms += hop;
            self.signal_ms = 0.0;
            if self.silent_ms >= self.cfg.silence_hold_ms {
                self.increase_blocked = true;
            }
        } else {
            self.signal_ms += hop;
            self.silent_ms = 0.0;
            if self.signal_ms >= self.cfg.unblock_ms {
                self.increase_blocked = false;
            }
        }
    }

    /// One tick: given the measured RMS and the current correction, returns the next
    /// correction.
    pub fn step(&mut self, rms: f32, current: f32) -> f32 {
        let rms_db = 20.0 * (rms.max(0.0) + RMS_EPS).log10();
        self.update_gate(rms_db);
        let cfg = &self.cfg;

        let desired = db_to_lin(cfg.target_db - rms_db).clamp(cfg.min_gain, cfg.max_gain);
        let current_db = lin_to_db(current.clamp(cfg.min_gain, cfg.max_gain));
        let desired_db = lin_to_db(desired);

        let tau = if desired_db > current_db {
            cfg.attack_s
        } else {
            cfg.release_s
        };
        let coeff = 1.0 - (-(cfg.hop_ms * 0.001) / tau.max(1e-3)).exp();
        let mut delta_db = (desired_db - current_db) * coeff;

        if self.increase_blocked {
            delta_db = delta_db.min(0.0);
        }
        delta_db = delta_db.clamp(-cfg.max_down_db, cfg.max_up_db);

        // Applied as a ratio so a zero step leaves the value bit-identical.
        (current.clamp(cfg.min_gain, cfg.max_gain) * db_to_lin(delta_db)).clamp(cfg.min_gain, cfg.max_gain)
    }
}
