//! Clarity Stack (speech focus)
//!
//! Fixed cascade that reshapes playback audio for intelligibility:
//! rumble high-pass → low-shelf mud cut → presence peak → multi-stage compression →
//! fast limiting.
//!
//! # Design Notes
//! - Filters are per channel; dynamics are stereo-linked
//! - Subtractive below ~250 Hz, additive only around the presence region
//! - The trailing limiter protects against clipping after the presence boost; the chain's
//!   own output limiter still follows

use crate::dsp::biquad::{Biquad, FilterShape};
use crate::dsp::block::{AudioBlock, Stage};
use crate::dsp::compressor::{Compressor, CompressorSettings};
use crate::dsp::limiter::{Limiter, LimiterSettings};
use serde::{Deserialize, Serialize};

// Rumble high-pass cutoff (Hz).
// Increasing: thinner low end; decreasing: more rumble passes.
const RUMBLE_HPF_HZ: f32 = 90.0;
// Mud shelf corner (Hz) and cut (dB).
// Increasing the cut: leaner voice; decreasing: fuller, muddier voice.
const MUD_SHELF_HZ: f32 = 250.0;
const MUD_SHELF_CUT_DB: f32 = -2.5;
// Presence peak centre (Hz) and boost (dB).
// Increasing the boost: more forward consonants, risk of harshness.
const PRESENCE_HZ: f32 = 3000.0;
const PRESENCE_BOOST_DB: f32 = 3.5;
const PRESENCE_Q: f32 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarityConfig {
    pub highpass_hz: f32,
    pub low_shelf_hz: f32,
    pub low_shelf_db: f32,
    pub presence_hz: f32,
    pub presence_db: f32,
    pub presence_q: f32,
    pub compression: Vec<CompressorSettings>,
    pub limiter: LimiterSettings,
}

impl Default for ClarityConfig {
    fn default() -> Self {
        Self {
            highpass_hz: RUMBLE_HPF_HZ,
            low_shelf_hz: MUD_SHELF_HZ,
            low_shelf_db: MUD_SHELF_CUT_DB,
            presence_hz: PRESENCE_HZ,
            presence_db: PRESENCE_BOOST_DB,
            presence_q: PRESENCE_Q,
            compression: vec![
                // Leveler: wide knee, moderate ratio
                CompressorSettings::default(),
                // Peak tamer: faster, firmer
                CompressorSettings {
                    threshold_db: -12.0,
                    ratio: 6.0,
                    knee_db: 4.0,
                    attack_ms: 1.0,
                    release_ms: 120.0,
                    makeup_db: 0.0,
                    rms_weight: 0.25,
                },
            ],
            limiter: LimiterSettings {
                ceiling_db: -1.0,
                ratio: 20.0,
                knee_db: 0.5,
                attack_ms: 0.1,
                release_ms: 60.0,
            },
        }
    }
}

struct ChannelFilters {
    highpass: Biquad,
    low_shelf: Biquad,
    presence: Biquad,
}

impl ChannelFilters {
    fn new(cfg: &ClarityConfig, sample_rate: f32) -> Self {
        Self {
            highpass: Biquad::designed(FilterShape::HighPass, cfg.highpass_hz, 0.707, sample_rate),
            low_shelf: Biquad::designed(
                FilterShape::LowShelf {
                    gain_db: cfg.low_shelf_db,
                },
                cfg.low_shelf_hz,
                0.707,
                sample_rate,
            ),
            presence: Biquad::designed(
                FilterShape::Peaking {
                    gain_db: cfg.presence_db,
                },
                cfg.presence_hz,
                cfg.presence_q,
                sample_rate,
            ),
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        self.presence
            .process(self.low_shelf.process(self.highpass.process(x)))
    }

    fn reset(&mut self) {
        self.highpass.reset();
        self.low_shelf.reset();
        self.presence.reset();
    }
}

pub struct ClarityStack {
    filters: Vec<ChannelFilters>,
    compressor: Compressor,
    limiter: Limiter,
}

impl ClarityStack {
    pub fn new(cfg: &ClarityConfig, max_channels: usize, sample_rate: f32) -> Self {
        Self {
            filters: (0..max_channels.max(1))
                .map(|_| ChannelFilters::new(cfg, sample_rate))
                .collect(),
            compressor: Compressor::new(&cfg.compression, sample_rate),
            limiter: Limiter::new(cfg.limiter, sample_rate),
        }
    }
}

impl Stage for ClarityStack {
    fn process(&mut self, block: &mut AudioBlock) {
        let channels = block.channels().min(self.filters.len());
        for ch in 0..channels {
            let f = &mut self.filters[ch];
            for s in block.channel_mut(ch) {
                *s = f.process(*s);
            }
        }
        self.compressor.process(block);
        self.limiter.process(block);
    }

    fn reset(&mut self) {
        for f in &mut self.filters {
            f.reset();
        }
        self.compressor.reset();
        self.limiter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::utils::frame_rms;
    use std::f32::consts::PI;

    fn tone_rms_through(stack: &mut ClarityStack, freq: f32, amp: f32) -> f32 {
        let sr = 48000.0;
        let mut block = AudioBlock::new(1, 480);
        let mut rms = 0.0;
        for b in 0..100 {
            block.set_layout(1, 480);
            for (i, s) in block.channel_mut(0).iter_mut().enumerate() {
                let n = (b * 480 + i) as f32;
                *s = amp * (2.0 * PI * freq * n / sr).sin();
            }
            stack.process(&mut block);
            rms = frame_rms(block.channel(0));
        }
        rms
    }

    #[test]
    fn test_rumble_is_removed_and_presence_kept() {
        let cfg = ClarityConfig::default();
        let mut a = ClarityStack::new(&cfg, 1, 48000.0);
        let mut b = ClarityStack::new(&cfg, 1, 48000.0);
        let rumble = tone_rms_through(&mut a, 25.0, 0.05);
        let presence = tone_rms_through(&mut b, 3000.0, 0.05);
        assert!(rumble < 0.01, "rumble rms {}", rumble);
        assert!(presence > 0.05 * 0.707, "presence rms {}", presence);
    }

    #[test]
    fn test_output_stays_below_full_scale() {
        let mut stack = ClarityStack::new(&ClarityConfig::default(), 1, 48000.0);
        let mut block = AudioBlock::new(1, 480);
        for b in 0..50 {
            block.set_layout(1, 480);
            for (i, s) in block.channel_mut(0).iter_mut().enumerate() {
                let n = (b * 480 + i) as f32;
                *s = 2.5 * (2.0 * PI * 1000.0 * n / 48000.0).sin();
            }
            stack.process(&mut block);
            assert!(block.channel(0).iter().all(|s| s.abs() <= 1.0));
        }
    }
}
