//! Engine tunables, persisted user settings and model asset locations.
//!
//! Everything here is plain serde data. Missing JSON fields take their defaults and
//! unknown fields are ignored, so settings written by older hosts keep loading.

use crate::autogain::AutoGainConfig;
use crate::dsp::clarity::ClarityConfig;
use crate::dsp::limiter::LimiterSettings;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Device-level and DSP tunables. Fixed for the lifetime of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Device (audio context) sample rate.
    pub sample_rate: u32,
    /// Largest render quantum the host will ever pass.
    pub max_block: usize,
    pub max_channels: usize,
    pub boost_min: f32,
    pub boost_max: f32,
    /// Upper bound on `boost * autoGain` before the output trim.
    pub max_effective_gain: f32,
    /// Fixed trim applied after the boost to leave limiter headroom.
    pub output_trim: f32,
    /// Ramp time of the gain stage toward a new effective gain.
    pub gain_smoothing_ms: f32,
    pub autogain: AutoGainConfig,
    pub clarity: ClarityConfig,
    pub output_limiter: LimiterSettings,
    pub tap: TapConfig,
    pub suppression: SuppressionConfig,
    /// Capacity (entries) of the render-thread log ring.
    pub render_log_capacity: usize,
    /// Capacity of the control → render command channel.
    pub command_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            max_block: 1024,
            max_channels: 2,
            boost_min: 0.1,
            boost_max: 6.0,
            max_effective_gain: 8.0,
            output_trim: 0.9,
            gain_smoothing_ms: 15.0,
            autogain: AutoGainConfig::default(),
            clarity: ClarityConfig::default(),
            output_limiter: LimiterSettings::default(),
            tap: TapConfig::default(),
            suppression: SuppressionConfig::default(),
            render_log_capacity: 64,
            command_capacity: 32,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Measurement tap: speech-band isolation feeding AutoGain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub low_hz: f32,
    pub high_hz: f32,
    /// Number of most recent samples the RMS estimate covers.
    pub window: usize,
    /// Capacity of the render → control sample ring.
    pub capacity: usize,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            low_hz: 120.0,
            high_hz: 6000.0,
            window: 2048,
            capacity: 16384,
        }
    }
}

/// Shapes and policies shared by both suppression models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    /// Rate both models run at.
    pub native_rate: u32,
    /// Frame-Denoiser processing unit. A frame model with a different unit is rejected.
    pub frame_size: usize,
    /// Spectral model hop.
    pub hop_size: usize,
    /// Spectral model analysis frame (FFT size).
    pub fft_size: usize,
    pub nb_erb: usize,
    /// Resample when the device rate differs from `native_rate`. When false, a rate
    /// mismatch is reported as an unsupported runtime condition.
    pub allow_resampling: bool,
    /// Hops that may be in flight to the spectral worker.
    pub worker_queue: usize,
    /// Processed hops buffered before the spectral output is consumed.
    pub prime_hops: usize,
    /// Consecutive inference errors tolerated before a ready model is failed.
    pub inference_failure_limit: u32,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            native_rate: 48000,
            frame_size: 480,
            hop_size: 480,
            fft_size: 960,
            nb_erb: 32,
            allow_resampling: true,
            worker_queue: 64,
            prime_hops: 2,
            inference_failure_limit: 3,
        }
    }
}

/// Where the UI overlay sits. Stored for the host, never interpreted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UiPosition {
    pub x: f32,
    pub y: f32,
}

/// User settings persisted by the host between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub boost: f32,
    pub clarity_enabled: bool,
    pub muted: bool,
    pub ui_position: Option<UiPosition>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            boost: 1.0,
            clarity_enabled: true,
            muted: false,
            ui_position: None,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Opaque locations of model assets, supplied by the host at initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelAssets {
    /// Frame (recurrent) model weights. `None` means "use the loader's built-in weights".
    pub frame_weights: Option<String>,
    /// Spectral encoder graph.
    pub spectral_encoder: Option<String>,
    /// Spectral mask decoder graph.
    pub spectral_decoder: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_for_missing_fields() {
        let s = Settings::from_json(r#"{"boost": 2.5, "extra": 1}"#).unwrap();
        assert_eq!(s.boost, 2.5);
        assert!(s.clarity_enabled);
        assert!(!s.muted);
        assert!(s.ui_position.is_none());
    }

    #[test]
    fn test_settings_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let s = Settings {
            boost: 1.7,
            clarity_enabled: false,
            muted: true,
            ui_position: Some(UiPosition { x: 12.0, y: 40.0 }),
        };
        s.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), s);
    }

    #[test]
    fn test_engine_config_partial_json() {
        let cfg = EngineConfig::from_json(r#"{"sample_rate": 44100, "suppression": {"nb_erb": 24}}"#)
            .unwrap();
        assert_eq!(cfg.sample_rate, 44100);
        assert_eq!(cfg.suppression.nb_erb, 24);
        assert_eq!(cfg.suppression.hop_size, 480);
    }

    #[test]
    fn test_malformed_settings_is_config_error() {
        let err = Settings::from_json("{boost:").unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }
}
