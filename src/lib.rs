//! speechboost: a real-time speech enhancement engine for media playback.
//!
//! Tapped media audio runs through an optional noise suppressor (a recurrent frame model
//! or a spectral ERB-masking model), a smoothed gain stage, an optional clarity stack and
//! an output limiter. A speech-band measurement tap drives the AutoGain loop.
//!
//! The crate is split into a control plane ([`Engine`]) and a data plane
//! ([`RenderGraph`]); see [`engine`] for how a host drives them.

pub mod autogain;
pub mod chain;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod meters;
pub mod model;
pub mod registry;
pub mod render_log;

pub use crate::autogain::{AutoGainConfig, AutoGainController, GainState};
pub use crate::chain::{ChainState, Head, RenderGraph, RoutePlan};
pub use crate::commands::{shortcut, Command, Response, StateSnapshot};
pub use crate::config::{EngineConfig, ModelAssets, Settings, SuppressionConfig, TapConfig, UiPosition};
pub use crate::coordinator::{ModelKind, SuppressionState, SuppressionStatus};
pub use crate::engine::{Engine, EngineBuilder, RunState};
pub use crate::error::{Error, LoadStage, Result, TapError};
pub use crate::meters::Meters;
pub use crate::model::{FrameModel, FrameModelLoader, FrameState, SpectralModel, SpectralModelLoader, SpectralShape};
pub use crate::registry::{MediaElementId, MediaEvent, MediaTapper, SourceRegistry};

#[cfg(feature = "onnx")]
pub use crate::model::OnnxSpectralLoader;
#[cfg(feature = "rnnoise")]
pub use crate::model::RnnoiseLoader;
