//! Error taxonomy for the engine.
//!
//! Only the control plane returns these. The render path never fails: anything that
//! goes wrong there degrades to pass-through audio.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Which part of a model failed to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    /// Runtime/module (inference backend) could not be created.
    Module,
    /// Weight or graph file could not be fetched or parsed.
    Weights,
    /// Transform tables (window, FFT plan, filterbank) could not be built.
    Transform,
    /// The first inference after loading failed.
    FirstInference,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadStage::Module => "module",
            LoadStage::Weights => "weights",
            LoadStage::Transform => "transform",
            LoadStage::FirstInference => "first inference",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("model requires {required} Hz but the device runs at {actual} Hz")]
    UnsupportedSampleRate { required: u32, actual: u32 },

    #[error("model load failed ({stage}): {reason}")]
    ModelLoad { stage: LoadStage, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("media tap failed: {0}")]
    Tap(#[from] TapError),

    #[error("suppression worker disconnected")]
    WorkerDisconnected,

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn load(stage: LoadStage, reason: impl Into<String>) -> Self {
        Error::ModelLoad {
            stage,
            reason: reason.into(),
        }
    }
}

/// Why a media element could not be tapped into the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TapError {
    #[error("media is cross-origin and does not allow tapping")]
    CrossOrigin,

    #[error("element is already connected to another graph")]
    AlreadyConnected,

    #[error("element is no longer in the document")]
    Detached,

    #[error("{0}")]
    Other(String),
}
