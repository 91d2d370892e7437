//! Opaque inference services.
//!
//! The suppressors never know which network they run. A frame model turns one native-rate
//! frame into one denoised frame through a per-channel recurrent state; a spectral model
//! is an encoder (band feature + normalized spectrum → embedding) followed by a mask
//! decoder (embedding → one gain per ERB band).
//!
//! Loaders are supplied by the host. Built-in loaders are available behind the `rnnoise`
//! and `onnx` features.

use crate::config::ModelAssets;
use crate::error::Result;
use std::sync::Arc;

/// Shared, immutable frame model. States are created per channel, on first use.
pub trait FrameModel: Send + Sync {
    /// Samples per processing frame.
    fn frame_size(&self) -> usize;

    /// The only rate the model accepts.
    fn native_rate(&self) -> u32;

    fn new_state(&self) -> Box<dyn FrameState>;
}

/// Per-channel recurrent state. `process_frame` runs on the render thread and must be
/// allocation-free.
pub trait FrameState: Send {
    /// `input` and `output` are both exactly `frame_size` samples in [-1, 1].
    fn process_frame(&mut self, output: &mut [f32], input: &[f32]);
}

pub trait FrameModelLoader: Send + Sync {
    fn load(&self, assets: &ModelAssets) -> Result<Arc<dyn FrameModel>>;
}

/// Tensor sizes the spectral model is fed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectralShape {
    pub nb_erb: usize,
    /// Positive-frequency bins, `fft_size / 2 + 1`.
    pub n_bins: usize,
}

/// Spectral encoder/decoder pair. Lives on the worker thread only.
pub trait SpectralModel: Send {
    /// `feat_erb` is `[1, 1, 1, nb_erb]`; `feat_spec` is `[1, 2, 1, n_bins]` (real parts,
    /// then imaginary parts). The embedding replaces the contents of `emb`.
    fn encode(&mut self, feat_erb: &[f32], feat_spec: &[f32], emb: &mut Vec<f32>) -> Result<()>;

    /// Writes the per-band mask into `mask`. Fewer than `nb_erb` values is allowed; the
    /// caller treats missing bands as unity.
    fn decode(&mut self, emb: &[f32], mask: &mut Vec<f32>) -> Result<()>;
}

pub trait SpectralModelLoader: Send + Sync {
    fn load(&self, assets: &ModelAssets, shape: SpectralShape) -> Result<Box<dyn SpectralModel>>;
}

// =============================================================================
// RNNoise (nnnoiseless)
// =============================================================================

#[cfg(feature = "rnnoise")]
pub use self::rnnoise::RnnoiseLoader;

#[cfg(feature = "rnnoise")]
mod rnnoise {
    use super::*;
    use crate::error::{Error, LoadStage};
    use nnnoiseless::DenoiseState;

    // nnnoiseless works on i16-range floats.
    const PCM_SCALE: f32 = 32768.0;

    /// Loads the RNNoise network compiled into `nnnoiseless`.
    pub struct RnnoiseLoader;

    impl FrameModelLoader for RnnoiseLoader {
        fn load(&self, assets: &ModelAssets) -> Result<Arc<dyn FrameModel>> {
            if let Some(location) = &assets.frame_weights {
                return Err(Error::load(
                    LoadStage::Weights,
                    format!("external RNNoise weights are not supported ({location})"),
                ));
            }
            Ok(Arc::new(Rnnoise))
        }
    }

    struct Rnnoise;

    impl FrameModel for Rnnoise {
        fn frame_size(&self) -> usize {
            DenoiseState::FRAME_SIZE
        }

        fn native_rate(&self) -> u32 {
            48000
        }

        fn new_state(&self) -> Box<dyn FrameState> {
            Box::new(RnnoiseState {
                state: DenoiseState::new(),
                scaled_in: vec![0.0; DenoiseState::FRAME_SIZE],
            })
        }
    }

    struct RnnoiseState {
        state: Box<DenoiseState<'static>>,
        scaled_in: Vec<f32>,
    }

    impl FrameState for RnnoiseState {
        fn process_frame(&mut self, output: &mut [f32], input: &[f32]) {
            for (d, s) in self.scaled_in.iter_mut().zip(input) {
                *d = s * PCM_SCALE;
            }
            self.state.process_frame(output, &self.scaled_in);
            for s in output.iter_mut() {
                *s = (*s / PCM_SCALE).clamp(-1.0, 1.0);
            }
        }
    }
}

// =============================================================================
// ONNX encoder / ERB decoder (tract)
// =============================================================================

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxSpectralLoader;

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;
    use crate::error::{Error, LoadStage};
    use log::info;
    use tract_onnx::prelude::*;

    type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

    /// Loads an encoder graph (inputs `feat_erb`, `feat_spec`; output `emb`) and an ERB
    /// decoder graph (input `emb`; output `mask`) from ONNX files.
    pub struct OnnxSpectralLoader;

    impl SpectralModelLoader for OnnxSpectralLoader {
        fn load(&self, assets: &ModelAssets, shape: SpectralShape) -> Result<Box<dyn SpectralModel>> {
            let enc_path = assets
                .spectral_encoder
                .as_deref()
                .ok_or_else(|| Error::load(LoadStage::Weights, "no encoder location"))?;
            let dec_path = assets
                .spectral_decoder
                .as_deref()
                .ok_or_else(|| Error::load(LoadStage::Weights, "no decoder location"))?;

            let encoder = tract_onnx::onnx()
                .model_for_path(enc_path)
                .and_then(|m| m.with_input_fact(0, f32::fact([1, 1, 1, shape.nb_erb]).into()))
                .and_then(|m| m.with_input_fact(1, f32::fact([1, 2, 1, shape.n_bins]).into()))
                .and_then(|m| m.into_optimized())
                .and_then(|m| m.into_runnable())
                .map_err(|e| Error::load(LoadStage::Weights, format!("encoder: {e}")))?;
            let decoder = tract_onnx::onnx()
                .model_for_path(dec_path)
                .and_then(|m| m.into_optimized())
                .and_then(|m| m.into_runnable())
                .map_err(|e| Error::load(LoadStage::Weights, format!("decoder: {e}")))?;

            let emb_output = output_index(&encoder, "emb");
            let mask_output = output_index(&decoder, "mask");
            info!("Spectral model graphs loaded from {} and {}", enc_path, dec_path);

            Ok(Box::new(OnnxSpectral {
                shape,
                encoder,
                decoder,
                emb_output,
                mask_output,
                emb_shape: Vec::new(),
            }))
        }
    }

    /// Output whose node name contains `hint`, or the first output.
    fn output_index(plan: &Plan, hint: &str) -> usize {
        let model = plan.model();
        model
            .output_outlets()
            .ok()
            .and_then(|outlets| {
                outlets
                    .iter()
                    .position(|o| model.node(o.node).name.contains(hint))
            })
            .unwrap_or(0)
    }

    struct OnnxSpectral {
        shape: SpectralShape,
        encoder: Plan,
        decoder: Plan,
        emb_output: usize,
        mask_output: usize,
        emb_shape: Vec<usize>,
    }

    fn inference(e: impl std::fmt::Display) -> Error {
        Error::Inference(e.to_string())
    }

    impl SpectralModel for OnnxSpectral {
        fn encode(&mut self, feat_erb: &[f32], feat_spec: &[f32], emb: &mut Vec<f32>) -> Result<()> {
            let erb = Tensor::from_shape(&[1, 1, 1, self.shape.nb_erb], feat_erb).map_err(inference)?;
            let spec =
                Tensor::from_shape(&[1, 2, 1, self.shape.n_bins], feat_spec).map_err(inference)?;
            let outputs = self
                .encoder
                .run(tvec!(erb.into_tvalue(), spec.into_tvalue()))
                .map_err(inference)?;
            let out = outputs
                .get(self.emb_output)
                .ok_or_else(|| Error::Inference("encoder produced no embedding".into()))?;
            self.emb_shape.clear();
            self.emb_shape.extend_from_slice(out.shape());
            emb.clear();
            emb.extend_from_slice(out.as_slice::<f32>().map_err(inference)?);
            Ok(())
        }

        fn decode(&mut self, emb: &[f32], mask: &mut Vec<f32>) -> Result<()> {
            let input = Tensor::from_shape(&self.emb_shape, emb).map_err(inference)?;
            let outputs = self.decoder.run(tvec!(input.into_tvalue())).map_err(inference)?;
            let out = outputs
                .get(self.mask_output)
                .ok_or_else(|| Error::Inference("decoder produced no mask".into()))?;
            mask.clear();
            mask.extend_from_slice(out.as_slice::<f32>().map_err(inference)?);
            Ok(())
        }
    }
}
