//! Spectral-Denoiser (ERB-masking model)
//!
//! # Perceptual Contract
//! - **Target Source**: Speech over non-stationary noise (keyboards, traffic, crowds).
//! - **Intended Effect**: Per-band attenuation driven by a learned mask.
//! - **Failure Modes**:
//!   - While the worker falls behind, unprocessed input is played instead.
//!   - Multichannel input is folded to mono before analysis.
//! - **Will Not Do**:
//!   - Run inference on the render thread.
//!
//! # Design Notes
//! - [`HopProcessor`] is the whole per-hop pipeline and lives on the worker thread
//! - [`worker`] owns the model and processes hops strictly in submission order
//! - [`suppressor`] is the render-thread side: hop assembly, result queueing, draining

pub mod erb;
pub mod stft;
pub mod suppressor;
pub mod worker;

use crate::config::SuppressionConfig;
use crate::error::{Error, LoadStage, Result};
use crate::model::{SpectralModel, SpectralShape};
use erb::ErbFilterbank;
use stft::Stft;

/// One hop through analysis, feature extraction, mask inference and resynthesis.
pub struct HopProcessor {
    stft: Stft,
    filterbank: ErbFilterbank,
    mag: Vec<f32>,
    feat_erb: Vec<f32>,
    feat_spec: Vec<f32>,
    emb: Vec<f32>,
    mask: Vec<f32>,
    gains: Vec<f32>,
}

impl HopProcessor {
    pub fn new(cfg: &SuppressionConfig) -> Result<Self> {
        if cfg.hop_size == 0 || cfg.fft_size < cfg.hop_size || cfg.fft_size % 2 != 0 {
            return Err(Error::load(
                LoadStage::Transform,
                format!("hop {} does not fit frame {}", cfg.hop_size, cfg.fft_size),
            ));
        }
        if cfg.nb_erb == 0 {
            return Err(Error::load(LoadStage::Transform, "no ERB bands"));
        }

        let stft = Stft::new(cfg.fft_size, cfg.hop_size);
        let n_bins = stft.n_bins();
        Ok(Self {
            stft,
            filterbank: ErbFilterbank::new(cfg.native_rate as f32, cfg.fft_size, cfg.nb_erb),
            mag: vec![0.0; n_bins],
            feat_erb: vec![0.0; cfg.nb_erb],
            feat_spec: vec![0.0; 2 * n_bins],
            emb: Vec::new(),
            mask: Vec::with_capacity(cfg.nb_erb),
            gains: vec![1.0; n_bins],
        })
    }

    pub fn shape(&self) -> SpectralShape {
        SpectralShape {
            nb_erb: self.filterbank.nb_erb(),
            n_bins: self.stft.n_bins(),
        }
    }

    pub fn hop(&self) -> usize {
        self.stft.hop()
    }

    /// Replaces `hop` with the next output hop (one hop behind the input).
    ///
    /// On an inference error the hop is still resynthesized, with unity gains, and the
    /// error is returned.
    pub fn process(&mut self, model: &mut dyn SpectralModel, hop: &mut [f32]) -> Result<()> {
        self.stft.analyze(hop);
        self.extract_features();

        let result = self.infer(model);
        match &result {
            Ok(()) => self.filterbank.expand_mask(&self.mask, &mut self.gains),
            Err(_) => self.gains.fill(1.0),
        }

        self.stft.apply_gains(&self.gains);
        self.stft.synthesize(hop);
        result
    }

    fn extract_features(&mut self) {
        let spec = self.stft.spectrum();
        let n_bins = spec.len();

        let mut energy = 0.0f32;
        for (m, c) in self.mag.iter_mut().zip(spec) {
            *m = c.norm();
            energy += *m * *m;
        }
        let norm = (energy / n_bins as f32).sqrt() + 1e-8;
        for (i, c) in spec.iter().enumerate() {
            self.feat_spec[i] = c.re / norm;
            self.feat_spec[n_bins + i] = c.im / norm;
        }

        self.filterbank.band_log_energy(&self.mag, &mut self.feat_erb);
    }

    fn infer(&mut self, model: &mut dyn SpectralModel) -> Result<()> {
        model.encode(&self.feat_erb, &self.feat_spec, &mut self.emb)?;
        model.decode(&self.emb, &mut self.mask)?;
        if self.mask.len() > self.feat_erb.len() {
            self.mask.truncate(self.feat_erb.len());
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.stft.reset();
        self.gains.fill(1.0);
    }
}
