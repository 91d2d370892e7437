pub mod biquad;
pub mod block;
pub mod clarity;
pub mod compressor;
pub mod frame_denoiser;
pub mod limiter;
pub mod queue;
pub mod resampler;
pub mod spectral;
pub mod utils;

pub use biquad::{Biquad, FilterShape};
pub use block::{AudioBlock, Stage};
pub use clarity::{ClarityConfig, ClarityStack};
pub use compressor::{Compressor, CompressorSettings};
pub use frame_denoiser::FrameDenoiser;
pub use limiter::{Limiter, LimiterSettings};
pub use queue::SampleQueue;
pub use resampler::LinearResampler;
pub use spectral::suppressor::SpectralSuppressor;
pub use spectral::HopProcessor;
