//! Hann-windowed STFT with overlap-add resynthesis.
//!
//! The analysis frame slides by one hop per call. The synthesis window equals the analysis
//! window, and the accumulated squared window normalizes the overlap-add, so an untouched
//! spectrum reproduces the input exactly, delayed by `frame - hop` samples.

use crate::dsp::utils::make_hann_window;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

// Floor on the accumulated window energy.
// Only positions where every overlapping window is ~0 ever hit it.
const OLA_NORM_EPS: f32 = 1e-6;

pub struct Stft {
    frame_size: usize,
    hop: usize,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    window: Vec<f32>,
    frame: Vec<f32>,
    spec: Vec<Complex<f32>>,
    ola: Vec<f32>,
    ola_norm: Vec<f32>,
}

impl Stft {
    pub fn new(frame_size: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(frame_size);
        let fft_inverse = planner.plan_fft_inverse(frame_size);
        let scratch_len = fft_forward
            .get_inplace_scratch_len()
            .max(fft_inverse.get_inplace_scratch_len());

        Self {
            frame_size,
            hop,
            fft_forward,
            fft_inverse,
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            window: make_hann_window(frame_size),
            frame: vec![0.0; frame_size],
            spec: vec![Complex::new(0.0, 0.0); frame_size],
            ola: vec![0.0; frame_size],
            ola_norm: vec![0.0; frame_size],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Positive-frequency bins, DC through Nyquist.
    pub fn n_bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Shifts `hop` new samples into the frame, windows it and transforms it.
    pub fn analyze(&mut self, hop: &[f32]) {
        let keep = self.frame_size - self.hop;
        self.frame.copy_within(self.hop.., 0);
        self.frame[keep..].copy_from_slice(&hop[..self.hop]);

        for ((c, x), w) in self.spec.iter_mut().zip(&self.frame).zip(&self.window) {
            *c = Complex::new(x * w, 0.0);
        }
        self.fft_forward
            .process_with_scratch(&mut self.spec, &mut self.scratch);
    }

    /// Positive-frequency half of the current spectrum.
    pub fn spectrum(&self) -> &[Complex<f32>] {
        &self.spec[..self.n_bins()]
    }

    /// Scales each positive bin by its gain and mirrors it into the negative half so the
    /// inverse transform stays real.
    pub fn apply_gains(&mut self, gains: &[f32]) {
        let nyq = self.frame_size / 2;
        for (c, g) in self.spec[..=nyq].iter_mut().zip(gains) {
            *c *= *g;
        }
        self.spec[0].im = 0.0;
        self.spec[nyq].im = 0.0;
        for k in 1..nyq {
            self.spec[self.frame_size - k] = self.spec[k].conj();
        }
    }

    /// Inverse-transforms, windows, overlap-adds and emits one hop into `out`.
    pub fn synthesize(&mut self, out: &mut [f32]) {
        self.fft_inverse
            .process_with_scratch(&mut self.spec, &mut self.scratch);

        let scale = 1.0 / self.frame_size as f32;
        for i in 0..self.frame_size {
            let w = self.window[i];
            self.ola[i] += self.spec[i].re * scale * w;
            self.ola_norm[i] += w * w;
        }

        for (i, o) in out.iter_mut().enumerate().take(self.hop) {
            *o = self.ola[i] / self.ola_norm[i].max(OLA_NORM_EPS);
        }

        self.ola.copy_within(self.hop.., 0);
        self.ola_norm.copy_within(self.hop.., 0);
        let tail = self.frame_size - self.hop;
        self.ola[tail..].fill(0.0);
        self.ola_norm[tail..].fill(0.0);
    }

    pub fn reset(&mut self) {
        self.frame.fill(0.0);
        self.spec.fill(Complex::new(0.0, 0.0));
        self.ola.fill(0.0);
        self.ola_norm.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_gain_reconstructs_previous_hop() {
        let mut stft = Stft::new(960, 480);
        let gains = vec![1.0; stft.n_bins()];
        let signal: Vec<f32> = (0..480 * 8)
            .map(|i| 0.3 * (i as f32 * 0.037).sin() + 0.1 * (i as f32 * 0.41).cos())
            .collect();

        let mut out = vec![0.0; 480];
        let mut prev: Option<&[f32]> = None;
        for hop in signal.chunks(480) {
            stft.analyze(hop);
            stft.apply_gains(&gains);
            stft.synthesize(&mut out);
            if let Some(p) = prev {
                for (a, b) in out.iter().zip(p) {
                    assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
                }
            }
            prev = Some(hop);
        }
    }

    #[test]
    fn test_spectrum_of_real_input_is_conjugate_symmetric() {
        let mut stft = Stft::new(64, 32);
        let hop: Vec<f32> = (0..32).map(|i| (i as f32 * 0.3).sin()).collect();
        stft.analyze(&hop);
        for k in 1..32 {
            let a = stft.spec[k];
            let b = stft.spec[64 - k].conj();
            assert!((a - b).norm() < 1e-4);
        }
    }

    #[test]
    fn test_zero_gain_silences() {
        let mut stft = Stft::new(960, 480);
        let gains = vec![0.0; stft.n_bins()];
        let mut out = vec![1.0; 480];
        for _ in 0..3 {
            stft.analyze(&[0.5; 480]);
            stft.apply_gains(&gains);
            stft.synthesize(&mut out);
        }
        assert!(out.iter().all(|v| v.abs() < 1e-5));
    }
}
