//! ERB-scale triangular filterbank.
//!
//! Band edges are spaced uniformly on the ERB scale between 0 Hz and Nyquist. Each band
//! is a triangle rising from its left edge to its centre and falling to its right edge,
//! so neighbouring bands overlap and every interior bin belongs to at most two bands.

/// Hz → ERB number.
#[inline]
pub fn freq_to_erb(freq: f32) -> f32 {
    21.4 * (1.0 + 0.00437 * freq).log10()
}

/// ERB number → Hz.
#[inline]
pub fn erb_to_freq(erb: f32) -> f32 {
    (10.0f32.powf(erb / 21.4) - 1.0) / 0.00437
}

// Guards the triangle slopes and the log of an empty band.
const EPS: f32 = 1e-8;

pub struct ErbFilterbank {
    nb_erb: usize,
    n_bins: usize,
    /// Row-major `[band][bin]`.
    weights: Vec<f32>,
    weight_sum: Vec<f32>,
}

impl ErbFilterbank {
    pub fn new(sample_rate: f32, fft_size: usize, nb_erb: usize) -> Self {
        let n_bins = fft_size / 2 + 1;
        let erb_min = freq_to_erb(0.0);
        let erb_max = freq_to_erb(sample_rate / 2.0);
        let hz_points: Vec<f32> = (0..nb_erb + 2)
            .map(|i| erb_to_freq(erb_min + (erb_max - erb_min) * i as f32 / (nb_erb + 1) as f32))
            .collect();

        let mut weights = vec![0.0f32; nb_erb * n_bins];
        let mut weight_sum = vec![0.0f32; n_bins];
        for band in 0..nb_erb {
            let (left, center, right) = (hz_points[band], hz_points[band + 1], hz_points[band + 2]);
            for bin in 0..n_bins {
                let freq = bin as f32 * sample_rate / fft_size as f32;
                let w = if freq >= left && freq <= center {
                    (freq - left) / (center - left + EPS)
                } else if freq > center && freq <= right {
                    (right - freq) / (right - center + EPS)
                } else {
                    0.0
                };
                if w > 0.0 {
                    weights[band * n_bins + bin] = w;
                    weight_sum[bin] += w;
                }
            }
        }

        Self {
            nb_erb,
            n_bins,
            weights,
            weight_sum,
        }
    }

    pub fn nb_erb(&self) -> usize {
        self.nb_erb
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    #[inline]
    pub fn band(&self, band: usize) -> &[f32] {
        &self.weights[band * self.n_bins..(band + 1) * self.n_bins]
    }

    /// Per-bin sum of weights across all bands.
    pub fn weight_sum(&self) -> &[f32] {
        &self.weight_sum
    }

    /// `out[band] = log10(Σ w·|X|² + ε)`.
    pub fn band_log_energy(&self, mag: &[f32], out: &mut [f32]) {
        for (band, o) in out.iter_mut().enumerate().take(self.nb_erb) {
            let sum: f32 = self
                .band(band)
                .iter()
                .zip(mag)
                .map(|(w, m)| w * m * m)
                .sum();
            *o = (sum + EPS).log10();
        }
    }

    /// Expands a per-band mask to per-bin gains, normalized by each bin's weight sum.
    ///
    /// Bands missing from `mask_erb` count as unity. Bins no band covers (DC and Nyquist)
    /// get unity gain.
    pub fn expand_mask(&self, mask_erb: &[f32], gains: &mut [f32]) {
        for (bin, g) in gains.iter_mut().enumerate().take(self.n_bins) {
            let denom = self.weight_sum[bin];
            if denom <= 1e-6 {
                *g = 1.0;
                continue;
            }
            let mut sum = 0.0;
            for band in 0..self.nb_erb {
                let w = self.weights[band * self.n_bins + bin];
                if w > 0.0 {
                    sum += w * mask_erb.get(band).copied().unwrap_or(1.0);
                }
            }
            *g = sum / denom;
        }
    }
}
