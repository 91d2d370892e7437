//! Streaming linear-interpolation resampler.
//!
//! Keeps the fractional read position and the unconsumed input tail between calls, so a
//! stream cut into arbitrary blocks resamples exactly as if it were processed whole.
//! Quality is modest; it only bridges device rate and a model's native rate.

pub struct LinearResampler {
    in_rate: u32,
    out_rate: u32,
    /// Input samples advanced per output sample.
    step: f64,
    buf: Vec<f32>,
    len: usize,
    pos: f64,
}

impl LinearResampler {
    /// `max_block` sizes the internal buffer so blocks up to that length never reallocate.
    pub fn new(in_rate: u32, out_rate: u32, max_block: usize) -> Self {
        Self {
            in_rate,
            out_rate,
            step: in_rate as f64 / out_rate.max(1) as f64,
            buf: vec![0.0; max_block + 4],
            len: 0,
            pos: 0.0,
        }
    }

    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    /// Upper bound on output produced for `input_len` new samples.
    pub fn max_output_len(&self, input_len: usize) -> usize {
        ((input_len + self.len) as f64 / self.step).ceil() as usize + 2
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.pos = 0.0;
    }

    /// Resamples `input`, appending to `out`. Returns the number of samples appended.
    ///
    /// `out` should have spare capacity of at least [`max_output_len`](Self::max_output_len)
    /// to stay allocation-free.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> usize {
        self.append(input);

        let start = out.len();
        while self.pos + 1.0 < self.len as f64 {
            let idx = self.pos as usize;
            let frac = (self.pos - idx as f64) as f32;
            let a = self.buf[idx];
            let b = self.buf[idx + 1];
            out.push(a + (b - a) * frac);
            self.pos += self.step;
        }

        let consumed = (self.pos as usize).min(self.len);
        if consumed > 0 {
            self.buf.copy_within(consumed..self.len, 0);
            self.len -= consumed;
            self.pos -= consumed as f64;
        }
        out.len() - start
    }

    fn append(&mut self, input: &[f32]) {
        let needed = self.len + input.len();
        if self.buf.len() < needed {
            self.buf.resize(needed.max(self.buf.len() * 2), 0.0);
        }
        self.buf[self.len..needed].copy_from_slice(input);
        self.len = needed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_count_tracks_ratio() {
        let mut up = LinearResampler::new(44100, 48000, 128);
        let mut out = Vec::with_capacity(1 << 16);
        let mut total_in = 0usize;
        for _ in 0..300 {
            up.process(&[0.0; 128], &mut out);
            total_in += 128;
        }
        let expected = total_in as f64 * 48000.0 / 44100.0;
        assert!((out.len() as f64 - expected).abs() <= 2.0);
    }

    #[test]
    fn test_block_split_matches_whole() {
        let signal: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut whole = LinearResampler::new(48000, 44100, 1000);
        let mut a = Vec::new();
        whole.process(&signal, &mut a);

        let mut split = LinearResampler::new(48000, 44100, 128);
        let mut b = Vec::new();
        for chunk in signal.chunks(37) {
            split.process(chunk, &mut b);
        }

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_interpolates_ramp_exactly() {
        let ramp: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let mut r = LinearResampler::new(1, 2, 64);
        let mut out = Vec::new();
        r.process(&ramp, &mut out);
        for (k, v) in out.iter().enumerate() {
            assert!((v - k as f32 * 0.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut r = LinearResampler::new(48000, 44100, 64);
        let mut out = Vec::new();
        r.process(&[1.0; 10], &mut out);
        r.reset();
        out.clear();
        r.process(&[0.0; 10], &mut out);
        assert!(out.iter().all(|v| *v == 0.0));
    }
}
