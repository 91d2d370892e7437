//! Planar audio block shared by every render stage.
//!
//! Storage is allocated once for `max_channels * capacity` samples; a render quantum only
//! changes the active channel/frame counts.

/// Planar (non-interleaved) audio block processed in place by the chain.
#[derive(Clone, Debug)]
pub struct AudioBlock {
    data: Vec<f32>,
    max_channels: usize,
    capacity: usize,
    channels: usize,
    frames: usize,
}

impl AudioBlock {
    pub fn new(max_channels: usize, capacity: usize) -> Self {
        let max_channels = max_channels.max(1);
        Self {
            data: vec![0.0; max_channels * capacity],
            max_channels,
            capacity,
            channels: max_channels,
            frames: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sets the active layout, clamped to the allocated storage.
    pub fn set_layout(&mut self, channels: usize, frames: usize) {
        self.channels = channels.clamp(1, self.max_channels);
        self.frames = frames.min(self.capacity);
    }

    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.capacity;
        &self.data[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.capacity;
        &mut self.data[start..start + self.frames]
    }

    /// Copies planar input in; extra input channels are ignored, and the frame count is
    /// the shortest input channel (clamped to capacity).
    pub fn load(&mut self, input: &[&[f32]]) {
        let frames = input.iter().map(|c| c.len()).min().unwrap_or(0);
        self.load_from(input, 0, frames);
    }

    /// Copies `frames` samples starting at `offset` of every input channel.
    pub fn load_from(&mut self, input: &[&[f32]], offset: usize, frames: usize) {
        self.set_layout(input.len(), frames);
        for ch in 0..self.channels.min(input.len()) {
            let frames = self.frames;
            self.channel_mut(ch)
                .copy_from_slice(&input[ch][offset..offset + frames]);
        }
    }

    /// Copies the block out. Output channels beyond the block's channel count receive the
    /// last block channel (mono fan-out); output samples beyond `frames` are zeroed.
    pub fn store(&self, output: &mut [&mut [f32]]) {
        for out in output.iter_mut() {
            let n = self.frames.min(out.len());
            out[n..].fill(0.0);
        }
        self.store_into(output, 0);
    }

    /// Writes the block to `output[..][offset..offset + frames]`, fanning out like
    /// [`store`](Self::store) but leaving samples outside that range untouched.
    pub fn store_into(&self, output: &mut [&mut [f32]], offset: usize) {
        for (ch, out) in output.iter_mut().enumerate() {
            let src = self.channel(ch.min(self.channels - 1));
            let end = (offset + src.len()).min(out.len());
            if end > offset {
                out[offset..end].copy_from_slice(&src[..end - offset]);
            }
        }
    }

    pub fn fill(&mut self, value: f32) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(value);
        }
    }

    /// Largest absolute sample across channels at frame `i` (stereo-linked detection).
    #[inline]
    pub fn linked_abs(&self, i: usize) -> f32 {
        let mut m = 0.0f32;
        for ch in 0..self.channels {
            m = m.max(self.data[ch * self.capacity + i].abs());
        }
        m
    }

    /// Multiplies every channel at frame `i` by `gain`.
    #[inline]
    pub fn scale_frame(&mut self, i: usize, gain: f32) {
        for ch in 0..self.channels {
            self.data[ch * self.capacity + i] *= gain;
        }
    }

    /// Averages the active channels into `out[..frames]`.
    pub fn downmix_into(&self, out: &mut [f32]) {
        let n = self.frames.min(out.len());
        out[..n].copy_from_slice(&self.channel(0)[..n]);
        if self.channels > 1 {
            for ch in 1..self.channels {
                let src = self.channel(ch);
                for i in 0..n {
                    out[i] += src[i];
                }
            }
            let inv = 1.0 / self.channels as f32;
            for v in &mut out[..n] {
                *v *= inv;
            }
        }
    }
}

/// A processing stage of the signal chain. Processes the block in place.
pub trait Stage: Send {
    fn process(&mut self, block: &mut AudioBlock);

    /// Clears all streaming state (filter memory, envelopes, queues).
    fn reset(&mut self);
}
