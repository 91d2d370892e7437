//! Frame-Denoiser (recurrent frame model host)
//!
//! # Perceptual Contract
//! - **Target Source**: Speech over steady background noise (fans, hum, room tone).
//! - **Intended Effect**: Broadband noise removal with one frame of added latency.
//! - **Failure Modes**:
//!   - Until the first frame completes, audio passes through unprocessed.
//!   - When the device rate differs from the model rate, the linear resampler softens
//!     the top octave slightly.
//! - **Will Not Do**:
//!   - Ever emit silence for lack of processed output; the current input is used instead.
//!
//! # Design Notes
//! Per channel, every input sample is first answered from the processed ring (or by
//! itself when the ring is empty) and then appended to the frame accumulator. A full
//! accumulator is run through the channel's model state and the result is queued. After
//! the first frame the ring never runs dry, so steady-state latency is exactly one frame.
//!
//! With resampling, the same per-sample logic runs in the model's native domain and the
//! downsampled result goes through a device-rate carry queue. The queue is primed with one
//! block plus a small margin so resampler count jitter does not starve it; an underrun
//! still backfills with input.

use crate::config::SuppressionConfig;
use crate::dsp::block::{AudioBlock, Stage};
use crate::dsp::queue::SampleQueue;
use crate::dsp::resampler::LinearResampler;
use crate::error::{Error, LoadStage, Result};
use crate::model::{FrameModel, FrameState};
use assert_no_alloc::permit_alloc;
use std::sync::Arc;

struct Resampling {
    up: LinearResampler,
    down: LinearResampler,
    /// Processed, device-rate samples not yet emitted.
    carry: SampleQueue,
    primed: bool,
}

// Extra device-rate samples held in the carry queue before it is drained.
// Increasing: more latency; decreasing: resampler count jitter causes backfill.
const CARRY_MARGIN: usize = 4;

struct FrameChannel {
    state: Option<Box<dyn FrameState>>,
    acc: Vec<f32>,
    acc_len: usize,
    frame_out: Vec<f32>,
    ring: SampleQueue,
    resampling: Option<Resampling>,
}

impl FrameChannel {
    fn reset(&mut self) {
        self.acc_len = 0;
        self.ring.clear();
        if let Some(rs) = &mut self.resampling {
            rs.up.reset();
            rs.down.reset();
            rs.carry.clear();
            rs.primed = false;
        }
    }

    /// One native-rate sample in, one out.
    #[inline]
    fn tick(&mut self, model: &dyn FrameModel, x: f32) -> f32 {
        let y = self.ring.pop().unwrap_or(x);
        self.acc[self.acc_len] = x;
        self.acc_len += 1;
        if self.acc_len == self.acc.len() {
            // Created on the first full frame; the only allocation on this path.
            let state = self
                .state
                .get_or_insert_with(|| permit_alloc(|| model.new_state()));
            state.process_frame(&mut self.frame_out, &self.acc);
            self.ring.push_slice(&self.frame_out);
            self.acc_len = 0;
        }
        y
    }
}

pub struct FrameDenoiser {
    model: Arc<dyn FrameModel>,
    enabled: bool,
    channels: Vec<FrameChannel>,
    native_buf: Vec<f32>,
    device_buf: Vec<f32>,
}

impl FrameDenoiser {
    /// Prepares per-channel buffers for `model` at the device rate.
    ///
    /// Fails with [`Error::UnsupportedSampleRate`] when the rates differ and resampling is
    /// not allowed, and with a transform load error when the model's frame does not match
    /// the configured `frame_size`. Starts disabled.
    pub fn new(
        model: Arc<dyn FrameModel>,
        cfg: &SuppressionConfig,
        device_rate: u32,
        max_channels: usize,
        max_block: usize,
    ) -> Result<Self> {
        let native_rate = model.native_rate();
        if model.frame_size() != cfg.frame_size {
            return Err(Error::load(
                LoadStage::Transform,
                format!(
                    "model frame is {} samples, configured {}",
                    model.frame_size(),
                    cfg.frame_size
                ),
            ));
        }
        let frame = model.frame_size().max(1);
        let resample = native_rate != device_rate;
        if resample && !cfg.allow_resampling {
            return Err(Error::UnsupportedSampleRate {
                required: native_rate,
                actual: device_rate,
            });
        }

        let mut native_max = max_block;
        let channels = (0..max_channels.max(1))
            .map(|_| {
                let resampling = resample.then(|| {
                    let up = LinearResampler::new(device_rate, native_rate, max_block);
                    native_max = up.max_output_len(max_block);
                    Resampling {
                        up,
                        down: LinearResampler::new(native_rate, device_rate, native_max),
                        carry: SampleQueue::new(3 * max_block + 16),
                        primed: false,
                    }
                });
                FrameChannel {
                    state: None,
                    acc: vec![0.0; frame],
                    acc_len: 0,
                    frame_out: vec![0.0; frame],
                    ring: SampleQueue::new(2 * frame),
                    resampling,
                }
            })
            .collect();

        Ok(Self {
            model,
            enabled: false,
            channels,
            native_buf: Vec::with_capacity(native_max + 4),
            device_buf: Vec::with_capacity(2 * max_block + 8),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Switching either way drops every buffered sample, so nothing queued before a
    /// disable is ever played after the next enable.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.reset();
        }
    }

    pub fn frame_size(&self) -> usize {
        self.model.frame_size()
    }

    pub fn native_rate(&self) -> u32 {
        self.model.native_rate()
    }
}

impl Stage for FrameDenoiser {
    fn process(&mut self, block: &mut AudioBlock) {
        if !self.enabled {
            return;
        }
        let model = self.model.as_ref();
        let channels = block.channels().min(self.channels.len());
        for ch in 0..channels {
            let chan = &mut self.channels[ch];
            let samples = block.channel_mut(ch);

            if chan.resampling.is_none() {
                for s in samples.iter_mut() {
                    *s = chan.tick(model, *s);
                }
                continue;
            }

            let native = &mut self.native_buf;
            let device = &mut self.device_buf;
            native.clear();
            device.clear();
            if let Some(rs) = chan.resampling.as_mut() {
                rs.up.process(samples, native);
            }
            for v in native.iter_mut() {
                *v = chan.tick(model, *v);
            }
            if let Some(rs) = chan.resampling.as_mut() {
                rs.down.process(native, device);
                rs.carry.push_slice(device);
                if !rs.primed {
                    if rs.carry.len() < samples.len() + CARRY_MARGIN {
                        continue;
                    }
                    rs.primed = true;
                }
                for s in samples.iter_mut() {
                    if let Some(y) = rs.carry.pop() {
                        *s = y;
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        for chan in &mut self.channels {
            chan.reset();
        }
    }
}
