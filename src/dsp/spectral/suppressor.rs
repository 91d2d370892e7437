//! Render-thread side of the spectral pipeline.
//!
//! Input is folded to mono, brought to the model rate, cut into hops and handed to the
//! worker. Processed hops come back in order and are queued; once `prime_hops` hops are
//! queued the stage starts playing them. Any shortfall is filled with the current input,
//! never with silence. The mono result is written to every channel.
//!
//! The synthesis runs one hop behind, so the answer to any hop that restarted the worker's
//! analysis state holds nothing but the zeroed history and is discarded. A restart is
//! requested after every enable and after every gap in the submitted stream.

use super::worker::{HopRequest, HopResult, WorkerLink, WorkerRequest};
use crate::config::SuppressionConfig;
use crate::dsp::block::{AudioBlock, Stage};
use crate::dsp::queue::SampleQueue;
use crate::dsp::resampler::LinearResampler;
use crossbeam_channel::{TryRecvError, TrySendError};

// Extra device-rate samples held before the carry queue is drained.
// Increasing: more latency; decreasing: resampler jitter causes backfill.
const CARRY_MARGIN: usize = 4;

struct Resampling {
    up: LinearResampler,
    down: LinearResampler,
    carry: SampleQueue,
    primed: bool,
}

pub struct SpectralSuppressor {
    link: WorkerLink,
    hop: usize,
    enabled: bool,
    disconnected: bool,

    pool: Vec<Vec<f32>>,
    filling: Option<Vec<f32>>,
    next_id: u64,
    /// Results with a smaller id belong to a previous activation.
    watermark: u64,
    fresh: bool,
    /// Set while input is being dropped for lack of a free hop buffer.
    starved: bool,

    out: SampleQueue,
    prime_len: usize,
    primed: bool,
    resampling: Option<Resampling>,

    mono: Vec<f32>,
    native: Vec<f32>,
    processed: Vec<f32>,
    device: Vec<f32>,

    underrun_samples: u64,
    dropped_hops: u64,
}

impl SpectralSuppressor {
    pub fn new(link: WorkerLink, cfg: &SuppressionConfig, device_rate: u32, max_block: usize) -> Self {
        let hop = cfg.hop_size.max(1);
        let pool_size = link.pool_size;
        let mut pool = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            pool.push(Vec::with_capacity(hop));
        }

        let mut native_max = max_block;
        let resampling = (cfg.native_rate != device_rate).then(|| {
            let up = LinearResampler::new(device_rate, cfg.native_rate, max_block);
            native_max = up.max_output_len(max_block);
            Resampling {
                up,
                down: LinearResampler::new(cfg.native_rate, device_rate, native_max),
                carry: SampleQueue::new(3 * max_block + 16),
                primed: false,
            }
        });

        Self {
            link,
            hop,
            enabled: false,
            disconnected: false,
            pool,
            filling: None,
            next_id: 0,
            watermark: 0,
            fresh: true,
            starved: false,
            out: SampleQueue::new((pool_size + cfg.prime_hops + 2) * hop + native_max),
            prime_len: cfg.prime_hops * hop,
            primed: false,
            resampling,
            mono: vec![0.0; max_block],
            native: Vec::with_capacity(native_max + 4),
            processed: vec![0.0; native_max + 4],
            device: Vec::with_capacity(2 * max_block + 8),
            underrun_samples: 0,
            dropped_hops: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stops (or starts) consuming worker output. Either way all buffered audio is
    /// dropped and results still in flight are discarded when they arrive.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.reset();
        }
    }

    /// True once the worker side of the channel is gone.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Samples backfilled with input since the last call.
    pub fn take_underrun_samples(&mut self) -> u64 {
        std::mem::take(&mut self.underrun_samples)
    }

    /// Hops that could not be submitted since the last call. A run of input dropped
    /// because every hop buffer was in flight counts once.
    pub fn take_dropped_hops(&mut self) -> u64 {
        std::mem::take(&mut self.dropped_hops)
    }

    fn recycle(&mut self, mut buf: Vec<f32>) {
        buf.clear();
        if self.pool.len() < self.pool.capacity() {
            self.pool.push(buf);
        }
    }

    fn collect_results(&mut self) {
        loop {
            match self.link.results.try_recv() {
                Ok(HopResult { id, reset, samples }) => {
                    if self.enabled && id >= self.watermark && !reset {
                        self.out.push_slice(&samples);
                    }
                    self.recycle(samples);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }

    fn submit(&mut self, samples: Vec<f32>) {
        let (id, reset) = (self.next_id, self.fresh);
        let req = HopRequest { id, reset, samples };
        match self.link.requests.try_send(WorkerRequest::Hop(req)) {
            Ok(()) => {
                self.next_id += 1;
                self.fresh = false;
            }
            Err(TrySendError::Full(WorkerRequest::Hop(req))) => {
                self.dropped_hops += 1;
                // The worker's overlap state no longer matches the stream.
                self.fresh = true;
                self.recycle(req.samples);
            }
            Err(TrySendError::Disconnected(WorkerRequest::Hop(req))) => {
                self.disconnected = true;
                self.recycle(req.samples);
            }
            Err(_) => {}
        }
    }

    fn feed(&mut self, samples: &[f32]) {
        for &x in samples {
            if self.filling.is_none() {
                self.filling = self.pool.pop();
            }
            let Some(buf) = self.filling.as_mut() else {
                // Every buffer is in flight: the worker is far behind. The hop after the
                // gap starts a new analysis.
                if !self.starved {
                    self.starved = true;
                    self.dropped_hops += 1;
                }
                self.fresh = true;
                continue;
            };
            self.starved = false;
            buf.push(x);
            if buf.len() == self.hop {
                if let Some(full) = self.filling.take() {
                    self.submit(full);
                }
            }
        }
    }

    /// Pops `len` processed native-rate samples, backfilling from `fallback`.
    fn drain_native(&mut self, fallback: &[f32]) {
        let len = fallback.len();
        let got = self.out.pop_into(&mut self.processed[..len]);
        if got < len {
            self.processed[got..len].copy_from_slice(&fallback[got..]);
            self.underrun_samples += (len - got) as u64;
        }
    }
}

impl Stage for SpectralSuppressor {
    fn process(&mut self, block: &mut AudioBlock) {
        self.collect_results();
        if !self.enabled || self.disconnected {
            return;
        }

        let n = block.frames().min(self.mono.len());
        block.downmix_into(&mut self.mono[..n]);

        let mut native = std::mem::take(&mut self.native);
        native.clear();
        match self.resampling.as_mut() {
            Some(rs) => {
                rs.up.process(&self.mono[..n], &mut native);
            }
            None => native.extend_from_slice(&self.mono[..n]),
        }
        self.feed(&native);
        self.collect_results();

        if !self.primed {
            if self.out.len() < self.prime_len {
                self.native = native;
                return;
            }
            self.primed = true;
        }

        self.drain_native(&native);
        let m = native.len();
        self.native = native;

        let mono = &mut self.mono[..n];
        match self.resampling.as_mut() {
            None => mono.copy_from_slice(&self.processed[..n]),
            Some(rs) => {
                self.device.clear();
                rs.down.process(&self.processed[..m], &mut self.device);
                rs.carry.push_slice(&self.device);
                if !rs.primed {
                    if rs.carry.len() < n + CARRY_MARGIN {
                        return;
                    }
                    rs.primed = true;
                }
                let got = rs.carry.pop_into(mono);
                // Unfilled tail keeps the downmixed input.
                self.underrun_samples += (n - got) as u64;
            }
        }

        for ch in 0..block.channels() {
            block.channel_mut(ch)[..n].copy_from_slice(&self.mono[..n]);
        }
    }

    fn reset(&mut self) {
        self.watermark = self.next_id;
        self.fresh = true;
        self.starved = false;
        self.primed = false;
        self.out.clear();
        if let Some(buf) = self.filling.take() {
            self.recycle(buf);
        }
        if let Some(rs) = self.resampling.as_mut() {
            rs.up.reset();
            rs.down.reset();
            rs.carry.clear();
            rs.primed = false;
        }
    }
}
