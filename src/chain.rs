//! Signal Chain
//!
//! The chain is a fixed pipeline of owned stages with one selectable head:
//!
//! ```text
//! sources → [head: spectral | frame | (none)] → gain → [clarity] → limiter → output
//!                                                                          └→ measurement tap
//! ```
//!
//! The control plane decides the route ([`RoutePlan`]) and sends it to the
//! [`RenderGraph`], which applies it between render quanta. Applying a plan is idempotent;
//! a suppressor that leaves the route is reset.

use crate::config::{EngineConfig, TapConfig};
use crate::dsp::biquad::{Biquad, FilterShape};
use crate::dsp::block::{AudioBlock, Stage};
use crate::dsp::clarity::ClarityStack;
use crate::dsp::frame_denoiser::FrameDenoiser;
use crate::dsp::limiter::Limiter;
use crate::dsp::spectral::suppressor::SpectralSuppressor;
use crate::dsp::utils::time_constant_coeff;
use crate::meters::Meters;
use crate::render_log::RenderLogWriter;
use assert_no_alloc::permit_alloc;
use crossbeam_channel::Receiver;
use ringbuf::{Consumer, Producer, RingBuffer};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Routing
// =============================================================================

/// First stage that receives tapped audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Head {
    /// No suppressor; sources feed the gain stage directly.
    Gain,
    Frame,
    Spectral,
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Head::Gain => "gain",
            Head::Frame => "frame-denoiser",
            Head::Spectral => "spectral-denoiser",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Raw,
    ClarityOnly,
    Suppressed,
    SuppressedClarity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePlan {
    pub head: Head,
    pub clarity: bool,
}

impl Default for RoutePlan {
    fn default() -> Self {
        Self {
            head: Head::Gain,
            clarity: false,
        }
    }
}

impl RoutePlan {
    /// Head priority: a ready spectral model, then a ready frame model, then bare gain.
    pub fn select(spectral_ready: bool, frame_ready: bool, clarity: bool) -> Self {
        let head = if spectral_ready {
            Head::Spectral
        } else if frame_ready {
            Head::Frame
        } else {
            Head::Gain
        };
        Self { head, clarity }
    }

    pub fn state(&self) -> ChainState {
        match (self.head != Head::Gain, self.clarity) {
            (false, false) => ChainState::Raw,
            (false, true) => ChainState::ClarityOnly,
            (true, false) => ChainState::Suppressed,
            (true, true) => ChainState::SuppressedClarity,
        }
    }
}

/// Control → render messages. Applied at the start of the next render quantum.
pub enum GraphCommand {
    Rebuild(RoutePlan),
    /// Replaces the frame-denoiser stage (built off the render thread).
    InstallFrame(Box<FrameDenoiser>),
}

// =============================================================================
// Gain
// =============================================================================

/// Applies the shared target gain with a one-pole ramp so changes never click.
pub struct GainStage {
    meters: Arc<Meters>,
    current: f32,
    coeff: f32,
}

impl GainStage {
    pub fn new(meters: Arc<Meters>, smoothing_ms: f32, sample_rate: f32) -> Self {
        Self {
            current: meters.target_gain(),
            meters,
            coeff: time_constant_coeff(smoothing_ms, sample_rate),
        }
    }

    pub fn current(&self) -> f32 {
        self.current
    }
}

impl Stage for GainStage {
    fn process(&mut self, block: &mut AudioBlock) {
        let target = self.meters.target_gain();
        for i in 0..block.frames() {
            self.current = self.coeff * self.current + (1.0 - self.coeff) * target;
            block.scale_frame(i, self.current);
        }
    }

    fn reset(&mut self) {
        self.current = self.meters.target_gain();
    }
}

// =============================================================================
// Measurement tap
// =============================================================================

/// Speech-band (high-pass + low-pass) copy of the output, pushed to the control plane.
pub struct MeasurementTap {
    highpass: Biquad,
    lowpass: Biquad,
    mono: Vec<f32>,
    prod: Producer<f32>,
}

/// Control-side reader keeping the most recent `window` tap samples.
pub struct TapReader {
    cons: Consumer<f32>,
    window: Vec<f32>,
    pos: usize,
    filled: usize,
}

pub fn measurement_tap(cfg: &TapConfig, sample_rate: f32, max_block: usize) -> (MeasurementTap, TapReader) {
    let (prod, cons) = RingBuffer::<f32>::new(cfg.capacity.max(max_block)).split();
    (
        MeasurementTap {
            highpass: Biquad::designed(FilterShape::HighPass, cfg.low_hz, 0.707, sample_rate),
            lowpass: Biquad::designed(FilterShape::LowPass, cfg.high_hz, 0.707, sample_rate),
            mono: vec![0.0; max_block],
            prod,
        },
        TapReader {
            cons,
            window: vec![0.0; cfg.window.max(1)],
            pos: 0,
            filled: 0,
        },
    )
}

impl MeasurementTap {
    pub fn process(&mut self, block: &AudioBlock) {
        let n = block.frames().min(self.mono.len());
        block.downmix_into(&mut self.mono[..n]);
        for s in &mut self.mono[..n] {
            *s = self.lowpass.process(self.highpass.process(*s));
        }
        // Drops what does not fit; the reader only needs the most recent window.
        self.prod.push_slice(&self.mono[..n]);
    }
}

impl TapReader {
    /// Pulls new samples into the window. Returns the window RMS, or `None` when no new
    /// samples arrived since the last call.
    pub fn read_rms(&mut self) -> Option<f32> {
        let mut fresh = 0usize;
        while let Some(s) = self.cons.pop() {
            self.window[self.pos] = s;
            self.pos = (self.pos + 1) % self.window.len();
            fresh += 1;
        }
        if fresh == 0 {
            return None;
        }
        self.filled = (self.filled + fresh).min(self.window.len());
        let sum: f32 = if self.filled == self.window.len() {
            self.window.iter().map(|s| s * s).sum()
        } else {
            // Not wrapped yet: the valid samples are the first `filled`.
            self.window[..self.filled].iter().map(|s| s * s).sum()
        };
        Some((sum / self.filled as f32).sqrt())
    }
}

// =============================================================================
// Render graph
// =============================================================================

/// The data plane. Moved to the real-time thread; `render` never blocks and never
/// allocates in steady state.
pub struct RenderGraph {
    commands: Receiver<GraphCommand>,
    plan: RoutePlan,
    block: AudioBlock,
    frame: Option<Box<FrameDenoiser>>,
    spectral: Option<SpectralSuppressor>,
    gain: GainStage,
    clarity: ClarityStack,
    limiter: Limiter,
    tap: MeasurementTap,
    meters: Arc<Meters>,
    log: RenderLogWriter,
    report_every: usize,
    since_report: usize,
    underrun_samples: u64,
    dropped_hops: u64,
    disconnect_logged: bool,
}

pub(crate) struct GraphParts {
    pub commands: Receiver<GraphCommand>,
    pub spectral: Option<SpectralSuppressor>,
    pub tap: MeasurementTap,
    pub meters: Arc<Meters>,
    pub log: RenderLogWriter,
}

impl RenderGraph {
    pub(crate) fn new(cfg: &EngineConfig, parts: GraphParts) -> Self {
        let sr = cfg.sample_rate as f32;
        Self {
            commands: parts.commands,
            plan: RoutePlan::default(),
            block: AudioBlock::new(cfg.max_channels, cfg.max_block),
            frame: None,
            spectral: parts.spectral,
            gain: GainStage::new(parts.meters.clone(), cfg.gain_smoothing_ms, sr),
            clarity: ClarityStack::new(&cfg.clarity, cfg.max_channels, sr),
            limiter: Limiter::new(cfg.output_limiter, sr),
            tap: parts.tap,
            meters: parts.meters,
            log: parts.log,
            report_every: cfg.sample_rate as usize,
            since_report: 0,
            underrun_samples: 0,
            dropped_hops: 0,
            disconnect_logged: false,
        }
    }

    /// Route currently applied on the render side.
    pub fn route(&self) -> RoutePlan {
        self.plan
    }

    /// Processes one render quantum of planar audio. Output channels beyond the input's
    /// receive the last processed channel; output beyond the input length is zeroed.
    pub fn render(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        self.apply_commands();

        let frames = inputs.iter().map(|c| c.len()).min().unwrap_or(0);
        let step = self.block.capacity().max(1);
        let mut offset = 0;
        let mut peak = 0.0f32;
        while offset < frames {
            let len = (frames - offset).min(step);
            self.block.load_from(inputs, offset, len);
            self.process_block();
            for ch in 0..self.block.channels() {
                for s in self.block.channel(ch) {
                    peak = peak.max(s.abs());
                }
            }
            self.block.store_into(outputs, offset);
            offset += len;
        }
        for out in outputs.iter_mut() {
            let n = frames.min(out.len());
            out[n..].fill(0.0);
        }

        self.meters.set_output_peak(peak);
        self.meters
            .set_limiter_reduction_db(self.limiter.gain_reduction_db());
        self.meters.add_rendered_frames(frames as u64);
        self.report(frames);
    }

    fn apply_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                GraphCommand::Rebuild(plan) => self.apply_plan(plan),
                GraphCommand::InstallFrame(mut frame) => {
                    frame.set_enabled(self.plan.head == Head::Frame);
                    let old = self.frame.replace(frame);
                    // Freeing the replaced stage is the only deallocation on this thread.
                    permit_alloc(|| drop(old));
                    self.log.info(format_args!("frame-denoiser stage installed"));
                }
            }
        }
    }

    fn apply_plan(&mut self, plan: RoutePlan) {
        if plan == self.plan {
            return;
        }
        if let Some(frame) = self.frame.as_mut() {
            frame.set_enabled(plan.head == Head::Frame);
        }
        if let Some(spectral) = self.spectral.as_mut() {
            spectral.set_enabled(plan.head == Head::Spectral);
        }
        if plan.clarity && !self.plan.clarity {
            self.clarity.reset();
        }
        self.plan = plan;
        self.log.info(format_args!(
            "route applied: head={} clarity={}",
            plan.head, plan.clarity
        ));
    }

    fn process_block(&mut self) {
        // At most one suppressor is enabled; a disabled one is pass-through.
        if let Some(spectral) = self.spectral.as_mut() {
            spectral.process(&mut self.block);
        }
        if let Some(frame) = self.frame.as_mut() {
            frame.process(&mut self.block);
        }
        self.gain.process(&mut self.block);
        if self.plan.clarity {
            self.clarity.process(&mut self.block);
        }
        self.limiter.process(&mut self.block);
        self.tap.process(&self.block);
    }

    fn report(&mut self, frames: usize) {
        if let Some(spectral) = self.spectral.as_mut() {
            self.underrun_samples += spectral.take_underrun_samples();
            self.dropped_hops += spectral.take_dropped_hops();
            if spectral.is_disconnected() && !self.disconnect_logged {
                self.disconnect_logged = true;
                self.log
                    .warn(format_args!("spectral worker gone, passing audio through"));
            }
        }

        self.since_report += frames;
        if self.since_report < self.report_every {
            return;
        }
        self.since_report = 0;
        if self.underrun_samples > 0 || self.dropped_hops > 0 {
            self.log.warn(format_args!(
                "spectral output short by {} samples, {} hops dropped",
                self.underrun_samples, self.dropped_hops
            ));
            self.underrun_samples = 0;
            self.dropped_hops = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_log::render_log;

    fn graph(cfg: &EngineConfig) -> (RenderGraph, crossbeam_channel::Sender<GraphCommand>, TapReader, Arc<Meters>) {
        let (tx, rx) = crossbeam_channel::bounded(8);
        let (tap, reader) = measurement_tap(&cfg.tap, cfg.sample_rate as f32, cfg.max_block);
        let (log, _) = render_log(16);
        let meters = Arc::new(Meters::new(1.0));
        let g = RenderGraph::new(
            cfg,
            GraphParts {
                commands: rx,
                spectral: None,
                tap,
                meters: meters.clone(),
                log,
            },
        );
        (g, tx, reader, meters)
    }

    #[test]
    fn test_route_priority_and_state() {
        assert_eq!(RoutePlan::select(true, true, false).head, Head::Spectral);
        assert_eq!(RoutePlan::select(false, true, true).head, Head::Frame);
        assert_eq!(RoutePlan::select(false, false, true).state(), ChainState::ClarityOnly);
        assert_eq!(RoutePlan::select(false, false, false).state(), ChainState::Raw);
        assert_eq!(RoutePlan::select(true, false, true).state(), ChainState::SuppressedClarity);
        assert_eq!(RoutePlan::select(false, true, false).state(), ChainState::Suppressed);
    }

    #[test]
    fn test_gain_ramps_toward_target() {
        let meters = Arc::new(Meters::new(1.0));
        let mut g = GainStage::new(meters.clone(), 15.0, 48000.0);
        meters.set_target_gain(0.0);
        let mut block = AudioBlock::new(1, 128);
        block.set_layout(1, 128);
        block.fill(1.0);
        g.process(&mut block);
        let out = block.channel(0);
        assert!(out[0] > 0.99);
        assert!(out.windows(2).all(|w| w[1] <= w[0]));
        for _ in 0..100 {
            block.fill(1.0);
            g.process(&mut block);
        }
        assert!(g.current() < 1e-4);
    }

    #[test]
    fn test_rebuild_is_applied_between_quanta() {
        let cfg = EngineConfig::default();
        let (mut g, tx, _, _) = graph(&cfg);
        let input = [0.1f32; 128];
        let mut out = [0.0f32; 128];

        let plan = RoutePlan::select(false, false, true);
        tx.send(GraphCommand::Rebuild(plan)).ok();
        tx.send(GraphCommand::Rebuild(plan)).ok();
        g.render(&[&input[..]], &mut [&mut out[..]]);
        assert_eq!(g.route().state(), ChainState::ClarityOnly);
    }

    #[test]
    fn test_output_limited_and_tap_fed() {
        let cfg = EngineConfig::default();
        let (mut g, _, mut reader, meters) = graph(&cfg);
        meters.set_target_gain(6.0);
        assert!(reader.read_rms().is_none());

        let mut phase = 0.0f32;
        for _ in 0..200 {
            let input: Vec<f32> = (0..128)
                .map(|_| {
                    phase += 2.0 * std::f32::consts::PI * 1000.0 / 48000.0;
                    0.5 * phase.sin()
                })
                .collect();
            let mut l = vec![0.0; 128];
            let mut r = vec![0.0; 128];
            g.render(&[&input[..]], &mut [&mut l[..], &mut r[..]]);
            assert!(l.iter().all(|s| s.abs() <= 1.0));
            assert_eq!(l, r);
        }
        let rms = reader.read_rms().unwrap();
        assert!(rms > 0.3, "tap rms {}", rms);
        assert!(meters.limiter_reduction_db() > 1.0);
        assert_eq!(meters.rendered_frames(), 200 * 128);
    }

    #[test]
    fn test_long_quantum_is_split_and_tail_zeroed() {
        let cfg = EngineConfig {
            max_block: 64,
            ..EngineConfig::default()
        };
        let (mut g, _, _, _) = graph(&cfg);
        let input = [0.2f32; 200];
        let mut out = [9.0f32; 256];
        g.render(&[&input[..]], &mut [&mut out[..]]);
        assert!(out[..200].iter().all(|s| s.abs() > 0.0 && s.abs() <= 0.2 + 1e-6));
        assert!(out[200..].iter().all(|s| *s == 0.0));
    }
}
