//! Suppression Coordinator
//!
//! Owns the lifecycle of both suppression models and decides which of them may feed the
//! chain. Loading never happens on the control thread: the frame model is loaded on a
//! short-lived loader thread, the spectral model on its inference worker. Completion is
//! picked up by [`SuppressionCoordinator::poll`], which the engine calls every tick.
//!
//! Per model, one activation attempt moves `Disabled → Loading → Ready | Failed`. A failed
//! model is reported as `Failed` for one poll and then settles back to `Disabled`, with the
//! reason kept in [`last_error`](SuppressionCoordinator::last_error).

use crate::chain::GraphCommand;
use crate::config::{EngineConfig, ModelAssets};
use crate::dsp::frame_denoiser::FrameDenoiser;
use crate::dsp::spectral::worker::{SpectralWorker, WorkerEvent};
use crate::error::{Error, Result};
use crate::model::{FrameModel, FrameModelLoader};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionState {
    Disabled,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Frame,
    Spectral,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelKind::Frame => "frame model",
            ModelKind::Spectral => "spectral model",
        })
    }
}

/// Readiness of both models, as reported by GET_STATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SuppressionStatus {
    pub frame: SuppressionState,
    pub spectral: SuppressionState,
}

struct FrameSlot {
    loader: Option<Arc<dyn FrameModelLoader>>,
    state: SuppressionState,
    pending: Option<Receiver<Result<Arc<dyn FrameModel>>>>,
    /// Loaded model kept across disable/enable.
    cached: Option<Arc<dyn FrameModel>>,
    /// A stage for `cached` has been sent to the render graph.
    installed: bool,
}

struct SpectralSlot {
    worker: Option<SpectralWorker>,
    state: SuppressionState,
}

pub struct SuppressionCoordinator {
    cfg: EngineConfig,
    assets: ModelAssets,
    graph: Sender<GraphCommand>,
    enabled: bool,
    frame: FrameSlot,
    spectral: SpectralSlot,
    last_error: Option<String>,
}

impl SuppressionCoordinator {
    /// Either model may be absent; an absent model simply never becomes ready.
    pub fn new(
        cfg: &EngineConfig,
        assets: ModelAssets,
        graph: Sender<GraphCommand>,
        frame_loader: Option<Arc<dyn FrameModelLoader>>,
        spectral_worker: Option<SpectralWorker>,
    ) -> Self {
        Self {
            cfg: cfg.clone(),
            assets,
            graph,
            enabled: false,
            frame: FrameSlot {
                loader: frame_loader,
                state: SuppressionState::Disabled,
                pending: None,
                cached: None,
                installed: false,
            },
            spectral: SpectralSlot {
                worker: spectral_worker,
                state: SuppressionState::Disabled,
            },
            last_error: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self, kind: ModelKind) -> SuppressionState {
        match kind {
            ModelKind::Frame => self.frame.state,
            ModelKind::Spectral => self.spectral.state,
        }
    }

    pub fn status(&self) -> SuppressionStatus {
        SuppressionStatus {
            frame: self.frame.state,
            spectral: self.spectral.state,
        }
    }

    pub fn frame_ready(&self) -> bool {
        self.frame.state == SuppressionState::Ready
    }

    pub fn spectral_ready(&self) -> bool {
        self.spectral.state == SuppressionState::Ready
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Enables or disables both models together.
    ///
    /// Enabling starts a load for every model that is neither loading nor ready. Disabling
    /// takes effect at once; a load still in flight completes in the background and its
    /// result is kept for the next enable but never routed. Returns whether any model
    /// stopped being ready.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        if enabled {
            self.start_frame();
            self.start_spectral();
            false
        } else {
            let was_ready = self.frame_ready() || self.spectral_ready();
            self.frame.state = SuppressionState::Disabled;
            self.spectral.state = SuppressionState::Disabled;
            info!("Noise suppression disabled");
            was_ready
        }
    }

    fn start_frame(&mut self) {
        if matches!(
            self.frame.state,
            SuppressionState::Loading | SuppressionState::Ready
        ) {
            return;
        }
        if self.frame.cached.is_some() {
            // Already loaded once; readiness is confirmed on the next poll.
            self.frame.state = SuppressionState::Loading;
            return;
        }
        let Some(loader) = self.frame.loader.clone() else {
            return;
        };
        if self.frame.pending.is_none() {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let assets = self.assets.clone();
            let spawned = std::thread::Builder::new()
                .name("speechboost-frame-loader".into())
                .spawn(move || {
                    let _ = tx.send(loader.load(&assets));
                });
            if let Err(e) = spawned {
                self.fail(ModelKind::Frame, Error::Io(e));
                return;
            }
            self.frame.pending = Some(rx);
        }
        self.frame.state = SuppressionState::Loading;
        info!("Loading frame model");
    }

    fn start_spectral(&mut self) {
        if matches!(
            self.spectral.state,
            SuppressionState::Loading | SuppressionState::Ready
        ) {
            return;
        }
        if self.spectral.worker.is_none() {
            return;
        }
        let sup = &self.cfg.suppression;
        if sup.native_rate != self.cfg.sample_rate && !sup.allow_resampling {
            let err = Error::UnsupportedSampleRate {
                required: sup.native_rate,
                actual: self.cfg.sample_rate,
            };
            self.fail(ModelKind::Spectral, err);
            return;
        }
        let Some(worker) = self.spectral.worker.as_ref() else {
            return;
        };
        match worker.load(self.assets.clone()) {
            Ok(()) => {
                self.spectral.state = SuppressionState::Loading;
                info!("Loading spectral model");
            }
            Err(e) => self.fail(ModelKind::Spectral, e),
        }
    }

    fn fail(&mut self, kind: ModelKind, err: Error) {
        warn!("{} unavailable: {}", kind, err);
        self.last_error = Some(format!("{}: {}", kind, err));
        match kind {
            ModelKind::Frame => {
                self.frame.state = SuppressionState::Failed;
                self.frame.cached = None;
                self.frame.installed = false;
            }
            ModelKind::Spectral => self.spectral.state = SuppressionState::Failed,
        }
    }

    /// Collects load results and worker events. Returns whether the set of ready models
    /// changed, in which case the caller rebuilds the chain.
    pub fn poll(&mut self) -> bool {
        let before = (self.frame_ready(), self.spectral_ready());

        // A failure is visible for exactly one poll.
        if self.frame.state == SuppressionState::Failed {
            self.frame.state = SuppressionState::Disabled;
        }
        if self.spectral.state == SuppressionState::Failed {
            self.spectral.state = SuppressionState::Disabled;
        }

        self.poll_frame();
        self.poll_spectral();

        before != (self.frame_ready(), self.spectral_ready())
    }

    fn poll_frame(&mut self) {
        if let Some(rx) = self.frame.pending.as_ref() {
            let result = match rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    Some(Err(Error::Inference("frame loader exited without a result".into())))
                }
            };
            if let Some(result) = result {
                self.frame.pending = None;
                match result {
                    Ok(model) => {
                        info!(
                            "Frame model loaded ({} samples at {} Hz)",
                            model.frame_size(),
                            model.native_rate()
                        );
                        self.frame.cached = Some(model);
                        self.frame.installed = false;
                    }
                    Err(e) => {
                        if self.frame.state == SuppressionState::Loading {
                            self.fail(ModelKind::Frame, e);
                        } else {
                            warn!("Frame model load failed after disable: {}", e);
                        }
                        return;
                    }
                }
            }
        }

        if self.frame.state != SuppressionState::Loading || self.frame.pending.is_some() {
            return;
        }
        let Some(model) = self.frame.cached.clone() else {
            return;
        };
        if !self.frame.installed {
            if let Err(e) = self.install_frame(model) {
                self.fail(ModelKind::Frame, e);
                return;
            }
            self.frame.installed = true;
        }
        self.frame.state = SuppressionState::Ready;
        info!("Frame model ready");
    }

    fn install_frame(&self, model: Arc<dyn FrameModel>) -> Result<()> {
        let stage = FrameDenoiser::new(
            model,
            &self.cfg.suppression,
            self.cfg.sample_rate,
            self.cfg.max_channels,
            self.cfg.max_block,
        )?;
        match self.graph.try_send(GraphCommand::InstallFrame(Box::new(stage))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Inference("render graph command queue full".into())),
            Err(TrySendError::Disconnected(_)) => Err(Error::WorkerDisconnected),
        }
    }

    fn poll_spectral(&mut self) {
        loop {
            let Some(event) = self.spectral.worker.as_mut().and_then(|w| w.poll_event()) else {
                return;
            };
            match event {
                WorkerEvent::Ready => {
                    if self.spectral.state == SuppressionState::Loading {
                        self.spectral.state = SuppressionState::Ready;
                        info!("Spectral model ready");
                    }
                }
                WorkerEvent::Failed(e) => {
                    if matches!(
                        self.spectral.state,
                        SuppressionState::Loading | SuppressionState::Ready
                    ) {
                        self.fail(ModelKind::Spectral, e);
                    } else {
                        warn!("Spectral model failed while disabled: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::spectral::testing::ConstMask;
    use crate::error::LoadStage;
    use crate::model::{FrameState, SpectralModel, SpectralModelLoader, SpectralShape};
    use std::time::{Duration, Instant};

    struct Passthrough;
    struct PassthroughState;

    impl FrameModel for Passthrough {
        fn frame_size(&self) -> usize {
            480
        }
        fn native_rate(&self) -> u32 {
            48000
        }
        fn new_state(&self) -> Box<dyn FrameState> {
            Box::new(PassthroughState)
        }
    }

    impl FrameState for PassthroughState {
        fn process_frame(&mut self, output: &mut [f32], input: &[f32]) {
            output.copy_from_slice(input);
        }
    }

    struct FrameLoader {
        fail: bool,
    }

    impl FrameModelLoader for FrameLoader {
        fn load(&self, _assets: &ModelAssets) -> Result<Arc<dyn FrameModel>> {
            if self.fail {
                return Err(Error::load(LoadStage::Weights, "404"));
            }
            Ok(Arc::new(Passthrough))
        }
    }

    struct SpectralLoader {
        fail_from: Option<usize>,
    }

    impl SpectralModelLoader for SpectralLoader {
        fn load(&self, _assets: &ModelAssets, _shape: SpectralShape) -> Result<Box<dyn SpectralModel>> {
            Ok(Box::new(ConstMask {
                fail_from: self.fail_from,
                ..ConstMask::unity()
            }))
        }
    }

    fn coordinator(
        frame: Option<FrameLoader>,
        spectral: Option<SpectralLoader>,
    ) -> (SuppressionCoordinator, Receiver<GraphCommand>) {
        let cfg = EngineConfig::default();
        let (tx, rx) = crossbeam_channel::bounded(8);
        let worker = spectral.map(|l| SpectralWorker::spawn(&cfg.suppression, Arc::new(l)).unwrap());
        let frame = frame.map(|l| Arc::new(l) as Arc<dyn FrameModelLoader>);
        (
            SuppressionCoordinator::new(&cfg, ModelAssets::default(), tx, frame, worker),
            rx,
        )
    }

    fn poll_until(c: &mut SuppressionCoordinator, done: impl Fn(&SuppressionCoordinator) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(c) {
            assert!(Instant::now() < deadline, "timed out, status {:?}", c.status());
            c.poll();
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_frame_model_loads_and_installs_stage() {
        let (mut c, rx) = coordinator(Some(FrameLoader { fail: false }), None);
        assert_eq!(c.state(ModelKind::Frame), SuppressionState::Disabled);
        c.set_enabled(true);
        assert_eq!(c.state(ModelKind::Frame), SuppressionState::Loading);
        poll_until(&mut c, |c| c.frame_ready());
        assert!(matches!(rx.try_recv(), Ok(GraphCommand::InstallFrame(_))));

        // Re-enabling reuses the installed stage.
        assert!(c.set_enabled(false));
        c.set_enabled(true);
        poll_until(&mut c, |c| c.frame_ready());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_frame_load_failure_settles_to_disabled() {
        let (mut c, _rx) = coordinator(Some(FrameLoader { fail: true }), None);
        c.set_enabled(true);
        poll_until(&mut c, |c| c.state(ModelKind::Frame) == SuppressionState::Failed);
        assert!(c.last_error().unwrap().contains("weights"));
        c.poll();
        assert_eq!(c.state(ModelKind::Frame), SuppressionState::Disabled);
    }

    #[test]
    fn test_unsupported_rate_fails_frame_model() {
        let cfg = EngineConfig {
            sample_rate: 44100,
            suppression: crate::config::SuppressionConfig {
                allow_resampling: false,
                ..Default::default()
            },
            ..EngineConfig::default()
        };
        let (tx, _rx) = crossbeam_channel::bounded(8);
        let loader: Arc<dyn FrameModelLoader> = Arc::new(FrameLoader { fail: false });
        let mut c = SuppressionCoordinator::new(&cfg, ModelAssets::default(), tx, Some(loader), None);
        c.set_enabled(true);
        poll_until(&mut c, |c| c.state(ModelKind::Frame) == SuppressionState::Failed);
        assert!(c.last_error().unwrap().contains("44100"));
    }

    #[test]
    fn test_unsupported_rate_fails_spectral_model() {
        let cfg = EngineConfig {
            sample_rate: 44100,
            suppression: crate::config::SuppressionConfig {
                allow_resampling: false,
                ..Default::default()
            },
            ..EngineConfig::default()
        };
        let (tx, _rx) = crossbeam_channel::bounded(8);
        let worker = SpectralWorker::spawn(&cfg.suppression, Arc::new(SpectralLoader { fail_from: None })).unwrap();
        let mut c = SuppressionCoordinator::new(&cfg, ModelAssets::default(), tx, None, Some(worker));
        c.set_enabled(true);
        assert_eq!(c.state(ModelKind::Spectral), SuppressionState::Failed);
        assert!(c.last_error().unwrap().starts_with("spectral model"));
        assert!(c.last_error().unwrap().contains("44100"));

        // Never becomes ready, even once the worker would have answered.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!c.poll());
        assert_eq!(c.state(ModelKind::Spectral), SuppressionState::Disabled);
    }

    #[test]
    fn test_spectral_ready_then_failure_streak() {
        let (mut c, _rx) = coordinator(None, Some(SpectralLoader { fail_from: Some(1) }));
        c.set_enabled(true);
        poll_until(&mut c, |c| c.spectral_ready());

        let link = c.spectral.worker.as_ref().unwrap().link();
        for id in 0..3 {
            let req = crate::dsp::spectral::worker::HopRequest {
                id,
                reset: id == 0,
                samples: vec![0.0; 480],
            };
            link.requests
                .send(crate::dsp::spectral::worker::WorkerRequest::Hop(req))
                .unwrap();
        }
        poll_until(&mut c, |c| !c.spectral_ready());
        assert_eq!(c.state(ModelKind::Spectral), SuppressionState::Failed);
        assert!(c.last_error().unwrap().starts_with("spectral model"));
    }

    #[test]
    fn test_absent_models_never_load() {
        let (mut c, _rx) = coordinator(None, None);
        c.set_enabled(true);
        assert!(!c.poll());
        assert_eq!(
            c.status(),
            SuppressionStatus {
                frame: SuppressionState::Disabled,
                spectral: SuppressionState::Disabled,
            }
        );
    }
}
