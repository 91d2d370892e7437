//! The engine: one context object owning the whole control plane.
//!
//! [`EngineBuilder::build`] returns the [`Engine`] (control thread) and the
//! [`RenderGraph`] (real-time thread). The host then:
//!
//! - feeds commands through [`Engine::handle_command`] / [`Engine::handle_json`],
//! - forwards media notifications through [`Engine::media_event`],
//! - calls [`Engine::tick`] every [`Engine::tick_interval`],
//! - calls [`RenderGraph::render`] from its audio callback.

use crate::autogain::{AutoGainController, GainState};
use crate::chain::{measurement_tap, GraphCommand, GraphParts, Head, RenderGraph, RoutePlan, TapReader};
use crate::commands::{shortcut, Command, Response, StateSnapshot};
use crate::config::{EngineConfig, ModelAssets, Settings, UiPosition};
use crate::coordinator::SuppressionCoordinator;
use crate::dsp::spectral::suppressor::SpectralSuppressor;
use crate::dsp::spectral::worker::SpectralWorker;
use crate::error::Result;
use crate::meters::Meters;
use crate::model::{FrameModelLoader, SpectralModelLoader};
use crate::registry::{MediaElementId, MediaEvent, MediaTapper, SourceRegistry};
use crate::render_log::{render_log, RenderLogReader};
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Run state of the host's audio context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Suspended,
    Closed,
}

pub struct EngineBuilder {
    config: EngineConfig,
    settings: Settings,
    assets: ModelAssets,
    frame_loader: Option<Arc<dyn FrameModelLoader>>,
    spectral_loader: Option<Arc<dyn SpectralModelLoader>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            settings: Settings::default(),
            assets: ModelAssets::default(),
            frame_loader: None,
            spectral_loader: None,
        }
    }

    /// Persisted settings to start from.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn assets(mut self, assets: ModelAssets) -> Self {
        self.assets = assets;
        self
    }

    pub fn frame_loader(mut self, loader: Arc<dyn FrameModelLoader>) -> Self {
        self.frame_loader = Some(loader);
        self
    }

    pub fn spectral_loader(mut self, loader: Arc<dyn SpectralModelLoader>) -> Self {
        self.spectral_loader = Some(loader);
        self
    }

    /// Builds both planes. Fails only if the spectral worker thread cannot be spawned.
    pub fn build(self, tapper: Box<dyn MediaTapper>) -> Result<(Engine, RenderGraph)> {
        let cfg = self.config;
        let gain = GainState::new(&cfg, &self.settings);
        let meters = Arc::new(Meters::new(gain.effective()));

        let (graph_tx, graph_rx) = crossbeam_channel::bounded(cfg.command_capacity.max(2));
        let (tap, tap_reader) = measurement_tap(&cfg.tap, cfg.sample_rate as f32, cfg.max_block);
        let (log_writer, log_reader) = render_log(cfg.render_log_capacity);

        let worker = self
            .spectral_loader
            .map(|loader| SpectralWorker::spawn(&cfg.suppression, loader))
            .transpose()?;
        let spectral = worker
            .as_ref()
            .map(|w| SpectralSuppressor::new(w.link(), &cfg.suppression, cfg.sample_rate, cfg.max_block));

        let graph = RenderGraph::new(
            &cfg,
            GraphParts {
                commands: graph_rx,
                spectral,
                tap,
                meters: meters.clone(),
                log: log_writer,
            },
        );

        let coordinator =
            SuppressionCoordinator::new(&cfg, self.assets, graph_tx.clone(), self.frame_loader, worker);

        let mut engine = Engine {
            autogain: AutoGainController::new(cfg.autogain.clone()),
            cfg,
            gain,
            clarity: false,
            coordinator,
            registry: SourceRegistry::new(tapper),
            graph_tx,
            plan: RoutePlan::default(),
            meters,
            tap: tap_reader,
            render_log: log_reader,
            run_state: RunState::Running,
            resume_requested: false,
            ui_position: self.settings.ui_position,
        };
        engine.set_clarity(self.settings.clarity_enabled);
        engine.publish_gain();
        info!(
            "Engine ready at {} Hz (boost {:.1}, clarity {}, muted {})",
            engine.cfg.sample_rate,
            engine.gain.boost(),
            engine.clarity,
            engine.gain.muted()
        );
        Ok((engine, graph))
    }
}

pub struct Engine {
    cfg: EngineConfig,
    gain: GainState,
    autogain: AutoGainController,
    clarity: bool,
    coordinator: SuppressionCoordinator,
    registry: SourceRegistry,
    graph_tx: Sender<GraphCommand>,
    /// Route last sent to the render graph.
    plan: RoutePlan,
    meters: Arc<Meters>,
    tap: TapReader,
    render_log: RenderLogReader,
    run_state: RunState,
    resume_requested: bool,
    ui_position: Option<UiPosition>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(self.autogain.hop_ms().max(1.0) * 0.001)
    }

    pub fn handle_command(&mut self, cmd: Command) -> Response {
        debug!("Command {:?}", cmd);
        if cmd.is_audible() && self.run_state == RunState::Suspended {
            self.resume_requested = true;
        }
        match cmd {
            Command::SetBoost { value } => {
                self.gain.set_boost(value);
            }
            Command::AdjustBoost { delta } => {
                self.gain.adjust_boost(delta);
            }
            Command::ResetBoost => {
                self.gain.reset_boost();
                self.autogain.reset();
            }
            Command::SetMute { muted } => self.gain.set_muted(muted),
            Command::ToggleMute => {
                self.gain.toggle_muted();
            }
            Command::SetClarity { enabled } => self.set_clarity(enabled),
            Command::ToggleClarity => self.set_clarity(!self.clarity),
            Command::GetState => return Response::state(self.state()),
        }
        self.publish_gain();
        Response::ack()
    }

    /// Parses and runs one JSON command, returning the JSON response.
    pub fn handle_json(&mut self, json: &str) -> String {
        match serde_json::from_str::<Command>(json) {
            Ok(cmd) => self.handle_command(cmd).to_json(),
            Err(e) => {
                warn!("Rejected command {}: {}", json, e);
                Response::error(format!("invalid command: {}", e)).to_json()
            }
        }
    }

    /// Runs the command bound to a keyboard shortcut. Unknown shortcuts are ignored.
    pub fn handle_shortcut(&mut self, name: &str) -> Option<Response> {
        shortcut(name).map(|cmd| self.handle_command(cmd))
    }

    /// Clarity and both suppression models are switched together.
    fn set_clarity(&mut self, enabled: bool) {
        self.clarity = enabled;
        self.coordinator.set_enabled(enabled);
        self.rebuild();
    }

    /// Periodic control work: forwards render-thread logs, collects model lifecycle
    /// changes, rebuilds the chain if needed and runs one AutoGain step.
    pub fn tick(&mut self) {
        self.render_log.drain();

        self.coordinator.poll();
        self.rebuild();

        // Skip without touching state until the tap has new audio.
        if let Some(rms) = self.tap.read_rms() {
            if !self.gain.muted() {
                let next = self.autogain.step(rms, self.gain.auto_gain());
                self.gain.set_auto_gain(next);
            }
        }
        self.publish_gain();
    }

    /// Sends the route for the current readiness. Sources are rewired only when the
    /// head changes.
    fn rebuild(&mut self) {
        let plan = RoutePlan::select(
            self.coordinator.spectral_ready(),
            self.coordinator.frame_ready(),
            self.clarity,
        );
        if plan == self.plan {
            return;
        }
        match self.graph_tx.try_send(GraphCommand::Rebuild(plan)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Retried on the next tick.
                warn!("Render graph command queue full, rebuild deferred");
                return;
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Render graph gone, route not sent");
            }
        }
        info!("Chain rebuilt: {:?} (head {})", plan.state(), plan.head);
        let head_changed = plan.head != self.plan.head;
        self.plan = plan;
        if head_changed {
            self.registry.rewire_all(plan.head);
        }
    }

    fn publish_gain(&self) {
        self.meters.set_target_gain(self.gain.effective());
    }

    pub fn media_event(&mut self, event: MediaEvent) {
        self.registry.handle_event(event, self.plan.head);
    }

    /// Hooks the playable elements already present when the engine starts.
    pub fn scan(&mut self, elements: &[MediaElementId]) -> usize {
        self.registry.scan(elements, self.plan.head)
    }

    pub fn set_run_state(&mut self, state: RunState) {
        if state != self.run_state {
            info!("Audio context {:?}", state);
        }
        self.run_state = state;
        if state != RunState::Suspended {
            self.resume_requested = false;
        }
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Set when a command changed the sound while the context was suspended; the host
    /// resumes on the next user gesture.
    pub fn resume_requested(&self) -> bool {
        self.resume_requested
    }

    pub fn head(&self) -> Head {
        self.plan.head
    }

    pub fn route(&self) -> RoutePlan {
        self.plan
    }

    pub fn meters(&self) -> &Arc<Meters> {
        &self.meters
    }

    pub fn state(&self) -> StateSnapshot {
        StateSnapshot {
            boost: self.gain.boost(),
            auto_gain: self.gain.auto_gain(),
            clarity_enabled: self.clarity,
            muted: self.gain.muted(),
            hooked_sources: self.registry.hooked_count(),
            blocked: self.registry.is_blocked(),
            last_error: self.registry.last_error().map(|e| e.to_string()),
            suppression_error: self.coordinator.last_error().map(str::to_owned),
            suppression: self.coordinator.status(),
            chain: self.plan.state(),
            run_state: self.run_state,
            resume_requested: self.resume_requested,
        }
    }

    /// Current values in their persisted form.
    pub fn settings(&self) -> Settings {
        Settings {
            boost: self.gain.boost(),
            clarity_enabled: self.clarity,
            muted: self.gain.muted(),
            ui_position: self.ui_position,
        }
    }

    pub fn set_ui_position(&mut self, position: Option<UiPosition>) {
        self.ui_position = position;
    }
}
