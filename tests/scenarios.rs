mod common;

use common::{peak, tone, RecordingTapper, ScaleFrameLoader, SpectralLoader};
use speechboost::{
    ChainState, Command, Engine, EngineConfig, Head, MediaElementId, MediaEvent, MediaTapper, RenderGraph, Settings,
    SuppressionState, TapError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BLOCK: usize = 128;

struct Session {
    engine: Engine,
    graph: RenderGraph,
    pos: usize,
    out: Vec<f32>,
}

impl Session {
    /// Renders one quantum of a 1 kHz tone and returns the output peak.
    fn render(&mut self) -> f32 {
        let input = tone(1000.0, 0.3, self.pos, BLOCK);
        self.pos += BLOCK;
        self.graph
            .render(&[input.as_slice()], &mut [self.out.as_mut_slice()]);
        peak(&self.out)
    }

    /// Ticks (rendering in between) until `done` holds.
    fn run_until(&mut self, mut done: impl FnMut(&Engine) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            self.engine.tick();
            if done(&self.engine) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out in state {:?}", self.engine.state());
            for _ in 0..4 {
                self.render();
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

fn session(settings: Settings, build: impl FnOnce(speechboost::EngineBuilder) -> speechboost::EngineBuilder, tapper: Box<dyn MediaTapper>) -> Session {
    let builder = Engine::builder(EngineConfig::default()).settings(settings);
    let (engine, graph) = build(builder).build(tapper).unwrap();
    Session {
        engine,
        graph,
        pos: 0,
        out: vec![0.0; BLOCK],
    }
}

#[test]
fn test_clarity_only_then_spectral_ready_rewires_once() {
    let (gate_tx, gate_rx) = crossbeam_channel::bounded(1);
    let loader = SpectralLoader {
        gate: Some(gate_rx),
        ..SpectralLoader::new(1.0)
    };
    let tapper = RecordingTapper::default();
    let mut s = session(
        Settings {
            clarity_enabled: false,
            ..Settings::default()
        },
        |b| b.spectral_loader(Arc::new(loader)),
        Box::new(tapper.clone()),
    );

    s.engine.media_event(MediaEvent::Inserted(MediaElementId(1)));
    assert_eq!(s.engine.state().hooked_sources, 1);
    assert_eq!(s.engine.state().chain, ChainState::Raw);

    s.engine.handle_command(Command::SetClarity { enabled: true });
    s.engine.tick();
    let state = s.engine.state();
    assert_eq!(state.chain, ChainState::ClarityOnly);
    assert_eq!(state.suppression.spectral, SuppressionState::Loading);
    s.render();
    assert_eq!(s.graph.route().head, Head::Gain);
    assert!(s.graph.route().clarity);

    gate_tx.send(()).unwrap();
    s.run_until(|e| e.state().chain == ChainState::SuppressedClarity);
    assert_eq!(s.engine.head(), Head::Spectral);
    assert_eq!(tapper.connects_to(Head::Spectral), 1);

    for _ in 0..10 {
        s.engine.tick();
        s.render();
    }
    assert_eq!(tapper.connects_to(Head::Gain), 1);
    assert_eq!(tapper.connects_to(Head::Spectral), 1);
    assert_eq!(s.graph.route().head, Head::Spectral);
}

#[test]
fn test_spectral_failure_falls_back_to_frame_without_silence() {
    let loader = SpectralLoader {
        fail_from: Some(40),
        ..SpectralLoader::new(0.5)
    };
    let tapper = RecordingTapper::default();
    let mut s = session(
        Settings::default(),
        |b| {
            b.spectral_loader(Arc::new(loader))
                .frame_loader(Arc::new(ScaleFrameLoader(0.8)))
        },
        Box::new(tapper.clone()),
    );
    assert_eq!(s.engine.scan(&[MediaElementId(1), MediaElementId(2)]), 2);

    s.run_until(|e| e.head() == Head::Spectral && e.state().suppression.frame == SuppressionState::Ready);
    let frame_connects = tapper.connects_to(Head::Frame);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut quanta = 0usize;
    loop {
        for _ in 0..4 {
            let p = s.render();
            quanta += 1;
            assert!(p > 1e-3, "silent quantum {} (peak {})", quanta, p);
        }
        s.engine.tick();
        if s.engine.state().suppression.spectral != SuppressionState::Ready {
            // Rebuilt in the same tick that saw the failure.
            assert_eq!(s.engine.head(), Head::Frame);
            break;
        }
        assert!(Instant::now() < deadline, "spectral model never failed");
        std::thread::sleep(Duration::from_millis(1));
    }

    let state = s.engine.state();
    assert_eq!(state.chain, ChainState::SuppressedClarity);
    assert!(state.suppression_error.unwrap().starts_with("spectral model"));
    assert_eq!(tapper.connects_to(Head::Frame), frame_connects + 2);

    for _ in 0..200 {
        let p = s.render();
        assert!(p > 1e-3, "silent quantum after fallback (peak {})", p);
    }
    assert_eq!(s.graph.route().head, Head::Frame);

    s.engine.tick();
    assert_eq!(s.engine.state().suppression.spectral, SuppressionState::Disabled);
}

struct RefusingTapper;

impl MediaTapper for RefusingTapper {
    fn connect(&mut self, _: MediaElementId, _: Head) -> Result<(), TapError> {
        Err(TapError::CrossOrigin)
    }

    fn disconnect(&mut self, _: MediaElementId, _: Head) -> Result<(), TapError> {
        Err(TapError::Detached)
    }
}

#[test]
fn test_cross_origin_source_reported_not_fatal() {
    let mut s = session(Settings::default(), |b| b, Box::new(RefusingTapper));
    s.engine.media_event(MediaEvent::PlaybackStarted(MediaElementId(9)));

    let v: serde_json::Value = serde_json::from_str(&s.engine.handle_json(r#"{"type":"GET_STATE"}"#)).unwrap();
    assert_eq!(v["ok"], true);
    assert_eq!(v["state"]["hooked_sources"], 0);
    assert_eq!(v["state"]["blocked"], true);
    assert!(v["state"]["last_error"].as_str().unwrap().contains("cross-origin"));

    // Everything else keeps working.
    assert_eq!(s.engine.handle_json(r#"{"type":"TOGGLE_MUTE"}"#), r#"{"ok":true}"#);
    s.engine.media_event(MediaEvent::Removed(MediaElementId(9)));
    assert_eq!(s.engine.state().blocked, false);
    let mut last = 1.0;
    for _ in 0..200 {
        last = s.render();
    }
    assert!(last < 1e-6, "muted output peak {}", last);
}
