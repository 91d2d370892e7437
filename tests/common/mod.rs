#![allow(dead_code)]

use crossbeam_channel::Receiver;
use speechboost::{
    Error, FrameModel, FrameModelLoader, FrameState, Head, MediaElementId, MediaTapper, ModelAssets, Result,
    SpectralModel, SpectralModelLoader, SpectralShape, TapError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every connect/disconnect the registry asks for.
#[derive(Clone, Default)]
pub struct RecordingTapper {
    pub connects: Arc<Mutex<Vec<(MediaElementId, Head)>>>,
    pub disconnects: Arc<Mutex<Vec<(MediaElementId, Head)>>>,
}

impl RecordingTapper {
    pub fn connects_to(&self, head: Head) -> usize {
        self.connects.lock().unwrap().iter().filter(|(_, h)| *h == head).count()
    }
}

impl MediaTapper for RecordingTapper {
    fn connect(&mut self, element: MediaElementId, head: Head) -> std::result::Result<(), TapError> {
        self.connects.lock().unwrap().push((element, head));
        Ok(())
    }

    fn disconnect(&mut self, element: MediaElementId, head: Head) -> std::result::Result<(), TapError> {
        self.disconnects.lock().unwrap().push((element, head));
        Ok(())
    }
}

/// Frame model that scales every frame by a constant.
pub struct ScaleFrame(pub f32);

struct ScaleState(f32);

impl FrameModel for ScaleFrame {
    fn frame_size(&self) -> usize {
        480
    }
    fn native_rate(&self) -> u32 {
        48000
    }
    fn new_state(&self) -> Box<dyn FrameState> {
        Box::new(ScaleState(self.0))
    }
}

impl FrameState for ScaleState {
    fn process_frame(&mut self, output: &mut [f32], input: &[f32]) {
        for (o, i) in output.iter_mut().zip(input) {
            *o = i * self.0;
        }
    }
}

pub struct ScaleFrameLoader(pub f32);

impl FrameModelLoader for ScaleFrameLoader {
    fn load(&self, _assets: &ModelAssets) -> Result<Arc<dyn FrameModel>> {
        Ok(Arc::new(ScaleFrame(self.0)))
    }
}

/// Spectral model emitting a constant mask. Calls from `fail_from` on fail.
pub struct ConstMaskModel {
    pub value: f32,
    pub calls: Arc<AtomicUsize>,
    pub fail_from: Option<usize>,
}

impl SpectralModel for ConstMaskModel {
    fn encode(&mut self, feat_erb: &[f32], _feat_spec: &[f32], emb: &mut Vec<f32>) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_from.map_or(false, |f| n >= f) {
            return Err(Error::Inference("mock inference failure".into()));
        }
        emb.clear();
        emb.push(feat_erb.len() as f32);
        Ok(())
    }

    fn decode(&mut self, emb: &[f32], mask: &mut Vec<f32>) -> Result<()> {
        mask.clear();
        mask.resize(emb[0] as usize, self.value);
        Ok(())
    }
}

/// Spectral loader that blocks until `gate` yields (or is dropped).
pub struct SpectralLoader {
    pub value: f32,
    pub fail_from: Option<usize>,
    pub gate: Option<Receiver<()>>,
    pub calls: Arc<AtomicUsize>,
}

impl SpectralLoader {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            fail_from: None,
            gate: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SpectralModelLoader for SpectralLoader {
    fn load(&self, _assets: &ModelAssets, _shape: SpectralShape) -> Result<Box<dyn SpectralModel>> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        Ok(Box::new(ConstMaskModel {
            value: self.value,
            calls: self.calls.clone(),
            fail_from: self.fail_from,
        }))
    }
}

pub fn tone(freq: f32, amp: f32, start: usize, len: usize) -> Vec<f32> {
    (start..start + len)
        .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / 48000.0).sin())
        .collect()
}

pub fn peak(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |m, v| m.max(v.abs()))
}
