//! Lock-free values shared between the control plane and the render thread.
//!
//! Floats are stored as their bit patterns in `AtomicU32`. Each cell has exactly one
//! writer: the control plane writes the target gain, the render thread writes the rest.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct Meters {
    target_gain: AtomicU32,
    output_peak: AtomicU32,
    limiter_reduction_db: AtomicU32,
    rendered_frames: AtomicU64,
}

impl Meters {
    pub fn new(initial_gain: f32) -> Self {
        let m = Self::default();
        m.set_target_gain(initial_gain);
        m
    }

    pub fn set_target_gain(&self, val: f32) {
        self.target_gain.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn target_gain(&self) -> f32 {
        f32::from_bits(self.target_gain.load(Ordering::Relaxed))
    }

    pub fn set_output_peak(&self, val: f32) {
        self.output_peak.store(val.to_bits(), Ordering::Relaxed);
    }

    /// Peak absolute output sample of the last render quantum.
    pub fn output_peak(&self) -> f32 {
        f32::from_bits(self.output_peak.load(Ordering::Relaxed))
    }

    pub fn set_limiter_reduction_db(&self, val: f32) {
        self.limiter_reduction_db
            .store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn limiter_reduction_db(&self) -> f32 {
        f32::from_bits(self.limiter_reduction_db.load(Ordering::Relaxed))
    }

    pub fn add_rendered_frames(&self, frames: u64) {
        self.rendered_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_cells_round_trip_bits() {
        let m = Meters::new(0.9);
        assert_eq!(m.target_gain(), 0.9);
        m.set_output_peak(-0.0);
        assert_eq!(m.output_peak().to_bits(), (-0.0f32).to_bits());
        m.add_rendered_frames(128);
        m.add_rendered_frames(128);
        assert_eq!(m.rendered_frames(), 256);
    }
}
