//! Volume stage.
//!
//! Level and mute are stored independently so un-muting restores exactly the
//! level that was set before. The sink reads [`VolumeControl::gain`] once per
//! callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared volume state for the output stage.
#[derive(Clone, Debug)]
pub struct VolumeControl {
    level: Arc<AtomicU64>,
    muted: Arc<AtomicBool>,
}

impl VolumeControl {
    pub fn new(level: f64) -> Self {
        Self {
            level: Arc::new(AtomicU64::new(level.clamp(0.0, 1.0).to_bits())),
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// User-facing level in `[0, 1]`.
    pub fn level(&self) -> f64 {
        f64::from_bits(self.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: f64) {
        self.level
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Linear gain for the sink. The level follows a cubic curve.
    pub fn gain(&self) -> f32 {
        if self.is_muted() {
            return 0.0;
        }
        let level = self.level();
        (level * level * level) as f32
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_keeps_stored_level() {
        let volume = VolumeControl::new(0.8);
        volume.set_muted(true);
        assert_eq!(volume.gain(), 0.0);
        assert_eq!(volume.level(), 0.8);

        volume.set_muted(false);
        assert!((volume.gain() - 0.512).abs() < 1e-6);
    }

    #[test]
    fn level_is_clamped() {
        let volume = VolumeControl::new(3.0);
        assert_eq!(volume.level(), 1.0);
        volume.set_level(-1.0);
        assert_eq!(volume.level(), 0.0);
    }

    #[test]
    fn clones_share_state() {
        let volume = VolumeControl::default();
        let sink_side = volume.clone();
        volume.set_level(0.5);
        assert_eq!(sink_side.level(), 0.5);
    }
}
