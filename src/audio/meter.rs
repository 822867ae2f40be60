use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Latest input energy published by the capture side and sampled by the VAD tick.
#[derive(Debug, Clone, Default)]
pub struct InputMeter {
    bits: Arc<AtomicU32>,
}

impl InputMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Publish the RMS of a block of samples.
    pub fn observe(&self, samples: &[f32]) {
        self.set(rms(samples));
    }
}

/// Root mean square of normalized samples; 0.0 for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn meter_is_shared_between_clones() {
        let meter = InputMeter::new();
        let reader = meter.clone();
        assert_eq!(reader.level(), 0.0);
        meter.observe(&[0.1, -0.1, 0.1, -0.1]);
        assert!((reader.level() - 0.1).abs() < 1e-6);
    }
}
