//! Input level metering for the capture indicator.

use std::sync::atomic::{AtomicU32, Ordering};

/// Lock-free RMS level shared between the capture callback and the UI.
/// The callback writes on every buffer; readers poll at render cadence.
#[derive(Default)]
pub struct LevelMeter {
    level_bits: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from one capture buffer of normalized samples.
    pub fn update(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();
        self.level_bits.store(rms.to_bits(), Ordering::Relaxed);
    }

    /// Current level in [0.0, 1.0].
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.level_bits.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_reads_zero() {
        let meter = LevelMeter::new();
        meter.update(&[0.0; 256]);
        assert_eq!(meter.level(), 0.0);
    }

    #[test]
    fn full_scale_square_wave_reads_one() {
        let meter = LevelMeter::new();
        let samples: Vec<f32> = (0..256).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        meter.update(&samples);
        assert!((meter.level() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn louder_input_reads_higher() {
        let meter = LevelMeter::new();
        meter.update(&[0.1; 256]);
        let quiet = meter.level();
        meter.update(&[0.8; 256]);
        assert!(meter.level() > quiet);
    }

    #[test]
    fn reset_clears_the_reading() {
        let meter = LevelMeter::new();
        meter.update(&[0.5; 64]);
        meter.reset();
        assert_eq!(meter.level(), 0.0);
    }
}
