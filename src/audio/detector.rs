//! Speaking / not-speaking detection over a rolling analysis window.
//!
//! ## Algorithm
//!
//! Mono samples are pushed into a fixed [`RingBuffer`] window (default 2048
//! samples).  On every tick the window is reduced with the configured
//! [`LoudnessMeasure`] and compared against `threshold`.
//!
//! * Without a hold time the detector reports `level > threshold` directly.
//! * With a hold time, "speaking" stays true while the last above-threshold
//!   tick is less than `hold` ago.
//!
//! [`ActivityDetector::tick`] only returns a value when the boolean changes
//! (edge-triggered).

use std::time::{Duration, Instant};

use super::buffer::RingBuffer;
use super::level::LoudnessMeasure;

pub const DEFAULT_WINDOW_SIZE: usize = 2048;
pub const DEFAULT_THRESHOLD: f32 = 0.02;

/// Tuning for [`ActivityDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub threshold: f32,
    pub hold: Option<Duration>,
    pub window_size: usize,
    pub measure: LoudnessMeasure,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            hold: Some(Duration::from_millis(350)),
            window_size: DEFAULT_WINDOW_SIZE,
            measure: LoudnessMeasure::Rms,
        }
    }
}

pub struct ActivityDetector {
    settings: DetectorSettings,
    window: RingBuffer<f32>,
    speaking: bool,
    last_above: Option<Instant>,
    level: f32,
}

impl ActivityDetector {
    /// A zero `window_size` is bumped to 1.
    pub fn new(settings: DetectorSettings) -> Self {
        let window = RingBuffer::new(settings.window_size.max(1));
        Self {
            settings,
            window,
            speaking: false,
            last_above: None,
            level: 0.0,
        }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Append mono samples to the analysis window.
    pub fn push_samples(&mut self, mono: &[f32]) {
        self.window.push_slice(mono);
    }

    /// Loudness computed by the most recent tick.
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Run one analysis tick.  Returns `Some(new_value)` only on a change.
    pub fn tick(&mut self, now: Instant) -> Option<bool> {
        let samples = self.window.snapshot();
        self.level = self.settings.measure.measure(&samples);

        let above = self.level > self.settings.threshold;
        if above {
            self.last_above = Some(now);
        }

        let speaking = match self.settings.hold {
            None => above,
            Some(hold) => self
                .last_above
                .is_some_and(|t| now.saturating_duration_since(t) < hold),
        };

        if speaking == self.speaking {
            return None;
        }
        self.speaking = speaking;
        Some(speaking)
    }

    /// Drop all buffered audio.  Returns `Some(false)` if the detector was
    /// reporting speaking.
    pub fn reset(&mut self) -> Option<bool> {
        self.window.clear();
        self.last_above = None;
        self.level = 0.0;
        if self.speaking {
            self.speaking = false;
            Some(false)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(hold: Option<Duration>) -> ActivityDetector {
        ActivityDetector::new(DetectorSettings {
            threshold: 0.02,
            hold,
            window_size: 64,
            measure: LoudnessMeasure::Rms,
        })
    }

    fn loud(d: &mut ActivityDetector) {
        d.push_samples(&[0.5; 64]);
    }

    fn quiet(d: &mut ActivityDetector) {
        d.push_samples(&[0.0; 64]);
    }

    #[test]
    fn silence_never_emits() {
        let mut d = detector(None);
        let t0 = Instant::now();
        for i in 0..10 {
            quiet(&mut d);
            assert_eq!(d.tick(t0 + Duration::from_millis(16 * i)), None);
        }
        assert!(!d.is_speaking());
    }

    #[test]
    fn edge_triggered_without_hold() {
        let mut d = detector(None);
        let t0 = Instant::now();

        loud(&mut d);
        assert_eq!(d.tick(t0), Some(true));
        loud(&mut d);
        assert_eq!(d.tick(t0 + Duration::from_millis(16)), None);

        quiet(&mut d);
        assert_eq!(d.tick(t0 + Duration::from_millis(32)), Some(false));
        quiet(&mut d);
        assert_eq!(d.tick(t0 + Duration::from_millis(48)), None);
    }

    #[test]
    fn level_is_exposed_after_tick() {
        let mut d = detector(None);
        loud(&mut d);
        d.tick(Instant::now());
        assert!((d.level() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn short_gaps_are_held_as_speaking() {
        let mut d = detector(Some(Duration::from_millis(300)));
        let t0 = Instant::now();

        loud(&mut d);
        assert_eq!(d.tick(t0), Some(true));

        // Toggle quiet/loud faster than the hold time: no transitions.
        let mut t = t0;
        for _ in 0..5 {
            t += Duration::from_millis(100);
            quiet(&mut d);
            assert_eq!(d.tick(t), None);
            t += Duration::from_millis(100);
            loud(&mut d);
            assert_eq!(d.tick(t), None);
        }
        assert!(d.is_speaking());
    }

    #[test]
    fn hold_expires_after_sustained_silence() {
        let mut d = detector(Some(Duration::from_millis(300)));
        let t0 = Instant::now();

        loud(&mut d);
        assert_eq!(d.tick(t0), Some(true));
        quiet(&mut d);
        assert_eq!(d.tick(t0 + Duration::from_millis(299)), None);
        assert_eq!(d.tick(t0 + Duration::from_millis(300)), Some(false));
    }

    #[test]
    fn mean_abs_deviation_ignores_dc_offset() {
        let mut d = ActivityDetector::new(DetectorSettings {
            threshold: 0.02,
            hold: None,
            window_size: 64,
            measure: LoudnessMeasure::MeanAbsDeviation,
        });
        d.push_samples(&[0.4; 64]);
        assert_eq!(d.tick(Instant::now()), None);
    }

    #[test]
    fn reset_reports_not_speaking_once() {
        let mut d = detector(Some(Duration::from_millis(300)));
        loud(&mut d);
        assert_eq!(d.tick(Instant::now()), Some(true));
        assert_eq!(d.reset(), Some(false));
        assert_eq!(d.reset(), None);
        assert_eq!(d.level(), 0.0);
    }
}
