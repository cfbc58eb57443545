//! Loudness measures and channel down-mixing.

use serde::{Deserialize, Serialize};

/// How the analysis window is reduced to a single loudness value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoudnessMeasure {
    /// Root-mean-square amplitude.
    #[default]
    Rms,
    /// Mean absolute deviation from the window mean.
    MeanAbsDeviation,
}

impl LoudnessMeasure {
    /// Loudness of `samples`; `0.0` for an empty slice.
    pub fn measure(self, samples: &[f32]) -> f32 {
        match self {
            LoudnessMeasure::Rms => rms(samples),
            LoudnessMeasure::MeanAbsDeviation => mean_abs_deviation(samples),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoudnessMeasure::Rms => "rms",
            LoudnessMeasure::MeanAbsDeviation => "mean_abs_deviation",
        }
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

pub fn mean_abs_deviation(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    samples.iter().map(|s| (s - mean).abs()).sum::<f32>() / n
}

/// Mix interleaved audio down to mono by averaging channels.
///
/// `channels == 1` copies the input; `channels == 0` yields nothing.  A
/// trailing partial frame is dropped.
///
/// ```rust
/// use reactive_avatar::audio::downmix;
///
/// let stereo = [0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_signal_is_its_magnitude() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!((rms(&[-0.25; 64]) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn rms_of_square_wave() {
        let wave: Vec<f32> = (0..128).map(|i| if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        assert!((rms(&wave) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn mad_ignores_dc_offset() {
        // A constant offset has no deviation; RMS would report it as loud.
        assert!(mean_abs_deviation(&[0.3; 32]).abs() < 1e-6);
        assert!(rms(&[0.3; 32]) > 0.29);
    }

    #[test]
    fn mad_of_square_wave() {
        let wave: Vec<f32> = (0..128).map(|i| if i % 2 == 0 { 0.2 } else { -0.2 }).collect();
        assert!((mean_abs_deviation(&wave) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn empty_input_is_silent() {
        assert_eq!(LoudnessMeasure::Rms.measure(&[]), 0.0);
        assert_eq!(LoudnessMeasure::MeanAbsDeviation.measure(&[]), 0.0);
    }

    #[test]
    fn measure_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct W {
            m: LoudnessMeasure,
        }
        let w: W = toml::from_str(r#"m = "mean_abs_deviation""#).unwrap();
        assert_eq!(w.m, LoudnessMeasure::MeanAbsDeviation);
        assert_eq!(LoudnessMeasure::default(), LoudnessMeasure::Rms);
    }

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix(&[1.0, 0.0, 0.0, 1.0], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
        assert!(downmix(&[0.1, 0.2], 0).is_empty());
        assert_eq!(downmix(&[0.3, 0.3, 0.3, 0.9], 3).len(), 1);
    }
}
