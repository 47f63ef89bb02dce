//! Musical interval and tempo conversions.

use crate::defaults::MAX_SEMITONES;
use crate::error::{KeyshiftError, Result};

/// Frequency multiplier for a shift of `semitones`: `2^(semitones/12)`.
pub fn pitch_ratio(semitones: f64) -> f64 {
    (semitones / 12.0).exp2()
}

/// Inverse of [`pitch_ratio`]: `12·log2(ratio)`.
pub fn semitones_from_ratio(ratio: f64) -> f64 {
    12.0 * ratio.log2()
}

/// Duration multiplier for a playback tempo: `1/tempo`.
pub fn time_ratio(tempo: f64) -> Result<f64> {
    if !tempo.is_finite() || tempo <= 0.0 {
        return Err(KeyshiftError::invalid(
            "tempo",
            format!("must be a finite number greater than zero, got {}", tempo),
        ));
    }
    Ok(1.0 / tempo)
}

/// A requested pitch and tempo change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftParams {
    pub semitones: f64,
    pub tempo: f64,
}

impl Default for ShiftParams {
    fn default() -> Self {
        Self {
            semitones: 0.0,
            tempo: 1.0,
        }
    }
}

impl ShiftParams {
    pub fn new(semitones: f64, tempo: f64) -> Self {
        Self { semitones, tempo }
    }

    /// Checks the values and returns `(pitch_ratio, time_ratio)`.
    pub fn ratios(&self) -> Result<(f64, f64)> {
        if !self.semitones.is_finite() {
            return Err(KeyshiftError::invalid(
                "semitones",
                format!("must be finite, got {}", self.semitones),
            ));
        }
        let pitch = pitch_ratio(self.semitones);
        if !pitch.is_finite() || pitch <= 0.0 {
            return Err(KeyshiftError::invalid(
                "semitones",
                format!("{} gives an unusable pitch ratio {}", self.semitones, pitch),
            ));
        }
        let time = time_ratio(self.tempo)?;
        if !time.is_finite() {
            return Err(KeyshiftError::invalid(
                "tempo",
                format!("{} gives an unusable time ratio", self.tempo),
            ));
        }
        Ok((pitch, time))
    }

    /// True when neither pitch nor duration would change.
    pub fn is_identity(&self) -> bool {
        self.semitones == 0.0 && self.tempo == 1.0
    }

    /// Whether the shift lies in the range the CLI accepts without `--force`.
    pub fn is_within_musical_range(&self) -> bool {
        self.semitones.abs() <= MAX_SEMITONES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn octave_doubles_frequency() {
        assert_relative_eq!(pitch_ratio(12.0), 2.0);
        assert_relative_eq!(pitch_ratio(-12.0), 0.5);
        assert_eq!(pitch_ratio(0.0), 1.0);
    }

    #[test]
    fn fifth_is_close_to_three_halves() {
        assert_relative_eq!(pitch_ratio(7.0), 1.498_307_076_876_681_5, epsilon = 1e-12);
    }

    #[test]
    fn pitch_ratio_matches_definition_across_range() {
        for tenth in -240..=240 {
            let semitones = tenth as f64 / 10.0;
            assert_relative_eq!(
                pitch_ratio(semitones),
                2f64.powf(semitones / 12.0),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn integer_semitones_roundtrip() {
        for semitones in -24..=24 {
            let recovered = semitones_from_ratio(pitch_ratio(semitones as f64));
            assert!(
                (recovered - semitones as f64).abs() < 1e-9,
                "{} -> {}",
                semitones,
                recovered
            );
        }
    }

    #[test]
    fn time_ratio_is_inverse_tempo() {
        assert_eq!(time_ratio(2.0).unwrap(), 0.5);
        assert_eq!(time_ratio(0.5).unwrap(), 2.0);
    }

    #[test]
    fn non_positive_tempo_is_rejected() {
        for tempo in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            match time_ratio(tempo) {
                Err(KeyshiftError::InvalidParameter { name, .. }) => assert_eq!(name, "tempo"),
                other => panic!("expected InvalidParameter for {}, got {:?}", tempo, other),
            }
        }
    }

    #[test]
    fn ratios_validate_both_values() {
        assert!(ShiftParams::new(f64::NAN, 1.0).ratios().is_err());
        assert!(ShiftParams::new(20_000.0, 1.0).ratios().is_err());
        assert!(ShiftParams::new(1.0, 0.0).ratios().is_err());
        assert!(ShiftParams::new(0.0, 1e-320).ratios().is_err());

        let (pitch, time) = ShiftParams::new(12.0, 2.0).ratios().unwrap();
        assert_relative_eq!(pitch, 2.0);
        assert_relative_eq!(time, 0.5);
    }

    #[test]
    fn identity_detection() {
        assert!(ShiftParams::default().is_identity());
        assert!(!ShiftParams::new(0.0, 1.01).is_identity());
        assert!(!ShiftParams::new(-1.0, 1.0).is_identity());
    }

    #[test]
    fn musical_range() {
        assert!(ShiftParams::new(24.0, 1.0).is_within_musical_range());
        assert!(!ShiftParams::new(-24.5, 1.0).is_within_musical_range());
    }
}
