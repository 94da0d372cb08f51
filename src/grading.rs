use serde::Serialize;
use thiserror::Error;

use crate::error::AppError;

pub const PASS_MARK: f64 = 4.0;

/// (minimum 10-scale score, letter, 4-scale value), highest band first.
const BANDS: [(f64, &str, f64); 8] = [
    (8.5, "A", 4.0),
    (8.0, "B+", 3.5),
    (7.0, "B", 3.0),
    (6.5, "C+", 2.5),
    (5.5, "C", 2.0),
    (5.0, "D+", 1.5),
    (4.0, "D", 1.0),
    (0.0, "F", 0.0),
];

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum GradeError {
    #[error("score {0} is outside 0..=10")]
    OutOfRange(f64),
}

impl From<GradeError> for AppError {
    fn from(err: GradeError) -> Self {
        AppError::invalid("score", err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradeConversion {
    pub score: f64,
    pub letter: &'static str,
    pub scale_4: f64,
    pub passed: bool,
}

pub fn convert(score: f64) -> Result<GradeConversion, GradeError> {
    if !score.is_finite() || !(0.0..=10.0).contains(&score) {
        return Err(GradeError::OutOfRange(score));
    }

    // grading sheets carry one decimal
    let score = round_to(score, 1);
    let (_, letter, scale_4) = BANDS
        .iter()
        .copied()
        .find(|(min, _, _)| score >= *min)
        .unwrap_or(BANDS[BANDS.len() - 1]);

    Ok(GradeConversion {
        score,
        letter,
        scale_4,
        passed: is_passing(score),
    })
}

pub fn is_passing(score: f64) -> bool {
    score >= PASS_MARK
}

/// Letter band for an averaged 4-scale figure (e.g. a GPA).
pub fn band_for_scale_4(value: f64) -> &'static str {
    BANDS
        .iter()
        .find(|(_, _, scale_4)| value >= *scale_4)
        .map(|(_, letter, _)| *letter)
        .unwrap_or("F")
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn breakpoints_map_to_expected_letters() {
        let cases = [
            (10.0, "A", 4.0),
            (8.5, "A", 4.0),
            (8.4, "B+", 3.5),
            (7.0, "B", 3.0),
            (6.9, "C+", 2.5),
            (5.5, "C", 2.0),
            (5.0, "D+", 1.5),
            (4.0, "D", 1.0),
            (3.9, "F", 0.0),
            (0.0, "F", 0.0),
        ];
        for (score, letter, scale_4) in cases {
            let converted = convert(score).unwrap();
            assert_eq!(converted.letter, letter, "score {score}");
            assert_eq!(converted.scale_4, scale_4, "score {score}");
        }
    }

    #[test]
    fn pass_mark_is_inclusive() {
        assert!(convert(4.0).unwrap().passed);
        assert!(!convert(3.9).unwrap().passed);
    }

    #[test]
    fn scores_round_to_one_decimal_before_lookup() {
        let converted = convert(8.46).unwrap();
        assert_eq!(converted.score, 8.5);
        assert_eq!(converted.letter, "A");
    }

    #[test]
    fn rejects_out_of_range_scores() {
        assert_eq!(convert(10.5), Err(GradeError::OutOfRange(10.5)));
        assert_eq!(convert(-0.1), Err(GradeError::OutOfRange(-0.1)));
        assert!(convert(f64::NAN).is_err());
        let app: AppError = GradeError::OutOfRange(11.0).into();
        assert_eq!(app.status_code(), 422);
    }

    #[test]
    fn gpa_bands_follow_scale_4_floors() {
        assert_eq!(band_for_scale_4(3.72), "B+");
        assert_eq!(band_for_scale_4(4.0), "A");
        assert_eq!(band_for_scale_4(0.9), "F");
    }

    proptest! {
        #[test]
        fn scale_4_stays_within_bounds(score in 0.0f64..=10.0) {
            let converted = convert(score).unwrap();
            prop_assert!((0.0..=4.0).contains(&converted.scale_4));
        }

        #[test]
        fn scale_4_is_monotonic(a in 0.0f64..=10.0, b in 0.0f64..=10.0) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(convert(low).unwrap().scale_4 <= convert(high).unwrap().scale_4);
        }
    }
}
