use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::grading::{self, round_to};
use crate::models::{GpaSummary, GradeRecord};

/// GPA over the attempts taken in a single semester.
pub fn semester_gpa(records: &[GradeRecord], semester_id: Uuid) -> GpaSummary {
    let scoped: Vec<&GradeRecord> = records
        .iter()
        .filter(|record| record.semester_id == semester_id)
        .collect();
    summarize(&scoped)
}

/// CPA over every semester. A retaken course counts once, by its best attempt.
pub fn cumulative(records: &[GradeRecord]) -> GpaSummary {
    summarize(&best_attempts(records, None))
}

/// CPA as it stood at the end of the semester starting on `starts_on`.
pub fn cumulative_until(records: &[GradeRecord], starts_on: NaiveDate) -> GpaSummary {
    summarize(&best_attempts(records, Some(starts_on)))
}

fn best_attempts(
    records: &[GradeRecord],
    until: Option<NaiveDate>,
) -> Vec<&GradeRecord> {
    let mut best: HashMap<&str, &GradeRecord> = HashMap::new();

    for record in records {
        if until.is_some_and(|cutoff| record.semester_starts_on > cutoff) {
            continue;
        }
        best.entry(record.course_code.as_str())
            .and_modify(|current| {
                if better_attempt(record, *current) {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    let mut attempts: Vec<&GradeRecord> = best.into_values().collect();
    attempts.sort_by(|a, b| a.course_code.cmp(&b.course_code));
    attempts
}

fn better_attempt(candidate: &GradeRecord, current: &GradeRecord) -> bool {
    match (candidate.score, current.score) {
        (Some(new), Some(old)) => new > old,
        (Some(_), None) => true,
        _ => false,
    }
}

fn summarize(records: &[&GradeRecord]) -> GpaSummary {
    let mut weighted_10 = 0.0;
    let mut weighted_4 = 0.0;
    let mut credits_registered = 0;
    let mut credits_graded = 0;
    let mut credits_passed = 0;
    let mut failed_courses = 0;

    for record in records {
        credits_registered += record.credits;
        let Some(score) = record.score else {
            continue;
        };
        let Ok(converted) = grading::convert(score) else {
            tracing::warn!(course = %record.course_code, score, "skipping out-of-range score");
            continue;
        };

        credits_graded += record.credits;
        weighted_10 += converted.score * record.credits as f64;
        weighted_4 += converted.scale_4 * record.credits as f64;
        if converted.passed {
            credits_passed += record.credits;
        } else {
            failed_courses += 1;
        }
    }

    let (gpa_10, gpa_4) = if credits_graded == 0 {
        (0.0, 0.0)
    } else {
        let credits = credits_graded as f64;
        (round_to(weighted_10 / credits, 2), round_to(weighted_4 / credits, 2))
    };

    GpaSummary {
        gpa_10,
        gpa_4,
        credits_registered,
        credits_graded,
        credits_passed,
        failed_courses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semester(n: u32) -> (Uuid, NaiveDate) {
        (
            Uuid::from_u128(n as u128),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(180 * n as i64),
        )
    }

    fn record(course: &str, term: (Uuid, NaiveDate), credits: i32, score: Option<f64>) -> GradeRecord {
        GradeRecord {
            course_code: course.to_string(),
            semester_id: term.0,
            semester_starts_on: term.1,
            credits,
            score,
        }
    }

    #[test]
    fn empty_grade_set_yields_zero() {
        let summary = cumulative(&[]);
        assert_eq!(summary.gpa_10, 0.0);
        assert_eq!(summary.gpa_4, 0.0);
        assert_eq!(summary.credits_passed, 0);

        let only_pending = vec![record("MATH1", semester(1), 3, None)];
        let summary = semester_gpa(&only_pending, semester(1).0);
        assert_eq!(summary.gpa_4, 0.0);
        assert_eq!(summary.credits_registered, 3);
        assert_eq!(summary.credits_graded, 0);
    }

    #[test]
    fn weights_by_credits() {
        let term = semester(1);
        let records = vec![
            record("MATH1", term, 3, Some(9.0)),
            record("PHYS1", term, 2, Some(6.0)),
        ];
        let summary = semester_gpa(&records, term.0);
        // (9*3 + 6*2) / 5 and (4*3 + 2*2) / 5
        assert_eq!(summary.gpa_10, 7.8);
        assert_eq!(summary.gpa_4, 3.2);
        assert_eq!(summary.credits_passed, 5);
        assert_eq!(summary.failed_courses, 0);
    }

    #[test]
    fn semester_scope_ignores_other_terms() {
        let first = semester(1);
        let second = semester(2);
        let records = vec![
            record("MATH1", first, 3, Some(3.0)),
            record("CHEM1", second, 4, Some(8.0)),
        ];
        let summary = semester_gpa(&records, second.0);
        assert_eq!(summary.gpa_4, 3.5);
        assert_eq!(summary.credits_registered, 4);
    }

    #[test]
    fn cumulative_counts_best_retake_only() {
        let first = semester(1);
        let second = semester(2);
        let records = vec![
            record("MATH1", first, 3, Some(3.0)),
            record("MATH1", second, 3, Some(7.0)),
            record("PHYS1", first, 2, Some(8.5)),
        ];
        let summary = cumulative(&records);
        assert_eq!(summary.credits_registered, 5);
        assert_eq!(summary.failed_courses, 0);
        // (3.0*3 + 4.0*2) / 5
        assert_eq!(summary.gpa_4, 3.4);
    }

    #[test]
    fn cumulative_until_excludes_later_semesters() {
        let first = semester(1);
        let second = semester(2);
        let records = vec![
            record("MATH1", first, 3, Some(3.0)),
            record("MATH1", second, 3, Some(7.0)),
        ];
        let summary = cumulative_until(&records, first.1);
        assert_eq!(summary.gpa_4, 0.0);
        assert_eq!(summary.failed_courses, 1);
        assert_eq!(summary.credits_passed, 0);

        // a semester with no attempts of its own still cuts off later ones
        let between = first.1 + chrono::Duration::days(30);
        assert_eq!(cumulative_until(&records, between).failed_courses, 1);
    }
}
