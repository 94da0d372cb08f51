use uuid::Uuid;

use crate::models::{GpaSummary, StudentStatus};
use crate::settings::WarningPolicy;

/// A student's standing going into warning issuance for one semester.
#[derive(Debug, Clone)]
pub struct WarningCandidate {
    pub student_id: Uuid,
    pub student_code: String,
    pub status: StudentStatus,
    pub prior_warnings: i32,
    pub warned_this_semester: bool,
    pub cumulative: GpaSummary,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWarning {
    pub student_id: Uuid,
    pub student_code: String,
    pub level: i32,
    pub cpa_4: f64,
    pub reason: String,
    pub triggers_drop: bool,
}

pub fn plan(candidates: &[WarningCandidate], policy: WarningPolicy) -> Vec<PlannedWarning> {
    candidates
        .iter()
        .filter_map(|candidate| plan_one(candidate, policy))
        .collect()
}

fn plan_one(candidate: &WarningCandidate, policy: WarningPolicy) -> Option<PlannedWarning> {
    if candidate.status != StudentStatus::Studying || candidate.warned_this_semester {
        return None;
    }
    let cpa = candidate.cumulative.gpa_4;
    if candidate.cumulative.credits_graded == 0 || cpa >= candidate.threshold {
        return None;
    }

    let level = candidate.prior_warnings + 1;
    Some(PlannedWarning {
        student_id: candidate.student_id,
        student_code: candidate.student_code.clone(),
        level,
        cpa_4: cpa,
        reason: format!(
            "CPA {cpa:.2} below {:.2} (warning {level} of {})",
            candidate.threshold, policy.drop_after
        ),
        triggers_drop: level == policy.drop_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cumulative(cpa: f64) -> GpaSummary {
        GpaSummary {
            gpa_10: cpa * 2.5,
            gpa_4: cpa,
            credits_registered: 15,
            credits_graded: 15,
            credits_passed: 12,
            failed_courses: 1,
        }
    }

    fn candidate(cpa: f64, prior_warnings: i32) -> WarningCandidate {
        WarningCandidate {
            student_id: Uuid::new_v4(),
            student_code: "SV100".to_string(),
            status: StudentStatus::Studying,
            prior_warnings,
            warned_this_semester: false,
            cumulative: cumulative(cpa),
            threshold: 2.0,
        }
    }

    #[test]
    fn warns_only_below_threshold() {
        let planned = plan(&[candidate(1.7, 0), candidate(2.0, 0)], WarningPolicy::default());
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].level, 1);
        assert!(!planned[0].triggers_drop);
    }

    #[test]
    fn same_semester_is_not_warned_twice() {
        let mut already = candidate(1.2, 1);
        already.warned_this_semester = true;
        assert!(plan(&[already], WarningPolicy::default()).is_empty());
    }

    #[test]
    fn inactive_students_are_skipped() {
        let mut reserved = candidate(1.2, 0);
        reserved.status = StudentStatus::Reserved;
        assert!(plan(&[reserved], WarningPolicy::default()).is_empty());
    }

    #[test]
    fn drop_happens_exactly_once_on_third_warning() {
        let policy = WarningPolicy::default();
        let mut student = candidate(1.5, 0);
        let mut drops = 0;
        let mut drop_level = None;

        for _semester in 0..5 {
            student.warned_this_semester = false;
            for warning in plan(std::slice::from_ref(&student), policy) {
                student.prior_warnings = warning.level;
                if warning.triggers_drop {
                    drops += 1;
                    drop_level = Some(warning.level);
                    student.status = StudentStatus::Dropped;
                }
            }
        }

        assert_eq!(drops, 1);
        assert_eq!(drop_level, Some(3));
        assert_eq!(student.prior_warnings, 3);
        assert_eq!(student.status, StudentStatus::Dropped);
    }

    #[test]
    fn reinstated_student_past_limit_does_not_drop_again() {
        let planned = plan(&[candidate(1.0, 3)], WarningPolicy::default());
        assert_eq!(planned[0].level, 4);
        assert!(!planned[0].triggers_drop);
    }
}
