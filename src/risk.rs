use crate::models::{GpaSummary, RiskAssessment, Severity, StudentRisk};
use crate::settings::RiskPolicy;

pub fn evaluate(cumulative: &GpaSummary, threshold: f64, policy: &RiskPolicy) -> RiskAssessment {
    let cpa = cumulative.gpa_4;
    let failed = cumulative.failed_courses;
    let mut reasons = Vec::new();

    if cumulative.credits_graded == 0 {
        return RiskAssessment {
            at_risk: false,
            severity: None,
            cpa_4: cpa,
            threshold,
            failed_courses: failed,
            reasons,
        };
    }

    if cpa < threshold {
        reasons.push(format!("CPA {cpa:.2} is below the threshold of {threshold:.2}"));
    }
    if failed >= policy.failed_medium {
        reasons.push(format!("{failed} failed courses"));
    }

    let severity = if reasons.is_empty() {
        None
    } else {
        Some(classify(cpa, failed, threshold, policy))
    };

    if severity == Some(Severity::Critical) && cpa < policy.critical_cpa {
        reasons.push(format!(
            "CPA is under the critical floor of {:.2}",
            policy.critical_cpa
        ));
    }

    RiskAssessment {
        at_risk: severity.is_some(),
        severity,
        cpa_4: cpa,
        threshold,
        failed_courses: failed,
        reasons,
    }
}

pub fn classify(cpa: f64, failed: usize, threshold: f64, policy: &RiskPolicy) -> Severity {
    if cpa < policy.critical_cpa || failed >= policy.failed_critical {
        Severity::Critical
    } else if cpa < threshold - policy.high_margin || failed >= policy.failed_high {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// At-risk students only, most urgent first, lowest CPA breaking ties.
pub fn rank(mut students: Vec<StudentRisk>) -> Vec<StudentRisk> {
    students.retain(|student| student.assessment.at_risk);
    students.sort_by(|a, b| {
        b.assessment
            .severity
            .cmp(&a.assessment.severity)
            .then_with(|| {
                a.assessment
                    .cpa_4
                    .partial_cmp(&b.assessment.cpa_4)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.student_code.cmp(&b.student_code))
    });
    students
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(cpa: f64, failed: usize) -> GpaSummary {
        GpaSummary {
            gpa_10: cpa * 2.5,
            gpa_4: cpa,
            credits_registered: 30,
            credits_graded: 30,
            credits_passed: 30 - (failed as i32) * 3,
            failed_courses: failed,
        }
    }

    fn student(code: &str, cpa: f64, failed: usize) -> StudentRisk {
        StudentRisk {
            student_code: code.to_string(),
            full_name: format!("Student {code}"),
            assessment: evaluate(&summary(cpa, failed), 2.0, &RiskPolicy::default()),
        }
    }

    #[test]
    fn healthy_student_is_not_flagged() {
        let assessment = evaluate(&summary(3.1, 1), 2.0, &RiskPolicy::default());
        assert!(!assessment.at_risk);
        assert_eq!(assessment.severity, None);
        assert!(assessment.reasons.is_empty());
    }

    #[test]
    fn severity_follows_cutoffs() {
        let policy = RiskPolicy::default();
        assert_eq!(classify(1.9, 0, 2.0, &policy), Severity::Medium);
        assert_eq!(classify(1.4, 0, 2.0, &policy), Severity::High);
        assert_eq!(classify(2.5, 4, 2.0, &policy), Severity::High);
        assert_eq!(classify(0.8, 0, 2.0, &policy), Severity::Critical);
        assert_eq!(classify(2.5, 6, 2.0, &policy), Severity::Critical);
    }

    #[test]
    fn failed_courses_alone_flag_a_student() {
        let assessment = evaluate(&summary(2.8, 2), 2.0, &RiskPolicy::default());
        assert!(assessment.at_risk);
        assert_eq!(assessment.severity, Some(Severity::Medium));
        assert_eq!(assessment.reasons, vec!["2 failed courses".to_string()]);
    }

    #[test]
    fn critical_cpa_adds_reason() {
        let assessment = evaluate(&summary(0.5, 0), 2.0, &RiskPolicy::default());
        assert_eq!(assessment.severity, Some(Severity::Critical));
        assert_eq!(assessment.reasons.len(), 2);
    }

    #[test]
    fn ungraded_students_are_not_flagged() {
        let empty = GpaSummary {
            gpa_10: 0.0,
            gpa_4: 0.0,
            credits_registered: 12,
            credits_graded: 0,
            credits_passed: 0,
            failed_courses: 0,
        };
        assert!(!evaluate(&empty, 2.0, &RiskPolicy::default()).at_risk);
    }

    #[test]
    fn cohort_threshold_overrides_default() {
        let mut policy = RiskPolicy::default();
        policy.cohort_thresholds.insert("K66".to_string(), 2.5);
        let threshold = policy.threshold_for("K66");
        assert!(evaluate(&summary(2.2, 0), threshold, &policy).at_risk);
        assert!(!evaluate(&summary(2.2, 0), policy.threshold_for("K67"), &policy).at_risk);
    }

    #[test]
    fn ranking_puts_most_urgent_first() {
        let ranked = rank(vec![
            student("SV01", 1.9, 0),
            student("SV02", 3.2, 0),
            student("SV03", 0.7, 0),
            student("SV04", 1.2, 0),
            student("SV05", 1.1, 0),
        ]);
        let codes: Vec<&str> = ranked.iter().map(|s| s.student_code.as_str()).collect();
        assert_eq!(codes, vec!["SV03", "SV05", "SV04", "SV01"]);
    }
}
