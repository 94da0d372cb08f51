use std::collections::HashMap;
use std::fmt::Write;

use crate::grading;
use crate::models::{
    ClassInfo, ClassPosition, GpaSummary, RiskAssessment, StudentRisk, StudentStatus, WarningRecord,
};

/// One student's figures for a semester, as shown in class reports.
#[derive(Debug, Clone)]
pub struct Standing {
    pub student_code: String,
    pub full_name: String,
    pub position: ClassPosition,
    pub status: StudentStatus,
    pub semester: GpaSummary,
    pub cumulative: GpaSummary,
    pub risk: RiskAssessment,
    pub warned_this_semester: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandSummary {
    pub band: &'static str,
    pub count: usize,
    pub avg_gpa_4: f64,
}

pub fn outcome_label(status: StudentStatus, warned_this_semester: bool, at_risk: bool) -> &'static str {
    if status == StudentStatus::Dropped {
        "dropped"
    } else if warned_this_semester {
        "warned"
    } else if at_risk {
        "at_risk"
    } else {
        "good_standing"
    }
}

/// Semester GPA distribution by letter band; students without grades are left out.
pub fn summarize_by_band(standings: &[Standing]) -> Vec<BandSummary> {
    let mut map: HashMap<&'static str, (usize, f64)> = HashMap::new();

    for standing in standings {
        if standing.semester.credits_graded == 0 {
            continue;
        }
        let entry = map
            .entry(grading::band_for_scale_4(standing.semester.gpa_4))
            .or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += standing.semester.gpa_4;
    }

    let mut summaries: Vec<BandSummary> = map
        .into_iter()
        .map(|(band, (count, total))| BandSummary {
            band,
            count,
            avg_gpa_4: grading::round_to(total / count as f64, 2),
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.avg_gpa_4
            .partial_cmp(&a.avg_gpa_4)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    summaries
}

pub fn build_report(
    class: &ClassInfo,
    semester_name: &str,
    standings: &[Standing],
    ranked: &[StudentRisk],
    warnings: &[WarningRecord],
) -> String {
    let bands = summarize_by_band(standings);
    let mut output = String::new();

    let _ = writeln!(output, "# Academic Report: {} ({})", class.code, semester_name);
    let _ = writeln!(output, "Cohort {}, {} students", class.cohort, standings.len());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Semester GPA Distribution");

    if bands.is_empty() {
        let _ = writeln!(output, "No grades recorded for this semester.");
    } else {
        for band in bands.iter() {
            let _ = writeln!(
                output,
                "- {}: {} students (avg GPA {:.2})",
                band.band, band.count, band.avg_gpa_4
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students");
    let _ = writeln!(output, "| Code | Name | Position | GPA | CPA | Credits passed | Outcome |");
    let _ = writeln!(output, "|---|---|---|---|---|---|---|");
    for standing in standings {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {:.2} | {:.2} | {} | {} |",
            standing.student_code,
            standing.full_name,
            standing.position,
            standing.semester.gpa_4,
            standing.cumulative.gpa_4,
            standing.cumulative.credits_passed,
            outcome_label(
                standing.status,
                standing.warned_this_semester,
                standing.risk.at_risk
            )
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Dropout Risk");

    if ranked.is_empty() {
        let _ = writeln!(output, "No students at risk.");
    } else {
        for student in ranked {
            let severity = student
                .assessment
                .severity
                .map(|s| s.to_string())
                .unwrap_or_default();
            let _ = writeln!(
                output,
                "- {} ({}) {}: {}",
                student.full_name,
                student.student_code,
                severity,
                student.assessment.reasons.join("; ")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Warnings");

    if warnings.is_empty() {
        let _ = writeln!(output, "No warnings issued.");
    } else {
        for warning in warnings {
            let _ = writeln!(
                output,
                "- {} ({}) level {} in {} at CPA {:.2}, issued {}",
                warning.full_name,
                warning.student_code,
                warning.level,
                warning.semester_name,
                warning.cpa_4,
                warning.issued_at.date_naive()
            );
        }
    }

    output
}
