use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;

macro_rules! text_enum {
    ($name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::invalid($label, format!("unknown value '{other}'"))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(StudentStatus, "status" {
    Studying => "studying",
    Graduated => "graduated",
    Dropped => "dropped",
    Suspended => "suspended",
    Reserved => "reserved",
});

text_enum!(ClassPosition, "class_position" {
    Leader => "leader",
    ViceLeader => "vice_leader",
    Secretary => "secretary",
    Member => "member",
});

text_enum!(RegistrationStatus, "registration_status" {
    Registered => "registered",
    Attended => "attended",
    Absent => "absent",
    Cancelled => "cancelled",
});

text_enum!(ActivityStatus, "activity_status" {
    Open => "open",
    Closed => "closed",
    Completed => "completed",
});

text_enum!(Role, "role" {
    Admin => "admin",
    Advisor => "advisor",
    Student => "student",
});

#[derive(Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub student_code: String,
    pub full_name: String,
    pub status: StudentStatus,
    pub class_position: ClassPosition,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub advisor_id: Uuid,
    pub code: String,
    pub cohort: String,
}

#[derive(Debug, Clone)]
pub struct Semester {
    pub id: Uuid,
    pub name: String,
    pub starts_on: NaiveDate,
}

/// One course attempt joined with its credit weight.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub course_code: String,
    pub semester_id: Uuid,
    pub semester_starts_on: NaiveDate,
    pub credits: i32,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpaSummary {
    pub gpa_10: f64,
    pub gpa_4: f64,
    pub credits_registered: i32,
    pub credits_graded: i32,
    pub credits_passed: i32,
    pub failed_courses: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub at_risk: bool,
    pub severity: Option<Severity>,
    pub cpa_4: f64,
    pub threshold: f64,
    pub failed_courses: usize,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRisk {
    pub student_code: String,
    pub full_name: String,
    pub assessment: RiskAssessment,
}

#[derive(Debug, Clone)]
pub struct WarningRecord {
    pub student_code: String,
    pub full_name: String,
    pub semester_name: String,
    pub level: i32,
    pub cpa_4: f64,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActivityRole {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub activity_status: ActivityStatus,
    pub registration_deadline: DateTime<Utc>,
    pub unit_id: Uuid,
    pub points: i32,
    pub max_slots: Option<i32>,
    pub taken_slots: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemesterReport {
    pub student_id: Uuid,
    pub semester_id: Uuid,
    pub semester: GpaSummary,
    pub cumulative: GpaSummary,
    pub training_points: i32,
    pub training_rank: &'static str,
    pub outcome: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_parse_their_own_labels() {
        for status in [
            StudentStatus::Studying,
            StudentStatus::Graduated,
            StudentStatus::Dropped,
            StudentStatus::Suspended,
            StudentStatus::Reserved,
        ] {
            assert_eq!(status.as_str().parse::<StudentStatus>().ok(), Some(status));
        }
        assert_eq!("vice_leader".parse::<ClassPosition>().ok(), Some(ClassPosition::ViceLeader));
    }

    #[test]
    fn unknown_labels_are_validation_errors() {
        let err = "expelled".parse::<StudentStatus>().unwrap_err();
        assert_eq!(err.status_code(), 422);
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
    }
}
