use std::path::Path;

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::access::{self, Caller};
use crate::activity::RegistrationAction;
use crate::aggregate;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::import::{self, ImportSummary};
use crate::models::{
    ClassInfo, GpaSummary, RegistrationStatus, RiskAssessment, Role, Semester, SemesterReport,
    Student, StudentRisk,
};
use crate::points;
use crate::report::{self, Standing};
use crate::risk;
use crate::settings::Settings;
use crate::warnings::{self, WarningCandidate};

#[derive(Debug, serde::Serialize)]
pub struct StudentGpa {
    pub student_code: String,
    pub semester: Option<GpaSummary>,
    pub cumulative: GpaSummary,
}

pub async fn import_grades(pool: &PgPool, caller: &Caller, csv_path: &Path) -> AppResult<ImportSummary> {
    access::ensure_admin(caller)?;
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let parsed = import::parse_grades(file);
    tracing::info!(
        path = %csv_path.display(),
        rows = parsed.rows.len(),
        rejected = parsed.errors.len(),
        "parsed grade sheet"
    );

    let summary = db::import_grades(pool, caller, parsed).await?;
    tracing::info!(
        inserted = summary.inserted,
        updated = summary.updated,
        errors = summary.errors.len(),
        "grade import finished"
    );
    Ok(summary)
}

async fn accessible_student(
    pool: &PgPool,
    caller: &Caller,
    student_code: &str,
) -> AppResult<(Student, ClassInfo)> {
    let (student, class) = db::fetch_student(pool, student_code).await?;
    access::ensure_access_student(caller, &student, &class)?;
    Ok((student, class))
}

async fn managed_class(pool: &PgPool, caller: &Caller, class_code: &str) -> AppResult<ClassInfo> {
    let class = db::fetch_class(pool, class_code).await?;
    access::ensure_manage_class(caller, &class)?;
    Ok(class)
}

pub async fn student_gpa(
    pool: &PgPool,
    caller: &Caller,
    student_code: &str,
    semester: Option<&str>,
) -> AppResult<StudentGpa> {
    let (student, _) = accessible_student(pool, caller, student_code).await?;
    let records = db::fetch_grade_records(pool, student.id).await?;

    let (semester, cumulative) = match semester {
        Some(name) => {
            let semester = db::fetch_semester(pool, name).await?;
            (
                Some(aggregate::semester_gpa(&records, semester.id)),
                aggregate::cumulative_until(&records, semester.starts_on),
            )
        }
        None => (None, aggregate::cumulative(&records)),
    };

    Ok(StudentGpa {
        student_code: student.student_code,
        semester,
        cumulative,
    })
}

pub async fn student_risk(
    pool: &PgPool,
    settings: &Settings,
    caller: &Caller,
    student_code: &str,
    semester: &str,
) -> AppResult<RiskAssessment> {
    let (student, class) = accessible_student(pool, caller, student_code).await?;
    let semester = db::fetch_semester(pool, semester).await?;
    let records = db::fetch_grade_records(pool, student.id).await?;

    let cumulative = aggregate::cumulative_until(&records, semester.starts_on);
    let threshold = settings.risk.threshold_for(&class.cohort);
    Ok(risk::evaluate(&cumulative, threshold, &settings.risk))
}

async fn class_standings(
    pool: &PgPool,
    settings: &Settings,
    class: &ClassInfo,
    semester: &Semester,
) -> AppResult<(Vec<Student>, Vec<Standing>)> {
    let students = db::fetch_class_students(pool, class.id).await?;
    let mut records = db::fetch_class_grade_records(pool, class.id).await?;
    let history = db::fetch_warning_history(pool, class.id, semester.id).await?;
    let threshold = settings.risk.threshold_for(&class.cohort);

    let standings = students
        .iter()
        .map(|student| {
            let records = records.remove(&student.id).unwrap_or_default();
            let cumulative = aggregate::cumulative_until(&records, semester.starts_on);
            Standing {
                student_code: student.student_code.clone(),
                full_name: student.full_name.clone(),
                position: student.class_position,
                status: student.status,
                semester: aggregate::semester_gpa(&records, semester.id),
                cumulative,
                risk: risk::evaluate(&cumulative, threshold, &settings.risk),
                warned_this_semester: history
                    .get(&student.id)
                    .is_some_and(|entry| entry.this_semester),
            }
        })
        .collect();

    Ok((students, standings))
}

pub async fn class_risk(
    pool: &PgPool,
    settings: &Settings,
    caller: &Caller,
    class_code: &str,
    semester: &str,
) -> AppResult<Vec<StudentRisk>> {
    let class = managed_class(pool, caller, class_code).await?;
    let semester = db::fetch_semester(pool, semester).await?;
    let (_, standings) = class_standings(pool, settings, &class, &semester).await?;
    Ok(risk::rank(to_student_risks(&standings)))
}

fn to_student_risks(standings: &[Standing]) -> Vec<StudentRisk> {
    standings
        .iter()
        .map(|standing| StudentRisk {
            student_code: standing.student_code.clone(),
            full_name: standing.full_name.clone(),
            assessment: standing.risk.clone(),
        })
        .collect()
}

/// Warns every studying student of the class whose CPA is under threshold.
/// Only the advisor of the class (or an admin of its unit) may issue warnings.
pub async fn issue_warnings(
    pool: &PgPool,
    settings: &Settings,
    caller: &Caller,
    class_code: &str,
    semester: &str,
) -> AppResult<(usize, usize)> {
    if !caller.is_staff() {
        return Err(AppError::Forbidden(
            "only advisors may issue warnings".to_string(),
        ));
    }
    let class = managed_class(pool, caller, class_code).await?;
    let semester = db::fetch_semester(pool, semester).await?;
    let students = db::fetch_class_students(pool, class.id).await?;
    let mut records = db::fetch_class_grade_records(pool, class.id).await?;
    let history = db::fetch_warning_history(pool, class.id, semester.id).await?;
    let threshold = settings.risk.threshold_for(&class.cohort);

    let candidates: Vec<WarningCandidate> = students
        .into_iter()
        .map(|student| {
            let records = records.remove(&student.id).unwrap_or_default();
            let past = history.get(&student.id).copied().unwrap_or_default();
            WarningCandidate {
                student_id: student.id,
                student_code: student.student_code,
                status: student.status,
                prior_warnings: past.total,
                warned_this_semester: past.this_semester,
                cumulative: aggregate::cumulative_until(&records, semester.starts_on),
                threshold,
            }
        })
        .collect();

    let planned = warnings::plan(&candidates, settings.warnings);
    let (issued, dropped) = db::issue_warnings(pool, caller.user_id, semester.id, &planned).await?;
    tracing::info!(
        class = %class.code,
        semester = %semester.name,
        issued,
        dropped,
        "academic warnings issued"
    );
    Ok((issued, dropped))
}

pub async fn snapshot(
    pool: &PgPool,
    settings: &Settings,
    caller: &Caller,
    class_code: &str,
    semester: &str,
) -> AppResult<usize> {
    let class = managed_class(pool, caller, class_code).await?;
    let semester = db::fetch_semester(pool, semester).await?;
    let (students, standings) = class_standings(pool, settings, &class, &semester).await?;
    let mut awards = db::fetch_attended_awards(pool, class.id, semester.id).await?;

    let reports: Vec<SemesterReport> = students
        .iter()
        .zip(standings.iter())
        .map(|(student, standing)| {
            let awards = awards.remove(&student.id).unwrap_or_default();
            let training_points = points::training_points(&awards, settings.training);
            SemesterReport {
                student_id: student.id,
                semester_id: semester.id,
                semester: standing.semester,
                cumulative: standing.cumulative,
                training_points,
                training_rank: points::training_rank(training_points),
                outcome: report::outcome_label(
                    standing.status,
                    standing.warned_this_semester,
                    standing.risk.at_risk,
                ),
            }
        })
        .collect();

    let written = db::upsert_semester_reports(pool, &reports).await?;
    tracing::info!(class = %class.code, semester = %semester.name, written, "semester snapshot stored");
    Ok(written)
}

pub async fn class_report(
    pool: &PgPool,
    settings: &Settings,
    caller: &Caller,
    class_code: &str,
    semester: &str,
) -> AppResult<String> {
    let class = managed_class(pool, caller, class_code).await?;
    let semester = db::fetch_semester(pool, semester).await?;
    let (_, standings) = class_standings(pool, settings, &class, &semester).await?;
    let ranked = risk::rank(to_student_risks(&standings));
    let recent = db::fetch_recent_warnings(pool, class.id, 10).await?;

    Ok(report::build_report(&class, &semester.name, &standings, &ranked, &recent))
}

pub async fn register(
    pool: &PgPool,
    caller: &Caller,
    role_id: Uuid,
    student_code: &str,
) -> AppResult<RegistrationAction> {
    let (student, class) = db::fetch_student(pool, student_code).await?;
    match caller.role {
        Role::Student => access::ensure_access_student(caller, &student, &class)?,
        Role::Admin | Role::Advisor => access::ensure_manage_class(caller, &class)?,
    }

    let (role, action) = db::register_for_role(pool, role_id, student.id).await?;
    tracing::info!(
        student = %student.student_code,
        activity = %role.activity_id,
        role = %role.id,
        points = role.points,
        ?action,
        "activity registration recorded"
    );
    Ok(action)
}

/// Attendance is marked by the student's own advisor or an admin of the class unit.
pub async fn mark_registration(
    pool: &PgPool,
    caller: &Caller,
    role_id: Uuid,
    student_code: &str,
    status: RegistrationStatus,
) -> AppResult<RegistrationStatus> {
    let (student, class) = db::fetch_student(pool, student_code).await?;
    access::ensure_manage_class(caller, &class)?;
    let from = db::set_registration_status(pool, caller, role_id, student.id, status).await?;
    tracing::info!(student = %student.student_code, %from, to = %status, "registration status changed");
    Ok(from)
}

pub async fn training_points(
    pool: &PgPool,
    settings: &Settings,
    caller: &Caller,
    student_code: &str,
    semester: &str,
) -> AppResult<(i32, &'static str)> {
    let (student, class) = accessible_student(pool, caller, student_code).await?;
    let semester = db::fetch_semester(pool, semester).await?;
    let awards = db::fetch_attended_awards(pool, class.id, semester.id)
        .await?
        .remove(&student.id)
        .unwrap_or_default();

    let total = points::training_points(&awards, settings.training);
    Ok((total, points::training_rank(total)))
}
