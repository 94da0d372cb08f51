use std::collections::HashMap;

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::access::{self, Caller};
use crate::activity::{self, RegistrationAction};
use crate::error::{AppError, AppResult};
use crate::import::{ImportSummary, ParsedImport, RowError};
use crate::models::{
    ActivityRole, ClassInfo, GradeRecord, RegistrationStatus, Role, SemesterReport, Semester,
    Student, StudentStatus, WarningRecord,
};
use crate::warnings::PlannedWarning;

const SEED_UNIT_ID: &str = "6f1c2a8e-0b7d-4c55-9d0e-2f4f9b1d7a10";
const SEED_ADMIN_ID: &str = "a3b4c5d6-1111-4e2f-8a9b-0c1d2e3f4a5b";
const SEED_ADVISOR_ID: &str = "b7e8f9a0-2222-4b3c-9d4e-5f6a7b8c9d0e";
const SEED_CLASS_ID: &str = "c1d2e3f4-3333-4a5b-8c6d-7e8f9a0b1c2d";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let unit_id = Uuid::parse_str(SEED_UNIT_ID)?;
    let admin_id = Uuid::parse_str(SEED_ADMIN_ID)?;
    let advisor_id = Uuid::parse_str(SEED_ADVISOR_ID)?;
    let class_id = Uuid::parse_str(SEED_CLASS_ID)?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO academic_affairs.units (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO NOTHING
        "#,
    )
    .bind(unit_id)
    .bind("Faculty of Information Technology")
    .execute(&mut *tx)
    .await?;

    for (id, name, email, role) in [
        (admin_id, "Tran Thi Binh", "binh.tran@faculty.example.edu", "admin"),
        (advisor_id, "Le Van Cuong", "cuong.le@faculty.example.edu", "advisor"),
    ] {
        sqlx::query(
            r#"
            INSERT INTO academic_affairs.advisors (id, unit_id, full_name, email, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, role = EXCLUDED.role
            "#,
        )
        .bind(id)
        .bind(unit_id)
        .bind(name)
        .bind(email)
        .bind(role)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO academic_affairs.classes (id, unit_id, advisor_id, code, cohort)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (code) DO NOTHING
        "#,
    )
    .bind(class_id)
    .bind(unit_id)
    .bind(advisor_id)
    .bind("CNTT-K66")
    .bind("K66")
    .execute(&mut *tx)
    .await?;

    let students = [
        ("SV66001", "Nguyen Van An", "an.nguyen@student.example.edu", "leader"),
        ("SV66002", "Pham Thi Hoa", "hoa.pham@student.example.edu", "secretary"),
        ("SV66003", "Do Minh Khoa", "khoa.do@student.example.edu", "member"),
    ];
    for (code, name, email, position) in students {
        sqlx::query(
            r#"
            INSERT INTO academic_affairs.students
            (id, class_id, student_code, full_name, email, class_position)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_code) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(class_id)
        .bind(code)
        .bind(name)
        .bind(email)
        .bind(position)
        .execute(&mut *tx)
        .await?;
    }

    for (code, name, credits) in [
        ("IT1110", "Introduction to Programming", 4),
        ("MI1111", "Calculus I", 4),
        ("PH1110", "Physics I", 3),
        ("IT3100", "Data Structures", 3),
    ] {
        sqlx::query(
            r#"
            INSERT INTO academic_affairs.courses (id, unit_id, code, name, credits)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(unit_id)
        .bind(code)
        .bind(name)
        .bind(credits)
        .execute(&mut *tx)
        .await?;
    }

    for (name, starts_on) in [
        ("2024-1", NaiveDate::from_ymd_opt(2024, 9, 2).context("invalid date")?),
        ("2024-2", NaiveDate::from_ymd_opt(2025, 2, 10).context("invalid date")?),
    ] {
        sqlx::query(
            r#"
            INSERT INTO academic_affairs.semesters (id, name, starts_on, ends_on)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(starts_on)
        .bind(starts_on + Duration::weeks(20))
        .execute(&mut *tx)
        .await?;
    }

    let semester_id: Uuid =
        sqlx::query("SELECT id FROM academic_affairs.semesters WHERE name = '2024-1'")
            .fetch_one(&mut *tx)
            .await?
            .get("id");
    let activity_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO academic_affairs.activities
        (id, semester_id, unit_id, title, registration_deadline)
        SELECT $1, $2, $3, $4, $5
        WHERE NOT EXISTS (
            SELECT 1 FROM academic_affairs.activities WHERE title = $4 AND semester_id = $2
        )
        "#,
    )
    .bind(activity_id)
    .bind(semester_id)
    .bind(unit_id)
    .bind("Green Summer Volunteer Campaign")
    .bind(Utc::now() + Duration::days(30))
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() > 0 {
        for (name, points, slots) in [("Organizer", 15, Some(3)), ("Volunteer", 10, None)] {
            sqlx::query(
                r#"
                INSERT INTO academic_affairs.activity_roles (id, activity_id, name, points, max_slots)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(activity_id)
            .bind(name)
            .bind(points)
            .bind(slots)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

fn parse_text<T>(row: &PgRow, column: &str) -> AppResult<T>
where
    T: std::str::FromStr<Err = AppError>,
{
    row.get::<String, _>(column).parse()
}

fn student_from_row(row: &PgRow) -> AppResult<Student> {
    Ok(Student {
        id: row.get("id"),
        student_code: row.get("student_code"),
        full_name: row.get("full_name"),
        status: parse_text(row, "status")?,
        class_position: parse_text(row, "class_position")?,
    })
}

fn class_from_row(row: &PgRow) -> ClassInfo {
    ClassInfo {
        id: row.get("class_id"),
        unit_id: row.get("unit_id"),
        advisor_id: row.get("advisor_id"),
        code: row.get("class_code"),
        cohort: row.get("cohort"),
    }
}

/// Confirms the caller identity exists and, for staff, that the claimed role matches.
pub async fn resolve_caller(pool: &PgPool, role: Role, user_id: Uuid) -> AppResult<Caller> {
    match role {
        Role::Student => {
            sqlx::query("SELECT 1 FROM academic_affairs.students WHERE id = $1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| AppError::not_found("student", user_id.to_string()))?;
            Ok(Caller {
                role,
                user_id,
                unit_id: None,
            })
        }
        Role::Admin | Role::Advisor => {
            let row = sqlx::query("SELECT unit_id, role FROM academic_affairs.advisors WHERE id = $1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| AppError::not_found("advisor", user_id.to_string()))?;
            let stored: Role = parse_text(&row, "role")?;
            if role == Role::Admin && stored != Role::Admin {
                return Err(AppError::Forbidden(
                    "caller does not hold the admin role".to_string(),
                ));
            }
            Ok(Caller {
                role,
                user_id,
                unit_id: Some(row.get("unit_id")),
            })
        }
    }
}

pub async fn fetch_student(pool: &PgPool, student_code: &str) -> AppResult<(Student, ClassInfo)> {
    let row = sqlx::query(
        r#"
        SELECT s.id, s.class_id, s.student_code, s.full_name, s.status, s.class_position,
               c.code AS class_code, c.unit_id, c.advisor_id, c.cohort
        FROM academic_affairs.students s
        JOIN academic_affairs.classes c ON c.id = s.class_id
        WHERE s.student_code = $1
        "#,
    )
    .bind(student_code)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("student", student_code))?;

    Ok((student_from_row(&row)?, class_from_row(&row)))
}

pub async fn fetch_class(pool: &PgPool, class_code: &str) -> AppResult<ClassInfo> {
    let row = sqlx::query(
        r#"
        SELECT id AS class_id, unit_id, advisor_id, code AS class_code, cohort
        FROM academic_affairs.classes
        WHERE code = $1
        "#,
    )
    .bind(class_code)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("class", class_code))?;

    Ok(class_from_row(&row))
}

pub async fn fetch_class_students(pool: &PgPool, class_id: Uuid) -> AppResult<Vec<Student>> {
    let rows = sqlx::query(
        r#"
        SELECT id, student_code, full_name, status, class_position
        FROM academic_affairs.students
        WHERE class_id = $1
        ORDER BY student_code
        "#,
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(student_from_row).collect()
}

pub async fn fetch_semester(pool: &PgPool, name: &str) -> AppResult<Semester> {
    let row = sqlx::query(
        "SELECT id, name, starts_on FROM academic_affairs.semesters WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("semester", name))?;

    Ok(Semester {
        id: row.get("id"),
        name: row.get("name"),
        starts_on: row.get("starts_on"),
    })
}

const GRADE_RECORD_SELECT: &str = r#"
    SELECT g.student_id, c.code AS course_code, c.credits, g.semester_id,
           sem.starts_on, g.score
    FROM academic_affairs.course_grades g
    JOIN academic_affairs.courses c ON c.id = g.course_id
    JOIN academic_affairs.semesters sem ON sem.id = g.semester_id
"#;

fn grade_record_from_row(row: &PgRow) -> GradeRecord {
    GradeRecord {
        course_code: row.get("course_code"),
        semester_id: row.get("semester_id"),
        semester_starts_on: row.get("starts_on"),
        credits: row.get("credits"),
        score: row.get("score"),
    }
}

pub async fn fetch_grade_records(pool: &PgPool, student_id: Uuid) -> AppResult<Vec<GradeRecord>> {
    let query = format!("{GRADE_RECORD_SELECT} WHERE g.student_id = $1 ORDER BY sem.starts_on");
    let rows = sqlx::query(&query).bind(student_id).fetch_all(pool).await?;
    Ok(rows.iter().map(grade_record_from_row).collect())
}

pub async fn fetch_class_grade_records(
    pool: &PgPool,
    class_id: Uuid,
) -> AppResult<HashMap<Uuid, Vec<GradeRecord>>> {
    let query = format!(
        "{GRADE_RECORD_SELECT} \
         JOIN academic_affairs.students s ON s.id = g.student_id \
         WHERE s.class_id = $1 ORDER BY sem.starts_on"
    );
    let rows = sqlx::query(&query).bind(class_id).fetch_all(pool).await?;

    let mut records: HashMap<Uuid, Vec<GradeRecord>> = HashMap::new();
    for row in rows {
        records
            .entry(row.get("student_id"))
            .or_default()
            .push(grade_record_from_row(&row));
    }
    Ok(records)
}

/// Upserts parsed grade rows in one transaction. Rows that cannot be resolved or
/// fall outside the caller's unit are reported; database failures roll back everything.
pub async fn import_grades(
    pool: &PgPool,
    caller: &Caller,
    parsed: ParsedImport,
) -> AppResult<ImportSummary> {
    let mut summary = ImportSummary {
        errors: parsed.errors,
        ..ImportSummary::default()
    };
    let mut tx = pool.begin().await?;

    for row in parsed.rows {
        let student = sqlx::query(
            r#"
            SELECT s.id, c.unit_id
            FROM academic_affairs.students s
            JOIN academic_affairs.classes c ON c.id = s.class_id
            WHERE s.student_code = $1
            "#,
        )
        .bind(&row.student_code)
        .fetch_optional(&mut *tx)
        .await?;
        let course = sqlx::query("SELECT id FROM academic_affairs.courses WHERE code = $1")
            .bind(&row.course_code)
            .fetch_optional(&mut *tx)
            .await?;
        let semester = sqlx::query("SELECT id FROM academic_affairs.semesters WHERE name = $1")
            .bind(&row.semester)
            .fetch_optional(&mut *tx)
            .await?;

        let (student, course, semester) = match (student, course, semester) {
            (Some(student), Some(course), Some(semester)) => (student, course, semester),
            (student, course, semester) => {
                let mut missing = Vec::new();
                if student.is_none() {
                    missing.push(format!("unknown student {}", row.student_code));
                }
                if course.is_none() {
                    missing.push(format!("unknown course {}", row.course_code));
                }
                if semester.is_none() {
                    missing.push(format!("unknown semester {}", row.semester));
                }
                summary.errors.push(RowError {
                    line: row.line,
                    message: missing.join("; "),
                });
                continue;
            }
        };

        if let Err(err) = access::ensure_manage_unit(caller, student.get("unit_id")) {
            summary.errors.push(RowError {
                line: row.line,
                message: err.to_string(),
            });
            continue;
        }

        let inserted: bool = sqlx::query(
            r#"
            INSERT INTO academic_affairs.course_grades
            (id, student_id, course_id, semester_id, score, letter_grade, score_4, passed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (student_id, course_id, semester_id) DO UPDATE
            SET score = EXCLUDED.score,
                letter_grade = EXCLUDED.letter_grade,
                score_4 = EXCLUDED.score_4,
                passed = EXCLUDED.passed,
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student.get::<Uuid, _>("id"))
        .bind(course.get::<Uuid, _>("id"))
        .bind(semester.get::<Uuid, _>("id"))
        .bind(row.grade.map(|g| g.score))
        .bind(row.grade.map(|g| g.letter))
        .bind(row.grade.map(|g| g.scale_4))
        .bind(row.grade.map(|g| g.passed))
        .fetch_one(&mut *tx)
        .await?
        .get("inserted");

        if inserted {
            summary.inserted += 1;
        } else {
            summary.updated += 1;
        }
    }

    tx.commit().await?;
    summary.errors.sort_by_key(|err| err.line);
    Ok(summary)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WarningHistory {
    pub total: i32,
    pub this_semester: bool,
}

pub async fn fetch_warning_history(
    pool: &PgPool,
    class_id: Uuid,
    semester_id: Uuid,
) -> AppResult<HashMap<Uuid, WarningHistory>> {
    let rows = sqlx::query(
        r#"
        SELECT w.student_id,
               COUNT(*)::INT AS total,
               BOOL_OR(w.semester_id = $2) AS this_semester
        FROM academic_affairs.academic_warnings w
        JOIN academic_affairs.students s ON s.id = w.student_id
        WHERE s.class_id = $1
        GROUP BY w.student_id
        "#,
    )
    .bind(class_id)
    .bind(semester_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            (
                row.get("student_id"),
                WarningHistory {
                    total: row.get("total"),
                    this_semester: row.get("this_semester"),
                },
            )
        })
        .collect())
}

/// Persists planned warnings and any resulting drops atomically.
/// Returns the number of warnings written and students dropped.
pub async fn issue_warnings(
    pool: &PgPool,
    advisor_id: Uuid,
    semester_id: Uuid,
    planned: &[PlannedWarning],
) -> AppResult<(usize, usize)> {
    let mut tx = pool.begin().await?;
    let mut issued = 0usize;
    let mut dropped = 0usize;

    for warning in planned {
        let result = sqlx::query(
            r#"
            INSERT INTO academic_affairs.academic_warnings
            (id, student_id, semester_id, advisor_id, level, cpa_4, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (student_id, semester_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(warning.student_id)
        .bind(semester_id)
        .bind(advisor_id)
        .bind(warning.level)
        .bind(warning.cpa_4)
        .bind(&warning.reason)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            continue;
        }
        issued += 1;

        if warning.triggers_drop && mark_dropped(&mut tx, warning.student_id).await? {
            tracing::info!(
                student = %warning.student_code,
                level = warning.level,
                "student dropped after accumulated warnings"
            );
            dropped += 1;
        }
    }

    tx.commit().await?;
    Ok((issued, dropped))
}

async fn mark_dropped(tx: &mut Transaction<'_, Postgres>, student_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE academic_affairs.students SET status = $2 WHERE id = $1 AND status = $3",
    )
    .bind(student_id)
    .bind(StudentStatus::Dropped.as_str())
    .bind(StudentStatus::Studying.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_recent_warnings(
    pool: &PgPool,
    class_id: Uuid,
    limit: i64,
) -> AppResult<Vec<WarningRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT s.student_code, s.full_name, sem.name AS semester_name,
               w.level, w.cpa_4, w.issued_at
        FROM academic_affairs.academic_warnings w
        JOIN academic_affairs.students s ON s.id = w.student_id
        JOIN academic_affairs.semesters sem ON sem.id = w.semester_id
        WHERE s.class_id = $1
        ORDER BY w.issued_at DESC
        LIMIT $2
        "#,
    )
    .bind(class_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| WarningRecord {
            student_code: row.get("student_code"),
            full_name: row.get("full_name"),
            semester_name: row.get("semester_name"),
            level: row.get("level"),
            cpa_4: row.get("cpa_4"),
            issued_at: row.get("issued_at"),
        })
        .collect())
}

async fn lock_activity_role(
    tx: &mut Transaction<'_, Postgres>,
    role_id: Uuid,
) -> AppResult<ActivityRole> {
    let row = sqlx::query(
        r#"
        SELECT r.id, r.activity_id, r.points, r.max_slots,
               a.status AS activity_status, a.registration_deadline, a.unit_id
        FROM academic_affairs.activity_roles r
        JOIN academic_affairs.activities a ON a.id = r.activity_id
        WHERE r.id = $1
        FOR UPDATE OF r
        "#,
    )
    .bind(role_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::not_found("activity role", role_id.to_string()))?;

    let taken_slots: i64 = sqlx::query(
        r#"
        SELECT COUNT(*) AS taken
        FROM academic_affairs.activity_registrations
        WHERE role_id = $1 AND status <> 'cancelled'
        "#,
    )
    .bind(role_id)
    .fetch_one(&mut **tx)
    .await?
    .get("taken");

    Ok(ActivityRole {
        id: row.get("id"),
        activity_id: row.get("activity_id"),
        activity_status: parse_text(&row, "activity_status")?,
        registration_deadline: row.get("registration_deadline"),
        unit_id: row.get("unit_id"),
        points: row.get("points"),
        max_slots: row.get("max_slots"),
        taken_slots,
    })
}

async fn registration_status(
    tx: &mut Transaction<'_, Postgres>,
    role_id: Uuid,
    student_id: Uuid,
) -> AppResult<Option<RegistrationStatus>> {
    let row = sqlx::query(
        r#"
        SELECT status FROM academic_affairs.activity_registrations
        WHERE role_id = $1 AND student_id = $2
        FOR UPDATE
        "#,
    )
    .bind(role_id)
    .bind(student_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|row| parse_text(&row, "status")).transpose()
}

/// Registers a student for a role. The role row is locked so the slot count
/// cannot be overrun by concurrent registrations.
pub async fn register_for_role(
    pool: &PgPool,
    role_id: Uuid,
    student_id: Uuid,
) -> AppResult<(ActivityRole, RegistrationAction)> {
    let mut tx = pool.begin().await?;
    let role = lock_activity_role(&mut tx, role_id).await?;
    let existing = registration_status(&mut tx, role_id, student_id).await?;
    let action = activity::check_registration(&role, existing, Utc::now())?;

    match action {
        RegistrationAction::Insert => {
            sqlx::query(
                r#"
                INSERT INTO academic_affairs.activity_registrations (id, role_id, student_id, status)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(role_id)
            .bind(student_id)
            .bind(RegistrationStatus::Registered.as_str())
            .execute(&mut *tx)
            .await?;
        }
        RegistrationAction::Reactivate => {
            update_registration(&mut tx, role_id, student_id, RegistrationStatus::Registered)
                .await?;
        }
    }

    tx.commit().await?;
    Ok((role, action))
}

/// Moves a registration to a new status; the caller must be staff of the activity's unit.
pub async fn set_registration_status(
    pool: &PgPool,
    caller: &Caller,
    role_id: Uuid,
    student_id: Uuid,
    to: RegistrationStatus,
) -> AppResult<RegistrationStatus> {
    let mut tx = pool.begin().await?;
    let role = lock_activity_role(&mut tx, role_id).await?;
    access::ensure_manage_unit(caller, role.unit_id)?;

    let from = registration_status(&mut tx, role_id, student_id)
        .await?
        .ok_or_else(|| AppError::not_found("registration", format!("{role_id}/{student_id}")))?;
    activity::check_transition(from, to)?;
    update_registration(&mut tx, role_id, student_id, to).await?;

    tx.commit().await?;
    Ok(from)
}

async fn update_registration(
    tx: &mut Transaction<'_, Postgres>,
    role_id: Uuid,
    student_id: Uuid,
    status: RegistrationStatus,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE academic_affairs.activity_registrations
        SET status = $3, updated_at = now()
        WHERE role_id = $1 AND student_id = $2
        "#,
    )
    .bind(role_id)
    .bind(student_id)
    .bind(status.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Role awards of attended registrations in a semester, keyed by student.
pub async fn fetch_attended_awards(
    pool: &PgPool,
    class_id: Uuid,
    semester_id: Uuid,
) -> AppResult<HashMap<Uuid, Vec<i32>>> {
    let rows = sqlx::query(
        r#"
        SELECT reg.student_id, r.points
        FROM academic_affairs.activity_registrations reg
        JOIN academic_affairs.activity_roles r ON r.id = reg.role_id
        JOIN academic_affairs.activities a ON a.id = r.activity_id
        JOIN academic_affairs.students s ON s.id = reg.student_id
        WHERE s.class_id = $1 AND a.semester_id = $2 AND reg.status = 'attended'
        "#,
    )
    .bind(class_id)
    .bind(semester_id)
    .fetch_all(pool)
    .await?;

    let mut awards: HashMap<Uuid, Vec<i32>> = HashMap::new();
    for row in rows {
        awards
            .entry(row.get("student_id"))
            .or_default()
            .push(row.get("points"));
    }
    Ok(awards)
}

pub async fn upsert_semester_reports(pool: &PgPool, reports: &[SemesterReport]) -> AppResult<usize> {
    let mut tx = pool.begin().await?;

    for report in reports {
        sqlx::query(
            r#"
            INSERT INTO academic_affairs.semester_reports
            (id, student_id, semester_id, gpa_10, gpa_4, cpa_10, cpa_4,
             credits_registered, credits_passed, training_points, training_rank, outcome)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (student_id, semester_id) DO UPDATE
            SET gpa_10 = EXCLUDED.gpa_10,
                gpa_4 = EXCLUDED.gpa_4,
                cpa_10 = EXCLUDED.cpa_10,
                cpa_4 = EXCLUDED.cpa_4,
                credits_registered = EXCLUDED.credits_registered,
                credits_passed = EXCLUDED.credits_passed,
                training_points = EXCLUDED.training_points,
                training_rank = EXCLUDED.training_rank,
                outcome = EXCLUDED.outcome,
                generated_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(report.student_id)
        .bind(report.semester_id)
        .bind(report.semester.gpa_10)
        .bind(report.semester.gpa_4)
        .bind(report.cumulative.gpa_10)
        .bind(report.cumulative.gpa_4)
        .bind(report.semester.credits_registered)
        .bind(report.semester.credits_passed)
        .bind(report.training_points)
        .bind(report.training_rank)
        .bind(report.outcome)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(reports.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import;
    use crate::service;
    use crate::settings::{DatabaseSettings, RiskPolicy, Settings, TrainingPolicy, WarningPolicy};

    fn settings() -> Settings {
        Settings {
            database: DatabaseSettings { max_connections: 1 },
            risk: RiskPolicy::default(),
            warnings: WarningPolicy::default(),
            training: TrainingPolicy::default(),
        }
    }

    async fn staff(pool: &PgPool, role: Role, id: &str) -> Caller {
        resolve_caller(pool, role, Uuid::parse_str(id).unwrap()).await.unwrap()
    }

    async fn import_sheet(pool: &PgPool, caller: &Caller, rows: &str) -> ImportSummary {
        let sheet = format!("student_code,course_code,semester,score\n{rows}");
        import_grades(pool, caller, import::parse_grades(sheet.as_bytes()))
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn reimporting_a_grade_updates_the_existing_row(pool: PgPool) {
        seed(&pool).await.unwrap();
        let admin = staff(&pool, Role::Admin, SEED_ADMIN_ID).await;

        let first = import_sheet(&pool, &admin, "SV66001,IT1110,2024-1,5.0\n").await;
        assert_eq!((first.inserted, first.updated), (1, 0));
        assert!(first.errors.is_empty());

        let second = import_sheet(&pool, &admin, "SV66001,IT1110,2024-1,8.6\n").await;
        assert_eq!((second.inserted, second.updated), (0, 1));

        let row = sqlx::query("SELECT COUNT(*) AS total, MAX(score) AS score FROM academic_affairs.course_grades")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("total"), 1);
        assert_eq!(row.get::<Option<f64>, _>("score"), Some(8.6));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn third_warning_drops_the_student_once(pool: PgPool) {
        seed(&pool).await.unwrap();
        sqlx::query(
            r#"
            INSERT INTO academic_affairs.semesters (id, name, starts_on, ends_on)
            VALUES ($1, '2025-1', '2025-09-01', '2026-01-19')
            "#,
        )
        .bind(Uuid::new_v4())
        .execute(&pool)
        .await
        .unwrap();

        let admin = staff(&pool, Role::Admin, SEED_ADMIN_ID).await;
        let summary = import_sheet(
            &pool,
            &admin,
            "SV66003,IT1110,2024-1,2.0\nSV66003,MI1111,2024-2,2.0\nSV66003,PH1110,2025-1,2.0\n",
        )
        .await;
        assert_eq!(summary.inserted, 3);

        let advisor = staff(&pool, Role::Advisor, SEED_ADVISOR_ID).await;
        let settings = settings();
        let mut outcomes = Vec::new();
        for semester in ["2024-1", "2024-2", "2025-1"] {
            outcomes.push(
                service::issue_warnings(&pool, &settings, &advisor, "CNTT-K66", semester)
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(outcomes, vec![(1, 0), (1, 0), (1, 1)]);

        let (student, _) = fetch_student(&pool, "SV66003").await.unwrap();
        assert_eq!(student.status, StudentStatus::Dropped);

        let rerun = service::issue_warnings(&pool, &settings, &advisor, "CNTT-K66", "2025-1")
            .await
            .unwrap();
        assert_eq!(rerun, (0, 0));
        let levels: Vec<i32> = sqlx::query(
            "SELECT level FROM academic_affairs.academic_warnings ORDER BY level",
        )
        .fetch_all(&pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.get("level"))
        .collect();
        assert_eq!(levels, vec![1, 2, 3]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn attendance_is_marked_only_by_the_class_advisor(pool: PgPool) {
        seed(&pool).await.unwrap();
        let colleague_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO academic_affairs.advisors (id, unit_id, full_name, email)
            VALUES ($1, $2, 'Vu Thi Lan', 'lan.vu@faculty.example.edu')
            "#,
        )
        .bind(colleague_id)
        .bind(Uuid::parse_str(SEED_UNIT_ID).unwrap())
        .execute(&pool)
        .await
        .unwrap();
        let role_id: Uuid =
            sqlx::query("SELECT id FROM academic_affairs.activity_roles WHERE name = 'Volunteer'")
                .fetch_one(&pool)
                .await
                .unwrap()
                .get("id");

        let advisor = staff(&pool, Role::Advisor, SEED_ADVISOR_ID).await;
        service::register(&pool, &advisor, role_id, "SV66001").await.unwrap();

        let colleague = resolve_caller(&pool, Role::Advisor, colleague_id).await.unwrap();
        let err = service::mark_registration(
            &pool,
            &colleague,
            role_id,
            "SV66001",
            RegistrationStatus::Attended,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 403);

        let from = service::mark_registration(
            &pool,
            &advisor,
            role_id,
            "SV66001",
            RegistrationStatus::Attended,
        )
        .await
        .unwrap();
        assert_eq!(from, RegistrationStatus::Registered);
    }
}
