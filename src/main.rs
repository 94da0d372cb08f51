use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod access;
mod activity;
mod aggregate;
mod db;
mod error;
mod grading;
mod import;
mod models;
mod points;
mod report;
mod risk;
mod service;
mod settings;
mod warnings;

use crate::access::Caller;
use crate::error::AppError;
use crate::models::{RegistrationStatus, Role};
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "academic-affairs")]
#[command(about = "Grades, GPA/CPA, dropout risk and academic warnings for student affairs", long_about = None)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
    /// Settings file; defaults to ./academic.toml when present
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    identity: Identity,
    #[command(subcommand)]
    command: Commands,
}

/// Caller identity, as injected by the upstream gateway.
#[derive(Args)]
struct Identity {
    #[arg(long = "role", env = "ACADEMIC_ROLE", global = true)]
    role: Option<String>,
    #[arg(long = "user-id", env = "ACADEMIC_USER_ID", global = true)]
    user_id: Option<Uuid>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demonstration faculty
    Seed,
    /// Convert a 10-point score to its letter grade and 4-point value
    Convert { score: f64 },
    /// Import grades from a CSV sheet (student_code,course_code,semester,score)
    ImportGrades {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show a student's GPA for a semester and CPA
    Gpa {
        #[arg(long)]
        student: String,
        #[arg(long)]
        semester: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Evaluate dropout risk for a student, or rank a whole class
    Risk {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        json: bool,
    },
    /// Issue academic warnings for a class
    Warn {
        #[arg(long)]
        class: String,
        #[arg(long)]
        semester: String,
    },
    /// Store per-student semester reports for a class
    Snapshot {
        #[arg(long)]
        class: String,
        #[arg(long)]
        semester: String,
    },
    /// Write a markdown class report
    Report {
        #[arg(long)]
        class: String,
        #[arg(long)]
        semester: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Register a student for an activity role
    Register {
        #[arg(long)]
        role_id: Uuid,
        #[arg(long)]
        student: String,
    },
    /// Record attendance or cancellation for a registration
    Mark {
        #[arg(long)]
        role_id: Uuid,
        #[arg(long)]
        student: String,
        #[arg(long)]
        status: String,
    },
    /// Show training points earned in a semester
    Points {
        #[arg(long)]
        student: String,
        #[arg(long)]
        semester: String,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Target {
    #[arg(long)]
    student: Option<String>,
    #[arg(long)]
    class: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_json = std::env::var("ACADEMIC_LOG_JSON")
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let status = err
                .downcast_ref::<AppError>()
                .map(AppError::status_code)
                .unwrap_or(500);
            tracing::error!(status, "{err:#}");
            eprintln!("error ({status}): {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Convert { score } = cli.command {
        let converted = grading::convert(score).map_err(AppError::from)?;
        println!(
            "{:.1} -> {} ({:.1} on the 4-point scale, {})",
            converted.score,
            converted.letter,
            converted.scale_4,
            if converted.passed { "pass" } else { "fail" }
        );
        return Ok(());
    }

    let settings = settings::load(cli.config.as_deref())?;
    let database_url = cli
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a production Postgres instance")?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        command => {
            let caller = resolve_caller(&pool, &cli.identity).await?;
            run_as(&pool, &settings, &caller, command).await?;
        }
    }

    Ok(())
}

async fn resolve_caller(pool: &PgPool, identity: &Identity) -> anyhow::Result<Caller> {
    let role: Role = identity
        .role
        .as_deref()
        .context("--role (or ACADEMIC_ROLE) is required")?
        .parse()?;
    let user_id = identity
        .user_id
        .context("--user-id (or ACADEMIC_USER_ID) is required")?;
    Ok(db::resolve_caller(pool, role, user_id).await?)
}

async fn run_as(
    pool: &PgPool,
    settings: &Settings,
    caller: &Caller,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::InitDb | Commands::Seed | Commands::Convert { .. } => {}
        Commands::ImportGrades { csv } => {
            let summary = service::import_grades(pool, caller, &csv).await?;
            println!(
                "Imported {} new and {} updated grades from {}.",
                summary.inserted,
                summary.updated,
                csv.display()
            );
            for err in &summary.errors {
                println!("- line {}: {}", err.line, err.message);
            }
        }
        Commands::Gpa {
            student,
            semester,
            json,
        } => {
            let gpa = service::student_gpa(pool, caller, &student, semester.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&gpa)?);
            } else {
                if let (Some(name), Some(summary)) = (semester.as_deref(), gpa.semester) {
                    println!(
                        "GPA {} for {}: {:.2} / 4 ({:.2} / 10), {} of {} credits passed",
                        name,
                        gpa.student_code,
                        summary.gpa_4,
                        summary.gpa_10,
                        summary.credits_passed,
                        summary.credits_registered
                    );
                }
                println!(
                    "CPA for {}: {:.2} / 4 ({:.2} / 10), {} credits passed",
                    gpa.student_code,
                    gpa.cumulative.gpa_4,
                    gpa.cumulative.gpa_10,
                    gpa.cumulative.credits_passed
                );
            }
        }
        Commands::Risk {
            target,
            semester,
            json,
        } => {
            if let Some(student) = target.student {
                let assessment =
                    service::student_risk(pool, settings, caller, &student, &semester).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&assessment)?);
                } else if let Some(severity) = assessment.severity {
                    println!("{student} is at {severity} risk:");
                    for reason in &assessment.reasons {
                        println!("- {reason}");
                    }
                } else {
                    println!(
                        "{student} is not at risk (CPA {:.2}, threshold {:.2}).",
                        assessment.cpa_4, assessment.threshold
                    );
                }
            } else if let Some(class) = target.class {
                let ranked = service::class_risk(pool, settings, caller, &class, &semester).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&ranked)?);
                } else if ranked.is_empty() {
                    println!("No students at risk in {class}.");
                } else {
                    println!("Students at risk in {class}:");
                    for student in &ranked {
                        println!(
                            "- {} ({}) {} at CPA {:.2}",
                            student.full_name,
                            student.student_code,
                            student
                                .assessment
                                .severity
                                .map(|s| s.to_string())
                                .unwrap_or_default(),
                            student.assessment.cpa_4
                        );
                    }
                }
            }
        }
        Commands::Warn { class, semester } => {
            let (issued, dropped) =
                service::issue_warnings(pool, settings, caller, &class, &semester).await?;
            println!("Issued {issued} warnings in {class}; {dropped} students dropped.");
        }
        Commands::Snapshot { class, semester } => {
            let written = service::snapshot(pool, settings, caller, &class, &semester).await?;
            println!("Stored {written} semester reports for {class}.");
        }
        Commands::Report {
            class,
            semester,
            out,
        } => {
            let report = service::class_report(pool, settings, caller, &class, &semester).await?;
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Register { role_id, student } => {
            let action = service::register(pool, caller, role_id, &student).await?;
            match action {
                activity::RegistrationAction::Insert => println!("{student} registered."),
                activity::RegistrationAction::Reactivate => {
                    println!("{student} registered again after cancelling.")
                }
            }
        }
        Commands::Mark {
            role_id,
            student,
            status,
        } => {
            let status: RegistrationStatus = status.parse()?;
            let from = service::mark_registration(pool, caller, role_id, &student, status).await?;
            println!("{student}: {from} -> {status}.");
        }
        Commands::Points { student, semester } => {
            let (points, rank) =
                service::training_points(pool, settings, caller, &student, &semester).await?;
            println!("{student} earned {points} training points in {semester} ({rank}).");
        }
    }

    Ok(())
}
