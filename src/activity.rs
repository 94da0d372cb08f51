use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};
use crate::models::{ActivityRole, ActivityStatus, RegistrationStatus};

/// What registering should do given the student's existing row for the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationAction {
    Insert,
    Reactivate,
}

pub fn check_registration(
    role: &ActivityRole,
    existing: Option<RegistrationStatus>,
    now: DateTime<Utc>,
) -> AppResult<RegistrationAction> {
    if role.activity_status != ActivityStatus::Open {
        return Err(AppError::Conflict(format!(
            "activity is {}, registration is closed",
            role.activity_status
        )));
    }
    if now > role.registration_deadline {
        return Err(AppError::Conflict(format!(
            "registration deadline {} has passed",
            role.registration_deadline
        )));
    }

    let action = match existing {
        None => RegistrationAction::Insert,
        Some(RegistrationStatus::Cancelled) => RegistrationAction::Reactivate,
        Some(status) => {
            return Err(AppError::Conflict(format!(
                "student already holds this role ({status})"
            )))
        }
    };

    if let Some(max_slots) = role.max_slots {
        if role.taken_slots >= i64::from(max_slots) {
            return Err(AppError::Conflict(format!(
                "all {max_slots} slots for this role are taken"
            )));
        }
    }

    Ok(action)
}

pub fn check_transition(from: RegistrationStatus, to: RegistrationStatus) -> AppResult<()> {
    use RegistrationStatus::*;

    let allowed = matches!(
        (from, to),
        (Registered, Attended)
            | (Registered, Absent)
            | (Registered, Cancelled)
            | (Attended, Absent)
            | (Absent, Attended)
            | (Cancelled, Registered)
    );

    if allowed {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "cannot move a registration from {from} to {to}"
        )))
    }
}
