//! Ownership checks for the caller identity passed on every command.
//!
//! Admins act within their unit, advisors within the classes they administer,
//! and students only on their own records.

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ClassInfo, Role, Student};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub role: Role,
    pub user_id: Uuid,
    /// Unit of the advisor record behind a staff caller.
    pub unit_id: Option<Uuid>,
}

impl Caller {
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Advisor)
    }
}

pub fn ensure_manage_class(caller: &Caller, class: &ClassInfo) -> AppResult<()> {
    let allowed = match caller.role {
        Role::Admin => caller.unit_id == Some(class.unit_id),
        Role::Advisor => caller.user_id == class.advisor_id,
        Role::Student => false,
    };
    check(allowed, caller, || format!("class {} is outside your scope", class.code))
}

pub fn ensure_manage_unit(caller: &Caller, unit_id: Uuid) -> AppResult<()> {
    let allowed = caller.is_staff() && caller.unit_id == Some(unit_id);
    check(allowed, caller, || "this unit is outside your scope".to_string())
}

pub fn ensure_admin(caller: &Caller) -> AppResult<()> {
    check(caller.role == Role::Admin, caller, || {
        "only admins may perform this action".to_string()
    })
}

/// Students see themselves; staff see students of classes they manage.
pub fn ensure_access_student(caller: &Caller, student: &Student, class: &ClassInfo) -> AppResult<()> {
    match caller.role {
        Role::Student => check(caller.user_id == student.id, caller, || {
            "students may only access their own records".to_string()
        }),
        Role::Admin | Role::Advisor => ensure_manage_class(caller, class),
    }
}

fn check(allowed: bool, caller: &Caller, message: impl FnOnce() -> String) -> AppResult<()> {
    if allowed {
        return Ok(());
    }
    let message = message();
    tracing::warn!(role = %caller.role, user_id = %caller.user_id, %message, "access denied");
    Err(AppError::Forbidden(message))
}
