use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// HTTP-style status for the failure class, stable across callers.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 422,
            AppError::Forbidden(_) => 403,
            AppError::NotFound { .. } => 404,
            AppError::Conflict(_) => 409,
            AppError::Database(sqlx::Error::RowNotFound) => 404,
            AppError::Database(_) | AppError::Other(_) => 500,
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_failure_class() {
        assert_eq!(AppError::invalid("score", "out of range").status_code(), 422);
        assert_eq!(AppError::Forbidden("not your class".into()).status_code(), 403);
        assert_eq!(AppError::not_found("student", "SV001").status_code(), 404);
        assert_eq!(AppError::Conflict("slot taken".into()).status_code(), 409);
        assert_eq!(AppError::Database(sqlx::Error::RowNotFound).status_code(), 404);
        assert_eq!(AppError::Other(anyhow::anyhow!("boom")).status_code(), 500);
    }

    #[test]
    fn validation_message_lists_every_field() {
        let err = AppError::Validation(vec![
            FieldError::new("score", "must be within 0..=10"),
            FieldError::new("course_code", "is required"),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: score: must be within 0..=10; course_code: is required"
        );
    }
}
