use crate::query::TemplateError;
use rusqlite::ffi;

/// Domain failures surfaced by the services.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    ValidationFailed(String),
    #[error("query template error: {0}")]
    Template(#[from] TemplateError),
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for FeedError {
    fn from(err: rusqlite::Error) -> Self {
        FeedError::Internal(err.into())
    }
}

impl FeedError {
    /// Maps a foreign-key violation raised by a dependent insert to
    /// `NotFound(what)`; every other failure stays internal.
    pub(crate) fn missing_on_fk(err: anyhow::Error, what: &'static str) -> Self {
        if is_foreign_key_violation(&err) {
            FeedError::NotFound(what)
        } else {
            FeedError::Internal(err)
        }
    }
}

fn sqlite_failure(err: &anyhow::Error) -> Option<(&ffi::Error, Option<&str>)> {
    match err.downcast_ref::<rusqlite::Error>()? {
        rusqlite::Error::SqliteFailure(code, message) => Some((code, message.as_deref())),
        _ => None,
    }
}

pub(crate) fn is_foreign_key_violation(err: &anyhow::Error) -> bool {
    matches!(
        sqlite_failure(err),
        Some((code, _)) if code.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Returns the constraint message (`UNIQUE constraint failed: users.email`)
/// when `err` is a unique violation.
pub(crate) fn unique_violation(err: &anyhow::Error) -> Option<&str> {
    match sqlite_failure(err) {
        Some((code, message))
            if code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || code.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Some(message.unwrap_or_default())
        }
        _ => None,
    }
}
