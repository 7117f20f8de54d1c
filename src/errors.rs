use thiserror::Error;
use uuid::Uuid;

/// Enumerates high-level errors returned by this library.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Represents an SQL error outside of a creation transaction.
    #[error("SQLx error")]
    Sqlx { source: sqlx::Error },

    /// Represents a storage failure inside a creation transaction.
    /// The whole unit of work was rolled back and may be retried.
    #[error("transaction aborted")]
    TransactionAborted { source: sqlx::Error },

    /// The capacity-guarded increment matched no row.
    #[error("group {group} is already full")]
    GroupFull { group: String },

    /// Another transaction created the same group first.
    #[error("group {group} was created concurrently")]
    AllocationConflict { group: String },

    /// A retryable error kept happening until the attempts ran out.
    #[error("could not allocate a group after {attempts} attempts")]
    RetriesExhausted {
        attempts: u8,
        #[source]
        last: Box<BackendError>,
    },

    #[error("invalid request body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid group category: {0}")]
    InvalidCategory(String),

    #[error("name is required")]
    NameRequired,

    #[error("invalid email format: {0}")]
    InvalidEmail(String),

    #[error("email already exists")]
    EmailAlreadyExists,

    #[error("date_of_birth must be yyyy-mm-dd: {0}")]
    InvalidDateOfBirth(String),

    #[error("date_of_birth cannot be in the future")]
    DateOfBirthInFuture,

    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    #[error("group not found: {0}")]
    GroupNotFound(String),
}

impl BackendError {
    /// Whether repeating the whole reservation from scratch may
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        use BackendError::*;

        matches!(
            self,
            GroupFull { .. } | AllocationConflict { .. } | TransactionAborted { .. }
        )
    }
}
