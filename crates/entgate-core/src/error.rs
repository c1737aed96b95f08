//! Pipeline error types.

use crate::pipeline::{OpKind, OpOutput};
use entgate_model::ModelError;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which constraint a store-level violation tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
    /// Append-only history trigger or any other constraint.
    Other,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Check => "check",
            ConstraintKind::Other => "constraint",
        };
        f.write_str(name)
    }
}

/// The statement committed but its audit records could not be written.
///
/// The committed output is carried so callers can keep the successful result
/// while surfacing the audit gap.
#[derive(Debug, Error)]
#[error("audit write failed for {operation} on {entity} ({records} record(s)): {reason}")]
pub struct AuditWriteError {
    pub entity: String,
    pub operation: OpKind,
    pub records: usize,
    pub reason: String,
    /// Output of the committed statement; `None` when the failure happened
    /// while flushing a caller-owned transaction.
    pub committed: Option<OpOutput>,
}

/// The statement committed but a change listener rejected its event.
#[derive(Debug, Error)]
#[error("change listener {listener} failed for {operation} on {entity}: {reason}")]
pub struct EventDeliveryError {
    pub entity: String,
    pub operation: OpKind,
    pub listener: &'static str,
    pub reason: String,
    /// Output of the committed statement; `None` when the failure happened
    /// while flushing a caller-owned transaction.
    pub committed: Option<OpOutput>,
}

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    NotSingular,
    NotLoaded,
    Constraint,
    AuditWrite,
    EventDelivery,
    Cancelled,
    Infrastructure,
}

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed descriptor, unknown field or type mismatch.
    #[error("validation failed for {entity}: {message}")]
    Validation {
        entity: String,
        field: Option<String>,
        message: String,
    },

    /// The policy evaluator refused the operation.
    #[error("{operation} on {entity} denied: {reason}")]
    Authorization {
        entity: String,
        operation: OpKind,
        reason: String,
    },

    /// A single-row operation or terminal matched no visible row.
    #[error("{entity} not found")]
    NotFound { entity: String },

    /// `only` matched more than one row.
    #[error("{entity}: expected exactly one row, found {count}")]
    NotSingular { entity: String, count: usize },

    /// An edge was read without being part of the query plan.
    #[error("edge '{edge}' was not loaded")]
    NotLoaded { edge: String },

    /// The store rejected a statement.
    #[error("{kind} constraint violated on {entity}: {message}")]
    Constraint {
        entity: String,
        kind: ConstraintKind,
        message: String,
    },

    /// Degraded success: the mutation committed, the audit trail did not.
    #[error(transparent)]
    AuditWrite(Box<AuditWriteError>),

    /// Degraded success: the mutation committed, a listener did not accept it.
    #[error(transparent)]
    EventDelivery(Box<EventDeliveryError>),

    /// The caller cancelled or the deadline elapsed.
    #[error("operation cancelled before {stage}")]
    Cancelled { stage: &'static str },

    /// A hook failed; carries which hook and what it was doing.
    #[error("hook {hook} failed for {operation} on {entity}: {source}")]
    Hook {
        hook: &'static str,
        entity: String,
        operation: OpKind,
        #[source]
        source: Box<Error>,
    },

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data read back from the store.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Invalid catalog, policy or pipeline configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a validation error.
    pub fn validation(
        entity: impl Into<String>,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Validation {
            entity: entity.into(),
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    /// Build an authorization error.
    pub fn unauthorized(
        entity: impl Into<String>,
        operation: OpKind,
        reason: impl Into<String>,
    ) -> Self {
        Error::Authorization {
            entity: entity.into(),
            operation,
            reason: reason.into(),
        }
    }

    /// Build a not-found error.
    pub fn not_found(entity: impl Into<String>) -> Self {
        Error::NotFound {
            entity: entity.into(),
        }
    }

    /// Wrap this error with the hook that raised it.
    pub fn in_hook(self, hook: &'static str, entity: impl Into<String>, operation: OpKind) -> Self {
        Error::Hook {
            hook,
            entity: entity.into(),
            operation,
            source: Box::new(self),
        }
    }

    /// Classify the error, looking through hook wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Authorization { .. } => ErrorKind::Authorization,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::NotSingular { .. } => ErrorKind::NotSingular,
            Error::NotLoaded { .. } => ErrorKind::NotLoaded,
            Error::Constraint { .. } => ErrorKind::Constraint,
            Error::AuditWrite(_) => ErrorKind::AuditWrite,
            Error::EventDelivery(_) => ErrorKind::EventDelivery,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Hook { source, .. } => source.kind(),
            Error::Pool(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::InvalidData(_)
            | Error::Config(_) => ErrorKind::Infrastructure,
        }
    }

    /// Errors the caller can fix by changing the request.
    pub fn is_client_correctable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::Authorization
                | ErrorKind::NotFound
                | ErrorKind::NotSingular
                | ErrorKind::NotLoaded
                | ErrorKind::Constraint
        )
    }

    /// Errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
            && !matches!(self.innermost(), Error::Config(_) | Error::InvalidData(_))
    }

    /// The committed output of a degraded success, if any.
    pub fn committed_output(&self) -> Option<&OpOutput> {
        match self.innermost() {
            Error::AuditWrite(err) => err.committed.as_ref(),
            Error::EventDelivery(err) => err.committed.as_ref(),
            _ => None,
        }
    }

    fn innermost(&self) -> &Error {
        match self {
            Error::Hook { source, .. } => source.innermost(),
            other => other,
        }
    }
}

impl From<ModelError> for Error {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotLoaded(edge) => Error::NotLoaded { edge },
            other => Error::InvalidData(other.to_string()),
        }
    }
}

impl From<AuditWriteError> for Error {
    fn from(err: AuditWriteError) -> Self {
        Error::AuditWrite(Box::new(err))
    }
}

impl From<EventDeliveryError> for Error {
    fn from(err: EventDeliveryError) -> Self {
        Error::EventDelivery(Box::new(err))
    }
}
