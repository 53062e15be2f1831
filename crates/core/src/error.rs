//! Error taxonomy shared by every plinth crate.

use thiserror::Error;

/// Failure reported by a capability-scoped remote client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Classify an HTTP-style status code.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            404 => RemoteError::NotFound(message),
            409 => RemoteError::AlreadyExists(message),
            _ => RemoteError::Api { code, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Errors surfaced by the reconciler and its helpers.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("mapping: {0}")]
    Mapping(String),

    /// The remote operation finished, but with an error status.
    #[error("{description} failed: code {code}: {message}")]
    Operation { description: String, code: i32, message: String },

    /// Polling gave up before the operation reached a terminal state.
    #[error("timed out waiting for {description} after {attempts} polls")]
    WaitTimeout { description: String, attempts: u32 },

    #[error("setting billing account {account:?} for project {project:?}: {source}")]
    Billing {
        project: String,
        account: String,
        #[source]
        source: RemoteError,
    },

    #[error("timed out waiting for billing account of {project:?} to read back {wanted:?}, got {got:?}")]
    BillingTimeout { project: String, wanted: String, got: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: RemoteError,
    },
}

impl ReconcileError {
    pub fn remote(context: impl Into<String>, source: RemoteError) -> Self {
        ReconcileError::Remote { context: context.into(), source }
    }

    /// Short stable label, used for metrics and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Validation(_) => "validation",
            ReconcileError::Mapping(_) => "mapping",
            ReconcileError::Operation { .. } => "operation",
            ReconcileError::WaitTimeout { .. } => "wait_timeout",
            ReconcileError::Billing { .. } => "billing",
            ReconcileError::BillingTimeout { .. } => "billing_timeout",
            ReconcileError::NotFound(_) => "not_found",
            ReconcileError::DataIntegrity(_) => "data_integrity",
            ReconcileError::Remote { .. } => "remote",
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_classify() {
        assert!(RemoteError::from_status(404, "gone").is_not_found());
        assert_eq!(RemoteError::from_status(409, "dup"), RemoteError::AlreadyExists("dup".into()));
        assert_eq!(
            RemoteError::from_status(500, "boom"),
            RemoteError::Api { code: 500, message: "boom".into() }
        );
    }

    #[test]
    fn remote_error_message_carries_context() {
        let e = ReconcileError::remote("reading project \"p1\"", RemoteError::Transport("reset".into()));
        assert_eq!(e.to_string(), "reading project \"p1\": transport: reset");
        assert_eq!(e.kind(), "remote");
    }
}
