//! Classified processing errors.
//!
//! Every per-log failure is one of three classes. Transient failures go to the
//! retry queue with the unit kind that will replay them; the other two are
//! recorded as invalid and never retried.

use std::fmt;

use thiserror::Error;

use crate::decryptor::DecryptError;
use crate::listener::ChainError;
use crate::storage::RetryKind;

/// Why a log could not be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Network or store hiccup; replay later as `kind`.
    #[error("{message}")]
    Transient {
        /// Unit kind to enqueue.
        kind: RetryKind,
        /// Diagnostic.
        message: String,
    },

    /// Decryptor 403, RBAC deny, publisher or validator not allowed.
    #[error("{0}")]
    Unauthorized(String),

    /// Hash mismatch, malformed payload, schema violation.
    #[error("{0}")]
    Integrity(String),
}

/// Error class, as recorded in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    #[allow(missing_docs)]
    Transient,
    #[allow(missing_docs)]
    Unauthorized,
    #[allow(missing_docs)]
    Integrity,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Unauthorized => "unauthorized",
            ErrorClass::Integrity => "integrity",
        };
        f.write_str(name)
    }
}

impl ProcessError {
    /// Receipt lookups fail as whole-transaction units.
    pub fn tx(err: impl fmt::Display) -> Self {
        Self::Transient {
            kind: RetryKind::Tx,
            message: format!("receipt unavailable: {err}"),
        }
    }

    /// Block lookups fail as whole-block units.
    pub fn block(err: impl fmt::Display) -> Self {
        Self::Transient {
            kind: RetryKind::Block,
            message: format!("block unavailable: {err}"),
        }
    }

    /// Any other transient failure replays the single event.
    pub fn event(err: impl fmt::Display) -> Self {
        Self::Transient {
            kind: RetryKind::Event,
            message: err.to_string(),
        }
    }

    /// Document store failure.
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Transient {
            kind: RetryKind::Event,
            message: format!("storage error: {err:#}"),
        }
    }

    #[allow(missing_docs)]
    pub fn class(&self) -> ErrorClass {
        match self {
            ProcessError::Transient { .. } => ErrorClass::Transient,
            ProcessError::Unauthorized(_) => ErrorClass::Unauthorized,
            ProcessError::Integrity(_) => ErrorClass::Integrity,
        }
    }

    /// Unit kind to enqueue, `None` for permanent failures.
    pub fn retry_kind(&self) -> Option<RetryKind> {
        match self {
            ProcessError::Transient { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Transient { .. })
    }
}

impl From<ChainError> for ProcessError {
    fn from(err: ChainError) -> Self {
        Self::event(err)
    }
}

impl From<DecryptError> for ProcessError {
    fn from(err: DecryptError) -> Self {
        match err {
            DecryptError::Unauthorized(_) => Self::Unauthorized(err.to_string()),
            DecryptError::Integrity(_) | DecryptError::Codec(_) => Self::Integrity(err.to_string()),
            DecryptError::Transport(_) | DecryptError::Status(..) => Self::event(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes_and_kinds() {
        assert_eq!(ProcessError::tx("timeout").retry_kind(), Some(RetryKind::Tx));
        assert_eq!(ProcessError::block("gone").retry_kind(), Some(RetryKind::Block));
        assert_eq!(ProcessError::event("x").class(), ErrorClass::Transient);
        assert_eq!(ProcessError::Integrity("bad".into()).retry_kind(), None);
        assert_eq!(ErrorClass::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn test_decrypt_errors_map_to_classes() {
        let denied: ProcessError = DecryptError::Unauthorized("no".into()).into();
        assert_eq!(denied.class(), ErrorClass::Unauthorized);
        assert!(denied.to_string().contains("403"));

        let down: ProcessError = DecryptError::Status(502, "bad gateway".into()).into();
        assert_eq!(down.retry_kind(), Some(RetryKind::Event));

        let tampered: ProcessError = DecryptError::Integrity("hash".into()).into();
        assert_eq!(tampered.class(), ErrorClass::Integrity);
    }
}
