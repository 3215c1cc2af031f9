//! Error taxonomy shared by every layer of the engine.
//!
//! Compiler-level errors ([`EngineError::SchemaViolation`],
//! [`EngineError::InvalidKeyName`], ...) are always raised before a native
//! store call is issued. Store-level errors carry the native code and message
//! and can be reduced to a client-safe form with [`EngineError::sanitized`].

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the adapter engine.
///
/// `Clone` so that a single failed load can be handed to every coalesced
/// waiter of the schema cache.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// A write or constraint referenced a field the schema does not allow.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A value did not match the declared field type.
    #[error("type mismatch on '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// A disallowed, malformed or internal-only field name was referenced.
    #[error("invalid key name: {0}")]
    InvalidKeyName(String),

    /// The filter or update is structurally invalid.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Policy rejected the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The store aborted a query that ran past its time bound.
    #[error("operation exceeded time limit of {limit_ms}ms")]
    OperationExceededTimeLimit { limit_ms: u64 },

    /// A stored value could not be decoded (e.g. malformed pointer key).
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Retryable store failure (e.g. a transient transaction conflict).
    #[error("transient store error: {0}")]
    TransientStore(String),

    /// A unique index or primary key rejected the write.
    #[error("duplicate value: {0}")]
    Duplicate(String),

    #[error("class {0} does not exist")]
    ClassNotFound(String),

    #[error("object not found")]
    ObjectNotFound,

    /// Any other native store error, with its code and message attached.
    #[error("store error {code}: {message}")]
    Store { code: i32, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Builds a [`EngineError::TypeMismatch`] without a field name; callers
    /// attach it with [`EngineError::in_field`].
    #[must_use]
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            field: String::new(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Attaches a field name to a [`EngineError::TypeMismatch`] that has none.
    /// Other variants pass through untouched.
    #[must_use]
    pub fn in_field(self, field: &str) -> Self {
        match self {
            Self::TypeMismatch {
                field: existing,
                expected,
                actual,
            } if existing.is_empty() => Self::TypeMismatch {
                field: field.to_string(),
                expected,
                actual,
            },
            other => other,
        }
    }

    /// Stable numeric code, numbered like the wire protocol the query
    /// language speaks.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::SchemaViolation(_) | Self::TypeMismatch { .. } => 111,
            Self::InvalidKeyName(_) => 105,
            Self::InvalidQuery(_) => 102,
            Self::PermissionDenied(_) => 119,
            Self::OperationExceededTimeLimit { .. } => 50,
            Self::Duplicate(_) => 137,
            Self::ClassNotFound(_) => 103,
            Self::ObjectNotFound => 101,
            Self::Store { code, .. } => *code,
            Self::DataCorruption(_) | Self::TransientStore(_) | Self::InvalidConfig(_) => 1,
        }
    }

    /// Whether the transaction executor may retry after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }

    /// Returns the form of this error that may be shown to an untrusted caller.
    ///
    /// When `enabled`, permission and store errors lose their detail; the
    /// detailed cause is logged server-side first. Every other variant is
    /// already client-safe and is returned unchanged.
    #[must_use]
    pub fn sanitized(self, enabled: bool) -> Self {
        if !enabled {
            return self;
        }
        match self {
            Self::PermissionDenied(detail) => {
                tracing::error!(detail = %detail, "permission denied");
                Self::PermissionDenied("Permission denied".to_string())
            }
            Self::Store { code, message } => {
                tracing::error!(code, message = %message, "store error");
                Self::Store {
                    code: 1,
                    message: "Internal server error".to_string(),
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_field_fills_only_empty_names() {
        let err = EngineError::type_mismatch("Number", "String").in_field("score");
        assert_eq!(
            err,
            EngineError::TypeMismatch {
                field: "score".to_string(),
                expected: "Number".to_string(),
                actual: "String".to_string(),
            }
        );

        let renamed = err.clone().in_field("other");
        assert_eq!(renamed, err);
    }

    #[test]
    fn sanitized_hides_store_detail() {
        let err = EngineError::Store {
            code: 11000,
            message: "E11000 duplicate key on index users.email_1".to_string(),
        };
        let safe = err.sanitized(true);
        assert_eq!(safe.code(), 1);
        assert!(!safe.to_string().contains("E11000"));
    }

    #[test]
    fn sanitized_hides_permission_detail() {
        let err = EngineError::PermissionDenied("role admin missing on _Role".to_string());
        let safe = err.sanitized(true);
        assert_eq!(safe, EngineError::PermissionDenied("Permission denied".to_string()));
    }

    #[test]
    fn sanitize_disabled_keeps_detail() {
        let err = EngineError::PermissionDenied("detail".to_string());
        assert_eq!(err.clone().sanitized(false), err);
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(EngineError::TransientStore("write conflict".into()).is_transient());
        assert!(!EngineError::Duplicate("x".into()).is_transient());
    }
}
