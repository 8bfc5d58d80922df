//! Error types for model validation.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building or querying an entity registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// An entity type was registered twice.
    #[error("entity type registered twice: {0}")]
    DuplicateEntity(String),

    /// A cascade rule or reference points at an entity that is not registered.
    #[error("entity type {from} refers to unknown entity type {to}")]
    UnknownEntity {
        /// The entity declaring the edge.
        from: String,
        /// The missing target.
        to: String,
    },

    /// The parent/child graph contains a cycle.
    #[error("dependency cycle involving entity types: {0:?}")]
    CyclicDependency(Vec<String>),

    /// A table, collection or field name is not a plain identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ModelError::UnknownEntity {
            from: "sessions".into(),
            to: "customers".into(),
        };
        assert_eq!(
            err.to_string(),
            "entity type sessions refers to unknown entity type customers"
        );
    }
}
