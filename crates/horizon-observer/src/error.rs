//! Error types for observers and history.
//!
//! Most operations follow a log-and-continue policy and report failure through
//! their return value. The `try_*` variants and constructors that can reject
//! their input return these errors instead.

/// Result type alias for observer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for [`Observer`](crate::Observer) operations.
pub type ObserverResult<T> = std::result::Result<T, ObserverError>;

/// Result type alias for [`History`](crate::History) operations.
pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

/// Errors raised by [`Observer`](crate::Observer) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObserverError {
    /// An observer root must be built from a JSON object.
    #[error("Observer data must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    /// Traversal hit a missing key.
    #[error("Path '{path}' does not resolve")]
    PathNotFound { path: String },

    /// The path resolved to something other than an array.
    #[error("Path '{path}' is not an array")]
    NotAnArray { path: String },

    /// An array index was outside the array bounds.
    #[error("Index {index} out of range for '{path}' (length {len})")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    /// The observer has been destroyed.
    #[error("Observer has been destroyed")]
    Destroyed,
}

impl ObserverError {
    /// Create a path-not-found error.
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// Create a not-an-array error.
    pub fn not_an_array(path: impl Into<String>) -> Self {
        Self::NotAnArray { path: path.into() }
    }
}

/// Errors raised by [`History`](crate::History) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// The action has an empty name.
    #[error("History action is missing a name")]
    MissingName,

    /// The action has no undo closure.
    #[error("History action '{name}' is missing an undo function")]
    MissingUndo { name: String },

    /// The action has no redo closure.
    #[error("History action '{name}' is missing a redo function")]
    MissingRedo { name: String },

    /// The undo closure panicked.
    #[error("Undo of '{name}' failed: {message}")]
    UndoFailed { name: String, message: String },

    /// The redo closure panicked.
    #[error("Redo of '{name}' failed: {message}")]
    RedoFailed { name: String, message: String },
}

/// The crate-wide error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Observer error.
    #[error("Observer error: {0}")]
    Observer(#[from] ObserverError),

    /// History error.
    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ObserverError::IndexOutOfRange {
            path: "items".into(),
            index: 4,
            len: 2,
        };
        assert_eq!(err.to_string(), "Index 4 out of range for 'items' (length 2)");

        let err = HistoryError::MissingUndo { name: "a".into() };
        assert_eq!(err.to_string(), "History action 'a' is missing an undo function");
    }

    #[test]
    fn test_from_conversions() {
        let err: Error = ObserverError::Destroyed.into();
        assert!(matches!(err, Error::Observer(ObserverError::Destroyed)));

        let err: Error = HistoryError::MissingName.into();
        assert_eq!(err.to_string(), "History error: History action is missing a name");
    }
}
