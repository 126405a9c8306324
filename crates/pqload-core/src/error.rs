//! Error types and result aliases for pqload.
//!
//! Every fatal condition in the pipeline maps to exactly one variant here.
//! Errors carry enough context (object, field, row, stage) for an operator to
//! diagnose a rejected file from the log line alone.

use crate::record::OrderField;
use crate::sink::LoadStage;

/// The result type used throughout pqload.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed underlying cause attached to I/O-bound variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while fetching, decoding or loading an object.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Downloading the object into scratch space failed.
    #[error("fetch failed for {bucket}/{key}: {message}")]
    Fetch {
        /// Bucket the object was requested from.
        bucket: String,
        /// Object key.
        key: String,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The file is not a Parquet file (wrong extension or unreadable footer).
    #[error("format mismatch for '{path}': {message}")]
    FormatMismatch {
        /// Local path of the rejected file.
        path: String,
        /// Why the file was rejected.
        message: String,
    },

    /// A required column is missing or cannot be addressed.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the schema problem.
        message: String,
    },

    /// A value does not have the native type its field requires.
    #[error("coercion error: field '{field}' at row {row}: expected {expected}, found {found}")]
    Coercion {
        /// Logical field being coerced.
        field: OrderField,
        /// Zero-based row index.
        row: usize,
        /// Native type the field accepts.
        expected: &'static str,
        /// Native type actually found.
        found: String,
    },

    /// A column sequence disagrees with the declared row count.
    #[error("row count mismatch: field '{field}' has {actual} values, file declares {expected}")]
    RowCountMismatch {
        /// Field whose sequence has the wrong length.
        field: OrderField,
        /// Declared row count of the file.
        expected: usize,
        /// Length of the column sequence.
        actual: usize,
    },

    /// The bulk load failed; the transaction was not committed.
    #[error("load failed during {stage}: {message}")]
    Load {
        /// Protocol step that failed.
        stage: LoadStage,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Connection parameters are missing or malformed.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// The trigger notification could not be interpreted.
    #[error("invalid trigger event: {message}")]
    InvalidEvent {
        /// Description of the problem.
        message: String,
    },

    /// Local file I/O outside the fetch path failed.
    #[error("i/o error: {message}")]
    Io {
        /// Description of the failure.
        message: String,
        /// The underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a fetch error without an underlying cause.
    #[must_use]
    pub fn fetch(bucket: &str, key: &str, message: impl Into<String>) -> Self {
        Self::Fetch {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a fetch error with a source cause.
    #[must_use]
    pub fn fetch_with_source(
        bucket: &str,
        key: &str,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fetch {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a format mismatch error.
    #[must_use]
    pub fn format_mismatch(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FormatMismatch {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a schema error.
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a load error for the given stage.
    #[must_use]
    pub fn load(stage: LoadStage, message: impl Into<String>) -> Self {
        Self::Load {
            stage,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a load error for the given stage with a source cause.
    #[must_use]
    pub fn load_with_source(
        stage: LoadStage,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Load {
            stage,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid event error.
    #[must_use]
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            message: message.into(),
        }
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable, low-cardinality name of the error class.
    ///
    /// Used as a metric label and in machine-readable responses.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::FormatMismatch { .. } => "format_mismatch",
            Self::Schema { .. } => "schema",
            Self::Coercion { .. } => "coercion",
            Self::RowCountMismatch { .. } => "row_count_mismatch",
            Self::Load { .. } => "load",
            Self::Config { .. } => "config",
            Self::InvalidEvent { .. } => "invalid_event",
            Self::Io { .. } => "io",
            Self::Internal { .. } => "internal",
        }
    }

    /// Returns true if the input itself was rejected.
    ///
    /// Rejections are deterministic: redelivering the same object fails the
    /// same way. Everything else may succeed on a later attempt.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::FormatMismatch { .. }
                | Self::Schema { .. }
                | Self::Coercion { .. }
                | Self::RowCountMismatch { .. }
                | Self::InvalidEvent { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_message_names_field_and_row() {
        let err = Error::Coercion {
            field: OrderField::Quantity,
            row: 1,
            expected: "int32",
            found: "text".into(),
        };
        assert_eq!(
            err.to_string(),
            "coercion error: field 'quantity' at row 1: expected int32, found text"
        );
        assert_eq!(err.kind(), "coercion");
        assert!(err.is_rejection());
    }

    #[test]
    fn load_errors_are_not_rejections() {
        let err = Error::load(LoadStage::Commit, "connection reset");
        assert_eq!(err.to_string(), "load failed during commit: connection reset");
        assert!(!err.is_rejection());
    }

    #[test]
    fn fetch_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::fetch_with_source("bucket", "orders.parquet", "download failed", io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.kind(), "fetch");
    }
}
