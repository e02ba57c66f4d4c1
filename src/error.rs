//! Error taxonomy shared by the search and ad-hoc query paths.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::search::validator::RejectReason;

/// Conditions surfaced to callers of [`crate::explorer::Explorer`].
///
/// An empty result set is not an error: callers check
/// [`crate::export::TabularResult::is_empty`] or the returned vector instead.
#[derive(Debug, Error)]
pub enum ExplorerError {
    /// The underlying store could not be opened or read.
    #[error("data unavailable ({context}) at {path}: {source}")]
    DataUnavailable {
        path: PathBuf,
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// An ad-hoc query failed the read-only policy.
    #[error("query rejected: {0}")]
    ValidationRejected(#[from] RejectReason),

    /// An ad-hoc query exceeded its execution bound and was abandoned.
    #[error("query exceeded the {}ms execution limit and was abandoned", .0.as_millis())]
    QueryTimeout(Duration),

    /// A statement passed validation but the engine refused it (unknown column, type error).
    #[error("query failed: {message}")]
    QueryFailed { message: String },

    /// `search` requires a non-blank term; use `list_models` to list everything.
    #[error("search term is empty; use list_models to list all models")]
    EmptySearchTerm,

    /// Lookups keyed by model identifier found no such model.
    #[error("no model with identifier {0:?}")]
    ModelNotFound(String),
}

impl ExplorerError {
    pub(crate) fn unavailable(
        path: impl Into<PathBuf>,
        context: impl Into<String>,
        source: rusqlite::Error,
    ) -> Self {
        ExplorerError::DataUnavailable {
            path: path.into(),
            context: context.into(),
            source,
        }
    }

    /// Stable short code used by the CLI for exit status and JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            ExplorerError::DataUnavailable { .. } => "data_unavailable",
            ExplorerError::ValidationRejected(_) => "validation_rejected",
            ExplorerError::QueryTimeout(_) => "query_timeout",
            ExplorerError::QueryFailed { .. } => "query_failed",
            ExplorerError::EmptySearchTerm => "empty_search_term",
            ExplorerError::ModelNotFound(_) => "model_not_found",
        }
    }
}

pub type Result<T, E = ExplorerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_message_carries_reason() {
        let err = ExplorerError::from(RejectReason::DisallowedTable("secret_admin_table".into()));
        assert_eq!(err.code(), "validation_rejected");
        assert!(err.to_string().contains("secret_admin_table"));
    }

    #[test]
    fn timeout_reports_bound() {
        let err = ExplorerError::QueryTimeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }
}
