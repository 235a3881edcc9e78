//! Error taxonomy for the build and query paths.
//!
//! Build-time errors are fatal: the rebuild transaction is dropped and the
//! previously published generation stays live. Query-time not-found variants
//! are routine outcomes that callers turn into user-visible responses; they
//! are never logged as errors by this crate.

/// Errors raised while rebuilding the index from the object store.
///
/// Every variant aborts the rebuild. No partial generation ever becomes
/// visible because all writes happen inside one transaction.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The named ref does not resolve to a commit.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// The tree layout under the commit does not match the expected
    /// `page/<name>/page.md` / `attachment/<name>/{{metadata.md,data}}` shape.
    #[error("malformed tree layout at {path}: {reason}")]
    Structure { path: String, reason: String },

    /// A page or attachment-metadata document could not be parsed.
    #[error("failed to parse document at {path}: {reason}")]
    Parse { path: String, reason: String },

    /// A document has no top-level heading to derive a title from.
    #[error("document at {path} has no title heading")]
    MissingTitle { path: String },

    /// A required metadata field (`date`, `status`) is absent or unusable.
    #[error("document at {path} is missing required metadata field '{field}'")]
    MissingMetadata { path: String, field: String },

    /// Underlying object-store access failure.
    #[error("object store error: {0}")]
    Repo(#[from] git2::Error),

    /// Underlying index write failure.
    #[error("index error: {0}")]
    Index(#[from] sqlx::Error),
}

impl BuildError {
    pub fn structure(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Structure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the query engine.
///
/// The not-found variants are expected outcomes of lookups against user
/// input; `Index`/`Repo` indicate real infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// No page matched the requested identity (path, or date+slug+status).
    #[error("page not found: {0}")]
    PageNotFound(String),

    /// The page resolved, but the requested historical revision does not
    /// exist under it (or is excluded by the status filter).
    #[error("revision {revision_id} not found under page {slug}")]
    RevisionNotFound { slug: String, revision_id: String },

    /// No attachment record carries the requested id.
    #[error("attachment not found: {0}")]
    AttachmentNotFound(String),

    /// Underlying index read failure.
    #[error("index error: {0}")]
    Index(#[from] sqlx::Error),

    /// Lazy blob load from the object store failed.
    #[error("object store error: {0}")]
    Repo(#[from] git2::Error),
}

/// Result alias for build-path operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// Result alias for query-path operations.
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_error_display() {
        let err = BuildError::structure("page/broken", "missing page.md entry");
        assert_eq!(
            err.to_string(),
            "malformed tree layout at page/broken: missing page.md entry"
        );
    }

    #[test]
    fn test_missing_metadata_display_names_field() {
        let err = BuildError::MissingMetadata {
            path: "page/a/page.md".into(),
            field: "date".into(),
        };
        assert!(err.to_string().contains("'date'"));
    }

    #[test]
    fn test_revision_not_found_is_distinct_from_page_not_found() {
        let err = QueryError::RevisionNotFound {
            slug: "sample-page".into(),
            revision_id: "abc123".into(),
        };
        assert!(matches!(err, QueryError::RevisionNotFound { .. }));
        assert!(err.to_string().contains("sample-page"));
    }
}
