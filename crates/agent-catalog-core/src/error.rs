//! Error taxonomy for the agent catalog.

use std::path::PathBuf;

/// Errors produced by catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("agent not found: {identifier}")]
    AgentNotFound { identifier: String },

    #[error("unknown search field: {0} (expected one of: name, description, body, tools, source)")]
    UnknownField(String),

    #[error("invalid regex pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("fuzzy threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("query cancelled")]
    Cancelled,

    #[error("snapshot error at {path}: {reason}")]
    Snapshot { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the record source. Passed through untouched.
    #[error(transparent)]
    Source(anyhow::Error),
}

impl CatalogError {
    /// True for lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AgentNotFound { .. })
    }

    /// True for errors caused by caller-supplied input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::UnknownField(_) | Self::InvalidPattern { .. } | Self::InvalidThreshold(_)
        )
    }
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_and_class() {
        let err = CatalogError::AgentNotFound {
            identifier: "go-expert".to_string(),
        };
        assert!(err.to_string().contains("go-expert"));
        assert!(err.is_not_found());
        assert!(!err.is_invalid_input());
    }

    #[test]
    fn test_invalid_input_classes() {
        assert!(CatalogError::UnknownField("color".into()).is_invalid_input());
        assert!(CatalogError::InvalidThreshold(1.5).is_invalid_input());

        let source = regex::Regex::new("(").unwrap_err();
        let err = CatalogError::InvalidPattern {
            pattern: "(".into(),
            source,
        };
        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("invalid regex pattern"));
    }

    #[test]
    fn test_source_error_is_transparent() {
        let err = CatalogError::Source(anyhow::anyhow!("directory unreadable: /agents"));
        assert_eq!(err.to_string(), "directory unreadable: /agents");
        assert!(!err.is_not_found());
        assert!(!err.is_invalid_input());
    }
}
