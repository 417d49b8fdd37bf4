use std::path::PathBuf;
use thiserror::Error;

/// Engine-wide error type with a stable machine-readable kind per variant.
///
/// Callers dispatch on [`EngineError::kind`]; the display string is for
/// humans only and carries no stability guarantee.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation rejected before any side effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No index or configuration present where one is required.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// The chunker could not parse the file; the file is skipped.
    #[error("parse error in {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    /// No parser exists for this file type.
    #[error("no parser available for {0}")]
    ParseUnavailable(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Relational store failure; the enclosing transaction was rolled back.
    #[error("store error: {0}")]
    Store(String),

    /// Stored vector dimension differs from the configured embedder dimension.
    /// Fatal for the active run; requires a forced rebuild.
    #[error("vector dimension mismatch: store has {stored}, embedder produces {configured}")]
    DimensionMismatch { stored: usize, configured: usize },

    /// No embedding provider could be resolved.
    #[error("no embedding provider available: {0}")]
    EmbedderUnavailable(String),

    /// Embedding/LLM adapter timed out; retriable at the adapter layer.
    #[error("provider timed out after {0} ms")]
    ProviderTimeout(u64),

    /// Adapter was rate limited; retriable at the adapter layer.
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// Cooperative cancellation.
    #[error("operation cancelled")]
    Cancelled,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task failed: {0}")]
    TaskFailed(String),

    /// Task reached a terminal state without producing a result.
    #[error("task produced no result")]
    NoResult,
}

/// Stable error tags for programmatic dispatch (serialized snake_case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotInitialized,
    ParseError,
    ParseUnavailable,
    IoError,
    StoreError,
    DimensionMismatch,
    EmbedderUnavailable,
    ProviderTimeout,
    RateLimited,
    Cancelled,
    TaskNotFound,
    TaskFailed,
    NoResult,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotInitialized(_) => ErrorKind::NotInitialized,
            Self::ParseError { .. } => ErrorKind::ParseError,
            Self::ParseUnavailable(_) => ErrorKind::ParseUnavailable,
            Self::Io(_) => ErrorKind::IoError,
            Self::Store(_) => ErrorKind::StoreError,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::EmbedderUnavailable(_) => ErrorKind::EmbedderUnavailable,
            Self::ProviderTimeout(_) => ErrorKind::ProviderTimeout,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TaskNotFound(_) => ErrorKind::TaskNotFound,
            Self::TaskFailed(_) => ErrorKind::TaskFailed,
            Self::NoResult => ErrorKind::NoResult,
        }
    }

    /// Errors that abort the whole pipeline rather than a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::EmbedderUnavailable(_) | Self::Cancelled
        )
    }

    /// Errors worth one retry at the adapter layer before surfacing.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ProviderTimeout(_) | Self::RateLimited(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_tags() {
        let e = EngineError::DimensionMismatch {
            stored: 384,
            configured: 768,
        };
        assert_eq!(e.kind(), ErrorKind::DimensionMismatch);
        assert!(e.is_fatal());
        assert!(!e.is_retriable());

        let t = EngineError::ProviderTimeout(30_000);
        assert!(t.is_retriable());
        assert!(!t.is_fatal());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::EmbedderUnavailable).unwrap();
        assert_eq!(json, "\"embedder_unavailable\"");
    }
}
