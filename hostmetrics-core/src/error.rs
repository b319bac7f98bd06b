use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetricsError>;

/// Every failure the core can surface.
///
/// The enum is `Clone` because a single in-flight fetch hands the same
/// outcome to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("{kind} unavailable for {target}: {reason}")]
    Provider {
        kind: &'static str,
        target: String,
        reason: String,
    },

    #[error("{kind} is not implemented on this platform")]
    NotImplemented { kind: &'static str },

    #[error("{} is not a mounted filesystem", path.display())]
    NotMounted { path: PathBuf },

    #[error("network filesystem server {server} is unreachable ({})", path.display())]
    Unreachable { server: String, path: PathBuf },

    #[error("exec {argv:?} failed: {code}")]
    Build { argv: Vec<String>, code: i32 },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MetricsError {
    pub fn provider(kind: &'static str, target: impl ToString, reason: impl ToString) -> Self {
        Self::Provider {
            kind,
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, err: impl ToString) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Structural facts about the host that will not change by asking again.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotImplemented { .. } | Self::NotFound { .. })
    }
}
