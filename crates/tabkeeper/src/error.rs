use std::path::PathBuf;
use thiserror::Error;

use crate::backup::BackupKey;
use crate::store::TabId;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Tab {0} not found")]
    TabNotFound(TabId),

    #[error("Backup '{0}' not found")]
    BackupNotFound(BackupKey),

    #[error("Index {index} is out of range for {len} tabs")]
    OutOfRange { index: usize, len: usize },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt backup record {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Refusing {}: {reason}", path.display())]
    Rejected { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn rejected(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// The operation named a tab or backup that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TabNotFound(_) | Self::BackupNotFound(_))
    }

    /// Durable storage failed or held unusable data.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Corrupt { .. } | Self::Rejected { .. } | Self::Json(_)
        )
    }
}

/// Convenience type alias for Results with SessionError
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = SessionError::io(
            "/tmp/a.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_io());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("/tmp/a.txt"));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::OutOfRange { index: 3, len: 3 };
        assert_eq!(err.to_string(), "Index 3 is out of range for 3 tabs");

        let err = SessionError::BackupNotFound(BackupKey::from("abc_new"));
        assert_eq!(err.to_string(), "Backup 'abc_new' not found");
        assert!(err.is_not_found());
    }
}
