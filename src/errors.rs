//! Error taxonomy for the sync engine.
//!
//! Gateway failures are flattened into strings at the adapter boundary so the
//! engine never has to know about SDK error types. Job failures wrap their
//! cause together with the job description that produced it.

use crate::models::job::JobAction;
use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source directory is empty: {}", .0.display())]
    EmptySource(PathBuf),
    #[error("invalid checksum calculation mode: {0}")]
    InvalidChecksumMode(String),
    #[error("invalid canned ACL `{0}`")]
    InvalidAcl(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("object store {op} failed for `{key}`: {message}")]
    ObjectStore {
        op: &'static str,
        key: String,
        message: String,
    },
    #[error("cdn invalidation failed for `{path}`: {message}")]
    Cdn { path: String, message: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("job panicked: {0}")]
    Panic(String),
    #[error("failed to {action} {local} to {remote}: {source}")]
    Job {
        action: JobAction,
        local: String,
        remote: String,
        #[source]
        source: Box<SyncError>,
    },
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Shortcut for a failed object store call.
    pub fn store(op: &'static str, key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::ObjectStore {
            op,
            key: key.into(),
            message: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Job { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_error_names_action_and_both_sides() {
        let err = SyncError::Job {
            action: JobAction::Delete,
            local: String::new(),
            remote: "site/old.txt".into(),
            source: Box::new(SyncError::store("delete", "site/old.txt", "access denied")),
        };
        assert_eq!(
            err.to_string(),
            "failed to delete  to site/old.txt: object store delete failed for `site/old.txt`: access denied"
        );
    }

    #[test]
    fn cancellation_is_seen_through_job_wrapper() {
        let err = SyncError::Job {
            action: JobAction::Upload,
            local: "a".into(),
            remote: "b".into(),
            source: Box::new(SyncError::Cancelled),
        };
        assert!(err.is_cancelled());
        assert!(!SyncError::Config("x".into()).is_cancelled());
    }
}
