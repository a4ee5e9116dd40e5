//! Units of work produced by the planner and consumed by the scheduler.

use crate::errors::{SyncError, SyncResult};
use std::{fmt, path::PathBuf};

/// What a job does; used when reporting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Upload,
    Redirect,
    Delete,
    InvalidateCdn,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Redirect => "redirect",
            Self::Delete => "delete",
            Self::InvalidateCdn => "invalidate cdn",
        })
    }
}

/// A sync job. These may run in any order and concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Mirror a local file onto `remote`.
    Upload {
        /// Absolute path on disk.
        local: PathBuf,
        /// Path relative to the source root, `/`-separated; drives policy lookup.
        relative: String,
        remote: String,
    },
    /// Create an empty object at `path` that redirects to `location`.
    Redirect { path: String, location: String },
    /// Remove an orphaned remote object.
    Delete { remote: String },
}

impl Job {
    pub fn action(&self) -> JobAction {
        match self {
            Self::Upload { .. } => JobAction::Upload,
            Self::Redirect { .. } => JobAction::Redirect,
            Self::Delete { .. } => JobAction::Delete,
        }
    }

    /// Local-side value: file path, redirect path, or empty.
    pub fn local(&self) -> String {
        match self {
            Self::Upload { local, .. } => local.display().to_string(),
            Self::Redirect { path, .. } => path.clone(),
            Self::Delete { .. } => String::new(),
        }
    }

    /// Remote-side value: object key or redirect location.
    pub fn remote(&self) -> &str {
        match self {
            Self::Upload { remote, .. } | Self::Delete { remote } => remote,
            Self::Redirect { location, .. } => location,
        }
    }

    /// Wrap `err` with this job's description.
    pub fn fail(&self, err: SyncError) -> SyncError {
        SyncError::Job {
            action: self.action(),
            local: self.local(),
            remote: self.remote().to_string(),
            source: Box::new(err),
        }
    }
}

/// CDN purge of `path`, run once after every sync job has succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub path: String,
}

impl Invalidation {
    pub fn fail(&self, err: SyncError) -> SyncError {
        SyncError::Job {
            action: JobAction::InvalidateCdn,
            local: String::new(),
            remote: self.path.clone(),
            source: Box::new(err),
        }
    }
}

/// Full synchronization plan: the sync jobs plus an optional trailing
/// invalidation, executed as two sequential phases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub jobs: Vec<Job>,
    pub invalidation: Option<Invalidation>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.invalidation.is_none()
    }

    pub fn count(&self, action: JobAction) -> usize {
        if action == JobAction::InvalidateCdn {
            return usize::from(self.invalidation.is_some());
        }
        self.jobs.iter().filter(|job| job.action() == action).count()
    }
}

/// Outcome of one job, published by a worker to the collector.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: Job,
    pub result: SyncResult<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_failure_is_annotated_with_both_paths() {
        let job = Job::Upload {
            local: PathBuf::from("/src/a.txt"),
            relative: "a.txt".into(),
            remote: "site/a.txt".into(),
        };
        let err = job.fail(SyncError::Config("boom".into()));
        assert_eq!(
            err.to_string(),
            "failed to upload /src/a.txt to site/a.txt: invalid configuration: boom"
        );
    }

    #[test]
    fn plan_counts_by_action() {
        let plan = Plan {
            jobs: vec![
                Job::Delete {
                    remote: "x".into(),
                },
                Job::Redirect {
                    path: "old".into(),
                    location: "/new".into(),
                },
                Job::Delete {
                    remote: "y".into(),
                },
            ],
            invalidation: Some(Invalidation { path: "/*".into() }),
        };
        assert_eq!(plan.count(JobAction::Delete), 2);
        assert_eq!(plan.count(JobAction::Redirect), 1);
        assert_eq!(plan.count(JobAction::Upload), 0);
        assert_eq!(plan.count(JobAction::InvalidateCdn), 1);
        assert!(!plan.is_empty());
        assert!(Plan::default().is_empty());
    }
}
