//! src/services/planner.rs
//!
//! Plan builder. Lists what is already in the bucket, walks the source tree
//! and turns the difference into jobs:
//! - one upload per regular file
//! - one redirect per configured redirect
//! - one delete per remote key with no local file or redirect (opt-in)
//! - one trailing CDN invalidation (when a distribution is configured)

use crate::{
    config::SyncConfig,
    errors::{SyncError, SyncResult},
    models::job::{Invalidation, Job, JobAction, Plan},
    services::object_store::{ObjectStore, list_all},
};
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Inputs of a plan build.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Absolute source directory.
    pub source: PathBuf,
    /// Key prefix in the bucket, without leading or trailing `/`.
    pub target: String,
    /// Redirect source path (relative to the target) to destination URL.
    pub redirects: BTreeMap<String, String>,
    pub delete: bool,
    pub allow_empty_source: bool,
    pub invalidate_cdn: bool,
}

impl From<&SyncConfig> for PlanOptions {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            source: cfg.source.clone(),
            target: cfg.target.clone(),
            redirects: cfg.redirects.clone(),
            delete: cfg.delete,
            allow_empty_source: cfg.allow_empty_source,
            invalidate_cdn: cfg.cloudfront_distribution.is_some(),
        }
    }
}

pub struct Planner {
    store: Arc<dyn ObjectStore>,
    options: PlanOptions,
}

impl Planner {
    pub fn new(store: Arc<dyn ObjectStore>, options: PlanOptions) -> Self {
        Self { store, options }
    }

    /// `target/relative`, or just `relative` when syncing to the bucket root.
    fn remote_key(&self, relative: &str) -> String {
        if self.options.target.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.options.target, relative)
        }
    }

    fn list_prefix(&self) -> String {
        if self.options.target.is_empty() {
            String::new()
        } else {
            format!("{}/", self.options.target)
        }
    }

    pub async fn build(&self) -> SyncResult<Plan> {
        let prefix = self.list_prefix();
        let remote = list_all(self.store.as_ref(), &prefix).await?;

        let files = local_files(&self.options.source)?;
        if files.is_empty() {
            if !self.options.allow_empty_source {
                return Err(SyncError::EmptySource(self.options.source.clone()));
            }
            warn!(
                "source directory is empty: {}",
                self.options.source.display()
            );
        }

        let mut local: HashSet<String> = HashSet::with_capacity(files.len());
        let mut jobs = Vec::with_capacity(files.len() + self.options.redirects.len());

        for (path, relative) in files {
            jobs.push(Job::Upload {
                remote: self.remote_key(&relative),
                local: path,
                relative: relative.clone(),
            });
            local.insert(relative);
        }

        for (path, location) in &self.options.redirects {
            let relative = path.trim_start_matches('/').to_string();
            jobs.push(Job::Redirect {
                path: self.remote_key(&relative),
                location: location.clone(),
            });
            local.insert(relative);
        }

        if self.options.delete {
            for key in remote {
                let relative = key.strip_prefix(&prefix).unwrap_or(&key);
                if !local.contains(relative) {
                    jobs.push(Job::Delete { remote: key });
                }
            }
        }

        let invalidation = self.options.invalidate_cdn.then(|| Invalidation {
            path: format!("/{}", self.remote_key("*")),
        });

        let plan = Plan { jobs, invalidation };
        info!(
            "planned {} upload(s), {} redirect(s), {} delete(s), {} invalidation(s)",
            plan.count(JobAction::Upload),
            plan.count(JobAction::Redirect),
            plan.count(JobAction::Delete),
            plan.count(JobAction::InvalidateCdn),
        );
        Ok(plan)
    }
}

/// Every regular file below `root`, paired with its `/`-separated relative
/// path, in file-name order.
fn local_files(root: &Path) -> SyncResult<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| {
                SyncError::Config(format!(
                    "{} is outside the source directory",
                    entry.path().display()
                ))
            })?
            .components()
            .map(|c| {
                c.as_os_str().to_str().ok_or_else(|| {
                    SyncError::Config(format!(
                        "path is not valid UTF-8: {}",
                        entry.path().display()
                    ))
                })
            })
            .collect::<SyncResult<Vec<_>>>()?
            .join("/");

        files.push((entry.into_path(), relative));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::remote::ListPage, services::object_store::MockObjectStore};
    use mockall::predicate::eq;
    use std::fs;
    use tempfile::TempDir;

    fn tree(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, file.as_bytes()).unwrap();
        }
        dir
    }

    fn store_with(prefix: &'static str, keys: &[&str]) -> Arc<dyn ObjectStore> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let mut store = MockObjectStore::new();
        store
            .expect_list_objects()
            .with(eq(prefix), eq(None::<String>))
            .times(1)
            .returning(move |_, _| {
                Ok(ListPage {
                    keys: keys.clone(),
                    is_truncated: false,
                    next_marker: None,
                })
            });
        Arc::new(store)
    }

    fn options(dir: &TempDir) -> PlanOptions {
        PlanOptions {
            source: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn uploads_every_file_to_an_empty_bucket() {
        let dir = tree(&["a.txt", "b.jpg"]);
        let plan = Planner::new(store_with("", &[]), options(&dir))
            .build()
            .await
            .unwrap();

        assert_eq!(
            plan.jobs,
            vec![
                Job::Upload {
                    local: dir.path().join("a.txt"),
                    relative: "a.txt".into(),
                    remote: "a.txt".into(),
                },
                Job::Upload {
                    local: dir.path().join("b.jpg"),
                    relative: "b.jpg".into(),
                    remote: "b.jpg".into(),
                },
            ]
        );
        assert!(plan.invalidation.is_none());
    }

    #[tokio::test]
    async fn nested_files_keep_their_relative_path_under_target() {
        let dir = tree(&["css/site.css", "index.html"]);
        let plan = Planner::new(
            store_with("site/", &[]),
            PlanOptions {
                target: "site".into(),
                ..options(&dir)
            },
        )
        .build()
        .await
        .unwrap();

        let remotes: Vec<&str> = plan.jobs.iter().map(Job::remote).collect();
        assert_eq!(remotes, vec!["site/css/site.css", "site/index.html"]);
    }

    #[tokio::test]
    async fn orphaned_remote_keys_are_deleted_when_enabled() {
        let dir = tree(&["a.txt"]);
        let plan = Planner::new(
            store_with("", &["a.txt", "old.txt"]),
            PlanOptions {
                delete: true,
                ..options(&dir)
            },
        )
        .build()
        .await
        .unwrap();

        assert_eq!(plan.count(JobAction::Upload), 1);
        assert_eq!(
            plan.jobs.last(),
            Some(&Job::Delete {
                remote: "old.txt".into()
            })
        );
        assert_eq!(plan.count(JobAction::Delete), 1);
    }

    #[tokio::test]
    async fn orphans_are_kept_when_delete_is_off() {
        let dir = tree(&["a.txt"]);
        let plan = Planner::new(store_with("", &["old.txt"]), options(&dir))
            .build()
            .await
            .unwrap();
        assert_eq!(plan.count(JobAction::Delete), 0);
    }

    #[tokio::test]
    async fn redirect_sources_are_not_orphans() {
        let dir = tree(&["index.html"]);
        let plan = Planner::new(
            store_with("site/", &["site/index.html", "site/old", "site/gone.html"]),
            PlanOptions {
                target: "site".into(),
                delete: true,
                redirects: BTreeMap::from([("/old".into(), "/index.html".into())]),
                ..options(&dir)
            },
        )
        .build()
        .await
        .unwrap();

        assert!(plan.jobs.contains(&Job::Redirect {
            path: "site/old".into(),
            location: "/index.html".into(),
        }));
        let deletes: Vec<&Job> = plan
            .jobs
            .iter()
            .filter(|j| j.action() == JobAction::Delete)
            .collect();
        assert_eq!(
            deletes,
            vec![&Job::Delete {
                remote: "site/gone.html".into()
            }]
        );
    }

    #[tokio::test]
    async fn invalidation_targets_wildcard_under_prefix() {
        let dir = tree(&["a.txt"]);
        let plan = Planner::new(
            store_with("site/", &[]),
            PlanOptions {
                target: "site".into(),
                invalidate_cdn: true,
                ..options(&dir)
            },
        )
        .build()
        .await
        .unwrap();
        assert_eq!(
            plan.invalidation,
            Some(Invalidation {
                path: "/site/*".into()
            })
        );

        let plan = Planner::new(
            store_with("", &[]),
            PlanOptions {
                invalidate_cdn: true,
                ..options(&dir)
            },
        )
        .build()
        .await
        .unwrap();
        assert_eq!(plan.invalidation.unwrap().path, "/*");
    }

    #[tokio::test]
    async fn empty_source_is_rejected_unless_allowed() {
        let dir = tree(&[]);
        fs::create_dir(dir.path().join("only-a-dir")).unwrap();

        let err = Planner::new(store_with("", &[]), options(&dir))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::EmptySource(_)));

        let plan = Planner::new(
            store_with("", &[]),
            PlanOptions {
                allow_empty_source: true,
                ..options(&dir)
            },
        )
        .build()
        .await
        .unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn listing_failure_fails_the_build() {
        let dir = tree(&["a.txt"]);
        let mut store = MockObjectStore::new();
        store
            .expect_list_objects()
            .returning(|prefix, _| Err(SyncError::store("list", prefix, "no such bucket")));
        let err = Planner::new(Arc::new(store), options(&dir))
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such bucket"));
    }

    #[tokio::test]
    async fn missing_source_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = Planner::new(
            store_with("", &[]),
            PlanOptions {
                source: dir.path().join("missing"),
                ..Default::default()
            },
        )
        .build()
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::Walk(_)));
    }
}
