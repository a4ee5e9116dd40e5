//! src/services/decision.rs
//!
//! Upload decision engine. For each local file it compares the content hash
//! with the remote ETag and, when the content is unchanged, diffs the stored
//! attributes against the resolved [`UploadPolicy`]:
//!
//! 1. content-type
//! 2. content-encoding
//! 3. cache-control
//! 4. metadata entry count
//! 5. metadata values for keys present on both sides
//! 6. ACL, reverse-mapped from the object's grants
//!
//! The first difference wins and becomes the reason for a metadata-only
//! update. [`Uploader`] then carries the decision out, unless running dry.

use crate::{
    errors::SyncResult,
    models::{
        policy::{PolicyResolver, UploadPolicy},
        remote::{
            CopyObjectRequest, HeadOutcome, PutObjectRequest, RemoteObject, canned_acl_from_grants,
        },
    },
    services::object_store::ObjectStore,
};
use futures::StreamExt;
use md5::Context;
use std::{path::Path, sync::Arc};
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// What to do with one local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Object is missing or its content differs; send the full body.
    Upload,
    /// Content and attributes already match.
    Skip,
    /// Same content, different attributes; replace metadata in place.
    UpdateMetadata { reason: String },
}

/// MD5 of a file, rendered as a single-quoted hex string.
pub async fn local_etag(path: &Path) -> SyncResult<String> {
    let file = File::open(path).await?;
    let mut stream = ReaderStream::new(file);
    let mut digest = Context::new();
    while let Some(chunk) = stream.next().await {
        digest.consume(&chunk?);
    }
    Ok(format!("'{:x}'", digest.compute()))
}

/// Strip the quoting stores put around ETags (`"…"` or `'…'`).
fn unquote(etag: &str) -> &str {
    etag.trim_matches(|c| c == '"' || c == '\'')
}

fn set(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn attribute_change(name: &str, stored: Option<&str>, wanted: Option<&str>) -> Option<String> {
    match (set(stored), set(wanted)) {
        (None, Some(want)) => Some(format!("{name} has changed from unset to {want}")),
        (Some(have), Some(want)) if have != want => {
            Some(format!("{name} has changed from {have} to {want}"))
        }
        (Some(have), None) => Some(format!("{name} has changed from {have} to unset")),
        _ => None,
    }
}

/// Compare the head snapshot against the policy, ACL excluded.
///
/// `local` only names the file in the entry-count reason.
///
/// A policy without a content type leaves whatever the store assigned.
/// Metadata keys are looked up case-insensitively since S3 lowercases them.
pub fn metadata_change(
    local: &Path,
    remote: &RemoteObject,
    policy: &UploadPolicy,
) -> Option<String> {
    if let Some(wanted) = set(policy.content_type.as_deref()) {
        if let Some(reason) =
            attribute_change("content-type", remote.content_type.as_deref(), Some(wanted))
        {
            return Some(reason);
        }
    }
    if let Some(reason) = attribute_change(
        "content-encoding",
        remote.content_encoding.as_deref(),
        policy.content_encoding.as_deref(),
    ) {
        return Some(reason);
    }
    if let Some(reason) = attribute_change(
        "cache-control",
        remote.cache_control.as_deref(),
        policy.cache_control.as_deref(),
    ) {
        return Some(reason);
    }

    if remote.metadata.len() != policy.metadata.len() {
        return Some(format!(
            "count of metadata values has changed for {}",
            local.display()
        ));
    }
    let changed = policy.metadata.iter().any(|(key, value)| {
        remote
            .metadata
            .get(key)
            .or_else(|| remote.metadata.get(&key.to_ascii_lowercase()))
            .is_some_and(|stored| stored != value)
    });
    if changed {
        return Some(format!("metadata values have changed for {}", remote.key));
    }

    None
}

/// Decides upload / skip / metadata update for one file.
#[derive(Clone)]
pub struct DecisionEngine {
    store: Arc<dyn ObjectStore>,
}

impl DecisionEngine {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Decide what to do with `local` given the head result for its key.
    ///
    /// Only reads remote state (the ACL fetch); never mutates it.
    pub async fn decide(
        &self,
        local: &Path,
        remote: &HeadOutcome,
        policy: &UploadPolicy,
    ) -> SyncResult<Decision> {
        let HeadOutcome::Found(remote) = remote else {
            return Ok(Decision::Upload);
        };

        let sum = local_etag(local).await?;
        let same_content = remote
            .etag
            .as_deref()
            .is_some_and(|etag| unquote(etag) == unquote(&sum));
        if !same_content {
            return Ok(Decision::Upload);
        }

        if let Some(reason) = metadata_change(local, remote, policy) {
            return Ok(Decision::UpdateMetadata { reason });
        }

        let grants = self.store.get_object_acl(&remote.key).await?;
        let previous = canned_acl_from_grants(&grants);
        let wanted = policy.acl.as_observed();
        if previous != wanted {
            return Ok(Decision::UpdateMetadata {
                reason: format!(
                    "permissions for '{}' have changed from '{}' to '{}'",
                    remote.key, previous, policy.acl
                ),
            });
        }

        Ok(Decision::Skip)
    }
}

/// Executes upload jobs: resolve policy, probe, decide, then put or copy.
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    engine: DecisionEngine,
    policies: Arc<PolicyResolver>,
    dry_run: bool,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, policies: Arc<PolicyResolver>, dry_run: bool) -> Self {
        Self {
            engine: DecisionEngine::new(store.clone()),
            store,
            policies,
            dry_run,
        }
    }

    /// Bring `remote` in line with the local file at `local`.
    ///
    /// `relative` is the path below the source root used for policy lookup.
    pub async fn sync_file(
        &self,
        local: &Path,
        relative: &str,
        remote: &str,
    ) -> SyncResult<Decision> {
        fs::metadata(local).await?;

        let policy = self.policies.resolve(relative);
        let head = self.store.head_object(remote).await?;
        let decision = self.engine.decide(local, &head, &policy).await?;
        let content_type = policy.content_type.as_deref().unwrap_or("unset");

        match &decision {
            Decision::Skip => {
                debug!("skipping '{}' because hashes and metadata match", local.display());
                return Ok(decision);
            }
            Decision::UpdateMetadata { reason } => {
                debug!("updating metadata for '{}' {}", local.display(), reason);
                if self.dry_run {
                    return Ok(decision);
                }
                self.store
                    .copy_object(CopyObjectRequest {
                        key: remote.to_string(),
                        acl: policy.acl,
                        content_type: policy.content_type,
                        content_encoding: policy.content_encoding,
                        cache_control: policy.cache_control,
                        metadata: policy.metadata,
                    })
                    .await?;
            }
            Decision::Upload => {
                if matches!(head, HeadOutcome::NotFound) {
                    debug!(
                        "'{}' not found in bucket, uploading with content-type '{}' and permissions '{}'",
                        local.display(),
                        content_type,
                        policy.acl
                    );
                } else {
                    debug!(
                        "uploading '{}' with content-type '{}' and permissions '{}'",
                        local.display(),
                        content_type,
                        policy.acl
                    );
                }
                if self.dry_run {
                    return Ok(decision);
                }
                self.store
                    .put_object(PutObjectRequest {
                        key: remote.to_string(),
                        body: Some(local.to_path_buf()),
                        acl: policy.acl,
                        content_type: policy.content_type,
                        content_encoding: policy.content_encoding,
                        cache_control: policy.cache_control,
                        metadata: policy.metadata,
                        website_redirect_location: None,
                    })
                    .await?;
            }
        }

        Ok(decision)
    }
}
