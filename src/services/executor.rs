//! Per-job dispatch: what each kind of job does against the gateways.

use crate::{
    errors::{SyncError, SyncResult},
    models::{
        job::{Invalidation, Job},
        policy::CannedAcl,
        remote::PutObjectRequest,
    },
    services::{cdn::Cdn, decision::Uploader, object_store::ObjectStore},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs individual jobs on behalf of the scheduler.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: &Job) -> SyncResult<()>;

    async fn invalidate(&self, invalidation: &Invalidation) -> SyncResult<()>;
}

/// [`JobExecutor`] backed by the object store and CDN gateways.
pub struct GatewayExecutor {
    store: Arc<dyn ObjectStore>,
    uploader: Uploader,
    cdn: Option<Arc<dyn Cdn>>,
    dry_run: bool,
}

impl GatewayExecutor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        uploader: Uploader,
        cdn: Option<Arc<dyn Cdn>>,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            uploader,
            cdn,
            dry_run,
        }
    }

    async fn redirect(&self, path: &str, location: &str) -> SyncResult<()> {
        debug!("adding redirect from '{}' to '{}'", path, location);
        if self.dry_run {
            return Ok(());
        }

        self.store
            .put_object(PutObjectRequest {
                key: path.to_string(),
                acl: CannedAcl::PublicRead,
                website_redirect_location: Some(location.to_string()),
                ..Default::default()
            })
            .await
    }

    async fn delete(&self, remote: &str) -> SyncResult<()> {
        debug!("removing remote file '{}'", remote);
        if self.dry_run {
            return Ok(());
        }

        self.store.delete_object(remote).await
    }
}

#[async_trait]
impl JobExecutor for GatewayExecutor {
    async fn execute(&self, job: &Job) -> SyncResult<()> {
        match job {
            Job::Upload {
                local,
                relative,
                remote,
            } => self
                .uploader
                .sync_file(local, relative, remote)
                .await
                .map(|_| ()),
            Job::Redirect { path, location } => self.redirect(path, location).await,
            Job::Delete { remote } => self.delete(remote).await,
        }
    }

    async fn invalidate(&self, invalidation: &Invalidation) -> SyncResult<()> {
        let Some(cdn) = &self.cdn else {
            return Err(SyncError::Config(
                "invalidation planned without a CDN distribution".into(),
            ));
        };

        debug!("invalidating '{}'", invalidation.path);
        if self.dry_run {
            return Ok(());
        }
        cdn.invalidate(&invalidation.path).await
    }
}
