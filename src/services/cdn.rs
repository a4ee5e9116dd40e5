//! CDN gateway: a single "invalidate this path" primitive.

use crate::errors::{SyncError, SyncResult};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudfront::{
    Client,
    error::DisplayErrorContext,
    types::{InvalidationBatch, Paths},
};
use chrono::{SecondsFormat, Utc};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Cdn: Send + Sync {
    /// Purge cached copies of `path` (a glob such as `/site/*`).
    async fn invalidate(&self, path: &str) -> SyncResult<()>;
}

/// CloudFront-backed [`Cdn`] bound to one distribution.
#[derive(Clone)]
pub struct CloudFrontCdn {
    client: Client,
    distribution_id: String,
}

impl CloudFrontCdn {
    pub fn new(shared: &SdkConfig, distribution_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(shared),
            distribution_id: distribution_id.into(),
        }
    }
}

/// Unique per call so repeated invalidations of one path are never
/// deduplicated by CloudFront.
pub fn caller_reference() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn batch_error(path: &str, err: impl std::fmt::Display) -> SyncError {
    SyncError::Cdn {
        path: path.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl Cdn for CloudFrontCdn {
    async fn invalidate(&self, path: &str) -> SyncResult<()> {
        debug!("invalidating '{}' on distribution {}", path, self.distribution_id);

        let paths = Paths::builder()
            .quantity(1)
            .items(path)
            .build()
            .map_err(|err| batch_error(path, err))?;
        let batch = InvalidationBatch::builder()
            .caller_reference(caller_reference())
            .paths(paths)
            .build()
            .map_err(|err| batch_error(path, err))?;

        self.client
            .create_invalidation()
            .distribution_id(&self.distribution_id)
            .invalidation_batch(batch)
            .send()
            .await
            .map_err(|err| batch_error(path, DisplayErrorContext(&err)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn caller_reference_is_nanosecond_timestamp() {
        let reference = caller_reference();
        assert!(DateTime::parse_from_rfc3339(&reference).is_ok());
        // nine fractional digits
        let fraction = reference
            .split('.')
            .nth(1)
            .unwrap()
            .trim_end_matches('Z');
        assert_eq!(fraction.len(), 9);
    }
}
