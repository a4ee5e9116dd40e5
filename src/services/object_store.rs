//! src/services/object_store.rs
//!
//! Object store gateway. `ObjectStore` is the narrow surface the sync engine
//! needs (head, put, copy, ACL fetch, list, delete); `S3ObjectStore` is the
//! adapter onto the AWS SDK. The adapter carries no policy: it never decides
//! anything, it only translates requests and flattens SDK errors.

use crate::{
    errors::{SyncError, SyncResult},
    models::{
        checksum::ChecksumMode,
        remote::{CopyObjectRequest, Grant, HeadOutcome, ListPage, PutObjectRequest, RemoteObject},
    },
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::RequestChecksumCalculation,
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{MetadataDirective, ObjectCannedAcl},
};
use aws_config::SdkConfig;
use std::collections::HashMap;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Remote primitives used by the engine. The bucket is fixed per instance.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Probe a key. A missing object is `Ok(HeadOutcome::NotFound)`, not an error.
    async fn head_object(&self, key: &str) -> SyncResult<HeadOutcome>;

    async fn put_object(&self, request: PutObjectRequest) -> SyncResult<()>;

    /// Replace an object's metadata in place (self-copy, `REPLACE` directive).
    async fn copy_object(&self, request: CopyObjectRequest) -> SyncResult<()>;

    async fn get_object_acl(&self, key: &str) -> SyncResult<Vec<Grant>>;

    /// Fetch one page of keys under `prefix`, starting after `marker`.
    async fn list_objects(&self, prefix: &str, marker: Option<String>) -> SyncResult<ListPage>;

    async fn delete_object(&self, key: &str) -> SyncResult<()>;
}

/// List every key under `prefix`, following markers until a page reports it
/// is not truncated. Keys come back in page order.
pub async fn list_all(store: &dyn ObjectStore, prefix: &str) -> SyncResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut marker = None;
    let mut pages = 0usize;

    loop {
        let page = store.list_objects(prefix, marker.take()).await?;
        pages += 1;
        let last = page.keys.last().cloned();
        keys.extend(page.keys);

        if !page.is_truncated {
            break;
        }
        marker = page.next_marker.or(last);
        if marker.is_none() {
            return Err(SyncError::store(
                "list",
                prefix,
                "truncated listing returned no continuation marker",
            ));
        }
    }

    debug!("listed {} remote keys under `{}` in {} page(s)", keys.len(), prefix, pages);
    Ok(keys)
}

/// S3 (or S3-compatible) implementation of [`ObjectStore`].
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build the S3 client on top of a shared SDK config.
    ///
    /// `endpoint` targets a non-AWS store; `path_style` addresses the bucket
    /// as a path segment instead of a subdomain.
    pub fn new(
        shared: &SdkConfig,
        bucket: impl Into<String>,
        endpoint: Option<&str>,
        path_style: bool,
        checksum: ChecksumMode,
    ) -> Self {
        let calculation = match checksum {
            ChecksumMode::Supported => RequestChecksumCalculation::WhenSupported,
            ChecksumMode::Required => RequestChecksumCalculation::WhenRequired,
        };
        let mut builder = aws_sdk_s3::config::Builder::from(shared)
            .force_path_style(path_style)
            .request_checksum_calculation(calculation);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head_object(&self, key: &str) -> SyncResult<HeadOutcome> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(out) => Ok(HeadOutcome::Found(RemoteObject {
                key: key.to_string(),
                etag: out.e_tag().map(str::to_string),
                content_type: out.content_type().map(str::to_string),
                content_encoding: out.content_encoding().map(str::to_string),
                cache_control: out.cache_control().map(str::to_string),
                metadata: out.metadata().cloned().unwrap_or_default(),
            })),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_not_found()) =>
            {
                Ok(HeadOutcome::NotFound)
            }
            Err(err) => Err(SyncError::store("head", key, DisplayErrorContext(&err))),
        }
    }

    async fn put_object(&self, request: PutObjectRequest) -> SyncResult<()> {
        let body = match &request.body {
            Some(path) => ByteStream::from_path(path)
                .await
                .map_err(|err| SyncError::store("put", &request.key, err))?,
            None => ByteStream::from(Vec::new()),
        };

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .body(body)
            .acl(ObjectCannedAcl::from(request.acl.as_str()))
            .set_content_type(request.content_type)
            .set_content_encoding(request.content_encoding)
            .set_cache_control(request.cache_control)
            .set_metadata(non_empty(request.metadata))
            .set_website_redirect_location(request.website_redirect_location)
            .send()
            .await
            .map_err(|err| SyncError::store("put", &request.key, DisplayErrorContext(&err)))?;

        Ok(())
    }

    async fn copy_object(&self, request: CopyObjectRequest) -> SyncResult<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .copy_source(copy_source(&self.bucket, &request.key))
            .metadata_directive(MetadataDirective::Replace)
            .acl(ObjectCannedAcl::from(request.acl.as_str()))
            .set_content_type(request.content_type)
            .set_content_encoding(request.content_encoding)
            .set_cache_control(request.cache_control)
            .set_metadata(non_empty(request.metadata))
            .send()
            .await
            .map_err(|err| SyncError::store("copy", &request.key, DisplayErrorContext(&err)))?;

        Ok(())
    }

    async fn get_object_acl(&self, key: &str) -> SyncResult<Vec<Grant>> {
        let out = self
            .client
            .get_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| SyncError::store("get acl", key, DisplayErrorContext(&err)))?;

        Ok(out
            .grants()
            .iter()
            .map(|grant| Grant {
                grantee_uri: grant
                    .grantee()
                    .and_then(|grantee| grantee.uri())
                    .map(str::to_string),
                permission: grant
                    .permission()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn list_objects(&self, prefix: &str, marker: Option<String>) -> SyncResult<ListPage> {
        let out = self
            .client
            .list_objects()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_marker(marker)
            .send()
            .await
            .map_err(|err| SyncError::store("list", prefix, DisplayErrorContext(&err)))?;

        Ok(ListPage {
            keys: out
                .contents()
                .iter()
                .filter_map(|object| object.key().map(str::to_string))
                .collect(),
            is_truncated: out.is_truncated().unwrap_or(false),
            next_marker: out.next_marker().map(str::to_string),
        })
    }

    async fn delete_object(&self, key: &str) -> SyncResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| SyncError::store("delete", key, DisplayErrorContext(&err)))?;

        Ok(())
    }
}

fn non_empty(metadata: HashMap<String, String>) -> Option<HashMap<String, String>> {
    (!metadata.is_empty()).then_some(metadata)
}

/// `bucket/key` with each key segment percent-encoded, as the copy API expects.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{}/{}", bucket, encoded.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::{Sequence, predicate::eq};

    fn page(keys: &[&str], is_truncated: bool) -> ListPage {
        ListPage {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            is_truncated,
            next_marker: None,
        }
    }

    #[tokio::test]
    async fn list_all_follows_markers_in_page_order() {
        let mut store = MockObjectStore::new();
        let mut seq = Sequence::new();
        store
            .expect_list_objects()
            .with(eq("site"), eq(None::<String>))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(&["site/a", "site/b"], true)));
        store
            .expect_list_objects()
            .with(eq("site"), eq(Some("site/b".to_string())))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(&["site/c"], true)));
        store
            .expect_list_objects()
            .with(eq("site"), eq(Some("site/c".to_string())))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(&["site/d", "site/e"], false)));

        let keys = list_all(&store, "site").await.unwrap();
        assert_eq!(keys, vec!["site/a", "site/b", "site/c", "site/d", "site/e"]);
    }

    #[tokio::test]
    async fn list_all_prefers_store_marker() {
        let mut store = MockObjectStore::new();
        store
            .expect_list_objects()
            .with(eq(""), eq(None::<String>))
            .times(1)
            .returning(|_, _| {
                Ok(ListPage {
                    keys: vec!["a".into()],
                    is_truncated: true,
                    next_marker: Some("cursor-1".into()),
                })
            });
        store
            .expect_list_objects()
            .with(eq(""), eq(Some("cursor-1".to_string())))
            .times(1)
            .returning(|_, _| Ok(page(&["b"], false)));

        assert_eq!(list_all(&store, "").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn list_all_rejects_truncated_empty_page() {
        let mut store = MockObjectStore::new();
        store
            .expect_list_objects()
            .times(1)
            .returning(|_, _| Ok(page(&[], true)));

        let err = list_all(&store, "site").await.unwrap_err();
        assert!(matches!(err, SyncError::ObjectStore { op: "list", .. }));
    }

    #[tokio::test]
    async fn list_all_propagates_backend_errors() {
        let mut store = MockObjectStore::new();
        store
            .expect_list_objects()
            .times(1)
            .returning(|prefix, _| Err(SyncError::store("list", prefix, "throttled")));

        let err = list_all(&store, "site").await.unwrap_err();
        assert!(err.to_string().contains("throttled"));
    }

    #[test]
    fn copy_source_encodes_key() {
        assert_eq!(copy_source("b", "dir/a b+c.txt"), "b/dir/a%20b%2Bc.txt");
        assert_eq!(copy_source("b", "plain/key.html"), "b/plain/key.html");
        assert_eq!(copy_source("b", "caf\u{e9}/~x.txt"), "b/caf%C3%A9/~x.txt");
    }
}
