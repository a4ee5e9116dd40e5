//! Remote-side view of objects in the bucket, as reported by the object store.

use crate::models::policy::CannedAcl;
use std::{collections::HashMap, path::PathBuf};

/// Grantee URI of the "everyone" group.
pub const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// Grantee URI of the "any authenticated AWS account" group.
pub const AUTHENTICATED_USERS_URI: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

/// Snapshot of a single object's metadata, fetched by a HEAD request.
///
/// Never cached across runs; the engine fetches it once per upload job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteObject {
    /// Object key within the bucket.
    pub key: String,

    /// Content fingerprint, a quoted hex MD5 for single-part uploads.
    pub etag: Option<String>,

    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,

    /// User metadata (`x-amz-meta-*`) without the header prefix.
    pub metadata: HashMap<String, String>,
}

/// Result of probing a key.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadOutcome {
    Found(RemoteObject),
    NotFound,
}

/// One ACL grant attached to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Group URI; unset for grants to canonical users or e-mail addresses.
    pub grantee_uri: Option<String>,
    /// Permission name as the store reports it (`READ`, `WRITE`, `FULL_CONTROL`, ...).
    pub permission: String,
}

impl Grant {
    #[cfg(test)]
    pub fn group(uri: &str, permission: &str) -> Self {
        Self {
            grantee_uri: Some(uri.to_string()),
            permission: permission.to_string(),
        }
    }
}

/// Reverse-map a grant list onto the canned ACL that would have produced it.
///
/// The broadest recognised group grant wins regardless of listing order:
/// everyone-write, then everyone-read, then authenticated-read. A list
/// without any of them maps to `private`.
pub fn canned_acl_from_grants(grants: &[Grant]) -> CannedAcl {
    grants
        .iter()
        .filter_map(|grant| {
            match (grant.grantee_uri.as_deref()?, grant.permission.as_str()) {
                (ALL_USERS_URI, "WRITE") => Some((3, CannedAcl::PublicReadWrite)),
                (ALL_USERS_URI, "READ") => Some((2, CannedAcl::PublicRead)),
                (AUTHENTICATED_USERS_URI, "READ") => Some((1, CannedAcl::AuthenticatedRead)),
                _ => None,
            }
        })
        .max_by_key(|&(rank, _)| rank)
        .map_or(CannedAcl::Private, |(_, acl)| acl)
}

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub is_truncated: bool,
    /// Cursor to resume from; when the store omits it the caller falls back
    /// to the last key of the page.
    pub next_marker: Option<String>,
}

/// Full object write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutObjectRequest {
    pub key: String,
    /// File to stream as the body. `None` writes an empty object.
    pub body: Option<PathBuf>,
    pub acl: CannedAcl,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: HashMap<String, String>,
    pub website_redirect_location: Option<String>,
}

/// Same-key copy used to replace an object's metadata in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyObjectRequest {
    pub key: String,
    pub acl: CannedAcl,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: HashMap<String, String>,
}
