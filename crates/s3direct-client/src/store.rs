//! Object store seam
//!
//! The facade only needs three remote calls. Keeping them behind a trait
//! lets the AWS SDK client and the in-memory store be swapped freely.

use s3direct_common::Result;
use std::collections::HashMap;
use std::io::Write;
use std::time::SystemTime;

/// Response metadata of a get or head request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectHead {
    /// Body length in bytes
    pub content_length: u64,
    /// Entity tag as returned by the store, quotes included
    pub e_tag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<SystemTime>,
    /// User metadata (`x-amz-meta-*`), names without the prefix
    pub metadata: HashMap<String, String>,
}

impl ObjectHead {
    /// ETag without surrounding quotes; the body MD5 for single-part uploads
    pub fn md5(&self) -> Option<&str> {
        self.e_tag.as_deref().map(|t| t.trim_matches('"'))
    }
}

/// One page of a listing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Object keys, in store order
    pub keys: Vec<String>,
    /// Prefixes folded by the delimiter
    pub common_prefixes: Vec<String>,
    /// Token for the next page; `None` once the listing is exhausted
    pub next_continuation_token: Option<String>,
}

/// Blocking object store client
///
/// Implementations must be safe to call from many threads at once.
pub trait ObjectStore: Send + Sync {
    /// Stream the body of `bucket/key` into `sink`
    fn get_object(&self, bucket: &str, key: &str, sink: &mut dyn Write) -> Result<ObjectHead>;

    /// Fetch metadata of `bucket/key` without the body
    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead>;

    /// Fetch one page of keys under `prefix`
    fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage>;
}
