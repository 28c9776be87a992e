//! In-memory object store
//!
//! Mirrors the S3 behavior the facade depends on: lexicographic listing,
//! delimiter folding, continuation tokens, quoted MD5 ETags. Failures can be
//! injected per key to exercise partial batches.

use crate::store::{ListPage, ObjectHead, ObjectStore};
use bytes::Bytes;
use parking_lot::RwLock;
use s3direct_common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Keys per listing page, same as S3's default
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Size of each write handed to the sink
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    head: ObjectHead,
}

/// Thread-safe object store held entirely in memory
#[derive(Debug)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    /// Injected failures, keyed by (bucket, key)
    failures: RwLock<HashMap<(String, String), String>>,
    page_size: usize,
    list_requests: AtomicU64,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Store returning at most `page_size` entries per listing page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
            list_requests: AtomicU64::new(0),
        }
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Store an object, creating the bucket if needed
    pub fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> ObjectHead {
        self.put_object_with_metadata(bucket, key, data, HashMap::new())
    }

    pub fn put_object_with_metadata(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        metadata: HashMap<String, String>,
    ) -> ObjectHead {
        let data = data.into();
        let head = ObjectHead {
            content_length: data.len() as u64,
            e_tag: Some(format!("\"{:x}\"", md5::compute(&data))),
            content_type: Some("application/octet-stream".to_string()),
            last_modified: Some(SystemTime::now()),
            metadata,
        };

        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    data,
                    head: head.clone(),
                },
            );
        head
    }

    /// Make every get/head of `bucket/key` fail with `message`
    pub fn fail_object(&self, bucket: &str, key: &str, message: impl Into<String>) {
        self.failures
            .write()
            .insert((bucket.to_string(), key.to_string()), message.into());
    }

    /// Number of listing pages served so far
    pub fn list_requests(&self) -> u64 {
        self.list_requests.load(Ordering::Relaxed)
    }

    fn lookup(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        if let Some(message) = self
            .failures
            .read()
            .get(&(bucket.to_string(), key.to_string()))
        {
            return Err(Error::remote(message.clone()));
        }

        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

/// A listing entry: an object key or a folded common prefix
enum Entry {
    Key(String),
    Prefix(String),
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Self::Key(s) | Self::Prefix(s) => s,
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_object(&self, bucket: &str, key: &str, sink: &mut dyn Write) -> Result<ObjectHead> {
        let object = self.lookup(bucket, key)?;
        for chunk in object.data.chunks(STREAM_CHUNK_SIZE) {
            sink.write_all(chunk)?;
        }
        Ok(object.head)
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        self.lookup(bucket, key).map(|o| o.head)
    }

    fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage> {
        self.list_requests.fetch_add(1, Ordering::Relaxed);

        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;

        let mut entries: Vec<Entry> = Vec::new();
        for key in objects
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
        {
            let folded = delimiter.filter(|d| !d.is_empty()).and_then(|d| {
                key[prefix.len()..]
                    .find(d)
                    .map(|idx| key[..prefix.len() + idx + d.len()].to_string())
            });
            match folded {
                Some(common) => {
                    if entries.last().map(Entry::name) != Some(common.as_str()) {
                        entries.push(Entry::Prefix(common));
                    }
                }
                None => entries.push(Entry::Key(key.clone())),
            }
        }

        let mut remaining = entries
            .into_iter()
            .filter(|e| continuation_token.is_none_or(|t| e.name() > t))
            .peekable();

        let mut page = ListPage::default();
        let mut last = None;
        for entry in remaining.by_ref().take(self.page_size) {
            last = Some(entry.name().to_string());
            match entry {
                Entry::Key(k) => page.keys.push(k),
                Entry::Prefix(p) => page.common_prefixes.push(p),
            }
        }
        if remaining.peek().is_some() {
            page.next_continuation_token = last;
        }
        Ok(page)
    }
}
