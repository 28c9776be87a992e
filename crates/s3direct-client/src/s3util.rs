//! Object store facade
//!
//! [`S3Util`] binds a bucket to an [`ObjectStore`] and downloads objects to
//! local files, optionally through the direct I/O writer. Every operation
//! reports failure as text in its response instead of returning `Err`;
//! callers check [`S3UtilResponse::is_ok`] before trusting a body.

use crate::aws::AwsS3Client;
use crate::ratelimit::{RateLimitedWriter, ReadRateLimiter};
use crate::response::{
    GetObjectMetadataResponse, GetObjectResponse, GetObjectsResponse, ListObjectsResponse,
    ObjectDownload,
};
use crate::store::{ObjectHead, ObjectStore};
use bytes::Bytes;
use s3direct_common::{Config, Error, Result, S3Config};
use s3direct_storage::LocalFileSink;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, error, info, warn};

/// Unprocessed outcome of a get request
#[derive(Clone, Debug)]
pub struct SdkGetObjectOutput {
    /// Response metadata
    pub head: ObjectHead,
    /// Body, when no local path was given
    pub body: Option<Bytes>,
    /// File the body was written to, when one was given
    pub local_path: Option<PathBuf>,
    pub bytes_written: u64,
}

/// Facade over one bucket of an object store
///
/// Safe to share between threads; concurrent downloads must target
/// distinct local paths.
pub struct S3Util {
    bucket: String,
    client: Arc<dyn ObjectStore>,
    uri: String,
    direct_io_buffer_pages: usize,
    rate_limiter: Option<Arc<ReadRateLimiter>>,
}

impl std::fmt::Debug for S3Util {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Util")
            .field("bucket", &self.bucket)
            .field("uri", &self.uri)
            .field("direct_io_buffer_pages", &self.direct_io_buffer_pages)
            .finish_non_exhaustive()
    }
}

impl S3Util {
    /// Build a facade backed by the AWS SDK
    ///
    /// Returns `None` when `bucket` is empty (before anything is
    /// initialized) or when the SDK cannot be brought up.
    pub fn build(
        read_ratelimit_mb: u32,
        bucket: &str,
        connect_timeout_ms: u64,
        request_timeout_ms: u64,
    ) -> Option<Arc<Self>> {
        let mut config = Config::default();
        config.s3.bucket = bucket.to_string();
        config.s3.read_ratelimit_mb = read_ratelimit_mb;
        config.s3.connect_timeout_ms = connect_timeout_ms;
        config.s3.request_timeout_ms = request_timeout_ms;
        Self::build_with_config(&config)
    }

    /// Build a facade backed by the AWS SDK from a full configuration
    pub fn build_with_config(config: &Config) -> Option<Arc<Self>> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "refusing to build S3Util");
            return None;
        }

        let client = match AwsS3Client::new(&config.s3) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "failed to initialize object store client");
                return None;
            }
        };

        Self::with_client(config, Arc::new(client))
            .map(Arc::new)
            .ok()
    }

    /// Build a facade over an existing client
    pub fn with_client(config: &Config, client: Arc<dyn ObjectStore>) -> Result<Self> {
        config.validate()?;

        let uri = endpoint_uri(&config.s3);
        info!(bucket = %config.s3.bucket, uri = %uri, "created S3Util");

        Ok(Self {
            bucket: config.s3.bucket.clone(),
            client,
            uri,
            direct_io_buffer_pages: config.direct_io.buffer_pages,
            rate_limiter: ReadRateLimiter::from_mb_per_sec(config.s3.read_ratelimit_mb)
                .map(Arc::new),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Request URI of the store, e.g. `https://s3.us-west-2.amazonaws.com`
    pub fn endpoint_uri(&self) -> &str {
        &self.uri
    }

    /// Download `key` to `local_path`
    ///
    /// The local file is opened when the first body bytes arrive, so a
    /// request that fails up front (missing key, access denied) leaves an
    /// existing file untouched. A failure after that removes the partial
    /// file.
    pub fn get_object(
        &self,
        key: &str,
        local_path: impl AsRef<Path>,
        direct_io: bool,
    ) -> GetObjectResponse {
        match self.sdk_get_object(key, Some(local_path.as_ref()), direct_io) {
            Ok(_) => GetObjectResponse::ok(true),
            Err(e) => GetObjectResponse::err(e),
        }
    }

    /// Fetch `key` and return the raw outcome
    ///
    /// With `local_path` the body goes to that file (through the direct I/O
    /// writer if requested); without one it is returned in memory. Local
    /// write failures name the file they hit.
    pub fn sdk_get_object(
        &self,
        key: &str,
        local_path: Option<&Path>,
        direct_io: bool,
    ) -> Result<SdkGetObjectOutput> {
        let Some(path) = local_path else {
            let mut body = Vec::new();
            let head = self.fetch_into(key, &mut body)?;
            return Ok(SdkGetObjectOutput {
                head,
                bytes_written: body.len() as u64,
                body: Some(Bytes::from(body)),
                local_path: None,
            });
        };

        let mut sink = DeferredFileSink::new(path, direct_io, self.direct_io_buffer_pages);
        let fetched = self
            .fetch_into(key, &mut sink)
            .map_err(|e| attach_path(path, e));
        let touched = fetched.is_ok() || sink.is_open();

        let result = fetched.and_then(|head| {
            let bytes_written = sink.finish()?;
            if bytes_written != head.content_length {
                return Err(Error::storage(format!(
                    "short download of {}: expected {} bytes, wrote {bytes_written}",
                    key, head.content_length
                )));
            }
            Ok((head, bytes_written))
        });

        match result {
            Ok((head, bytes_written)) => {
                debug!(
                    bucket = %self.bucket,
                    key,
                    path = %path.display(),
                    bytes = bytes_written,
                    direct_io,
                    "downloaded object"
                );
                Ok(SdkGetObjectOutput {
                    head,
                    body: None,
                    local_path: Some(path.to_path_buf()),
                    bytes_written,
                })
            }
            Err(e) => {
                warn!(bucket = %self.bucket, key, error = %e, "failed to download object");
                if touched {
                    remove_partial(path);
                }
                Err(e)
            }
        }
    }

    fn fetch_into(&self, key: &str, sink: &mut dyn Write) -> Result<ObjectHead> {
        let mut limited = RateLimitedWriter::new(sink, self.rate_limiter.clone());
        self.client.get_object(&self.bucket, key, &mut limited)
    }

    /// List every key under `prefix`, following continuation tokens
    pub fn list_objects(&self, prefix: &str) -> ListObjectsResponse {
        self.list_objects_with_delimiter(prefix, None)
    }

    /// List keys under `prefix`; with a delimiter, keys below the next
    /// delimiter are left out
    pub fn list_objects_with_delimiter(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> ListObjectsResponse {
        match self.collect_keys(prefix, delimiter) {
            Ok(keys) => ListObjectsResponse::ok(keys),
            Err(e) => {
                warn!(bucket = %self.bucket, prefix, error = %e, "failed to list objects");
                ListObjectsResponse::err(e)
            }
        }
    }

    fn collect_keys(&self, prefix: &str, delimiter: Option<&str>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.client.list_objects_page(
                &self.bucket,
                prefix,
                delimiter,
                token.as_deref(),
            )?;
            keys.extend(page.keys);

            match page.next_continuation_token {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    return Err(Error::remote(format!(
                        "listing of {prefix} did not advance past {next}"
                    )));
                }
                Some(next) => token = Some(next),
                None => return Ok(keys),
            }
        }
    }

    /// Download every object directly under `prefix` into `local_directory`
    ///
    /// Each key lands in `local_directory/<part after the last delimiter>`.
    /// Keys are attempted independently and reported in listing order; the
    /// outer response only fails when the listing does.
    pub fn get_objects(
        &self,
        prefix: &str,
        local_directory: impl AsRef<Path>,
        delimiter: &str,
        direct_io: bool,
    ) -> GetObjectsResponse {
        let listing =
            self.list_objects_with_delimiter(prefix, Some(delimiter).filter(|d| !d.is_empty()));
        if !listing.is_ok() {
            return GetObjectsResponse::err(listing.error());
        }

        let local_directory = local_directory.as_ref();
        let keys = listing.into_body();
        let mut downloads = Vec::with_capacity(keys.len());

        for key in keys {
            let (local_path, response) = match local_name(&key, prefix, delimiter) {
                Some(name) => {
                    let path = local_directory.join(name);
                    let response = self.get_object(&key, &path, direct_io);
                    (path, response)
                }
                None => (
                    local_directory.to_path_buf(),
                    GetObjectResponse::err(format!("no usable local file name for key {key}")),
                ),
            };
            downloads.push(ObjectDownload {
                key,
                local_path,
                response,
            });
        }

        let failed = downloads.iter().filter(|d| !d.is_ok()).count();
        info!(
            bucket = %self.bucket,
            prefix,
            total = downloads.len(),
            failed,
            "downloaded objects under prefix"
        );
        GetObjectsResponse::ok(downloads)
    }

    /// Fetch object metadata
    ///
    /// The map always has `md5` and `content-length`, plus `content-type`,
    /// `last-modified` (Unix seconds) and `x-amz-meta-*` entries when the
    /// store reports them.
    pub fn get_object_metadata(&self, key: &str) -> GetObjectMetadataResponse {
        let head = match self.client.head_object(&self.bucket, key) {
            Ok(head) => head,
            Err(e) => return GetObjectMetadataResponse::err(e),
        };

        let mut metadata = HashMap::new();
        metadata.insert("md5".to_string(), head.md5().unwrap_or_default().to_string());
        metadata.insert("content-length".to_string(), head.content_length.to_string());
        if let Some(content_type) = head.content_type {
            metadata.insert("content-type".to_string(), content_type);
        }
        if let Some(secs) = head
            .last_modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
        {
            metadata.insert("last-modified".to_string(), secs.to_string());
        }
        for (name, value) in head.metadata {
            metadata.insert(format!("x-amz-meta-{name}"), value);
        }
        GetObjectMetadataResponse::ok(metadata)
    }

    /// Split `<scheme>://<bucket>/<key>` into bucket and key
    ///
    /// The key may be empty; the scheme and bucket may not.
    pub fn parse_full_s3_path(s3_path: &str) -> Result<(String, String)> {
        let (scheme, rest) = s3_path
            .split_once("://")
            .ok_or_else(|| Error::InvalidS3Path(format!("{s3_path}: expected <scheme>://")))?;
        if scheme.is_empty() {
            return Err(Error::InvalidS3Path(format!("{s3_path}: empty scheme")));
        }

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::InvalidS3Path(format!("{s3_path}: empty bucket")));
        }
        Ok((bucket.to_string(), key.to_string()))
    }
}

/// Request URI for the configured endpoint or region
pub fn endpoint_uri(config: &S3Config) -> String {
    match config.endpoint_override.as_deref() {
        Some(endpoint) if endpoint.contains("://") => endpoint.to_string(),
        Some(endpoint) => format!("{}://{endpoint}", config.scheme),
        None => format!("{}://{}", config.scheme, endpoint_for_region(&config.region)),
    }
}

/// S3 host serving `region`
pub fn endpoint_for_region(region: &str) -> String {
    match region {
        "" | "us-east-1" => "s3.amazonaws.com".to_string(),
        r if r.starts_with("cn-") => format!("s3.{r}.amazonaws.com.cn"),
        r => format!("s3.{r}.amazonaws.com"),
    }
}

/// Local destination opened on the first write
struct DeferredFileSink<'a> {
    path: &'a Path,
    direct_io: bool,
    buffer_pages: usize,
    sink: Option<LocalFileSink>,
}

impl<'a> DeferredFileSink<'a> {
    const fn new(path: &'a Path, direct_io: bool, buffer_pages: usize) -> Self {
        Self {
            path,
            direct_io,
            buffer_pages,
            sink: None,
        }
    }

    const fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    fn open(&mut self) -> Result<&mut LocalFileSink> {
        match self.sink {
            Some(ref mut sink) => Ok(sink),
            None => {
                let sink = LocalFileSink::create(self.path, self.direct_io, self.buffer_pages)?;
                Ok(self.sink.insert(sink))
            }
        }
    }

    /// Finish the file, creating it if the body was empty
    fn finish(mut self) -> Result<u64> {
        self.open()?;
        match self.sink.take() {
            Some(sink) => sink.finish().map_err(|e| attach_path(self.path, e)),
            None => Ok(0),
        }
    }
}

impl Write for DeferredFileSink<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.open()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.sink.as_mut().map_or(Ok(()), Write::flush)
    }
}

/// Bind a bare local I/O error to the file it happened on
fn attach_path(path: &Path, err: Error) -> Error {
    match err {
        Error::DiskIo(source) => Error::file_io(path, source),
        other => other,
    }
}

/// Remove what a failed download left at `path`; only regular files
fn remove_partial(path: &Path) {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove partial file");
            }
        }
        Ok(_) => debug!(path = %path.display(), "not a regular file, left in place"),
        Err(e) => debug!(path = %path.display(), error = %e, "no partial file removed"),
    }
}

/// Local file name for `key`, or `None` if it would not stay inside the
/// target directory
fn local_name<'a>(key: &'a str, prefix: &str, delimiter: &str) -> Option<&'a str> {
    let name = if delimiter.is_empty() {
        key.strip_prefix(prefix).unwrap_or(key).trim_start_matches('/')
    } else {
        key.rsplit(delimiter).next().unwrap_or(key)
    };

    let mut components = Path::new(name).components().peekable();
    components.peek()?;
    components
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(name)
}
