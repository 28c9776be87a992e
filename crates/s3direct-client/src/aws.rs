//! AWS SDK backed object store
//!
//! The SDK is async; this client owns a Tokio runtime and blocks the
//! calling thread on it for every request. Calls may come from any number
//! of threads at once, but never from inside another async runtime.
//!
//! Creating the client is the process-wide SDK initialization and dropping
//! it the shutdown. Only one such lifecycle is expected per process; a
//! second one is allowed but logged.

use crate::store::{ListPage, ObjectHead, ObjectStore};
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use s3direct_common::{Error, Result, S3Config};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// Live SDK lifecycles in this process
static ACTIVE_SDK_LIFECYCLES: AtomicUsize = AtomicUsize::new(0);

/// Object store client on top of `aws-sdk-s3`
pub struct AwsS3Client {
    // Declared before the runtime so it is dropped first.
    client: Client,
    runtime: Runtime,
}

impl AwsS3Client {
    /// Initialize the SDK and build a client from `config`
    ///
    /// Credentials come from the SDK's default provider chain. With an
    /// endpoint override the client uses path-style addressing, which is
    /// what S3-compatible stores expect.
    pub fn new(config: &S3Config) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("s3direct-sdk")
            .build()
            .map_err(|e| Error::internal(format!("failed to start SDK runtime: {e}")))?;

        let timeouts = TimeoutConfig::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .read_timeout(Duration::from_millis(config.request_timeout_ms))
            .build();

        let sdk_config = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(config.region.clone()))
                .timeout_config(timeouts)
                .load(),
        );

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint_url(config) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        let previous = ACTIVE_SDK_LIFECYCLES.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            warn!(
                active = previous + 1,
                "more than one object store SDK lifecycle is active in this process"
            );
        }
        info!(
            region = %config.region,
            endpoint = config.endpoint_override.as_deref().unwrap_or("default"),
            "initialized object store SDK"
        );

        Ok(Self { client, runtime })
    }
}

impl Drop for AwsS3Client {
    fn drop(&mut self) {
        ACTIVE_SDK_LIFECYCLES.fetch_sub(1, Ordering::SeqCst);
        info!("shutting down object store SDK");
    }
}

/// Full endpoint URL for the SDK from the configured override
fn endpoint_url(config: &S3Config) -> Option<String> {
    config.endpoint_override.as_deref().map(|endpoint| {
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("{}://{endpoint}", config.scheme)
        }
    })
}

/// Turn an SDK failure into an error carrying the store's full message
fn sdk_error<E, R>(operation: &str, target: &str, err: &SdkError<E, R>) -> Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) => Error::Timeout,
        SdkError::DispatchFailure(_) => Error::ConnectionFailed(format!(
            "{operation} {target}: {}",
            DisplayErrorContext(err)
        )),
        _ => Error::remote(format!("{operation} {target}: {}", DisplayErrorContext(err))),
    }
}

fn to_system_time(t: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<SystemTime> {
    t.and_then(|t| SystemTime::try_from(*t).ok())
}

impl ObjectStore for AwsS3Client {
    fn get_object(&self, bucket: &str, key: &str, sink: &mut dyn Write) -> Result<ObjectHead> {
        self.runtime.block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error().is_some_and(GetObjectError::is_no_such_key) {
                        Error::ObjectNotFound {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                        }
                    } else {
                        sdk_error("GetObject", &format!("{bucket}/{key}"), &e)
                    }
                })?;

            let head = ObjectHead {
                content_length: output.content_length().map_or(0, |l| l.max(0) as u64),
                e_tag: output.e_tag().map(str::to_string),
                content_type: output.content_type().map(str::to_string),
                last_modified: to_system_time(output.last_modified()),
                metadata: output.metadata().cloned().unwrap_or_default(),
            };

            let mut body = output.body;
            while let Some(chunk) = body.try_next().await.map_err(|e| {
                Error::remote(format!("GetObject {bucket}/{key}: body read failed: {e}"))
            })? {
                sink.write_all(&chunk)?;
            }

            debug!(bucket, key, size = head.content_length, "streamed object body");
            Ok::<_, Error>(head)
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        self.runtime.block_on(async {
            let output = self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error().is_some_and(HeadObjectError::is_not_found) {
                        Error::ObjectNotFound {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                        }
                    } else {
                        sdk_error("HeadObject", &format!("{bucket}/{key}"), &e)
                    }
                })?;

            Ok::<_, Error>(ObjectHead {
                content_length: output.content_length().map_or(0, |l| l.max(0) as u64),
                e_tag: output.e_tag().map(str::to_string),
                content_type: output.content_type().map(str::to_string),
                last_modified: to_system_time(output.last_modified()),
                metadata: output.metadata().cloned().unwrap_or_default(),
            })
        })
    }

    fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage> {
        self.runtime.block_on(async {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_delimiter(delimiter.map(str::to_string))
                .set_continuation_token(continuation_token.map(str::to_string))
                .send()
                .await
                .map_err(|e| {
                    if e
                        .as_service_error()
                        .is_some_and(ListObjectsV2Error::is_no_such_bucket)
                    {
                        Error::BucketNotFound(bucket.to_string())
                    } else {
                        sdk_error("ListObjectsV2", &format!("{bucket}/{prefix}"), &e)
                    }
                })?;

            let next_continuation_token = if output.is_truncated().unwrap_or(false) {
                output.next_continuation_token().map(str::to_string)
            } else {
                None
            };

            Ok::<_, Error>(ListPage {
                keys: output
                    .contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string))
                    .collect(),
                common_prefixes: output
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix().map(str::to_string))
                    .collect(),
                next_continuation_token,
            })
        })
    }
}
