//! s3direct client - object store access
//!
//! [`S3Util`] downloads objects to local files, optionally through the
//! direct I/O writer from `s3direct-storage`. The remote side sits behind
//! the [`ObjectStore`] trait, implemented by the AWS SDK client and by an
//! in-memory store.

pub mod aws;
pub mod memory;
pub mod ratelimit;
pub mod response;
pub mod s3util;
pub mod store;

// Re-exports
pub use aws::AwsS3Client;
pub use memory::MemoryObjectStore;
pub use ratelimit::{RateLimitedWriter, ReadRateLimiter};
pub use response::{
    GetObjectMetadataResponse, GetObjectResponse, GetObjectsResponse, ListObjectsResponse,
    ObjectDownload, S3UtilResponse,
};
pub use s3util::{S3Util, SdkGetObjectOutput, endpoint_for_region, endpoint_uri};
pub use store::{ListPage, ObjectHead, ObjectStore};
