/*!
 * s3stream - streaming multipart uploads for S3-compatible object stores
 *
 * Uploads a byte stream of known or unknown length with:
 * - Part planning within the protocol limits (10,000 parts, 5 MiB..5 GiB)
 * - A fixed pool of concurrent part workers with bounded buffer memory
 * - Per-part retries with exponential backoff and jitter
 * - Composite and full-object checksums (CRC32, CRC32C, CRC64NVME, SHA-256, MD5)
 * - Ordered completion and abort-on-failure cleanup
 * - Cooperative cancellation
 *
 * Requests go through the pluggable [`Transport`] and [`RequestSigner`]
 * traits; the `http-transport` feature provides a reqwest-backed transport.
 */

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod types;
pub mod upload;

// Re-export commonly used types
pub use client::{PutResult, S3Client};
pub use config::{ClientConfig, ClientConfigBuilder, LogLevel, ProtocolLimits, RetrySettings};
pub use core::checksum::{ChecksumAlgorithm, ChecksumMode, ObjectChecksum};
pub use core::retry::RetryPolicy;
pub use error::{S3Error, S3Result};
pub use progress::{ProgressEvent, ProgressReporter, ProgressSink};
pub use protocol::signer::{AnonymousSigner, RequestSigner};
pub use protocol::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use types::{ObjectDescriptor, PutObjectOptions};
pub use upload::SessionState;

#[cfg(feature = "http-transport")]
pub use protocol::http::HttpTransport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
