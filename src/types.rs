//! Request options and result types for uploads

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::checksum::{ChecksumAlgorithm, ChecksumMode, ObjectChecksum};
use crate::progress::ProgressSink;

/// Per-call options for [`S3Client::put_object`](crate::S3Client::put_object)
#[derive(Clone)]
pub struct PutObjectOptions {
    /// Part size; derived from the object size when None
    pub part_size: Option<u64>,

    /// Parallel part uploads; the client default when None
    pub concurrency: Option<usize>,

    /// Object checksum algorithm
    pub checksum_algorithm: ChecksumAlgorithm,

    /// Composite or full-object; the algorithm default when None
    pub checksum_mode: Option<ChecksumMode>,

    /// Send `UNSIGNED-PAYLOAD` instead of hashing part bodies for the signer
    pub disable_content_hash: bool,

    /// Progress notifications
    pub progress: Option<Arc<dyn ProgressSink>>,

    /// Add `Content-MD5` to every part and to a direct PUT
    pub send_content_md5: bool,

    /// Abort the multipart upload when it fails
    pub abort_on_failure: bool,

    /// Content type of the stored object
    pub content_type: Option<String>,

    /// `x-amz-meta-*` metadata, keys without the prefix
    pub user_metadata: BTreeMap<String, String>,
}

impl Default for PutObjectOptions {
    fn default() -> Self {
        Self {
            part_size: None,
            concurrency: None,
            checksum_algorithm: ChecksumAlgorithm::None,
            checksum_mode: None,
            disable_content_hash: false,
            progress: None,
            send_content_md5: false,
            abort_on_failure: true,
            content_type: None,
            user_metadata: BTreeMap::new(),
        }
    }
}

impl PutObjectOptions {
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }

    pub fn with_checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.checksum_mode = Some(mode);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for PutObjectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutObjectOptions")
            .field("part_size", &self.part_size)
            .field("concurrency", &self.concurrency)
            .field("checksum_algorithm", &self.checksum_algorithm)
            .field("checksum_mode", &self.checksum_mode)
            .field("disable_content_hash", &self.disable_content_hash)
            .field("progress", &self.progress.is_some())
            .field("send_content_md5", &self.send_content_md5)
            .field("abort_on_failure", &self.abort_on_failure)
            .field("content_type", &self.content_type)
            .field("user_metadata", &self.user_metadata)
            .finish()
    }
}

/// Stored object as reported after a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub bucket: String,
    pub key: String,

    /// ETag without surrounding quotes
    pub etag: String,

    /// Version ID (if versioning is enabled)
    pub version_id: Option<String>,

    /// Object checksum, when one was requested
    pub checksum: Option<ObjectChecksum>,

    /// Object size in bytes
    pub size: u64,

    /// Multipart upload ID; None for a direct PUT
    pub upload_id: Option<String>,

    /// Number of parts; 0 for a direct PUT
    pub parts: u32,
}

impl ObjectDescriptor {
    pub fn is_multipart(&self) -> bool {
        self.upload_id.is_some()
    }
}
