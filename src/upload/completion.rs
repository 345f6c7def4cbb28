//! Completion of a multipart upload
//!
//! Builds the ordered manifest and sends the completion call. The call is
//! retried once on any failure except cancellation; this assumes the server
//! treats a repeated completion with an identical manifest as idempotent.

use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::cancellable;
use super::session::{PartResult, UploadSession};
use crate::client::S3Client;
use crate::core::checksum::ObjectChecksum;
use crate::core::retry::RetryPolicy;
use crate::error::{S3Error, S3Result};
pub use crate::protocol::xml::CompletedPart;
use crate::types::ObjectDescriptor;

/// Ordered manifest of parts `1..=expected`
///
/// Part checksums are carried only when `include_checksums` is set.
pub fn build_manifest(
    parts: &BTreeMap<u32, PartResult>,
    expected: u32,
    include_checksums: bool,
) -> S3Result<Vec<CompletedPart>> {
    let missing: Vec<u32> = (1..=expected).filter(|n| !parts.contains_key(n)).collect();
    if !missing.is_empty() {
        return Err(S3Error::IncompleteManifest { expected, missing });
    }
    if let Some((&extra, _)) = parts.range(expected + 1..).next() {
        return Err(S3Error::Internal(format!(
            "Part {} recorded beyond the expected {} parts",
            extra, expected
        )));
    }

    Ok(parts
        .values()
        .map(|part| CompletedPart {
            part_number: part.part_number,
            etag: part.etag.clone(),
            checksum: if include_checksums {
                part.checksum.clone()
            } else {
                None
            },
        })
        .collect())
}

/// Send the completion call and describe the stored object
///
/// A failure comes back as `CompletionFailed`, except cancellation which is
/// returned as `Cancelled`.
pub async fn complete(
    client: &S3Client,
    session: &UploadSession,
    manifest: &[CompletedPart],
    object_checksum: Option<ObjectChecksum>,
    cancel: &CancellationToken,
) -> S3Result<ObjectDescriptor> {
    let upload_id = session
        .upload_id()
        .ok_or_else(|| S3Error::Internal("Completing an upload without an ID".to_string()))?;
    let policy = RetryPolicy::completion(client.retry_policy());

    let result = policy
        .run(cancel, "complete_multipart_upload", |attempt| {
            if attempt > 1 {
                warn!(upload_id, "Retrying completion with the same manifest");
            }
            cancellable(
                cancel,
                client.complete_multipart(
                    session.bucket(),
                    session.key(),
                    upload_id,
                    manifest,
                    object_checksum.as_ref(),
                ),
            )
        })
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                S3Error::Cancelled
            } else {
                S3Error::CompletionFailed {
                    upload_id: upload_id.to_string(),
                    source: Box::new(e),
                }
            }
        })?;

    if let Some(local) = &object_checksum {
        if let Some(echoed) = result.checksum(local.algorithm) {
            if echoed != local.value {
                return Err(S3Error::ChecksumMismatch {
                    key: session.key().to_string(),
                    expected: local.value.clone(),
                    actual: echoed.to_string(),
                });
            }
        }
    }

    info!(
        upload_id,
        etag = %result.etag,
        parts = manifest.len(),
        "Multipart upload completed"
    );

    Ok(ObjectDescriptor {
        bucket: session.bucket().to_string(),
        key: session.key().to_string(),
        etag: result.etag,
        version_id: result.version_id,
        checksum: object_checksum,
        size: session.bytes_uploaded(),
        upload_id: Some(upload_id.to_string()),
        parts: manifest.len() as u32,
    })
}
