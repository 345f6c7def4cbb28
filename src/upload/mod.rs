//! Multipart upload orchestration
//!
//! [`coordinator`] drives a session from planning to a terminal state,
//! [`session`] holds its bookkeeping and [`completion`] assembles the final
//! manifest.

pub mod completion;
pub mod coordinator;
pub mod session;

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{S3Error, S3Result};

pub use completion::{build_manifest, CompletedPart};
pub use session::{PartResult, SessionState, UploadSession};

/// Race a network call against cancellation; the call is dropped when the token fires
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, operation: F) -> S3Result<T>
where
    F: Future<Output = S3Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(S3Error::Cancelled),
        result = operation => result,
    }
}
