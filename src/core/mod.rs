/*!
 * Core building blocks of the upload engine
 */

pub mod buffer_pool;
pub mod checksum;
pub mod planner;
pub mod reader;
pub mod retry;

pub use buffer_pool::{BufferLease, BufferPool};
pub use checksum::{ChecksumAlgorithm, ChecksumMode, ChecksumState, ObjectChecksum, PartChecksum};
pub use planner::{plan, MultipartPlan, PartSpec, UploadPlan};
pub use reader::{PartReader, StagedPart};
pub use retry::{BackoffStrategy, RetryPolicy};
