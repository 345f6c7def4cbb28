/*!
 * Part planning for multipart uploads
 *
 * Decides between a direct PUT and a multipart upload and fixes the part
 * size before the first byte is read. The part size never changes for the
 * lifetime of a session.
 */

use serde::{Deserialize, Serialize};

use crate::config::ProtocolLimits;
use crate::error::{S3Error, S3Result};

/// One contiguous byte range of the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSpec {
    /// 1-based part number
    pub part_number: u32,

    /// Offset of the first byte within the object
    pub offset: u64,

    /// Expected length (for unknown sizes, the maximum length)
    pub length: u64,
}

/// Shape of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPlan {
    /// Whole object in one PUT
    Direct { size: u64 },

    /// Object split into numbered parts
    Multipart(MultipartPlan),
}

/// Partition of an object into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartPlan {
    part_size: u64,
    total_size: Option<u64>,
    max_parts: u32,
}

impl MultipartPlan {
    /// Size of every part except possibly the last
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Declared object size, None when unknown
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    /// Upper bound on part numbers
    pub fn max_parts(&self) -> u32 {
        self.max_parts
    }

    /// Number of parts for a known size
    pub fn part_count(&self) -> Option<u32> {
        self.total_size
            .map(|total| part_count_for(total, self.part_size) as u32)
    }

    /// Length of the final part for a known size
    pub fn last_part_size(&self) -> Option<u64> {
        let total = self.total_size?;
        let count = self.part_count()?;
        if count == 0 {
            return Some(0);
        }
        Some(total - (count as u64 - 1) * self.part_size)
    }

    /// Spec for part `part_number`, None when it lies outside the plan
    pub fn part_spec(&self, part_number: u32) -> Option<PartSpec> {
        if part_number == 0 || part_number > self.max_parts {
            return None;
        }
        let offset = (part_number as u64 - 1) * self.part_size;

        let length = match self.total_size {
            None => self.part_size,
            Some(total) => {
                let count = self.part_count()?;
                if part_number > count.max(1) {
                    return None;
                }
                (total - offset.min(total)).min(self.part_size)
            }
        };

        Some(PartSpec {
            part_number,
            offset,
            length,
        })
    }

    /// All parts of a known-size plan, in order
    pub fn parts(&self) -> impl Iterator<Item = PartSpec> + '_ {
        let count = self.part_count().unwrap_or(0);
        (1..=count).filter_map(move |n| self.part_spec(n))
    }
}

/// Number of parts needed to cover `total` bytes
pub fn part_count_for(total: u64, part_size: u64) -> u64 {
    if part_size == 0 {
        return 0;
    }
    total.div_ceil(part_size)
}

fn round_up(value: u64, granularity: u64) -> u64 {
    value.div_ceil(granularity).saturating_mul(granularity)
}

/// Compute the shape of an upload
///
/// Fails fast with `InvalidPartSize` or `ObjectTooLarge`, before any network call.
pub fn plan(
    total_size: Option<u64>,
    requested_part_size: Option<u64>,
    limits: &ProtocolLimits,
) -> S3Result<UploadPlan> {
    limits.validate()?;

    if let Some(requested) = requested_part_size {
        validate_part_size(requested, limits)?;
    }

    if let Some(total) = total_size {
        if total <= limits.single_put_threshold && total <= limits.max_part_size {
            return Ok(UploadPlan::Direct { size: total });
        }
        if total > limits.max_object_size {
            return Err(S3Error::ObjectTooLarge {
                size: total,
                max: limits.max_object_size,
            });
        }
    }

    let part_size = match (total_size, requested_part_size) {
        (Some(total), Some(requested)) => {
            let count = part_count_for(total, requested);
            if count > limits.max_parts as u64 {
                return Err(S3Error::InvalidPartSize {
                    part_size: requested,
                    reason: format!(
                        "{} bytes would need {} parts, more than the limit of {}",
                        total, count, limits.max_parts
                    ),
                });
            }
            requested
        }
        (Some(total), None) => derive_part_size(total, limits)?,
        (None, Some(requested)) => requested,
        (None, None) => default_unknown_part_size(limits),
    };

    Ok(UploadPlan::Multipart(MultipartPlan {
        part_size,
        total_size,
        max_parts: limits.max_parts,
    }))
}

/// Check a caller-supplied part size against the protocol bounds
pub fn validate_part_size(part_size: u64, limits: &ProtocolLimits) -> S3Result<()> {
    if part_size < limits.min_part_size {
        return Err(S3Error::InvalidPartSize {
            part_size,
            reason: format!("below minimum of {} bytes", limits.min_part_size),
        });
    }
    if part_size > limits.max_part_size {
        return Err(S3Error::InvalidPartSize {
            part_size,
            reason: format!("above maximum of {} bytes", limits.max_part_size),
        });
    }
    Ok(())
}

/// Smallest granular part size that keeps the part count under the limit
fn derive_part_size(total: u64, limits: &ProtocolLimits) -> S3Result<u64> {
    let needed = total.div_ceil(limits.max_parts as u64);
    let part_size = round_up(needed, limits.part_size_granularity).max(limits.min_part_size);

    if part_size > limits.max_part_size {
        return Err(S3Error::ObjectTooLarge {
            size: total,
            max: limits
                .max_part_size
                .saturating_mul(limits.max_parts as u64),
        });
    }
    Ok(part_size)
}

/// Part size for unknown lengths: large enough that `max_parts` parts reach `max_object_size`
fn default_unknown_part_size(limits: &ProtocolLimits) -> u64 {
    let needed = limits.max_object_size.div_ceil(limits.max_parts as u64);
    round_up(needed, limits.part_size_granularity)
        .max(limits.min_part_size)
        .min(limits.max_part_size)
}
