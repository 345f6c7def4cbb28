/*!
 * Sequential part reader
 *
 * Stages one part at a time from the caller's source. The source is only
 * ever read by one task, so the full-object checksum is folded here in
 * ascending part order while the bytes are still in hand.
 */

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::buffer_pool::{BufferLease, BufferPool};
use super::checksum::ChecksumState;
use super::planner::{MultipartPlan, PartSpec};
use crate::error::{S3Error, S3Result};

/// Largest single read; unknown-size buffers grow by at most this much per read
const READ_CHUNK: u64 = 64 * 1024;

/// Bytes of one part, ready to upload
#[derive(Debug)]
pub struct StagedPart {
    pub spec: PartSpec,
    pub data: Bytes,
    pub is_last: bool,
    _lease: BufferLease,
}

impl StagedPart {
    pub fn part_number(&self) -> u32 {
        self.spec.part_number
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Splits a sequential source into parts according to a plan
pub struct PartReader<R> {
    source: R,
    plan: MultipartPlan,
    pool: BufferPool,
    checksum: Option<ChecksumState>,
    next_part: u32,
    offset: u64,
    carry: Option<u8>,
    done: bool,
}

impl<R> PartReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(source: R, plan: MultipartPlan, pool: BufferPool, checksum: ChecksumState) -> Self {
        Self {
            source,
            plan,
            pool,
            checksum: Some(checksum),
            next_part: 1,
            offset: 0,
            carry: None,
            done: false,
        }
    }

    /// Stage the next part, or None once the source is exhausted
    ///
    /// Waits for a free buffer slot before touching the source.
    pub async fn next_part(&mut self) -> S3Result<Option<StagedPart>> {
        if self.done {
            return Ok(None);
        }

        let result = self.stage().await;
        match &result {
            Ok(Some(part)) if !part.is_last => {}
            _ => self.done = true,
        }
        result
    }

    async fn stage(&mut self) -> S3Result<Option<StagedPart>> {
        let part_number = self.next_part;
        let lease = self.pool.acquire().await?;

        let (data, is_last) = match self.plan.total_size() {
            Some(_) => {
                let Some(spec) = self.plan.part_spec(part_number) else {
                    return Ok(None);
                };
                let data = self.read_known(spec.length).await?;
                let is_last = Some(part_number) == self.plan.part_count();
                (data, is_last)
            }
            None => {
                let (data, is_last) = self.read_unknown(part_number).await?;
                if data.is_empty() && part_number > 1 {
                    return Ok(None);
                }
                (data, is_last)
            }
        };

        let spec = PartSpec {
            part_number,
            offset: self.offset,
            length: data.len() as u64,
        };

        if let Some(checksum) = self.checksum.as_mut() {
            checksum.fold(part_number, &data)?;
        }

        debug!(
            part_number,
            offset = spec.offset,
            length = spec.length,
            is_last,
            "Staged part"
        );

        self.next_part += 1;
        self.offset += spec.length;

        Ok(Some(StagedPart {
            spec,
            data,
            is_last,
            _lease: lease,
        }))
    }

    async fn read_known(&mut self, length: u64) -> S3Result<Bytes> {
        let mut buf = BytesMut::with_capacity(length as usize);
        let read = self.fill(&mut buf, length).await?;
        if read < length {
            return Err(S3Error::SourceRead(format!(
                "Source ended at byte {} but {} bytes were declared",
                self.offset + read,
                self.plan.total_size().unwrap_or_default()
            )));
        }
        Ok(buf.freeze())
    }

    async fn read_unknown(&mut self, part_number: u32) -> S3Result<(Bytes, bool)> {
        let part_size = self.plan.part_size();
        let mut buf = BytesMut::with_capacity(initial_capacity(part_size));
        if let Some(byte) = self.carry.take() {
            buf.put_u8(byte);
        }

        let want = part_size - buf.len() as u64;
        self.fill(&mut buf, want).await?;

        if (buf.len() as u64) < part_size {
            return Ok((buf.freeze(), true));
        }

        // A full part: peek one byte to learn whether anything follows
        let mut peek = [0u8; 1];
        let n = self.source.read(&mut peek).await?;
        if n == 0 {
            return Ok((buf.freeze(), true));
        }

        if part_number >= self.plan.max_parts() {
            return Err(S3Error::ObjectTooLarge {
                size: self.offset + part_size + 1,
                max: part_size.saturating_mul(self.plan.max_parts() as u64),
            });
        }

        self.carry = Some(peek[0]);
        Ok((buf.freeze(), false))
    }

    async fn fill(&mut self, buf: &mut BytesMut, want: u64) -> S3Result<u64> {
        let mut total = 0u64;
        while total < want {
            let chunk = (want - total).min(READ_CHUNK);
            buf.reserve(chunk as usize);
            let n = (&mut self.source).take(chunk).read_buf(buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
        }
        Ok(total)
    }

    /// Number of parts staged so far
    pub fn parts_staged(&self) -> u32 {
        self.next_part - 1
    }

    /// Bytes consumed from the source so far
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Whether the source is exhausted or failed
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Hand the checksum state to the completion step
    pub fn take_checksum(&mut self) -> Option<ChecksumState> {
        self.checksum.take()
    }
}

/// Unknown-size parts start small and grow as the source delivers bytes
fn initial_capacity(part_size: u64) -> usize {
    part_size.min(READ_CHUNK) as usize
}
