/*!
 * Integrity checksums for parts and whole objects
 *
 * Per-part digests are computed independently so workers can hash in
 * parallel. The object-level value depends on the algorithm: composite
 * algorithms hash the ordered list of raw part digests, full-object
 * algorithms stream every byte of the object in ascending part order.
 */

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use crc_fast::{CrcAlgorithm, Digest as CrcDigest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{S3Error, S3Result};

/// Payload hash value used when the body is not hashed for signing
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Content hash algorithm selectable per upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// No object checksum
    #[default]
    None,
    Md5,
    Crc32,
    Crc32c,
    Crc64Nvme,
    Sha256,
}

/// How the object-level checksum relates to the part checksums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumMode {
    /// Hash of the concatenated part digests, suffixed with the part count
    Composite,
    /// Digest of the full object bytes
    FullObject,
}

impl ChecksumMode {
    /// Value of the `x-amz-checksum-type` header
    pub fn amz_name(&self) -> &'static str {
        match self {
            ChecksumMode::Composite => "COMPOSITE",
            ChecksumMode::FullObject => "FULL_OBJECT",
        }
    }
}

impl ChecksumAlgorithm {
    /// Request header carrying a digest of the request body
    pub fn header_name(&self) -> Option<&'static str> {
        match self {
            ChecksumAlgorithm::None => None,
            ChecksumAlgorithm::Md5 => Some("content-md5"),
            ChecksumAlgorithm::Crc32 => Some("x-amz-checksum-crc32"),
            ChecksumAlgorithm::Crc32c => Some("x-amz-checksum-crc32c"),
            ChecksumAlgorithm::Crc64Nvme => Some("x-amz-checksum-crc64nvme"),
            ChecksumAlgorithm::Sha256 => Some("x-amz-checksum-sha256"),
        }
    }

    /// Name used in `x-amz-checksum-algorithm`; MD5 travels as Content-MD5 instead
    pub fn amz_name(&self) -> Option<&'static str> {
        match self {
            ChecksumAlgorithm::Crc32 => Some("CRC32"),
            ChecksumAlgorithm::Crc32c => Some("CRC32C"),
            ChecksumAlgorithm::Crc64Nvme => Some("CRC64NVME"),
            ChecksumAlgorithm::Sha256 => Some("SHA256"),
            ChecksumAlgorithm::None | ChecksumAlgorithm::Md5 => None,
        }
    }

    /// Element name in CompleteMultipartUpload request and response bodies
    pub fn xml_element(&self) -> Option<&'static str> {
        match self {
            ChecksumAlgorithm::Crc32 => Some("ChecksumCRC32"),
            ChecksumAlgorithm::Crc32c => Some("ChecksumCRC32C"),
            ChecksumAlgorithm::Crc64Nvme => Some("ChecksumCRC64NVME"),
            ChecksumAlgorithm::Sha256 => Some("ChecksumSHA256"),
            ChecksumAlgorithm::None | ChecksumAlgorithm::Md5 => None,
        }
    }

    /// Mode used when the caller does not pick one
    pub fn default_mode(&self) -> Option<ChecksumMode> {
        match self {
            ChecksumAlgorithm::None => None,
            ChecksumAlgorithm::Crc64Nvme => Some(ChecksumMode::FullObject),
            _ => Some(ChecksumMode::Composite),
        }
    }

    /// Composition lookup table
    pub fn supports(&self, mode: ChecksumMode) -> bool {
        match (self, mode) {
            (ChecksumAlgorithm::None, _) => false,
            (ChecksumAlgorithm::Md5 | ChecksumAlgorithm::Sha256, ChecksumMode::Composite) => true,
            (ChecksumAlgorithm::Md5 | ChecksumAlgorithm::Sha256, ChecksumMode::FullObject) => {
                false
            }
            (ChecksumAlgorithm::Crc32 | ChecksumAlgorithm::Crc32c, _) => true,
            (ChecksumAlgorithm::Crc64Nvme, ChecksumMode::FullObject) => true,
            (ChecksumAlgorithm::Crc64Nvme, ChecksumMode::Composite) => false,
        }
    }

    /// Fresh streaming hasher, or None when no checksum was requested
    pub fn hasher(&self) -> Option<Hasher> {
        let inner = match self {
            ChecksumAlgorithm::None => return None,
            ChecksumAlgorithm::Md5 => HasherInner::Md5(md5::Context::new()),
            ChecksumAlgorithm::Crc32 => {
                HasherInner::Crc(CrcDigest::new(CrcAlgorithm::Crc32IsoHdlc), 4)
            }
            ChecksumAlgorithm::Crc32c => {
                HasherInner::Crc(CrcDigest::new(CrcAlgorithm::Crc32Iscsi), 4)
            }
            ChecksumAlgorithm::Crc64Nvme => {
                HasherInner::Crc(CrcDigest::new(CrcAlgorithm::Crc64Nvme), 8)
            }
            ChecksumAlgorithm::Sha256 => HasherInner::Sha256(Sha256::new()),
        };
        Some(Hasher { inner })
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumAlgorithm::None => "none",
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Crc32 => "crc32",
            ChecksumAlgorithm::Crc32c => "crc32c",
            ChecksumAlgorithm::Crc64Nvme => "crc64nvme",
            ChecksumAlgorithm::Sha256 => "sha256",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = S3Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(ChecksumAlgorithm::None),
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "crc32" => Ok(ChecksumAlgorithm::Crc32),
            "crc32c" => Ok(ChecksumAlgorithm::Crc32c),
            "crc64nvme" => Ok(ChecksumAlgorithm::Crc64Nvme),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(S3Error::InvalidConfig(format!(
                "Unknown checksum algorithm: {}",
                other
            ))),
        }
    }
}

/// Streaming hasher for one of the supported algorithms
pub struct Hasher {
    inner: HasherInner,
}

enum HasherInner {
    Md5(md5::Context),
    Crc(CrcDigest, usize),
    Sha256(Sha256),
}

impl Hasher {
    /// Update the hash with new data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HasherInner::Md5(ctx) => ctx.consume(data),
            HasherInner::Crc(digest, _) => digest.update(data),
            HasherInner::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Finalize and return the raw digest bytes (CRCs big-endian)
    pub fn finalize(self) -> Vec<u8> {
        match self.inner {
            HasherInner::Md5(ctx) => ctx.compute().0.to_vec(),
            HasherInner::Crc(digest, width) => {
                let value = digest.finalize().to_be_bytes();
                value[value.len() - width..].to_vec()
            }
            HasherInner::Sha256(hasher) => hasher.finalize().to_vec(),
        }
    }
}

/// Digest of one part's bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartChecksum {
    pub algorithm: ChecksumAlgorithm,
    pub raw: Vec<u8>,
}

impl PartChecksum {
    /// Hash one part; None when no algorithm is selected
    pub fn compute(algorithm: ChecksumAlgorithm, data: &[u8]) -> Option<Self> {
        let mut hasher = algorithm.hasher()?;
        hasher.update(data);
        Some(Self {
            algorithm,
            raw: hasher.finalize(),
        })
    }

    /// Base64 form used in headers and XML
    pub fn encoded(&self) -> String {
        STANDARD.encode(&self.raw)
    }
}

/// Object-level checksum returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectChecksum {
    pub algorithm: ChecksumAlgorithm,
    pub mode: ChecksumMode,
    /// Base64 value; composite values carry a `-<parts>` suffix
    pub value: String,
}

impl ObjectChecksum {
    /// Checksum of a body sent in one request
    pub fn of_body(algorithm: ChecksumAlgorithm, data: &[u8]) -> Option<Self> {
        let part = PartChecksum::compute(algorithm, data)?;
        Some(Self {
            algorithm,
            mode: ChecksumMode::FullObject,
            value: part.encoded(),
        })
    }
}

/// Checksum bookkeeping for one upload session
pub struct ChecksumState {
    algorithm: ChecksumAlgorithm,
    mode: Option<ChecksumMode>,
    running: Option<Hasher>,
    next_fold: u32,
    parts: BTreeMap<u32, PartChecksum>,
}

impl ChecksumState {
    /// Create the state, validating the requested mode against the lookup table
    pub fn new(algorithm: ChecksumAlgorithm, mode: Option<ChecksumMode>) -> S3Result<Self> {
        let mode = match (algorithm, mode) {
            (ChecksumAlgorithm::None, _) => None,
            (_, None) => algorithm.default_mode(),
            (_, Some(requested)) if algorithm.supports(requested) => Some(requested),
            (_, Some(requested)) => {
                return Err(S3Error::InvalidConfig(format!(
                    "Checksum algorithm {} does not support {} checksums",
                    algorithm,
                    requested.amz_name()
                )))
            }
        };

        let running = match mode {
            Some(ChecksumMode::FullObject) => algorithm.hasher(),
            _ => None,
        };

        Ok(Self {
            algorithm,
            mode,
            running,
            next_fold: 1,
            parts: BTreeMap::new(),
        })
    }

    /// Selected algorithm
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Effective mode, None when no checksum was requested
    pub fn mode(&self) -> Option<ChecksumMode> {
        self.mode
    }

    /// Feed a part into the full-object digest; parts must arrive in ascending order
    pub fn fold(&mut self, part_number: u32, data: &[u8]) -> S3Result<()> {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };
        if part_number != self.next_fold {
            return Err(S3Error::Internal(format!(
                "Checksum fold out of order: got part {}, expected {}",
                part_number, self.next_fold
            )));
        }
        running.update(data);
        self.next_fold += 1;
        Ok(())
    }

    /// Remember a part digest for composite composition
    pub fn record(&mut self, part_number: u32, checksum: PartChecksum) {
        if self.mode == Some(ChecksumMode::Composite) {
            self.parts.insert(part_number, checksum);
        }
    }

    /// Hash a part, fold it and record it in one step
    pub fn update(&mut self, part_number: u32, data: &[u8]) -> S3Result<Option<PartChecksum>> {
        self.fold(part_number, data)?;
        let checksum = PartChecksum::compute(self.algorithm, data);
        if let Some(checksum) = &checksum {
            self.record(part_number, checksum.clone());
        }
        Ok(checksum)
    }

    /// Compose the object checksum from `part_count` parts
    pub fn finalize(self, part_count: u32) -> S3Result<Option<ObjectChecksum>> {
        match self.mode {
            None => Ok(None),
            Some(ChecksumMode::FullObject) => {
                if self.next_fold != part_count + 1 {
                    return Err(S3Error::Internal(format!(
                        "Full-object checksum covers {} parts, expected {}",
                        self.next_fold - 1,
                        part_count
                    )));
                }
                let raw = self.running.map(Hasher::finalize).unwrap_or_default();
                Ok(Some(ObjectChecksum {
                    algorithm: self.algorithm,
                    mode: ChecksumMode::FullObject,
                    value: STANDARD.encode(raw),
                }))
            }
            Some(ChecksumMode::Composite) => {
                let Some(mut hasher) = self.algorithm.hasher() else {
                    return Ok(None);
                };
                for part_number in 1..=part_count {
                    let part = self.parts.get(&part_number).ok_or_else(|| {
                        S3Error::Internal(format!(
                            "Composite checksum missing part {}",
                            part_number
                        ))
                    })?;
                    hasher.update(&part.raw);
                }
                Ok(Some(ObjectChecksum {
                    algorithm: self.algorithm,
                    mode: ChecksumMode::Composite,
                    value: format!("{}-{}", STANDARD.encode(hasher.finalize()), part_count),
                }))
            }
        }
    }
}

/// Hex SHA-256 of a body for the signer, or the unsigned-payload marker
pub fn payload_hash(data: &[u8], disable_content_hash: bool) -> String {
    if disable_content_hash {
        return UNSIGNED_PAYLOAD.to_string();
    }
    hex::encode(Sha256::digest(data))
}

/// Base64 MD5 of a body for the Content-MD5 header
pub fn content_md5(data: &[u8]) -> String {
    STANDARD.encode(md5::compute(data).0)
}
