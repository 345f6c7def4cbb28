//! Upload session state
//!
//! Tracks one multipart upload from initiation to its terminal state. Only
//! the coordinator mutates a session; workers report results over a channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::checksum::PartChecksum;
use crate::error::{S3Error, S3Result};

/// Lifecycle of a multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Planning,
    InProgress,
    Completing,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, next),
            (Planning, InProgress)
                | (Planning, Failed)
                | (InProgress, Completing)
                | (InProgress, Failed)
                | (Completing, Completed)
                | (Completing, Failed)
                | (Failed, Aborted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one stored part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartResult {
    pub part_number: u32,

    /// ETag without surrounding quotes
    pub etag: String,

    pub checksum: Option<PartChecksum>,

    /// Bytes sent in this part
    pub size: u64,
}

/// One in-flight multipart upload
#[derive(Debug, Clone)]
pub struct UploadSession {
    bucket: String,
    key: String,
    upload_id: Option<String>,
    total_size: Option<u64>,
    part_size: u64,
    parts: BTreeMap<u32, PartResult>,
    state: SessionState,
}

impl UploadSession {
    pub fn new(bucket: &str, key: &str, total_size: Option<u64>, part_size: u64) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: None,
            total_size,
            part_size,
            parts: BTreeMap::new(),
            state: SessionState::Planning,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Server-issued upload ID, set once the upload is initiated
    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn parts(&self) -> &BTreeMap<u32, PartResult> {
        &self.parts
    }

    /// Move to a new state, rejecting illegal transitions
    pub fn transition(&mut self, next: SessionState) -> S3Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(S3Error::Internal(format!(
                "Illegal session transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Attach the upload ID returned by initiate and start transferring
    pub fn start(&mut self, upload_id: String) -> S3Result<()> {
        self.transition(SessionState::InProgress)?;
        self.upload_id = Some(upload_id);
        Ok(())
    }

    /// Record a stored part; each part number may be recorded once
    pub fn record_part(&mut self, result: PartResult) -> S3Result<()> {
        if self.state != SessionState::InProgress {
            return Err(S3Error::Internal(format!(
                "Part {} recorded in state {}",
                result.part_number, self.state
            )));
        }
        if result.part_number == 0 {
            return Err(S3Error::Internal("Part numbers start at 1".to_string()));
        }
        if self.parts.contains_key(&result.part_number) {
            return Err(S3Error::Internal(format!(
                "Part {} recorded twice",
                result.part_number
            )));
        }
        self.parts.insert(result.part_number, result);
        Ok(())
    }

    /// Part numbers in `1..=expected` without a result
    pub fn missing_parts(&self, expected: u32) -> Vec<u32> {
        (1..=expected)
            .filter(|n| !self.parts.contains_key(n))
            .collect()
    }

    /// Bytes acknowledged by the server so far
    pub fn bytes_uploaded(&self) -> u64 {
        self.parts.values().map(|p| p.size).sum()
    }
}
