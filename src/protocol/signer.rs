//! Request signing capability
//!
//! Credential handling lives outside the engine. A signer sees the request
//! shape and the payload hash and returns the headers to attach.

use std::collections::BTreeMap;

use super::transport::HttpMethod;
use crate::error::S3Result;

/// View of a request handed to a signer
#[derive(Debug, Clone, Copy)]
pub struct SigningRequest<'a> {
    pub method: HttpMethod,
    pub path: &'a str,
    pub query: &'a [(String, String)],
    pub headers: &'a BTreeMap<String, String>,

    /// Hex SHA-256 of the body, or `UNSIGNED-PAYLOAD`
    pub payload_hash: &'a str,
}

/// Produces authentication headers for a request
pub trait RequestSigner: Send + Sync {
    /// Headers to add to the request (names lowercase)
    fn sign(&self, request: &SigningRequest<'_>) -> S3Result<BTreeMap<String, String>>;
}

/// Signer for public buckets and test servers; adds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousSigner;

impl RequestSigner for AnonymousSigner {
    fn sign(&self, _request: &SigningRequest<'_>) -> S3Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}
