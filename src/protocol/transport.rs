//! Transport abstraction for prepared S3 requests
//!
//! The engine builds fully-formed requests and hands them to a [`Transport`].
//! Cancellation is cooperative: callers race the returned future against a
//! cancellation token and drop it when the token fires.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::S3Result;

/// HTTP methods used by the upload protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request ready to be signed and sent
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub bucket: String,
    pub key: String,

    /// Query parameters in insertion order; flags such as `uploads` carry an empty value
    pub query: Vec<(String, String)>,

    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,

    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, bucket: &str, key: &str) -> Self {
        Self {
            method,
            bucket: bucket.to_string(),
            key: key.to_string(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Path-style resource path, `/{bucket}/{key}`
    pub fn path(&self) -> String {
        format!("/{}/{}", self.bucket, self.key)
    }

    /// Look up a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response returned by a transport
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,

    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,

    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends prepared requests to an S3-compatible endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one request
    ///
    /// Any HTTP status is a successful send; only connection-level failures
    /// are errors, reported as `Network` or `Timeout`.
    async fn send(&self, request: HttpRequest) -> S3Result<HttpResponse>;
}
