//! reqwest-backed transport
//!
//! Sends path-style requests (`{endpoint}/{bucket}/{key}`) which every
//! S3-compatible server understands.

use async_trait::async_trait;
use std::fmt::Write as FmtWrite;
use std::time::Duration;

use super::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::config::ClientConfig;
use crate::error::{S3Error, S3Result};

static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// HTTP transport built on a shared reqwest connection pool
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport for the configured endpoint
    pub fn new(config: &ClientConfig) -> S3Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent())
            .build()
            .map_err(|e| S3Error::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, request: &HttpRequest) -> String {
        let mut url = String::with_capacity(self.endpoint.len() + request.key.len() + 64);
        url.push_str(&self.endpoint);
        url.push('/');
        uri_encode_into(&mut url, &request.bucket, true);
        url.push('/');
        uri_encode_into(&mut url, &request.key, false);

        for (i, (name, value)) in request.query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            uri_encode_into(&mut url, name, true);
            if !value.is_empty() {
                url.push('=');
                uri_encode_into(&mut url, value, true);
            }
        }
        url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> S3Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, self.url(&request));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> S3Error {
    if err.is_timeout() {
        S3Error::Timeout(err.to_string())
    } else {
        S3Error::Network(err.to_string())
    }
}

/// Percent-encode per the S3 URI rules; `/` is kept in keys
fn uri_encode_into(buf: &mut String, s: &str, encode_slash: bool) {
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                buf.push(byte as char)
            }
            b'/' if !encode_slash => buf.push('/'),
            _ => {
                let _ = write!(
                    buf,
                    "%{}{}",
                    HEX_UPPER[(byte >> 4) as usize] as char,
                    HEX_UPPER[(byte & 0xf) as usize] as char
                );
            }
        }
    }
}
