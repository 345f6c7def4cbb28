//! S3 client and the single-request protocol calls
//!
//! Each call here makes exactly one request. Retry, cancellation and
//! session bookkeeping are layered on top by the upload coordinator.

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ClientConfig;
use crate::core::checksum::{self, ChecksumMode, ObjectChecksum, PartChecksum};
use crate::core::retry::RetryPolicy;
use crate::error::{S3Error, S3Result};
use crate::protocol::signer::{RequestSigner, SigningRequest};
use crate::protocol::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::protocol::xml::{self, CompleteResult, CompletedPart};
use crate::types::{ObjectDescriptor, PutObjectOptions};
use crate::upload::coordinator;

/// Response of a direct PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub etag: String,
    pub version_id: Option<String>,

    /// Checksum echoed by the server, if any
    pub checksum: Option<String>,
}

/// Client for an S3-compatible endpoint
#[derive(Clone)]
pub struct S3Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn RequestSigner>,
    retry: RetryPolicy,
}

impl S3Client {
    /// Create a client over the given transport and signer
    ///
    /// # Example
    ///
    /// ```no_run
    /// use s3stream::{AnonymousSigner, ClientConfig, S3Client};
    /// use s3stream::protocol::Transport;
    /// use std::sync::Arc;
    ///
    /// fn build(transport: Arc<dyn Transport>) -> s3stream::S3Result<S3Client> {
    ///     let config = ClientConfig::new("http://localhost:9000".to_string());
    ///     S3Client::new(config, transport, Arc::new(AnonymousSigner))
    /// }
    /// ```
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn RequestSigner>,
    ) -> S3Result<Self> {
        config.validate()?;
        let retry = config.retry.to_policy();

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                signer,
                retry,
            }),
        })
    }

    /// Create a client using the built-in reqwest transport
    #[cfg(feature = "http-transport")]
    pub fn with_http(config: ClientConfig, signer: Arc<dyn RequestSigner>) -> S3Result<Self> {
        let transport = crate::protocol::http::HttpTransport::new(&config)?;
        Self::new(config, Arc::new(transport), signer)
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Retry policy applied to idempotent requests
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Upload an object from a sequential source
    ///
    /// `size` is the declared length, or None to upload until the source is
    /// exhausted. Small known sizes use one PUT; everything else goes through
    /// a multipart upload with bounded concurrency. Cancelling `cancel` stops
    /// dispatching parts and aborts the upload.
    pub async fn put_object<R>(
        &self,
        bucket: &str,
        key: &str,
        source: R,
        size: Option<u64>,
        options: PutObjectOptions,
        cancel: CancellationToken,
    ) -> S3Result<ObjectDescriptor>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        coordinator::put_object(self, bucket, key, source, size, options, cancel).await
    }

    /// Sign and send one request; non-2xx answers become service errors
    async fn execute(
        &self,
        mut request: HttpRequest,
        disable_content_hash: bool,
    ) -> S3Result<HttpResponse> {
        let payload_hash = checksum::payload_hash(&request.body, disable_content_hash);
        request
            .headers
            .insert("x-amz-content-sha256".to_string(), payload_hash.clone());

        let path = request.path();
        let signed = self.inner.signer.sign(&SigningRequest {
            method: request.method,
            path: &path,
            query: &request.query,
            headers: &request.headers,
            payload_hash: &payload_hash,
        })?;
        request
            .headers
            .extend(signed.into_iter().map(|(k, v)| (k.to_ascii_lowercase(), v)));

        let method = request.method;
        let response = self.inner.transport.send(request).await?;
        debug!(method = %method, path = %path, status = response.status, "S3 request");

        if !response.is_success() {
            return Err(xml::error_from_response(response.status, &response.body));
        }
        Ok(response)
    }

    /// `POST /{bucket}/{key}?uploads`, returns the upload ID
    pub async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
        options: &PutObjectOptions,
        checksum_mode: Option<ChecksumMode>,
    ) -> S3Result<String> {
        let mut request = HttpRequest::new(HttpMethod::Post, bucket, key).query("uploads", "");
        request = with_object_headers(request, options);

        if let (Some(name), Some(mode)) = (options.checksum_algorithm.amz_name(), checksum_mode) {
            request = request
                .header("x-amz-checksum-algorithm", name)
                .header("x-amz-checksum-type", mode.amz_name());
        }

        let response = self.execute(request, false).await?;
        let result = xml::parse_initiate(&response.body)?;
        Ok(result.upload_id)
    }

    /// `PUT /{bucket}/{key}?partNumber={n}&uploadId={id}`, returns the part ETag
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        part_checksum: Option<&PartChecksum>,
        options: &PutObjectOptions,
    ) -> S3Result<String> {
        let mut request = HttpRequest::new(HttpMethod::Put, bucket, key)
            .query("partNumber", part_number.to_string())
            .query("uploadId", upload_id);
        request = with_body_checksums(request, &body, part_checksum, options);

        let response = self.execute(request.body(body), options.disable_content_hash).await?;
        response
            .header("etag")
            .map(xml::normalize_etag)
            .filter(|etag| !etag.is_empty())
            .ok_or_else(|| {
                S3Error::InvalidResponse(format!("Missing ETag for part {}", part_number))
            })
    }

    /// `POST /{bucket}/{key}?uploadId={id}` with the XML manifest
    pub async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        manifest: &[CompletedPart],
        object_checksum: Option<&ObjectChecksum>,
    ) -> S3Result<CompleteResult> {
        let body = Bytes::from(xml::build_complete_request(manifest));
        let mut request = HttpRequest::new(HttpMethod::Post, bucket, key)
            .query("uploadId", upload_id)
            .header("content-type", "application/xml");

        if let Some(checksum) = object_checksum.filter(|c| c.mode == ChecksumMode::FullObject) {
            if let Some(name) = checksum.algorithm.header_name() {
                request = request
                    .header(name, checksum.value.clone())
                    .header("x-amz-checksum-type", ChecksumMode::FullObject.amz_name());
            }
        }

        let response = self.execute(request.body(body), false).await?;
        let mut result = xml::parse_complete(&response.body)?;
        result.version_id = response.header("x-amz-version-id").map(str::to_string);
        Ok(result)
    }

    /// `DELETE /{bucket}/{key}?uploadId={id}`
    ///
    /// An upload that no longer exists counts as aborted.
    pub async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> S3Result<()> {
        let request = HttpRequest::new(HttpMethod::Delete, bucket, key).query("uploadId", upload_id);
        match self.execute(request, false).await {
            Ok(_) => Ok(()),
            Err(S3Error::Service { code, .. }) if code == "NoSuchUpload" => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// `PUT /{bucket}/{key}` with the whole body
    pub async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &PutObjectOptions,
    ) -> S3Result<PutResult> {
        let object_checksum = PartChecksum::compute(options.checksum_algorithm, &body);
        let mut request = HttpRequest::new(HttpMethod::Put, bucket, key);
        request = with_object_headers(request, options);
        request = with_body_checksums(request, &body, object_checksum.as_ref(), options);

        let response = self.execute(request.body(body), options.disable_content_hash).await?;

        let etag = response
            .header("etag")
            .map(xml::normalize_etag)
            .ok_or_else(|| S3Error::InvalidResponse("Missing ETag in PUT response".to_string()))?;
        let checksum = options
            .checksum_algorithm
            .header_name()
            .filter(|name| name.starts_with("x-amz-checksum-"))
            .and_then(|name| response.header(name))
            .map(str::to_string);

        Ok(PutResult {
            etag,
            version_id: response.header("x-amz-version-id").map(str::to_string),
            checksum,
        })
    }
}

/// Content type and user metadata, sent on initiate and direct PUT
fn with_object_headers(mut request: HttpRequest, options: &PutObjectOptions) -> HttpRequest {
    if let Some(content_type) = &options.content_type {
        request = request.header("content-type", content_type.clone());
    }
    for (name, value) in &options.user_metadata {
        request = request.header(&format!("x-amz-meta-{}", name), value.clone());
    }
    request
}

/// Checksum header for a body, plus Content-MD5 when requested
fn with_body_checksums(
    mut request: HttpRequest,
    body: &Bytes,
    checksum: Option<&PartChecksum>,
    options: &PutObjectOptions,
) -> HttpRequest {
    if let Some(checksum) = checksum {
        if let Some(name) = checksum.algorithm.header_name() {
            request = request.header(name, checksum.encoded());
        }
    }
    if options.send_content_md5 && !request.headers.contains_key("content-md5") {
        request = request.header("content-md5", checksum::content_md5(body));
    }
    request
}
