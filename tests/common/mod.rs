//! In-memory S3 endpoint for integration tests
//!
//! Answers the multipart protocol from memory, records every request and
//! lets a test script failures, delays and odd responses per call.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use s3stream::{
    AnonymousSigner, ClientConfig, HttpMethod, HttpRequest, HttpResponse, ProtocolLimits,
    RetrySettings, S3Client, S3Result, Transport,
};

/// Part size used throughout the tests
pub const PART: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    PutObject,
    Initiate,
    UploadPart(u32),
    Complete,
    Abort,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    remaining: u32,
    status: u16,
    code: &'static str,
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    next_upload: u32,
    parts: BTreeMap<u32, Bytes>,
    part_failures: HashMap<u32, Failure>,
    part_delays: HashMap<u32, Duration>,
    default_part_delay: Option<Duration>,
    complete_error_bodies: u32,
    complete_echo: Option<(String, String)>,
    abort_failure: Option<(u16, &'static str)>,
    abort_hangs: bool,
}

#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail part `part_number` `times` times with the given status and code
    pub fn fail_part(&self, part_number: u32, times: u32, status: u16, code: &'static str) {
        self.state.lock().unwrap().part_failures.insert(
            part_number,
            Failure {
                remaining: times,
                status,
                code,
            },
        );
    }

    pub fn delay_part(&self, part_number: u32, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .part_delays
            .insert(part_number, delay);
    }

    pub fn delay_all_parts(&self, delay: Duration) {
        self.state.lock().unwrap().default_part_delay = Some(delay);
    }

    /// Answer the next `times` completions with 200 and an `<Error>` body
    pub fn complete_with_error_body(&self, times: u32) {
        self.state.lock().unwrap().complete_error_bodies = times;
    }

    /// Echo a checksum element in the completion result
    pub fn echo_complete_checksum(&self, element: &str, value: &str) {
        self.state.lock().unwrap().complete_echo = Some((element.to_string(), value.to_string()));
    }

    pub fn fail_abort(&self, status: u16, code: &'static str) {
        self.state.lock().unwrap().abort_failure = Some((status, code));
    }

    /// Never answer the abort request
    pub fn hang_abort(&self) {
        self.state.lock().unwrap().abort_hangs = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn kinds(&self) -> Vec<CallKind> {
        self.calls().into_iter().map(|c| c.kind).collect()
    }

    pub fn count(&self, matches: impl Fn(&CallKind) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(&c.kind)).count()
    }

    /// Bodies of stored parts, keyed by part number
    pub fn stored_parts(&self) -> BTreeMap<u32, Bytes> {
        self.state.lock().unwrap().parts.clone()
    }

    /// Concatenation of stored parts in part-number order
    pub fn assembled(&self) -> Vec<u8> {
        self.stored_parts()
            .values()
            .flat_map(|b| b.iter().copied())
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Last completion request
    pub fn last_complete(&self) -> Option<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind == CallKind::Complete)
            .next_back()
    }

    /// Part numbers listed in the last completion manifest, in document order
    pub fn manifest(&self) -> Vec<u32> {
        let Some(call) = self.last_complete() else {
            return Vec::new();
        };
        let body = String::from_utf8_lossy(&call.body).into_owned();
        body.split("<PartNumber>")
            .skip(1)
            .filter_map(|chunk| chunk.split("</PartNumber>").next())
            .filter_map(|n| n.parse().ok())
            .collect()
    }

    async fn upload_part(&self, part_number: u32, body: Bytes) -> HttpResponse {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let (delay, failure) = {
            let mut state = self.state.lock().unwrap();
            let delay = state
                .part_delays
                .get(&part_number)
                .copied()
                .or(state.default_part_delay);
            let failure = match state.part_failures.get_mut(&part_number) {
                Some(f) if f.remaining > 0 => {
                    f.remaining -= 1;
                    Some(*f)
                }
                _ => None,
            };
            (delay, failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = failure {
            return error_response(failure.status, failure.code);
        }

        let etag = format!("\"{:x}\"", md5::compute(&body));
        self.state.lock().unwrap().parts.insert(part_number, body);
        HttpResponse::new(200).with_header("etag", etag)
    }

    fn complete(&self) -> HttpResponse {
        let mut state = self.state.lock().unwrap();
        if state.complete_error_bodies > 0 {
            state.complete_error_bodies -= 1;
            let body = "<Error><Code>InternalError</Code>\
                        <Message>We encountered an internal error.</Message></Error>";
            return HttpResponse::new(200).with_body(body);
        }

        let mut body = format!(
            "<CompleteMultipartUploadResult><Location>http://mock/bucket/key</Location>\
             <Bucket>bucket</Bucket><Key>key</Key><ETag>\"multipart-{}\"</ETag>",
            state.parts.len()
        );
        if let Some((element, value)) = &state.complete_echo {
            body.push_str(&format!("<{0}>{1}</{0}>", element, value));
        }
        body.push_str("</CompleteMultipartUploadResult>");
        HttpResponse::new(200)
            .with_header("x-amz-version-id", "v1")
            .with_body(body)
    }
}

fn error_response(status: u16, code: &str) -> HttpResponse {
    HttpResponse::new(status).with_body(format!(
        "<Error><Code>{}</Code><Message>scripted failure</Message></Error>",
        code
    ))
}

fn classify(request: &HttpRequest) -> CallKind {
    match request.method {
        HttpMethod::Post if request.query_param("uploads").is_some() => CallKind::Initiate,
        HttpMethod::Post => CallKind::Complete,
        HttpMethod::Put => match request.query_param("partNumber") {
            Some(n) => CallKind::UploadPart(n.parse().unwrap()),
            None => CallKind::PutObject,
        },
        HttpMethod::Delete => CallKind::Abort,
        HttpMethod::Get => panic!("unexpected GET {}", request.path()),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> S3Result<HttpResponse> {
        let kind = classify(&request);
        self.state.lock().unwrap().calls.push(Call {
            kind,
            headers: request.headers.clone(),
            body: request.body.clone(),
        });

        let response = match kind {
            CallKind::PutObject => {
                let etag = format!("\"{:x}\"", md5::compute(&request.body));
                HttpResponse::new(200).with_header("etag", etag)
            }
            CallKind::Initiate => {
                let upload_id = {
                    let mut state = self.state.lock().unwrap();
                    state.next_upload += 1;
                    format!("upload-{}", state.next_upload)
                };
                HttpResponse::new(200).with_body(format!(
                    "<InitiateMultipartUploadResult><Bucket>{}</Bucket><Key>{}</Key>\
                     <UploadId>{}</UploadId></InitiateMultipartUploadResult>",
                    request.bucket, request.key, upload_id
                ))
            }
            CallKind::UploadPart(n) => self.upload_part(n, request.body).await,
            CallKind::Complete => self.complete(),
            CallKind::Abort => {
                let (failure, hangs) = {
                    let state = self.state.lock().unwrap();
                    (state.abort_failure, state.abort_hangs)
                };
                if hangs {
                    std::future::pending::<()>().await;
                }
                match failure {
                    Some((status, code)) => error_response(status, code),
                    None => HttpResponse::new(204),
                }
            }
        };
        Ok(response)
    }
}

/// Limits scaled down so tests move kilobytes instead of megabytes
pub fn test_limits() -> ProtocolLimits {
    ProtocolLimits {
        min_part_size: PART,
        max_part_size: 64 * PART,
        max_parts: 10_000,
        max_object_size: 10_000 * 64 * PART,
        single_put_threshold: PART,
        part_size_granularity: PART,
    }
}

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("http://mock".to_string());
    config.limits = test_limits();
    config.retry = RetrySettings {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        jitter_factor: 0.0,
    };
    config.abort_timeout_secs = 5;
    config
}

pub fn client(mock: &Arc<MockTransport>) -> S3Client {
    client_with_config(mock, test_config())
}

pub fn client_with_config(mock: &Arc<MockTransport>, config: ClientConfig) -> S3Client {
    S3Client::new(config, mock.clone(), Arc::new(AnonymousSigner)).unwrap()
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
