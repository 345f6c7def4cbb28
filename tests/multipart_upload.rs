mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use common::{client, client_with_config, payload, test_config, CallKind, MockTransport, PART};
use s3stream::core::checksum::PartChecksum;
use s3stream::{
    ChecksumAlgorithm, ChecksumMode, ObjectChecksum, ObjectDescriptor, ProgressSink,
    PutObjectOptions, S3Error, S3Result,
};

async fn upload(
    mock: &Arc<MockTransport>,
    data: Vec<u8>,
    size: Option<u64>,
    options: PutObjectOptions,
) -> S3Result<ObjectDescriptor> {
    client(mock)
        .put_object(
            "bucket",
            "key",
            Cursor::new(data),
            size,
            options,
            CancellationToken::new(),
        )
        .await
}

fn part_options() -> PutObjectOptions {
    PutObjectOptions::default().with_part_size(PART)
}

#[tokio::test]
async fn test_empty_object_uses_single_put() {
    let mock = MockTransport::new();

    let descriptor = upload(&mock, Vec::new(), Some(0), PutObjectOptions::default())
        .await
        .unwrap();

    assert_eq!(mock.kinds(), vec![CallKind::PutObject]);
    assert_eq!(descriptor.etag, "d41d8cd98f00b204e9800998ecf8427e");
    assert_eq!(descriptor.size, 0);
    assert!(!descriptor.is_multipart());
}

#[tokio::test]
async fn test_two_full_parts() {
    let mock = MockTransport::new();
    let data = payload(2 * PART as usize);

    let descriptor = upload(
        &mock,
        data.clone(),
        Some(2 * PART),
        part_options().with_concurrency(3),
    )
    .await
    .unwrap();

    assert_eq!(mock.count(|k| *k == CallKind::Initiate), 1);
    assert_eq!(mock.count(|k| matches!(k, CallKind::UploadPart(_))), 2);
    assert_eq!(mock.count(|k| *k == CallKind::Complete), 1);
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 0);
    assert_eq!(mock.manifest(), vec![1, 2]);
    assert_eq!(mock.assembled(), data);

    assert_eq!(descriptor.upload_id.as_deref(), Some("upload-1"));
    assert_eq!(descriptor.parts, 2);
    assert_eq!(descriptor.size, 2 * PART);
    assert_eq!(descriptor.etag, "multipart-2");
    assert_eq!(descriptor.version_id.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_unknown_size_one_byte_over_a_part() {
    let mock = MockTransport::new();
    let data = payload(PART as usize + 1);

    let descriptor = upload(&mock, data.clone(), None, part_options()).await.unwrap();

    let parts = mock.stored_parts();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[&1].len() as u64, PART);
    assert_eq!(parts[&2].len(), 1);
    assert_eq!(mock.manifest(), vec![1, 2]);
    assert_eq!(mock.assembled(), data);
    assert_eq!(descriptor.size, PART + 1);
}

#[tokio::test]
async fn test_unknown_size_small_source_uses_single_put() {
    let mock = MockTransport::new();

    let descriptor = upload(&mock, payload(100), None, part_options()).await.unwrap();

    assert_eq!(mock.kinds(), vec![CallKind::PutObject]);
    assert_eq!(descriptor.size, 100);
    assert!(descriptor.upload_id.is_none());
}

#[tokio::test]
async fn test_unknown_size_empty_source() {
    let mock = MockTransport::new();

    let descriptor = upload(&mock, Vec::new(), None, part_options()).await.unwrap();

    assert_eq!(mock.kinds(), vec![CallKind::PutObject]);
    assert_eq!(descriptor.size, 0);
}

#[tokio::test]
async fn test_part_failure_aborts_upload() {
    let mock = MockTransport::new();
    mock.fail_part(2, 10, 500, "InternalError");

    let err = upload(
        &mock,
        payload(3 * PART as usize),
        Some(3 * PART),
        part_options().with_concurrency(1),
    )
    .await
    .unwrap_err();

    match err {
        S3Error::PartUploadFailed {
            part_number,
            attempts,
            source,
        } => {
            assert_eq!(part_number, 2);
            assert_eq!(attempts, 3);
            assert!(matches!(*source, S3Error::Service { status: 500, .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(mock.count(|k| *k == CallKind::UploadPart(2)), 3);
    assert_eq!(mock.count(|k| *k == CallKind::UploadPart(3)), 0);
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 1);
    assert_eq!(mock.count(|k| *k == CallKind::Complete), 0);
}

#[tokio::test]
async fn test_failed_abort_reports_both_errors() {
    let mock = MockTransport::new();
    mock.fail_part(2, 10, 500, "InternalError");
    mock.fail_abort(403, "AccessDenied");

    let err = upload(
        &mock,
        payload(3 * PART as usize),
        Some(3 * PART),
        part_options().with_concurrency(1),
    )
    .await
    .unwrap_err();

    match err {
        S3Error::AbortFailed {
            upload_id,
            cause,
            abort_error,
        } => {
            assert_eq!(upload_id, "upload-1");
            assert!(matches!(*cause, S3Error::PartUploadFailed { part_number: 2, .. }));
            assert!(matches!(*abort_error, S3Error::Service { status: 403, .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 1);
}

#[tokio::test]
async fn test_failed_upload_left_in_place_when_asked() {
    let mock = MockTransport::new();
    mock.fail_part(1, 10, 403, "AccessDenied");

    let mut options = part_options().with_concurrency(1);
    options.abort_on_failure = false;

    let err = upload(&mock, payload(2 * PART as usize), Some(2 * PART), options)
        .await
        .unwrap_err();

    // Permanent errors are not retried
    assert!(matches!(
        err,
        S3Error::PartUploadFailed {
            part_number: 1,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 0);
}

#[tokio::test]
async fn test_transient_part_failure_is_retried() {
    let mock = MockTransport::new();
    mock.fail_part(2, 1, 503, "SlowDown");
    let data = payload(3 * PART as usize);

    upload(&mock, data.clone(), Some(3 * PART), part_options())
        .await
        .unwrap();

    assert_eq!(mock.count(|k| *k == CallKind::UploadPart(2)), 2);
    assert_eq!(mock.assembled(), data);
}

#[tokio::test]
async fn test_part_size_below_minimum_fails_before_any_request() {
    let mock = MockTransport::new();

    let err = upload(
        &mock,
        payload(10 * PART as usize),
        Some(10 * PART),
        PutObjectOptions::default().with_part_size(PART - 1),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, S3Error::InvalidPartSize { .. }));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_unsupported_checksum_mode_fails_before_any_request() {
    let mock = MockTransport::new();

    let err = upload(
        &mock,
        payload(3 * PART as usize),
        Some(3 * PART),
        part_options()
            .with_checksum(ChecksumAlgorithm::Md5)
            .with_checksum_mode(ChecksumMode::FullObject),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, S3Error::InvalidConfig(_)));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_short_source_aborts_upload() {
    let mock = MockTransport::new();

    let err = upload(
        &mock,
        payload(2 * PART as usize),
        Some(3 * PART),
        part_options().with_concurrency(1),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, S3Error::SourceRead(_)));
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 1);
    assert_eq!(mock.count(|k| *k == CallKind::Complete), 0);
}

#[tokio::test]
async fn test_composite_checksum() {
    let mock = MockTransport::new();
    let data = payload(3 * PART as usize + 10);
    let algorithm = ChecksumAlgorithm::Crc32;

    let descriptor = upload(
        &mock,
        data.clone(),
        Some(data.len() as u64),
        part_options().with_checksum(algorithm),
    )
    .await
    .unwrap();

    let header = algorithm.header_name().unwrap();
    let mut composite = algorithm.hasher().unwrap();
    for call in mock.calls() {
        if let CallKind::UploadPart(_) = call.kind {
            let expected = PartChecksum::compute(algorithm, &call.body).unwrap();
            assert_eq!(call.headers.get(header), Some(&expected.encoded()));
        }
    }
    for body in mock.stored_parts().values() {
        composite.update(&PartChecksum::compute(algorithm, body).unwrap().raw);
    }

    let initiate = mock
        .calls()
        .into_iter()
        .find(|c| c.kind == CallKind::Initiate)
        .unwrap();
    assert_eq!(
        initiate.headers.get("x-amz-checksum-type").map(String::as_str),
        Some(ChecksumMode::Composite.amz_name())
    );

    let complete = mock.last_complete().unwrap();
    assert!(String::from_utf8_lossy(&complete.body).contains("<ChecksumCRC32>"));

    let checksum = descriptor.checksum.unwrap();
    assert_eq!(checksum.mode, ChecksumMode::Composite);
    assert_eq!(
        checksum.value,
        format!("{}-4", STANDARD.encode(composite.finalize()))
    );
}

#[tokio::test]
async fn test_full_object_checksum() {
    let mock = MockTransport::new();
    let data = payload(3 * PART as usize + 10);
    let algorithm = ChecksumAlgorithm::Crc64Nvme;

    let descriptor = upload(
        &mock,
        data.clone(),
        Some(data.len() as u64),
        part_options().with_checksum(algorithm),
    )
    .await
    .unwrap();

    let expected = ObjectChecksum::of_body(algorithm, &data).unwrap();
    let checksum = descriptor.checksum.unwrap();
    assert_eq!(checksum.mode, ChecksumMode::FullObject);
    assert_eq!(checksum.value, expected.value);

    let complete = mock.last_complete().unwrap();
    assert_eq!(
        complete.headers.get(algorithm.header_name().unwrap()),
        Some(&expected.value)
    );
    assert_eq!(
        complete.headers.get("x-amz-checksum-type").map(String::as_str),
        Some(ChecksumMode::FullObject.amz_name())
    );
    assert!(!String::from_utf8_lossy(&complete.body).contains("<ChecksumCRC64NVME>"));
}

#[tokio::test]
async fn test_checksum_echo_mismatch() {
    let mock = MockTransport::new();
    mock.echo_complete_checksum("ChecksumCRC64NVME", "AAAAAAAAAAA=");

    let err = upload(
        &mock,
        payload(2 * PART as usize),
        Some(2 * PART),
        part_options().with_checksum(ChecksumAlgorithm::Crc64Nvme),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, S3Error::ChecksumMismatch { .. }));
    // The object is committed; there is nothing left to abort
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 0);
}

#[tokio::test]
async fn test_completion_retried_once() {
    let mock = MockTransport::new();
    mock.complete_with_error_body(1);

    upload(
        &mock,
        payload(2 * PART as usize),
        Some(2 * PART),
        part_options(),
    )
    .await
    .unwrap();

    assert_eq!(mock.count(|k| *k == CallKind::Complete), 2);
}

#[tokio::test]
async fn test_completion_failure_is_not_aborted() {
    let mock = MockTransport::new();
    mock.complete_with_error_body(2);

    let err = upload(
        &mock,
        payload(2 * PART as usize),
        Some(2 * PART),
        part_options(),
    )
    .await
    .unwrap_err();

    match &err {
        S3Error::CompletionFailed { upload_id, .. } => assert_eq!(upload_id, "upload-1"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(matches!(
        err.root_cause(),
        S3Error::Service { status: 200, code, .. } if code == "InternalError"
    ));
    assert_eq!(mock.count(|k| *k == CallKind::Complete), 2);
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 0);
}

#[tokio::test]
async fn test_manifest_is_ordered_when_parts_finish_out_of_order() {
    let mock = MockTransport::new();
    mock.delay_part(1, Duration::from_millis(100));
    let data = payload(4 * PART as usize);

    upload(
        &mock,
        data.clone(),
        Some(4 * PART),
        part_options().with_concurrency(4),
    )
    .await
    .unwrap();

    assert_eq!(mock.manifest(), vec![1, 2, 3, 4]);
    assert_eq!(mock.assembled(), data);
}

#[tokio::test]
async fn test_in_flight_parts_bounded_by_concurrency() {
    let mock = MockTransport::new();
    mock.delay_all_parts(Duration::from_millis(10));
    let data = payload(12 * PART as usize);

    upload(
        &mock,
        data.clone(),
        Some(12 * PART),
        part_options().with_concurrency(3),
    )
    .await
    .unwrap();

    let peak = mock.peak_in_flight();
    assert!((2..=3).contains(&peak), "peak in-flight parts was {}", peak);
    assert_eq!(mock.assembled(), data);
}

#[tokio::test]
async fn test_cancellation_aborts_upload() {
    let mock = MockTransport::new();
    mock.delay_all_parts(Duration::from_millis(200));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = client(&mock)
        .put_object(
            "bucket",
            "key",
            Cursor::new(payload(6 * PART as usize)),
            Some(6 * PART),
            part_options().with_concurrency(2),
            cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 1);
    assert_eq!(mock.count(|k| *k == CallKind::Complete), 0);
}

#[tokio::test]
async fn test_no_parts_dispatched_after_cancel() {
    let mock = MockTransport::new();
    mock.delay_all_parts(Duration::from_millis(200));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let observer = mock.clone();
    let dispatched_at_cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
        observer.count(|k| matches!(k, CallKind::UploadPart(_)))
    });

    let err = client(&mock)
        .put_object(
            "bucket",
            "key",
            Cursor::new(payload(8 * PART as usize)),
            Some(8 * PART),
            part_options().with_concurrency(2),
            cancel,
        )
        .await
        .unwrap_err();

    let dispatched_at_cancel = dispatched_at_cancel.await.unwrap();
    assert!(err.is_cancelled());
    assert!(dispatched_at_cancel <= 2);
    assert_eq!(
        mock.count(|k| matches!(k, CallKind::UploadPart(_))),
        dispatched_at_cancel
    );
}

#[tokio::test]
async fn test_cancel_with_failed_abort_still_reports_cancelled() {
    let mock = MockTransport::new();
    mock.delay_all_parts(Duration::from_millis(200));
    mock.fail_abort(403, "AccessDenied");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = client(&mock)
        .put_object(
            "bucket",
            "key",
            Cursor::new(payload(6 * PART as usize)),
            Some(6 * PART),
            part_options().with_concurrency(2),
            cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, S3Error::Cancelled), "got {:?}", err);
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 1);
    assert_eq!(mock.count(|k| *k == CallKind::Complete), 0);
}

#[tokio::test]
async fn test_hanging_abort_bounded_by_abort_timeout() {
    let mock = MockTransport::new();
    mock.fail_part(1, 10, 403, "AccessDenied");
    mock.hang_abort();
    let mut config = test_config();
    config.abort_timeout_secs = 1;

    let started = Instant::now();
    let err = client_with_config(&mock, config)
        .put_object(
            "bucket",
            "key",
            Cursor::new(payload(3 * PART as usize)),
            Some(3 * PART),
            part_options().with_concurrency(1),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(3), "abort took {:?}", elapsed);
    match err {
        S3Error::AbortFailed {
            cause, abort_error, ..
        } => {
            assert!(matches!(*cause, S3Error::PartUploadFailed { part_number: 1, .. }));
            assert!(matches!(*abort_error, S3Error::Timeout(_)), "got {:?}", abort_error);
        }
        other => panic!("expected AbortFailed, got {:?}", other),
    }
    assert_eq!(mock.count(|k| *k == CallKind::Abort), 1);
}

#[tokio::test]
async fn test_cancelled_before_start_sends_nothing() {
    let mock = MockTransport::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client(&mock)
        .put_object(
            "bucket",
            "key",
            Cursor::new(payload(3 * PART as usize)),
            Some(3 * PART),
            part_options(),
            cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(mock.calls().is_empty());
}

#[derive(Default)]
struct CountingSink {
    bytes: AtomicU64,
    parts: AtomicU32,
    started: AtomicBool,
    completed: AtomicBool,
}

impl ProgressSink for CountingSink {
    fn on_transfer(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn upload_started(&self, _key: &str, _total_bytes: Option<u64>) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn part_completed(&self, _part_number: u32, _part_bytes: u64) {
        self.parts.fetch_add(1, Ordering::SeqCst);
    }

    fn upload_completed(&self, _total_bytes: u64, _duration: Duration) {
        self.completed.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_progress_counts_acknowledged_bytes_once() {
    let mock = MockTransport::new();
    mock.fail_part(2, 1, 503, "SlowDown");
    let sink = Arc::new(CountingSink::default());
    let len = 3 * PART + 10;

    upload(
        &mock,
        payload(len as usize),
        Some(len),
        part_options().with_progress(sink.clone()),
    )
    .await
    .unwrap();

    assert_eq!(sink.bytes.load(Ordering::SeqCst), len);
    assert_eq!(sink.parts.load(Ordering::SeqCst), 4);
    assert!(sink.started.load(Ordering::SeqCst));
    assert!(sink.completed.load(Ordering::SeqCst));
}
