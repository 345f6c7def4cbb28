//! Upload coordinator
//!
//! Drives one `put_object` call. Small objects go out as a single PUT;
//! everything else becomes a multipart upload served by a fixed pool of
//! worker tasks. Workers take turns on the shared reader, upload the part
//! they staged and report the result over a channel. Only the coordinator
//! touches the session.
//!
//! ```text
//!            +-----------------------+
//!  source -> | PartReader (mutex)    | -> staged part -> worker 1..N -> PUT part
//!            +-----------------------+                      |
//!                                                          v
//!                                  coordinator <- mpsc <- PartResult
//!                                       |
//!                                       v
//!                         complete (ordered manifest) | abort
//! ```

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cancellable;
use super::completion::{self, build_manifest};
use super::session::{PartResult, SessionState, UploadSession};
use crate::client::S3Client;
use crate::config::MAX_CONCURRENCY;
use crate::core::buffer_pool::BufferPool;
use crate::core::checksum::{ChecksumMode, ChecksumState, ObjectChecksum, PartChecksum};
use crate::core::planner::{self, MultipartPlan, UploadPlan};
use crate::core::reader::{PartReader, StagedPart};
use crate::error::{S3Error, S3Result};
use crate::types::{ObjectDescriptor, PutObjectOptions};

/// Upload `source` to `bucket/key`
///
/// Planning errors are returned before any request is made.
#[tracing::instrument(skip(client, source, options, cancel))]
pub async fn put_object<R>(
    client: &S3Client,
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
    let started = Instant::now();
    let result = upload(client, bucket, key, source, size, &options, &cancel).await;

    if let Some(progress) = &options.progress {
        match &result {
            Ok(descriptor) => progress.upload_completed(descriptor.size, started.elapsed()),
            Err(e) => progress.upload_failed(&e.to_string()),
        }
    }
    result
}

async fn upload<R>(
    client: &S3Client,
    bucket: &str,
    key: &str,
    source: R,
    size: Option<u64>,
    options: &PutObjectOptions,
    cancel: &CancellationToken,
) -> S3Result<ObjectDescriptor>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let concurrency = options.concurrency.unwrap_or(client.config().concurrency);
    if concurrency == 0 || concurrency > MAX_CONCURRENCY {
        return Err(S3Error::InvalidConfig(format!(
            "Concurrency {} must be between 1 and {}",
            concurrency, MAX_CONCURRENCY
        )));
    }

    let checksum = ChecksumState::new(options.checksum_algorithm, options.checksum_mode)?;
    let plan = planner::plan(size, options.part_size, &client.config().limits)?;

    if let Some(progress) = &options.progress {
        progress.upload_started(key, size);
    }

    match plan {
        UploadPlan::Direct { size } => {
            let body = read_direct(source, size, cancel).await?;
            put_direct(client, bucket, key, body, options, cancel).await
        }
        UploadPlan::Multipart(plan) => {
            info!(
                part_size = plan.part_size(),
                part_count = ?plan.part_count(),
                concurrency,
                "Planned multipart upload"
            );
            let job = MultipartJob {
                client,
                bucket,
                key,
                options,
                cancel,
                concurrency,
            };
            job.run(source, plan, checksum).await
        }
    }
}

/// Read exactly `size` bytes for a direct PUT
async fn read_direct<R>(mut source: R, size: u64, cancel: &CancellationToken) -> S3Result<Bytes>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = BytesMut::with_capacity(size as usize);
    let read = cancellable(cancel, async {
        let mut limited = (&mut source).take(size);
        let mut total = 0u64;
        loop {
            let n = limited.read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
        }
        Ok::<u64, S3Error>(total)
    })
    .await?;

    if read < size {
        return Err(S3Error::SourceRead(format!(
            "Source ended at byte {} but {} bytes were declared",
            read, size
        )));
    }
    Ok(buf.freeze())
}

async fn put_direct(
    client: &S3Client,
    bucket: &str,
    key: &str,
    body: Bytes,
    options: &PutObjectOptions,
    cancel: &CancellationToken,
) -> S3Result<ObjectDescriptor> {
    let size = body.len() as u64;
    let result = client
        .retry_policy()
        .run(cancel, "put_object", |_| {
            cancellable(cancel, client.put_single(bucket, key, body.clone(), options))
        })
        .await?;

    if let Some(progress) = &options.progress {
        progress.on_transfer(size);
    }

    let checksum = ObjectChecksum::of_body(options.checksum_algorithm, &body);
    if let (Some(local), Some(echoed)) = (&checksum, &result.checksum) {
        if *echoed != local.value {
            return Err(S3Error::ChecksumMismatch {
                key: key.to_string(),
                expected: local.value.clone(),
                actual: echoed.clone(),
            });
        }
    }

    info!(etag = %result.etag, size, "Object stored with a single PUT");

    Ok(ObjectDescriptor {
        bucket: bucket.to_string(),
        key: key.to_string(),
        etag: result.etag,
        version_id: result.version_id,
        checksum,
        size,
        upload_id: None,
        parts: 0,
    })
}

/// Reader plus a part staged ahead of initiation
struct SharedSource<R> {
    reader: PartReader<R>,
    pending: Option<StagedPart>,
}

impl<R> SharedSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next(&mut self) -> S3Result<Option<StagedPart>> {
        if let Some(part) = self.pending.take() {
            return Ok(Some(part));
        }
        self.reader.next_part().await
    }
}

/// What a worker needs to upload parts of one session
struct PartContext {
    client: S3Client,
    bucket: String,
    key: String,
    upload_id: String,
    options: PutObjectOptions,
}

struct MultipartJob<'a> {
    client: &'a S3Client,
    bucket: &'a str,
    key: &'a str,
    options: &'a PutObjectOptions,
    cancel: &'a CancellationToken,
    concurrency: usize,
}

impl MultipartJob<'_> {
    async fn run<R>(
        &self,
        source: R,
        plan: MultipartPlan,
        checksum: ChecksumState,
    ) -> S3Result<ObjectDescriptor>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mode = checksum.mode();
        let pool = BufferPool::new(self.concurrency);
        let mut reader = PartReader::new(source, plan, pool, checksum);

        // Unknown sizes: stage part 1 first, a short source needs no multipart upload
        let mut pending = None;
        if plan.total_size().is_none() {
            let first = cancellable(self.cancel, reader.next_part())
                .await?
                .ok_or_else(|| S3Error::Internal("Reader produced no first part".to_string()))?;

            if first.is_last && first.len() <= self.client.config().limits.single_put_threshold {
                debug!(size = first.len(), "Source fits in a single PUT");
                let body = first.data.clone();
                drop(first);
                return put_direct(
                    self.client,
                    self.bucket,
                    self.key,
                    body,
                    self.options,
                    self.cancel,
                )
                .await;
            }
            pending = Some(first);
        }

        let mut session =
            UploadSession::new(self.bucket, self.key, plan.total_size(), plan.part_size());

        let (client, bucket, key, options, cancel) =
            (self.client, self.bucket, self.key, self.options, self.cancel);
        let upload_id = client
            .retry_policy()
            .run(cancel, "create_multipart_upload", |_| {
                cancellable(cancel, client.initiate_multipart(bucket, key, options, mode))
            })
            .await?;
        session.start(upload_id.clone())?;
        info!(upload_id = %upload_id, part_size = plan.part_size(), "Multipart upload initiated");

        let shared = Arc::new(Mutex::new(SharedSource { reader, pending }));

        let expected = match self.transfer_parts(&mut session, shared.clone()).await {
            Ok(expected) => expected,
            Err(e) => return Err(self.fail_session(&mut session, e).await),
        };

        let checksum_state = shared.lock().await.reader.take_checksum();
        let prepared = build_manifest(
            session.parts(),
            expected,
            mode == Some(ChecksumMode::Composite),
        )
        .and_then(|manifest| {
            let checksum = finalize_checksum(checksum_state, &session, expected)?;
            Ok((manifest, checksum))
        })
        .and_then(|prepared| {
            session.transition(SessionState::Completing)?;
            Ok(prepared)
        });

        let (manifest, object_checksum) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail_session(&mut session, e).await),
        };

        match completion::complete(self.client, &session, &manifest, object_checksum, self.cancel)
            .await
        {
            Ok(descriptor) => {
                session.transition(SessionState::Completed)?;
                Ok(descriptor)
            }
            Err(S3Error::Cancelled) => Err(self.fail_session(&mut session, S3Error::Cancelled).await),
            Err(e) => {
                // The caller decides what to do with an upload that failed to complete
                if let Err(state_err) = session.transition(SessionState::Failed) {
                    warn!(error = %state_err, "Unexpected session state");
                }
                warn!(upload_id = %upload_id, error = %e, "Completion failed, upload left in place");
                Err(e)
            }
        }
    }

    /// Run the worker pool until the source is exhausted or a part fails
    ///
    /// Returns the number of parts staged.
    async fn transfer_parts<R>(
        &self,
        session: &mut UploadSession,
        shared: Arc<Mutex<SharedSource<R>>>,
    ) -> S3Result<u32>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let upload_id = session
            .upload_id()
            .ok_or_else(|| S3Error::Internal("Transfer without an upload ID".to_string()))?
            .to_string();

        let ctx = Arc::new(PartContext {
            client: self.client.clone(),
            bucket: self.bucket.to_string(),
            key: self.key.to_string(),
            upload_id,
            options: self.options.clone(),
        });

        // Child token: a failed part stops the siblings without touching the caller's token
        let workers_token = self.cancel.child_token();
        let (tx, mut rx) = mpsc::channel::<S3Result<PartResult>>(self.concurrency);
        let mut workers = JoinSet::new();

        for worker_id in 0..self.concurrency {
            workers.spawn(part_worker(
                worker_id,
                ctx.clone(),
                shared.clone(),
                tx.clone(),
                workers_token.clone(),
            ));
        }
        drop(tx);

        let mut first_error: Option<S3Error> = None;
        while let Some(message) = rx.recv().await {
            let recorded = message.and_then(|result| session.record_part(result));
            if let Err(e) = recorded {
                if first_error.is_none() {
                    debug!(error = %e, "Stopping part dispatch");
                    workers_token.cancel();
                    first_error = Some(e);
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(join_error) = joined {
                if first_error.is_none() {
                    first_error = Some(S3Error::Internal(format!(
                        "Part worker failed: {}",
                        join_error
                    )));
                }
            }
        }

        if first_error.is_none() && self.cancel.is_cancelled() {
            first_error = Some(S3Error::Cancelled);
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let source = shared.lock().await;
        if !source.reader.is_done() {
            return Err(S3Error::Internal(
                "Workers stopped before the source was exhausted".to_string(),
            ));
        }
        Ok(source.reader.parts_staged())
    }

    /// Mark the session failed and abort it if requested
    ///
    /// The abort is bounded by the abort timeout and ignores the caller's
    /// cancellation token. When it fails the caller gets both errors.
    async fn fail_session(&self, session: &mut UploadSession, cause: S3Error) -> S3Error {
        if let Err(e) = session.transition(SessionState::Failed) {
            warn!(error = %e, "Unexpected session state");
        }
        let Some(upload_id) = session.upload_id().map(str::to_string) else {
            return cause;
        };
        warn!(upload_id = %upload_id, error = %cause, "Multipart upload failed");

        if !self.options.abort_on_failure {
            info!(upload_id = %upload_id, "Leaving incomplete upload in place");
            return cause;
        }

        let (client, bucket, key) = (self.client, self.bucket, self.key);
        let abort_timeout = client.config().abort_timeout();
        let no_cancel = CancellationToken::new();
        let abort = tokio::time::timeout(
            abort_timeout,
            client
                .retry_policy()
                .run(&no_cancel, "abort_multipart_upload", |_| {
                    client.abort_multipart(bucket, key, &upload_id)
                }),
        )
        .await;

        let abort_error = match abort {
            Ok(Ok(())) => {
                if let Err(e) = session.transition(SessionState::Aborted) {
                    warn!(error = %e, "Unexpected session state");
                }
                info!(upload_id = %upload_id, "Multipart upload aborted");
                return cause;
            }
            Ok(Err(e)) => e,
            Err(_) => S3Error::Timeout(format!(
                "Abort did not finish within {:?}",
                abort_timeout
            )),
        };

        warn!(upload_id = %upload_id, error = %abort_error, "Abort failed");
        if cause.is_cancelled() {
            return cause;
        }
        S3Error::AbortFailed {
            upload_id,
            cause: Box::new(cause),
            abort_error: Box::new(abort_error),
        }
    }
}

/// Fold composite part checksums into the object checksum
fn finalize_checksum(
    state: Option<ChecksumState>,
    session: &UploadSession,
    expected: u32,
) -> S3Result<Option<ObjectChecksum>> {
    let Some(mut state) = state else {
        return Ok(None);
    };
    for part in session.parts().values() {
        if let Some(checksum) = &part.checksum {
            state.record(part.part_number, checksum.clone());
        }
    }
    state.finalize(expected)
}

async fn part_worker<R>(
    worker_id: usize,
    ctx: Arc<PartContext>,
    shared: Arc<Mutex<SharedSource<R>>>,
    results: mpsc::Sender<S3Result<PartResult>>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = async { shared.lock().await.next().await } => next,
        };

        let staged = match next {
            Ok(Some(staged)) => staged,
            Ok(None) => break,
            Err(e) => {
                let _ = results.send(Err(e)).await;
                break;
            }
        };

        let outcome = upload_staged(&ctx, staged, &cancel).await;
        let failed = outcome.is_err();
        if results.send(outcome).await.is_err() || failed {
            break;
        }
    }
    debug!(worker_id, "Part worker finished");
}

/// Upload one staged part with retries; the buffer is released afterwards
async fn upload_staged(
    ctx: &PartContext,
    staged: StagedPart,
    cancel: &CancellationToken,
) -> S3Result<PartResult> {
    let part_number = staged.part_number();
    let size = staged.len();
    let checksum = PartChecksum::compute(ctx.options.checksum_algorithm, &staged.data);

    let mut attempts = 0;
    let outcome = ctx
        .client
        .retry_policy()
        .run(cancel, "upload_part", |attempt| {
            attempts = attempt;
            cancellable(
                cancel,
                ctx.client.upload_part(
                    &ctx.bucket,
                    &ctx.key,
                    &ctx.upload_id,
                    part_number,
                    staged.data.clone(),
                    checksum.as_ref(),
                    &ctx.options,
                ),
            )
        })
        .await;
    drop(staged);

    match outcome {
        Ok(etag) => {
            debug!(part_number, size, etag = %etag, "Part uploaded");
            if let Some(progress) = &ctx.options.progress {
                progress.part_completed(part_number, size);
                progress.on_transfer(size);
            }
            Ok(PartResult {
                part_number,
                etag,
                checksum,
                size,
            })
        }
        Err(e) if e.is_cancelled() => Err(S3Error::Cancelled),
        Err(S3Error::RetriesExhausted { attempts, source }) => Err(S3Error::PartUploadFailed {
            part_number,
            attempts,
            source,
        }),
        Err(e) => Err(S3Error::PartUploadFailed {
            part_number,
            attempts,
            source: Box::new(e),
        }),
    }
}
