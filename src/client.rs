//! Object storage client
//!
//! [`StorageClient`] owns at most one live connection handle. The handle is built
//! on first use, shared by every concurrent caller, and dropped by
//! [`StorageClient::close`]; the next operation after a close reconnects.
//!
//! ```text
//!  caller ──▶ Call (timeout, trace, cancel)
//!               │
//!               ├─ hooks.on_start
//!               ├─ handle() ──▶ RwLock<Option<ConnectionHandle>> ──▶ Connector
//!               ├─ ObjectStore request
//!               └─ hooks.on_finish
//! ```

use crate::config::{BackendKind, StorageConfig};
use crate::error::{ErrorContext, Result, StoreError, StowageError, TransferFailure};
use crate::hooks::{ConnectionEvent, HookChain, OperationEvent, OperationHook, Outcome, TraceContext};
use crate::object::{
    DownloadTarget, IMAGE_HEIGHT_KEY, IMAGE_WIDTH_KEY, ImageDimensions, ObjectDescriptor,
    ObjectHead, Operation, PresignMethod, PresignedUrl, UploadResult, UploadSource,
};
use crate::store::{
    Connector, MemoryConnector, ObjectReader, ObjectStore, PutBody, PutRequest, S3Connector,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind as IoErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Live session against the object store. Never handed to callers.
struct ConnectionHandle {
    store: Arc<dyn ObjectStore>,
    generation: u64,
    opened_at: Instant,
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides `StorageConfig::operation_timeout_secs`
    pub timeout: Option<Duration>,
    pub trace: Option<TraceContext>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Façade over an S3-compatible object store with a single shared connection
pub struct StorageClient {
    config: StorageConfig,
    connector: Arc<dyn Connector>,
    hooks: HookChain,
    handle: RwLock<Option<Arc<ConnectionHandle>>>,
    generation: AtomicU64,
}

impl fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageClient")
            .field("config", &self.config)
            .field("hooks", &self.hooks.len())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StorageClient {
    /// Create a client using the transport named by `config.backend`.
    ///
    /// A `memory` backend gets a private store; use [`StorageClient::with_connector`]
    /// to share one.
    pub fn new(config: StorageConfig) -> Result<Self> {
        let connector: Arc<dyn Connector> = match config.backend {
            BackendKind::S3 => Arc::new(S3Connector),
            BackendKind::Memory => Arc::new(MemoryConnector::default()),
        };
        Self::with_connector(config, connector)
    }

    /// Create a client with an explicit transport. Fails if the config is invalid.
    pub fn with_connector(config: StorageConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            hooks: HookChain::new(),
            handle: RwLock::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Register a hook; hooks run in registration order
    pub fn with_hook(mut self, hook: Arc<dyn OperationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Establish the connection handle now instead of on first use
    pub async fn connect(&self) -> Result<()> {
        self.handle().await.map(|_| ())
    }

    pub async fn is_connected(&self) -> bool {
        self.handle.read().await.is_some()
    }

    /// Number of handles created over the client's lifetime
    pub fn connections_opened(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drop the connection handle. The next operation reconnects.
    pub async fn close(&self) {
        let closed = self.handle.write().await.take();
        if let Some(handle) = closed {
            info!(
                generation = handle.generation,
                uptime_secs = handle.opened_at.elapsed().as_secs(),
                "Closing storage connection"
            );
            self.hooks.connection(&ConnectionEvent::Closed {
                generation: handle.generation,
            });
        }
    }

    /// Borrow the client with per-call options
    pub fn with_options(&self, options: CallOptions) -> Call<'_> {
        Call {
            client: self,
            options,
        }
    }

    fn call(&self) -> Call<'_> {
        self.with_options(CallOptions::default())
    }

    pub async fn upload(&self, descriptor: &ObjectDescriptor, source: UploadSource) -> Result<UploadResult> {
        self.call().upload(descriptor, source).await
    }

    pub async fn download(&self, descriptor: &ObjectDescriptor, target: DownloadTarget<'_>) -> Result<u64> {
        self.call().download(descriptor, target).await
    }

    pub async fn download_bytes(&self, descriptor: &ObjectDescriptor) -> Result<Bytes> {
        self.call().download_bytes(descriptor).await
    }

    pub async fn exists(&self, descriptor: &ObjectDescriptor) -> Result<bool> {
        self.call().exists(descriptor).await
    }

    pub async fn size(&self, descriptor: &ObjectDescriptor) -> Result<u64> {
        self.call().size(descriptor).await
    }

    pub async fn head(&self, descriptor: &ObjectDescriptor) -> Result<ObjectHead> {
        self.call().head(descriptor).await
    }

    pub async fn image_dimensions(&self, descriptor: &ObjectDescriptor) -> Result<ImageDimensions> {
        self.call().image_dimensions(descriptor).await
    }

    pub async fn update_metadata(
        &self,
        descriptor: &ObjectDescriptor,
        metadata: HashMap<String, String>,
    ) -> Result<UploadResult> {
        self.call().update_metadata(descriptor, metadata).await
    }

    pub async fn presigned_url(&self, descriptor: &ObjectDescriptor, ttl_secs: i64) -> Result<PresignedUrl> {
        self.call().presigned_url(descriptor, ttl_secs).await
    }

    pub async fn presigned_upload_url(
        &self,
        descriptor: &ObjectDescriptor,
        ttl_secs: i64,
    ) -> Result<PresignedUrl> {
        self.call().presigned_upload_url(descriptor, ttl_secs).await
    }

    pub async fn delete(&self, descriptor: &ObjectDescriptor) -> Result<()> {
        self.call().delete(descriptor).await
    }

    /// Current handle, connecting if there is none.
    ///
    /// Readers share the fast path; the write lock serializes construction so
    /// concurrent first callers produce a single handle.
    async fn handle(&self) -> Result<Arc<ConnectionHandle>> {
        if let Some(handle) = self.handle.read().await.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let mut slot = self.handle.write().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let context = ErrorContext::new(
            Operation::Connect,
            self.config.default_bucket.clone(),
            String::new(),
        );
        let store = self
            .connector
            .connect(&self.config)
            .await
            .map_err(|e| e.with_context(context))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let endpoint = store.endpoint();
        info!(generation, endpoint = %endpoint, "Storage connection established");

        let handle = Arc::new(ConnectionHandle {
            store,
            generation,
            opened_at: Instant::now(),
        });
        *slot = Some(Arc::clone(&handle));
        drop(slot);

        self.hooks.connection(&ConnectionEvent::Opened {
            generation,
            endpoint,
        });
        Ok(handle)
    }

    fn bucket_for<'d>(&'d self, descriptor: &'d ObjectDescriptor) -> &'d str {
        if descriptor.bucket.is_empty() {
            self.config.default_bucket.as_str()
        } else {
            descriptor.bucket.as_str()
        }
    }

    /// Resolve the bucket and validate the key for one operation
    fn target(&self, operation: Operation, descriptor: &ObjectDescriptor) -> Result<ErrorContext> {
        let bucket = self.bucket_for(descriptor);

        if bucket.is_empty() {
            return Err(StowageError::InvalidArgument(format!(
                "{operation}: no bucket given and no default bucket configured"
            )));
        }
        if descriptor.key.is_empty() {
            return Err(StowageError::InvalidArgument(format!(
                "{operation}: object key must not be empty"
            )));
        }

        Ok(ErrorContext::new(operation, bucket, descriptor.key.clone()))
    }
}

impl Drop for StorageClient {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            debug!(generation = handle.generation, "Storage client dropped with open connection");
            self.hooks.connection(&ConnectionEvent::Closed {
                generation: handle.generation,
            });
        }
    }
}

/// A client borrowed together with [`CallOptions`]
pub struct Call<'a> {
    client: &'a StorageClient,
    options: CallOptions,
}

impl Call<'_> {
    /// Store `source` at the descriptor's location with its metadata and content type.
    ///
    /// Files and readers are streamed to the store, not buffered whole.
    pub async fn upload(&self, descriptor: &ObjectDescriptor, source: UploadSource) -> Result<UploadResult> {
        let input = source.summary();
        let ctx = &self.prepare(Operation::Upload, descriptor, &input)?;

        self.run(ctx, &input, upload_summary, |store| async move {
            let body = put_body(ctx, source).await?;
            let outcome = store
                .put_object(PutRequest {
                    bucket: &ctx.bucket,
                    key: &ctx.key,
                    body,
                    content_type: descriptor.content_type.as_deref(),
                    metadata: &descriptor.metadata,
                })
                .await
                .map_err(|e| e.with_context(ctx.clone()))?;

            Ok(UploadResult {
                bucket: ctx.bucket.clone(),
                key: ctx.key.clone(),
                size: outcome.size,
                etag: outcome.etag,
            })
        })
        .await
    }

    /// Stream the object body into `target`, returning the number of bytes written
    pub async fn download(&self, descriptor: &ObjectDescriptor, target: DownloadTarget<'_>) -> Result<u64> {
        let input = target.summary();
        let ctx = &self.prepare(Operation::Download, descriptor, &input)?;

        self.run(ctx, &input, |n: &u64| (format!("{n} bytes"), Some(*n)), |store| async move {
            let body = store
                .get_object(&ctx.bucket, &ctx.key)
                .await
                .map_err(|e| e.with_context(ctx.clone()))?;
            write_target(ctx, target, body).await
        })
        .await
    }

    /// Fetch the whole object body into memory
    pub async fn download_bytes(&self, descriptor: &ObjectDescriptor) -> Result<Bytes> {
        let ctx = &self.prepare(Operation::Download, descriptor, "memory")?;

        self.run(
            ctx,
            "memory",
            |b: &Bytes| (format!("{} bytes", b.len()), Some(b.len() as u64)),
            |store| async move {
                let mut body = store
                    .get_object(&ctx.bucket, &ctx.key)
                    .await
                    .map_err(|e| e.with_context(ctx.clone()))?;
                let mut buf = Vec::new();
                body.read_to_end(&mut buf)
                    .await
                    .map_err(|e| StowageError::transfer(ctx.clone(), e))?;
                Ok(Bytes::from(buf))
            },
        )
        .await
    }

    /// Whether the object exists. A missing object is `Ok(false)`, not an error.
    pub async fn exists(&self, descriptor: &ObjectDescriptor) -> Result<bool> {
        let ctx = &self.prepare(Operation::Exists, descriptor, "")?;

        self.run(ctx, "", |found: &bool| (found.to_string(), None), |store| async move {
            match store.head_object(&ctx.bucket, &ctx.key).await {
                Ok(_) => Ok(true),
                Err(StoreError::NotFound) => Ok(false),
                Err(e) => Err(e.with_context(ctx.clone())),
            }
        })
        .await
    }

    pub async fn size(&self, descriptor: &ObjectDescriptor) -> Result<u64> {
        let ctx = &self.prepare(Operation::Size, descriptor, "")?;

        self.run(ctx, "", |n: &u64| (format!("{n} bytes"), None), |store| async move {
            let head = store
                .head_object(&ctx.bucket, &ctx.key)
                .await
                .map_err(|e| e.with_context(ctx.clone()))?;
            Ok(head.size)
        })
        .await
    }

    pub async fn head(&self, descriptor: &ObjectDescriptor) -> Result<ObjectHead> {
        let ctx = &self.prepare(Operation::Head, descriptor, "")?;

        self.run(ctx, "", head_summary, |store| async move {
            store
                .head_object(&ctx.bucket, &ctx.key)
                .await
                .map_err(|e| e.with_context(ctx.clone()))
        })
        .await
    }

    /// Image width and height from the object's user metadata.
    /// Missing or unparsable entries read as 0.
    pub async fn image_dimensions(&self, descriptor: &ObjectDescriptor) -> Result<ImageDimensions> {
        let ctx = &self.prepare(Operation::ImageDimensions, descriptor, "")?;

        self.run(
            ctx,
            "",
            |d: &ImageDimensions| (format!("{}x{}", d.width, d.height), None),
            |store| async move {
                let head = store
                    .head_object(&ctx.bucket, &ctx.key)
                    .await
                    .map_err(|e| e.with_context(ctx.clone()))?;
                Ok(ImageDimensions {
                    width: dimension(&head.metadata, IMAGE_WIDTH_KEY, &ctx.key),
                    height: dimension(&head.metadata, IMAGE_HEIGHT_KEY, &ctx.key),
                })
            },
        )
        .await
    }

    /// Replace all user metadata by copying the object onto itself.
    ///
    /// The body and stored content type are kept; a content type on the
    /// descriptor overrides the stored one.
    pub async fn update_metadata(
        &self,
        descriptor: &ObjectDescriptor,
        metadata: HashMap<String, String>,
    ) -> Result<UploadResult> {
        let input = format!("{} metadata entries", metadata.len());
        let ctx = &self.prepare(Operation::UpdateMetadata, descriptor, &input)?;

        self.run(ctx, &input, upload_summary, |store| async move {
            let current = store
                .head_object(&ctx.bucket, &ctx.key)
                .await
                .map_err(|e| e.with_context(ctx.clone()))?;
            let content_type = descriptor
                .content_type
                .as_deref()
                .or(current.content_type.as_deref());

            let etag = store
                .replace_metadata(&ctx.bucket, &ctx.key, &metadata, content_type)
                .await
                .map_err(|e| e.with_context(ctx.clone()))?;

            Ok(UploadResult {
                bucket: ctx.bucket.clone(),
                key: ctx.key.clone(),
                size: current.size,
                etag: etag.or(current.etag),
            })
        })
        .await
    }

    /// Presigned GET URL valid for `ttl_secs`
    pub async fn presigned_url(&self, descriptor: &ObjectDescriptor, ttl_secs: i64) -> Result<PresignedUrl> {
        self.presign(descriptor, PresignMethod::Get, ttl_secs).await
    }

    /// Presigned PUT URL valid for `ttl_secs`
    pub async fn presigned_upload_url(
        &self,
        descriptor: &ObjectDescriptor,
        ttl_secs: i64,
    ) -> Result<PresignedUrl> {
        self.presign(descriptor, PresignMethod::Put, ttl_secs).await
    }

    async fn presign(
        &self,
        descriptor: &ObjectDescriptor,
        method: PresignMethod,
        ttl_secs: i64,
    ) -> Result<PresignedUrl> {
        let input = format!("{} ttl={ttl_secs}s", method.as_str());
        let ctx = &self.prepare(Operation::Presign, descriptor, &input)?;
        let ttl = self
            .presign_ttl(ttl_secs)
            .map_err(|e| self.reject(ctx.operation, &ctx.bucket, &ctx.key, &input, e))?;

        // The URL is a bearer credential; hooks only learn its method and lifetime
        let summarize =
            |p: &PresignedUrl| (format!("{} expires in {ttl:?}", p.method.as_str()), None);

        self.run(ctx, &input, summarize, |store| async move {
            let issued_at = SystemTime::now();
            let url = store
                .presign(&ctx.bucket, &ctx.key, method, ttl)
                .await
                .map_err(|e| e.with_context(ctx.clone()))?;
            Ok(PresignedUrl {
                url,
                method,
                issued_at,
                expires_at: issued_at + ttl,
            })
        })
        .await
    }

    fn presign_ttl(&self, ttl_secs: i64) -> Result<Duration> {
        let max = self.client.config.presign_max_ttl_secs;
        match u64::try_from(ttl_secs) {
            Ok(secs) if secs > 0 && secs <= max => Ok(Duration::from_secs(secs)),
            _ => Err(StowageError::InvalidArgument(format!(
                "presign ttl must be within 1..={max} seconds, got {ttl_secs}"
            ))),
        }
    }

    /// Remove the object. Removing a missing object succeeds.
    pub async fn delete(&self, descriptor: &ObjectDescriptor) -> Result<()> {
        let ctx = &self.prepare(Operation::Delete, descriptor, "")?;

        self.run(ctx, "", |_: &()| ("deleted".to_string(), None), |store| async move {
            store
                .delete_object(&ctx.bucket, &ctx.key)
                .await
                .map_err(|e| e.with_context(ctx.clone()))
        })
        .await
    }

    /// Validate the target. A rejected call still shows up in the hooks as a
    /// failed operation.
    fn prepare(&self, operation: Operation, descriptor: &ObjectDescriptor, input: &str) -> Result<ErrorContext> {
        self.client.target(operation, descriptor).map_err(|e| {
            let bucket = self.client.bucket_for(descriptor);
            self.reject(operation, bucket, &descriptor.key, input, e)
        })
    }

    /// Report an operation that failed before reaching the store
    fn reject(
        &self,
        operation: Operation,
        bucket: &str,
        key: &str,
        input: &str,
        error: StowageError,
    ) -> StowageError {
        let event = OperationEvent {
            operation,
            bucket,
            key,
            trace: self.options.trace.as_ref(),
            input,
        };
        self.client.hooks.start(&event);
        self.client
            .hooks
            .finish(&event, &Outcome::Failure { error: &error }, Duration::ZERO);
        error
    }

    /// Run one operation: hooks around it, timeout and cancellation applied to
    /// connecting and the request together.
    async fn run<'s, T, F, Fut>(
        &'s self,
        ctx: &'s ErrorContext,
        input: &'s str,
        summarize: impl FnOnce(&T) -> (String, Option<u64>),
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<dyn ObjectStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let event = OperationEvent {
            operation: ctx.operation,
            bucket: &ctx.bucket,
            key: &ctx.key,
            trace: self.options.trace.as_ref(),
            input,
        };
        self.client.hooks.start(&event);
        let started = Instant::now();

        let work = async {
            let handle = self.client.handle().await?;
            op(Arc::clone(&handle.store)).await
        };
        let result = self.guard(ctx, work).await;

        let elapsed = started.elapsed();
        match &result {
            Ok(value) => {
                let (output, bytes) = summarize(value);
                self.client
                    .hooks
                    .finish(&event, &Outcome::Success { output: &output, bytes }, elapsed);
            }
            Err(error) => {
                self.client
                    .hooks
                    .finish(&event, &Outcome::Failure { error }, elapsed);
            }
        }
        result
    }

    /// Apply the call's timeout and cancellation token to `work`
    async fn guard<T>(&self, ctx: &ErrorContext, work: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.options.timeout.or_else(|| self.client.config.operation_timeout());

        let timed = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => Err(StowageError::transfer(
                        ctx.clone(),
                        TransferFailure::Timeout(format!("after {limit:?}")),
                    )),
                },
                None => work.await,
            }
        };

        match &self.options.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => {
                    Err(StowageError::transfer(ctx.clone(), TransferFailure::Cancelled))
                }
                result = timed => result,
            },
            None => timed.await,
        }
    }
}

fn upload_summary(result: &UploadResult) -> (String, Option<u64>) {
    let output = format!(
        "{} bytes etag={}",
        result.size,
        result.etag.as_deref().unwrap_or("-")
    );
    (output, Some(result.size))
}

fn head_summary(head: &ObjectHead) -> (String, Option<u64>) {
    (format!("{} bytes", head.size), None)
}

fn dimension(metadata: &HashMap<String, String>, name: &str, key: &str) -> f64 {
    match metadata.get(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, entry = name, value = %raw, "Ignoring unparsable image dimension");
            0.0
        }),
        None => 0.0,
    }
}

async fn put_body(ctx: &ErrorContext, source: UploadSource) -> Result<PutBody> {
    match source {
        UploadSource::Bytes(bytes) => Ok(PutBody::Bytes(bytes)),
        UploadSource::Path(path) => match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(PutBody::File {
                path,
                size: meta.len(),
            }),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(StowageError::NotFound {
                context: ctx.clone(),
                resource: format!("local file {}", path.display()),
            }),
            Err(e) => Err(StowageError::transfer(ctx.clone(), e)),
        },
        UploadSource::Reader(reader) => Ok(PutBody::Stream(reader)),
    }
}

/// Copy the body into the target. A failed copy to a path removes the partial file.
async fn write_target(ctx: &ErrorContext, target: DownloadTarget<'_>, mut body: ObjectReader) -> Result<u64> {
    match target {
        DownloadTarget::Path(path) => {
            let mut file = tokio::fs::File::create(&path)
                .await
                .map_err(|e| StowageError::transfer(ctx.clone(), e))?;
            match copy_body(&mut body, &mut file).await {
                Ok(copied) => Ok(copied),
                Err(e) => {
                    drop(file);
                    if let Err(remove) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), "Failed to remove partial download: {}", remove);
                    }
                    Err(StowageError::transfer(ctx.clone(), e))
                }
            }
        }
        DownloadTarget::Writer(writer) => copy_body(&mut body, writer)
            .await
            .map_err(|e| StowageError::transfer(ctx.clone(), e)),
    }
}

async fn copy_body<W>(body: &mut ObjectReader, writer: &mut W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = tokio::io::copy(body, writer).await?;
    writer.flush().await?;
    Ok(copied)
}

/// Lazily initialized, process-wide client owned by the composition root.
///
/// The first [`SharedClient::get_instance`] validates the configuration, builds the
/// client and opens its connection handle; concurrent first callers wait for that
/// one construction. Later calls return the same `Arc` without locking.
pub struct SharedClient {
    config: StorageConfig,
    connector: Arc<dyn Connector>,
    hooks: Vec<Arc<dyn OperationHook>>,
    cell: OnceCell<Arc<StorageClient>>,
}

impl SharedClient {
    pub fn new(config: StorageConfig) -> Self {
        let connector: Arc<dyn Connector> = match config.backend {
            BackendKind::S3 => Arc::new(S3Connector),
            BackendKind::Memory => Arc::new(MemoryConnector::default()),
        };
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: StorageConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            hooks: Vec::new(),
            cell: OnceCell::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn OperationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub async fn get_instance(&self) -> Result<Arc<StorageClient>> {
        let client = self
            .cell
            .get_or_try_init(|| async {
                let mut client =
                    StorageClient::with_connector(self.config.clone(), Arc::clone(&self.connector))?;
                for hook in &self.hooks {
                    client = client.with_hook(Arc::clone(hook));
                }
                client.connect().await?;
                Ok::<_, StowageError>(Arc::new(client))
            })
            .await?;
        Ok(Arc::clone(client))
    }

    /// Close the instance's connection handle, if one was created
    pub async fn close(&self) {
        if let Some(client) = self.cell.get() {
            client.close().await;
        }
    }
}
