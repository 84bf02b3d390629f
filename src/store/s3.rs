//! S3-compatible backend on top of the AWS SDK
//!
//! Works against Cloudflare R2, AWS S3 and MinIO. The SDK client pools
//! connections internally, so one [`S3Store`] serves all concurrent callers.

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::object::{ObjectHead, PresignMethod};
use crate::store::{Connector, ObjectReader, ObjectStore, PutBody, PutOutcome, PutRequest};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, MetadataDirective};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// Provider name recorded on the static credentials
const CREDENTIALS_PROVIDER: &str = "stowage";

/// Error codes that mean the object (or its bucket) is absent
const NOT_FOUND_CODES: &[&str] = &["NoSuchKey", "NotFound", "NoSuchBucket"];

/// Part size for streamed uploads. Streams that fit in one part go up as a
/// single PUT; anything larger becomes a multipart upload holding at most one
/// part in memory.
const PART_SIZE: u64 = 8 * 1024 * 1024;

/// Error codes that mean the credentials were rejected
const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
];

/// [`ObjectStore`] backed by an `aws_sdk_s3::Client`
pub struct S3Store {
    client: Client,
    endpoint: String,
}

impl S3Store {
    /// Build an SDK client from validated configuration. No request is sent.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StoreError> {
        let endpoint = config
            .endpoint_url
            .clone()
            .ok_or_else(|| StoreError::InvalidArgument("endpoint_url is not set".to_string()))?;
        let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        else {
            return Err(StoreError::Auth("access credentials are not set".to_string()));
        };

        let credentials =
            Credentials::new(access_key, secret_key, None, None, CREDENTIALS_PROVIDER);

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&endpoint)
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        info!(
            endpoint = %endpoint,
            region = %config.region,
            path_style = config.force_path_style,
            "S3 client initialized"
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            endpoint,
        })
    }
}

/// Map an SDK failure onto the store error taxonomy
fn classify<E>(err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err
        .as_service_error()
        .and_then(ProvideErrorMetadata::code)
        .map(str::to_string);
    let message = DisplayErrorContext(&err).to_string();
    debug!(?status, ?code, "S3 request failed: {}", message);

    if status == Some(404) || code.as_deref().is_some_and(|c| NOT_FOUND_CODES.contains(&c)) {
        return StoreError::NotFound;
    }

    if matches!(status, Some(401 | 403)) || code.as_deref().is_some_and(|c| AUTH_CODES.contains(&c))
    {
        return StoreError::Auth(message);
    }

    match err {
        SdkError::TimeoutError(_) => StoreError::Timeout(message),
        SdkError::ConstructionFailure(_) => StoreError::InvalidArgument(message),
        _ => StoreError::Transfer(message),
    }
}

/// Build the `x-amz-copy-source` value: URL-encoded per path segment
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{bucket}/{}", encoded.join("/"))
}

fn content_length(length: Option<i64>) -> u64 {
    length.map_or(0, |n| n.max(0) as u64)
}

/// Destination and attributes shared by every PUT flavour
struct UploadTarget<'a> {
    bucket: &'a str,
    key: &'a str,
    content_type: Option<&'a str>,
    metadata: &'a HashMap<String, String>,
}

impl S3Store {
    async fn put_single(
        &self,
        target: &UploadTarget<'_>,
        body: ByteStream,
    ) -> Result<Option<String>, StoreError> {
        let output = self
            .client
            .put_object()
            .bucket(target.bucket)
            .key(target.key)
            .body(body)
            .set_content_type(target.content_type.map(str::to_string))
            .set_metadata(Some(target.metadata.clone()))
            .send()
            .await
            .map_err(classify)?;

        Ok(output.e_tag().map(str::to_string))
    }

    /// Upload a stream of unknown length, part by part
    async fn put_stream<R>(&self, target: &UploadTarget<'_>, mut reader: R) -> Result<PutOutcome, StoreError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let first = read_part(&mut reader).await?;
        if (first.len() as u64) < PART_SIZE {
            let size = first.len() as u64;
            let etag = self.put_single(target, ByteStream::from(first)).await?;
            return Ok(PutOutcome { size, etag });
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(target.bucket)
            .key(target.key)
            .set_content_type(target.content_type.map(str::to_string))
            .set_metadata(Some(target.metadata.clone()))
            .send()
            .await
            .map_err(classify)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StoreError::Transfer("multipart upload id missing".to_string()))?
            .to_string();

        match self.upload_parts(target, &upload_id, first, reader).await {
            Ok((parts, size)) => {
                let output = self
                    .client
                    .complete_multipart_upload()
                    .bucket(target.bucket)
                    .key(target.key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(classify)?;
                Ok(PutOutcome {
                    size,
                    etag: output.e_tag().map(str::to_string),
                })
            }
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(target.bucket)
                    .key(target.key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key = target.key,
                        upload_id = %upload_id,
                        "Failed to abort multipart upload: {}",
                        DisplayErrorContext(&abort)
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts<R>(
        &self,
        target: &UploadTarget<'_>,
        upload_id: &str,
        first: Vec<u8>,
        mut reader: R,
    ) -> Result<(Vec<CompletedPart>, u64), StoreError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut parts = Vec::new();
        let mut size = 0u64;
        let mut chunk = first;
        let mut part_number = 1i32;

        while !chunk.is_empty() {
            size += chunk.len() as u64;
            let output = self
                .client
                .upload_part()
                .bucket(target.bucket)
                .key(target.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(classify)?;
            debug!(key = target.key, part_number, size, "Uploaded part");

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            );
            part_number += 1;
            chunk = read_part(&mut reader).await?;
        }

        Ok((parts, size))
    }
}

/// Read up to one part from `reader`; an empty result means end of stream
async fn read_part<R>(reader: &mut R) -> Result<Vec<u8>, StoreError>
where
    R: AsyncRead + Send + Unpin,
{
    let mut buf = Vec::new();
    reader
        .take(PART_SIZE)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| StoreError::Transfer(format!("reading upload stream: {e}")))?;
    Ok(buf)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(&self, request: PutRequest<'_>) -> Result<PutOutcome, StoreError> {
        let PutRequest {
            bucket,
            key,
            body,
            content_type,
            metadata,
        } = request;
        let target = UploadTarget {
            bucket,
            key,
            content_type,
            metadata,
        };

        match body {
            PutBody::Bytes(bytes) => {
                let size = bytes.len() as u64;
                let etag = self.put_single(&target, ByteStream::from(bytes)).await?;
                Ok(PutOutcome { size, etag })
            }
            PutBody::File { path, size } if size <= PART_SIZE => {
                let stream = ByteStream::from_path(&path).await.map_err(|e| {
                    StoreError::Transfer(format!("reading {}: {e}", path.display()))
                })?;
                let etag = self.put_single(&target, stream).await?;
                Ok(PutOutcome { size, etag })
            }
            PutBody::File { path, .. } => {
                let file = tokio::fs::File::open(&path).await.map_err(|e| {
                    StoreError::Transfer(format!("opening {}: {e}", path.display()))
                })?;
                self.put_stream(&target, file).await
            }
            PutBody::Stream(reader) => self.put_stream(&target, reader).await,
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;

        Ok(ObjectHead {
            size: content_length(output.content_length()),
            etag: output.e_tag().map(str::to_string),
            content_type: output.content_type().map(str::to_string),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let output = self
            .client
            .copy_object()
            .copy_source(copy_source(bucket, key))
            .bucket(bucket)
            .key(key)
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata.clone()))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(classify)?;

        Ok(output
            .copy_object_result()
            .and_then(|r| r.e_tag())
            .map(str::to_string))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;

        let request = match method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(classify)?,
            PresignMethod::Put => self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(classify)?,
        };

        Ok(request.uri().to_string())
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// Connects through [`S3Store::connect`]
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Connector;

#[async_trait]
impl Connector for S3Connector {
    async fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(Arc::new(S3Store::connect(config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::operation::get_object::GetObjectError;
    use aws_sdk_s3::operation::head_object::HeadObjectError;
    use aws_sdk_s3::primitives::SdkBody;

    fn response(status: u16) -> HttpResponse {
        HttpResponse::new(status.try_into().unwrap(), SdkBody::empty())
    }

    fn service_error(code: &str, status: u16) -> SdkError<GetObjectError, HttpResponse> {
        let meta = ErrorMetadata::builder().code(code).message("rejected").build();
        SdkError::service_error(GetObjectError::generic(meta), response(status))
    }

    fn r2_config() -> StorageConfig {
        StorageConfig {
            endpoint_url: Some("https://account.r2.cloudflarestorage.com".to_string()),
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn test_copy_source_encoding() {
        assert_eq!(copy_source("b", "k"), "b/k");
        assert_eq!(copy_source("b", "a dir/x+y.png"), "b/a%20dir/x%2By.png");
    }

    #[test]
    fn test_classify_not_found() {
        let head_404 = SdkError::service_error(
            HeadObjectError::generic(ErrorMetadata::builder().build()),
            response(404),
        );
        assert_eq!(classify(head_404), StoreError::NotFound);
        assert_eq!(classify(service_error("NoSuchKey", 400)), StoreError::NotFound);
        assert_eq!(classify(service_error("NoSuchBucket", 400)), StoreError::NotFound);
    }

    #[test]
    fn test_classify_auth() {
        assert!(matches!(
            classify(service_error("SignatureDoesNotMatch", 400)),
            StoreError::Auth(_)
        ));
        assert!(matches!(classify(service_error("Forbidden", 403)), StoreError::Auth(_)));
        assert!(matches!(classify(service_error("Unauthorized", 401)), StoreError::Auth(_)));
    }

    #[test]
    fn test_classify_server_error_is_transfer() {
        assert!(matches!(
            classify(service_error("InternalError", 500)),
            StoreError::Transfer(_)
        ));
    }

    #[test]
    fn test_classify_timeout_and_construction() {
        let timeout = SdkError::<GetObjectError, HttpResponse>::timeout_error("deadline elapsed");
        assert!(matches!(classify(timeout), StoreError::Timeout(_)));

        let construction =
            SdkError::<GetObjectError, HttpResponse>::construction_failure("bucket is required");
        assert!(matches!(classify(construction), StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_read_part_splits_stream() {
        let total = PART_SIZE as usize + 3;
        let mut reader = std::io::Cursor::new(vec![7u8; total]);

        assert_eq!(read_part(&mut reader).await.unwrap().len(), PART_SIZE as usize);
        assert_eq!(read_part(&mut reader).await.unwrap(), vec![7u8; 3]);
        assert!(read_part(&mut reader).await.unwrap().is_empty());
    }

    #[test]
    fn test_content_length_never_negative() {
        assert_eq!(content_length(None), 0);
        assert_eq!(content_length(Some(-1)), 0);
        assert_eq!(content_length(Some(5)), 5);
    }

    #[tokio::test]
    async fn test_connect_requires_endpoint() {
        let config = StorageConfig {
            endpoint_url: None,
            ..r2_config()
        };
        assert!(matches!(
            S3Store::connect(&config).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_presign_is_local() {
        let store = S3Store::connect(&r2_config()).await.unwrap();
        let url = store
            .presign("assets", "img/cat.png", PresignMethod::Get, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(url.starts_with("https://account.r2.cloudflarestorage.com/assets/img/cat.png?"));
        assert!(url.contains("X-Amz-Expires=60"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_presign_put() {
        let store = S3Store::connect(&r2_config()).await.unwrap();
        let url = store
            .presign("assets", "upload.bin", PresignMethod::Put, Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.contains("X-Amz-Expires=3600"));
    }
}
