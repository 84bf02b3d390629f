//! Transport layer for Stowage
//!
//! [`ObjectStore`] is the raw object API a connection handle speaks; [`Connector`]
//! builds one from configuration. The client owns exactly one live store at a time.

mod memory;
mod s3;

pub use memory::{MemoryConnector, MemoryStore};
pub use s3::{S3Connector, S3Store};

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::object::{ObjectHead, PresignMethod};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Object body as it arrives from the store
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Body of a PUT. Files and streams are never read whole into memory by the
/// S3 transport.
pub enum PutBody {
    Bytes(Bytes),
    /// Local file whose length was taken just before the upload
    File { path: PathBuf, size: u64 },
    /// Stream of unknown length
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for PutBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "Bytes({})", b.len()),
            Self::File { path, size } => write!(f, "File({}, {size})", path.display()),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Body and attributes of a PUT
#[derive(Debug)]
pub struct PutRequest<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub body: PutBody,
    pub content_type: Option<&'a str>,
    pub metadata: &'a HashMap<String, String>,
}

/// What the store reports after a PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Body bytes sent
    pub size: u64,
    pub etag: Option<String>,
}

/// Raw object API shared by all callers of one connection handle.
///
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, streaming the body when it is a file or reader
    async fn put_object(&self, request: PutRequest<'_>) -> Result<PutOutcome, StoreError>;

    /// Open the object body for reading. A missing object fails here, before
    /// any byte is produced.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, StoreError>;

    /// Copy an object onto itself, replacing all user metadata.
    /// The body is untouched; `content_type` is written back as given.
    async fn replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: Option<&str>,
    ) -> Result<Option<String>, StoreError>;

    /// Remove an object. Removing a missing object succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Sign a URL locally; no request is sent
    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
    ) -> Result<String, StoreError>;

    /// Endpoint description for logs
    fn endpoint(&self) -> String;
}

/// Builds the transport behind a connection handle
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StoreError>;
}
