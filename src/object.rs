//! Object descriptors, operation results and transfer endpoints

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};

/// User metadata keys holding image dimensions
pub const IMAGE_WIDTH_KEY: &str = "image_width";
pub const IMAGE_HEIGHT_KEY: &str = "image_height";

/// Client operations, used for error context, hooks and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Upload,
    Download,
    Exists,
    Size,
    Head,
    ImageDimensions,
    UpdateMetadata,
    Presign,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Exists => "exists",
            Self::Size => "size",
            Self::Head => "head",
            Self::ImageDimensions => "image_dimensions",
            Self::UpdateMetadata => "update_metadata",
            Self::Presign => "presign",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies an object and the attributes to store with it.
///
/// An empty `bucket` means "use the configured default bucket".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub bucket: String,
    pub key: String,
    pub metadata: HashMap<String, String>,
    pub content_type: Option<String>,
}

impl ObjectDescriptor {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    /// Descriptor for `key` in the configured default bucket
    pub fn in_default_bucket(key: impl Into<String>) -> Self {
        Self::new(String::new(), key)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Result of a write (upload or metadata rewrite)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// Object attributes returned by a HEAD request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Image dimensions carried in user metadata
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImageDimensions {
    pub width: f64,
    pub height: f64,
}

/// HTTP method a presigned URL grants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

impl PresignMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// Time-limited URL granting access without further authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub method: PresignMethod,
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
}

/// Where upload bytes come from
pub enum UploadSource {
    Bytes(Bytes),
    Path(PathBuf),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl UploadSource {
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    pub(crate) fn summary(&self) -> String {
        match self {
            Self::Bytes(b) => format!("{} bytes in memory", b.len()),
            Self::Path(p) => format!("file {}", p.display()),
            Self::Reader(_) => "stream".to_string(),
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<&'static [u8]> for UploadSource {
    fn from(value: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(value))
    }
}

impl From<PathBuf> for UploadSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Where downloaded bytes go
pub enum DownloadTarget<'a> {
    Path(PathBuf),
    Writer(&'a mut (dyn AsyncWrite + Send + Unpin)),
}

impl DownloadTarget<'_> {
    pub(crate) fn summary(&self) -> String {
        match self {
            Self::Path(p) => format!("file {}", p.display()),
            Self::Writer(_) => "stream".to_string(),
        }
    }
}

impl fmt::Debug for DownloadTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
