//! In-process object store
//!
//! Behaves like an S3 bucket namespace held in a map. Useful for tests and local
//! development; all data is lost when the last handle is dropped.

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::object::{ObjectHead, PresignMethod};
use crate::store::{Connector, ObjectReader, ObjectStore, PutBody, PutOutcome, PutRequest};
use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use url::Url;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    etag: String,
    content_type: Option<String>,
    metadata: HashMap<String, String>,
}

#[derive(Default)]
struct Inner {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    latency: RwLock<Option<Duration>>,
}

/// Map-backed [`ObjectStore`]. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`, to exercise caller timeouts
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.write() = latency;
    }

    /// Remove an object behind the client's back
    pub fn remove(&self, bucket: &str, key: &str) -> bool {
        self.inner
            .objects
            .write()
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.inner
            .objects
            .read()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn simulate_latency(&self) {
        let latency = *self.inner.latency.read();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
    }

    fn lookup(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        self.inner
            .objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

fn etag_of(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(body)))
}

/// The map keeps whole bodies, so every source is read to the end here
async fn collect_body(body: PutBody) -> Result<Bytes, StoreError> {
    match body {
        PutBody::Bytes(bytes) => Ok(bytes),
        PutBody::File { path, .. } => tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| StoreError::Transfer(format!("reading {}: {e}", path.display()))),
        PutBody::Stream(mut reader) => {
            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .await
                .map_err(|e| StoreError::Transfer(format!("reading upload stream: {e}")))?;
            Ok(Bytes::from(buf))
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, request: PutRequest<'_>) -> Result<PutOutcome, StoreError> {
        self.simulate_latency().await;
        let body = collect_body(request.body).await?;
        let size = body.len() as u64;
        let etag = etag_of(&body);
        let object = StoredObject {
            body,
            etag: etag.clone(),
            content_type: request.content_type.map(str::to_string),
            metadata: request.metadata.clone(),
        };
        self.inner
            .objects
            .write()
            .insert((request.bucket.to_string(), request.key.to_string()), object);
        Ok(PutOutcome {
            size,
            etag: Some(etag),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError> {
        self.simulate_latency().await;
        let body = self.lookup(bucket, key)?.body;
        Ok(Box::pin(std::io::Cursor::new(body)))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, StoreError> {
        self.simulate_latency().await;
        let object = self.lookup(bucket, key)?;
        Ok(ObjectHead {
            size: object.body.len() as u64,
            etag: Some(object.etag),
            content_type: object.content_type,
            metadata: object.metadata,
        })
    }

    async fn replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        self.simulate_latency().await;
        let mut objects = self.inner.objects.write();
        let object = objects
            .get_mut(&(bucket.to_string(), key.to_string()))
            .ok_or(StoreError::NotFound)?;
        object.metadata = metadata.clone();
        object.content_type = content_type.map(str::to_string);
        Ok(Some(object.etag.clone()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.simulate_latency().await;
        self.remove(bucket, key);
        Ok(())
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        let mut url = Url::parse(&format!("memory://{bucket}/"))
            .map_err(|e| StoreError::InvalidArgument(format!("bad bucket name: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| StoreError::InvalidArgument("bucket cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));

        let expires = ttl.as_secs().to_string();
        let signature = hex::encode(Md5::digest(
            format!("{}\n{bucket}\n{key}\n{expires}", method.as_str()).as_bytes(),
        ));
        url.query_pairs_mut()
            .append_pair("X-Amz-Method", method.as_str())
            .append_pair("X-Amz-Expires", &expires)
            .append_pair("X-Amz-Signature", &signature);

        Ok(url.into())
    }

    fn endpoint(&self) -> String {
        "memory://".to_string()
    }
}

/// Hands out views of one shared [`MemoryStore`], so objects survive reconnects
#[derive(Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(Arc::new(self.store.clone()))
    }
}
