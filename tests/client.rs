//! End-to-end behaviour of `StorageClient` over the in-memory store.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use stowage::config::StorageConfig;
use stowage::hooks::{HookResult, OperationEvent, OperationHook, Outcome, TraceContext};
use stowage::metrics::Metrics;
use stowage::object::{DownloadTarget, ObjectDescriptor, UploadSource};
use stowage::store::{Connector, MemoryConnector, MemoryStore, ObjectStore};
use stowage::{CallOptions, ErrorKind, SharedClient, StorageClient, StoreError, StowageError};

/// Counts `connect` calls and widens the construction window
struct CountingConnector {
    inner: MemoryConnector,
    connects: AtomicUsize,
}

impl CountingConnector {
    fn new(store: MemoryStore) -> Self {
        Self {
            inner: MemoryConnector::new(store),
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.connect(config).await
    }
}

struct RejectingConnector;

#[async_trait]
impl Connector for RejectingConnector {
    async fn connect(&self, _: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Err(StoreError::Auth("InvalidAccessKeyId".to_string()))
    }
}

#[derive(Default)]
struct TraceRecorder {
    seen: Mutex<Vec<(String, Option<String>, &'static str)>>,
}

impl OperationHook for TraceRecorder {
    fn on_finish(&self, event: &OperationEvent<'_>, outcome: &Outcome<'_>, _: Duration) -> HookResult {
        self.seen.lock().push((
            event.operation.to_string(),
            event.trace.map(|t| t.as_str().to_string()),
            outcome.status(),
        ));
        Ok(())
    }
}

fn client_with(store: &MemoryStore) -> StorageClient {
    StorageClient::with_connector(
        StorageConfig::memory(),
        Arc::new(MemoryConnector::new(store.clone())),
    )
    .expect("memory config is valid")
}

fn desc() -> ObjectDescriptor {
    ObjectDescriptor::new("b", "k")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_creates_one_handle() {
    let connector = Arc::new(CountingConnector::new(MemoryStore::new()));
    let shared = Arc::new(SharedClient::with_connector(
        StorageConfig::memory(),
        connector.clone(),
    ));

    let mut tasks = Vec::new();
    for i in 0..32 {
        let shared = Arc::clone(&shared);
        tasks.push(tokio::spawn(async move {
            let client = shared.get_instance().await.expect("get_instance");
            client
                .exists(&ObjectDescriptor::new("b", format!("k{i}")))
                .await
                .expect("exists");
            client
        }));
    }

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.expect("task panicked"));
    }

    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(clients[0].connections_opened(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lazy_connect_on_plain_client() {
    let connector = Arc::new(CountingConnector::new(MemoryStore::new()));
    let client = Arc::new(
        StorageClient::with_connector(StorageConfig::memory(), connector.clone()).unwrap(),
    );

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move { client.exists(&desc()).await }));
    }
    for task in tasks {
        assert!(!task.await.unwrap().unwrap());
    }

    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn get_instance_fails_fast_on_missing_config() {
    let shared = SharedClient::new(StorageConfig::default());
    let err = shared.get_instance().await.err().expect("config must be rejected");
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn connect_auth_failure_is_classified() {
    let shared = SharedClient::with_connector(StorageConfig::memory(), Arc::new(RejectingConnector));
    let err = shared.get_instance().await.err().expect("connect must fail");
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.context().map(|c| c.operation.as_str()), Some("connect"));
}

#[tokio::test]
async fn round_trip_preserves_bytes() {
    let store = MemoryStore::new();
    let client = client_with(&store);

    for (i, body) in [b"".to_vec(), b"x".to_vec(), (0..=255u8).collect::<Vec<_>>()]
        .into_iter()
        .enumerate()
    {
        let desc = ObjectDescriptor::new("b", format!("obj-{i}"));
        let result = client.upload(&desc, UploadSource::from(body.clone())).await.unwrap();
        assert_eq!(result.size, body.len() as u64);

        let mut buf = Vec::new();
        let written = client
            .download(&desc, DownloadTarget::Writer(&mut buf))
            .await
            .unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(buf, body);
    }
}

#[tokio::test]
async fn file_and_stream_transfers() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.bin");
    let dst = dir.path().join("out.bin");
    std::fs::write(&src, b"from disk").unwrap();

    let client = client_with(&MemoryStore::new());

    client.upload(&desc(), UploadSource::Path(src)).await.unwrap();
    let written = client
        .download(&desc(), DownloadTarget::Path(dst.clone()))
        .await
        .unwrap();
    assert_eq!(written, 9);
    assert_eq!(std::fs::read(&dst).unwrap(), b"from disk");

    let reader = std::io::Cursor::new(b"from a reader".to_vec());
    client.upload(&desc(), UploadSource::reader(reader)).await.unwrap();
    assert_eq!(client.download_bytes(&desc()).await.unwrap(), Bytes::from_static(b"from a reader"));
}

#[tokio::test]
async fn exists_flips_after_upload() {
    let client = client_with(&MemoryStore::new());
    assert!(!client.exists(&desc()).await.unwrap());

    client.upload(&desc(), UploadSource::from(b"data".to_vec())).await.unwrap();
    assert!(client.exists(&desc()).await.unwrap());
}

#[tokio::test]
async fn presigned_url_expiry() {
    let client = client_with(&MemoryStore::new());

    let before = SystemTime::now();
    let url = client.presigned_url(&desc(), 60).await.unwrap();
    let lifetime = url.expires_at.duration_since(before).unwrap();
    assert!(lifetime >= Duration::from_secs(59) && lifetime <= Duration::from_secs(61));
    assert_eq!(url.expires_at.duration_since(url.issued_at).unwrap(), Duration::from_secs(60));

    for ttl in [0, -1] {
        let err = client.presigned_url(&desc(), ttl).await.unwrap_err();
        assert!(matches!(err, StowageError::InvalidArgument(_)));
    }
}

#[tokio::test]
async fn update_metadata_preserves_body() {
    let client = client_with(&MemoryStore::new());
    let original = ObjectDescriptor::new("b", "k").with_metadata("stage", "raw");
    client
        .upload(&original, UploadSource::from(b"payload bytes".to_vec()))
        .await
        .unwrap();
    let before = client.download_bytes(&desc()).await.unwrap();

    let result = client
        .update_metadata(&desc(), HashMap::from([("stage".to_string(), "processed".to_string())]))
        .await
        .unwrap();

    assert_eq!(result.size, before.len() as u64);
    assert_eq!(client.size(&desc()).await.unwrap(), before.len() as u64);
    assert_eq!(client.download_bytes(&desc()).await.unwrap(), before);
    let head = client.head(&desc()).await.unwrap();
    assert_eq!(head.metadata.get("stage").map(String::as_str), Some("processed"));
}

#[tokio::test]
async fn operations_succeed_after_close() {
    let store = MemoryStore::new();
    let client = client_with(&store);
    client.upload(&desc(), UploadSource::from(b"kept".to_vec())).await.unwrap();

    client.close().await;
    assert!(!client.is_connected().await);

    assert_eq!(client.download_bytes(&desc()).await.unwrap(), Bytes::from_static(b"kept"));
    assert!(client.is_connected().await);
    assert_eq!(client.connections_opened(), 2);
}

#[tokio::test]
async fn shared_client_reconnects_after_close() {
    let connector = Arc::new(CountingConnector::new(MemoryStore::new()));
    let shared = SharedClient::with_connector(StorageConfig::memory(), connector.clone());

    let client = shared.get_instance().await.unwrap();
    shared.close().await;
    assert!(!shared.get_instance().await.unwrap().exists(&desc()).await.unwrap());

    assert!(Arc::ptr_eq(&client, &shared.get_instance().await.unwrap()));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn hello_scenario_with_external_delete() {
    let store = MemoryStore::new();
    let client = client_with(&store);

    client.upload(&desc(), UploadSource::from(b"hello".to_vec())).await.unwrap();
    assert_eq!(client.size(&desc()).await.unwrap(), 5);
    assert_eq!(client.download_bytes(&desc()).await.unwrap(), Bytes::from_static(b"hello"));
    assert!(client.exists(&desc()).await.unwrap());

    assert!(store.remove("b", "k"));

    assert!(!client.exists(&desc()).await.unwrap());
    let mut sink = Vec::new();
    let err = client
        .download(&desc(), DownloadTarget::Writer(&mut sink))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(sink.is_empty());
    assert!(client.size(&desc()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn delete_removes_object() {
    let store = MemoryStore::new();
    let client = client_with(&store);
    client.upload(&desc(), UploadSource::from(b"x".to_vec())).await.unwrap();

    client.delete(&desc()).await.unwrap();
    assert!(!store.contains("b", "k"));
    client.delete(&desc()).await.unwrap();
}

#[tokio::test]
async fn hooks_see_trace_context_and_outcome() {
    let recorder = Arc::new(TraceRecorder::default());
    let client = client_with(&MemoryStore::new()).with_hook(recorder.clone());
    let trace = TraceContext::new("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01");

    let call = client.with_options(CallOptions::new().trace(trace.clone()));
    call.upload(&desc(), UploadSource::from(b"x".to_vec())).await.unwrap();
    let _ = call.size(&ObjectDescriptor::new("b", "missing")).await;

    let seen = recorder.seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], ("upload".to_string(), Some(trace.as_str().to_string()), "success"));
    assert_eq!(seen[1], ("size".to_string(), Some(trace.as_str().to_string()), "error"));
}

#[tokio::test]
async fn metrics_hook_counts_operations() {
    let metrics = Arc::new(Metrics::new(&stowage::config::MetricsConfig::default()).unwrap());
    let client = client_with(&MemoryStore::new()).with_hook(metrics.clone());

    client.upload(&desc(), UploadSource::from(b"abc".to_vec())).await.unwrap();
    let _ = client.size(&ObjectDescriptor::new("b", "missing")).await;

    assert_eq!(metrics.connections_opened.get(), 1);
    assert_eq!(metrics.bytes_transferred.with_label_values(&["upload"]).get(), 3);

    let output = metrics.gather().unwrap();
    assert!(output.contains(r#"error_type="not_found""#));
    assert!(output.contains(r#"operation="upload",status="success""#));
}

#[tokio::test]
async fn config_timeout_applies_without_call_options() {
    let store = MemoryStore::new();
    store.set_latency(Some(Duration::from_secs(2)));
    let mut config = StorageConfig::memory();
    config.operation_timeout_secs = 1;
    let client =
        StorageClient::with_connector(config, Arc::new(MemoryConnector::new(store))).unwrap();

    let err = client.exists(&desc()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn metrics_count_rejected_arguments() {
    let metrics = Arc::new(Metrics::new(&stowage::config::MetricsConfig::default()).unwrap());
    let client = client_with(&MemoryStore::new()).with_hook(metrics.clone());

    let err = client.presigned_url(&desc(), 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let output = metrics.gather().unwrap();
    assert!(output.contains(r#"error_type="invalid_argument""#));
    assert!(output.contains(r#"operation="presign""#));
    assert_eq!(metrics.connections_opened.get(), 0);
}
