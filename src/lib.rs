//! # Stowage
//!
//! Client façade for S3-compatible object stores (Cloudflare R2, AWS S3, MinIO).
//!
//! ## Features
//!
//! - One lazily created connection handle per client, shared by all callers
//! - Explicit `close()` with transparent reconnect on next use
//! - Upload from memory, files or async readers; download to files or writers
//! - Existence, size, HEAD and image-dimension lookups
//! - Metadata rewrite that preserves the object body
//! - Presigned GET/PUT URLs
//! - Per-call timeout, cancellation and trace context
//! - Hook chain for metrics (Prometheus adapter included) and tracing
//!
//! ## Example
//!
//! ```ignore
//! use stowage::prelude::*;
//!
//! let config = Config::from_env();
//! let storage = SharedClient::new(config.storage);
//! let client = storage.get_instance().await?;
//!
//! let desc = ObjectDescriptor::new("assets", "hello.txt").with_content_type("text/plain");
//! client.upload(&desc, UploadSource::from(b"hello".to_vec())).await?;
//! let url = client.presigned_url(&desc, 300).await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────────────┐     ┌──────────────────┐
//! │ app/service  │────▶│ StorageClient           │────▶│ R2 / S3 / MinIO  │
//! │              │     │  ├─ shared handle       │     │ (aws-sdk-s3)     │
//! └──────────────┘     │  ├─ timeout / cancel    │     └──────────────────┘
//!                      │  └─ hooks ─▶ metrics,   │
//!                      │             tracing     │
//!                      └─────────────────────────┘
//! ```

// Modules
pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod object;
pub mod prelude;
pub mod store;

// Re-exports for convenience
pub use client::{Call, CallOptions, SharedClient, StorageClient};
pub use error::{ErrorContext, ErrorKind, Result, StoreError, StowageError, TransferFailure};
