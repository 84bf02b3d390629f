//! Prelude module for common imports.
//!
//! ```ignore
//! use stowage::prelude::*;
//! ```

// Error types
pub use crate::error::{ErrorContext, ErrorKind, Result, StowageError, TransferFailure};

// Configuration
pub use crate::config::{BackendKind, Config, MetricsConfig, StorageConfig};

// Client
pub use crate::client::{CallOptions, SharedClient, StorageClient};

// Objects
pub use crate::object::{
    DownloadTarget, ImageDimensions, ObjectDescriptor, ObjectHead, PresignMethod, PresignedUrl,
    UploadResult, UploadSource,
};

// Hooks and metrics
pub use crate::hooks::{OperationHook, TraceContext, TracingHook};
pub use crate::metrics::Metrics;

// Common external crates
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
