//! Error types for Stowage

use crate::object::Operation;
use std::fmt;
use thiserror::Error;

/// Where a failure happened: the operation and the object it targeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: Operation,
    pub bucket: String,
    pub key: String,
}

impl ErrorContext {
    pub fn new(operation: Operation, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            operation,
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.operation, self.bucket, self.key)
    }
}

/// Main error type for Stowage
#[derive(Error, Debug)]
pub enum StowageError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{context}: not found: {resource}")]
    NotFound {
        context: ErrorContext,
        resource: String,
    },

    #[error("{context}: authentication failed: {message}")]
    Auth {
        context: ErrorContext,
        message: String,
    },

    #[error("{context}: transfer failed: {source}")]
    Transfer {
        context: ErrorContext,
        #[source]
        source: TransferFailure,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Reason a transfer did not complete
#[derive(Error, Debug)]
pub enum TransferFailure {
    #[error("network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,
}

/// Stable classification of a [`StowageError`], used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    NotFound,
    Auth,
    Transfer,
    Timeout,
    InvalidArgument,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::NotFound => "not_found",
            Self::Auth => "auth",
            Self::Transfer => "transfer",
            Self::Timeout => "timeout",
            Self::InvalidArgument => "invalid_argument",
        }
    }
}

impl StowageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Transfer {
                source: TransferFailure::Timeout(_),
                ..
            } => ErrorKind::Timeout,
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Whether a caller-side retry may succeed. Only transfer failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::NotFound { context, .. }
            | Self::Auth { context, .. }
            | Self::Transfer { context, .. } => Some(context),
            Self::Config(_) | Self::InvalidArgument(_) => None,
        }
    }

    pub(crate) fn transfer(context: ErrorContext, source: impl Into<TransferFailure>) -> Self {
        Self::Transfer {
            context,
            source: source.into(),
        }
    }
}

/// Errors reported by an [`ObjectStore`](crate::store::ObjectStore) backend.
///
/// Backends know nothing about the calling operation; the client attaches an
/// [`ErrorContext`] when converting into [`StowageError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,

    #[error("access denied: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transfer(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    pub(crate) fn with_context(self, context: ErrorContext) -> StowageError {
        match self {
            Self::NotFound => {
                let resource = format!("object {}/{}", context.bucket, context.key);
                StowageError::NotFound { context, resource }
            }
            Self::Auth(message) => StowageError::Auth { context, message },
            Self::Transfer(message) => {
                StowageError::transfer(context, TransferFailure::Network(message))
            }
            Self::Timeout(message) => {
                StowageError::transfer(context, TransferFailure::Timeout(message))
            }
            Self::InvalidArgument(message) => {
                StowageError::InvalidArgument(format!("{context}: {message}"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, StowageError>;
