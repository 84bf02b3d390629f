//! Operation hooks for metrics and tracing collaborators
//!
//! The client calls every registered [`OperationHook`] around each operation and
//! around connection lifecycle changes. Hooks observe; they cannot change the
//! outcome. A hook that returns an error is logged and skipped.

use crate::error::StowageError;
use crate::object::Operation;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Opaque trace context propagated to hooks (e.g. a W3C `traceparent` value)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceContext(String);

impl TraceContext {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure inside a hook
#[derive(Error, Debug)]
#[error("{0}")]
pub struct HookError(pub String);

pub type HookResult = std::result::Result<(), HookError>;

/// What an operation was asked to do
#[derive(Debug, Clone, Copy)]
pub struct OperationEvent<'a> {
    pub operation: Operation,
    pub bucket: &'a str,
    pub key: &'a str,
    pub trace: Option<&'a TraceContext>,
    /// Short description of the input, e.g. "5 bytes in memory"
    pub input: &'a str,
}

/// How an operation ended
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    Success {
        /// Short description of the result
        output: &'a str,
        /// Body bytes moved, for uploads and downloads
        bytes: Option<u64>,
    },
    Failure {
        error: &'a StowageError,
    },
}

impl Outcome<'_> {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "error",
        }
    }
}

/// Connection handle lifecycle
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Opened { generation: u64, endpoint: String },
    Closed { generation: u64 },
}

pub trait OperationHook: Send + Sync {
    fn on_start(&self, _event: &OperationEvent<'_>) -> HookResult {
        Ok(())
    }

    fn on_finish(
        &self,
        _event: &OperationEvent<'_>,
        _outcome: &Outcome<'_>,
        _elapsed: Duration,
    ) -> HookResult {
        Ok(())
    }

    fn on_connection(&self, _event: &ConnectionEvent) -> HookResult {
        Ok(())
    }
}

/// Ordered list of hooks, run synchronously in registration order
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn OperationHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn OperationHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn start(&self, event: &OperationEvent<'_>) {
        for hook in &self.hooks {
            if let Err(e) = hook.on_start(event) {
                warn!(operation = %event.operation, "Hook on_start failed: {}", e);
            }
        }
    }

    pub fn finish(&self, event: &OperationEvent<'_>, outcome: &Outcome<'_>, elapsed: Duration) {
        for hook in &self.hooks {
            if let Err(e) = hook.on_finish(event, outcome, elapsed) {
                warn!(operation = %event.operation, "Hook on_finish failed: {}", e);
            }
        }
    }

    pub fn connection(&self, event: &ConnectionEvent) {
        for hook in &self.hooks {
            if let Err(e) = hook.on_connection(event) {
                warn!(?event, "Hook on_connection failed: {}", e);
            }
        }
    }
}

/// Records operations as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

impl OperationHook for TracingHook {
    fn on_start(&self, event: &OperationEvent<'_>) -> HookResult {
        debug!(
            operation = %event.operation,
            bucket = event.bucket,
            key = event.key,
            trace = event.trace.map(TraceContext::as_str),
            input = event.input,
            "Storage operation started"
        );
        Ok(())
    }

    fn on_finish(
        &self,
        event: &OperationEvent<'_>,
        outcome: &Outcome<'_>,
        elapsed: Duration,
    ) -> HookResult {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let trace = event.trace.map(TraceContext::as_str);
        match outcome {
            Outcome::Success { output, .. } => info!(
                operation = %event.operation,
                bucket = event.bucket,
                key = event.key,
                trace,
                output = *output,
                elapsed_ms,
                "Storage operation completed"
            ),
            Outcome::Failure { error } => warn!(
                operation = %event.operation,
                bucket = event.bucket,
                key = event.key,
                trace,
                error_kind = error.kind().as_str(),
                elapsed_ms,
                "Storage operation failed: {}",
                error
            ),
        }
        Ok(())
    }

    fn on_connection(&self, event: &ConnectionEvent) -> HookResult {
        match event {
            ConnectionEvent::Opened {
                generation,
                endpoint,
            } => info!(generation, endpoint = %endpoint, "Storage connection opened"),
            ConnectionEvent::Closed { generation } => {
                info!(generation, "Storage connection closed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl OperationHook for Recorder {
        fn on_start(&self, event: &OperationEvent<'_>) -> HookResult {
            self.calls.lock().push(format!("start {}", event.operation));
            Ok(())
        }

        fn on_finish(&self, event: &OperationEvent<'_>, outcome: &Outcome<'_>, _: Duration) -> HookResult {
            self.calls
                .lock()
                .push(format!("finish {} {}", event.operation, outcome.status()));
            Ok(())
        }
    }

    struct Broken;

    impl OperationHook for Broken {
        fn on_start(&self, _: &OperationEvent<'_>) -> HookResult {
            Err(HookError("collector unreachable".to_string()))
        }

        fn on_finish(&self, _: &OperationEvent<'_>, _: &Outcome<'_>, _: Duration) -> HookResult {
            Err(HookError("collector unreachable".to_string()))
        }
    }

    fn event<'a>(trace: Option<&'a TraceContext>) -> OperationEvent<'a> {
        OperationEvent {
            operation: Operation::Size,
            bucket: "b",
            key: "k",
            trace,
            input: "",
        }
    }

    #[test]
    fn test_failing_hook_does_not_stop_chain() {
        let recorder = Arc::new(Recorder::default());
        let mut chain = HookChain::new();
        chain.push(Arc::new(Broken));
        chain.push(recorder.clone());

        let trace = TraceContext::new("00-abc-def-01");
        let ev = event(Some(&trace));
        chain.start(&ev);
        chain.finish(
            &ev,
            &Outcome::Success {
                output: "5",
                bytes: None,
            },
            Duration::from_millis(3),
        );

        assert_eq!(*recorder.calls.lock(), vec!["start size", "finish size success"]);
    }

    #[test]
    fn test_outcome_status() {
        let err = StowageError::InvalidArgument("x".to_string());
        assert_eq!(Outcome::Failure { error: &err }.status(), "error");
    }

    #[test]
    fn test_trace_context_is_opaque() {
        let trace = TraceContext::new("span-123");
        assert_eq!(trace.as_str(), "span-123");
        assert_eq!(trace.to_string(), "span-123");
    }
}
