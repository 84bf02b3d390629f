//! Prometheus metrics for Stowage

use crate::config::MetricsConfig;
use crate::hooks::{ConnectionEvent, HookError, HookResult, OperationEvent, OperationHook, Outcome};
use crate::{Result, StowageError};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Prometheus collectors fed by the client's hook chain
pub struct Metrics {
    pub registry: Registry,

    app_name: String,
    host_name: String,

    // Per-operation series
    pub request_duration: HistogramVec,
    pub requests: IntCounterVec,
    pub errors: IntCounterVec,
    pub bytes_transferred: IntCounterVec,

    // Connection handle
    pub connections_opened: IntCounter,
    pub connections_active: IntGauge,
}

impl Metrics {
    /// Create the collectors and register them in a fresh registry
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        Self::build(config).map_err(|e| StowageError::Config(format!("metrics registry: {e}")))
    }

    fn build(config: &MetricsConfig) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "stowage_request_duration_seconds",
                "Object store operation latency in seconds",
            )
            .buckets(config.latency_buckets.clone()),
            &["operation", "status", "app_name", "host_name"],
        )?;
        let requests = IntCounterVec::new(
            Opts::new("stowage_requests_total", "Total object store operations"),
            &["operation", "status", "app_name", "host_name"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("stowage_errors_total", "Failed object store operations by error type"),
            &["operation", "error_type", "app_name", "host_name"],
        )?;
        let bytes_transferred = IntCounterVec::new(
            Opts::new("stowage_bytes_transferred_total", "Object body bytes moved"),
            &["operation"],
        )?;

        let connections_opened = IntCounter::new(
            "stowage_connections_opened_total",
            "Connection handles created",
        )?;
        let connections_active =
            IntGauge::new("stowage_connections_active", "Live connection handles")?;

        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(bytes_transferred.clone()))?;
        registry.register(Box::new(connections_opened.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;

        Ok(Self {
            registry,
            app_name: config.app_name.clone(),
            host_name: config.host_name.clone(),
            request_duration,
            requests,
            errors,
            bytes_transferred,
            connections_opened,
            connections_active,
        })
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| StowageError::Config(format!("metrics encoding: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| StowageError::Config(format!("metrics encoding: {e}")))
    }
}

impl OperationHook for Metrics {
    fn on_finish(
        &self,
        event: &OperationEvent<'_>,
        outcome: &Outcome<'_>,
        elapsed: Duration,
    ) -> HookResult {
        let operation = event.operation.as_str();
        let labels: [&str; 4] = [
            operation,
            outcome.status(),
            self.app_name.as_str(),
            self.host_name.as_str(),
        ];

        self.requests
            .get_metric_with_label_values(&labels)
            .map_err(|e| HookError(e.to_string()))?
            .inc();
        self.request_duration
            .get_metric_with_label_values(&labels)
            .map_err(|e| HookError(e.to_string()))?
            .observe(elapsed.as_secs_f64());

        match outcome {
            Outcome::Success {
                bytes: Some(bytes), ..
            } => {
                self.bytes_transferred
                    .get_metric_with_label_values(&[operation])
                    .map_err(|e| HookError(e.to_string()))?
                    .inc_by(*bytes);
            }
            Outcome::Success { bytes: None, .. } => {}
            Outcome::Failure { error } => {
                self.errors
                    .get_metric_with_label_values(&[
                        operation,
                        error.kind().as_str(),
                        self.app_name.as_str(),
                        self.host_name.as_str(),
                    ])
                    .map_err(|e| HookError(e.to_string()))?
                    .inc();
            }
        }

        Ok(())
    }

    fn on_connection(&self, event: &ConnectionEvent) -> HookResult {
        match event {
            ConnectionEvent::Opened { .. } => {
                self.connections_opened.inc();
                self.connections_active.inc();
            }
            ConnectionEvent::Closed { .. } => self.connections_active.dec(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Operation;

    fn config() -> MetricsConfig {
        MetricsConfig {
            app_name: "test-app".to_string(),
            host_name: "test-host".to_string(),
            ..MetricsConfig::default()
        }
    }

    fn event() -> OperationEvent<'static> {
        OperationEvent {
            operation: Operation::Upload,
            bucket: "b",
            key: "k",
            trace: None,
            input: "5 bytes in memory",
        }
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new(&config()).unwrap();
        metrics
            .on_finish(
                &event(),
                &Outcome::Success {
                    output: "etag",
                    bytes: Some(5),
                },
                Duration::from_millis(12),
            )
            .unwrap();

        let output = metrics.gather().unwrap();
        assert!(output.contains("stowage_requests_total"));
        assert!(output.contains("stowage_request_duration_seconds"));
        assert!(output.contains(r#"app_name="test-app""#));
        assert!(output.contains(r#"stowage_bytes_transferred_total{operation="upload"} 5"#));
    }

    #[test]
    fn test_errors_labelled_by_kind() {
        let metrics = Metrics::new(&config()).unwrap();
        let err = StowageError::InvalidArgument("ttl".to_string());
        metrics
            .on_finish(&event(), &Outcome::Failure { error: &err }, Duration::ZERO)
            .unwrap();

        let count = metrics
            .errors
            .with_label_values(&["upload", "invalid_argument", "test-app", "test-host"])
            .get();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_connection_gauge() {
        let metrics = Metrics::new(&config()).unwrap();
        metrics
            .on_connection(&ConnectionEvent::Opened {
                generation: 1,
                endpoint: "memory://".to_string(),
            })
            .unwrap();
        metrics
            .on_connection(&ConnectionEvent::Closed { generation: 1 })
            .unwrap();

        assert_eq!(metrics.connections_opened.get(), 1);
        assert_eq!(metrics.connections_active.get(), 0);
    }
}
