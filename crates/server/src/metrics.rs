//! Prometheus metrics for the notary server.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `apostille_http_requests_total` | Counter | `operation`, `status` |
//! | `apostille_regenerations_total` | Counter | `outcome` |
//! | `apostille_timestamp_refreshes_total` | Counter | `tree` |

use std::sync::Arc;

use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};

/// Content type of the text exposition format
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Server metrics and the registry they are exported from.
///
/// Cloning is cheap; clones record into the same counters.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    requests_total: CounterVec,
    regenerations_total: CounterVec,
    timestamp_refreshes_total: CounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new(
                "apostille_http_requests_total",
                "Total TUF requests by operation and response status",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let regenerations_total = CounterVec::new(
            Opts::new(
                "apostille_regenerations_total",
                "Alternate-root regenerations by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(regenerations_total.clone()))?;

        let timestamp_refreshes_total = CounterVec::new(
            Opts::new(
                "apostille_timestamp_refreshes_total",
                "Timestamps re-signed because the snapshot moved on",
            ),
            &["tree"],
        )?;
        registry.register(Box::new(timestamp_refreshes_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            regenerations_total,
            timestamp_refreshes_total,
        })
    }

    pub fn request_completed(&self, operation: &str, status: u16) {
        let status = status.to_string();
        self.requests_total
            .with_label_values(&[operation, status.as_str()])
            .inc();
    }

    pub fn regeneration(&self, outcome: &str) {
        self.regenerations_total.with_label_values(&[outcome]).inc();
    }

    pub fn timestamp_refreshed(&self, tree: &str) {
        self.timestamp_refreshes_total
            .with_label_values(&[tree])
            .inc();
    }

    /// Encode every metric in the text exposition format
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}
