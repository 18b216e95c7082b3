//! Stream records and lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::provider::ProviderId;

/// Opaque stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stream lifecycle state.
///
/// `Active -> {Completed, Failed}`; both terminal states are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    Active,
    Completed,
    /// Terminal failure, with the administrative reason
    Failed { reason: String },
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// One admitted, metered inference session bound to exactly one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    pub provider_id: ProviderId,
    pub model: String,
    pub quality_tier: String,
    pub status: StreamStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Monotonically non-decreasing while Active
    pub tokens_processed: u64,
    /// Revenue credited to the provider when the stream closed
    pub accrued_revenue: f64,
    /// Running average of reported per-event latency
    pub observed_latency_ms: f64,
    /// Number of usage events folded into the latency average
    pub usage_events: u64,
}

impl Stream {
    pub fn new(provider_id: ProviderId, model: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            id: StreamId::new(),
            provider_id,
            model: model.into(),
            quality_tier: tier.into(),
            status: StreamStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            tokens_processed: 0,
            accrued_revenue: 0.0,
            observed_latency_ms: 0.0,
            usage_events: 0,
        }
    }

    /// Fold one usage event into the counters.
    ///
    /// Latency uses the incremental mean `new = old + (x - old) / n` so the
    /// average is exact regardless of how usage is chunked.
    pub fn apply_usage(&mut self, tokens_delta: u64, latency_ms: f64) {
        self.tokens_processed += tokens_delta;
        self.usage_events += 1;
        self.observed_latency_ms +=
            (latency_ms - self.observed_latency_ms) / self.usage_events as f64;
    }

    /// Wall-clock duration, using now for still-active streams.
    pub fn duration_ms(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Economic summary returned when a stream completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSummary {
    pub stream_id: StreamId,
    pub provider_id: ProviderId,
    pub tokens_processed: u64,
    /// `tokens_processed * price_per_token`, computed once from totals
    pub earnings: f64,
    pub duration_ms: u64,
    pub tokens_per_second: f64,
}
