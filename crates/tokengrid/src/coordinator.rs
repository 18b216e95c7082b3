//! Stream coordinator: lifecycle state machine and usage accounting.
//!
//! Owns the stream table exclusively. Close paths run as one critical
//! section over the stream table and the registry (lock order is always
//! streams, then registry), so the settlement credit, the registry status
//! flip and the stream's terminal transition commit together. If any step
//! cannot complete the stream stays `Active` and the caller retries.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ads::AdLedger;
use crate::error::{MarketError, Result};
use crate::provider::ProviderId;
use crate::registry::ProviderRegistry;
use crate::stream::{Stream, StreamId, StreamStatus, StreamSummary};

#[derive(Debug, Default)]
struct StreamTable {
    active: HashMap<StreamId, Stream>,
    /// Closed streams, immutable, retained for analytics
    history: HashMap<StreamId, Stream>,
}

/// Coordinator for the stream lifecycle: `Active -> {Completed, Failed}`.
pub struct StreamCoordinator {
    registry: Arc<ProviderRegistry>,
    ads: Arc<AdLedger>,
    /// Fraction of stream token revenue attributed to the revenue ledger
    revenue_share: f64,
    streams: Mutex<StreamTable>,
}

impl StreamCoordinator {
    pub fn new(registry: Arc<ProviderRegistry>, ads: Arc<AdLedger>, revenue_share: f64) -> Self {
        Self {
            registry,
            ads,
            revenue_share: revenue_share.clamp(0.0, 1.0),
            streams: Mutex::new(StreamTable::default()),
        }
    }

    /// Admit a provider and create its stream. The only creation path.
    ///
    /// The registry's atomic `Idle -> Streaming` check-and-set decides the
    /// winner when two callers race on the same provider; the loser gets
    /// `ProviderBusy` and should re-run the matcher.
    pub fn start(
        &self,
        provider_id: ProviderId,
        model: &str,
        quality_tier: &str,
    ) -> Result<StreamId> {
        let provider = self.registry.get(provider_id)?;
        if !provider.supports_model(model) {
            return Err(MarketError::ModelUnsupported {
                provider_id,
                model: model.to_string(),
            });
        }

        let stream = Stream::new(provider_id, model, quality_tier);
        let stream_id = stream.id;

        let mut table = self.streams.lock();
        self.registry.mark_streaming(provider_id, stream_id)?;
        table.active.insert(stream_id, stream);

        info!(stream_id = %stream_id, provider_id = %provider_id, model, "stream started");
        Ok(stream_id)
    }

    /// Fold a usage report into an active stream.
    ///
    /// Negative deltas and negative latencies are caller errors, rejected
    /// as `InvalidUsage` without touching the counters.
    pub fn record_usage(
        &self,
        stream_id: StreamId,
        tokens_delta: i64,
        latency_ms: f64,
    ) -> Result<()> {
        if tokens_delta < 0 {
            return Err(MarketError::invalid_usage(
                stream_id,
                format!("negative token delta {tokens_delta}"),
            ));
        }
        if latency_ms < 0.0 || !latency_ms.is_finite() {
            return Err(MarketError::invalid_usage(
                stream_id,
                format!("invalid latency {latency_ms}"),
            ));
        }

        let mut table = self.streams.lock();
        let stream = Self::active_mut(&mut table, stream_id)?;
        stream.apply_usage(tokens_delta as u64, latency_ms);
        Ok(())
    }

    /// Close a stream normally and settle its economics.
    ///
    /// Idempotent-unsafe by design: a second call on the same stream gets
    /// `StreamNotActive` and never double-credits the provider.
    pub fn stop(
        &self,
        provider_id: ProviderId,
        stream_id: StreamId,
    ) -> Result<StreamSummary> {
        let earnings;
        let summary;
        {
            let mut table = self.streams.lock();
            let stream = Self::active_mut(&mut table, stream_id)?;
            if stream.provider_id != provider_id {
                return Err(MarketError::OwnershipMismatch {
                    stream_id,
                    provider_id,
                });
            }

            // Price read and settlement happen while the stream is still
            // Active; a registry failure here leaves it Active for retry.
            let provider = self.registry.get(provider_id)?;
            let tokens = stream.tokens_processed;
            earnings = tokens as f64 * provider.price_per_token;

            self.registry.record_settlement(provider_id, tokens, earnings)?;
            self.registry.mark_idle(provider_id)?;

            summary = Self::finalize(&mut table, stream_id, StreamStatus::Completed, earnings);
        }

        if let Some(summary) = &summary {
            info!(
                stream_id = %stream_id,
                provider_id = %provider_id,
                tokens = summary.tokens_processed,
                earnings,
                "stream completed"
            );
        }
        self.attribute_share(earnings);

        summary.ok_or(MarketError::StreamNotFound { stream_id })
    }

    /// Administrative failure path, used when a provider disappears
    /// mid-stream (invoked by an external watchdog; the core has no
    /// timeout machinery).
    ///
    /// Reconciles the registry back to `Idle` and credits only the tokens
    /// already recorded via `record_usage`, nothing beyond.
    pub fn fail(&self, stream_id: StreamId, reason: &str) -> Result<StreamSummary> {
        let earnings;
        let summary;
        {
            let mut table = self.streams.lock();
            let stream = Self::active_mut(&mut table, stream_id)?;
            let provider_id = stream.provider_id;

            let provider = self.registry.get(provider_id)?;
            let tokens = stream.tokens_processed;
            earnings = tokens as f64 * provider.price_per_token;

            self.registry.record_settlement(provider_id, tokens, earnings)?;
            self.registry.mark_idle(provider_id)?;

            summary = Self::finalize(
                &mut table,
                stream_id,
                StreamStatus::Failed {
                    reason: reason.to_string(),
                },
                earnings,
            );
            warn!(stream_id = %stream_id, provider_id = %provider_id, reason, "stream failed");
        }

        self.attribute_share(earnings);
        summary.ok_or(MarketError::StreamNotFound { stream_id })
    }

    /// Look up a stream in either the active table or history.
    pub fn get_stream(&self, stream_id: StreamId) -> Option<Stream> {
        let table = self.streams.lock();
        table
            .active
            .get(&stream_id)
            .or_else(|| table.history.get(&stream_id))
            .cloned()
    }

    pub fn active_count(&self) -> usize {
        self.streams.lock().active.len()
    }

    /// Snapshot of closed streams, for analytics rollups.
    pub fn history_snapshot(&self) -> Vec<Stream> {
        self.streams.lock().history.values().cloned().collect()
    }

    /// Snapshot of in-flight streams.
    pub fn active_snapshot(&self) -> Vec<Stream> {
        self.streams.lock().active.values().cloned().collect()
    }

    fn active_mut(table: &mut StreamTable, stream_id: StreamId) -> Result<&mut Stream> {
        if table.history.contains_key(&stream_id) {
            // Already terminal, and terminal states are final.
            return Err(MarketError::StreamNotActive { stream_id });
        }
        table
            .active
            .get_mut(&stream_id)
            .ok_or(MarketError::StreamNotFound { stream_id })
    }

    /// Move a stream from the active table into history with its terminal
    /// status, producing the economic summary.
    fn finalize(
        table: &mut StreamTable,
        stream_id: StreamId,
        status: StreamStatus,
        earnings: f64,
    ) -> Option<StreamSummary> {
        let mut stream = table.active.remove(&stream_id)?;
        stream.status = status;
        stream.ended_at = Some(chrono::Utc::now());
        stream.accrued_revenue = earnings;

        let duration_ms = stream.duration_ms();
        let tokens_per_second = if duration_ms > 0 {
            stream.tokens_processed as f64 * 1000.0 / duration_ms as f64
        } else {
            0.0
        };

        let summary = StreamSummary {
            stream_id,
            provider_id: stream.provider_id,
            tokens_processed: stream.tokens_processed,
            earnings,
            duration_ms,
            tokens_per_second,
        };
        table.history.insert(stream_id, stream);
        Some(summary)
    }

    fn attribute_share(&self, earnings: f64) {
        let share = earnings * self.revenue_share;
        if share > 0.0 {
            self.ads.attribute_inference_revenue(share);
        }
    }
}
