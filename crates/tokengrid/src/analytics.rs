//! Read-only rollups over the registry, stream history and revenue ledger.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ads::AdLedger;
use crate::coordinator::StreamCoordinator;
use crate::provider::ProviderId;
use crate::registry::ProviderRegistry;
use crate::stream::StreamStatus;

/// Headline system counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub total_providers: usize,
    pub idle_providers: usize,
    pub streaming_providers: usize,
    pub active_streams: usize,
    /// Grand total across ad and attributed inference revenue
    pub total_revenue: f64,
}

/// One provider-leaderboard entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEarnings {
    pub provider_id: ProviderId,
    pub device: String,
    pub total_earnings: f64,
    pub total_tokens_served: u64,
}

/// Aggregates over closed streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamHistoryStats {
    pub completed: u64,
    pub failed: u64,
    pub total_tokens: u64,
    pub total_stream_revenue: f64,
    /// Mean of per-stream average latencies over completed streams
    pub average_latency_ms: f64,
}

/// One day of unified revenue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRevenue {
    pub date: NaiveDate,
    pub amount: f64,
}

/// Read-only analytics over the market's components.
///
/// Holds no state of its own; every call takes fresh snapshots through the
/// owning components' public operations.
pub struct MarketAnalytics<'a> {
    registry: &'a ProviderRegistry,
    coordinator: &'a StreamCoordinator,
    ads: &'a AdLedger,
}

impl<'a> MarketAnalytics<'a> {
    pub fn new(
        registry: &'a ProviderRegistry,
        coordinator: &'a StreamCoordinator,
        ads: &'a AdLedger,
    ) -> Self {
        Self {
            registry,
            coordinator,
            ads,
        }
    }

    pub fn system_status(&self) -> SystemStatus {
        let (idle, streaming) = self.registry.status_counts();
        SystemStatus {
            total_providers: self.registry.len(),
            idle_providers: idle,
            streaming_providers: streaming,
            active_streams: self.coordinator.active_count(),
            total_revenue: self.ads.revenue().grand_total,
        }
    }

    /// Top `n` providers by lifetime earnings.
    pub fn top_providers(&self, n: usize) -> Vec<ProviderEarnings> {
        let mut providers = self.registry.snapshot();
        providers.sort_by(|a, b| b.total_earnings.total_cmp(&a.total_earnings));
        providers
            .into_iter()
            .take(n)
            .map(|p| ProviderEarnings {
                provider_id: p.id,
                device: p.hardware.name,
                total_earnings: p.total_earnings,
                total_tokens_served: p.total_tokens_served,
            })
            .collect()
    }

    pub fn stream_history(&self) -> StreamHistoryStats {
        let history = self.coordinator.history_snapshot();
        let mut stats = StreamHistoryStats::default();
        let mut latency_sum = 0.0;
        let mut completed_with_usage = 0u64;

        for stream in &history {
            match stream.status {
                StreamStatus::Completed => {
                    stats.completed += 1;
                    if stream.usage_events > 0 {
                        latency_sum += stream.observed_latency_ms;
                        completed_with_usage += 1;
                    }
                }
                StreamStatus::Failed { .. } => stats.failed += 1,
                StreamStatus::Active => {}
            }
            stats.total_tokens += stream.tokens_processed;
            stats.total_stream_revenue += stream.accrued_revenue;
        }

        if completed_with_usage > 0 {
            stats.average_latency_ms = latency_sum / completed_with_usage as f64;
        }
        stats
    }

    /// Unified revenue by UTC day, oldest first.
    pub fn revenue_by_day(&self) -> Vec<DailyRevenue> {
        self.ads
            .revenue()
            .daily_totals
            .into_iter()
            .map(|(date, amount)| DailyRevenue { date, amount })
            .collect()
    }
}
