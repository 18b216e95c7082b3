//! Market service facade: the surface exposed to dashboards and API layers.
//!
//! State mutations commit inside the owning components' short critical
//! sections; transport notifications are awaited strictly afterwards, so
//! logically concurrent requests interleave only between complete state
//! transitions. Notification failures are logged and never roll back
//! committed state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ads::{AdLedger, UserPreference, extract_keywords, splice_ad_into_prompt};
use crate::analytics::{
    DailyRevenue, MarketAnalytics, ProviderEarnings, StreamHistoryStats, SystemStatus,
};
use crate::config::MarketConfig;
use crate::coordinator::StreamCoordinator;
use crate::error::{MarketError, Result};
use crate::matcher::{Matcher, QualityOracle, StaticQualityOracle};
use crate::provider::{HardwareProfile, ProviderId};
use crate::registry::ProviderRegistry;
use crate::stream::{StreamId, StreamSummary};

/// Events pushed to a provider over the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderEvent {
    /// The provider was admitted for a new stream
    StreamStarted { stream_id: StreamId, model: String },
    /// Its stream closed normally
    StreamStopped { stream_id: StreamId, earnings: f64 },
    /// Its stream was failed administratively
    StreamFailed { stream_id: StreamId, reason: String },
    /// The provider was removed from the market
    Removed,
}

/// Fire-and-forget transport hooks, invoked after each state commit.
#[async_trait]
pub trait TransportHooks: Send + Sync {
    async fn notify_provider(&self, provider_id: ProviderId, event: ProviderEvent) -> Result<()>;
    async fn notify_client(&self, stream_id: StreamId, payload: &str) -> Result<()>;
}

/// Default transport that drops every notification.
#[derive(Debug, Default)]
pub struct NoopTransport;

#[async_trait]
impl TransportHooks for NoopTransport {
    async fn notify_provider(&self, _provider_id: ProviderId, _event: ProviderEvent) -> Result<()> {
        Ok(())
    }

    async fn notify_client(&self, _stream_id: StreamId, _payload: &str) -> Result<()> {
        Ok(())
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamAdmission {
    pub stream_id: StreamId,
    pub provider_id: ProviderId,
}

/// The assembled market: registry, matcher, coordinator, ad ledger.
pub struct MarketService {
    config: MarketConfig,
    registry: Arc<ProviderRegistry>,
    ads: Arc<AdLedger>,
    coordinator: Arc<StreamCoordinator>,
    oracle: Arc<dyn QualityOracle>,
    transport: Arc<dyn TransportHooks>,
}

impl MarketService {
    pub fn new(config: MarketConfig) -> Self {
        let oracle = Arc::new(StaticQualityOracle::new(
            config.quality_tiers.clone(),
            config.fallback_quality_multiplier,
        ));
        Self::with_parts(config, oracle, Arc::new(NoopTransport))
    }

    /// Assemble the service with an external oracle and transport.
    pub fn with_parts(
        config: MarketConfig,
        oracle: Arc<dyn QualityOracle>,
        transport: Arc<dyn TransportHooks>,
    ) -> Self {
        let registry = Arc::new(ProviderRegistry::new());
        let ads = Arc::new(AdLedger::with_cooldown(config.ad_cooldown_ms));
        let coordinator = Arc::new(StreamCoordinator::new(
            registry.clone(),
            ads.clone(),
            config.inference_revenue_share,
        ));
        Self {
            config,
            registry,
            ads,
            coordinator,
            oracle,
            transport,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn ads(&self) -> &AdLedger {
        &self.ads
    }

    pub fn coordinator(&self) -> &StreamCoordinator {
        &self.coordinator
    }

    // --- Provider surface ---

    pub fn register_provider(
        &self,
        hardware: HardwareProfile,
        supported_models: HashSet<String>,
        price_per_token: f64,
    ) -> Result<ProviderId> {
        self.registry
            .register(hardware, supported_models, price_per_token)
    }

    /// Remove a provider, force-failing its active stream first.
    pub async fn remove_provider(&self, provider_id: ProviderId) -> Result<()> {
        let provider = self.registry.get(provider_id)?;
        if let Some(stream_id) = provider.current_stream {
            self.coordinator.fail(stream_id, "provider removed")?;
        }
        self.registry.remove(provider_id)?;
        self.notify_provider(provider_id, ProviderEvent::Removed).await;
        Ok(())
    }

    // --- Stream surface ---

    /// Match and admit a provider for an inference request.
    ///
    /// Matching is read-only; admission is the registry's atomic
    /// check-and-set. When the check-and-set loses a race the matcher is
    /// re-run against fresh registry state, bounded by
    /// `max_admission_attempts`.
    pub async fn request_stream(&self, model: &str, quality_tier: &str) -> Result<StreamAdmission> {
        let mut last_busy = None;
        for attempt in 0..self.config.max_admission_attempts.max(1) {
            let matcher = Matcher::new(&self.registry, self.oracle.as_ref());
            let candidate = matcher.find_provider(model, quality_tier)?;

            match self.coordinator.start(candidate.id, model, quality_tier) {
                Ok(stream_id) => {
                    self.notify_provider(
                        candidate.id,
                        ProviderEvent::StreamStarted {
                            stream_id,
                            model: model.to_string(),
                        },
                    )
                    .await;
                    return Ok(StreamAdmission {
                        stream_id,
                        provider_id: candidate.id,
                    });
                }
                Err(err @ MarketError::ProviderBusy { .. }) => {
                    debug!(
                        provider_id = %candidate.id,
                        attempt,
                        "admission race lost, re-running matcher"
                    );
                    last_busy = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        // Every attempt lost its race; surface this as "no capacity" so
        // the caller applies its own backpressure policy.
        debug!(model, ?last_busy, "admission attempts exhausted");
        Err(MarketError::NoProviderAvailable {
            model: model.to_string(),
        })
    }

    /// Report metered usage for an active stream.
    pub async fn report_usage(
        &self,
        stream_id: StreamId,
        tokens_delta: i64,
        latency_ms: f64,
    ) -> Result<()> {
        self.coordinator
            .record_usage(stream_id, tokens_delta, latency_ms)?;

        let ack = format!("usage:{tokens_delta}");
        if let Err(err) = self.transport.notify_client(stream_id, &ack).await {
            warn!(stream_id = %stream_id, %err, "client notification failed");
        }
        Ok(())
    }

    /// Close a stream and settle its economics.
    pub async fn end_stream(
        &self,
        provider_id: ProviderId,
        stream_id: StreamId,
    ) -> Result<StreamSummary> {
        let summary = self.coordinator.stop(provider_id, stream_id)?;
        self.notify_provider(
            provider_id,
            ProviderEvent::StreamStopped {
                stream_id,
                earnings: summary.earnings,
            },
        )
        .await;
        Ok(summary)
    }

    /// Administrative failure path for a stream whose provider stopped
    /// reporting back (driven by an external watchdog).
    pub async fn fail_stream(&self, stream_id: StreamId, reason: &str) -> Result<StreamSummary> {
        let summary = self.coordinator.fail(stream_id, reason)?;
        self.notify_provider(
            summary.provider_id,
            ProviderEvent::StreamFailed {
                stream_id,
                reason: reason.to_string(),
            },
        )
        .await;
        Ok(summary)
    }

    // --- Ad surface ---

    /// Splice the most relevant ad into a prompt.
    ///
    /// Returns the prompt unchanged when the user opted out or no ad
    /// clears the relevance floor; otherwise records the impression and
    /// returns the augmented text.
    pub fn inject_ad(&self, prompt: &str, user_id: &str) -> String {
        let prefs = self.ads.preferences_for(user_id);
        if !prefs.ads_enabled {
            return prompt.to_string();
        }

        let keywords = extract_keywords(prompt);
        match self.ads.select_ad(&keywords, user_id) {
            Some(ad) => {
                self.ads.record_impression(&ad.id);
                splice_ad_into_prompt(prompt, &ad)
            }
            None => prompt.to_string(),
        }
    }

    pub fn set_ad_preferences(&self, user_id: &str, prefs: UserPreference) {
        self.ads.set_preferences(user_id, prefs);
    }

    /// Report a click on a previously injected ad.
    pub fn record_ad_click(&self, ad_id: &str) -> bool {
        self.ads.record_click(ad_id)
    }

    // --- Analytics surface ---

    pub fn system_status(&self) -> SystemStatus {
        self.analytics().system_status()
    }

    pub fn top_providers(&self, n: usize) -> Vec<ProviderEarnings> {
        self.analytics().top_providers(n)
    }

    pub fn stream_history(&self) -> StreamHistoryStats {
        self.analytics().stream_history()
    }

    pub fn revenue_by_day(&self) -> Vec<DailyRevenue> {
        self.analytics().revenue_by_day()
    }

    fn analytics(&self) -> MarketAnalytics<'_> {
        MarketAnalytics::new(&self.registry, &self.coordinator, &self.ads)
    }

    async fn notify_provider(&self, provider_id: ProviderId, event: ProviderEvent) {
        if let Err(err) = self.transport.notify_provider(provider_id, event).await {
            warn!(provider_id = %provider_id, %err, "provider notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::Ad;
    use parking_lot::Mutex;

    fn hardware(vram_gb: u32) -> HardwareProfile {
        HardwareProfile {
            name: "test-gpu".to_string(),
            vram_gb,
            core_count: 8,
        }
    }

    fn models(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Transport double that records every provider event.
    #[derive(Default)]
    struct RecordingTransport {
        events: Mutex<Vec<(ProviderId, ProviderEvent)>>,
    }

    #[async_trait]
    impl TransportHooks for RecordingTransport {
        async fn notify_provider(
            &self,
            provider_id: ProviderId,
            event: ProviderEvent,
        ) -> Result<()> {
            self.events.lock().push((provider_id, event));
            Ok(())
        }

        async fn notify_client(&self, _stream_id: StreamId, _payload: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Transport double whose notifications always fail.
    struct FailingTransport;

    #[async_trait]
    impl TransportHooks for FailingTransport {
        async fn notify_provider(&self, _: ProviderId, _: ProviderEvent) -> Result<()> {
            Err(MarketError::transport("wire down"))
        }

        async fn notify_client(&self, _: StreamId, _: &str) -> Result<()> {
            Err(MarketError::transport("wire down"))
        }
    }

    #[tokio::test]
    async fn test_full_session_with_notifications() {
        let transport = Arc::new(RecordingTransport::default());
        let service = MarketService::with_parts(
            MarketConfig::default(),
            Arc::new(StaticQualityOracle::default()),
            transport.clone(),
        );

        let provider_id = service
            .register_provider(hardware(24), models(&["llama-3-70b"]), 0.0002)
            .unwrap();

        let admission = service.request_stream("llama-3-70b", "standard").await.unwrap();
        assert_eq!(admission.provider_id, provider_id);

        service.report_usage(admission.stream_id, 500, 120.0).await.unwrap();
        service.report_usage(admission.stream_id, 500, 80.0).await.unwrap();

        let summary = service
            .end_stream(provider_id, admission.stream_id)
            .await
            .unwrap();
        assert_eq!(summary.tokens_processed, 1000);
        assert_eq!(summary.earnings, 1000.0 * 0.0002);

        let events = transport.events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].1, ProviderEvent::StreamStarted { .. }));
        assert!(matches!(events[1].1, ProviderEvent::StreamStopped { .. }));
    }

    #[tokio::test]
    async fn test_notification_failure_never_rolls_back_state() {
        let service = MarketService::with_parts(
            MarketConfig::default(),
            Arc::new(StaticQualityOracle::default()),
            Arc::new(FailingTransport),
        );

        let provider_id = service
            .register_provider(hardware(24), models(&["m1"]), 0.0001)
            .unwrap();

        // Admission commits even though the notification fails.
        let admission = service.request_stream("m1", "standard").await.unwrap();
        assert_eq!(service.system_status().active_streams, 1);

        service.end_stream(provider_id, admission.stream_id).await.unwrap();
        assert_eq!(service.system_status().active_streams, 0);
    }

    #[tokio::test]
    async fn test_request_stream_no_capacity() {
        let service = MarketService::new(MarketConfig::default());
        let err = service.request_stream("m1", "standard").await.unwrap_err();
        assert!(matches!(err, MarketError::NoProviderAvailable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_remove_provider_force_closes_stream() {
        let service = MarketService::new(MarketConfig::default());
        let provider_id = service
            .register_provider(hardware(24), models(&["m1"]), 0.0001)
            .unwrap();

        let admission = service.request_stream("m1", "standard").await.unwrap();
        service.report_usage(admission.stream_id, 50, 10.0).await.unwrap();

        service.remove_provider(provider_id).await.unwrap();

        assert!(service.registry().get(provider_id).is_err());
        let history = service.stream_history();
        assert_eq!(history.failed, 1);
        assert_eq!(service.system_status().active_streams, 0);
    }

    #[tokio::test]
    async fn test_inject_ad_round_trip() {
        let service = MarketService::new(MarketConfig::default());
        // ctr 0.04 keeps the engagement term at 4, below the relevance
        // floor, so keyword overlap decides injection.
        service.ads().upsert_ad(Ad::new(
            "gpu-cloud",
            "cloud",
            "SpinUp GPU Cloud",
            models(&["gpu", "inference"]),
            2.0,
            0.04,
        ));

        let prompt = "Which GPU should I rent for inference? Give one answer.";
        let augmented = service.inject_ad(prompt, "u1");
        assert_ne!(augmented, prompt);
        assert!(augmented.contains("SpinUp GPU Cloud"));
        assert_eq!(service.ads().get_ad("gpu-cloud").unwrap().impressions, 1);

        // Opted-out users always get the prompt unchanged.
        service.set_ad_preferences(
            "u2",
            UserPreference {
                preferred_categories: HashSet::new(),
                ads_enabled: false,
            },
        );
        assert_eq!(service.inject_ad(prompt, "u2"), prompt);

        // Irrelevant prompts pass through untouched.
        assert_eq!(service.inject_ad("hello", "u1"), "hello");

        assert!(service.record_ad_click("gpu-cloud"));
        let revenue = service.ads().revenue();
        assert!(revenue.grand_total > 0.0);
    }
}
