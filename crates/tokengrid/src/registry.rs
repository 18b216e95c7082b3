//! Provider registry: the single source of truth for provider status.
//!
//! The registry owns the provider table exclusively; other components
//! mutate it only through the operations below. Status transitions are
//! atomic check-and-sets under the table lock, so two callers racing to
//! admit the same provider can never both win.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::{MarketError, Result};
use crate::provider::{HardwareProfile, Provider, ProviderId, ProviderStatus};
use crate::stream::StreamId;

/// Registry for all known providers and their mutable status.
///
/// Holds no knowledge of economics: settlement figures are computed by the
/// stream coordinator and applied here mechanically.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderId, Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new provider in `Idle` status and return its id.
    pub fn register(
        &self,
        hardware: HardwareProfile,
        supported_models: HashSet<String>,
        price_per_token: f64,
    ) -> Result<ProviderId> {
        if price_per_token <= 0.0 || !price_per_token.is_finite() {
            return Err(MarketError::InvalidPricing {
                price: price_per_token,
            });
        }
        if supported_models.is_empty() {
            return Err(MarketError::EmptyCapabilitySet);
        }

        let provider = Provider::new(hardware, supported_models, price_per_token);
        let id = provider.id;
        info!(
            provider_id = %id,
            device = %provider.hardware.name,
            vram_gb = provider.hardware.vram_gb,
            price_per_token,
            "provider registered"
        );
        self.providers.write().insert(id, provider);
        Ok(id)
    }

    /// Look up a provider by id, returning a snapshot copy.
    pub fn get(&self, id: ProviderId) -> Result<Provider> {
        self.providers
            .read()
            .get(&id)
            .cloned()
            .ok_or(MarketError::ProviderNotFound { provider_id: id })
    }

    /// All idle providers capable of serving `model`.
    ///
    /// Taken under a single read lock, so the returned snapshot is
    /// consistent: no provider appears in two conflicting states.
    pub fn list_idle_capable(&self, model: &str) -> Vec<Provider> {
        self.providers
            .read()
            .values()
            .filter(|p| p.status == ProviderStatus::Idle && p.supports_model(model))
            .cloned()
            .collect()
    }

    /// Atomic `Idle -> Streaming` transition, binding `stream_id` to the
    /// provider. Fails with `ProviderBusy` if the provider is not idle.
    pub fn mark_streaming(&self, id: ProviderId, stream_id: StreamId) -> Result<()> {
        let mut providers = self.providers.write();
        let provider = providers
            .get_mut(&id)
            .ok_or(MarketError::ProviderNotFound { provider_id: id })?;

        if provider.status != ProviderStatus::Idle {
            return Err(MarketError::provider_busy(
                id,
                format!("cannot start streaming while {:?}", provider.status),
            ));
        }

        provider.status = ProviderStatus::Streaming;
        provider.current_stream = Some(stream_id);
        debug!(provider_id = %id, stream_id = %stream_id, "provider marked streaming");
        Ok(())
    }

    /// `Streaming -> Idle` transition, clearing the bound stream.
    pub fn mark_idle(&self, id: ProviderId) -> Result<()> {
        let mut providers = self.providers.write();
        let provider = providers
            .get_mut(&id)
            .ok_or(MarketError::ProviderNotFound { provider_id: id })?;

        provider.status = ProviderStatus::Idle;
        provider.current_stream = None;
        debug!(provider_id = %id, "provider marked idle");
        Ok(())
    }

    /// Apply a settlement computed by the stream coordinator: credit
    /// earnings and tokens served. Purely mechanical; the amounts are
    /// decided by the caller.
    pub fn record_settlement(&self, id: ProviderId, tokens: u64, earnings: f64) -> Result<()> {
        let mut providers = self.providers.write();
        let provider = providers
            .get_mut(&id)
            .ok_or(MarketError::ProviderNotFound { provider_id: id })?;

        provider.total_earnings += earnings;
        provider.total_tokens_served += tokens;
        debug!(
            provider_id = %id,
            tokens,
            earnings,
            total_earnings = provider.total_earnings,
            "settlement recorded"
        );
        Ok(())
    }

    /// Remove a provider from the market.
    ///
    /// Refuses a `Streaming` provider: the caller must force-close its
    /// active stream first so registry and stream state never diverge.
    pub fn remove(&self, id: ProviderId) -> Result<Provider> {
        let mut providers = self.providers.write();
        match providers.get(&id) {
            None => return Err(MarketError::ProviderNotFound { provider_id: id }),
            Some(p) if p.status == ProviderStatus::Streaming => {
                return Err(MarketError::provider_busy(
                    id,
                    "cannot remove a streaming provider; close its stream first",
                ));
            }
            Some(_) => {}
        }

        let mut removed = providers
            .remove(&id)
            .ok_or(MarketError::ProviderNotFound { provider_id: id })?;
        removed.status = ProviderStatus::Removed;
        info!(provider_id = %id, "provider removed");
        Ok(removed)
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// Snapshot of all providers, for read-only rollups.
    pub fn snapshot(&self) -> Vec<Provider> {
        self.providers.read().values().cloned().collect()
    }

    /// Count providers by status in a single pass.
    pub fn status_counts(&self) -> (usize, usize) {
        let providers = self.providers.read();
        let idle = providers
            .values()
            .filter(|p| p.status == ProviderStatus::Idle)
            .count();
        let streaming = providers
            .values()
            .filter(|p| p.status == ProviderStatus::Streaming)
            .count();
        (idle, streaming)
    }
}
