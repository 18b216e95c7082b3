//! Provider identity, capability and status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::stream::StreamId;

/// Opaque provider identifier, assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(Uuid);

impl ProviderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProviderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hardware profile a provider advertises at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// Human-readable device name (e.g. "RTX 4090")
    pub name: String,
    /// Video memory in gigabytes
    pub vram_gb: u32,
    /// Number of compute cores
    pub core_count: u32,
}

/// Provider availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    /// Registered and ready to accept a stream
    Idle,
    /// Serving exactly one active stream
    Streaming,
    /// Deregistered; retained only in history
    Removed,
}

/// One compute contributor offering model-serving capacity at a declared
/// price.
///
/// Status and `current_stream` are mutated only through the registry;
/// earnings accumulate only when a stream closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub hardware: HardwareProfile,
    /// Models this provider can serve
    pub supported_models: HashSet<String>,
    /// Declared price per generated token, always > 0
    pub price_per_token: f64,
    pub status: ProviderStatus,
    /// Stream currently bound to this provider, set iff `status == Streaming`
    pub current_stream: Option<StreamId>,
    /// Lifetime earnings credited at stream close
    pub total_earnings: f64,
    /// Lifetime tokens served across closed streams
    pub total_tokens_served: u64,
    pub registered_at: DateTime<Utc>,
}

impl Provider {
    pub fn new(
        hardware: HardwareProfile,
        supported_models: HashSet<String>,
        price_per_token: f64,
    ) -> Self {
        Self {
            id: ProviderId::new(),
            hardware,
            supported_models,
            price_per_token,
            status: ProviderStatus::Idle,
            current_stream: None,
            total_earnings: 0.0,
            total_tokens_served: 0,
            registered_at: Utc::now(),
        }
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.supported_models.contains(model)
    }

    /// Historical earnings-per-token ratio, used as a trust signal in
    /// scoring. New providers sit at the neutral baseline of 1.0.
    pub fn reliability_factor(&self) -> f64 {
        if self.total_tokens_served > 0 {
            self.total_earnings / self.total_tokens_served as f64
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hardware() -> HardwareProfile {
        HardwareProfile {
            name: "test-gpu".to_string(),
            vram_gb: 16,
            core_count: 8,
        }
    }

    #[test]
    fn test_new_provider_is_idle() {
        let p = Provider::new(hardware(), HashSet::from(["m1".to_string()]), 0.0001);
        assert_eq!(p.status, ProviderStatus::Idle);
        assert!(p.current_stream.is_none());
        assert_eq!(p.total_tokens_served, 0);
        assert!(p.supports_model("m1"));
        assert!(!p.supports_model("m2"));
    }

    #[test]
    fn test_reliability_factor_neutral_when_unproven() {
        let mut p = Provider::new(hardware(), HashSet::from(["m1".to_string()]), 0.0001);
        assert_eq!(p.reliability_factor(), 1.0);

        p.total_tokens_served = 1000;
        p.total_earnings = 0.1;
        assert!((p.reliability_factor() - 0.0001).abs() < f64::EPSILON);
    }
}
