//! Provider matching: read-only scoring and admission selection.
//!
//! `find_provider` never mutates registry state, so concurrent lookups do
//! not block each other. The subsequent `mark_streaming` is the atomic
//! point of admission; a caller whose check-and-set loses must re-run the
//! matcher rather than assume the provider is still available.

use tracing::debug;

use crate::error::{MarketError, Result};
use crate::provider::Provider;
use crate::registry::ProviderRegistry;

/// Quality multiplier lookup, consumed as an external oracle.
pub trait QualityOracle: Send + Sync {
    /// Multiplier for a requested quality tier, always > 0.
    fn multiplier(&self, tier: &str) -> f64;
}

/// Static tier table, used when no external oracle is wired in.
#[derive(Debug, Clone)]
pub struct StaticQualityOracle {
    tiers: Vec<(String, f64)>,
    fallback: f64,
}

impl StaticQualityOracle {
    pub fn new(tiers: Vec<(String, f64)>, fallback: f64) -> Self {
        Self { tiers, fallback }
    }
}

impl Default for StaticQualityOracle {
    fn default() -> Self {
        Self {
            tiers: vec![
                ("economy".to_string(), 0.8),
                ("standard".to_string(), 1.0),
                ("premium".to_string(), 1.5),
            ],
            fallback: 1.0,
        }
    }
}

impl QualityOracle for StaticQualityOracle {
    fn multiplier(&self, tier: &str) -> f64 {
        self.tiers
            .iter()
            .find(|(name, _)| name == tier)
            .map(|(_, m)| *m)
            .unwrap_or(self.fallback)
    }
}

/// Score one candidate for admission.
///
/// The score blends raw capability, price efficiency, track record and the
/// tier multiplier:
///
/// ```text
/// hardware         = vram_gb * 10 + core_count * 5
/// price_efficiency = ln(1 + 1000 / price_per_token)
/// score            = hardware + price_efficiency * reliability * multiplier
/// ```
///
/// The price-efficiency term is log-compressed so that raw `1/price` (which
/// sits many orders of magnitude above the hardware units at realistic
/// per-token prices) cannot drown out capability. It stays strictly
/// decreasing in price, so between two otherwise-identical providers the
/// cheaper one always scores higher, and strictly increasing in VRAM and
/// core count.
pub fn score_provider(provider: &Provider, quality_multiplier: f64) -> f64 {
    let hardware =
        f64::from(provider.hardware.vram_gb) * 10.0 + f64::from(provider.hardware.core_count) * 5.0;
    let price_efficiency = (1.0 + 1000.0 / provider.price_per_token).ln();
    hardware + price_efficiency * provider.reliability_factor() * quality_multiplier
}

/// Matcher over a registry and a quality oracle. Read-only by design.
pub struct Matcher<'a> {
    registry: &'a ProviderRegistry,
    oracle: &'a dyn QualityOracle,
}

impl<'a> Matcher<'a> {
    pub fn new(registry: &'a ProviderRegistry, oracle: &'a dyn QualityOracle) -> Self {
        Self { registry, oracle }
    }

    /// Select the best idle, capable provider for `model` at `quality_tier`.
    ///
    /// Deterministic given identical registry state: strictly highest score
    /// wins, ties broken by lowest price, then earliest registration
    /// (oldest first, rewarding stable providers).
    pub fn find_provider(&self, model: &str, quality_tier: &str) -> Result<Provider> {
        let candidates = self.registry.list_idle_capable(model);
        if candidates.is_empty() {
            return Err(MarketError::NoProviderAvailable {
                model: model.to_string(),
            });
        }

        let multiplier = self.oracle.multiplier(quality_tier);
        let best = candidates
            .into_iter()
            .map(|p| (score_provider(&p, multiplier), p))
            .max_by(|(score_a, a), (score_b, b)| {
                score_a
                    .total_cmp(score_b)
                    // Lower price wins a tie, so compare reversed.
                    .then_with(|| b.price_per_token.total_cmp(&a.price_per_token))
                    // Older registration wins a tie, so compare reversed.
                    .then_with(|| b.registered_at.cmp(&a.registered_at))
            });

        match best {
            Some((score, provider)) => {
                debug!(
                    provider_id = %provider.id,
                    model,
                    quality_tier,
                    score,
                    "matched provider"
                );
                Ok(provider)
            }
            None => Err(MarketError::NoProviderAvailable {
                model: model.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{HardwareProfile, ProviderStatus};
    use std::collections::HashSet;

    fn hardware(vram_gb: u32, core_count: u32) -> HardwareProfile {
        HardwareProfile {
            name: "test-gpu".to_string(),
            vram_gb,
            core_count,
        }
    }

    fn models(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn provider(vram_gb: u32, core_count: u32, price: f64) -> Provider {
        Provider::new(hardware(vram_gb, core_count), models(&["m1"]), price)
    }

    #[test]
    fn test_lower_price_scores_higher() {
        let cheap = provider(8, 4, 0.00005);
        let pricey = provider(8, 4, 0.0001);
        assert!(score_provider(&cheap, 1.0) > score_provider(&pricey, 1.0));
    }

    #[test]
    fn test_more_vram_scores_higher() {
        let big = provider(24, 4, 0.0001);
        let small = provider(8, 4, 0.0001);
        assert!(score_provider(&big, 1.0) > score_provider(&small, 1.0));
    }

    #[test]
    fn test_scenario_high_vram_beats_half_price() {
        // P1 {vram 24, price 0.0001} vs P2 {vram 8, price 0.00005}, equal
        // cores, neutral reliability, multiplier fixed at 1.0.
        let p1 = provider(24, 8, 0.0001);
        let p2 = provider(8, 8, 0.00005);

        let s1 = score_provider(&p1, 1.0);
        let s2 = score_provider(&p2, 1.0);

        let expected1 = (24.0 * 10.0 + 8.0 * 5.0) + (1.0_f64 + 1000.0 / 0.0001).ln();
        let expected2 = (8.0 * 10.0 + 8.0 * 5.0) + (1.0_f64 + 1000.0 / 0.00005).ln();
        assert_eq!(s1, expected1);
        assert_eq!(s2, expected2);
        assert!(s1 > s2, "hardware term must dominate: {s1} vs {s2}");
    }

    #[test]
    fn test_find_provider_empty_pool() {
        let registry = ProviderRegistry::new();
        let oracle = StaticQualityOracle::default();
        let matcher = Matcher::new(&registry, &oracle);

        let err = matcher.find_provider("m1", "standard").unwrap_err();
        assert!(matches!(err, MarketError::NoProviderAvailable { .. }));
    }

    #[test]
    fn test_find_provider_picks_highest_score() {
        let registry = ProviderRegistry::new();
        let oracle = StaticQualityOracle::default();

        registry
            .register(hardware(8, 8), models(&["m1"]), 0.00005)
            .unwrap();
        let big = registry
            .register(hardware(24, 8), models(&["m1"]), 0.0001)
            .unwrap();

        let matcher = Matcher::new(&registry, &oracle);
        let chosen = matcher.find_provider("m1", "standard").unwrap();
        assert_eq!(chosen.id, big);

        // Matching is read-only: the chosen provider is still idle.
        assert_eq!(registry.get(big).unwrap().status, ProviderStatus::Idle);
    }

    #[test]
    fn test_tie_broken_by_price_then_age() {
        let registry = ProviderRegistry::new();
        let oracle = StaticQualityOracle::default();

        // Identical hardware; the cheaper provider has the higher score
        // outright, so force an exact tie with identical pricing and rely
        // on registration order.
        let older = registry
            .register(hardware(8, 8), models(&["m1"]), 0.0001)
            .unwrap();
        let _newer = registry
            .register(hardware(8, 8), models(&["m1"]), 0.0001)
            .unwrap();

        let matcher = Matcher::new(&registry, &oracle);
        let chosen = matcher.find_provider("m1", "standard").unwrap();
        assert_eq!(chosen.id, older);
    }

    #[test]
    fn test_unknown_tier_uses_fallback_multiplier() {
        let oracle = StaticQualityOracle::default();
        assert_eq!(oracle.multiplier("standard"), 1.0);
        assert_eq!(oracle.multiplier("premium"), 1.5);
        assert_eq!(oracle.multiplier("no-such-tier"), 1.0);
    }
}
