//! Market configuration.

use serde::{Deserialize, Serialize};

use crate::ads::DEFAULT_AD_COOLDOWN_MS;

/// Configurable options for the market service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Cooldown before the same ad is preferred again, in milliseconds
    pub ad_cooldown_ms: i64,

    /// Fraction of stream token revenue attributed to the unified revenue
    /// ledger at close, in [0, 1]
    pub inference_revenue_share: f64,

    /// Static quality-tier multiplier table, used when no external oracle
    /// is wired in. Each entry is `(tier, multiplier)` with multiplier > 0.
    pub quality_tiers: Vec<(String, f64)>,

    /// Multiplier for tiers absent from the table
    pub fallback_quality_multiplier: f64,

    /// Upper bound on matcher re-runs when admission races are lost
    pub max_admission_attempts: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            ad_cooldown_ms: DEFAULT_AD_COOLDOWN_MS,
            inference_revenue_share: 0.05,
            quality_tiers: vec![
                ("economy".to_string(), 0.8),
                ("standard".to_string(), 1.0),
                ("premium".to_string(), 1.5),
            ],
            fallback_quality_multiplier: 1.0,
            max_admission_attempts: 4,
        }
    }
}
