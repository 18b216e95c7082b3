//! Tokengrid: a marketplace scheduler for distributed LLM inference.
//!
//! Matches inference requests against a pool of independently owned,
//! heterogeneous compute providers, tracks the lifecycle and usage of each
//! resulting stream, and reconciles per-token costs against an
//! advertising-supported revenue stream.
//!
//! ## Core Types
//!
//! - [`Provider`] - A compute contributor and its capability record
//! - [`ProviderRegistry`] - Source of truth for provider status
//! - [`Matcher`] - Read-only scoring and admission selection
//! - [`Stream`] / [`StreamCoordinator`] - Stream lifecycle and accounting
//! - [`AdLedger`] - Sponsorable inventory and revenue accounting
//! - [`MarketService`] - The assembled facade exposed to API layers
//!
//! ## External seams
//!
//! - [`QualityOracle`] - Quality-tier multiplier lookup
//! - [`TransportHooks`] - Fire-and-forget provider/client notifications
//!
//! ## Analytics
//!
//! - [`MarketAnalytics`] - Read-only rollups over registry, streams, ledger
//! - [`SystemStatus`] - Headline counters

pub mod ads;
pub mod analytics;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod matcher;
pub mod provider;
pub mod registry;
pub mod service;
pub mod stream;

pub use ads::{
    Ad, AdLedger, RevenueLedger, UserPreference, compute_relevance, extract_keywords,
    splice_ad_into_prompt,
};
pub use analytics::{
    DailyRevenue, MarketAnalytics, ProviderEarnings, StreamHistoryStats, SystemStatus,
};
pub use config::MarketConfig;
pub use coordinator::StreamCoordinator;
pub use error::{MarketError, Result};
pub use matcher::{Matcher, QualityOracle, StaticQualityOracle, score_provider};
pub use provider::{HardwareProfile, Provider, ProviderId, ProviderStatus};
pub use registry::ProviderRegistry;
pub use service::{
    MarketService, NoopTransport, ProviderEvent, StreamAdmission, TransportHooks,
};
pub use stream::{Stream, StreamId, StreamStatus, StreamSummary};
