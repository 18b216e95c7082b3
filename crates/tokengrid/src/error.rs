//! Market error types.

use crate::provider::ProviderId;
use crate::stream::StreamId;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, MarketError>;

/// Errors surfaced by the market core.
///
/// All variants are local and synchronous: nothing in the core retries on
/// its own. Retry policy (for example re-running the matcher after
/// `NoProviderAvailable`) belongs to the calling layer.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("provider {provider_id} not found")]
    ProviderNotFound { provider_id: ProviderId },

    #[error("stream {stream_id} not found")]
    StreamNotFound { stream_id: StreamId },

    #[error("provider {provider_id} is busy: {reason}")]
    ProviderBusy {
        provider_id: ProviderId,
        reason: String,
    },

    #[error("provider {provider_id} does not support model `{model}`")]
    ModelUnsupported {
        provider_id: ProviderId,
        model: String,
    },

    #[error("invalid price per token {price}: must be > 0")]
    InvalidPricing { price: f64 },

    #[error("provider declared no supported models")]
    EmptyCapabilitySet,

    #[error("no idle provider available for model `{model}`")]
    NoProviderAvailable { model: String },

    #[error("stream {stream_id} is not active")]
    StreamNotActive { stream_id: StreamId },

    #[error("invalid usage report for stream {stream_id}: {reason}")]
    InvalidUsage {
        stream_id: StreamId,
        reason: String,
    },

    #[error("stream {stream_id} is not owned by provider {provider_id}")]
    OwnershipMismatch {
        stream_id: StreamId,
        provider_id: ProviderId,
    },

    #[error("transport notification failed: {reason}")]
    Transport { reason: String },
}

impl MarketError {
    pub fn provider_busy(provider_id: ProviderId, reason: impl Into<String>) -> Self {
        Self::ProviderBusy {
            provider_id,
            reason: reason.into(),
        }
    }

    pub fn invalid_usage(stream_id: StreamId, reason: impl Into<String>) -> Self {
        Self::InvalidUsage {
            stream_id,
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Whether the caller may reasonably retry the operation.
    ///
    /// `ProviderBusy` and `NoProviderAvailable` are transient views of
    /// registry state; everything else is a caller error or a missing
    /// resource and will not resolve on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderBusy { .. } | Self::NoProviderAvailable { .. } | Self::Transport { .. }
        )
    }
}
