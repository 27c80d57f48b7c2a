use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T, E = AirsignError> = std::result::Result<T, E>;

/// A structured error suitable for printing to stderr as machine-readable JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AirsignError {
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("key derivation failed: {0}")]
    DerivationFailure(String),

    #[error("unsupported address format: {0}")]
    UnsupportedAddressFormat(String),

    #[error("insufficient funds: need {required} sats, have {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("not an airsign envelope: {0}")]
    FormatMismatch(String),

    #[error("unsupported envelope version {found} (this build understands up to {supported})")]
    UnsupportedVersion { found: u64, supported: u32 },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("network request timed out after {seconds}s: {operation}")]
    NetworkTimeout { operation: String, seconds: u64 },

    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("secure random source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("blockchain provider error: {0}")]
    Provider(String),

    #[error("keystore error: {0}")]
    Keystore(String),
}

impl AirsignError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidMnemonic(_) => "invalid_mnemonic",
            Self::DerivationFailure(_) => "derivation_failure",
            Self::UnsupportedAddressFormat(_) => "unsupported_address_format",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::FormatMismatch(_) => "format_mismatch",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::ValidationFailed(_) => "validation_failed",
            Self::NetworkTimeout { .. } => "network_timeout",
            Self::BroadcastRejected(_) => "broadcast_rejected",
            Self::EntropyUnavailable(_) => "entropy_unavailable",
            Self::Provider(_) => "provider_error",
            Self::Keystore(_) => "keystore_error",
        }
    }

    /// Whether the caller may retry the same operation later (after funding, with backoff, ...).
    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::NetworkTimeout { .. }
                | Self::BroadcastRejected(_)
                | Self::Provider(_)
        )
    }

    /// Failures another endpoint or a later attempt may not hit.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkTimeout { .. } | Self::Provider(_))
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    pub(crate) fn derivation(msg: impl Into<String>) -> Self {
        Self::DerivationFailure(msg.into())
    }
}

impl From<AirsignError> for ErrorReport {
    fn from(e: AirsignError) -> Self {
        Self {
            code: e.code(),
            retryable: e.retryable(),
            message: e.to_string(),
        }
    }
}
