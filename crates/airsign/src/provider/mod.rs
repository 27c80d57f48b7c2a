//! Blockchain data provider collaborator.
//!
//! Reads (balance, UTXOs, history, fees) and broadcast sit behind [`ChainDataProvider`] so the
//! watch-side flow can be driven by Esplora in production and by an in-memory fake in tests.

mod esplora;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::errors::{AirsignError, Result};
use crate::network::Network;
use crate::tx::Utxo;

pub use esplora::EsploraProvider;

/// Hard bounds applied to every fee rate coming from a provider.
pub const MIN_FEE_RATE: u64 = 1;
pub const MAX_FEE_RATE: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
}

impl Balance {
    pub const fn total(&self) -> u64 {
        self.confirmed.saturating_add(self.unconfirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSummary {
    pub txid: String,
    pub confirmed: bool,
    pub block_height: Option<u32>,
    pub fee: Option<u64>,
}

/// Fee rates in sat/vB for each confirmation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimates {
    pub fastest: u64,
    pub half_hour: u64,
    pub hour: u64,
    pub economy: u64,
    pub minimum: u64,
}

impl FeeEstimates {
    pub const fn get(&self, target: FeeTarget) -> u64 {
        match target {
            FeeTarget::Fastest => self.fastest,
            FeeTarget::HalfHour => self.half_hour,
            FeeTarget::Hour => self.hour,
            FeeTarget::Economy => self.economy,
            FeeTarget::Minimum => self.minimum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTarget {
    Fastest,
    #[default]
    HalfHour,
    Hour,
    Economy,
    Minimum,
}

impl FeeTarget {
    pub const ALL: [Self; 5] = [
        Self::Fastest,
        Self::HalfHour,
        Self::Hour,
        Self::Economy,
        Self::Minimum,
    ];

    /// Confirmation target in blocks.
    pub const fn blocks(self) -> u32 {
        match self {
            Self::Fastest => 1,
            Self::HalfHour => 3,
            Self::Hour => 6,
            Self::Economy => 144,
            Self::Minimum => 1008,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fastest => "fastest",
            Self::HalfHour => "half_hour",
            Self::Hour => "hour",
            Self::Economy => "economy",
            Self::Minimum => "minimum",
        }
    }
}

impl fmt::Display for FeeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeTarget {
    type Err = AirsignError;

    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == norm)
            .ok_or_else(|| AirsignError::validation(format!("unknown fee target: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeSource {
    Live,
    /// The estimate fetch failed and the caller chose to continue with a configured rate.
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    pub sat_per_vb: u64,
    pub source: FeeSource,
}

impl FeeQuote {
    pub const fn is_fallback(&self) -> bool {
        matches!(self.source, FeeSource::Fallback { .. })
    }
}

#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    async fn get_balance(&self, address: &str, network: Network) -> Result<Balance>;
    async fn get_utxos(&self, address: &str, network: Network) -> Result<Vec<Utxo>>;
    async fn get_transactions(&self, address: &str, network: Network) -> Result<Vec<TxSummary>>;
    async fn get_fee_estimates(&self, network: Network) -> Result<FeeEstimates>;
    /// Returns the txid reported by the node.
    async fn broadcast_transaction(&self, tx_hex: &str, network: Network) -> Result<String>;
}

/// Fetch a fee rate for `target`.
///
/// With `fallback = None` a failed fetch is an error. With a fallback rate the quote is still
/// returned, but marked [`FeeSource::Fallback`] so the caller can tell the user.
pub async fn quote_fee(
    provider: &dyn ChainDataProvider,
    network: Network,
    target: FeeTarget,
    fallback: Option<u64>,
) -> Result<FeeQuote> {
    match provider.get_fee_estimates(network).await {
        Ok(est) => Ok(FeeQuote {
            sat_per_vb: est.get(target).clamp(MIN_FEE_RATE, MAX_FEE_RATE),
            source: FeeSource::Live,
        }),
        Err(e) => match fallback {
            Some(rate) => {
                tracing::warn!(error = %e, rate, "fee estimate unavailable; using fallback rate");
                Ok(FeeQuote {
                    sat_per_vb: rate.clamp(MIN_FEE_RATE, MAX_FEE_RATE),
                    source: FeeSource::Fallback {
                        reason: e.to_string(),
                    },
                })
            }
            None => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedFees(Option<FeeEstimates>);

    #[async_trait]
    impl ChainDataProvider for FixedFees {
        async fn get_balance(&self, _address: &str, _network: Network) -> Result<Balance> {
            Ok(Balance::default())
        }
        async fn get_utxos(&self, _address: &str, _network: Network) -> Result<Vec<Utxo>> {
            Ok(vec![])
        }
        async fn get_transactions(&self, _address: &str, _network: Network) -> Result<Vec<TxSummary>> {
            Ok(vec![])
        }
        async fn get_fee_estimates(&self, _network: Network) -> Result<FeeEstimates> {
            self.0.ok_or_else(|| AirsignError::NetworkTimeout {
                operation: "fee estimates".to_owned(),
                seconds: 10,
            })
        }
        async fn broadcast_transaction(&self, _tx_hex: &str, _network: Network) -> Result<String> {
            Err(AirsignError::Provider("offline".to_owned()))
        }
    }

    const EST: FeeEstimates = FeeEstimates {
        fastest: 40,
        half_hour: 20,
        hour: 12,
        economy: 3,
        minimum: 1,
    };

    #[tokio::test]
    async fn live_quote_uses_requested_target() -> eyre::Result<()> {
        let q = quote_fee(&FixedFees(Some(EST)), Network::Mainnet, FeeTarget::Hour, None).await?;
        assert_eq!(q.sat_per_vb, 12);
        assert_eq!(q.source, FeeSource::Live);
        Ok(())
    }

    #[tokio::test]
    async fn failed_fetch_is_never_silent() -> eyre::Result<()> {
        let p = FixedFees(None);
        let r = quote_fee(&p, Network::Mainnet, FeeTarget::HalfHour, None).await;
        assert!(matches!(r, Err(AirsignError::NetworkTimeout { .. })));

        let q = quote_fee(&p, Network::Mainnet, FeeTarget::HalfHour, Some(5)).await?;
        assert_eq!(q.sat_per_vb, 5);
        assert!(q.is_fallback());
        Ok(())
    }

    #[test]
    fn fee_target_parsing() -> eyre::Result<()> {
        assert_eq!("half-hour".parse::<FeeTarget>()?, FeeTarget::HalfHour);
        assert_eq!("ECONOMY".parse::<FeeTarget>()?, FeeTarget::Economy);
        assert!("soon".parse::<FeeTarget>().is_err());
        assert_eq!(FeeTarget::Minimum.blocks(), 1008);
        Ok(())
    }
}
