use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{collections::BTreeMap, future::Future, time::Duration};

use super::{
    Balance, ChainDataProvider, FeeEstimates, FeeTarget, TxSummary, MAX_FEE_RATE, MIN_FEE_RATE,
};
use crate::config::AirsignConfig;
use crate::errors::{AirsignError, Result};
use crate::network::Network;
use crate::retry::{try_all_with_backoff, BackoffConfig};
use crate::tx::{parse_txid, Utxo};

fn is_loopback_http(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

fn ensure_https_or_loopback(url: &str) -> Result<()> {
    let u = url.trim();
    if u.starts_with("https://") || is_loopback_http(u) {
        return Ok(());
    }
    Err(AirsignError::validation(format!(
        "esplora url must use https (or http://localhost for local testing): {u}"
    )))
}

#[derive(Debug, Clone, Deserialize)]
struct AddrStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct AddrResp {
    chain_stats: AddrStats,
    mempool_stats: AddrStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TxStatus {
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct UtxoResp {
    txid: String,
    vout: u32,
    value: u64,
    #[serde(default)]
    status: TxStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct TxResp {
    txid: String,
    #[serde(default)]
    status: TxStatus,
    #[serde(default)]
    fee: Option<u64>,
}

/// Esplora REST client (blockstream.info, mempool.space, or a self-hosted instance).
#[derive(Debug, Clone)]
pub struct EsploraProvider {
    mainnet: Vec<String>,
    testnet: Vec<String>,
    timeout: Duration,
    backoff: BackoffConfig,
    client: Client,
}

impl EsploraProvider {
    /// Endpoints are tried in order for reads; broadcast only uses the first one.
    pub fn new(mainnet: Vec<String>, testnet: Vec<String>, timeout: Duration) -> Result<Self> {
        for u in mainnet.iter().chain(&testnet) {
            ensure_https_or_loopback(u)?;
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AirsignError::Provider(format!("build http client: {e}")))?;
        let trim = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|u| u.trim().trim_end_matches('/').to_owned())
                .collect()
        };
        Ok(Self {
            mainnet: trim(mainnet),
            testnet: trim(testnet),
            timeout,
            backoff: BackoffConfig::default(),
            client,
        })
    }

    pub fn from_config(cfg: &AirsignConfig) -> Result<Self> {
        Self::new(
            cfg.http.endpoints(Network::Mainnet),
            cfg.http.endpoints(Network::Testnet),
            Duration::from_secs(cfg.http.timeout_seconds.max(1)),
        )
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    fn endpoints(&self, network: Network) -> &[String] {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
        }
    }

    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(r) => r,
            Err(_elapsed) => Err(AirsignError::NetworkTimeout {
                operation: operation.to_owned(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String, what: &str) -> Result<T> {
        self.bounded(what, async move {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| request_error(what, &e, self.timeout))?;
            let status = resp.status();
            if status == StatusCode::BAD_REQUEST {
                let body = resp.text().await.unwrap_or_default();
                return Err(AirsignError::validation(format!("{what}: {}", body.trim())));
            }
            if !status.is_success() {
                return Err(AirsignError::Provider(format!("{what}: upstream returned http {status}")));
            }
            resp.json::<T>()
                .await
                .map_err(|e| AirsignError::Provider(format!("{what}: decode json: {e}")))
        })
        .await
    }

    async fn read<T, F, Fut>(&self, network: Network, label: &'static str, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        try_all_with_backoff(self.endpoints(network), &self.backoff, |base| op(base.clone()), label).await
    }

    async fn tip_height(&self, base: &str) -> Result<u32> {
        let what = "tip height";
        let url = format!("{base}/blocks/tip/height");
        self.bounded(what, async {
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| request_error(what, &e, self.timeout))?;
            if !resp.status().is_success() {
                return Err(AirsignError::Provider(format!(
                    "{what}: upstream returned http {}",
                    resp.status()
                )));
            }
            let text = resp
                .text()
                .await
                .map_err(|e| AirsignError::Provider(format!("{what}: read body: {e}")))?;
            text.trim()
                .parse::<u32>()
                .map_err(|e| AirsignError::Provider(format!("{what}: {e}")))
        })
        .await
    }
}

fn request_error(what: &str, e: &reqwest::Error, timeout: Duration) -> AirsignError {
    if e.is_timeout() {
        AirsignError::NetworkTimeout {
            operation: what.to_owned(),
            seconds: timeout.as_secs(),
        }
    } else {
        AirsignError::Provider(format!("{what}: {e}"))
    }
}

fn check_address(address: &str) -> Result<&str> {
    let a = address.trim();
    if a.is_empty() || !a.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AirsignError::UnsupportedAddressFormat(address.to_owned()));
    }
    Ok(a)
}

/// Map an Esplora `/fee-estimates` body (blocks → fractional sat/vB) onto our targets.
///
/// For each target the entry with the largest block count not above the target is used, so a
/// missing key resolves to a faster (more expensive) estimate rather than a cheaper one.
fn fee_estimates_from_map(raw: &BTreeMap<String, f64>) -> Result<FeeEstimates> {
    let by_blocks: BTreeMap<u32, f64> = raw
        .iter()
        .filter_map(|(k, v)| Some((k.parse::<u32>().ok()?, *v)))
        .filter(|(_, v)| v.is_finite() && *v >= 0.0)
        .collect();
    if by_blocks.is_empty() {
        return Err(AirsignError::Provider("fee estimates: empty response".to_owned()));
    }
    let pick = |target: FeeTarget| -> u64 {
        let rate = by_blocks
            .range(..=target.blocks())
            .next_back()
            .or_else(|| by_blocks.iter().next())
            .map_or(0.0, |(_, v)| *v);
        clamp_fee_rate(rate)
    };
    Ok(FeeEstimates {
        fastest: pick(FeeTarget::Fastest),
        half_hour: pick(FeeTarget::HalfHour),
        hour: pick(FeeTarget::Hour),
        economy: pick(FeeTarget::Economy),
        minimum: pick(FeeTarget::Minimum),
    })
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "value is finite, non-negative and clamped to a small range first"
)]
fn clamp_fee_rate(sat_per_vb: f64) -> u64 {
    let r = sat_per_vb
        .ceil()
        .clamp(MIN_FEE_RATE as f64, MAX_FEE_RATE as f64);
    r as u64
}

#[async_trait]
impl ChainDataProvider for EsploraProvider {
    async fn get_balance(&self, address: &str, network: Network) -> Result<Balance> {
        let a = check_address(address)?;
        let v: AddrResp = self
            .read(network, "get_balance", |base| {
                self.get_json(format!("{base}/address/{a}"), "fetch address")
            })
            .await?;
        Ok(Balance {
            confirmed: v.chain_stats.funded_txo_sum.saturating_sub(v.chain_stats.spent_txo_sum),
            unconfirmed: v
                .mempool_stats
                .funded_txo_sum
                .saturating_sub(v.mempool_stats.spent_txo_sum),
        })
    }

    async fn get_utxos(&self, address: &str, network: Network) -> Result<Vec<Utxo>> {
        let a = check_address(address)?;
        let (raw, tip): (Vec<UtxoResp>, Option<u32>) = self
            .read(network, "get_utxos", |base| async move {
                let raw: Vec<UtxoResp> = self
                    .get_json(format!("{base}/address/{a}/utxo"), "fetch utxos")
                    .await?;
                let tip = if raw.iter().any(|u| u.status.confirmed) {
                    Some(self.tip_height(&base).await?)
                } else {
                    None
                };
                Ok((raw, tip))
            })
            .await?;

        let mut out = Vec::with_capacity(raw.len());
        for u in raw {
            parse_txid(&u.txid)
                .map_err(|e| AirsignError::Provider(format!("provider returned bad utxo: {e}")))?;
            let confirmations = match (u.status.confirmed, u.status.block_height, tip) {
                (true, Some(h), Some(t)) => t.saturating_sub(h).saturating_add(1),
                _ => 0,
            };
            out.push(Utxo {
                txid: u.txid.to_ascii_lowercase(),
                vout: u.vout,
                value: u.value,
                confirmations,
            });
        }
        tracing::debug!(count = out.len(), %network, "fetched utxos");
        Ok(out)
    }

    async fn get_transactions(&self, address: &str, network: Network) -> Result<Vec<TxSummary>> {
        let a = check_address(address)?;
        let raw: Vec<TxResp> = self
            .read(network, "get_transactions", |base| {
                self.get_json(format!("{base}/address/{a}/txs"), "fetch transactions")
            })
            .await?;
        Ok(raw
            .into_iter()
            .map(|t| TxSummary {
                txid: t.txid,
                confirmed: t.status.confirmed,
                block_height: t.status.block_height,
                fee: t.fee,
            })
            .collect())
    }

    async fn get_fee_estimates(&self, network: Network) -> Result<FeeEstimates> {
        let raw: BTreeMap<String, f64> = self
            .read(network, "get_fee_estimates", |base| {
                self.get_json(format!("{base}/fee-estimates"), "fetch fee estimates")
            })
            .await?;
        fee_estimates_from_map(&raw)
    }

    async fn broadcast_transaction(&self, tx_hex: &str, network: Network) -> Result<String> {
        let what = "broadcast";
        let base = self
            .endpoints(network)
            .first()
            .ok_or_else(|| AirsignError::Provider("broadcast: no endpoints configured".to_owned()))?;
        let url = format!("{base}/tx");
        let body = tx_hex.trim().to_owned();
        let txid = self
            .bounded(what, async {
                let resp = self
                    .client
                    .post(&url)
                    .header("content-type", "text/plain")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| request_error(what, &e, self.timeout))?;
                let status = resp.status();
                let text = resp
                    .text()
                    .await
                    .map_err(|e| AirsignError::Provider(format!("{what}: read body: {e}")))?;
                if status == StatusCode::BAD_REQUEST {
                    return Err(AirsignError::BroadcastRejected(text.trim().to_owned()));
                }
                if !status.is_success() {
                    return Err(AirsignError::Provider(format!(
                        "{what}: upstream returned http {status}"
                    )));
                }
                Ok(text.trim().to_owned())
            })
            .await?;
        tracing::info!(%txid, %network, "broadcast transaction");
        Ok(txid)
    }
}
