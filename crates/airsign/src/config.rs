use serde::{Deserialize, Serialize};

use crate::network::Network;
use crate::provider::FeeTarget;

pub const ESPLORA_MAINNET_URL: &str = "https://blockstream.info/api";
pub const ESPLORA_TESTNET_URL: &str = "https://blockstream.info/testnet/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Esplora REST base URL (mainnet).
    pub esplora_base_url_mainnet: String,
    /// Esplora REST base URL (testnet).
    pub esplora_base_url_testnet: String,
    /// Additional mainnet endpoints to try if the primary fails (reads only).
    pub esplora_fallback_urls_mainnet: Vec<String>,
    /// Additional testnet endpoints to try if the primary fails (reads only).
    pub esplora_fallback_urls_testnet: Vec<String>,
    /// Upper bound for a single request, including reading the body.
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            esplora_base_url_mainnet: ESPLORA_MAINNET_URL.into(),
            esplora_base_url_testnet: ESPLORA_TESTNET_URL.into(),
            esplora_fallback_urls_mainnet: vec!["https://mempool.space/api".into()],
            esplora_fallback_urls_testnet: vec!["https://mempool.space/testnet/api".into()],
            timeout_seconds: 10,
        }
    }
}

impl HttpConfig {
    /// Primary endpoint first, then fallbacks, without duplicates.
    pub fn endpoints(&self, network: Network) -> Vec<String> {
        let (primary, fallbacks) = match network {
            Network::Mainnet => (
                &self.esplora_base_url_mainnet,
                &self.esplora_fallback_urls_mainnet,
            ),
            Network::Testnet => (
                &self.esplora_base_url_testnet,
                &self.esplora_fallback_urls_testnet,
            ),
        };
        let mut out: Vec<String> = Vec::with_capacity(1 + fallbacks.len());
        for url in std::iter::once(primary).chain(fallbacks) {
            let u = url.trim().trim_end_matches('/');
            if !u.is_empty() && !out.iter().any(|x| x == u) {
                out.push(u.to_owned());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Which provider estimate `build` uses when `--fee-rate` is not given.
    pub target: FeeTarget,
    /// Rate used when estimates cannot be fetched. Always reported as a fallback.
    pub fallback_sat_per_vb: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            target: FeeTarget::HalfHour,
            fallback_sat_per_vb: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterchangeConfig {
    /// Payload characters per QR frame (the `i/n:` prefix is extra).
    pub max_chunk_size: usize,
}

impl Default for InterchangeConfig {
    fn default() -> Self {
        Self { max_chunk_size: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Set to false on a watch-only device so no secret is ever written to disk.
    pub enabled: bool,
    /// Argon2id salt for the passphrase that encrypts stored secrets. Generated on first use.
    pub passphrase_salt_b64: Option<String>,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            passphrase_salt_b64: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AirsignConfig {
    pub network_mode: Network,
    pub http: HttpConfig,
    pub fees: FeeConfig,
    pub interchange: InterchangeConfig,
    pub keystore: KeystoreConfig,
}

impl Default for AirsignConfig {
    fn default() -> Self {
        Self {
            network_mode: Network::Mainnet,
            http: HttpConfig::default(),
            fees: FeeConfig::default(),
            interchange: InterchangeConfig::default(),
            keystore: KeystoreConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() -> eyre::Result<()> {
        let cfg = AirsignConfig::default();
        let s = toml::to_string_pretty(&cfg)?;
        assert!(s.contains("network_mode = \"mainnet\""));
        assert!(s.contains("target = \"half_hour\""));
        let back: AirsignConfig = toml::from_str(&s)?;
        assert_eq!(back.http.timeout_seconds, 10);
        assert_eq!(back.interchange.max_chunk_size, 300);
        assert!(back.keystore.enabled);
        Ok(())
    }

    #[test]
    fn partial_files_fill_in_defaults() -> eyre::Result<()> {
        let cfg: AirsignConfig = toml::from_str("network_mode = \"testnet\"\n[fees]\ntarget = \"economy\"\n")?;
        assert_eq!(cfg.network_mode, Network::Testnet);
        assert_eq!(cfg.fees.target, FeeTarget::Economy);
        assert_eq!(cfg.fees.fallback_sat_per_vb, 5);
        assert_eq!(cfg.http.esplora_base_url_testnet, ESPLORA_TESTNET_URL);
        Ok(())
    }

    #[test]
    fn endpoints_are_ordered_and_deduplicated() {
        let mut http = HttpConfig::default();
        http.esplora_fallback_urls_mainnet = vec![
            format!("{ESPLORA_MAINNET_URL}/"),
            "https://example.org/api".into(),
            " ".into(),
        ];
        assert_eq!(
            http.endpoints(Network::Mainnet),
            vec![ESPLORA_MAINNET_URL.to_owned(), "https://example.org/api".to_owned()]
        );
    }
}
