use crate::{config::AirsignConfig, network::Network, paths::AirsignPaths};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides (network, endpoints, limits).
///
/// Overrides apply to the loaded config only; they are never written back to disk.
fn apply_env_overrides(cfg: &mut AirsignConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("AIRSIGN_NETWORK", |v| match v.parse::<Network>() {
        Ok(n) => cfg.network_mode = n,
        Err(e) => tracing::warn!(error = %e, "ignoring AIRSIGN_NETWORK"),
    });
    apply_env("AIRSIGN_ESPLORA_URL_MAINNET", |v| {
        v.clone_into(&mut cfg.http.esplora_base_url_mainnet);
    });
    apply_env("AIRSIGN_ESPLORA_URL_TESTNET", |v| {
        v.clone_into(&mut cfg.http.esplora_base_url_testnet);
    });
    apply_env("AIRSIGN_HTTP_TIMEOUT_SECONDS", |v| {
        if let Ok(n) = v.parse::<u64>() {
            if n > 0 {
                cfg.http.timeout_seconds = n;
            }
        }
    });
    apply_env("AIRSIGN_MAX_CHUNK_SIZE", |v| {
        if let Ok(n) = v.parse::<usize>() {
            if n > 0 {
                cfg.interchange.max_chunk_size = n;
            }
        }
    });
}

impl ConfigStore {
    pub fn new(paths: &AirsignPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read the on-disk config, creating it with defaults on first run, then apply env overrides.
    pub fn load_or_init_default(&self) -> eyre::Result<AirsignConfig> {
        let mut cfg = self.load_file()?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    /// The config as stored, without env overrides. Use this before calling [`Self::save`].
    pub fn load_file(&self) -> eyre::Result<AirsignConfig> {
        if !self.path.exists() {
            let cfg = AirsignConfig::default();
            self.save(&cfg)?;
            return Ok(cfg);
        }
        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        toml::from_str(&s).context("parse config.toml")
    }

    pub fn save(&self, cfg: &AirsignConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}
