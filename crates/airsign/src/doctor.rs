use crate::{
    config::AirsignConfig, keys, keystore::MNEMONIC_KEY, network::Network, paths::AirsignPaths,
    secret::MnemonicPhrase,
};
use eyre::Context as _;
use serde::Serialize;
use serde_json::json;
use std::{fs, path::Path, path::PathBuf};

const SELF_TEST_PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const SELF_TEST_ADDRESS: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn try_parse_config(path: &Path) -> eyre::Result<AirsignConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AirsignConfig = toml::from_str(&s).context("parse config.toml")?;
    Ok(cfg)
}

#[derive(Debug, Serialize)]
struct ConfigReport {
    path: PathBuf,
    exists: bool,
    parse_ok: bool,
    error: Option<String>,
    network_mode: Option<Network>,
    endpoints: Vec<String>,
    fee_target: Option<String>,
    max_chunk_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct KeystoreReport {
    secrets_dir: PathBuf,
    salt_configured: bool,
    mnemonic_stored: bool,
}

#[derive(Debug, Serialize)]
struct SelfTestReport {
    ok: bool,
    expected: &'static str,
    derived: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    ok: bool,
    version: &'static str,
    paths: AirsignPaths,
    config: ConfigReport,
    keystore: KeystoreReport,
    self_test: SelfTestReport,
    env: serde_json::Value,
}

impl DoctorReport {
    pub const fn ok(&self) -> bool {
        self.ok
    }
}

/// Derive the BIP-84 reference address and compare, exercising bip39, bip32, secp256k1 and
/// bech32 without touching the network or any stored secret.
fn self_test() -> SelfTestReport {
    let phrase = MnemonicPhrase::from(SELF_TEST_PHRASE);
    match keys::derive_address(&phrase, Network::Mainnet, 0, 0) {
        Ok(d) => SelfTestReport {
            ok: d.address == SELF_TEST_ADDRESS,
            expected: SELF_TEST_ADDRESS,
            derived: Some(d.address),
            error: None,
        },
        Err(e) => SelfTestReport {
            ok: false,
            expected: SELF_TEST_ADDRESS,
            derived: None,
            error: Some(e.to_string()),
        },
    }
}

pub fn collect(paths: &AirsignPaths) -> DoctorReport {
    let config_path = paths.config_dir.join("config.toml");
    let config_exists = config_path.exists();
    let (config_ok, config_err, cfg) = if config_exists {
        match try_parse_config(&config_path) {
            Ok(cfg) => (true, None, Some(cfg)),
            Err(e) => (false, Some(format!("{e:#}")), None),
        }
    } else {
        (false, None, None)
    };

    let secrets_dir = paths.secrets_dir();
    let mnemonic_stored = secrets_dir
        .join(format!("{}.json", hex::encode(MNEMONIC_KEY.as_bytes())))
        .exists();

    let network_mode = cfg.as_ref().map(|c| c.network_mode);
    let self_test = self_test();

    DoctorReport {
        ok: self_test.ok && (!config_exists || config_ok),
        version: env!("CARGO_PKG_VERSION"),
        paths: paths.clone(),
        config: ConfigReport {
            path: config_path,
            exists: config_exists,
            parse_ok: config_ok,
            error: config_err,
            network_mode,
            endpoints: cfg
                .as_ref()
                .map(|c| c.http.endpoints(c.network_mode))
                .unwrap_or_default(),
            fee_target: cfg.as_ref().map(|c| c.fees.target.to_string()),
            max_chunk_size: cfg.as_ref().map(|c| c.interchange.max_chunk_size),
        },
        keystore: KeystoreReport {
            secrets_dir,
            salt_configured: cfg
                .as_ref()
                .is_some_and(|c| c.keystore.passphrase_salt_b64.is_some()),
            mnemonic_stored,
        },
        self_test,
        env: json!({
          "AIRSIGN_CONFIG_DIR": env_opt("AIRSIGN_CONFIG_DIR"),
          "AIRSIGN_DATA_DIR": env_opt("AIRSIGN_DATA_DIR"),
          "AIRSIGN_NETWORK": env_opt("AIRSIGN_NETWORK"),
          "AIRSIGN_MNEMONIC_set": std::env::var("AIRSIGN_MNEMONIC").is_ok(),
        }),
    }
}

fn print_json(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(r).context("serialize doctor json")?;
    writeln!(out, "{s}").context("write doctor json")?;
    Ok(())
}

fn print_human(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    writeln!(out, "airsign doctor (v{})", r.version).context("write header")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Paths:").context("write paths header")?;
    writeln!(out, "  config_dir: {}", r.paths.config_dir.display()).context("write paths")?;
    writeln!(out, "  data_dir:   {}", r.paths.data_dir.display()).context("write paths")?;
    writeln!(out, "  log_file:   {}", r.paths.log_file.display()).context("write paths")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Config:").context("write config header")?;
    writeln!(out, "  config.toml: {}", r.config.path.display()).context("write config")?;
    if !r.config.exists {
        writeln!(out, "  status: missing (will be created on first run)")
            .context("write config")?;
    } else if r.config.parse_ok {
        let network = r.config.network_mode.map_or("?", Network::as_str);
        writeln!(out, "  status: ok (network: {network})").context("write config")?;
        for e in &r.config.endpoints {
            writeln!(out, "  endpoint: {e}").context("write config")?;
        }
    } else {
        writeln!(out, "  status: parse failed").context("write config")?;
        if let Some(e) = &r.config.error {
            let first = e.lines().next().unwrap_or("parse error");
            writeln!(out, "  error: {first}").context("write config")?;
        }
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Keystore:").context("write keystore header")?;
    writeln!(out, "  secrets_dir: {}", r.keystore.secrets_dir.display())
        .context("write keystore")?;
    writeln!(out, "  mnemonic_stored: {}", r.keystore.mnemonic_stored)
        .context("write keystore")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Self-test (BIP-84 reference derivation):").context("write self-test")?;
    if r.self_test.ok {
        writeln!(out, "  ok").context("write self-test")?;
    } else {
        writeln!(
            out,
            "  FAILED: expected {}, got {:?} ({:?})",
            r.self_test.expected, r.self_test.derived, r.self_test.error
        )
        .context("write self-test")?;
    }
    Ok(())
}

/// Print the report to stdout. Returns whether every check passed.
pub fn run(paths: &AirsignPaths, as_json: bool) -> eyre::Result<bool> {
    let report = collect(paths);
    let mut out = std::io::stdout().lock();
    if as_json {
        print_json(&mut out, &report)?;
    } else {
        print_human(&mut out, &report)?;
    }
    Ok(report.ok())
}
