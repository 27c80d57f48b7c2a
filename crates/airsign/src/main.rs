#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use airsign::{
    amount, audit, cli_output,
    config::AirsignConfig,
    doctor,
    entropy::ImageEntropy,
    interchange::{self, chunk},
    keys::{self, WordCount},
    keystore::{FileSecretStore, SecretStore as _, MNEMONIC_KEY},
    network::Network,
    paths::AirsignPaths,
    provider::{ChainDataProvider as _, EsploraProvider, FeeTarget},
    secret::MnemonicPhrase,
    send::{self, FeeChoice, SendRequest},
    store::ConfigStore,
    AirsignError,
};
use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use secrecy::SecretString;
use serde_json::json;
use std::io::{BufRead as _, IsTerminal as _, Write as _};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use zeroize::Zeroizing;

const MNEMONIC_ENV: &str = "AIRSIGN_MNEMONIC";
const PASSPHRASE_ENV: &str = "AIRSIGN_PASSPHRASE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliNetwork {
    Mainnet,
    Testnet,
}

impl From<CliNetwork> for Network {
    fn from(v: CliNetwork) -> Self {
        match v {
            CliNetwork::Mainnet => Self::Mainnet,
            CliNetwork::Testnet => Self::Testnet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliFeeTarget {
    Fastest,
    HalfHour,
    Hour,
    Economy,
    Minimum,
}

impl From<CliFeeTarget> for FeeTarget {
    fn from(v: CliFeeTarget) -> Self {
        match v {
            CliFeeTarget::Fastest => Self::Fastest,
            CliFeeTarget::HalfHour => Self::HalfHour,
            CliFeeTarget::Hour => Self::Hour,
            CliFeeTarget::Economy => Self::Economy,
            CliFeeTarget::Minimum => Self::Minimum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliWords {
    #[value(name = "12")]
    Twelve,
    #[value(name = "24")]
    TwentyFour,
}

impl From<CliWords> for WordCount {
    fn from(v: CliWords) -> Self {
        match v {
            CliWords::Twelve => Self::Twelve,
            CliWords::TwentyFour => Self::TwentyFour,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "airsign", version)]
struct Cli {
    /// Override the configured network for this invocation.
    #[arg(long, value_enum, global = true)]
    network: Option<CliNetwork>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate or check BIP-39 mnemonics.
    Mnemonic {
        #[command(subcommand)]
        cmd: MnemonicCommand,
    },

    /// Derive BIP-84 receive addresses (`m/84'/coin'/account'/0/index`).
    ///
    /// Reads the mnemonic from $AIRSIGN_MNEMONIC, a prompt, or one line of stdin.
    Address {
        #[arg(long, default_value_t = 0)]
        account: u32,
        #[arg(long, default_value_t = 0)]
        index: u32,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Confirmed and unconfirmed balance of an address.
    Balance {
        #[arg(long)]
        address: String,
    },

    /// Unspent outputs of an address.
    Utxos {
        #[arg(long)]
        address: String,
    },

    /// Current fee estimates (sat/vB).
    Fees,

    /// Watch side: build an unsigned transaction and print its QR frames, one per line.
    Build {
        /// Our address; UTXOs are spent from it and change returns to it.
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// BTC (`0.001`) or satoshis (`100000sats`).
        #[arg(long)]
        amount: String,
        /// Fixed fee rate in sat/vB. Skips fee estimation.
        #[arg(long)]
        fee_rate: Option<u64>,
        /// Confirmation target for fee estimation (defaults to config `fees.target`).
        #[arg(long, value_enum)]
        fee_target: Option<CliFeeTarget>,
        /// Fail instead of using `fees.fallback_sat_per_vb` when estimates are unavailable.
        #[arg(long, default_value_t = false)]
        strict_fees: bool,
        /// Payload characters per frame (defaults to config `interchange.max_chunk_size`).
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Signer side: read unsigned frames from stdin (or --input), sign, print signed frames.
    Sign {
        #[arg(long, default_value_t = 0)]
        account: u32,
        #[arg(long, default_value_t = 0)]
        index: u32,
        /// Read frames from a file instead of stdin.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Use the mnemonic stored with `airsign keystore save-mnemonic`.
        #[arg(long, default_value_t = false)]
        from_keystore: bool,
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Watch side: read signed frames from stdin (or --input) and broadcast.
    Broadcast {
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Manage the encrypted mnemonic store.
    Keystore {
        #[command(subcommand)]
        cmd: KeystoreCommand,
    },

    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a quick offline self-diagnostic report (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum MnemonicCommand {
    /// Print a fresh mnemonic.
    Generate {
        #[arg(long, value_enum, default_value_t = CliWords::Twelve)]
        words: CliWords,
        /// Mix the bytes of this image into the system entropy.
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Check a mnemonic's words and checksum.
    Validate,
}

#[derive(Subcommand, Debug)]
enum KeystoreCommand {
    /// Encrypt and store the mnemonic under the config dir.
    SaveMnemonic,
    /// Remove the stored mnemonic.
    DeleteMnemonic,
}

fn init_logging(paths: &AirsignPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("airsign.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn env_secret(var: &str) -> Option<Zeroizing<String>> {
    std::env::var(var)
        .ok()
        .map(Zeroizing::new)
        .filter(|s| !s.trim().is_empty())
}

/// Env var first, then a hidden prompt on the terminal, then (if allowed) one line of stdin.
fn read_secret(prompt: &str, env_var: &str, stdin_allowed: bool) -> eyre::Result<Zeroizing<String>> {
    if let Some(s) = env_secret(env_var) {
        return Ok(s);
    }
    if stdin_allowed && !std::io::stdin().is_terminal() {
        let mut line = Zeroizing::new(String::new());
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read secret from stdin")?;
        return Ok(Zeroizing::new(line.trim().to_owned()));
    }
    let s = rpassword::prompt_password(prompt).context("read secret from terminal")?;
    Ok(Zeroizing::new(s))
}

fn read_mnemonic(stdin_allowed: bool) -> eyre::Result<MnemonicPhrase> {
    let s = read_secret("Mnemonic: ", MNEMONIC_ENV, stdin_allowed)?;
    Ok(MnemonicPhrase::new(s.as_str()))
}

fn open_keystore(paths: &AirsignPaths, stdin_allowed: bool) -> eyre::Result<FileSecretStore> {
    let pass = read_secret("Keystore passphrase: ", PASSPHRASE_ENV, stdin_allowed)?;
    if pass.trim().is_empty() {
        eyre::bail!("keystore passphrase is empty");
    }
    let pass = SecretString::new(pass.as_str().into());
    Ok(FileSecretStore::open_default(paths, &pass)?)
}

fn mnemonic_from_keystore(paths: &AirsignPaths) -> eyre::Result<MnemonicPhrase> {
    let store = open_keystore(paths, false)?;
    let bytes = store
        .get(MNEMONIC_KEY)?
        .ok_or_else(|| eyre::eyre!("no mnemonic stored; run `airsign keystore save-mnemonic`"))?;
    let s = std::str::from_utf8(&bytes).context("stored mnemonic is not utf-8")?;
    Ok(MnemonicPhrase::new(s))
}

/// Collect frames line by line until the sequence is complete or input ends.
fn read_frames(input: Option<&PathBuf>) -> eyre::Result<String> {
    let reader: Box<dyn std::io::BufRead> = match input {
        Some(p) => Box::new(std::io::BufReader::new(
            std::fs::File::open(p).with_context(|| format!("open {}", p.display()))?,
        )),
        None => Box::new(std::io::stdin().lock()),
    };
    let show_progress = input.is_none() && std::io::stdin().is_terminal();

    let mut collector = chunk::ChunkCollector::new();
    for line in reader.lines() {
        let line = line.context("read frame")?;
        let done = collector.push(&line)?;
        if show_progress {
            let (got, total) = collector.progress();
            cli_output::print_scan_progress(got, total);
        }
        if done {
            break;
        }
    }
    Ok(collector.finish()?)
}

fn write_json(v: &serde_json::Value) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(v).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")?;
    Ok(())
}

fn write_frames(frames: &[String]) -> eyre::Result<()> {
    let mut out = std::io::stdout().lock();
    for f in frames {
        writeln!(out, "{f}").context("write frame")?;
    }
    Ok(())
}

async fn run(cli: Cli, paths: &AirsignPaths) -> eyre::Result<()> {
    let Cli {
        network: network_override,
        cmd,
    } = cli;
    // Loaded per command so `doctor` still runs when config.toml is broken.
    let settings = || -> eyre::Result<(AirsignConfig, Network)> {
        let cfg = ConfigStore::new(paths).load_or_init_default()?;
        let network = network_override.map_or(cfg.network_mode, Into::into);
        Ok((cfg, network))
    };

    match cmd {
        Command::Mnemonic { cmd } => match cmd {
            MnemonicCommand::Generate { words, image } => {
                let image = match image {
                    Some(p) => {
                        let bytes = std::fs::read(&p)
                            .with_context(|| format!("read image {}", p.display()))?;
                        Some(ImageEntropy::from_bytes(&bytes)?)
                    }
                    None => None,
                };
                let phrase = keys::generate_mnemonic_with(words.into(), image.as_ref())?;
                cli_output::print_mnemonic_warning();
                writeln!(std::io::stdout().lock(), "{}", phrase.expose())
                    .context("write mnemonic")?;
                Ok(())
            }
            MnemonicCommand::Validate => {
                let phrase = read_mnemonic(true)?;
                write_json(&json!({ "valid": keys::validate_mnemonic(&phrase) }))
            }
        },
        Command::Address {
            account,
            index,
            count,
        } => {
            let (_cfg, network) = settings()?;
            let phrase = read_mnemonic(true)?;
            let end = index
                .checked_add(count.max(1))
                .ok_or_else(|| eyre::eyre!("index range overflows"))?;
            let addrs = keys::derive_addresses(&phrase, network, account, index..end)?;
            write_json(&serde_json::to_value(addrs).context("serialize addresses")?)
        }
        Command::Balance { address } => {
            let (cfg, network) = settings()?;
            let provider = EsploraProvider::from_config(&cfg)?;
            let b = provider.get_balance(&address, network).await?;
            write_json(&json!({
                "address": address,
                "network": network,
                "confirmed": b.confirmed,
                "unconfirmed": b.unconfirmed,
                "total": b.total(),
                "total_btc": amount::format_sats_as_btc(b.total()),
            }))
        }
        Command::Utxos { address } => {
            let (cfg, network) = settings()?;
            let provider = EsploraProvider::from_config(&cfg)?;
            let utxos = provider.get_utxos(&address, network).await?;
            write_json(&serde_json::to_value(utxos).context("serialize utxos")?)
        }
        Command::Fees => {
            let (cfg, network) = settings()?;
            let provider = EsploraProvider::from_config(&cfg)?;
            let est = provider.get_fee_estimates(network).await?;
            write_json(&serde_json::to_value(est).context("serialize fee estimates")?)
        }
        Command::Build {
            from,
            to,
            amount: amount_s,
            fee_rate,
            fee_target,
            strict_fees,
            chunk_size,
        } => {
            let (cfg, network) = settings()?;
            let provider = EsploraProvider::from_config(&cfg)?;
            let fee = match fee_rate {
                Some(r) => FeeChoice::Fixed(r),
                None => FeeChoice::Estimate {
                    target: fee_target.map_or(cfg.fees.target, Into::into),
                    fallback: (!strict_fees).then_some(cfg.fees.fallback_sat_per_vb),
                },
            };
            let req = SendRequest {
                from,
                to,
                amount: amount::parse_amount_sats(&amount_s)?,
                network,
                fee,
            };
            let prepared = send::prepare_send(&provider, &req).await?;
            cli_output::print_fee_quote(&prepared.quote);
            cli_output::print_notice(&format!(
                "sending {} BTC, fee {} sats ({} sat/vB), change {} sats",
                amount::format_sats_as_btc(req.amount),
                prepared.tx.fee(),
                prepared.quote.sat_per_vb,
                prepared.selection.change
            ));
            let frames = chunk::split(
                &prepared.envelope,
                chunk_size.unwrap_or(cfg.interchange.max_chunk_size),
            )?;
            cli_output::print_chunk_banner("unsigned transaction", frames.len());
            write_frames(&frames)
        }
        Command::Sign {
            account,
            index,
            input,
            from_keystore,
            chunk_size,
        } => {
            let (cfg, _network) = settings()?;
            let encoded = read_frames(input.as_ref())?;
            let phrase = if from_keystore {
                mnemonic_from_keystore(paths)?
            } else {
                read_mnemonic(input.is_some())?
            };
            let (signed, envelope) = send::sign_envelope(&encoded, &phrase, "", account, index)?;
            drop(phrase);

            audit::append(
                paths,
                json!({
                    "event": "sign",
                    "network": signed.network(),
                    "txid": signed.txid(),
                    "result": "ok",
                }),
            )?;
            let frames = chunk::split(
                &envelope,
                chunk_size.unwrap_or(cfg.interchange.max_chunk_size),
            )?;
            cli_output::print_notice(&format!("signed {}", signed.txid()));
            cli_output::print_chunk_banner("signed transaction", frames.len());
            write_frames(&frames)
        }
        Command::Broadcast { input } => {
            let (cfg, _network) = settings()?;
            let encoded = read_frames(input.as_ref())?;
            let env = interchange::decode(&encoded)?;
            let provider = EsploraProvider::from_config(&cfg)?;
            let result = send::broadcast_signed(&provider, &encoded).await;
            audit::append(
                paths,
                json!({
                    "event": "broadcast",
                    "network": env.network(),
                    "txid": result.as_ref().ok(),
                    "result": if result.is_ok() { "ok" } else { "error" },
                    "error_code": result.as_ref().err().map(AirsignError::code),
                }),
            )?;
            let txid = result?;
            write_json(&json!({ "txid": txid, "network": env.network() }))
        }
        Command::Keystore { cmd } => {
            let (cfg, _network) = settings()?;
            if !cfg.keystore.enabled {
                eyre::bail!("keystore is disabled (keystore.enabled = false)");
            }
            match cmd {
                KeystoreCommand::SaveMnemonic => {
                    let phrase = read_mnemonic(true)?;
                    keys::parse_mnemonic(&phrase)?;
                    let ks = open_keystore(paths, false)?;
                    ks.save(MNEMONIC_KEY, phrase.normalized().as_bytes())?;
                    write_json(&json!({ "saved": true }))
                }
                KeystoreCommand::DeleteMnemonic => {
                    let ks = open_keystore(paths, true)?;
                    write_json(&json!({ "deleted": ks.delete(MNEMONIC_KEY)? }))
                }
            }
        }
        Command::Paths => write_json(&json!({
            "config_dir": paths.config_dir,
            "data_dir": paths.data_dir,
            "log_file": paths.log_file,
            "audit_log": paths.audit_log(),
        })),
        Command::Doctor { json } => {
            if !doctor::run(paths, json).context("doctor failed")? {
                eyre::bail!("doctor found problems");
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = AirsignPaths::discover()?;
    paths.ensure_private_dirs().context("create airsign dirs")?;
    let _log_guard = init_logging(&paths);

    match run(cli, &paths).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(ae) = e.downcast_ref::<AirsignError>() {
                cli_output::print_error_json(ae);
            }
            Err(e)
        }
    }
}
