use assert_cmd::Command;
use eyre::Context as _;
use predicates::prelude::*;
use tempfile::TempDir;

use airsign::{
    interchange::{self, chunk},
    network::Network,
    tx::{self, SignedTransaction, TxInput, TxOutput, TxRequest},
};

const ABANDON_ABOUT: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const ADDR_0: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
const ADDR_1: &str = "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g";

struct Sandbox {
    cfg: TempDir,
    data: TempDir,
}

impl Sandbox {
    fn new() -> eyre::Result<Self> {
        Ok(Self {
            cfg: tempfile::tempdir()?,
            data: tempfile::tempdir()?,
        })
    }

    fn cmd(&self) -> Command {
        let mut c = Command::new(assert_cmd::cargo::cargo_bin!("airsign"));
        c.env("AIRSIGN_CONFIG_DIR", self.cfg.path())
            .env("AIRSIGN_DATA_DIR", self.data.path())
            .env_remove("AIRSIGN_MNEMONIC")
            .env_remove("AIRSIGN_PASSPHRASE")
            .env_remove("AIRSIGN_NETWORK")
            .env_remove("RUST_LOG");
        c
    }
}

fn stdout_json(out: &std::process::Output) -> eyre::Result<serde_json::Value> {
    serde_json::from_slice(&out.stdout).context("parse stdout json")
}

#[test]
fn doctor_json_reports_ok() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let out = sb.cmd().args(["doctor", "--json"]).output()?;
    assert!(
        out.status.success(),
        "doctor exited non-zero: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v = stdout_json(&out)?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(true));
    assert_eq!(
        v.pointer("/self_test/derived").and_then(|x| x.as_str()),
        Some(ADDR_0)
    );
    Ok(())
}

#[test]
fn paths_prints_the_sandbox_dirs() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let out = sb.cmd().arg("paths").output()?;
    assert!(out.status.success());
    let v = stdout_json(&out)?;
    let cfg_dir = v
        .get("config_dir")
        .and_then(|x| x.as_str())
        .ok_or_else(|| eyre::eyre!("missing config_dir"))?;
    assert_eq!(std::path::Path::new(cfg_dir), sb.cfg.path());
    Ok(())
}

#[test]
fn address_derives_bip84_receive_addresses() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let out = sb
        .cmd()
        .env("AIRSIGN_MNEMONIC", ABANDON_ABOUT)
        .args(["address", "--count", "2"])
        .output()?;
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v = stdout_json(&out)?;
    let addrs: Vec<&str> = v
        .as_array()
        .ok_or_else(|| eyre::eyre!("expected array"))?
        .iter()
        .filter_map(|a| a.get("address").and_then(|x| x.as_str()))
        .collect();
    assert_eq!(addrs, vec![ADDR_0, ADDR_1]);
    Ok(())
}

#[test]
fn testnet_flag_switches_address_prefix() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.cmd()
        .env("AIRSIGN_MNEMONIC", ABANDON_ABOUT)
        .args(["--network", "testnet", "address"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"tb1q").and(predicate::str::contains("m/84'/1'/0'/0/0")));
    Ok(())
}

#[test]
fn mnemonic_validate_reads_stdin() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.cmd()
        .args(["mnemonic", "validate"])
        .write_stdin(format!("{ABANDON_ABOUT}\n"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"));

    sb.cmd()
        .args(["mnemonic", "validate"])
        .write_stdin(ABANDON_ABOUT.replace("about", "abandon"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": false"));
    Ok(())
}

#[test]
fn mnemonic_generate_prints_a_valid_phrase() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let out = sb.cmd().args(["mnemonic", "generate", "--words", "24"]).output()?;
    assert!(out.status.success());
    let phrase = String::from_utf8(out.stdout)?;
    assert_eq!(phrase.split_whitespace().count(), 24);

    sb.cmd()
        .args(["mnemonic", "validate"])
        .write_stdin(phrase)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"));
    Ok(())
}

#[test]
fn sign_reads_frames_and_emits_signed_frames() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let unsigned = tx::build_transaction(TxRequest {
        inputs: vec![TxInput {
            txid: "aa".repeat(32),
            vout: 0,
            value: 80_000,
        }],
        outputs: vec![
            TxOutput {
                address: "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".to_owned(),
                value: 30_000,
            },
            TxOutput {
                address: ADDR_0.to_owned(),
                value: 49_000,
            },
        ],
        network: Network::Mainnet,
    })?;
    let frames = chunk::split(&interchange::encode_unsigned(&unsigned, Some(1))?, 100)?;

    let out = sb
        .cmd()
        .env("AIRSIGN_MNEMONIC", ABANDON_ABOUT)
        .arg("sign")
        .write_stdin(frames.join("\n"))
        .output()?;
    assert!(
        out.status.success(),
        "sign failed: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let stdout = String::from_utf8(out.stdout)?;
    let lines: Vec<&str> = stdout.lines().collect();
    let payload = interchange::decode_signed(&chunk::reassemble(&lines)?)?;
    let signed = SignedTransaction::from_payload(&payload)?;
    let parsed: bitcoin::Transaction = bitcoin::consensus::deserialize(signed.to_bytes())?;
    assert_eq!(parsed.compute_txid().to_string(), signed.txid());
    assert_eq!(parsed.output.len(), 2);

    let audit = std::fs::read_to_string(sb.data.path().join("audit.jsonl"))?;
    assert!(audit.contains("\"event\":\"sign\""));
    assert!(audit.contains(signed.txid()));
    assert!(!audit.contains("abandon"));
    Ok(())
}

#[test]
fn broadcast_of_garbage_fails_with_a_json_error() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.cmd()
        .arg("broadcast")
        .write_stdin("definitely not an envelope\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"code\":\"format_mismatch\""));
    Ok(())
}
