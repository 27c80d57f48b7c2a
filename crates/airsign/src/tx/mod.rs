//! Transaction builder and signer for native P2WPKH spends.
//!
//! `build_transaction` validates everything up front and produces an immutable
//! [`UnsignedTransaction`]; `sign_transaction` turns it into a [`SignedTransaction`]. A malformed
//! input or output aborts the build, so no partial transaction ever reaches the encoder.

pub mod sighash;
mod sign;

use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::{
    absolute, transaction, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::address;
use crate::errors::{AirsignError, Result};
use crate::interchange::{PayloadInput, PayloadOutput, SignedPayload, UnsignedPayload};
use crate::network::Network;

pub use sign::{sign_transaction, verify_signed_transaction};

pub const TX_VERSION: u32 = 2;
pub const LOCKTIME: u32 = 0;
/// All inputs use the final sequence; relative timelocks and RBF signalling are not supported.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
pub const MAX_MONEY_SATS: u64 = 21_000_000 * 100_000_000;

/// An unspent output as reported by a chain data provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Display-order hex.
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    #[serde(default)]
    pub confirmations: u32,
}

impl Utxo {
    pub fn to_input(&self) -> TxInput {
        TxInput {
            txid: self.txid.to_ascii_lowercase(),
            vout: self.vout,
            value: self.value,
        }
    }
}

/// Parse a 64-character display-order hex txid.
pub fn parse_txid(txid: &str) -> Result<Txid> {
    if txid.len() != 64 {
        return Err(AirsignError::validation(format!(
            "txid must be 64 hex characters, got {}",
            txid.len()
        )));
    }
    txid.parse::<Txid>()
        .map_err(|e| AirsignError::validation(format!("txid: {e}")))
}

fn parse_transaction(bytes: &[u8]) -> Result<Transaction> {
    deserialize(bytes).map_err(|e| AirsignError::validation(format!("transaction: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub txid: String,
    pub vout: u32,
    /// Value of the spent output; committed to by the BIP-143 digest.
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub network: Network,
}

fn checked_total(values: impl IntoIterator<Item = u64>, what: &str) -> Result<u64> {
    let mut total = 0_u64;
    for v in values {
        total = total
            .checked_add(v)
            .filter(|t| *t <= MAX_MONEY_SATS)
            .ok_or_else(|| AirsignError::validation(format!("{what} total exceeds 21M BTC")))?;
    }
    Ok(total)
}

fn check_value(value: u64, what: &str) -> Result<()> {
    if value == 0 {
        return Err(AirsignError::validation(format!("{what} value must be positive")));
    }
    if value > MAX_MONEY_SATS {
        return Err(AirsignError::validation(format!("{what} value exceeds 21M BTC")));
    }
    Ok(())
}

/// Assemble an unsigned version-2, locktime-0 transaction.
///
/// Every txid and output address is validated before anything is encoded. The fee is whatever
/// is left over; only `inputs >= outputs` is enforced here.
pub fn build_transaction(request: TxRequest) -> Result<UnsignedTransaction> {
    let TxRequest {
        inputs,
        outputs,
        network,
    } = request;
    if inputs.is_empty() {
        return Err(AirsignError::validation("transaction has no inputs"));
    }
    if outputs.is_empty() {
        return Err(AirsignError::validation("transaction has no outputs"));
    }

    let mut seen = BTreeSet::new();
    let mut tx_inputs = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let txid = parse_txid(&input.txid)
            .map_err(|e| AirsignError::validation(format!("input {i}: {e}")))?;
        check_value(input.value, &format!("input {i}"))?;
        let previous_output = OutPoint {
            txid,
            vout: input.vout,
        };
        if !seen.insert(previous_output) {
            return Err(AirsignError::validation(format!(
                "input {i} spends {}:{} twice",
                input.txid, input.vout
            )));
        }
        tx_inputs.push(TxIn {
            previous_output,
            script_sig: ScriptBuf::new(),
            sequence: Sequence(SEQUENCE_FINAL),
            witness: Witness::new(),
        });
    }

    let mut tx_outputs = Vec::with_capacity(outputs.len());
    for (i, output) in outputs.iter().enumerate() {
        check_value(output.value, &format!("output {i}"))?;
        tx_outputs.push(TxOut {
            value: Amount::from_sat(output.value),
            script_pubkey: address::address_to_script_pubkey(&output.address, network)?,
        });
    }

    let total_in = checked_total(inputs.iter().map(|i| i.value), "input")?;
    let total_out = checked_total(outputs.iter().map(|o| o.value), "output")?;
    if total_in < total_out {
        return Err(AirsignError::InsufficientFunds {
            required: total_out,
            available: total_in,
        });
    }

    tracing::debug!(
        inputs = inputs.len(),
        outputs = outputs.len(),
        fee = total_in - total_out,
        %network,
        "built unsigned transaction"
    );

    Ok(UnsignedTransaction {
        network,
        inputs: inputs
            .into_iter()
            .map(|i| TxInput {
                txid: i.txid.to_ascii_lowercase(),
                ..i
            })
            .collect(),
        outputs,
        tx: Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::from_consensus(LOCKTIME),
            input: tx_inputs,
            output: tx_outputs,
        },
    })
}

/// A validated transaction awaiting signatures. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    network: Network,
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    tx: Transaction,
}

impl UnsignedTransaction {
    pub const fn network(&self) -> Network {
        self.network
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    pub const fn version(&self) -> i32 {
        self.tx.version.0
    }

    pub fn locktime(&self) -> u32 {
        self.tx.lock_time.to_consensus_u32()
    }

    pub fn input_values(&self) -> Vec<u64> {
        self.inputs.iter().map(|i| i.value).collect()
    }

    /// Inputs minus outputs. Cannot underflow: the builder rejects that case.
    pub fn fee(&self) -> u64 {
        let total_in: u64 = self.inputs.iter().map(|i| i.value).sum();
        let total_out: u64 = self.outputs.iter().map(|o| o.value).sum();
        total_in.saturating_sub(total_out)
    }

    /// The unsigned transaction with empty witnesses.
    pub const fn as_bitcoin(&self) -> &Transaction {
        &self.tx
    }

    pub fn to_payload(&self, change_index: Option<u32>) -> UnsignedPayload {
        UnsignedPayload {
            version: TX_VERSION,
            inputs: self
                .inputs
                .iter()
                .map(|i| PayloadInput {
                    txid: i.txid.clone(),
                    vout: i.vout,
                    value: i.value,
                })
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|o| PayloadOutput {
                    address: o.address.clone(),
                    value: o.value,
                })
                .collect(),
            network: self.network,
            fee: self.fee(),
            change_index,
        }
    }

    /// Rebuild from a decoded payload. The declared fee must match the inputs and outputs.
    pub fn from_payload(payload: &UnsignedPayload) -> Result<Self> {
        if payload.version != TX_VERSION {
            return Err(AirsignError::validation(format!(
                "transaction version {} is not supported",
                payload.version
            )));
        }
        let tx = build_transaction(TxRequest {
            inputs: payload
                .inputs
                .iter()
                .map(|i| TxInput {
                    txid: i.txid.clone(),
                    vout: i.vout,
                    value: i.value,
                })
                .collect(),
            outputs: payload
                .outputs
                .iter()
                .map(|o| TxOutput {
                    address: o.address.clone(),
                    value: o.value,
                })
                .collect(),
            network: payload.network,
        })?;
        if tx.fee() != payload.fee {
            return Err(AirsignError::validation(format!(
                "declared fee {} does not match inputs minus outputs ({})",
                payload.fee,
                tx.fee()
            )));
        }
        Ok(tx)
    }
}

/// A fully signed transaction in BIP-144 serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    network: Network,
    bytes: Vec<u8>,
    txid: String,
}

impl SignedTransaction {
    pub(crate) fn from_bitcoin(tx: &Transaction, network: Network) -> Self {
        Self {
            network,
            bytes: serialize(tx),
            txid: tx.compute_txid().to_string(),
        }
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn txid(&self) -> &str {
        &self.txid
    }

    pub const fn network(&self) -> Network {
        self.network
    }

    pub fn to_payload(&self) -> SignedPayload {
        SignedPayload {
            tx_hex: self.to_hex(),
            txid: self.txid.clone(),
            network: self.network,
        }
    }

    /// Parse a signed payload, checking that the declared txid matches the bytes.
    pub fn from_payload(payload: &SignedPayload) -> Result<Self> {
        let bytes = hex::decode(payload.tx_hex.trim())
            .map_err(|e| AirsignError::validation(format!("txHex: {e}")))?;
        let tx = parse_transaction(&bytes)?;
        if tx.input.iter().all(|i| i.witness.is_empty()) {
            return Err(AirsignError::validation("transaction carries no witness data"));
        }
        let txid = tx.compute_txid().to_string();
        if !txid.eq_ignore_ascii_case(payload.txid.trim()) {
            return Err(AirsignError::validation(format!(
                "declared txid {} does not match transaction ({txid})",
                payload.txid
            )));
        }
        Ok(Self {
            network: payload.network,
            bytes,
            txid,
        })
    }
}

/// Txid (display hex) of a serialized transaction, with or without witnesses.
pub fn compute_txid(bytes: &[u8]) -> Result<String> {
    Ok(parse_transaction(bytes)?.compute_txid().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::secret::MnemonicPhrase;
    use bitcoin::hashes::{sha256d, Hash as _};
    use eyre::Context as _;

    const ABANDON_ABOUT: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const ADDR_0: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
    const ADDR_1: &str = "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g";

    fn txid(n: u8) -> String {
        hex::encode([n; 32])
    }

    fn request() -> TxRequest {
        TxRequest {
            inputs: vec![
                TxInput {
                    txid: txid(0x11),
                    vout: 0,
                    value: 80_000,
                },
                TxInput {
                    txid: txid(0x22),
                    vout: 3,
                    value: 40_000,
                },
            ],
            outputs: vec![
                TxOutput {
                    address: ADDR_1.to_owned(),
                    value: 100_000,
                },
                TxOutput {
                    address: ADDR_0.to_owned(),
                    value: 15_000,
                },
            ],
            network: Network::Mainnet,
        }
    }

    fn signed() -> eyre::Result<(UnsignedTransaction, SignedTransaction)> {
        let tx = build_transaction(request())?;
        let m = MnemonicPhrase::from(ABANDON_ABOUT);
        let key = keys::derive_private_key(&m, "", Network::Mainnet, 0, 0)?;
        let s = sign_transaction(&tx, &key, Network::Mainnet)?;
        Ok((tx, s))
    }

    #[test]
    fn build_fixes_version_locktime_and_sequence() -> eyre::Result<()> {
        let tx = build_transaction(request())?;
        assert_eq!(tx.version(), 2);
        assert_eq!(tx.locktime(), 0);
        assert_eq!(tx.fee(), 5_000);
        assert!(tx
            .as_bitcoin()
            .input
            .iter()
            .all(|i| i.sequence == Sequence(SEQUENCE_FINAL) && i.witness.is_empty()));
        Ok(())
    }

    #[test]
    fn build_rejects_malformed_requests() {
        let mut r = request();
        r.inputs.clear();
        assert!(matches!(build_transaction(r), Err(AirsignError::ValidationFailed(_))));

        let mut r = request();
        r.outputs.clear();
        assert!(matches!(build_transaction(r), Err(AirsignError::ValidationFailed(_))));

        let mut r = request();
        if let Some(i) = r.inputs.first_mut() {
            i.txid = "abcd".to_owned();
        }
        assert!(matches!(build_transaction(r), Err(AirsignError::ValidationFailed(_))));

        let mut r = request();
        if let Some(o) = r.outputs.first_mut() {
            o.address = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".to_owned();
        }
        assert!(matches!(
            build_transaction(r),
            Err(AirsignError::UnsupportedAddressFormat(_))
        ));

        let mut r = request();
        let dup = r.inputs.first().cloned();
        r.inputs.extend(dup);
        assert!(matches!(build_transaction(r), Err(AirsignError::ValidationFailed(_))));

        let mut r = request();
        if let Some(o) = r.outputs.first_mut() {
            o.value = 1_000_000;
        }
        assert!(matches!(
            build_transaction(r),
            Err(AirsignError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn serialized_bytes_parse_with_rust_bitcoin() -> eyre::Result<()> {
        let (_tx, s) = signed()?;
        let parsed: bitcoin::Transaction =
            bitcoin::consensus::deserialize(s.to_bytes()).context("consensus decode")?;
        assert_eq!(parsed.compute_txid().to_string(), s.txid());
        assert_eq!(bitcoin::consensus::serialize(&parsed), s.to_bytes());
        assert_eq!(parsed.input.len(), 2);
        assert_eq!(parsed.output.len(), 2);
        assert!(parsed.input.iter().all(|i| i.witness.len() == 2));
        Ok(())
    }

    #[test]
    fn txid_is_reversed_on_the_wire() -> eyre::Result<()> {
        let tx = build_transaction(request())?;
        let bytes = serialize(tx.as_bitcoin());
        // version(4), input count(1), then the first outpoint's txid in wire order.
        let mut wire = bytes
            .get(5..37)
            .ok_or_else(|| eyre::eyre!("short transaction"))?
            .to_vec();
        wire.reverse();
        assert_eq!(hex::encode(wire), txid(0x11));
        Ok(())
    }

    #[test]
    fn preimage_hashes_to_the_signed_digest() -> eyre::Result<()> {
        let tx = build_transaction(request())?;
        let pkh: [u8; 20] = address::address_to_script_pubkey(ADDR_0, Network::Mainnet)?
            .as_bytes()
            .get(2..22)
            .ok_or_else(|| eyre::eyre!("short script"))?
            .try_into()?;
        for (i, input) in tx.inputs().iter().enumerate() {
            let preimage = sighash::p2wpkh_preimage(tx.as_bitcoin(), i, &pkh, input.value)?;
            let digest = sighash::p2wpkh_sighash(tx.as_bitcoin(), i, &pkh, input.value)?;
            assert_eq!(sha256d::Hash::hash(&preimage).to_byte_array(), digest, "input {i}");
        }
        Ok(())
    }

    #[test]
    fn payload_round_trip_preserves_fee() -> eyre::Result<()> {
        let tx = build_transaction(request())?;
        let payload = tx.to_payload(Some(1));
        assert_eq!(payload.fee, 5_000);
        assert_eq!(UnsignedTransaction::from_payload(&payload)?, tx);

        let mut lying = payload;
        lying.fee = 1;
        assert!(matches!(
            UnsignedTransaction::from_payload(&lying),
            Err(AirsignError::ValidationFailed(_))
        ));
        Ok(())
    }

    #[test]
    fn signed_payload_checks_txid() -> eyre::Result<()> {
        let (_tx, s) = signed()?;
        let payload = s.to_payload();
        assert_eq!(SignedTransaction::from_payload(&payload)?, s);
        assert_eq!(compute_txid(s.to_bytes())?, s.txid());

        let mut wrong = payload;
        wrong.txid = txid(0x33);
        assert!(SignedTransaction::from_payload(&wrong).is_err());
        Ok(())
    }
}
