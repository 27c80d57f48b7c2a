//! PSBT-lite: the envelope that carries transactions between the watch and signer devices.
//!
//! Wire form is `base64(JSON { magic, version, data })`. Decoding checks, in order, the encoding
//! (`FormatMismatch`), the magic tag (`FormatMismatch`), the envelope version
//! (`UnsupportedVersion`), then the payload itself (`ValidationFailed`). Nothing is partially
//! recovered.

pub mod chunk;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::{AirsignError, Result};
use crate::network::Network;
use crate::tx;

pub const UNSIGNED_MAGIC: &str = "AIRSIGN-PSBT-LITE";
pub const SIGNED_MAGIC: &str = "AIRSIGN-SIGNED-TX";
/// Highest envelope version this build reads and the version it writes.
pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadInput {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadOutput {
    pub address: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedPayload {
    /// Transaction version, not the envelope version.
    pub version: u32,
    pub inputs: Vec<PayloadInput>,
    pub outputs: Vec<PayloadOutput>,
    pub network: Network,
    pub fee: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
    pub tx_hex: String,
    pub txid: String,
    pub network: Network,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Unsigned(UnsignedPayload),
    Signed(SignedPayload),
}

impl Envelope {
    pub const fn magic(&self) -> &'static str {
        match self {
            Self::Unsigned(_) => UNSIGNED_MAGIC,
            Self::Signed(_) => SIGNED_MAGIC,
        }
    }

    pub const fn network(&self) -> Network {
        match self {
            Self::Unsigned(p) => p.network,
            Self::Signed(p) => p.network,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Unsigned(p) => p.validate(),
            Self::Signed(p) => p.validate(),
        }
    }
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl UnsignedPayload {
    /// Structural checks only; address checksums are verified when the transaction is rebuilt.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(AirsignError::validation("payload has no inputs"));
        }
        if self.outputs.is_empty() {
            return Err(AirsignError::validation("payload has no outputs"));
        }
        for (i, input) in self.inputs.iter().enumerate() {
            if !is_hex64(&input.txid) {
                return Err(AirsignError::validation(format!(
                    "input {i}: txid must be 64 hex characters"
                )));
            }
            if input.value == 0 {
                return Err(AirsignError::validation(format!("input {i}: value must be positive")));
            }
        }
        for (i, output) in self.outputs.iter().enumerate() {
            if output.address.trim().is_empty() {
                return Err(AirsignError::validation(format!("output {i}: empty address")));
            }
            if output.value == 0 {
                return Err(AirsignError::validation(format!(
                    "output {i}: value must be positive"
                )));
            }
        }
        if let Some(idx) = self.change_index {
            if !matches!(usize::try_from(idx), Ok(i) if i < self.outputs.len()) {
                return Err(AirsignError::validation(format!(
                    "changeIndex {idx} is out of range for {} outputs",
                    self.outputs.len()
                )));
            }
        }
        Ok(())
    }
}

impl SignedPayload {
    /// Checks that the hex parses as a witness transaction whose txid matches `txid`.
    pub fn validate(&self) -> Result<()> {
        if !is_hex64(&self.txid) {
            return Err(AirsignError::validation("txid must be 64 hex characters"));
        }
        let bytes = hex::decode(&self.tx_hex)
            .map_err(|e| AirsignError::validation(format!("txHex: {e}")))?;
        if !tx::compute_txid(&bytes)?.eq_ignore_ascii_case(&self.txid) {
            return Err(AirsignError::validation("txid does not match txHex"));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WireOut<'a, T> {
    magic: &'a str,
    version: u32,
    data: &'a T,
}

// Read wider than written so an oversized version is reported as unsupported rather than
// as a malformed envelope.
#[derive(Deserialize)]
struct WireIn {
    magic: String,
    version: u64,
    data: serde_json::Value,
}

/// Validate and serialize an envelope.
pub fn encode(envelope: &Envelope) -> Result<String> {
    envelope.validate()?;
    let json = match envelope {
        Envelope::Unsigned(p) => serde_json::to_vec(&WireOut {
            magic: UNSIGNED_MAGIC,
            version: ENVELOPE_VERSION,
            data: p,
        }),
        Envelope::Signed(p) => serde_json::to_vec(&WireOut {
            magic: SIGNED_MAGIC,
            version: ENVELOPE_VERSION,
            data: p,
        }),
    }
    .map_err(|e| AirsignError::validation(format!("serialize envelope: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

fn decode_wire(encoded: &str) -> Result<WireIn> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| AirsignError::FormatMismatch(format!("not base64: {e}")))?;
    let wire: WireIn = serde_json::from_slice(&bytes)
        .map_err(|e| AirsignError::FormatMismatch(format!("not an envelope: {e}")))?;
    if wire.magic != UNSIGNED_MAGIC && wire.magic != SIGNED_MAGIC {
        return Err(AirsignError::FormatMismatch(format!(
            "unknown magic {:?}",
            wire.magic
        )));
    }
    if wire.version == 0 || wire.version > u64::from(ENVELOPE_VERSION) {
        return Err(AirsignError::UnsupportedVersion {
            found: wire.version,
            supported: ENVELOPE_VERSION,
        });
    }
    Ok(wire)
}

fn payload<T: serde::de::DeserializeOwned>(data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| AirsignError::validation(format!("payload: {e}")))
}

fn from_wire(wire: WireIn) -> Result<Envelope> {
    let envelope = if wire.magic == UNSIGNED_MAGIC {
        Envelope::Unsigned(payload(wire.data)?)
    } else {
        Envelope::Signed(payload(wire.data)?)
    };
    envelope.validate()?;
    Ok(envelope)
}

/// Decode either envelope kind.
pub fn decode(encoded: &str) -> Result<Envelope> {
    from_wire(decode_wire(encoded)?)
}

/// Decode an envelope that must carry an unsigned transaction.
pub fn decode_unsigned(encoded: &str) -> Result<UnsignedPayload> {
    match decode_expecting(encoded, UNSIGNED_MAGIC)? {
        Envelope::Unsigned(p) => Ok(p),
        Envelope::Signed(_) => Err(AirsignError::FormatMismatch(format!(
            "expected {UNSIGNED_MAGIC}"
        ))),
    }
}

/// Decode an envelope that must carry a signed transaction.
pub fn decode_signed(encoded: &str) -> Result<SignedPayload> {
    match decode_expecting(encoded, SIGNED_MAGIC)? {
        Envelope::Signed(p) => Ok(p),
        Envelope::Unsigned(_) => Err(AirsignError::FormatMismatch(format!(
            "expected {SIGNED_MAGIC}"
        ))),
    }
}

fn decode_expecting(encoded: &str, magic: &str) -> Result<Envelope> {
    let wire = decode_wire(encoded)?;
    if wire.magic != magic {
        return Err(AirsignError::FormatMismatch(format!(
            "expected {magic}, found {}",
            wire.magic
        )));
    }
    from_wire(wire)
}

/// Convenience for the watch side: encode a built transaction.
pub fn encode_unsigned(tx: &tx::UnsignedTransaction, change_index: Option<u32>) -> Result<String> {
    encode(&Envelope::Unsigned(tx.to_payload(change_index)))
}

pub fn encode_signed(tx: &tx::SignedTransaction) -> Result<String> {
    encode(&Envelope::Signed(tx.to_payload()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned() -> UnsignedPayload {
        UnsignedPayload {
            version: 2,
            inputs: vec![PayloadInput {
                txid: "aa".repeat(32),
                vout: 0,
                value: 50_000,
            }],
            outputs: vec![
                PayloadOutput {
                    address: "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g".to_owned(),
                    value: 30_000,
                },
                PayloadOutput {
                    address: "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu".to_owned(),
                    value: 19_000,
                },
            ],
            network: Network::Mainnet,
            fee: 1_000,
            change_index: Some(1),
        }
    }

    fn wire(magic: &str, version: u64, data: &serde_json::Value) -> eyre::Result<String> {
        let json = serde_json::to_vec(&serde_json::json!({
            "magic": magic,
            "version": version,
            "data": data,
        }))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    #[test]
    fn unsigned_round_trip() -> eyre::Result<()> {
        let env = Envelope::Unsigned(unsigned());
        let s = encode(&env)?;
        assert_eq!(decode(&s)?, env);
        assert_eq!(decode_unsigned(&s)?, unsigned());
        Ok(())
    }

    #[test]
    fn wire_uses_camel_case_and_omits_missing_change() -> eyre::Result<()> {
        let mut p = unsigned();
        p.change_index = None;
        let s = encode(&Envelope::Unsigned(p))?;
        let json: serde_json::Value =
            serde_json::from_slice(&base64::engine::general_purpose::STANDARD.decode(&s)?)?;
        assert_eq!(json["magic"], UNSIGNED_MAGIC);
        assert_eq!(json["version"], 1);
        assert_eq!(json["data"]["network"], "mainnet");
        assert!(json["data"].get("changeIndex").is_none());

        let s = encode(&Envelope::Unsigned(unsigned()))?;
        let json: serde_json::Value =
            serde_json::from_slice(&base64::engine::general_purpose::STANDARD.decode(&s)?)?;
        assert_eq!(json["data"]["changeIndex"], 1);
        Ok(())
    }

    #[test]
    fn wrong_magic_is_format_mismatch() -> eyre::Result<()> {
        let data = serde_json::to_value(unsigned())?;
        let s = wire("SOMETHING-ELSE", 1, &data)?;
        assert!(matches!(decode(&s), Err(AirsignError::FormatMismatch(_))));
        assert!(matches!(decode("not base64!!"), Err(AirsignError::FormatMismatch(_))));

        let signed_magic = wire(SIGNED_MAGIC, 1, &data)?;
        assert!(matches!(
            decode_unsigned(&signed_magic),
            Err(AirsignError::FormatMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn newer_version_is_unsupported() -> eyre::Result<()> {
        let data = serde_json::to_value(unsigned())?;
        let s = wire(UNSIGNED_MAGIC, u64::from(ENVELOPE_VERSION) + 1, &data)?;
        assert_eq!(
            decode(&s),
            Err(AirsignError::UnsupportedVersion {
                found: 2,
                supported: 1
            })
        );
        Ok(())
    }

    #[test]
    fn version_beyond_u32_is_unsupported_not_malformed() -> eyre::Result<()> {
        let data = serde_json::to_value(unsigned())?;
        let s = wire(UNSIGNED_MAGIC, 4_294_967_296, &data)?;
        assert_eq!(
            decode(&s),
            Err(AirsignError::UnsupportedVersion {
                found: 4_294_967_296,
                supported: 1
            })
        );
        let s = wire(UNSIGNED_MAGIC, 0, &data)?;
        assert!(matches!(
            decode(&s),
            Err(AirsignError::UnsupportedVersion { found: 0, .. })
        ));
        Ok(())
    }

    #[test]
    fn structural_problems_are_validation_failures() -> eyre::Result<()> {
        let mut p = unsigned();
        p.inputs.clear();
        let s = wire(UNSIGNED_MAGIC, 1, &serde_json::to_value(&p)?)?;
        assert!(matches!(decode(&s), Err(AirsignError::ValidationFailed(_))));

        let mut p = unsigned();
        if let Some(i) = p.inputs.first_mut() {
            i.txid = "zz".repeat(32);
        }
        assert!(matches!(
            encode(&Envelope::Unsigned(p)),
            Err(AirsignError::ValidationFailed(_))
        ));

        let mut p = unsigned();
        p.change_index = Some(2);
        assert!(Envelope::Unsigned(p).validate().is_err());

        let mut data = serde_json::to_value(unsigned())?;
        data["network"] = serde_json::json!("regtest");
        let s = wire(UNSIGNED_MAGIC, 1, &data)?;
        assert!(matches!(decode(&s), Err(AirsignError::ValidationFailed(_))));
        Ok(())
    }

    #[test]
    fn signed_payload_must_match_its_txid() -> eyre::Result<()> {
        // Minimal one-in one-out transaction with no witnesses.
        let unsigned = bitcoin::Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![bitcoin::TxIn {
                previous_output: bitcoin::OutPoint::new(
                    tx::parse_txid(&"07".repeat(32))?,
                    0,
                ),
                script_sig: bitcoin::ScriptBuf::new(),
                sequence: bitcoin::Sequence(tx::SEQUENCE_FINAL),
                witness: bitcoin::Witness::new(),
            }],
            output: vec![bitcoin::TxOut {
                value: bitcoin::Amount::from_sat(1_000),
                script_pubkey: tx::sighash::p2wpkh_script_pubkey(&[0; 20]),
            }],
        };
        let good = SignedPayload {
            tx_hex: hex::encode(bitcoin::consensus::encode::serialize(&unsigned)),
            txid: unsigned.compute_txid().to_string(),
            network: Network::Testnet,
        };
        let s = encode(&Envelope::Signed(good.clone()))?;
        assert_eq!(decode_signed(&s)?, good);

        let bad = SignedPayload {
            txid: "00".repeat(32),
            ..good
        };
        assert!(encode(&Envelope::Signed(bad)).is_err());
        Ok(())
    }
}
