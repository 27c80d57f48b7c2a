//! Segwit address codec.
//!
//! Witness v0 uses bech32 and v1 (Taproot) uses bech32m, per BIP-350. Output construction is
//! limited to P2WPKH and P2TR; everything else is reported as unsupported.

use bitcoin::bech32::{segwit, Fe32, Hrp};
use bitcoin::hashes::{hash160, Hash as _};
use bitcoin::{ScriptBuf, WitnessVersion};
use serde::{Deserialize, Serialize};

use crate::errors::{AirsignError, Result};
use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Legacy,
    SegwitP2sh,
    NativeSegwit,
    Taproot,
    Unknown,
}

/// Decoded segwit output: version plus program bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessProgram {
    pub version: u8,
    pub program: Vec<u8>,
}

impl WitnessProgram {
    pub fn script_pubkey(&self) -> Result<ScriptBuf> {
        let unsupported = || {
            AirsignError::UnsupportedAddressFormat(format!(
                "witness v{} with {}-byte program",
                self.version,
                self.program.len()
            ))
        };
        if !matches!((self.version, self.program.len()), (0, 20) | (1, 32)) {
            return Err(unsupported());
        }
        let version = WitnessVersion::try_from(self.version).map_err(|_e| unsupported())?;
        let program =
            bitcoin::WitnessProgram::new(version, &self.program).map_err(|_e| unsupported())?;
        Ok(ScriptBuf::new_witness_program(&program))
    }
}

/// Prefix/length classification. Does not verify checksums of non-bech32 addresses.
pub fn classify_address(address: &str) -> AddressType {
    let a = address.trim();
    let lower = a.to_ascii_lowercase();
    let len = a.len();

    let segwit_body = lower
        .strip_prefix("bc1")
        .or_else(|| lower.strip_prefix("tb1"));
    if let Some(body) = segwit_body {
        return match (body.chars().next(), len) {
            (Some('q'), 42) => AddressType::NativeSegwit,
            (Some('p'), 62) => AddressType::Taproot,
            _ => AddressType::Unknown,
        };
    }

    if !(26..=35).contains(&len) {
        return AddressType::Unknown;
    }
    match a.chars().next() {
        Some('1' | 'm' | 'n') => AddressType::Legacy,
        Some('3' | '2') => AddressType::SegwitP2sh,
        _ => AddressType::Unknown,
    }
}

fn hrp_for(network: Network) -> Result<Hrp> {
    Hrp::parse(network.hrp()).map_err(|e| AirsignError::validation(format!("hrp: {e}")))
}

/// Decode a segwit address, checking the checksum variant and the network prefix.
pub fn decode_address(address: &str, network: Network) -> Result<WitnessProgram> {
    let a = address.trim();
    match classify_address(a) {
        AddressType::NativeSegwit | AddressType::Taproot | AddressType::Unknown => {}
        AddressType::Legacy | AddressType::SegwitP2sh => {
            return Err(AirsignError::UnsupportedAddressFormat(format!(
                "base58 address not supported as an output: {a}"
            )));
        }
    }

    let (hrp, version, program) = segwit::decode(a)
        .map_err(|e| AirsignError::UnsupportedAddressFormat(format!("{a}: {e}")))?;
    if hrp.to_lowercase() != network.hrp() {
        return Err(AirsignError::validation(format!(
            "address {a} is not a {network} address"
        )));
    }
    Ok(WitnessProgram {
        version: version.to_u8(),
        program,
    })
}

/// `OP_0 <20>` for P2WPKH, `OP_1 <32>` for P2TR.
pub fn address_to_script_pubkey(address: &str, network: Network) -> Result<ScriptBuf> {
    decode_address(address, network)?.script_pubkey()
}

pub fn encode_segwit(network: Network, version: u8, program: &[u8]) -> Result<String> {
    let fe = Fe32::try_from(version)
        .map_err(|e| AirsignError::UnsupportedAddressFormat(format!("witness version: {e}")))?;
    segwit::encode(hrp_for(network)?, fe, program)
        .map_err(|e| AirsignError::UnsupportedAddressFormat(format!("encode: {e}")))
}

pub fn pubkey_hash(pubkey: &[u8; 33]) -> [u8; 20] {
    hash160::Hash::hash(pubkey).to_byte_array()
}

/// Native segwit v0 address for a compressed public key.
pub fn p2wpkh_address(pubkey: &[u8; 33], network: Network) -> Result<String> {
    encode_segwit(network, 0, &pubkey_hash(pubkey))
}

/// Key-path Taproot address for an already-tweaked x-only output key.
pub fn p2tr_address(output_key: &[u8; 32], network: Network) -> Result<String> {
    encode_segwit(network, 1, output_key)
}

pub fn is_valid_for(address: &str, network: Network) -> bool {
    address_to_script_pubkey(address, network).is_ok()
}
