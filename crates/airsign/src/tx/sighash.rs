//! BIP-143 signature digest for native P2WPKH inputs.
//!
//! Digests come from `bitcoin`'s [`SighashCache`]; the helpers here expose the intermediate
//! hashes and the preimage for inspection.

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256d, Hash as _};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, PubkeyHash, ScriptBuf, Transaction, WPubkeyHash};

use crate::errors::{AirsignError, Result};

/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`; serialized length-prefixed in the preimage.
pub fn p2wpkh_script_code(pubkey_hash: &[u8; 20]) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(*pubkey_hash))
}

/// `OP_0 <20>` output script being spent.
pub fn p2wpkh_script_pubkey(pubkey_hash: &[u8; 20]) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(*pubkey_hash))
}

/// The three transaction-wide hashes shared by every input's preimage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bip143Hashes {
    pub hash_prevouts: [u8; 32],
    pub hash_sequence: [u8; 32],
    pub hash_outputs: [u8; 32],
}

impl Bip143Hashes {
    pub fn new(tx: &Transaction) -> Self {
        let prevouts: Vec<u8> = tx
            .input
            .iter()
            .flat_map(|i| serialize(&i.previous_output))
            .collect();
        let sequences: Vec<u8> = tx.input.iter().flat_map(|i| serialize(&i.sequence)).collect();
        let outputs: Vec<u8> = tx.output.iter().flat_map(serialize).collect();
        Self {
            hash_prevouts: sha256d::Hash::hash(&prevouts).to_byte_array(),
            hash_sequence: sha256d::Hash::hash(&sequences).to_byte_array(),
            hash_outputs: sha256d::Hash::hash(&outputs).to_byte_array(),
        }
    }
}

/// Digest preimage for input `index` spending a P2WPKH output of `value` sats.
pub fn p2wpkh_preimage(
    tx: &Transaction,
    index: usize,
    pubkey_hash: &[u8; 20],
    value: u64,
) -> Result<Vec<u8>> {
    let mut preimage = Vec::with_capacity(182);
    SighashCache::new(tx)
        .segwit_v0_encode_signing_data_to(
            &mut preimage,
            index,
            &p2wpkh_script_code(pubkey_hash),
            Amount::from_sat(value),
            EcdsaSighashType::All,
        )
        .map_err(|e| AirsignError::validation(format!("input {index}: {e}")))?;
    Ok(preimage)
}

/// `SIGHASH_ALL` digest for input `index`.
pub fn p2wpkh_sighash(
    tx: &Transaction,
    index: usize,
    pubkey_hash: &[u8; 20],
    value: u64,
) -> Result<[u8; 32]> {
    SighashCache::new(tx)
        .p2wpkh_signature_hash(
            index,
            &p2wpkh_script_pubkey(pubkey_hash),
            Amount::from_sat(value),
            EcdsaSighashType::All,
        )
        .map(|h| h.to_byte_array())
        .map_err(|e| AirsignError::validation(format!("input {index}: {e}")))
}
