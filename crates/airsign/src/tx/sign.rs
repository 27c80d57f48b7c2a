use bitcoin::consensus::encode::deserialize;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Transaction, Witness};

use super::sighash::p2wpkh_script_pubkey;
use super::{SignedTransaction, UnsignedTransaction};
use crate::address::pubkey_hash;
use crate::errors::{AirsignError, Result};
use crate::network::Network;
use crate::secret::PrivateKey;

/// Sign every input with `key` (RFC6979 ECDSA, `SIGHASH_ALL`).
///
/// The result is verified against the BIP-143 digests before it is returned, so a bad key or an
/// encoder bug surfaces as an error instead of an unspendable transaction.
pub fn sign_transaction(
    tx: &UnsignedTransaction,
    key: &PrivateKey,
    network: Network,
) -> Result<SignedTransaction> {
    if tx.network() != network {
        return Err(AirsignError::validation(format!(
            "transaction is for {} but signing was requested for {network}",
            tx.network()
        )));
    }
    let secp = Secp256k1::new();
    let mut sk = key.to_secret_key()?;
    let signed = sign_with(&secp, tx, &sk, network);
    sk.non_secure_erase();
    signed
}

fn sign_with(
    secp: &Secp256k1<All>,
    tx: &UnsignedTransaction,
    sk: &SecretKey,
    network: Network,
) -> Result<SignedTransaction> {
    let pubkey = PublicKey::from_secret_key(secp, sk);
    let spent = p2wpkh_script_pubkey(&pubkey_hash(&pubkey.serialize()));

    let mut signed_tx = tx.as_bitcoin().clone();
    {
        let mut cache = SighashCache::new(&mut signed_tx);
        for (i, input) in tx.inputs().iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    i,
                    &spent,
                    Amount::from_sat(input.value),
                    EcdsaSighashType::All,
                )
                .map_err(|e| AirsignError::validation(format!("input {i}: sighash: {e}")))?;
            let sig = secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), sk);
            let witness = cache
                .witness_mut(i)
                .ok_or_else(|| AirsignError::validation(format!("input {i}: no witness slot")))?;
            *witness = Witness::p2wpkh(&bitcoin::ecdsa::Signature::sighash_all(sig), &pubkey);
        }
    }

    verify_tx(secp, &signed_tx, &tx.input_values(), &pubkey.serialize())?;
    let signed = SignedTransaction::from_bitcoin(&signed_tx, network);
    tracing::info!(
        txid = signed.txid(),
        inputs = tx.inputs().len(),
        outputs = tx.outputs().len(),
        fee = tx.fee(),
        "signed transaction"
    );
    Ok(signed)
}

/// Check that every input of a serialized transaction carries a valid `[sig, pubkey]` witness
/// for `pubkey`, given the values of the outputs being spent.
pub fn verify_signed_transaction(
    bytes: &[u8],
    input_values: &[u64],
    pubkey: &[u8; 33],
) -> Result<()> {
    let tx: Transaction =
        deserialize(bytes).map_err(|e| AirsignError::validation(format!("transaction: {e}")))?;
    verify_tx(&Secp256k1::new(), &tx, input_values, pubkey)
}

fn verify_tx(
    secp: &Secp256k1<All>,
    tx: &Transaction,
    input_values: &[u64],
    pubkey: &[u8; 33],
) -> Result<()> {
    if tx.input.len() != input_values.len() {
        return Err(AirsignError::validation(format!(
            "{} inputs but {} input values",
            tx.input.len(),
            input_values.len()
        )));
    }
    let pk = PublicKey::from_slice(pubkey)
        .map_err(|e| AirsignError::validation(format!("public key: {e}")))?;
    let spent = p2wpkh_script_pubkey(&pubkey_hash(pubkey));
    let mut cache = SighashCache::new(tx);

    for (i, (input, value)) in tx.input.iter().zip(input_values).enumerate() {
        let stack = input.witness.to_vec();
        let [sig_item, key_item] = stack.as_slice() else {
            return Err(AirsignError::validation(format!(
                "input {i}: expected 2 witness items, got {}",
                stack.len()
            )));
        };
        if key_item.as_slice() != pubkey.as_slice() {
            return Err(AirsignError::validation(format!(
                "input {i}: witness public key does not match"
            )));
        }
        let Some((&hash_type, der)) = sig_item.split_last() else {
            return Err(AirsignError::validation(format!("input {i}: empty signature")));
        };
        if u32::from(hash_type) != EcdsaSighashType::All.to_u32() {
            return Err(AirsignError::validation(format!(
                "input {i}: unsupported sighash type {hash_type:#04x}"
            )));
        }
        let sig = Signature::from_der(der)
            .map_err(|e| AirsignError::validation(format!("input {i}: signature: {e}")))?;
        let digest = cache
            .p2wpkh_signature_hash(i, &spent, Amount::from_sat(*value), EcdsaSighashType::All)
            .map_err(|e| AirsignError::validation(format!("input {i}: sighash: {e}")))?;
        secp.verify_ecdsa(&Message::from_digest(digest.to_byte_array()), &sig, &pk)
            .map_err(|e| AirsignError::validation(format!("input {i}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::secret::MnemonicPhrase;
    use crate::tx::{build_transaction, TxInput, TxOutput, TxRequest};

    const ABANDON_ABOUT: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn unsigned(network: Network) -> eyre::Result<UnsignedTransaction> {
        let m = MnemonicPhrase::from(ABANDON_ABOUT);
        let to = keys::derive_address(&m, network, 0, 5)?.address;
        Ok(build_transaction(TxRequest {
            inputs: vec![TxInput {
                txid: hex::encode([0x42_u8; 32]),
                vout: 1,
                value: 25_000,
            }],
            outputs: vec![TxOutput {
                address: to,
                value: 24_000,
            }],
            network,
        })?)
    }

    fn key_and_pubkey(network: Network) -> eyre::Result<(PrivateKey, [u8; 33])> {
        let m = MnemonicPhrase::from(ABANDON_ABOUT);
        let key = keys::derive_private_key(&m, "", network, 0, 0)?;
        let secp = Secp256k1::new();
        let pk = PublicKey::from_secret_key(&secp, &key.to_secret_key()?).serialize();
        Ok((key, pk))
    }

    #[test]
    fn signatures_verify_and_are_deterministic() -> eyre::Result<()> {
        let tx = unsigned(Network::Testnet)?;
        let (key, pk) = key_and_pubkey(Network::Testnet)?;
        let a = sign_transaction(&tx, &key, Network::Testnet)?;
        let b = sign_transaction(&tx, &key, Network::Testnet)?;
        assert_eq!(a, b, "RFC6979 signing is deterministic");
        verify_signed_transaction(a.to_bytes(), &[25_000], &pk)?;
        Ok(())
    }

    #[test]
    fn witness_is_signature_then_pubkey() -> eyre::Result<()> {
        let tx = unsigned(Network::Mainnet)?;
        let (key, pk) = key_and_pubkey(Network::Mainnet)?;
        let s = sign_transaction(&tx, &key, Network::Mainnet)?;
        let parsed: Transaction = deserialize(s.to_bytes())?;
        let stack = parsed
            .input
            .first()
            .map(|i| i.witness.to_vec())
            .unwrap_or_default();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.first().and_then(|s| s.last()), Some(&0x01));
        assert_eq!(stack.get(1).map(Vec::as_slice), Some(&pk[..]));
        Ok(())
    }

    #[test]
    fn wrong_input_value_fails_verification() -> eyre::Result<()> {
        let tx = unsigned(Network::Mainnet)?;
        let (key, pk) = key_and_pubkey(Network::Mainnet)?;
        let s = sign_transaction(&tx, &key, Network::Mainnet)?;
        assert!(verify_signed_transaction(s.to_bytes(), &[25_001], &pk).is_err());
        assert!(verify_signed_transaction(s.to_bytes(), &[], &pk).is_err());
        Ok(())
    }

    #[test]
    fn unsigned_bytes_fail_verification() -> eyre::Result<()> {
        let tx = unsigned(Network::Mainnet)?;
        let (_key, pk) = key_and_pubkey(Network::Mainnet)?;
        let bytes = bitcoin::consensus::encode::serialize(tx.as_bitcoin());
        assert!(verify_signed_transaction(&bytes, &[25_000], &pk).is_err());
        Ok(())
    }

    #[test]
    fn other_pubkey_is_rejected() -> eyre::Result<()> {
        let tx = unsigned(Network::Mainnet)?;
        let (key, _pk) = key_and_pubkey(Network::Mainnet)?;
        let s = sign_transaction(&tx, &key, Network::Mainnet)?;
        let mut other = [0x02_u8; 33];
        other[1] = 0x79;
        assert!(verify_signed_transaction(s.to_bytes(), &[25_000], &other).is_err());
        Ok(())
    }

    #[test]
    fn network_mismatch_is_refused() -> eyre::Result<()> {
        let tx = unsigned(Network::Testnet)?;
        let (key, _pk) = key_and_pubkey(Network::Mainnet)?;
        let r = sign_transaction(&tx, &key, Network::Mainnet);
        assert!(matches!(r, Err(AirsignError::ValidationFailed(_))));
        Ok(())
    }
}
