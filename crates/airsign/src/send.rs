//! The two halves of a send.
//!
//! The online watch device calls [`prepare_send`] and later [`broadcast_signed`]; the offline
//! signer calls [`sign_envelope`]. The only thing crossing the air gap is envelope text.

use crate::coinselect::{self, CoinSelection};
use crate::errors::{AirsignError, Result};
use crate::interchange;
use crate::keys;
use crate::network::Network;
use crate::provider::{self, ChainDataProvider, FeeQuote, FeeSource, FeeTarget};
use crate::secret::{self, MnemonicPhrase};
use crate::tx::{self, SignedTransaction, TxOutput, TxRequest, UnsignedTransaction};

/// How the watch side picks a fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeChoice {
    /// Use exactly this rate (sat/vB); the provider is not asked.
    Fixed(u64),
    /// Ask the provider for `target`; fall back to `fallback` only if one is given.
    Estimate {
        target: FeeTarget,
        fallback: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Our address: UTXOs are fetched from it and change returns to it.
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub network: Network,
    pub fee: FeeChoice,
}

#[derive(Debug, Clone)]
pub struct PreparedSend {
    pub tx: UnsignedTransaction,
    pub selection: CoinSelection,
    pub quote: FeeQuote,
    pub change_index: Option<u32>,
    /// The unsigned envelope, ready for [`interchange::chunk::split`].
    pub envelope: String,
}

/// Fetch UTXOs and a fee rate, select coins and build the unsigned envelope.
pub async fn prepare_send(
    provider: &dyn ChainDataProvider,
    request: &SendRequest,
) -> Result<PreparedSend> {
    let network = request.network;
    if !crate::address::is_valid_for(&request.from, network) {
        return Err(AirsignError::UnsupportedAddressFormat(request.from.clone()));
    }
    // Catch a bad destination before any network round trip.
    crate::address::address_to_script_pubkey(&request.to, network)?;
    if request.amount == 0 {
        return Err(AirsignError::validation("amount must be positive"));
    }

    let quote = match request.fee {
        FeeChoice::Fixed(rate)
            if !(provider::MIN_FEE_RATE..=provider::MAX_FEE_RATE).contains(&rate) =>
        {
            return Err(AirsignError::validation(format!(
                "fee rate {rate} sat/vB is outside {}..={}",
                provider::MIN_FEE_RATE,
                provider::MAX_FEE_RATE
            )));
        }
        FeeChoice::Fixed(rate) => FeeQuote {
            sat_per_vb: rate,
            source: FeeSource::Live,
        },
        FeeChoice::Estimate { target, fallback } => {
            provider::quote_fee(provider, network, target, fallback).await?
        }
    };

    let utxos = provider.get_utxos(&request.from, network).await?;
    let selection = coinselect::select_utxos(&utxos, request.amount, quote.sat_per_vb)?;

    let mut outputs = vec![TxOutput {
        address: request.to.clone(),
        value: request.amount,
    }];
    let change_index = if selection.has_change() {
        outputs.push(TxOutput {
            address: request.from.clone(),
            value: selection.change,
        });
        Some(1)
    } else {
        None
    };

    let tx = tx::build_transaction(TxRequest {
        inputs: selection.selected.iter().map(tx::Utxo::to_input).collect(),
        outputs,
        network,
    })?;
    let envelope = interchange::encode_unsigned(&tx, change_index)?;
    tracing::info!(
        inputs = tx.inputs().len(),
        outputs = tx.outputs().len(),
        fee = tx.fee(),
        sat_per_vb = quote.sat_per_vb,
        fallback_fee = quote.is_fallback(),
        "prepared unsigned transaction"
    );
    Ok(PreparedSend {
        tx,
        selection,
        quote,
        change_index,
        envelope,
    })
}

/// Signer side: decode an unsigned envelope, sign with the key at `account`/`index` and return
/// the signed transaction plus its envelope.
///
/// If the envelope marks a change output, it must pay back to the signing key's own address.
pub fn sign_envelope(
    encoded: &str,
    phrase: &MnemonicPhrase,
    passphrase: &str,
    account: u32,
    index: u32,
) -> Result<(SignedTransaction, String)> {
    let payload = interchange::decode_unsigned(encoded)?;
    let network = payload.network;
    let unsigned = UnsignedTransaction::from_payload(&payload)?;

    if let Some(ci) = payload.change_index {
        let ours = keys::derive_address_with_passphrase(phrase, passphrase, network, account, index)?;
        let change = usize::try_from(ci)
            .ok()
            .and_then(|i| unsigned.outputs().get(i))
            .ok_or_else(|| AirsignError::validation("change index out of range"))?;
        if change.address != ours.address {
            return Err(AirsignError::validation(format!(
                "change output pays {} which is not this wallet's {}",
                change.address, ours.path
            )));
        }
    }

    let signed = secret::with_private_key(
        || keys::derive_private_key(phrase, passphrase, network, account, index),
        |key| tx::sign_transaction(&unsigned, key, network),
    )?;
    let envelope = interchange::encode_signed(&signed)?;
    Ok((signed, envelope))
}

/// Watch side: broadcast a signed envelope and check the node reports the same txid.
pub async fn broadcast_signed(provider: &dyn ChainDataProvider, encoded: &str) -> Result<String> {
    let payload = interchange::decode_signed(encoded)?;
    let signed = SignedTransaction::from_payload(&payload)?;
    let reported = provider
        .broadcast_transaction(&signed.to_hex(), signed.network())
        .await?;
    if !reported.eq_ignore_ascii_case(signed.txid()) {
        return Err(AirsignError::Provider(format!(
            "node reported txid {reported}, expected {}",
            signed.txid()
        )));
    }
    Ok(signed.txid().to_owned())
}
