//! Largest-first coin selection and the virtual-size fee model.
//!
//! The size model is `ceil(10.5 + 68 * inputs + 31 * outputs)` vbytes. It is an approximation
//! for P2WPKH inputs and outputs, not an exact weight calculation.

use crate::errors::AirsignError;
use crate::tx::Utxo;

/// Change at or below this value is never emitted as an output; it is added to the fee.
pub const DUST_THRESHOLD_SATS: u64 = 546;

/// Outputs assumed while selecting: recipient plus change.
const OUTPUTS_WITH_CHANGE: u64 = 2;

/// Estimated virtual size in vbytes, rounded up.
pub fn estimate_vbytes(inputs: u64, outputs: u64) -> u64 {
    // ceil((21 + 136i + 62o) / 2) keeps the half-byte overhead exact in integers.
    let doubled = 21_u64
        .saturating_add(inputs.saturating_mul(136))
        .saturating_add(outputs.saturating_mul(62));
    doubled.saturating_add(1) / 2
}

pub fn fee_for(inputs: u64, outputs: u64, sat_per_vb: u64) -> u64 {
    sat_per_vb.saturating_mul(estimate_vbytes(inputs, outputs))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub selected: Vec<Utxo>,
    pub fee: u64,
    /// Zero when the remainder was dust and got folded into `fee`.
    pub change: u64,
}

impl CoinSelection {
    pub const fn has_change(&self) -> bool {
        self.change > 0
    }

    pub fn total_input(&self) -> u64 {
        self.selected.iter().map(|u| u.value).sum()
    }
}

/// Selection ran out of UTXOs before covering target plus fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub required: u64,
    pub available: u64,
}

impl From<Shortfall> for AirsignError {
    fn from(s: Shortfall) -> Self {
        Self::InsufficientFunds {
            required: s.required,
            available: s.available,
        }
    }
}

/// Pick UTXOs largest-first until they cover `target` plus the fee for a two-output transaction.
///
/// Ties are broken by txid then vout, so the same set always yields the same selection.
/// Exhaustion is an ordinary outcome reported as [`Shortfall`].
pub fn select_utxos(utxos: &[Utxo], target: u64, sat_per_vb: u64) -> Result<CoinSelection, Shortfall> {
    let mut candidates: Vec<&Utxo> = utxos.iter().filter(|u| u.value > 0).collect();
    candidates.sort_by(|a, b| {
        b.value
            .cmp(&a.value)
            .then_with(|| a.txid.cmp(&b.txid))
            .then_with(|| a.vout.cmp(&b.vout))
    });

    let mut selected = Vec::new();
    let mut total = 0_u64;
    for utxo in candidates {
        selected.push(utxo.clone());
        total = total.saturating_add(utxo.value);

        let fee = fee_for(selected.len() as u64, OUTPUTS_WITH_CHANGE, sat_per_vb);
        let Some(change) = total
            .checked_sub(target)
            .and_then(|rest| rest.checked_sub(fee))
        else {
            continue;
        };

        let (fee, change) = if change <= DUST_THRESHOLD_SATS {
            (fee + change, 0)
        } else {
            (fee, change)
        };
        tracing::debug!(
            inputs = selected.len(),
            total,
            target,
            fee,
            change,
            "coin selection satisfied"
        );
        return Ok(CoinSelection {
            selected,
            fee,
            change,
        });
    }

    let inputs = (selected.len() as u64).max(1);
    Err(Shortfall {
        required: target.saturating_add(fee_for(inputs, OUTPUTS_WITH_CHANGE, sat_per_vb)),
        available: total,
    })
}
