use crate::errors::{AirsignError, Result};
use crate::tx::MAX_MONEY_SATS;

pub const BTC_DECIMALS: u32 = 8;
const SATS_PER_BTC: u64 = 100_000_000;

/// Parse a user-entered amount into satoshis without going through floats.
///
/// `"0.5"` and `"0.5btc"` are BTC; `"1500sats"` / `"1500 sat"` are satoshis.
pub fn parse_amount_sats(s: &str) -> Result<u64> {
    let s = s.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err(AirsignError::validation("empty amount"));
    }

    let sats = if let Some(n) = s.strip_suffix("sats").or_else(|| s.strip_suffix("sat")) {
        let n = n.trim();
        n.parse::<u64>()
            .map_err(|e| AirsignError::validation(format!("invalid satoshi amount {n:?}: {e}")))?
    } else {
        parse_btc_to_sats(s.strip_suffix("btc").unwrap_or(&s).trim())?
    };

    if sats == 0 {
        return Err(AirsignError::validation("amount must be positive"));
    }
    if sats > MAX_MONEY_SATS {
        return Err(AirsignError::validation("amount exceeds the 21M BTC supply"));
    }
    Ok(sats)
}

pub fn parse_btc_to_sats(s: &str) -> Result<u64> {
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.starts_with('-') {
        return Err(AirsignError::validation("amount must be non-negative"));
    }
    if whole.is_empty() && frac.is_empty() {
        return Err(AirsignError::validation("empty amount"));
    }
    if frac.len() > BTC_DECIMALS as usize {
        return Err(AirsignError::validation(
            "too many decimal places for BTC (max 8)",
        ));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(AirsignError::validation(format!("invalid BTC amount: {s}")));
    }

    let whole_v: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|e| AirsignError::validation(format!("parse whole BTC: {e}")))?
    };
    let frac_v: u64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<8}")
            .parse()
            .map_err(|e| AirsignError::validation(format!("parse fractional BTC: {e}")))?
    };

    whole_v
        .checked_mul(SATS_PER_BTC)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| AirsignError::validation("amount overflow"))
}

/// `150_000_000` → `"1.5"`, `1` → `"0.00000001"`.
pub fn format_sats_as_btc(sats: u64) -> String {
    let whole = sats / SATS_PER_BTC;
    let frac = sats % SATS_PER_BTC;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_s = format!("{frac:08}");
    format!("{whole}.{}", frac_s.trim_end_matches('0'))
}
