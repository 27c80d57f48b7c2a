use std::time::Duration;

use crate::errors::{AirsignError, Result};

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Number of full rounds. Each round tries every endpoint once.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each backoff sleep.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

impl BackoffConfig {
    /// One pass over the endpoints with no sleeping.
    pub const fn single_round() -> Self {
        Self {
            rounds: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_max_ms: 0,
        }
    }
}

fn compute_backoff_delay(cfg: &BackoffConfig, round: usize) -> Duration {
    let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
    let pow2 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base_ms = u64::try_from(cfg.base_delay.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(cfg.max_delay.as_millis()).unwrap_or(u64::MAX);
    let ms = base_ms.saturating_mul(pow2).min(max_ms);
    let jitter = if cfg!(test) || cfg.jitter_max_ms == 0 {
        0
    } else {
        rand::random::<u64>() % cfg.jitter_max_ms.saturating_add(1).max(1)
    };
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Try `op(item)` across all items, in order, for `rounds` rounds, sleeping with exponential
/// backoff between rounds.
///
/// Only transient failures (timeouts, upstream errors) move on to the next endpoint. Anything
/// else, such as a rejected address, is returned immediately since another endpoint would give
/// the same answer.
pub async fn try_all_with_backoff<I, T, Fut>(
    items: &[I],
    cfg: &BackoffConfig,
    mut op: impl FnMut(&I) -> Fut + Send,
    context_label: &'static str,
) -> Result<T>
where
    I: Sync,
    Fut: std::future::Future<Output = Result<T>> + Send,
{
    if items.is_empty() {
        return Err(AirsignError::Provider(format!(
            "{context_label}: no endpoints configured"
        )));
    }
    if cfg.rounds == 0 {
        return Err(AirsignError::Provider(format!(
            "{context_label}: invalid backoff config (rounds=0)"
        )));
    }

    let mut last_err: Option<AirsignError> = None;
    for round in 0..cfg.rounds {
        for item in items {
            match op(item).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => {
                    tracing::warn!(op = context_label, round, error = %e, "endpoint attempt failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        if round + 1 < cfg.rounds {
            tokio::time::sleep(compute_backoff_delay(cfg, round)).await;
        }
    }

    Err(last_err.unwrap_or_else(|| AirsignError::Provider(format!("{context_label}: unknown error"))))
}
