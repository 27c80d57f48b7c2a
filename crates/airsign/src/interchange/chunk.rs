//! Splitting envelopes into `i/n:`-prefixed QR frames and putting them back together.
//!
//! Frames may arrive in any order and the same frame may be scanned twice. A frame that
//! repeats an index with different content, disagrees on the total, or leaves a gap is an error.

use std::collections::BTreeMap;

use super::{decode, Envelope};
use crate::errors::{AirsignError, Result};

/// Missing indices listed in a reassembly error before the rest are summarised as a count.
const MISSING_SHOWN: usize = 16;

/// Split `encoded` into frames carrying at most `max_chunk_size` characters of payload each.
pub fn split(encoded: &str, max_chunk_size: usize) -> Result<Vec<String>> {
    if max_chunk_size == 0 {
        return Err(AirsignError::validation("max chunk size must be at least 1"));
    }
    let chars: Vec<char> = encoded.trim().chars().collect();
    if chars.is_empty() {
        return Err(AirsignError::validation("nothing to split"));
    }
    let total = chars.len().div_ceil(max_chunk_size);
    Ok(chars
        .chunks(max_chunk_size)
        .enumerate()
        .map(|(i, body)| format!("{}/{total}:{}", i + 1, body.iter().collect::<String>()))
        .collect())
}

pub fn split_envelope(envelope: &Envelope, max_chunk_size: usize) -> Result<Vec<String>> {
    split(&super::encode(envelope)?, max_chunk_size)
}

/// `(index, total, body)` for a prefixed frame; `None` when the frame has no `i/n:` header.
fn parse_frame(frame: &str) -> Result<Option<(usize, usize, &str)>> {
    let Some((head, body)) = frame.split_once(':') else {
        return Ok(None);
    };
    let Some((i, n)) = head.split_once('/') else {
        return Err(AirsignError::validation(format!("malformed chunk header {head:?}")));
    };
    let parse = |s: &str| {
        s.trim()
            .parse::<usize>()
            .map_err(|e| AirsignError::validation(format!("chunk header {head:?}: {e}")))
    };
    let (index, total) = (parse(i)?, parse(n)?);
    if total == 0 {
        return Err(AirsignError::validation(format!("invalid chunk total {total}")));
    }
    if index == 0 || index > total {
        return Err(AirsignError::validation(format!(
            "chunk index {index} outside 1..={total}"
        )));
    }
    Ok(Some((index, total, body)))
}

/// Incremental reassembly for a scanner that sees one frame at a time.
///
/// Memory and work grow with the frames actually received, never with the total a header
/// claims, so an absurd `n` costs nothing until its frames show up.
#[derive(Debug, Default, Clone)]
pub struct ChunkCollector {
    total: Option<usize>,
    parts: BTreeMap<usize, String>,
}

impl ChunkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a frame. Returns `true` once every frame has been seen.
    pub fn push(&mut self, frame: &str) -> Result<bool> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Ok(self.is_complete());
        }

        let Some((index, total, body)) = parse_frame(frame)? else {
            // A bare payload is a complete single-frame sequence.
            if self.parts.is_empty() {
                self.total = Some(1);
                self.parts.insert(1, frame.to_owned());
                return Ok(true);
            }
            return Err(AirsignError::validation(
                "unprefixed chunk mixed with prefixed chunks",
            ));
        };

        match self.total {
            Some(t) if t != total => {
                return Err(AirsignError::validation(format!(
                    "chunk {index}/{total} does not belong to a {t}-chunk sequence"
                )));
            }
            Some(_) => {}
            None => self.total = Some(total),
        }

        match self.parts.get(&index) {
            Some(existing) if existing != body => {
                return Err(AirsignError::validation(format!(
                    "chunk {index}/{total} received twice with different content"
                )));
            }
            Some(_) => {}
            None => {
                self.parts.insert(index, body.to_owned());
            }
        }
        Ok(self.is_complete())
    }

    /// `(received, total)`; total is 0 until the first frame arrives.
    pub fn progress(&self) -> (usize, usize) {
        (self.parts.len(), self.total.unwrap_or(0))
    }

    pub fn is_complete(&self) -> bool {
        self.total.is_some_and(|t| self.parts.len() == t)
    }

    /// Indices still outstanding, in ascending order.
    pub fn missing(&self) -> impl Iterator<Item = usize> + '_ {
        let total = self.total.unwrap_or(0);
        (1..=total).filter(|i| !self.parts.contains_key(i))
    }

    /// Concatenate the frames in index order.
    pub fn finish(self) -> Result<String> {
        if self.total.is_none() {
            return Err(AirsignError::validation("no chunks received"));
        }
        let (received, total) = self.progress();
        if received < total {
            let shown: Vec<usize> = self.missing().take(MISSING_SHOWN).collect();
            return Err(AirsignError::validation(format!(
                "missing {} of {total} chunks, starting {shown:?}",
                total - received
            )));
        }
        Ok(self.parts.into_values().collect())
    }
}

/// Reassemble frames supplied in any order.
pub fn reassemble<S: AsRef<str>>(chunks: &[S]) -> Result<String> {
    let mut collector = ChunkCollector::new();
    for c in chunks {
        collector.push(c.as_ref())?;
    }
    collector.finish()
}

pub fn reassemble_envelope<S: AsRef<str>>(chunks: &[S]) -> Result<Envelope> {
    decode(&reassemble(chunks)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interchange::{PayloadInput, PayloadOutput, UnsignedPayload};
    use crate::network::Network;

    fn envelope() -> Envelope {
        Envelope::Unsigned(UnsignedPayload {
            version: 2,
            inputs: vec![PayloadInput {
                txid: "ab".repeat(32),
                vout: 4,
                value: 120_000,
            }],
            outputs: vec![PayloadOutput {
                address: "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_owned(),
                value: 119_000,
            }],
            network: Network::Testnet,
            fee: 1_000,
            change_index: None,
        })
    }

    #[test]
    fn split_prefixes_and_sizes() -> eyre::Result<()> {
        let chunks = split("abcdefg", 3)?;
        assert_eq!(chunks, vec!["1/3:abc", "2/3:def", "3/3:g"]);
        assert_eq!(split("abc", 10)?, vec!["1/1:abc"]);
        assert!(split("abc", 0).is_err());
        Ok(())
    }

    #[test]
    fn round_trip_for_every_chunk_size() -> eyre::Result<()> {
        let env = envelope();
        let encoded = super::super::encode(&env)?;
        for size in [1, 2, 7, 50, encoded.len(), encoded.len() + 1] {
            let chunks = split_envelope(&env, size)?;
            assert_eq!(reassemble_envelope(&chunks)?, env, "size {size}");
        }
        Ok(())
    }

    #[test]
    fn large_envelope_splits_at_one_character_per_frame() -> eyre::Result<()> {
        let Envelope::Unsigned(mut payload) = envelope() else {
            return Err(eyre::eyre!("expected an unsigned envelope"));
        };
        payload.inputs = (0..80_u32)
            .map(|vout| PayloadInput {
                txid: format!("{:064x}", u64::from(vout) + 1),
                vout,
                value: 10_000,
            })
            .collect();
        payload.outputs = vec![PayloadOutput {
            address: "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_owned(),
            value: 799_000,
        }];
        let env = Envelope::Unsigned(payload);
        let encoded = super::super::encode(&env)?;
        assert!(encoded.len() > 10_000, "encoded length {}", encoded.len());

        let mut chunks = split_envelope(&env, 1)?;
        assert_eq!(chunks.len(), encoded.len());
        chunks.reverse();
        assert_eq!(reassemble_envelope(&chunks)?, env);
        Ok(())
    }

    #[test]
    fn huge_claimed_total_is_cheap_and_incomplete() -> eyre::Result<()> {
        let mut c = ChunkCollector::new();
        assert!(!c.push(&format!("1/{}:ab", usize::MAX))?);
        assert_eq!(c.missing().take(3).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(matches!(c.finish(), Err(AirsignError::ValidationFailed(_))));
        Ok(())
    }

    #[test]
    fn order_does_not_matter() -> eyre::Result<()> {
        let env = envelope();
        let mut chunks = split_envelope(&env, 40)?;
        assert!(chunks.len() > 3, "need several chunks");
        chunks.reverse();
        assert_eq!(reassemble_envelope(&chunks)?, env);
        chunks.rotate_left(2);
        assert_eq!(reassemble_envelope(&chunks)?, env);
        Ok(())
    }

    #[test]
    fn missing_and_conflicting_chunks_are_rejected() -> eyre::Result<()> {
        let chunks = split("abcdefghij", 3)?;
        let gap: Vec<&String> = chunks.iter().filter(|c| !c.starts_with("2/")).collect();
        assert!(matches!(reassemble(&gap), Err(AirsignError::ValidationFailed(_))));

        let mut conflict = chunks.clone();
        conflict.push("2/4:xyz".to_owned());
        assert!(reassemble(&conflict).is_err());

        let mut same_twice = chunks.clone();
        same_twice.push("2/4:def".to_owned());
        assert_eq!(reassemble(&same_twice)?, "abcdefghij");

        let mut wrong_total = chunks;
        wrong_total.push("1/5:abc".to_owned());
        assert!(reassemble(&wrong_total).is_err());

        assert!(reassemble::<&str>(&[]).is_err());
        assert!(reassemble(&["0/2:ab", "2/2:cd"]).is_err());
        Ok(())
    }

    #[test]
    fn single_unprefixed_payload_is_accepted() -> eyre::Result<()> {
        let encoded = super::super::encode(&envelope())?;
        assert_eq!(reassemble_envelope(&[encoded.as_str()])?, envelope());
        assert!(reassemble(&["1/2:ab", "cd"]).is_err());
        Ok(())
    }

    #[test]
    fn collector_reports_progress() -> eyre::Result<()> {
        let chunks = split("abcdefgh", 2)?;
        let mut c = ChunkCollector::new();
        assert_eq!(c.progress(), (0, 0));
        let last = chunks.last().ok_or_else(|| eyre::eyre!("no chunks"))?;
        assert!(!c.push(last)?);
        assert_eq!(c.progress(), (1, 4));
        assert_eq!(c.missing().collect::<Vec<_>>(), vec![1, 2, 3]);
        for chunk in &chunks {
            c.push(chunk)?;
        }
        assert!(c.is_complete());
        assert_eq!(c.finish()?, "abcdefgh");
        Ok(())
    }
}
