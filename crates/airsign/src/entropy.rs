//! Entropy for new mnemonics.
//!
//! System randomness is mandatory. Image-derived bytes (e.g. raw pixels from a camera frame) can be
//! mixed in on top, but never replace it: the mix is HKDF keyed by the system bytes, so a weak
//! or attacker-chosen image cannot reduce the output below the OS RNG's strength.

use hkdf::Hkdf;
use sha2::{Digest as _, Sha256};
use zeroize::Zeroizing;

use crate::errors::{AirsignError, Result};

/// Smallest image sample accepted for mixing.
pub const MIN_IMAGE_BYTES: usize = 64;

const IMAGE_DOMAIN: &[u8] = b"airsign/image-entropy/v1";
const MIX_INFO: &[u8] = b"airsign:mnemonic-entropy";

/// Fill `len` bytes from the operating system's CSPRNG. Errors instead of degrading.
pub fn system_entropy(len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(vec![0_u8; len]);
    getrandom::getrandom(buf.as_mut_slice())
        .map_err(|e| AirsignError::EntropyUnavailable(e.to_string()))?;
    Ok(buf)
}

/// Digest of a captured image, ready to be mixed.
#[derive(Clone)]
pub struct ImageEntropy {
    digest: [u8; 32],
}

impl ImageEntropy {
    /// Hash raw image bytes. Rejects tiny or constant samples (lens cap on, blank frame).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_IMAGE_BYTES {
            return Err(AirsignError::validation(format!(
                "image sample too small for entropy: {} bytes (need {MIN_IMAGE_BYTES})",
                bytes.len()
            )));
        }
        let first = bytes.first().copied().unwrap_or_default();
        if bytes.iter().all(|b| *b == first) {
            return Err(AirsignError::validation(
                "image sample is uniform; capture a textured scene",
            ));
        }

        let mut h = Sha256::new();
        h.update(IMAGE_DOMAIN);
        h.update((bytes.len() as u64).to_le_bytes());
        h.update(bytes);
        Ok(Self {
            digest: h.finalize().into(),
        })
    }

    pub const fn digest(&self) -> &[u8; 32] {
        &self.digest
    }
}

/// Combine system randomness with an optional image digest into `len` bytes of seed entropy.
pub fn mix(system: &[u8], image: Option<&ImageEntropy>, len: usize) -> Result<Zeroizing<Vec<u8>>> {
    if system.len() < len {
        return Err(AirsignError::EntropyUnavailable(format!(
            "need at least {len} bytes of system entropy, got {}",
            system.len()
        )));
    }
    let salt = image.map(ImageEntropy::digest).map(<[u8; 32]>::as_slice);
    let hk = Hkdf::<Sha256>::new(salt, system);
    let mut out = Zeroizing::new(vec![0_u8; len]);
    hk.expand(MIX_INFO, out.as_mut_slice())
        .map_err(|e| AirsignError::EntropyUnavailable(format!("hkdf expand: {e}")))?;
    Ok(out)
}

/// Fresh mnemonic entropy of `len` bytes, optionally strengthened with an image sample.
pub fn mnemonic_entropy(len: usize, image: Option<&ImageEntropy>) -> Result<Zeroizing<Vec<u8>>> {
    let system = system_entropy(len)?;
    if image.is_none() {
        return Ok(system);
    }
    mix(&system, image, len)
}
