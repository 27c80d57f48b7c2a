//! Scoped wrappers for secret material.
//!
//! Mnemonics, seeds and private keys live only inside these types. All of them wipe their
//! backing memory on drop, so an early `?` return erases them the same as a normal return.

use secrecy::{ExposeSecret as _, SecretString};
use std::fmt;
use zeroize::Zeroizing;

/// A BIP-39 phrase held in memory only for the duration of a call.
pub struct MnemonicPhrase(SecretString);

impl MnemonicPhrase {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self(SecretString::new(phrase.into().into_boxed_str()))
    }

    /// Whitespace-normalised phrase (single spaces, lowercase).
    pub fn normalized(&self) -> Zeroizing<String> {
        let words: Vec<&str> = self.0.expose_secret().split_whitespace().collect();
        Zeroizing::new(words.join(" ").to_lowercase())
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn word_count(&self) -> usize {
        self.0.expose_secret().split_whitespace().count()
    }
}

impl fmt::Debug for MnemonicPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MnemonicPhrase([REDACTED])")
    }
}

impl From<&str> for MnemonicPhrase {
    fn from(s: &str) -> Self {
        Self::new(s.to_owned())
    }
}

/// 64-byte BIP-39 seed.
pub struct Seed(Zeroizing<[u8; 64]>);

impl Seed {
    pub(crate) fn new(bytes: [u8; 64]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed([REDACTED])")
    }
}

/// Raw 32-byte secp256k1 private key.
pub struct PrivateKey(Zeroizing<[u8; 32]>);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn to_secret_key(&self) -> crate::Result<bitcoin::secp256k1::SecretKey> {
        bitcoin::secp256k1::SecretKey::from_slice(self.0.as_ref())
            .map_err(|e| crate::AirsignError::derivation(format!("invalid private key: {e}")))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// Run `f` with a freshly derived private key, erasing it on every exit path.
///
/// The key is owned by this frame; `f` can only borrow it, so it cannot outlive the call.
pub fn with_private_key<T>(
    derive: impl FnOnce() -> crate::Result<PrivateKey>,
    f: impl FnOnce(&PrivateKey) -> crate::Result<T>,
) -> crate::Result<T> {
    let key = derive()?;
    let out = f(&key);
    drop(key);
    out
}
