use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::{PasswordHasher as _, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64::Engine as _;
use hkdf::Hkdf;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::entropy;
use crate::errors::{AirsignError, Result};

pub const CRYPTO_BOX_VERSION: u8 = 1;

fn err(msg: impl std::fmt::Display) -> AirsignError {
    AirsignError::Keystore(msg.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoBox {
    pub v: u8,
    pub nonce_b64: String,
    pub ct_b64: String,
}

pub fn random_salt16() -> Result<[u8; 16]> {
    let bytes = entropy::system_entropy(16)?;
    let mut s = [0_u8; 16];
    s.copy_from_slice(&bytes);
    Ok(s)
}

/// Argon2id over the passphrase. Parameters are pinned so stored secrets stay readable across
/// dependency updates.
pub fn derive_passphrase_key(
    passphrase: &SecretString,
    salt16: &[u8; 16],
) -> Result<Zeroizing<[u8; 32]>> {
    let params =
        Params::new(19 * 1024, 2, 1, Some(32)).map_err(|e| err(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::encode_b64(salt16).map_err(|e| err(format!("encode salt: {e}")))?;

    let hash = argon2
        .hash_password(passphrase.expose_secret().as_bytes(), &salt)
        .map_err(|e| err(format!("argon2 hash: {e}")))?;
    let bytes = hash.hash.ok_or_else(|| err("argon2 missing hash"))?;
    let Some(prefix) = bytes.as_bytes().get(..32) else {
        return Err(err("argon2 hash too short"));
    };
    let mut out = Zeroizing::new([0_u8; 32]);
    out.copy_from_slice(prefix);
    Ok(out)
}

/// Per-entry key: HKDF-SHA256 with info `airsign:<entry>:<purpose>`.
pub fn derive_subkey(master: &[u8; 32], entry: &str, purpose: &str) -> Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(None, master);
    let info = format!("airsign:{entry}:{purpose}");
    let mut out = Zeroizing::new([0_u8; 32]);
    hk.expand(info.as_bytes(), out.as_mut_slice())
        .map_err(|e| err(format!("hkdf expand: {e}")))?;
    Ok(out)
}

pub fn encrypt_aes_gcm(key32: &[u8; 32], plaintext: &[u8]) -> Result<CryptoBox> {
    let cipher = Aes256Gcm::new_from_slice(key32).map_err(|e| err(format!("aes init: {e}")))?;
    let nonce = entropy::system_entropy(12)?;
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| err(format!("aes encrypt: {e}")))?;

    Ok(CryptoBox {
        v: CRYPTO_BOX_VERSION,
        nonce_b64: base64::engine::general_purpose::STANDARD.encode(nonce.as_slice()),
        ct_b64: base64::engine::general_purpose::STANDARD.encode(ct),
    })
}

pub fn decrypt_aes_gcm(key32: &[u8; 32], b: &CryptoBox) -> Result<Zeroizing<Vec<u8>>> {
    if b.v != CRYPTO_BOX_VERSION {
        return Err(err(format!("unsupported CryptoBox version: {}", b.v)));
    }
    let cipher = Aes256Gcm::new_from_slice(key32).map_err(|e| err(format!("aes init: {e}")))?;
    let nonce = base64::engine::general_purpose::STANDARD
        .decode(&b.nonce_b64)
        .map_err(|e| err(format!("decode nonce: {e}")))?;
    if nonce.len() != 12 {
        return Err(err("invalid nonce length"));
    }
    let ct = base64::engine::general_purpose::STANDARD
        .decode(&b.ct_b64)
        .map_err(|e| err(format!("decode ciphertext: {e}")))?;

    let pt = cipher
        .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
        .map_err(|_e| err("aes decrypt failed (wrong passphrase or corrupted entry)"))?;
    Ok(Zeroizing::new(pt))
}
