//! Secret store collaborator: an opaque key-value store for secret bytes.
//!
//! The signing core never persists secrets itself; callers that want to keep a mnemonic between
//! runs go through a [`SecretStore`]. [`FileSecretStore`] encrypts each entry at rest.

pub mod crypto;

use base64::Engine as _;
use secrecy::SecretString;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};
use zeroize::Zeroizing;

use crate::errors::{AirsignError, Result};
use crate::{paths::AirsignPaths, store::ConfigStore};
use crypto::CryptoBox;

/// Key under which the wallet mnemonic is stored.
pub const MNEMONIC_KEY: &str = "wallet.mnemonic";

pub trait SecretStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn save(&self, key: &str, value: &[u8]) -> Result<bool>;
    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;
    /// Returns `false` when there was nothing to delete.
    fn delete(&self, key: &str) -> Result<bool>;
}

fn check_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(AirsignError::Keystore("secret key name is empty".to_owned()));
    }
    Ok(())
}

fn ks(e: &eyre::Report) -> AirsignError {
    AirsignError::Keystore(format!("{e:#}"))
}

/// In-process store. Values are wiped when replaced, deleted or dropped.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<BTreeMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Zeroizing<Vec<u8>>>>> {
        self.entries
            .lock()
            .map_err(|e| AirsignError::Keystore(format!("secret store poisoned: {e}")))
    }
}

impl SecretStore for MemorySecretStore {
    fn save(&self, key: &str, value: &[u8]) -> Result<bool> {
        check_key(key)?;
        self.lock()?
            .insert(key.to_owned(), Zeroizing::new(value.to_vec()));
        Ok(true)
    }

    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }
}

/// One encrypted JSON file per entry under `secrets/`, named by the hex of the key.
pub struct FileSecretStore {
    dir: PathBuf,
    master: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for FileSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSecretStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl FileSecretStore {
    pub fn open(dir: PathBuf, passphrase: &SecretString, salt: &[u8; 16]) -> Result<Self> {
        crate::fsutil::ensure_private_dir(&dir).map_err(|e| ks(&e))?;
        let master = crypto::derive_passphrase_key(passphrase, salt)?;
        Ok(Self { dir, master })
    }

    /// Open the store under the config dir, generating the Argon2 salt on first use.
    pub fn open_default(paths: &AirsignPaths, passphrase: &SecretString) -> Result<Self> {
        paths.ensure_private_dirs().map_err(|e| ks(&e))?;
        let salt = ensure_passphrase_salt(&ConfigStore::new(paths))?;
        Self::open(paths.secrets_dir(), passphrase, &salt)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(key.as_bytes())))
    }
}

impl SecretStore for FileSecretStore {
    fn save(&self, key: &str, value: &[u8]) -> Result<bool> {
        check_key(key)?;
        let subkey = crypto::derive_subkey(&self.master, key, "secret")?;
        let boxed = crypto::encrypt_aes_gcm(&subkey, value)?;
        let json = serde_json::to_string_pretty(&boxed)
            .map_err(|e| AirsignError::Keystore(format!("serialize entry: {e}")))?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.entry_path(key),
            &json,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .map_err(|e| ks(&e))?;
        tracing::info!(key, "stored secret");
        Ok(true)
    }

    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        check_key(key)?;
        let p = self.entry_path(key);
        if !p.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&p)
            .map_err(|e| AirsignError::Keystore(format!("read {}: {e}", p.display())))?;
        let boxed: CryptoBox = serde_json::from_str(&s)
            .map_err(|e| AirsignError::Keystore(format!("parse {}: {e}", p.display())))?;
        let subkey = crypto::derive_subkey(&self.master, key, "secret")?;
        crypto::decrypt_aes_gcm(&subkey, &boxed).map(Some)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        let p = self.entry_path(key);
        if !p.exists() {
            return Ok(false);
        }
        fs::remove_file(&p)
            .map_err(|e| AirsignError::Keystore(format!("remove {}: {e}", p.display())))?;
        tracing::info!(key, "deleted secret");
        Ok(true)
    }
}

/// Read the stored Argon2 salt, creating and persisting one if the config has none.
pub fn ensure_passphrase_salt(store: &ConfigStore) -> Result<[u8; 16]> {
    let mut cfg = store.load_file().map_err(|e| ks(&e))?;
    if let Some(s) = &cfg.keystore.passphrase_salt_b64 {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| AirsignError::Keystore(format!("decode passphrase_salt_b64: {e}")))?;
        return bytes
            .try_into()
            .map_err(|_e: Vec<u8>| {
                AirsignError::Keystore("passphrase_salt_b64 must decode to 16 bytes".to_owned())
            });
    }

    let salt = crypto::random_salt16()?;
    cfg.keystore.passphrase_salt_b64 = Some(base64::engine::general_purpose::STANDARD.encode(salt));
    store.save(&cfg).map_err(|e| ks(&e))?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(s: &str) -> SecretString {
        SecretString::new(s.to_owned().into())
    }

    #[test]
    fn memory_store_contract() -> eyre::Result<()> {
        let s = MemorySecretStore::new();
        assert!(s.get(MNEMONIC_KEY)?.is_none());
        assert!(s.save(MNEMONIC_KEY, b"words")?);
        assert_eq!(s.get(MNEMONIC_KEY)?.as_deref().map(Vec::as_slice), Some(&b"words"[..]));
        assert!(s.delete(MNEMONIC_KEY)?);
        assert!(!s.delete(MNEMONIC_KEY)?);
        assert!(s.save(" ", b"x").is_err());
        Ok(())
    }

    #[test]
    fn file_store_encrypts_at_rest() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = FileSecretStore::open(tmp.path().join("secrets"), &pass("pw"), &[9_u8; 16])?;
        store.save(MNEMONIC_KEY, b"abandon about")?;

        let file = store.entry_path(MNEMONIC_KEY);
        let on_disk = fs::read_to_string(&file)?;
        assert!(!on_disk.contains("abandon"));
        assert_eq!(
            store.get(MNEMONIC_KEY)?.as_deref().map(Vec::as_slice),
            Some(&b"abandon about"[..])
        );

        let wrong = FileSecretStore::open(tmp.path().join("secrets"), &pass("nope"), &[9_u8; 16])?;
        assert!(matches!(
            wrong.get(MNEMONIC_KEY),
            Err(AirsignError::Keystore(_))
        ));

        assert!(store.delete(MNEMONIC_KEY)?);
        assert!(store.get(MNEMONIC_KEY)?.is_none());
        assert!(!store.delete(MNEMONIC_KEY)?);
        Ok(())
    }

    #[test]
    fn salt_is_generated_once() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let paths = AirsignPaths::from_dirs(tmp.path().join("cfg"), tmp.path().join("data"));
        let store = ConfigStore::new(&paths);
        let a = ensure_passphrase_salt(&store)?;
        let b = ensure_passphrase_salt(&store)?;
        assert_eq!(a, b);
        Ok(())
    }
}
