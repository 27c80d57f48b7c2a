//! BIP-39 mnemonics and BIP-32/84 key derivation.
//!
//! Nothing here caches keys between calls: each derivation re-stretches the mnemonic and the
//! intermediate nodes are erased when they go out of scope.

use bip39::{Language, Mnemonic};
use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{All, Secp256k1};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address;
use crate::entropy::{self, ImageEntropy};
use crate::errors::{AirsignError, Result};
use crate::network::Network;
use crate::secret::{MnemonicPhrase, PrivateKey, Seed};

pub const BIP84_PURPOSE: u32 = 84;
/// External (receive) chain; change addresses are not derived by this crate.
pub const RECEIVE_CHAIN: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordCount {
    #[default]
    Twelve,
    TwentyFour,
}

impl WordCount {
    pub const fn entropy_bytes(self) -> usize {
        match self {
            Self::Twelve => 16,
            Self::TwentyFour => 32,
        }
    }

    pub const fn words(self) -> usize {
        match self {
            Self::Twelve => 12,
            Self::TwentyFour => 24,
        }
    }

    pub const fn from_words(n: usize) -> Option<Self> {
        match n {
            12 => Some(Self::Twelve),
            24 => Some(Self::TwentyFour),
            _ => None,
        }
    }
}

/// `m/84'/coin'/account'/0/index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bip84Path {
    pub network: Network,
    pub account: u32,
    pub index: u32,
}

impl Bip84Path {
    pub const fn new(network: Network, account: u32, index: u32) -> Self {
        Self {
            network,
            account,
            index,
        }
    }

    /// Hardened levels first (purpose, coin, account), then the normal chain and index.
    pub fn child_numbers(&self) -> Result<[ChildNumber; 5]> {
        let hardened = |i: u32| {
            ChildNumber::from_hardened_idx(i)
                .map_err(|e| AirsignError::derivation(format!("hardened index {i}: {e}")))
        };
        let normal = |i: u32| {
            ChildNumber::from_normal_idx(i)
                .map_err(|e| AirsignError::derivation(format!("index {i}: {e}")))
        };
        Ok([
            hardened(BIP84_PURPOSE)?,
            hardened(self.network.coin_type())?,
            hardened(self.account)?,
            normal(RECEIVE_CHAIN)?,
            normal(self.index)?,
        ])
    }

    /// The account-level prefix `m/84'/coin'/account'`.
    pub fn account_levels(&self) -> Result<[ChildNumber; 3]> {
        let [p, c, a, _, _] = self.child_numbers()?;
        Ok([p, c, a])
    }
}

impl fmt::Display for Bip84Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "m/{BIP84_PURPOSE}'/{}'/{}'/{RECEIVE_CHAIN}/{}",
            self.network.coin_type(),
            self.account,
            self.index
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
    pub address: String,
    pub path: String,
}

/// One node of the BIP-32 tree. Public-only nodes refuse hardened derivation.
#[derive(Clone)]
pub enum HdNode {
    Private(Xpriv),
    Public(Xpub),
}

impl HdNode {
    pub fn master(seed: &Seed, network: Network) -> Result<Self> {
        let xpriv = Xpriv::new_master(network.to_bitcoin(), seed.as_bytes())
            .map_err(|e| AirsignError::derivation(format!("master key: {e}")))?;
        Ok(Self::Private(xpriv))
    }

    pub fn derive_child(&self, secp: &Secp256k1<All>, child: ChildNumber) -> Result<Self> {
        match self {
            Self::Private(xpriv) => xpriv
                .derive_priv(secp, &[child])
                .map(Self::Private)
                .map_err(|e| AirsignError::derivation(format!("derive {child}: {e}"))),
            Self::Public(_) if child.is_hardened() => Err(AirsignError::derivation(format!(
                "hardened step {child} requires a private key"
            ))),
            Self::Public(xpub) => xpub
                .derive_pub(secp, &[child])
                .map(Self::Public)
                .map_err(|e| AirsignError::derivation(format!("derive {child}: {e}"))),
        }
    }

    pub fn derive_path(&self, secp: &Secp256k1<All>, path: &[ChildNumber]) -> Result<Self> {
        let mut node = self.clone();
        for child in path {
            node = node.derive_child(secp, *child)?;
        }
        Ok(node)
    }

    /// Drop the private half.
    pub fn neuter(&self, secp: &Secp256k1<All>) -> Self {
        match self {
            Self::Private(xpriv) => Self::Public(Xpub::from_priv(secp, xpriv)),
            Self::Public(xpub) => Self::Public(*xpub),
        }
    }

    pub fn public_key(&self, secp: &Secp256k1<All>) -> [u8; 33] {
        match self {
            Self::Private(xpriv) => xpriv.private_key.public_key(secp).serialize(),
            Self::Public(xpub) => xpub.public_key.serialize(),
        }
    }

    pub fn chain_code(&self) -> [u8; 32] {
        match self {
            Self::Private(xpriv) => xpriv.chain_code.to_bytes(),
            Self::Public(xpub) => xpub.chain_code.to_bytes(),
        }
    }

    pub fn private_key(&self) -> Result<PrivateKey> {
        match self {
            Self::Private(xpriv) => Ok(PrivateKey::from_bytes(xpriv.private_key.secret_bytes())),
            Self::Public(_) => Err(AirsignError::derivation("node has no private key")),
        }
    }

    pub const fn is_private(&self) -> bool {
        matches!(self, Self::Private(_))
    }
}

// Only the stored key is wiped. `Xpriv` is `Copy`, so the intermediate copies made inside
// `derive_priv` stay on the stack until overwritten.
impl Drop for HdNode {
    fn drop(&mut self) {
        if let Self::Private(xpriv) = self {
            xpriv.private_key.non_secure_erase();
        }
    }
}

impl fmt::Debug for HdNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private(_) => f.write_str("HdNode::Private([REDACTED])"),
            Self::Public(xpub) => write!(f, "HdNode::Public({xpub})"),
        }
    }
}

/// Fresh 12-word mnemonic from the OS RNG.
pub fn generate_mnemonic() -> Result<MnemonicPhrase> {
    generate_mnemonic_with(WordCount::Twelve, None)
}

/// Mnemonic of the given size, optionally mixing in image-derived entropy.
pub fn generate_mnemonic_with(
    words: WordCount,
    image: Option<&ImageEntropy>,
) -> Result<MnemonicPhrase> {
    let entropy = entropy::mnemonic_entropy(words.entropy_bytes(), image)?;
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| AirsignError::EntropyUnavailable(format!("mnemonic from entropy: {e}")))?;
    tracing::debug!(words = words.words(), mixed_image = image.is_some(), "generated mnemonic");
    Ok(MnemonicPhrase::new(mnemonic.to_string()))
}

/// Parse and checksum-verify a phrase. Only 12- and 24-word phrases are accepted.
///
/// The returned [`Mnemonic`] wipes its word indices on drop.
pub fn parse_mnemonic(phrase: &MnemonicPhrase) -> Result<Mnemonic> {
    let count = phrase.word_count();
    if WordCount::from_words(count).is_none() {
        return Err(AirsignError::InvalidMnemonic(format!(
            "expected 12 or 24 words, got {count}"
        )));
    }
    let normalized = phrase.normalized();
    Mnemonic::parse_in_normalized(Language::English, normalized.as_str())
        .map_err(|e| AirsignError::InvalidMnemonic(e.to_string()))
}

pub fn validate_mnemonic(phrase: &MnemonicPhrase) -> bool {
    parse_mnemonic(phrase).is_ok()
}

/// PBKDF2-HMAC-SHA512 (2048 rounds) per BIP-39.
pub fn mnemonic_to_seed(phrase: &MnemonicPhrase, passphrase: &str) -> Result<Seed> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Seed::new(mnemonic.to_seed_normalized(passphrase)))
}

fn derive_node(
    secp: &Secp256k1<All>,
    phrase: &MnemonicPhrase,
    passphrase: &str,
    path: &Bip84Path,
) -> Result<HdNode> {
    let seed = mnemonic_to_seed(phrase, passphrase)?;
    let master = HdNode::master(&seed, path.network)?;
    master.derive_path(secp, &path.child_numbers()?)
}

pub fn derive_address(
    phrase: &MnemonicPhrase,
    network: Network,
    account: u32,
    index: u32,
) -> Result<DerivedAddress> {
    derive_address_with_passphrase(phrase, "", network, account, index)
}

pub fn derive_address_with_passphrase(
    phrase: &MnemonicPhrase,
    passphrase: &str,
    network: Network,
    account: u32,
    index: u32,
) -> Result<DerivedAddress> {
    let secp = Secp256k1::new();
    let path = Bip84Path::new(network, account, index);
    let node = derive_node(&secp, phrase, passphrase, &path)?;
    let address = address::p2wpkh_address(&node.public_key(&secp), network)?;
    Ok(DerivedAddress {
        address,
        path: path.to_string(),
    })
}

/// Addresses for `indices` under one account, stretching the mnemonic once.
pub fn derive_addresses(
    phrase: &MnemonicPhrase,
    network: Network,
    account: u32,
    indices: impl IntoIterator<Item = u32>,
) -> Result<Vec<DerivedAddress>> {
    let secp = Secp256k1::new();
    let account_node = account_xpub(phrase, "", network, account)?;
    indices
        .into_iter()
        .map(|i| derive_address_from_account(&secp, &account_node, network, account, i))
        .collect()
}

/// Public account node `m/84'/coin'/account'` for watch-only address generation.
pub fn account_xpub(
    phrase: &MnemonicPhrase,
    passphrase: &str,
    network: Network,
    account: u32,
) -> Result<HdNode> {
    let secp = Secp256k1::new();
    let path = Bip84Path::new(network, account, 0);
    let seed = mnemonic_to_seed(phrase, passphrase)?;
    let node = HdNode::master(&seed, network)?.derive_path(&secp, &path.account_levels()?)?;
    Ok(node.neuter(&secp))
}

/// Receive address `0/index` below an account node; works on public-only nodes.
pub fn derive_address_from_account(
    secp: &Secp256k1<All>,
    account_node: &HdNode,
    network: Network,
    account: u32,
    index: u32,
) -> Result<DerivedAddress> {
    let path = Bip84Path::new(network, account, index);
    let [_, _, _, chain, idx] = path.child_numbers()?;
    let node = account_node.derive_path(secp, &[chain, idx])?;
    Ok(DerivedAddress {
        address: address::p2wpkh_address(&node.public_key(secp), network)?,
        path: path.to_string(),
    })
}

/// Raw private key at `m/84'/coin'/account'/0/index`. Prefer
/// [`crate::secret::with_private_key`] so the key is erased as soon as the caller is done.
pub fn derive_private_key(
    phrase: &MnemonicPhrase,
    passphrase: &str,
    network: Network,
    account: u32,
    index: u32,
) -> Result<PrivateKey> {
    let secp = Secp256k1::new();
    let node = derive_node(
        &secp,
        phrase,
        passphrase,
        &Bip84Path::new(network, account, index),
    )?;
    node.private_key()
}
