#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]
//! Air-gapped Bitcoin signing core.
//!
//! The signer derives BIP-84 keys from a BIP-39 mnemonic and signs native segwit (P2WPKH)
//! spends; the watch device fetches UTXOs and fees, builds the unsigned transaction and
//! broadcasts the result. The two sides only ever exchange [`interchange`] envelopes, split into
//! QR-sized chunks.
//!
//! Every operation takes its [`network::Network`] explicitly.

pub mod address;
pub mod amount;
pub mod audit;
pub mod cli_output;
pub mod coinselect;
pub mod config;
pub mod doctor;
pub mod entropy;
pub mod errors;
pub mod fsutil;
pub mod interchange;
pub mod keys;
pub mod keystore;
pub mod network;
pub mod paths;
pub mod provider;
pub mod retry;
pub mod secret;
pub mod send;
pub mod store;
pub mod tx;

pub use errors::{AirsignError, ErrorReport, Result};
pub use network::Network;
