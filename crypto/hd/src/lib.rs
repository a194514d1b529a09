// Copyright (c) 2024 The Botho Foundation

#![deny(unsafe_code)]

//! Hierarchical deterministic key derivation for BIP44-style wallets.
//!
//! This crate provides secp256k1 [`Node`]s following BIP-32, derivation
//! [`Path`]s with explicit hardened flags, the multiplicative "chained key"
//! variant used by authentication and settlement addresses, and the
//! encrypted-at-rest form of a node's private key and seed.
//!
//! # Examples
//!
//! ```
//! use bth_crypto_encryption::{KdfRomix, KdfSettings};
//! use bth_crypto_hd::{EncryptionType, NetworkType, Node, Path, Seed};
//!
//! let seed = Seed::from_entropy(vec![0x11; 32], NetworkType::TestNet);
//! let root = Node::from_seed(&seed).unwrap();
//!
//! let leaf = root.derive(&"m/44'/1'/0'".parse::<Path>().unwrap(), true).unwrap();
//! assert!(!leaf.has_private_key());
//!
//! let kdf = KdfRomix::initialize(&KdfSettings::fast());
//! let locked = root.encrypt(b"abc", vec![EncryptionType::Password], vec![], kdf).unwrap();
//! assert_eq!(locked.decrypt(b"abc").unwrap().id(), root.id());
//! assert_ne!(locked.decrypt(b"xyz").map(|n| n.id()).ok(), Some(root.id()));
//! ```

mod address;
mod keys;
mod network;
mod node;
mod nodes;
mod path;

pub use address::{Address, AddressType};
pub use keys::{chained_private_key, chained_public_key, public_key_from_private};
pub use network::NetworkType;
pub use node::{compute_id, EncryptionType, Node, Seed};
pub use nodes::{merge_keys, Nodes};
pub use path::{CoinType, Path, HARDENED, PURPOSE};

pub use bth_util_binary::FormatError;

/// Errors that can occur during HD key operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Encryption error: {0}")]
    Encryption(#[from] bth_crypto_encryption::Error),

    #[error("Node has no private key")]
    NoPrivateKey,

    #[error("Hardened derivation requires the private key")]
    HardenedRequiresPrivate,

    #[error("Node is already encrypted")]
    AlreadyEncrypted,

    #[error("Node is not encrypted")]
    NoEncryption,

    #[error("Wrong passphrase")]
    WrongPassphrase,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Key derivation failed: {0}")]
    DerivationError(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),
}
