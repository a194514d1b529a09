//! BIP44 HD wallet engine
//!
//! A [`Wallet`] owns an encrypted root node set and a tree of [`Group`]s
//! (one per coin type) holding [`Leaf`] accounts. Leaves keep only public
//! key material and hand out addresses from a lookahead pool; private keys
//! are derived on demand from the unlocked root through a
//! [`LeafSigningResolver`].
//!
//! ## Storage
//!
//! Wallets are kept in one LMDB file each. Every unit (header, root set,
//! each group, comments) is written in its own transaction, and only units
//! listed in a [`ChangeSet`] are written.
//!
//! ## Security Model
//!
//! - The root private key and seed are encrypted at rest under a
//!   ROMix-stretched passphrase (or an m-of-n combination of passphrases)
//! - Leaves never hold private keys
//! - Wrong passphrases are detected by comparing the recovered node id

pub mod changeset;
pub mod commands;
pub mod config;
pub mod error;
pub mod group;
pub mod leaf;
pub mod policy;
pub mod resolver;
pub mod scan;
pub mod wallet;

pub use changeset::ChangeSet;
pub use config::Config;
pub use error::{Error, LoadDefect};
pub use group::Group;
pub use leaf::{Branch, Leaf, LeafSettings, LeafState};
pub use policy::{product_index, DerivationPolicy, AUTH_POOL_SIZE};
pub use resolver::{LeafResolver, LeafSigningResolver, ResolverFeed};
pub use scan::{AddressWatcher, WatchList};
pub use wallet::{combined_password, PasswordData, Wallet, WalletSettings};
