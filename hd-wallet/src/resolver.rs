//! Key and script lookup handed to signing code.
//!
//! Signing logic never walks the HD tree itself. It receives a
//! [`ResolverFeed`] and asks two questions: which public key or script hashes
//! to this value, and which private key signs for this public key.

use crate::Error;
use bth_crypto_hd::{chained_private_key, public_key_from_private, Nodes, Path};
use std::{collections::HashMap, fmt};
use zeroize::Zeroizing;

/// Capability surface consumed by transaction signers.
pub trait ResolverFeed {
    /// Public key or script whose hash is `hash`.
    fn resolve_public_key_or_script(&self, hash: &[u8]) -> Result<Vec<u8>, Error>;

    /// Private key for `public_key`.
    fn resolve_private_key(&self, public_key: &[u8]) -> Result<Zeroizing<[u8; 32]>, Error>;
}

/// Where the private key of an owned public key comes from.
#[derive(Clone, Debug)]
pub(crate) enum KeySource {
    /// `[branch, index]` below the leaf node.
    Path(Path),
    /// The leaf key chained by a settlement id.
    Settlement([u8; 32]),
}

/// Public lookups over the addresses of one leaf.
#[derive(Clone, Debug, Default)]
pub struct LeafResolver {
    scripts: HashMap<Vec<u8>, Vec<u8>>,
}

impl LeafResolver {
    pub(crate) fn new(scripts: HashMap<Vec<u8>, Vec<u8>>) -> Self {
        Self { scripts }
    }

    /// Number of known hashes.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl ResolverFeed for LeafResolver {
    fn resolve_public_key_or_script(&self, hash: &[u8]) -> Result<Vec<u8>, Error> {
        self.scripts
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::AccountOrPathMismatch(hex::encode(hash)))
    }

    fn resolve_private_key(&self, _public_key: &[u8]) -> Result<Zeroizing<[u8; 32]>, Error> {
        Err(Error::NoPrivateKeyAccess)
    }
}

/// A [`LeafResolver`] that can also produce private keys.
///
/// The root is decrypted again for every private key request and dropped
/// right after the key is derived.
pub struct LeafSigningResolver {
    public: LeafResolver,
    passphrase: Zeroizing<Vec<u8>>,
    root_nodes: Nodes,
    leaf_path: Path,
    keys: HashMap<Vec<u8>, KeySource>,
}

impl LeafSigningResolver {
    pub(crate) fn new(
        public: LeafResolver,
        passphrase: &[u8],
        root_nodes: Nodes,
        leaf_path: Path,
        keys: HashMap<Vec<u8>, KeySource>,
    ) -> Self {
        Self {
            public,
            passphrase: Zeroizing::new(passphrase.to_vec()),
            root_nodes,
            leaf_path,
            keys,
        }
    }
}

impl fmt::Debug for LeafSigningResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafSigningResolver")
            .field("leaf_path", &self.leaf_path)
            .field("scripts", &self.public.len())
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl ResolverFeed for LeafSigningResolver {
    fn resolve_public_key_or_script(&self, hash: &[u8]) -> Result<Vec<u8>, Error> {
        self.public.resolve_public_key_or_script(hash)
    }

    fn resolve_private_key(&self, public_key: &[u8]) -> Result<Zeroizing<[u8; 32]>, Error> {
        let source = self.keys.get(public_key).ok_or(Error::NoPrivateKeyAccess)?;

        let root = self.root_nodes.decrypt(&self.passphrase)?;
        let leaf = root.derive(&self.leaf_path, false)?;
        let key = match source {
            KeySource::Path(path) => leaf.derive(path, false)?.priv_chained_key()?,
            KeySource::Settlement(settlement_id) => {
                let plain = leaf.private_key().ok_or(Error::NoPrivateKeyAccess)?;
                chained_private_key(plain, settlement_id)?
            }
        };

        if public_key_from_private(&key)?.as_slice() != public_key {
            return Err(Error::NoPrivateKeyAccess);
        }
        Ok(key)
    }
}
