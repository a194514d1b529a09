// Copyright (c) 2024 The Botho Foundation

//! Alternative encrypted forms of the same root node.

use crate::{EncryptionType, Error, Node};
use tracing::debug;
use zeroize::Zeroizing;

/// The set of root nodes of a wallet.
///
/// Every node holds the same key under a different unlocking method (one
/// password, a device key, or an m-of-n combination of them). Decryption
/// tries each candidate and keeps the first whose id matches the wallet.
#[derive(Clone, Debug, Default)]
pub struct Nodes {
    nodes: Vec<Node>,
    key_rank: (u32, u32),
    wallet_id: String,
}

impl Nodes {
    pub fn new(nodes: Vec<Node>, key_rank: (u32, u32), wallet_id: String) -> Self {
        Self {
            nodes,
            key_rank,
            wallet_id,
        }
    }

    /// A set holding one node, ranked 1-of-1.
    pub fn single(node: Node) -> Self {
        let wallet_id = node.id();
        Self::new(vec![node], (1, 1), wallet_id)
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    /// `(m, n)`: m of n passwords unlock the root.
    pub fn key_rank(&self) -> (u32, u32) {
        self.key_rank
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn first(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// True unless every node is encrypted.
    pub fn has_plain(&self) -> bool {
        self.nodes.iter().any(|n| !n.is_encrypted())
    }

    /// Unlock the root with `passphrase`.
    pub fn decrypt(&self, passphrase: &[u8]) -> Result<Node, Error> {
        if self.nodes.is_empty() {
            return Err(Error::NoPrivateKey);
        }
        if let [node] = self.nodes.as_slice() {
            if !node.is_encrypted() {
                return Ok(node.clone());
            }
        }

        for (index, node) in self.nodes.iter().enumerate() {
            if !node.is_encrypted() {
                if node.id() == self.wallet_id && node.private_key().is_some() {
                    return Ok(node.clone());
                }
                continue;
            }
            match node.decrypt(passphrase) {
                Ok(decrypted) if decrypted.id() == self.wallet_id => return Ok(decrypted),
                Ok(_) => debug!(index, "root candidate id mismatch"),
                Err(err) => debug!(index, %err, "root candidate failed to decrypt"),
            }
        }
        Err(Error::WrongPassphrase)
    }

    /// Every node chained with `chain_code`.
    pub fn chained(&self, chain_code: [u8; 32]) -> Self {
        Self {
            nodes: self.nodes.iter().map(|n| n.chained(chain_code)).collect(),
            key_rank: self.key_rank,
            wallet_id: self.wallet_id.clone(),
        }
    }

    /// Distinct encryption types across the set.
    pub fn encryption_types(&self) -> Vec<EncryptionType> {
        let mut types = Vec::new();
        for t in self.nodes.iter().flat_map(|n| n.encryption_types()) {
            if !types.contains(t) {
                types.push(*t);
            }
        }
        types
    }

    /// Distinct device keys across the set.
    pub fn encryption_keys(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        for key in self.nodes.iter().flat_map(|n| n.encryption_keys()) {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

/// XOR two passphrases, zero-extending the shorter one.
pub fn merge_keys(a: &[u8], b: &[u8]) -> Zeroizing<Vec<u8>> {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut out = Zeroizing::new(long.to_vec());
    for (o, s) in out.iter_mut().zip(short) {
        *o ^= s;
    }
    out
}
