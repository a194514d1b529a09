//! Groups: the leaves of one coin type under `44'/coin'`.

use crate::{
    error::LoadDefect,
    leaf::{Leaf, LeafSettings},
    policy::{product_index, DerivationPolicy},
    Error,
};
use bth_crypto_hd::{NetworkType, Node, Nodes, Path};
use bth_util_binary::{unwrap_var_bytes, var_bytes, BinaryReader, BinaryWriter, FormatError};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{info, warn};

const LEAF_KEY: u32 = 0x2001;
const AUTH_LEAF_KEY: u32 = 0x2002;
const SETTLEMENT_LEAF_KEY: u32 = 0x2003;

struct GroupInner {
    leaves: BTreeMap<u32, Arc<Leaf>>,
    root_nodes: Nodes,
    user_id: Option<String>,
    revision: u64,
}

/// All leaves of one coin type.
pub struct Group {
    coin: u32,
    path: Path,
    network: NetworkType,
    settings: LeafSettings,
    inner: Mutex<GroupInner>,
}

impl Group {
    pub fn new(coin: u32, root_nodes: Nodes, network: NetworkType, settings: LeafSettings) -> Self {
        Self {
            coin,
            path: Path::group(coin),
            network,
            settings,
            inner: Mutex::new(GroupInner {
                leaves: BTreeMap::new(),
                root_nodes,
                user_id: None,
                revision: 0,
            }),
        }
    }

    pub fn coin(&self) -> u32 {
        self.coin
    }

    /// `44'/coin'`
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn network(&self) -> NetworkType {
        self.network
    }

    /// Policy given to new leaves.
    pub fn policy(&self) -> DerivationPolicy {
        match DerivationPolicy::for_coin(self.coin) {
            DerivationPolicy::Auth { .. } => DerivationPolicy::Auth {
                user_id: self.inner.lock().user_id.clone(),
            },
            policy => policy,
        }
    }

    /// Leaf `44'/coin'/index'`, created if missing.
    ///
    /// The leaf node is derived from `unlocked_root`; without one the root
    /// set is opened with the empty passphrase, which only works for
    /// unencrypted wallets.
    pub fn create_leaf(&self, index: u32, unlocked_root: Option<&Node>) -> Result<Arc<Leaf>, Error> {
        self.create_leaf_with(index, self.policy(), unlocked_root)
    }

    /// Colored-coin leaf for `product`, indexed by the product name.
    pub fn create_cc_leaf(&self, product: &str, unlocked_root: Option<&Node>) -> Result<Arc<Leaf>, Error> {
        let DerivationPolicy::ColorCoin { .. } = self.policy() else {
            return Err(Error::WrongLeafKind(self.policy().name()));
        };
        let policy = DerivationPolicy::ColorCoin {
            product: product.to_owned(),
        };
        self.create_leaf_with(product_index(product), policy, unlocked_root)
    }

    fn create_leaf_with(
        &self,
        index: u32,
        policy: DerivationPolicy,
        unlocked_root: Option<&Node>,
    ) -> Result<Arc<Leaf>, Error> {
        if let Some(leaf) = self.get_leaf(index) {
            return Ok(leaf);
        }

        let root_nodes = self.inner.lock().root_nodes.clone();
        let decrypted;
        let root = match unlocked_root {
            Some(root) => root,
            None => {
                decrypted = root_nodes.decrypt(b"").map_err(|err| match err {
                    bth_crypto_hd::Error::NoPrivateKey => Error::WatchingOnly,
                    other => other.into(),
                })?;
                &decrypted
            }
        };
        if !root.has_private_key() {
            return Err(Error::WatchingOnly);
        }

        let mut path = self.path.clone();
        path.append(index, true);
        let node = root.derive(&path, false)?;
        let leaf = Arc::new(Leaf::new(policy, self.settings.clone(), self.network));
        leaf.init(&node, path.clone(), root_nodes)?;

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.leaves.get(&index) {
            return Ok(existing.clone());
        }
        inner.leaves.insert(index, leaf.clone());
        inner.revision += 1;
        info!(leaf = %leaf.id(), path = %path, "Created leaf");
        Ok(leaf)
    }

    pub fn get_leaf(&self, index: u32) -> Option<Arc<Leaf>> {
        self.inner.lock().leaves.get(&index).cloned()
    }

    /// Leaves in index order.
    pub fn leaves(&self) -> Vec<Arc<Leaf>> {
        self.inner.lock().leaves.values().cloned().collect()
    }

    /// Remove and shut down leaf `index`.
    pub fn delete_leaf(&self, index: u32) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.leaves.remove(&index);
            if removed.is_some() {
                inner.revision += 1;
            }
            removed
        };
        match removed {
            Some(leaf) => {
                leaf.shutdown();
                true
            }
            None => false,
        }
    }

    /// Hand a new root set to the group and every leaf.
    pub fn update_root_nodes(&self, root_nodes: Nodes) {
        let mut inner = self.inner.lock();
        for leaf in inner.leaves.values() {
            leaf.update_root_nodes(root_nodes.clone());
        }
        inner.root_nodes = root_nodes;
    }

    /// Bind the user id of an auth group and all of its leaves.
    pub fn set_user_id(&self, user_id: Option<&str>) -> Result<(), Error> {
        let policy = DerivationPolicy::for_coin(self.coin);
        if !matches!(policy, DerivationPolicy::Auth { .. }) {
            return Err(Error::WrongLeafKind(policy.name()));
        }
        let leaves = {
            let mut inner = self.inner.lock();
            inner.user_id = user_id.filter(|id| !id.is_empty()).map(str::to_owned);
            inner.leaves.values().cloned().collect::<Vec<_>>()
        };
        for leaf in leaves {
            leaf.set_user_id(user_id)?;
        }
        Ok(())
    }

    /// Public-only copy of this group.
    ///
    /// Each leaf node is derived again from the unlocked `root`, then the
    /// used addresses of the original leaf are replayed into the copy.
    pub fn create_watching_only(&self, root: &Node, root_nodes: Nodes) -> Result<Group, Error> {
        let group = Group::new(self.coin, root_nodes.clone(), self.network, self.settings.clone());
        let (leaves, user_id) = {
            let inner = self.inner.lock();
            (inner.leaves.clone(), inner.user_id.clone())
        };
        group.inner.lock().user_id = user_id;

        for (index, leaf) in leaves {
            let path = leaf.path();
            let node = root.derive(&path, false)?;
            let copy = Arc::new(Leaf::new(leaf.policy(), self.settings.clone(), self.network));
            copy.init(&node, path, root_nodes.clone())?;
            leaf.copy_to(&copy)?;
            group.inner.lock().leaves.insert(index, copy);
        }
        Ok(group)
    }

    /// `(structure, sum of leaf revisions)`; any change to the group or a
    /// leaf changes the pair.
    pub fn revision(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        let leaves = inner.leaves.values().map(|l| l.revision()).sum();
        (inner.revision, leaves)
    }

    /// `var_int(len)` envelope of the path and every leaf.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let leaves = self.leaves();
        let mut body = BinaryWriter::new();
        body.put_var_bytes(self.path.to_string().as_bytes());
        for leaf in leaves {
            let key = match leaf.policy() {
                DerivationPolicy::Auth { .. } => AUTH_LEAF_KEY,
                DerivationPolicy::Settlement => SETTLEMENT_LEAF_KEY,
                DerivationPolicy::Standard | DerivationPolicy::ColorCoin { .. } => LEAF_KEY,
            };
            body.put_u32(key).put_bytes(&leaf.serialize()?);
        }
        Ok(var_bytes(body.as_slice()))
    }

    /// Rebuild a group. Leaves that fail to load are skipped and reported.
    pub fn deserialize(
        coin: u32,
        data: &[u8],
        root_nodes: Nodes,
        network: NetworkType,
        settings: LeafSettings,
    ) -> Result<(Group, Vec<LoadDefect>), Error> {
        let body = unwrap_var_bytes(data)?;
        let mut reader = BinaryReader::new(body);
        let path_str = std::str::from_utf8(reader.get_var_bytes()?)
            .map_err(|e| FormatError::Invalid(e.to_string()))?;
        let path: Path = path_str.parse()?;

        let group = Group::new(coin, root_nodes.clone(), network, settings.clone());
        if path != group.path {
            return Err(FormatError::Invalid(format!("group path {path} for coin {coin:#x}")).into());
        }

        let mut defects = Vec::new();
        while !reader.is_empty() {
            let key = reader.get_u32()?;
            let start = reader.position();
            let len = reader.get_var_len()?;
            reader.get_bytes(len)?;
            let leaf_data = &body[start..reader.position()];

            let policy = match key {
                LEAF_KEY => DerivationPolicy::for_coin(coin),
                AUTH_LEAF_KEY => DerivationPolicy::Auth { user_id: None },
                SETTLEMENT_LEAF_KEY => DerivationPolicy::Settlement,
                other => {
                    defects.push(LoadDefect {
                        location: path.to_string(),
                        reason: format!("unknown leaf key {other:#x}"),
                    });
                    continue;
                }
            };
            match Leaf::deserialize(leaf_data, policy, root_nodes.clone(), settings.clone()) {
                Ok(leaf) => {
                    let index = leaf.index();
                    group.inner.lock().leaves.insert(index, Arc::new(leaf));
                }
                Err(err) => {
                    warn!(group = %path, %err, "Skipping leaf that failed to load");
                    defects.push(LoadDefect {
                        location: path.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok((group, defects))
    }
}
