//! Address leaves.
//!
//! A leaf is one BIP44 account (`44'/coin'/index'`). It keeps the public leaf
//! node only; addresses live at `[branch, index]` below it, with branch `0`
//! for receiving and `1` for change. Besides the addresses handed out, a
//! lookahead pool of not-yet-issued addresses is kept per branch so that a
//! scanner can recognise incoming funds ahead of the last used index.

use crate::{
    policy::{DerivationPolicy, AUTH_POOL_SIZE},
    resolver::{KeySource, LeafResolver, LeafSigningResolver},
    Error,
};
use bth_crypto_encryption::hash;
use bth_crypto_hd::{chained_public_key, Address, AddressType, NetworkType, Node, Nodes, Path};
use bth_util_binary::{unwrap_var_bytes, var_bytes, BinaryReader, BinaryWriter, FormatError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

const FORMAT_VERSION: u64 = 1;
const ADDRESS_KEY: u32 = 0x2002;
const SETTLEMENT_KEY: u32 = 0x2004;
const PRODUCT_KEY: u32 = 0x2005;

/// Pool depths are stored as one byte per branch.
pub const MAX_POOL_DEPTH: u32 = u8::MAX as u32;

const EXTERNAL: usize = 0;
const INTERNAL: usize = 1;

/// Address branch below a leaf.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Branch {
    External = 0,
    Internal = 1,
}

impl Branch {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Pool and address-type configuration of a leaf.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LeafSettings {
    /// Lookahead on the external branch.
    pub external_pool_size: u32,
    /// Lookahead on the internal branch.
    pub internal_pool_size: u32,
    /// Address types pre-derived for every pooled index.
    pub pool_address_types: Vec<AddressType>,
    /// Type used when a caller does not ask for one.
    pub default_address_type: AddressType,
    /// Disable the internal branch.
    pub ext_only: bool,
}

impl Default for LeafSettings {
    fn default() -> Self {
        Self {
            external_pool_size: 100,
            internal_pool_size: 100,
            pool_address_types: vec![AddressType::NestedP2wpkh, AddressType::P2wpkh],
            default_address_type: AddressType::P2wpkh,
            ext_only: false,
        }
    }
}

/// Lifecycle of a leaf.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeafState {
    Uninitialized,
    Active,
    /// Public derivation only; the wallet holds no private root.
    WatchingOnly,
    Shutdown,
}

#[derive(Clone, Debug)]
struct UsedAddress {
    path: Path,
    address: Address,
    public_key: [u8; 33],
}

#[derive(Clone, Debug)]
struct PooledAddress {
    address: Address,
    public_key: [u8; 33],
}

#[derive(Clone, Debug)]
struct SettlementEntry {
    settlement_id: [u8; 32],
    buy: [u8; 33],
    sell: [u8; 33],
    own_key: [u8; 33],
    address: Address,
    script: Vec<u8>,
}

/// Everything needed to rebuild the address state of a leaf.
#[derive(Clone, Debug, Default)]
struct LeafRecords {
    last: [u32; 2],
    addresses: Vec<(Path, AddressType)>,
    settlements: Vec<([u8; 32], [u8; 33], [u8; 33])>,
    product: Option<String>,
    pool: Option<[u32; 2]>,
    user_id: Option<String>,
}

struct LeafInner {
    state: LeafState,
    policy: DerivationPolicy,
    settings: LeafSettings,
    network: NetworkType,
    path: Path,
    id: String,
    /// Public leaf node, unchained.
    node: Option<Node>,
    /// `node` with the policy chain applied; addresses derive from it.
    active: Option<Node>,
    branch_nodes: HashMap<u32, Node>,
    root_nodes: Nodes,
    last: [u32; 2],
    used: Vec<UsedAddress>,
    /// Prefixed hash (own and complementary type) to `used` slot.
    by_hash: HashMap<Vec<u8>, usize>,
    pool: BTreeMap<(Path, AddressType), PooledAddress>,
    pool_by_hash: HashMap<Vec<u8>, (Path, AddressType)>,
    pool_end: [u32; 2],
    pool_target: [u32; 2],
    /// Addresses requested before an auth leaf was bound to a user.
    pending: Vec<(Path, AddressType)>,
    settlements: Vec<SettlementEntry>,
    revision: u64,
}

/// One account of a group.
///
/// All state sits behind a single mutex held for the duration of one
/// operation; key derivation from the public node runs under it, passphrase
/// stretching never does.
pub struct Leaf {
    inner: Mutex<LeafInner>,
}

impl Leaf {
    pub fn new(policy: DerivationPolicy, settings: LeafSettings, network: NetworkType) -> Self {
        let pool_target = [
            pool_depth(settings.external_pool_size),
            pool_depth(settings.internal_pool_size),
        ];
        Self {
            inner: Mutex::new(LeafInner {
                state: LeafState::Uninitialized,
                policy,
                settings,
                network,
                path: Path::default(),
                id: String::new(),
                node: None,
                active: None,
                branch_nodes: HashMap::new(),
                root_nodes: Nodes::default(),
                last: [0; 2],
                used: Vec::new(),
                by_hash: HashMap::new(),
                pool: BTreeMap::new(),
                pool_by_hash: HashMap::new(),
                pool_end: [0; 2],
                pool_target,
                pending: Vec::new(),
                settlements: Vec::new(),
                revision: 0,
            }),
        }
    }

    /// Attach the leaf node derived at `path` and fill the pool.
    ///
    /// Only the public part of `node` is kept. `root_nodes` is the wallet's
    /// root set, used by signing resolvers.
    pub fn init(&self, node: &Node, path: Path, root_nodes: Nodes) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.init(node, path, root_nodes)?;
        inner.top_up()?;
        Ok(())
    }

    /// Stable identifier, the id of the unchained leaf node.
    pub fn id(&self) -> String {
        self.inner.lock().id.clone()
    }

    /// Absolute path of the leaf node.
    pub fn path(&self) -> Path {
        self.inner.lock().path.clone()
    }

    /// Account index (last path element).
    pub fn index(&self) -> u32 {
        self.inner.lock().path.get(-1).unwrap_or_default()
    }

    pub fn state(&self) -> LeafState {
        self.inner.lock().state
    }

    pub fn policy(&self) -> DerivationPolicy {
        self.inner.lock().policy.clone()
    }

    pub fn network(&self) -> NetworkType {
        self.inner.lock().network
    }

    /// Public leaf node (unchained).
    pub fn node(&self) -> Option<Node> {
        self.inner.lock().node.clone()
    }

    /// Bumped on every change of persisted state.
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    /// Next address on `branch`.
    pub fn create_address(
        &self,
        branch: Branch,
        address_type: Option<AddressType>,
    ) -> Result<Address, Error> {
        let mut inner = self.inner.lock();
        inner.check_live()?;
        if matches!(inner.policy, DerivationPolicy::Settlement) {
            return Err(Error::WrongLeafKind(inner.policy.name()));
        }
        let address_type = address_type.unwrap_or(inner.settings.default_address_type);
        let branch = branch.as_u32();
        let index = inner.last_index(branch)?;
        let address = inner.use_address(branch, index, address_type)?;
        inner.top_up()?;
        debug!(leaf = %inner.id, %address, branch, index, "Created address");
        Ok(address)
    }

    pub fn new_external_address(&self, address_type: Option<AddressType>) -> Result<Address, Error> {
        self.create_address(Branch::External, address_type)
    }

    pub fn new_internal_address(&self, address_type: Option<AddressType>) -> Result<Address, Error> {
        self.create_address(Branch::Internal, address_type)
    }

    /// Change address: internal, or external on ext-only leaves.
    pub fn new_change_address(&self, address_type: Option<AddressType>) -> Result<Address, Error> {
        let branch = if self.inner.lock().ext_only() {
            Branch::External
        } else {
            Branch::Internal
        };
        self.create_address(branch, address_type)
    }

    /// Address at `path`, relative (`[branch, index]`) or absolute below the
    /// leaf. Every unused index before it on the branch is marked used too.
    pub fn create_address_with_path(
        &self,
        path: &Path,
        address_type: Option<AddressType>,
    ) -> Result<Address, Error> {
        let mut inner = self.inner.lock();
        inner.check_live()?;
        if matches!(inner.policy, DerivationPolicy::Settlement) {
            return Err(Error::WrongLeafKind(inner.policy.name()));
        }
        let address_type = address_type.unwrap_or(inner.settings.default_address_type);
        let (branch, index) = inner.branch_and_index(path)?;
        let address = inner.use_with_gap(branch, index, address_type)?;
        inner.top_up()?;
        Ok(address)
    }

    /// Scanner callback: a watched address has (or lacks) history.
    ///
    /// A pooled address with history is promoted to used along with every
    /// unused index below it, then the pool is refilled. Returns true if the
    /// leaf changed.
    pub fn on_address_activity(&self, address: &Address, has_history: bool) -> Result<bool, Error> {
        let mut inner = self.inner.lock();
        inner.check_live()?;
        let key = address.prefixed();
        if !has_history || inner.by_hash.contains_key(&key) {
            return Ok(false);
        }
        let Some((path, address_type)) = inner.pool_by_hash.get(&key).cloned() else {
            return Ok(false);
        };
        let (branch, index) = inner.branch_and_index(&path)?;
        inner.use_with_gap(branch, index, address_type)?;
        inner.top_up()?;
        info!(leaf = %inner.id, %address, path = %path, "Pooled address became active");
        Ok(true)
    }

    /// Make sure at least `external`/`internal` pooled addresses lie beyond
    /// the last used index; returns the number of new pool entries.
    pub fn top_up_address_pool(&self, external: u32, internal: u32) -> Result<usize, Error> {
        let mut inner = self.inner.lock();
        inner.check_live()?;
        inner.pool_target[EXTERNAL] = inner.pool_target[EXTERNAL].max(pool_depth(external));
        inner.pool_target[INTERNAL] = inner.pool_target[INTERNAL].max(pool_depth(internal));
        inner.top_up()
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        let inner = self.inner.lock();
        let key = address.prefixed();
        inner.by_hash.contains_key(&key)
            || inner.pool_by_hash.contains_key(&key)
            || inner.settlements.iter().any(|s| s.address == *address)
    }

    /// `[branch, index]` of a used or pooled address.
    pub fn get_path_for_address(&self, address: &Address) -> Option<Path> {
        self.inner.lock().path_for(address)
    }

    /// Path of `address` as a string, e.g. `0/7`.
    pub fn address_index(&self, address: &Address) -> Option<String> {
        self.get_path_for_address(address).map(|p| p.to_string())
    }

    /// Script public key (chained where the policy chains) of `address`.
    pub fn public_key_for(&self, address: &Address) -> Option<[u8; 33]> {
        let inner = self.inner.lock();
        let key = address.prefixed();
        if let Some(slot) = inner.by_hash.get(&key) {
            return Some(inner.used[*slot].public_key);
        }
        let pool_key = inner.pool_by_hash.get(&key)?;
        inner.pool.get(pool_key).map(|p| p.public_key)
    }

    /// Addresses handed out, in creation order.
    pub fn used_addresses(&self) -> Vec<Address> {
        let inner = self.inner.lock();
        inner.used.iter().map(|u| u.address.clone()).collect()
    }

    pub fn external_addresses(&self) -> Vec<Address> {
        self.used_on_branch(EXTERNAL as u32)
    }

    pub fn internal_addresses(&self) -> Vec<Address> {
        self.used_on_branch(INTERNAL as u32)
    }

    fn used_on_branch(&self, branch: u32) -> Vec<Address> {
        let inner = self.inner.lock();
        inner
            .used
            .iter()
            .filter(|u| u.path.get(0) == Some(branch))
            .map(|u| u.address.clone())
            .collect()
    }

    /// Pre-derived addresses not yet handed out.
    pub fn pooled_addresses(&self) -> Vec<Address> {
        let inner = self.inner.lock();
        inner.pool.values().map(|p| p.address.clone()).collect()
    }

    /// Every address a scanner should watch for this leaf.
    pub fn watched_addresses(&self) -> Vec<Address> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for used in &inner.used {
            out.push(used.address.clone());
            if let Some(other) = used.address.address_type().complementary() {
                if let Ok(address) = Address::from_public_key(&used.public_key, other, inner.network) {
                    out.push(address);
                }
            }
        }
        out.extend(inner.pool.values().map(|p| p.address.clone()));
        out.extend(inner.settlements.iter().map(|s| s.address.clone()));

        let mut seen = std::collections::HashSet::new();
        out.retain(|a| seen.insert(a.prefixed()));
        out
    }

    pub fn is_external_address(&self, address: &Address) -> bool {
        self.get_path_for_address(address)
            .and_then(|p| p.get(0))
            .map(|branch| branch == EXTERNAL as u32)
            .unwrap_or(false)
    }

    /// Number of addresses waiting for a user id.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Bind (or with `None`, clear) the user id of an auth leaf.
    ///
    /// Binding chains the leaf node with `hash256(user_id)`, materialises
    /// the pending addresses and fills a small external pool. Clearing
    /// resets the leaf.
    pub fn set_user_id(&self, user_id: Option<&str>) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.check_live()?;
        let DerivationPolicy::Auth { user_id: current } = &inner.policy else {
            return Err(Error::WrongLeafKind(inner.policy.name()));
        };
        let user_id = user_id.filter(|id| !id.is_empty()).map(str::to_owned);
        if *current == user_id {
            return Ok(());
        }

        let mut requested: Vec<(Path, AddressType)> = inner
            .used
            .iter()
            .map(|u| (u.path.clone(), u.address.address_type()))
            .collect();
        requested.append(&mut inner.pending);
        inner.clear_addresses();
        inner.policy = DerivationPolicy::Auth {
            user_id: user_id.clone(),
        };
        inner.apply_chain();

        if user_id.is_none() {
            inner.last = [0; 2];
            debug!(leaf = %inner.id, "Auth leaf reset");
        } else {
            for (path, address_type) in requested {
                let (branch, index) = inner.branch_and_index(&path)?;
                inner.use_address(branch, index, address_type)?;
            }
            inner.top_up()?;
            debug!(leaf = %inner.id, used = inner.used.len(), "Auth leaf bound to user");
        }
        inner.revision += 1;
        Ok(())
    }

    /// Register a settlement and return its P2WSH address.
    ///
    /// One of `buy_key`/`sell_key` must be this leaf's public key. Both are
    /// chained by the 32-byte `settlement_id` before entering the script.
    pub fn add_settlement_id(
        &self,
        settlement_id: &[u8],
        buy_key: &[u8; 33],
        sell_key: &[u8; 33],
    ) -> Result<Address, Error> {
        let mut inner = self.inner.lock();
        inner.check_live()?;
        if !matches!(inner.policy, DerivationPolicy::Settlement) {
            return Err(Error::WrongLeafKind(inner.policy.name()));
        }
        let settlement_id: [u8; 32] = settlement_id
            .try_into()
            .map_err(|_| Error::InvalidSettlementId(settlement_id.len()))?;
        inner.add_settlement(settlement_id, *buy_key, *sell_key)
    }

    pub fn index_for_settlement_id(&self, settlement_id: &[u8]) -> Option<usize> {
        let inner = self.inner.lock();
        inner
            .settlements
            .iter()
            .position(|s| s.settlement_id.as_slice() == settlement_id)
    }

    pub fn settlement_address(&self, settlement_id: &[u8]) -> Option<Address> {
        let inner = self.inner.lock();
        inner
            .settlements
            .iter()
            .find(|s| s.settlement_id.as_slice() == settlement_id)
            .map(|s| s.address.clone())
    }

    /// Public lookups over every address of the leaf.
    pub fn resolver(&self) -> Result<LeafResolver, Error> {
        let inner = self.inner.lock();
        inner.check_live()?;
        Ok(LeafResolver::new(inner.script_map()))
    }

    /// Resolver that also hands out private keys.
    ///
    /// The passphrase is checked once here; the root is decrypted again for
    /// each key request.
    pub fn signing_resolver(&self, passphrase: &[u8]) -> Result<LeafSigningResolver, Error> {
        let (public, keys, root_nodes, path) = {
            let inner = self.inner.lock();
            inner.check_live()?;
            if inner.state == LeafState::WatchingOnly {
                return Err(Error::WatchingOnly);
            }
            let root_nodes = match inner.policy.chain_code() {
                Some(chain_code) => inner.root_nodes.chained(chain_code),
                None => inner.root_nodes.clone(),
            };
            (
                LeafResolver::new(inner.script_map()),
                inner.key_sources(),
                root_nodes,
                inner.path.clone(),
            )
        };

        root_nodes.decrypt(passphrase)?;
        Ok(LeafSigningResolver::new(public, passphrase, root_nodes, path, keys))
    }

    /// Replace the root set (after a password change or export).
    pub fn update_root_nodes(&self, root_nodes: Nodes) {
        let mut inner = self.inner.lock();
        if inner.state == LeafState::Shutdown {
            return;
        }
        inner.set_root_nodes(root_nodes);
    }

    /// Replay the used and pending addresses of this leaf into `other`.
    pub fn copy_to(&self, other: &Leaf) -> Result<(), Error> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let records = {
            let inner = self.inner.lock();
            inner.check_live()?;
            inner.records()
        };
        let mut target = other.inner.lock();
        target.check_live()?;
        target.restore(records)?;
        target.revision += 1;
        Ok(())
    }

    /// Release caches; every later operation fails with `LeafShutdown`.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.clear_addresses();
        inner.node = None;
        inner.active = None;
        inner.root_nodes = Nodes::default();
        inner.settlements.clear();
        inner.state = LeafState::Shutdown;
    }

    /// Serialized leaf, wrapped in a `var_int(len)` envelope.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let inner = self.inner.lock();
        inner.check_live()?;
        let node = inner.node.as_ref().ok_or(Error::NotInitialized)?;

        let mut body = BinaryWriter::new();
        body.put_var_int(FORMAT_VERSION)
            .put_var_bytes(inner.path.to_string().as_bytes())
            .put_var_bytes(&node.serialize()[..])
            .put_u32(inner.last[EXTERNAL])
            .put_u32(inner.last[INTERNAL]);

        let addresses = inner
            .used
            .iter()
            .map(|u| (&u.path, u.address.address_type()))
            .chain(inner.pending.iter().map(|(p, t)| (p, *t)));
        for (index, (path, address_type)) in addresses.enumerate() {
            body.put_u32(ADDRESS_KEY)
                .put_u32(index as u32)
                .put_u32(address_type.as_u32())
                .put_var_bytes(path.to_string().as_bytes());
        }
        for entry in &inner.settlements {
            body.put_u32(SETTLEMENT_KEY)
                .put_var_bytes(&entry.settlement_id)
                .put_var_bytes(&entry.buy)
                .put_var_bytes(&entry.sell);
        }
        if let DerivationPolicy::ColorCoin { product } = &inner.policy {
            if !product.is_empty() {
                body.put_u32(PRODUCT_KEY).put_var_bytes(product.as_bytes());
            }
        }
        if !inner.pool.is_empty() {
            let pooled = |b: usize| inner.pool_end[b].saturating_sub(inner.last[b]).min(255) as u8;
            body.put_u8(pooled(INTERNAL)).put_u8(pooled(EXTERNAL));
        }
        Ok(var_bytes(body.as_slice()))
    }

    /// Rebuild a leaf from [`Leaf::serialize`] output.
    ///
    /// Used and pending addresses are replayed, so the restored leaf has the
    /// same counters, lookups and pool depth.
    pub fn deserialize(
        data: &[u8],
        policy: DerivationPolicy,
        root_nodes: Nodes,
        settings: LeafSettings,
    ) -> Result<Self, Error> {
        let body = unwrap_var_bytes(data)?;
        let mut reader = BinaryReader::new(body);

        let version = reader.get_var_int()?;
        if version != FORMAT_VERSION {
            return Err(FormatError::Invalid(format!("unsupported leaf version {version}")).into());
        }
        let path: Path = utf8(reader.get_var_bytes()?)?.parse()?;
        let node = Node::deserialize(reader.get_var_bytes()?)?;

        let mut records = LeafRecords {
            last: [reader.get_u32()?, reader.get_u32()?],
            ..Default::default()
        };
        while reader.remaining() > 2 {
            match reader.get_u32()? {
                ADDRESS_KEY => {
                    let _index = reader.get_u32()?;
                    let address_type = AddressType::try_from(reader.get_u32()?)?;
                    let path: Path = utf8(reader.get_var_bytes()?)?.parse()?;
                    records.addresses.push((path, address_type));
                }
                SETTLEMENT_KEY => {
                    let settlement_id = fixed(reader.get_var_bytes()?)?;
                    let buy = fixed(reader.get_var_bytes()?)?;
                    let sell = fixed(reader.get_var_bytes()?)?;
                    records.settlements.push((settlement_id, buy, sell));
                }
                PRODUCT_KEY => {
                    records.product = Some(utf8(reader.get_var_bytes()?)?.to_owned());
                }
                other => {
                    return Err(FormatError::Invalid(format!("unknown leaf record {other:#x}")).into())
                }
            }
        }
        match reader.remaining() {
            0 => {}
            2 => {
                let internal = reader.get_u8()? as u32;
                let external = reader.get_u8()? as u32;
                records.pool = Some([external, internal]);
            }
            n => {
                return Err(FormatError::LengthMismatch {
                    declared: 2,
                    found: n,
                }
                .into())
            }
        }

        let leaf = Leaf::new(policy, settings, node.network());
        {
            let mut inner = leaf.inner.lock();
            inner.init(&node, path, root_nodes)?;
            inner.restore(records)?;
            inner.revision = 0;
        }
        Ok(leaf)
    }
}

impl LeafInner {
    fn check_live(&self) -> Result<(), Error> {
        match self.state {
            LeafState::Shutdown => Err(Error::LeafShutdown),
            LeafState::Uninitialized => Err(Error::NotInitialized),
            LeafState::Active | LeafState::WatchingOnly => Ok(()),
        }
    }

    fn ext_only(&self) -> bool {
        self.settings.ext_only || self.policy.ext_only()
    }

    fn init(&mut self, node: &Node, path: Path, root_nodes: Nodes) -> Result<(), Error> {
        if self.state == LeafState::Shutdown {
            return Err(Error::LeafShutdown);
        }
        let node = node.neutered().unchained();
        self.id = node.id();
        self.network = node.network();
        self.path = path;
        self.node = Some(node);
        self.clear_addresses();
        self.apply_chain();
        self.set_root_nodes(root_nodes);
        self.revision += 1;
        Ok(())
    }

    fn set_root_nodes(&mut self, root_nodes: Nodes) {
        let can_sign = root_nodes.iter().any(|n| n.has_private_key());
        self.root_nodes = root_nodes;
        self.state = if can_sign {
            LeafState::Active
        } else {
            LeafState::WatchingOnly
        };
    }

    fn apply_chain(&mut self) {
        self.branch_nodes.clear();
        self.active = match (&self.node, self.policy.chain_code()) {
            (Some(node), Some(chain_code)) => Some(node.chained(chain_code)),
            (Some(node), None) => Some(node.clone()),
            (None, _) => None,
        };
    }

    fn clear_addresses(&mut self) {
        self.used.clear();
        self.by_hash.clear();
        self.pool.clear();
        self.pool_by_hash.clear();
        self.pool_end = [0; 2];
        self.pending.clear();
        self.branch_nodes.clear();
    }

    fn branch_slot(&self, branch: u32) -> Result<usize, Error> {
        match branch {
            0 => Ok(EXTERNAL),
            1 if self.ext_only() => Err(Error::NoInternalBranch),
            1 => Ok(INTERNAL),
            other => Err(Error::AccountOrPathMismatch(format!("no branch {other}"))),
        }
    }

    fn last_index(&self, branch: u32) -> Result<u32, Error> {
        Ok(self.last[self.branch_slot(branch)?])
    }

    /// `(branch, index)` of a relative or leaf-absolute address path.
    fn branch_and_index(&self, path: &Path) -> Result<(u32, u32), Error> {
        let relative = if path.len() == 2 && !path.is_absolute() {
            path.clone()
        } else if path.len() == self.path.len() + 2 && path.starts_with(&self.path) {
            path.suffix(self.path.len())
        } else {
            return Err(Error::AccountOrPathMismatch(path.to_string()));
        };
        if relative.is_hardened(0) || relative.is_hardened(1) {
            return Err(Error::AccountOrPathMismatch(path.to_string()));
        }
        match (relative.get(0), relative.get(1)) {
            (Some(branch), Some(index)) => {
                self.branch_slot(branch)?;
                Ok((branch, index))
            }
            _ => Err(Error::AccountOrPathMismatch(path.to_string())),
        }
    }

    fn derive_public(&mut self, branch: u32, index: u32) -> Result<[u8; 33], Error> {
        if !self.branch_nodes.contains_key(&branch) {
            let active = self.active.as_ref().ok_or(Error::NotInitialized)?;
            let branch_node = active.derive(&child(branch), true)?;
            self.branch_nodes.insert(branch, branch_node);
        }
        let branch_node = self.branch_nodes.get(&branch).ok_or(Error::NotInitialized)?;
        Ok(branch_node.derive(&child(index), true)?.pub_chained_key()?)
    }

    /// Mark `[branch, index]` used with `address_type`.
    fn use_address(
        &mut self,
        branch: u32,
        index: u32,
        address_type: AddressType,
    ) -> Result<Address, Error> {
        let slot = self.branch_slot(branch)?;
        if index >= self.last[slot] {
            self.last[slot] = index.saturating_add(1);
        }
        let path = Path::new(vec![branch, index]);

        if !self.policy.is_bound() {
            if !self.pending.iter().any(|(p, t)| *p == path && *t == address_type) {
                self.pending.push((path, address_type));
                self.revision += 1;
            }
            return Err(Error::UserIdRequired);
        }

        if let Some(used) = self
            .used
            .iter()
            .find(|u| u.path == path && u.address.address_type() == address_type)
        {
            return Ok(used.address.clone());
        }

        let pooled: Vec<(Path, AddressType)> = self
            .pool
            .keys()
            .filter(|(p, _)| *p == path)
            .cloned()
            .collect();
        let mut public_key = None;
        for key in pooled {
            if let Some(entry) = self.pool.remove(&key) {
                self.pool_by_hash.remove(&entry.address.prefixed());
                public_key = Some(entry.public_key);
            }
        }
        let public_key = match public_key {
            Some(key) => key,
            None => self.derive_public(branch, index)?,
        };

        let address = Address::from_public_key(&public_key, address_type, self.network)?;
        let used_slot = self.used.len();
        self.by_hash.insert(address.prefixed(), used_slot);
        if let Some(other) = address_type.complementary() {
            let complement = Address::from_public_key(&public_key, other, self.network)?;
            self.by_hash.entry(complement.prefixed()).or_insert(used_slot);
        }
        self.used.push(UsedAddress {
            path,
            address: address.clone(),
            public_key,
        });
        self.revision += 1;
        Ok(address)
    }

    /// Mark `[branch, index]` used along with the unused indices before it.
    fn use_with_gap(
        &mut self,
        branch: u32,
        index: u32,
        address_type: AddressType,
    ) -> Result<Address, Error> {
        if self.policy.is_bound() {
            let start = self.last_index(branch)?;
            for gap in start..index {
                self.use_address(branch, gap, address_type)?;
            }
        }
        self.use_address(branch, index, address_type)
    }

    /// Pool depth and address types for the current policy.
    fn pool_plan(&self) -> ([u32; 2], Vec<AddressType>) {
        match &self.policy {
            DerivationPolicy::Auth { user_id: Some(_) } => {
                ([AUTH_POOL_SIZE, 0], vec![AddressType::P2wpkh])
            }
            DerivationPolicy::Auth { user_id: None } | DerivationPolicy::Settlement => {
                ([0, 0], Vec::new())
            }
            DerivationPolicy::Standard | DerivationPolicy::ColorCoin { .. } => {
                let internal = if self.ext_only() {
                    0
                } else {
                    self.pool_target[INTERNAL]
                };
                (
                    [self.pool_target[EXTERNAL], internal],
                    self.settings.pool_address_types.clone(),
                )
            }
        }
    }

    fn top_up(&mut self) -> Result<usize, Error> {
        if self.active.is_none() {
            return Ok(0);
        }
        let (sizes, types) = self.pool_plan();
        if types.is_empty() {
            return Ok(0);
        }

        let mut added = 0;
        for slot in [EXTERNAL, INTERNAL] {
            let branch = slot as u32;
            let target = self.last[slot].saturating_add(sizes[slot]);
            let start = self.pool_end[slot].max(self.last[slot]);
            for index in start..target {
                let public_key = self.derive_public(branch, index)?;
                let path = Path::new(vec![branch, index]);
                for address_type in &types {
                    let address = Address::from_public_key(&public_key, *address_type, self.network)?;
                    self.pool_by_hash
                        .insert(address.prefixed(), (path.clone(), *address_type));
                    self.pool.insert(
                        (path.clone(), *address_type),
                        PooledAddress {
                            address,
                            public_key,
                        },
                    );
                    added += 1;
                }
            }
            self.pool_end[slot] = self.pool_end[slot].max(target);
        }
        if added > 0 {
            self.revision += 1;
            debug!(leaf = %self.id, added, "Topped up address pool");
        }
        Ok(added)
    }

    fn path_for(&self, address: &Address) -> Option<Path> {
        let key = address.prefixed();
        if let Some(slot) = self.by_hash.get(&key) {
            return Some(self.used[*slot].path.clone());
        }
        self.pool_by_hash.get(&key).map(|(path, _)| path.clone())
    }

    fn add_settlement(
        &mut self,
        settlement_id: [u8; 32],
        buy: [u8; 33],
        sell: [u8; 33],
    ) -> Result<Address, Error> {
        if let Some(existing) = self
            .settlements
            .iter()
            .find(|s| s.settlement_id == settlement_id)
        {
            return Ok(existing.address.clone());
        }
        let own = *self.node.as_ref().ok_or(Error::NotInitialized)?.public_key();
        if own != buy && own != sell {
            return Err(Error::AccountOrPathMismatch(
                "settlement keys do not include this leaf".into(),
            ));
        }

        let buy_chained = chained_public_key(&buy, &settlement_id)?;
        let sell_chained = chained_public_key(&sell, &settlement_id)?;
        let own_key = if own == buy { buy_chained } else { sell_chained };
        let script = Address::settlement_script(&buy_chained, &sell_chained);
        let address = Address::from_witness_script(&script, self.network);

        self.settlements.push(SettlementEntry {
            settlement_id,
            buy,
            sell,
            own_key,
            address: address.clone(),
            script,
        });
        self.revision += 1;
        debug!(leaf = %self.id, %address, "Added settlement");
        Ok(address)
    }

    /// hash160(pubkey) to pubkey, nested script hash to witness script and
    /// settlement script hash to script.
    fn script_map(&self) -> HashMap<Vec<u8>, Vec<u8>> {
        let mut scripts = HashMap::new();
        let keys = self
            .used
            .iter()
            .map(|u| &u.public_key)
            .chain(self.pool.values().map(|p| &p.public_key));
        for public_key in keys {
            scripts.insert(hash::hash160(public_key).to_vec(), public_key.to_vec());
            let witness_script = Address::witness_script(public_key);
            scripts.insert(hash::hash160(&witness_script).to_vec(), witness_script);
        }
        for entry in &self.settlements {
            scripts.insert(entry.address.unprefixed().to_vec(), entry.script.clone());
            scripts.insert(hash::hash160(&entry.own_key).to_vec(), entry.own_key.to_vec());
        }
        scripts
    }

    fn key_sources(&self) -> HashMap<Vec<u8>, KeySource> {
        let mut keys = HashMap::new();
        for used in &self.used {
            keys.insert(used.public_key.to_vec(), KeySource::Path(used.path.clone()));
        }
        for ((path, _), pooled) in &self.pool {
            keys.entry(pooled.public_key.to_vec())
                .or_insert_with(|| KeySource::Path(path.clone()));
        }
        for entry in &self.settlements {
            keys.insert(entry.own_key.to_vec(), KeySource::Settlement(entry.settlement_id));
        }
        keys
    }

    fn records(&self) -> LeafRecords {
        let product = match &self.policy {
            DerivationPolicy::ColorCoin { product } if !product.is_empty() => Some(product.clone()),
            _ => None,
        };
        let user_id = match &self.policy {
            DerivationPolicy::Auth { user_id } => user_id.clone(),
            _ => None,
        };
        LeafRecords {
            last: self.last,
            addresses: self
                .used
                .iter()
                .map(|u| (u.path.clone(), u.address.address_type()))
                .chain(self.pending.iter().cloned())
                .collect(),
            settlements: self
                .settlements
                .iter()
                .map(|s| (s.settlement_id, s.buy, s.sell))
                .collect(),
            product,
            pool: Some(self.pool_target),
            user_id,
        }
    }

    fn restore(&mut self, records: LeafRecords) -> Result<(), Error> {
        match &mut self.policy {
            DerivationPolicy::ColorCoin { product } => {
                if let Some(stored) = records.product {
                    *product = stored;
                }
            }
            DerivationPolicy::Auth { user_id } => {
                if user_id.is_none() && records.user_id.is_some() {
                    *user_id = records.user_id;
                    self.apply_chain();
                }
            }
            DerivationPolicy::Standard | DerivationPolicy::Settlement => {}
        }

        for (path, address_type) in records.addresses {
            let (branch, index) = self.branch_and_index(&path)?;
            match self.use_address(branch, index, address_type) {
                Ok(_) | Err(Error::UserIdRequired) => {}
                Err(err) => return Err(err),
            }
        }
        for slot in [EXTERNAL, INTERNAL] {
            self.last[slot] = self.last[slot].max(records.last[slot]);
        }
        if let Some(pool) = records.pool {
            for slot in [EXTERNAL, INTERNAL] {
                self.pool_target[slot] = self.pool_target[slot].max(pool[slot]);
            }
        }
        for (settlement_id, buy, sell) in records.settlements {
            self.add_settlement(settlement_id, buy, sell)?;
        }
        self.top_up()?;
        Ok(())
    }
}

fn child(index: u32) -> Path {
    let mut path = Path::default();
    path.append(index, false);
    path
}

fn utf8(bytes: &[u8]) -> Result<&str, FormatError> {
    std::str::from_utf8(bytes).map_err(|e| FormatError::Invalid(e.to_string()))
}

fn pool_depth(requested: u32) -> u32 {
    if requested > MAX_POOL_DEPTH {
        warn!(requested, max = MAX_POOL_DEPTH, "Address pool depth capped");
    }
    requested.min(MAX_POOL_DEPTH)
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], FormatError> {
    bytes
        .try_into()
        .map_err(|_| FormatError::Invalid(format!("expected {N} bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bth_crypto_hd::{public_key_from_private, CoinType, Seed};
    use crate::resolver::ResolverFeed;

    fn small_settings() -> LeafSettings {
        LeafSettings {
            external_pool_size: 3,
            internal_pool_size: 2,
            ..Default::default()
        }
    }

    fn root() -> Node {
        Node::from_seed(&Seed::from_entropy(vec![0x42; 32], NetworkType::TestNet)).unwrap()
    }

    fn leaf_with(policy: DerivationPolicy, coin: u32, settings: LeafSettings) -> Leaf {
        let root = root();
        let mut path = Path::group(coin);
        path.append(0, true);
        let node = root.derive(&path, false).unwrap();
        let leaf = Leaf::new(policy, settings, NetworkType::TestNet);
        leaf.init(&node, path, Nodes::single(root)).unwrap();
        leaf
    }

    fn standard_leaf() -> Leaf {
        leaf_with(DerivationPolicy::Standard, 1, small_settings())
    }

    mod addresses {
        use super::*;

        #[test]
        fn test_external_addresses_are_unique_and_increasing() {
            let leaf = standard_leaf();
            let a = leaf.new_external_address(None).unwrap();
            let b = leaf.new_external_address(None).unwrap();
            assert_ne!(a, b);
            assert_eq!(leaf.get_path_for_address(&a).unwrap().to_string(), "0/0");
            assert_eq!(leaf.get_path_for_address(&b).unwrap().to_string(), "0/1");
            assert_eq!(leaf.external_addresses(), vec![a, b]);
            assert!(leaf.internal_addresses().is_empty());
        }

        #[test]
        fn test_address_matches_node_derivation() {
            let leaf = standard_leaf();
            let address = leaf.new_internal_address(Some(AddressType::P2pkh)).unwrap();

            let path: Path = "m/44'/1'/0'/1/0".parse().unwrap();
            let expected = root().derive(&path, true).unwrap();
            assert_eq!(
                address,
                Address::from_public_key(expected.public_key(), AddressType::P2pkh, NetworkType::TestNet)
                    .unwrap()
            );
            assert_eq!(leaf.public_key_for(&address), Some(*expected.public_key()));
            assert!(!leaf.is_external_address(&address));
        }

        #[test]
        fn test_create_with_path_fills_gap() {
            let leaf = standard_leaf();
            let path: Path = "0/4".parse().unwrap();
            let address = leaf.create_address_with_path(&path, None).unwrap();
            assert_eq!(leaf.used_addresses().len(), 5);
            assert_eq!(leaf.get_path_for_address(&address), Some(path));
            assert_eq!(leaf.address_index(&address).unwrap(), "0/4");

            let next = leaf.new_external_address(None).unwrap();
            assert_eq!(leaf.address_index(&next).unwrap(), "0/5");

            let absolute: Path = "m/44'/1'/0'/1/1".parse().unwrap();
            leaf.create_address_with_path(&absolute, None).unwrap();
            assert_eq!(leaf.internal_addresses().len(), 2);

            let foreign: Path = "m/44'/1'/7'/0/1".parse().unwrap();
            assert!(matches!(
                leaf.create_address_with_path(&foreign, None),
                Err(Error::AccountOrPathMismatch(_))
            ));
        }

        #[test]
        fn test_ext_only_has_no_internal_branch() {
            let settings = LeafSettings {
                ext_only: true,
                ..small_settings()
            };
            let leaf = leaf_with(DerivationPolicy::Standard, 1, settings);
            assert!(matches!(
                leaf.new_internal_address(None),
                Err(Error::NoInternalBranch)
            ));
            let change = leaf.new_change_address(None).unwrap();
            assert!(leaf.is_external_address(&change));
        }

        #[test]
        fn test_complementary_address_is_known() {
            let leaf = standard_leaf();
            let native = leaf.new_external_address(Some(AddressType::P2wpkh)).unwrap();
            let key = leaf.public_key_for(&native).unwrap();
            let nested =
                Address::from_public_key(&key, AddressType::NestedP2wpkh, NetworkType::TestNet).unwrap();
            assert!(leaf.contains_address(&nested));
            assert!(leaf.watched_addresses().contains(&nested));
        }
    }

    mod pool {
        use super::*;

        #[test]
        fn test_pool_is_filled_on_init() {
            let leaf = standard_leaf();
            // (3 external + 2 internal) indices, two types each
            assert_eq!(leaf.pooled_addresses().len(), 10);
        }

        #[test]
        fn test_activity_promotes_and_refills() {
            let leaf = standard_leaf();
            let pooled = leaf
                .pooled_addresses()
                .into_iter()
                .find(|a| leaf.address_index(a).as_deref() == Some("0/2"))
                .unwrap();

            assert!(!leaf.on_address_activity(&pooled, false).unwrap());
            assert!(leaf.on_address_activity(&pooled, true).unwrap());
            assert!(!leaf.on_address_activity(&pooled, true).unwrap());

            assert_eq!(leaf.external_addresses().len(), 3);
            let next = leaf.new_external_address(None).unwrap();
            assert_eq!(leaf.address_index(&next).unwrap(), "0/3");

            // lookahead of 3 beyond the last used external index
            let external_pool = leaf
                .pooled_addresses()
                .iter()
                .filter(|a| leaf.is_external_address(a))
                .count();
            assert_eq!(external_pool, 3 * 2);
        }

        #[test]
        fn test_top_up_extends_lookahead() {
            let leaf = standard_leaf();
            let added = leaf.top_up_address_pool(5, 2).unwrap();
            assert_eq!(added, 2 * 2);
            assert_eq!(leaf.top_up_address_pool(5, 2).unwrap(), 0);
        }

        #[test]
        fn test_deep_pool_is_capped_and_survives_reload() {
            let settings = LeafSettings {
                external_pool_size: MAX_POOL_DEPTH + 45,
                internal_pool_size: 0,
                ..Default::default()
            };
            let leaf = leaf_with(DerivationPolicy::Standard, 1, settings);
            let types = LeafSettings::default().pool_address_types.len();
            assert_eq!(leaf.pooled_addresses().len(), MAX_POOL_DEPTH as usize * types);
            assert_eq!(leaf.top_up_address_pool(MAX_POOL_DEPTH + 1, 0).unwrap(), 0);

            let restored = Leaf::deserialize(
                &leaf.serialize().unwrap(),
                DerivationPolicy::Standard,
                Nodes::single(root()),
                LeafSettings {
                    internal_pool_size: 0,
                    ..small_settings()
                },
            )
            .unwrap();
            assert_eq!(restored.pooled_addresses().len(), leaf.pooled_addresses().len());
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn test_round_trip_restores_lookups() {
            let leaf = standard_leaf();
            let first = leaf.new_external_address(None).unwrap();
            let nested = leaf
                .create_address_with_path(&"1/2".parse().unwrap(), Some(AddressType::NestedP2wpkh))
                .unwrap();

            let bytes = leaf.serialize().unwrap();
            let restored = Leaf::deserialize(
                &bytes,
                DerivationPolicy::Standard,
                Nodes::single(root()),
                small_settings(),
            )
            .unwrap();

            assert_eq!(restored.id(), leaf.id());
            assert_eq!(restored.path(), leaf.path());
            assert_eq!(restored.used_addresses(), leaf.used_addresses());
            assert_eq!(restored.get_path_for_address(&nested).unwrap().to_string(), "1/2");
            assert_eq!(restored.get_path_for_address(&first).unwrap().to_string(), "0/0");
            assert_eq!(restored.pooled_addresses().len(), leaf.pooled_addresses().len());
            assert_eq!(restored.serialize().unwrap(), bytes);
        }

        #[test]
        fn test_rejects_bad_data() {
            let bytes = standard_leaf().serialize().unwrap();
            let settings = small_settings();
            assert!(Leaf::deserialize(
                &bytes[..bytes.len() - 1],
                DerivationPolicy::Standard,
                Nodes::default(),
                settings.clone()
            )
            .is_err());

            let mut bad_version = bytes.clone();
            bad_version[1] = 9;
            assert!(Leaf::deserialize(&bad_version, DerivationPolicy::Standard, Nodes::default(), settings)
                .is_err());
        }
    }

    mod auth {
        use super::*;

        fn auth_leaf() -> Leaf {
            leaf_with(
                DerivationPolicy::Auth { user_id: None },
                CoinType::BlockSettleAuth.as_u32(),
                small_settings(),
            )
        }

        #[test]
        fn test_addresses_wait_for_user_id() {
            let leaf = auth_leaf();
            assert!(matches!(leaf.new_external_address(None), Err(Error::UserIdRequired)));
            assert!(matches!(leaf.new_internal_address(None), Err(Error::NoInternalBranch)));
            assert_eq!(leaf.pending_count(), 1);
            assert!(leaf.pooled_addresses().is_empty());

            leaf.set_user_id(Some("alice@example.com")).unwrap();
            assert_eq!(leaf.pending_count(), 0);
            assert_eq!(leaf.used_addresses().len(), 1);
            assert_eq!(leaf.pooled_addresses().len(), AUTH_POOL_SIZE as usize);
        }

        #[test]
        fn test_addresses_use_chained_keys() {
            let leaf = auth_leaf();
            leaf.set_user_id(Some("alice@example.com")).unwrap();
            let address = leaf.new_external_address(None).unwrap();

            let chain_code = hash::hash256(b"alice@example.com");
            let path: Path = "m/44'/1098216552'/0'/0/0".parse().unwrap();
            let node = root().derive(&path, false).unwrap().chained(chain_code);
            let expected = Address::from_public_key(
                &node.pub_chained_key().unwrap(),
                AddressType::P2wpkh,
                NetworkType::TestNet,
            )
            .unwrap();
            assert_eq!(address, expected);

            let resolver = leaf.signing_resolver(b"").unwrap();
            let key = resolver
                .resolve_private_key(&leaf.public_key_for(&address).unwrap())
                .unwrap();
            assert_eq!(
                public_key_from_private(&key).unwrap(),
                node.pub_chained_key().unwrap()
            );
        }

        #[test]
        fn test_clearing_user_id_resets() {
            let leaf = auth_leaf();
            leaf.set_user_id(Some("bob")).unwrap();
            leaf.new_external_address(None).unwrap();
            leaf.set_user_id(None).unwrap();
            assert!(leaf.used_addresses().is_empty());
            assert!(leaf.pooled_addresses().is_empty());
            assert!(matches!(
                standard_leaf().set_user_id(Some("bob")),
                Err(Error::WrongLeafKind(_))
            ));
        }
    }

    mod settlement {
        use super::*;

        fn settlement_leaf() -> Leaf {
            leaf_with(
                DerivationPolicy::Settlement,
                CoinType::BlockSettleSettlement.as_u32(),
                small_settings(),
            )
        }

        fn counterparty() -> [u8; 33] {
            public_key_from_private(&[0x11; 32]).unwrap()
        }

        #[test]
        fn test_settlement_address() {
            let leaf = settlement_leaf();
            let own = *leaf.node().unwrap().public_key();
            let id = [0xAB; 32];

            let address = leaf.add_settlement_id(&id, &own, &counterparty()).unwrap();
            assert_eq!(address.address_type(), AddressType::P2wsh);
            assert_eq!(leaf.add_settlement_id(&id, &own, &counterparty()).unwrap(), address);
            assert_eq!(leaf.index_for_settlement_id(&id), Some(0));
            assert_eq!(leaf.settlement_address(&id), Some(address.clone()));
            assert!(leaf.contains_address(&address));

            let script = leaf
                .resolver()
                .unwrap()
                .resolve_public_key_or_script(address.unprefixed())
                .unwrap();
            assert_eq!(script.len(), 71);
            assert_eq!(script[0], 0x51);
        }

        #[test]
        fn test_settlement_signing_key() {
            let leaf = settlement_leaf();
            let own = *leaf.node().unwrap().public_key();
            let id = [0x01; 32];
            leaf.add_settlement_id(&id, &counterparty(), &own).unwrap();

            let own_chained = chained_public_key(&own, &id).unwrap();
            let resolver = leaf.signing_resolver(b"").unwrap();
            let key = resolver.resolve_private_key(&own_chained).unwrap();
            assert_eq!(public_key_from_private(&key).unwrap(), own_chained);
            assert!(matches!(
                resolver.resolve_private_key(&counterparty()),
                Err(Error::NoPrivateKeyAccess)
            ));
        }

        #[test]
        fn test_settlement_preconditions() {
            let leaf = settlement_leaf();
            let own = *leaf.node().unwrap().public_key();
            assert!(matches!(
                leaf.add_settlement_id(&[1; 16], &own, &counterparty()),
                Err(Error::InvalidSettlementId(16))
            ));
            assert!(matches!(
                leaf.add_settlement_id(&[1; 32], &counterparty(), &counterparty()),
                Err(Error::AccountOrPathMismatch(_))
            ));
            assert!(matches!(
                leaf.new_external_address(None),
                Err(Error::WrongLeafKind("settlement"))
            ));
        }

        #[test]
        fn test_settlements_survive_serialization() {
            let leaf = settlement_leaf();
            let own = *leaf.node().unwrap().public_key();
            let address = leaf.add_settlement_id(&[7; 32], &own, &counterparty()).unwrap();

            let restored = Leaf::deserialize(
                &leaf.serialize().unwrap(),
                DerivationPolicy::Settlement,
                Nodes::single(root()),
                small_settings(),
            )
            .unwrap();
            assert_eq!(restored.settlement_address(&[7; 32]), Some(address));
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn test_uninitialized_and_shutdown() {
            let leaf = Leaf::new(DerivationPolicy::Standard, small_settings(), NetworkType::TestNet);
            assert_eq!(leaf.state(), LeafState::Uninitialized);
            assert!(matches!(leaf.new_external_address(None), Err(Error::NotInitialized)));

            let leaf = standard_leaf();
            assert_eq!(leaf.state(), LeafState::Active);
            leaf.shutdown();
            assert_eq!(leaf.state(), LeafState::Shutdown);
            assert!(matches!(leaf.new_external_address(None), Err(Error::LeafShutdown)));
            assert!(matches!(leaf.serialize(), Err(Error::LeafShutdown)));
            assert!(matches!(leaf.resolver(), Err(Error::LeafShutdown)));
        }

        #[test]
        fn test_watching_only_resolver() {
            let root = root();
            let mut path = Path::group(1);
            path.append(0, true);
            let node = root.derive(&path, false).unwrap();
            let leaf = Leaf::new(DerivationPolicy::Standard, small_settings(), NetworkType::TestNet);
            leaf.init(&node, path, Nodes::single(root.neutered())).unwrap();

            assert_eq!(leaf.state(), LeafState::WatchingOnly);
            let address = leaf.new_external_address(None).unwrap();
            let key = leaf.public_key_for(&address).unwrap();
            let resolver = leaf.resolver().unwrap();
            assert_eq!(
                resolver.resolve_public_key_or_script(&hash::hash160(&key)).unwrap(),
                key.to_vec()
            );
            assert!(matches!(
                resolver.resolve_private_key(&key),
                Err(Error::NoPrivateKeyAccess)
            ));
            assert!(matches!(leaf.signing_resolver(b""), Err(Error::WatchingOnly)));
        }

        #[test]
        fn test_copy_to_replays_addresses() {
            let source = standard_leaf();
            source.new_external_address(None).unwrap();
            source
                .create_address_with_path(&"1/3".parse().unwrap(), Some(AddressType::P2pkh))
                .unwrap();

            let target = Leaf::new(DerivationPolicy::Standard, small_settings(), NetworkType::TestNet);
            let root = root();
            target
                .init(&root.derive(&source.path(), false).unwrap(), source.path(), Nodes::default())
                .unwrap();
            source.copy_to(&target).unwrap();
            assert_eq!(target.used_addresses(), source.used_addresses());
            assert_eq!(target.state(), LeafState::WatchingOnly);
        }
    }
}
