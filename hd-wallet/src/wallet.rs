//! HD wallets: root set, groups, comments and their storage.

use crate::{
    changeset::{ChangeSet, Revisions},
    error::LoadDefect,
    group::Group,
    leaf::{Leaf, LeafSettings},
    scan::AddressWatcher,
    Error,
};
use bth_crypto_encryption::{KdfRomix, KdfSettings};
use bth_crypto_hd::{
    merge_keys, Address, CoinType, EncryptionType, NetworkType, Node, Nodes, Seed,
};
use bth_util_binary::{unwrap_var_bytes, var_bytes, BinaryReader, BinaryWriter, FormatError};
use bth_util_kvstore::{KeyValueStore, LmdbStore, LmdbStoreSettings, WriteBatch};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const WALLETTYPE_KEY: u32 = 0x0000_0001;
const MAIN_ACCOUNT_KEY: u32 = 0x0000_0002;
const ROOTASSET_KEY: u32 = 0x0000_0007;
const WALLETNAME_KEY: u32 = 0x0000_0020;
const WALLETDESCRIPTION_KEY: u32 = 0x0000_0021;
const MASTERID_KEY: u32 = 0x0000_00A0;
const GROUP_PREFIX: u8 = 0x8A;
const COMMENT_PREFIX: u8 = 0xB0;

const FILE_PREFIX: &str = "bip44";
const FILE_PREFIX_WATCHING_ONLY: &str = "bip44wo";

/// One unlocking secret for the root.
#[derive(Clone)]
pub struct PasswordData {
    pub password: Zeroizing<Vec<u8>>,
    pub encryption_type: EncryptionType,
    /// Device key id for [`EncryptionType::Auth`], empty otherwise.
    pub encryption_key: Vec<u8>,
}

impl PasswordData {
    /// A plain password.
    pub fn password(password: &[u8]) -> Self {
        Self {
            password: Zeroizing::new(password.to_vec()),
            encryption_type: EncryptionType::Password,
            encryption_key: Vec::new(),
        }
    }

    /// A secret released by a device identified by `key_id`.
    pub fn device(secret: &[u8], key_id: &[u8]) -> Self {
        Self {
            password: Zeroizing::new(secret.to_vec()),
            encryption_type: EncryptionType::Auth,
            encryption_key: key_id.to_vec(),
        }
    }
}

impl fmt::Debug for PasswordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordData")
            .field("encryption_type", &self.encryption_type)
            .field("encryption_key", &hex::encode(&self.encryption_key))
            .finish()
    }
}

/// Passphrase unlocking an m-of-n root: the XOR of the given secrets.
pub fn combined_password(passwords: &[PasswordData]) -> Zeroizing<Vec<u8>> {
    passwords
        .iter()
        .fold(Zeroizing::new(Vec::new()), |acc, p| merge_keys(&acc, &p.password))
}

/// Settings applied to new wallets and their leaves.
#[derive(Clone, Debug, Default)]
pub struct WalletSettings {
    pub kdf: KdfSettings,
    pub leaf: LeafSettings,
    pub store: LmdbStoreSettings,
}

struct WalletInner {
    name: String,
    description: String,
    root_nodes: Nodes,
    groups: BTreeMap<u32, Arc<Group>>,
    /// Prefixed address to comment.
    comments: BTreeMap<Vec<u8>, String>,
    removed_comments: Vec<Vec<u8>>,
    store: Option<Arc<dyn KeyValueStore>>,
    path: Option<PathBuf>,
    revisions: Revisions,
    saved: Revisions,
    saved_root_count: usize,
    defects: Vec<LoadDefect>,
}

/// A BIP44 wallet.
///
/// Structure lives in memory behind one mutex; storage writes happen after
/// the lock is released, one transaction per unit.
pub struct Wallet {
    wallet_id: String,
    network: NetworkType,
    settings: WalletSettings,
    inner: Mutex<WalletInner>,
}

impl Wallet {
    /// New wallet from `seed`, protected by each of `passwords` (1-of-n).
    /// With no passwords the root is stored unencrypted.
    pub fn create(
        name: &str,
        description: &str,
        seed: &Seed,
        passwords: &[PasswordData],
        settings: WalletSettings,
    ) -> Result<Self, Error> {
        let root = Node::from_seed(seed)?;
        let key_rank = (1, passwords.len().max(1) as u32);
        let root_nodes = build_root_nodes(&root, passwords, key_rank, &settings.kdf)?;
        let wallet = Self::assemble(
            root.id(),
            seed.network(),
            settings,
            name.to_owned(),
            description.to_owned(),
            root_nodes,
        );
        info!(wallet_id = %wallet.wallet_id, network = %wallet.network, "Created wallet");
        Ok(wallet)
    }

    fn assemble(
        wallet_id: String,
        network: NetworkType,
        settings: WalletSettings,
        name: String,
        description: String,
        root_nodes: Nodes,
    ) -> Self {
        Self {
            wallet_id,
            network,
            settings,
            inner: Mutex::new(WalletInner {
                name,
                description,
                root_nodes,
                groups: BTreeMap::new(),
                comments: BTreeMap::new(),
                removed_comments: Vec::new(),
                store: None,
                path: None,
                revisions: Revisions {
                    header: 1,
                    root_nodes: 1,
                    ..Default::default()
                },
                saved: Revisions::default(),
                saved_root_count: 0,
                defects: Vec::new(),
            }),
        }
    }

    /// Open the wallet file at `path`.
    pub fn open(path: &Path, settings: WalletSettings) -> Result<Self, Error> {
        let store = LmdbStore::open(path, &settings.store)?;
        let wallet = Self::load(Arc::new(store), settings)?;
        wallet.inner.lock().path = Some(path.to_path_buf());
        Ok(wallet)
    }

    /// Read a wallet from `store`.
    ///
    /// Groups and leaves that fail to parse are skipped and listed in
    /// [`Wallet::load_defects`]; a damaged header or root set fails the load.
    pub fn load(store: Arc<dyn KeyValueStore>, settings: WalletSettings) -> Result<Self, Error> {
        let network = {
            let value = read_value(store.as_ref(), WALLETTYPE_KEY)?
                .ok_or_else(|| missing("wallet type"))?;
            NetworkType::try_from(BinaryReader::new(&value).get_u8()?)?
        };
        let wallet_id = read_string(store.as_ref(), MASTERID_KEY)?.ok_or_else(|| missing("wallet id"))?;
        let name = read_string(store.as_ref(), WALLETNAME_KEY)?.unwrap_or_default();
        let description = read_string(store.as_ref(), WALLETDESCRIPTION_KEY)?.unwrap_or_default();
        let key_rank = match read_value(store.as_ref(), MAIN_ACCOUNT_KEY)? {
            Some(value) => {
                let mut reader = BinaryReader::new(&value);
                (reader.get_u32()?, reader.get_u32()?)
            }
            None => (1, 1),
        };

        let mut nodes = Vec::new();
        for (_, value) in store.scan_prefix(&ROOTASSET_KEY.to_le_bytes())? {
            nodes.push(Node::deserialize(unwrap_var_bytes(&value)?)?);
        }
        if nodes.is_empty() {
            return Err(missing("root node"));
        }
        let root_nodes = Nodes::new(nodes, key_rank, wallet_id.clone());
        let saved_root_count = root_nodes.len();

        let wallet = Self::assemble(wallet_id, network, settings, name, description, root_nodes.clone());
        {
            let mut inner = wallet.inner.lock();
            inner.store = Some(store.clone());
            inner.saved_root_count = saved_root_count;

            for (key, value) in store.scan_prefix(&[GROUP_PREFIX])? {
                let Some(coin) = key.get(1..5).and_then(|b| b.try_into().ok()).map(u32::from_be_bytes)
                else {
                    continue;
                };
                match Group::deserialize(
                    coin,
                    &value,
                    root_nodes.clone(),
                    network,
                    wallet.settings.leaf.clone(),
                ) {
                    Ok((group, defects)) => {
                        inner.defects.extend(defects);
                        inner.groups.insert(coin, Arc::new(group));
                    }
                    Err(err) => {
                        warn!(wallet_id = %wallet.wallet_id, coin, %err, "Skipping group that failed to load");
                        inner.defects.push(LoadDefect {
                            location: format!("group {coin:#x}"),
                            reason: err.to_string(),
                        });
                    }
                }
            }

            for (key, value) in store.scan_prefix(&[COMMENT_PREFIX])? {
                let comment = unwrap_var_bytes(&value)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok());
                match comment {
                    Some(comment) => {
                        inner.comments.insert(key[1..].to_vec(), comment);
                    }
                    None => inner.defects.push(LoadDefect {
                        location: format!("comment {}", hex::encode(&key[1..])),
                        reason: "malformed comment".into(),
                    }),
                }
            }

            inner.saved = wallet.current_revisions(&inner);
        }
        info!(
            wallet_id = %wallet.wallet_id,
            groups = wallet.groups().len(),
            defects = wallet.load_defects().len(),
            "Loaded wallet"
        );
        Ok(wallet)
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn network(&self) -> NetworkType {
        self.network
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn description(&self) -> String {
        self.inner.lock().description.clone()
    }

    /// `(m, n)` of the root set.
    pub fn key_rank(&self) -> (u32, u32) {
        self.inner.lock().root_nodes.key_rank()
    }

    pub fn encryption_types(&self) -> Vec<EncryptionType> {
        self.inner.lock().root_nodes.encryption_types()
    }

    pub fn encryption_keys(&self) -> Vec<Vec<u8>> {
        self.inner.lock().root_nodes.encryption_keys()
    }

    /// True when no root node carries a private key.
    pub fn is_watching_only(&self) -> bool {
        let inner = self.inner.lock();
        let watching = !inner.root_nodes.iter().any(|n| n.has_private_key());
        watching
    }

    /// Has both an auth group and the XBT group of its network.
    pub fn is_primary(&self) -> bool {
        let inner = self.inner.lock();
        inner.groups.contains_key(&CoinType::BlockSettleAuth.as_u32())
            && inner
                .groups
                .contains_key(&CoinType::bitcoin(self.network).as_u32())
    }

    /// `bip44_<id>_wallet.lmdb`, or `bip44wo_...` when watching-only.
    pub fn file_name(&self) -> String {
        let prefix = if self.is_watching_only() {
            FILE_PREFIX_WATCHING_ONLY
        } else {
            FILE_PREFIX
        };
        format!("{prefix}_{}_wallet.lmdb", self.wallet_id)
    }

    /// File the wallet was opened from or persisted to.
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().path.clone()
    }

    /// Groups and leaves skipped while loading.
    pub fn load_defects(&self) -> Vec<LoadDefect> {
        self.inner.lock().defects.clone()
    }

    /// Decrypt the root for structural operations.
    ///
    /// Runs the KDF without holding the wallet lock.
    pub fn unlock(&self, passphrase: &[u8]) -> Result<Node, Error> {
        if self.is_watching_only() {
            return Err(Error::WatchingOnly);
        }
        let root_nodes = self.inner.lock().root_nodes.clone();
        Ok(root_nodes.decrypt(passphrase)?)
    }

    /// Group for `coin`, created if missing.
    pub fn create_group(&self, coin: u32) -> Arc<Group> {
        let mut inner = self.inner.lock();
        let root_nodes = inner.root_nodes.clone();
        inner
            .groups
            .entry(coin)
            .or_insert_with(|| {
                debug!(wallet_id = %self.wallet_id, coin, "Created group");
                Arc::new(Group::new(coin, root_nodes, self.network, self.settings.leaf.clone()))
            })
            .clone()
    }

    pub fn get_group(&self, coin: u32) -> Option<Arc<Group>> {
        self.inner.lock().groups.get(&coin).cloned()
    }

    /// Groups in coin-type order.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        self.inner.lock().groups.values().cloned().collect()
    }

    /// Every leaf of every group.
    pub fn leaves(&self) -> Vec<Arc<Leaf>> {
        self.groups().iter().flat_map(|g| g.leaves()).collect()
    }

    /// The XBT group of the wallet's network with its first leaf.
    pub fn create_structure(&self, passphrase: &[u8]) -> Result<Arc<Leaf>, Error> {
        let root = self.unlock(passphrase)?;
        let group = self.create_group(CoinType::bitcoin(self.network).as_u32());
        group.create_leaf(0, Some(&root))
    }

    /// Bind a user id to the auth group, if there is one.
    pub fn set_user_id(&self, user_id: Option<&str>) -> Result<(), Error> {
        match self.get_group(CoinType::BlockSettleAuth.as_u32()) {
            Some(group) => group.set_user_id(user_id),
            None => Ok(()),
        }
    }

    /// Leaf holding `address`.
    pub fn find_leaf_for_address(&self, address: &Address) -> Option<Arc<Leaf>> {
        self.leaves().into_iter().find(|l| l.contains_address(address))
    }

    /// Scanner callback, forwarded to the owning leaf.
    pub fn on_address_activity(&self, address: &Address, has_history: bool) -> Result<bool, Error> {
        match self.find_leaf_for_address(address) {
            Some(leaf) => leaf.on_address_activity(address, has_history),
            None => Ok(false),
        }
    }

    /// Push every watched address of every leaf to `watcher`.
    pub fn register_addresses(&self, watcher: &dyn AddressWatcher) -> Result<usize, Error> {
        let addresses: Vec<Address> = self
            .leaves()
            .iter()
            .flat_map(|l| l.watched_addresses())
            .collect();
        watcher.register_addresses_for_watching(&self.wallet_id, &addresses)?;
        debug!(wallet_id = %self.wallet_id, count = addresses.len(), "Registered addresses");
        Ok(addresses.len())
    }

    /// Attach a comment to an address of this wallet; empty text removes it.
    pub fn set_address_comment(&self, address: &Address, comment: &str) -> Result<(), Error> {
        if self.find_leaf_for_address(address).is_none() {
            return Err(Error::AccountOrPathMismatch(address.to_string()));
        }
        let key = address.prefixed();
        let mut inner = self.inner.lock();
        if comment.is_empty() {
            if inner.comments.remove(&key).is_some() {
                inner.removed_comments.push(key);
            }
        } else {
            inner.removed_comments.retain(|k| *k != key);
            inner.comments.insert(key, comment.to_owned());
        }
        inner.revisions.comments += 1;
        Ok(())
    }

    pub fn address_comment(&self, address: &Address) -> Option<String> {
        self.inner.lock().comments.get(&address.prefixed()).cloned()
    }

    /// Re-encrypt the root.
    ///
    /// One root node is built for every m-combination of `new_passwords`
    /// (their secrets XOR-merged when m > 1). All fallible work happens
    /// before the new set replaces the old one in the wallet and every leaf.
    /// An empty `new_passwords` stores the root unencrypted.
    pub fn change_password(
        &self,
        new_passwords: &[PasswordData],
        key_rank: (u32, u32),
        old_passphrase: &[u8],
    ) -> Result<(), Error> {
        if self.is_watching_only() {
            return Err(Error::WatchingOnly);
        }
        let root_nodes = self.inner.lock().root_nodes.clone();
        let root = root_nodes.decrypt(old_passphrase).map_err(|err| match err {
            bth_crypto_hd::Error::WrongPassphrase => Error::WrongOldPassword,
            other => other.into(),
        })?;
        if root.id() != self.wallet_id {
            return Err(Error::WrongOldPassword);
        }
        let new_nodes = build_root_nodes(&root, new_passwords, key_rank, &self.settings.kdf)?;

        {
            let mut inner = self.inner.lock();
            for group in inner.groups.values() {
                group.update_root_nodes(new_nodes.clone());
            }
            inner.root_nodes = new_nodes;
            inner.revisions.root_nodes += 1;
            inner.revisions.header += 1;
        }
        info!(
            wallet_id = %self.wallet_id,
            m = key_rank.0,
            n = key_rank.1,
            "Changed wallet password"
        );
        self.save()
    }

    /// Independent public-only copy with the same id and addresses.
    pub fn create_watching_only(&self, passphrase: &[u8]) -> Result<Wallet, Error> {
        let root = self.unlock(passphrase)?;
        let wo_nodes = Nodes::new(vec![root.neutered()], (1, 1), self.wallet_id.clone());

        let (name, description, groups, comments) = {
            let inner = self.inner.lock();
            (
                inner.name.clone(),
                inner.description.clone(),
                inner.groups.clone(),
                inner.comments.clone(),
            )
        };
        let wallet = Self::assemble(
            self.wallet_id.clone(),
            self.network,
            self.settings.clone(),
            name,
            description,
            wo_nodes.clone(),
        );
        {
            let mut inner = wallet.inner.lock();
            for (coin, group) in groups {
                let copy = group.create_watching_only(&root, wo_nodes.clone())?;
                inner.groups.insert(coin, Arc::new(copy));
            }
            inner.comments = comments;
            inner.revisions.comments = 1;
        }
        info!(wallet_id = %self.wallet_id, "Created watching-only wallet");
        Ok(wallet)
    }

    /// Write the wallet to `dir/<file_name>` and keep saving there.
    pub fn persist_to(&self, dir: &Path) -> Result<PathBuf, Error> {
        let path = dir.join(self.file_name());
        let store = LmdbStore::open(&path, &self.settings.store)?;
        self.persist_to_store(Arc::new(store))?;
        self.inner.lock().path = Some(path.clone());
        info!(wallet_id = %self.wallet_id, path = %path.display(), "Persisted wallet");
        Ok(path)
    }

    /// Write everything to `store` and keep saving there.
    pub fn persist_to_store(&self, store: Arc<dyn KeyValueStore>) -> Result<(), Error> {
        let changes = {
            let mut inner = self.inner.lock();
            inner.store = Some(store);
            inner.saved = Revisions::default();
            inner.saved_root_count = 0;
            ChangeSet::everything(inner.groups.keys().copied())
        };
        self.save_changes(&changes)
    }

    /// Units changed since the last save.
    pub fn pending_changes(&self) -> ChangeSet {
        let inner = self.inner.lock();
        self.current_revisions(&inner).diff(&inner.saved)
    }

    /// Write every pending change.
    pub fn save(&self) -> Result<(), Error> {
        self.save_changes(&self.pending_changes())
    }

    /// Write the units listed in `changes`, one transaction per unit.
    ///
    /// Units are serialized under the wallet lock and written after it is
    /// released. Without an attached store this does nothing.
    pub fn save_changes(&self, changes: &ChangeSet) -> Result<(), Error> {
        if changes.is_empty() {
            return Ok(());
        }
        let (store, batches, snapshot, root_count) = {
            let inner = self.inner.lock();
            let Some(store) = inner.store.clone() else {
                debug!(wallet_id = %self.wallet_id, "No store attached, skipping save");
                return Ok(());
            };
            let snapshot = self.current_revisions(&inner);
            let mut batches = Vec::new();

            if changes.header {
                let mut batch = WriteBatch::new();
                batch
                    .put(key(WALLETTYPE_KEY), var_bytes(&[self.network as u8]))
                    .put(key(MASTERID_KEY), var_bytes(self.wallet_id.as_bytes()))
                    .put(key(WALLETNAME_KEY), var_bytes(inner.name.as_bytes()))
                    .put(key(WALLETDESCRIPTION_KEY), var_bytes(inner.description.as_bytes()));
                let (m, n) = inner.root_nodes.key_rank();
                let mut rank = BinaryWriter::with_capacity(8);
                rank.put_u32(m).put_u32(n);
                batch.put(key(MAIN_ACCOUNT_KEY), var_bytes(rank.as_slice()));
                batches.push(batch);
            }
            if changes.root_nodes {
                let mut batch = WriteBatch::new();
                for (index, node) in inner.root_nodes.iter().enumerate() {
                    batch.put(root_key(index), var_bytes(&node.serialize()));
                }
                for index in inner.root_nodes.len()..inner.saved_root_count {
                    batch.delete(root_key(index));
                }
                batches.push(batch);
            }
            for coin in &changes.groups {
                if let Some(group) = inner.groups.get(coin) {
                    let mut batch = WriteBatch::new();
                    batch.put(group_key(*coin), group.serialize()?);
                    batches.push(batch);
                }
            }
            if changes.comments {
                let mut batch = WriteBatch::new();
                for (address, comment) in &inner.comments {
                    batch.put(comment_key(address), var_bytes(comment.as_bytes()));
                }
                for address in &inner.removed_comments {
                    batch.delete(comment_key(address));
                }
                if !batch.is_empty() {
                    batches.push(batch);
                }
            }
            (store, batches, snapshot, inner.root_nodes.len())
        };

        for batch in &batches {
            store.write(batch)?;
        }

        let mut inner = self.inner.lock();
        inner.saved.mark_saved(&snapshot, changes);
        if changes.root_nodes {
            inner.saved_root_count = root_count;
        }
        if changes.comments {
            inner.removed_comments.clear();
        }
        debug!(
            wallet_id = %self.wallet_id,
            transactions = batches.len(),
            groups = changes.groups.len(),
            "Saved wallet"
        );
        Ok(())
    }

    fn current_revisions(&self, inner: &WalletInner) -> Revisions {
        let mut revisions = inner.revisions.clone();
        revisions.groups = inner
            .groups
            .iter()
            .map(|(coin, group)| (*coin, group.revision()))
            .collect();
        revisions
    }
}

/// Encrypted root set for `passwords` under `key_rank`.
fn build_root_nodes(
    root: &Node,
    passwords: &[PasswordData],
    key_rank: (u32, u32),
    kdf_settings: &KdfSettings,
) -> Result<Nodes, Error> {
    if passwords.is_empty() {
        return Ok(Nodes::single(root.clone()));
    }
    let (m, n) = key_rank;
    if m == 0 || m > n || n as usize != passwords.len() {
        return Err(Error::InvalidKeyRank(m, n));
    }

    let kdf = KdfRomix::initialize(kdf_settings);
    let mut nodes = Vec::new();
    for combination in combinations(n as usize, m as usize) {
        let selected: Vec<PasswordData> = combination.iter().map(|i| passwords[*i].clone()).collect();
        let passphrase = combined_password(&selected);
        let types = selected.iter().map(|p| p.encryption_type).collect();
        let keys = selected
            .iter()
            .filter(|p| !p.encryption_key.is_empty())
            .map(|p| p.encryption_key.clone())
            .collect();
        nodes.push(root.encrypt(&passphrase, types, keys, kdf.clone())?);
    }
    Ok(Nodes::new(nodes, key_rank, root.id()))
}

/// All `k`-element index combinations of `0..n`, in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        out.push(current.clone());
        let Some(pos) = (0..k).rev().find(|&i| current[i] < n - k + i) else {
            return out;
        };
        current[pos] += 1;
        for i in pos + 1..k {
            current[i] = current[i - 1] + 1;
        }
    }
}

fn key(id: u32) -> Vec<u8> {
    id.to_le_bytes().to_vec()
}

fn root_key(index: usize) -> Vec<u8> {
    let mut out = key(ROOTASSET_KEY);
    out.extend_from_slice(&(index as u32).to_be_bytes());
    out
}

fn group_key(coin: u32) -> Vec<u8> {
    let mut out = vec![GROUP_PREFIX];
    out.extend_from_slice(&coin.to_be_bytes());
    out
}

fn comment_key(prefixed_address: &[u8]) -> Vec<u8> {
    let mut out = vec![COMMENT_PREFIX];
    out.extend_from_slice(prefixed_address);
    out
}

fn missing(what: &str) -> Error {
    FormatError::Invalid(format!("missing {what}")).into()
}

fn read_value(store: &dyn KeyValueStore, id: u32) -> Result<Option<Vec<u8>>, Error> {
    match store.get(&key(id))? {
        Some(value) => Ok(Some(unwrap_var_bytes(&value)?.to_vec())),
        None => Ok(None),
    }
}

fn read_string(store: &dyn KeyValueStore, id: u32) -> Result<Option<String>, Error> {
    match read_value(store, id)? {
        Some(bytes) => Ok(Some(
            String::from_utf8(bytes).map_err(|e| FormatError::Invalid(e.to_string()))?,
        )),
        None => Ok(None),
    }
}
