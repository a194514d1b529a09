// Copyright (c) 2024 The Botho Foundation

//! BIP32 nodes and their encrypted-at-rest form.

use crate::{
    keys::{self, derive_private_child, derive_public_child, master_from_entropy},
    Error, NetworkType, Path, HARDENED, PURPOSE,
};
use bth_crypto_encryption::{
    hash, AssetEncryptionKey, AssetPrivateKey, Cipher, DecryptedEncryptionKey, EncryptedAsset,
    EncryptedSeed, KdfRomix,
};
use bth_util_binary::{BinaryReader, BinaryWriter, FormatError};
use core::fmt;
use rand_core::{OsRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

const CHAINCODE_TAG: u8 = 0x80;
const PUBKEY_TAG: u8 = 0x81;
const PRIVKEY_TAG: u8 = 0x82;
const MASTER_KEY_TAG: u8 = 0x83;
const ENCRYPTION_TAG: u8 = 0x86;
const CHAIN_TAG: u8 = 0x87;
const SEED_TAG: u8 = 0xB2;
const KDF_TAG: u8 = 0xC1;

const XPRV_LEN: usize = 78;

/// How the root of a node set is unlocked.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum EncryptionType {
    Unencrypted = 0,
    Password = 1,
    /// A key held by an external authenticator device.
    Auth = 2,
}

impl TryFrom<u8> for EncryptionType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unencrypted),
            1 => Ok(Self::Password),
            2 => Ok(Self::Auth),
            other => Err(FormatError::Invalid(format!("unknown encryption type {other}")).into()),
        }
    }
}

/// Node id: base58 of the reversed `prefix || hash160(pubkey)[..5]`.
pub fn compute_id(public_key: &[u8], network: NetworkType) -> String {
    let hashed = hash::hash160(public_key);
    let mut id = Vec::with_capacity(6);
    id.push(network.pubkey_hash_prefix());
    id.extend_from_slice(&hashed[..5]);
    id.reverse();
    bs58::encode(id).into_string()
}

/// Root secret a wallet is created from. Never persisted in the clear.
#[derive(Clone)]
pub struct Seed {
    network: NetworkType,
    entropy: Option<Zeroizing<Vec<u8>>>,
    private_key: Option<Zeroizing<[u8; 32]>>,
    chain_code: Option<[u8; 32]>,
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed")
            .field("network", &self.network)
            .field("has_entropy", &self.entropy.is_some())
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

impl Seed {
    /// Seed from raw entropy (16 to 64 bytes).
    pub fn from_entropy(entropy: Vec<u8>, network: NetworkType) -> Self {
        Self {
            network,
            entropy: Some(Zeroizing::new(entropy)),
            private_key: None,
            chain_code: None,
        }
    }

    /// 32 bytes of fresh OS entropy.
    pub fn random(network: NetworkType) -> Self {
        let mut entropy = Zeroizing::new(vec![0u8; 32]);
        OsRng.fill_bytes(&mut entropy);
        Self {
            network,
            entropy: Some(entropy),
            private_key: None,
            chain_code: None,
        }
    }

    /// Seed from an explicit private key; a missing chain code is all zero.
    pub fn from_private_key(
        private_key: [u8; 32],
        chain_code: Option<[u8; 32]>,
        network: NetworkType,
    ) -> Self {
        Self {
            network,
            entropy: None,
            private_key: Some(Zeroizing::new(private_key)),
            chain_code,
        }
    }

    /// Import a base58check `xprv`/`tprv` string.
    pub fn from_extended_private_key(encoded: &str) -> Result<Self, Error> {
        let raw = Zeroizing::new(
            bs58::decode(encoded.trim())
                .with_check(None)
                .into_vec()
                .map_err(|e| Error::InvalidSeed(e.to_string()))?,
        );
        if raw.len() != XPRV_LEN {
            return Err(Error::InvalidSeed(format!(
                "extended key must be {XPRV_LEN} bytes, got {}",
                raw.len()
            )));
        }
        let network = if raw[..4] == NetworkType::MainNet.xprv_version() {
            NetworkType::MainNet
        } else if raw[..4] == NetworkType::TestNet.xprv_version() {
            NetworkType::TestNet
        } else {
            return Err(Error::InvalidSeed("not an extended private key".into()));
        };
        if raw[45] != 0 {
            return Err(Error::InvalidSeed("missing private key marker".into()));
        }

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&raw[13..45]);
        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(&raw[46..78]);
        let seed = Self::from_private_key(private_key, Some(chain_code), network);
        keys::public_key_from_private(&private_key)?;
        Ok(seed)
    }

    pub fn network(&self) -> NetworkType {
        self.network
    }

    pub fn entropy(&self) -> Option<&[u8]> {
        self.entropy.as_deref().map(|e| e.as_slice())
    }
}

#[derive(Clone, Default)]
enum PrivateMaterial {
    #[default]
    None,
    Plain(Zeroizing<[u8; 32]>),
    Encrypted(AssetPrivateKey),
}

#[derive(Clone, Default)]
enum SeedMaterial {
    #[default]
    None,
    Plain(Zeroizing<Vec<u8>>),
    Encrypted(EncryptedSeed),
}

#[derive(Clone)]
struct NodeEncryption {
    kdf: KdfRomix,
    master_key: AssetEncryptionKey,
    types: Vec<EncryptionType>,
    keys: Vec<Vec<u8>>,
}

/// A BIP32 node: public key, chain code and optional private material.
///
/// Nodes are immutable values. Encryption, decryption, chaining and
/// neutering all return a new node, so an unlocked copy and the at-rest copy
/// can live side by side.
#[derive(Clone)]
pub struct Node {
    network: NetworkType,
    public_key: [u8; 33],
    chain_code: [u8; 32],
    private: PrivateMaterial,
    seed: SeedMaterial,
    chain: Option<[u8; 32]>,
    encryption: Option<NodeEncryption>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("network", &self.network)
            .field("has_private_key", &self.has_private_key())
            .field("encrypted", &self.is_encrypted())
            .field("chained", &self.chain.is_some())
            .finish()
    }
}

impl Node {
    /// Root node of `seed`.
    pub fn from_seed(seed: &Seed) -> Result<Self, Error> {
        let (private_key, chain_code, seed_material) = match (&seed.private_key, &seed.entropy) {
            (Some(key), _) => (key.clone(), seed.chain_code.unwrap_or_default(), SeedMaterial::None),
            (None, Some(entropy)) => {
                let (key, chain_code) = master_from_entropy(entropy)?;
                (key, chain_code, SeedMaterial::Plain(entropy.clone()))
            }
            (None, None) => return Err(Error::InvalidSeed("seed is empty".into())),
        };
        let public_key = keys::public_key_from_private(&private_key)?;
        Ok(Self {
            network: seed.network,
            public_key,
            chain_code,
            private: PrivateMaterial::Plain(private_key),
            seed: seed_material,
            chain: None,
            encryption: None,
        })
    }

    /// Public-only node.
    pub fn from_public(
        public_key: [u8; 33],
        chain_code: [u8; 32],
        network: NetworkType,
    ) -> Result<Self, Error> {
        keys::parse_public(&public_key)?;
        Ok(Self {
            network,
            public_key,
            chain_code,
            private: PrivateMaterial::None,
            seed: SeedMaterial::None,
            chain: None,
            encryption: None,
        })
    }

    pub fn id(&self) -> String {
        compute_id(&self.public_key, self.network)
    }

    pub fn network(&self) -> NetworkType {
        self.network
    }

    /// Compressed public key (before any chaining).
    pub fn public_key(&self) -> &[u8; 33] {
        &self.public_key
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// True if a private key is present, encrypted or not.
    pub fn has_private_key(&self) -> bool {
        !matches!(self.private, PrivateMaterial::None)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// The plain private key, if the node holds one unencrypted.
    pub fn private_key(&self) -> Option<&[u8; 32]> {
        match &self.private {
            PrivateMaterial::Plain(key) => Some(key),
            _ => None,
        }
    }

    /// The plain seed entropy, if kept.
    pub fn seed(&self) -> Option<&[u8]> {
        match &self.seed {
            SeedMaterial::Plain(seed) => Some(seed.as_slice()),
            _ => None,
        }
    }

    /// Encryption methods protecting this node.
    pub fn encryption_types(&self) -> &[EncryptionType] {
        self.encryption
            .as_ref()
            .map(|e| e.types.as_slice())
            .unwrap_or(&[EncryptionType::Unencrypted])
    }

    /// Device key identifiers for [`EncryptionType::Auth`].
    pub fn encryption_keys(&self) -> &[Vec<u8>] {
        self.encryption
            .as_ref()
            .map(|e| e.keys.as_slice())
            .unwrap_or(&[])
    }

    /// KDF the node was encrypted with.
    pub fn kdf(&self) -> Option<&KdfRomix> {
        self.encryption.as_ref().map(|e| &e.kdf)
    }

    /// Chain code of a chained node.
    pub fn chain(&self) -> Option<&[u8; 32]> {
        self.chain.as_ref()
    }

    /// Copy whose keys are multiplied by the chain multiplier of `chain_code`.
    pub fn chained(&self, chain_code: [u8; 32]) -> Self {
        let mut node = self.clone();
        node.chain = Some(chain_code);
        node
    }

    /// Drop the chain again.
    pub fn unchained(&self) -> Self {
        let mut node = self.clone();
        node.chain = None;
        node
    }

    /// Public key used in scripts: chained if a chain is set.
    pub fn pub_chained_key(&self) -> Result<[u8; 33], Error> {
        match &self.chain {
            Some(chain_code) => keys::chained_public_key(&self.public_key, chain_code),
            None => Ok(self.public_key),
        }
    }

    /// Private counterpart of [`Node::pub_chained_key`].
    pub fn priv_chained_key(&self) -> Result<Zeroizing<[u8; 32]>, Error> {
        let key = self.private_key().ok_or(Error::NoPrivateKey)?;
        match &self.chain {
            Some(chain_code) => keys::chained_private_key(key, chain_code),
            None => Ok(Zeroizing::new(*key)),
        }
    }

    /// Public-only copy (private key and seed removed).
    pub fn neutered(&self) -> Self {
        Self {
            network: self.network,
            public_key: self.public_key,
            chain_code: self.chain_code,
            private: PrivateMaterial::None,
            seed: SeedMaterial::None,
            chain: self.chain,
            encryption: None,
        }
    }

    /// Copy without the seed entropy.
    pub fn without_seed(&self) -> Self {
        let mut node = self.clone();
        node.seed = SeedMaterial::None;
        node
    }

    /// Derive along `path`.
    ///
    /// With `public_only` the child carries no private key; if this node has
    /// one it is still used so that hardened elements can be followed.
    /// Encryption and seed are not inherited; the chain is.
    pub fn derive(&self, path: &Path, public_only: bool) -> Result<Self, Error> {
        let plain = self.private_key();
        if !public_only && plain.is_none() {
            return Err(Error::NoPrivateKey);
        }

        let mut public_key = self.public_key;
        let mut chain_code = self.chain_code;
        let mut private_key = plain.map(|k| Zeroizing::new(*k));

        for child in path.child_numbers() {
            match private_key.take() {
                Some(key) => {
                    let (key, code) = derive_private_child(&key, &chain_code, child)?;
                    chain_code = code;
                    private_key = Some(key);
                }
                None => {
                    if child >= HARDENED {
                        return Err(Error::HardenedRequiresPrivate);
                    }
                    (public_key, chain_code) = derive_public_child(&public_key, &chain_code, child)?;
                }
            }
        }
        if let Some(key) = &private_key {
            public_key = keys::public_key_from_private(key)?;
        }

        let private = match private_key {
            Some(key) if !public_only => PrivateMaterial::Plain(key),
            _ => PrivateMaterial::None,
        };
        Ok(Self {
            network: self.network,
            public_key,
            chain_code,
            private,
            seed: SeedMaterial::None,
            chain: self.chain,
            encryption: None,
        })
    }

    /// Encrypt the private key (and seed) under `passphrase`.
    ///
    /// A random master key protects the private material and is itself
    /// wrapped by the passphrase stretched with `kdf`.
    pub fn encrypt(
        &self,
        passphrase: &[u8],
        types: Vec<EncryptionType>,
        keys: Vec<Vec<u8>>,
        kdf: KdfRomix,
    ) -> Result<Self, Error> {
        if self.is_encrypted() {
            return Err(Error::AlreadyEncrypted);
        }
        let private_key = self.private_key().ok_or(Error::NoPrivateKey)?;
        let kdf_id = kdf.id().to_vec();

        let mut master = DecryptedEncryptionKey::random();
        master.derive_key(&kdf);
        let master_id = master.id(&kdf_id)?;

        let mut pass = DecryptedEncryptionKey::new(Zeroizing::new(passphrase.to_vec()));
        pass.derive_key(&kdf);
        let pass_id = pass.id(&kdf_id)?;

        let master_key = AssetEncryptionKey::encrypt(
            master_id.to_vec(),
            master.raw(),
            pass.derived_key(&kdf_id)?,
            Cipher::new(kdf_id.clone(), pass_id.to_vec()),
        )?;

        let master_derived = master.derived_key(&kdf_id)?;
        let asset = AssetPrivateKey::encrypt(
            0,
            &private_key[..],
            master_derived,
            Cipher::new(kdf_id.clone(), master_id.to_vec()),
        )?;
        let seed = match &self.seed {
            SeedMaterial::Plain(seed) => SeedMaterial::Encrypted(EncryptedSeed::encrypt(
                seed,
                master_derived,
                Cipher::new(kdf_id, master_id.to_vec()),
            )?),
            other => other.clone(),
        };

        Ok(Self {
            network: self.network,
            public_key: self.public_key,
            chain_code: self.chain_code,
            private: PrivateMaterial::Encrypted(asset),
            seed,
            chain: self.chain,
            encryption: Some(NodeEncryption {
                kdf,
                master_key,
                types,
                keys,
            }),
        })
    }

    /// Decrypt with `passphrase`.
    ///
    /// The public key is recomputed from the recovered scalar, so a wrong
    /// passphrase shows up as a different [`Node::id`].
    pub fn decrypt(&self, passphrase: &[u8]) -> Result<Self, Error> {
        let encryption = self.encryption.as_ref().ok_or(Error::NoEncryption)?;
        let asset = match &self.private {
            PrivateMaterial::Encrypted(asset) => asset,
            _ => return Err(Error::NoPrivateKey),
        };

        let mut pass = DecryptedEncryptionKey::new(Zeroizing::new(passphrase.to_vec()));
        let pass_key = pass.derive_key(&encryption.kdf);
        let mut raw_master = encryption.master_key.decrypt(pass_key)?;
        raw_master.truncate(32);

        let mut master = DecryptedEncryptionKey::new(raw_master);
        let master_key = master.derive_key(&encryption.kdf);

        let plain = asset.decrypt(master_key)?;
        if plain.len() != 32 {
            return Err(FormatError::Invalid("encrypted private key is truncated".into()).into());
        }
        let mut private_key = Zeroizing::new([0u8; 32]);
        private_key.copy_from_slice(&plain[..32]);
        let public_key =
            keys::public_key_from_private(&private_key).map_err(|_| Error::WrongPassphrase)?;

        let seed = match &self.seed {
            SeedMaterial::Encrypted(seed) => SeedMaterial::Plain(seed.decrypt(master_key)?),
            other => other.clone(),
        };

        Ok(Self {
            network: self.network,
            public_key,
            chain_code: self.chain_code,
            private: PrivateMaterial::Plain(private_key),
            seed,
            chain: self.chain,
            encryption: None,
        })
    }

    /// Base58check `xprv`/`tprv` export of a root node.
    pub fn extended_private_key(&self) -> Result<Zeroizing<String>, Error> {
        let key = self.private_key().ok_or(Error::NoPrivateKey)?;
        let mut raw = Zeroizing::new(Vec::with_capacity(XPRV_LEN));
        raw.extend_from_slice(&self.network.xprv_version());
        raw.push(0);
        raw.extend_from_slice(&[0u8; 8]);
        raw.extend_from_slice(&self.chain_code);
        raw.push(0);
        raw.extend_from_slice(&key[..]);
        Ok(Zeroizing::new(bs58::encode(&raw[..]).with_check().into_string()))
    }

    /// `u8 44 || u8 network || tagged fields`
    pub fn serialize(&self) -> Zeroizing<Vec<u8>> {
        let mut writer = BinaryWriter::with_capacity(128);
        writer.put_u8(PURPOSE as u8).put_u8(self.network as u8);
        put_field(&mut writer, PUBKEY_TAG, &self.public_key);
        put_field(&mut writer, CHAINCODE_TAG, &self.chain_code);

        match &self.private {
            PrivateMaterial::None => {}
            PrivateMaterial::Plain(key) => put_field(&mut writer, PRIVKEY_TAG, &key[..]),
            PrivateMaterial::Encrypted(asset) => put_field(
                &mut writer,
                PRIVKEY_TAG,
                &EncryptedAsset::from(asset.clone()).serialize(),
            ),
        }
        match &self.seed {
            SeedMaterial::None => {}
            SeedMaterial::Plain(seed) => put_field(&mut writer, SEED_TAG, seed),
            SeedMaterial::Encrypted(seed) => put_field(
                &mut writer,
                SEED_TAG,
                &EncryptedAsset::from(seed.clone()).serialize(),
            ),
        }
        if let Some(encryption) = &self.encryption {
            put_field(
                &mut writer,
                MASTER_KEY_TAG,
                &EncryptedAsset::from(encryption.master_key.clone()).serialize(),
            );
            put_field(&mut writer, KDF_TAG, &encryption.kdf.serialize());

            let mut desc = BinaryWriter::new();
            desc.put_var_int(encryption.types.len() as u64);
            for t in &encryption.types {
                desc.put_u8(*t as u8);
            }
            desc.put_var_int(encryption.keys.len() as u64);
            for key in &encryption.keys {
                desc.put_var_bytes(key);
            }
            put_field(&mut writer, ENCRYPTION_TAG, desc.as_slice());
        }
        if let Some(chain) = &self.chain {
            put_field(&mut writer, CHAIN_TAG, chain);
        }
        Zeroizing::new(writer.into_vec())
    }

    /// Parse the output of [`Node::serialize`]. Unknown tags are skipped.
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut reader = BinaryReader::new(data);
        let purpose = reader.get_u8()?;
        if u32::from(purpose) != PURPOSE {
            return Err(FormatError::Invalid(format!("unexpected node purpose {purpose}")).into());
        }
        let network = NetworkType::try_from(reader.get_u8()?)?;

        let mut public_key = None;
        let mut chain_code = [0u8; 32];
        let mut private_raw = None;
        let mut seed_raw = None;
        let mut master_raw = None;
        let mut kdf = None;
        let mut types = Vec::new();
        let mut keys = Vec::new();
        let mut chain = None;

        while !reader.is_empty() {
            let len = reader.get_var_len()?;
            if len == 0 {
                return Err(FormatError::Invalid("empty node field".into()).into());
            }
            let tag = reader.get_u8()?;
            let value = reader.get_bytes(len - 1)?;
            match tag {
                PUBKEY_TAG => public_key = Some(fixed::<33>(value, "public key")?),
                CHAINCODE_TAG => chain_code = fixed::<32>(value, "chain code")?,
                PRIVKEY_TAG => private_raw = Some(value),
                SEED_TAG => seed_raw = Some(value),
                MASTER_KEY_TAG => master_raw = Some(value),
                KDF_TAG => kdf = Some(KdfRomix::deserialize(value)?),
                ENCRYPTION_TAG => {
                    let mut desc = BinaryReader::new(value);
                    for _ in 0..desc.get_var_len()? {
                        types.push(EncryptionType::try_from(desc.get_u8()?)?);
                    }
                    for _ in 0..desc.get_var_len()? {
                        keys.push(desc.get_var_bytes()?.to_vec());
                    }
                }
                CHAIN_TAG => chain = Some(fixed::<32>(value, "chain")?),
                other => debug!(tag = other, "skipping unknown node field"),
            }
        }
        let public_key =
            public_key.ok_or_else(|| FormatError::Invalid("node has no public key".into()))?;
        keys::parse_public(&public_key)?;

        let (private, seed, encryption) = match master_raw {
            Some(master_raw) => {
                let master_key = match EncryptedAsset::deserialize(master_raw)? {
                    EncryptedAsset::EncryptionKey(key) => key,
                    _ => return Err(FormatError::Invalid("expected wrapped master key".into()).into()),
                };
                let kdf = kdf.ok_or_else(|| FormatError::Invalid("encrypted node has no KDF".into()))?;
                let private = match private_raw.map(EncryptedAsset::deserialize).transpose()? {
                    Some(EncryptedAsset::PrivateKey(asset)) => PrivateMaterial::Encrypted(asset),
                    Some(_) => {
                        return Err(FormatError::Invalid("expected encrypted private key".into()).into())
                    }
                    None => PrivateMaterial::None,
                };
                let seed = match seed_raw.map(EncryptedAsset::deserialize).transpose()? {
                    Some(EncryptedAsset::Seed(seed)) => SeedMaterial::Encrypted(seed),
                    Some(_) => return Err(FormatError::Invalid("expected encrypted seed".into()).into()),
                    None => SeedMaterial::None,
                };
                let encryption = NodeEncryption {
                    kdf,
                    master_key,
                    types,
                    keys,
                };
                (private, seed, Some(encryption))
            }
            None => {
                let private = match private_raw {
                    Some(raw) => {
                        let key = Zeroizing::new(fixed::<32>(raw, "private key")?);
                        if keys::public_key_from_private(&key)? != public_key {
                            return Err(FormatError::Invalid(
                                "private key does not match public key".into(),
                            )
                            .into());
                        }
                        PrivateMaterial::Plain(key)
                    }
                    None => PrivateMaterial::None,
                };
                let seed = seed_raw
                    .map(|s| SeedMaterial::Plain(Zeroizing::new(s.to_vec())))
                    .unwrap_or_default();
                (private, seed, None)
            }
        };

        Ok(Self {
            network,
            public_key,
            chain_code,
            private,
            seed,
            chain,
            encryption,
        })
    }
}

fn put_field(writer: &mut BinaryWriter, tag: u8, data: &[u8]) {
    writer
        .put_var_int(data.len() as u64 + 1)
        .put_u8(tag)
        .put_bytes(data);
}

fn fixed<const N: usize>(data: &[u8], what: &str) -> Result<[u8; N], FormatError> {
    data.try_into()
        .map_err(|_| FormatError::Invalid(format!("{what} must be {N} bytes, got {}", data.len())))
}
