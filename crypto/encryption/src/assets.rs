// Copyright (c) 2024 The Botho Foundation

//! Encrypted private keys, wrapped encryption keys and seeds.

use crate::{cipher::pad_to_block, Cipher, Error};
use bth_util_binary::{BinaryReader, BinaryWriter, FormatError};
use zeroize::Zeroizing;

/// Serialized tag of an encrypted private key.
pub const PRIVKEY_BYTE: u8 = 0x82;
/// Serialized tag of a wrapped encryption key.
pub const ENCRYPTIONKEY_BYTE: u8 = 0x83;
/// Serialized tag of an encrypted seed.
pub const ENCRYPTED_SEED_BYTE: u8 = 0x84;

const PRIVATE_KEY_LEN: usize = 32;

/// Private key encrypted under a master key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetPrivateKey {
    id: i32,
    data: Vec<u8>,
    cipher: Cipher,
}

impl AssetPrivateKey {
    /// Encrypt a 32-byte private key.
    pub fn encrypt(id: i32, private_key: &[u8], key: &[u8], cipher: Cipher) -> Result<Self, Error> {
        let data = cipher.encrypt(key, &pad_to_block(private_key))?;
        Ok(Self { id, data, cipher })
    }

    /// Recover the private key; a wrong `key` produces an unrelated scalar.
    pub fn decrypt(&self, key: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let mut plain = self.cipher.decrypt(key, &self.data)?;
        plain.truncate(PRIVATE_KEY_LEN);
        Ok(plain)
    }

    /// Asset index.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Ciphertext.
    pub fn cipher_text(&self) -> &[u8] {
        &self.data
    }

    /// Descriptor of the encryption.
    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Equality over id, ciphertext and cipher.
    pub fn is_same(&self, other: &Self) -> bool {
        self.id == other.id && self.data == other.data && self.cipher.is_same(&other.cipher)
    }

    fn write_body(&self, writer: &mut BinaryWriter) {
        writer
            .put_u8(PRIVKEY_BYTE)
            .put_i32(self.id)
            .put_var_bytes(&self.data)
            .put_var_bytes(&self.cipher.serialize());
    }
}

/// Encryption key wrapped by a passphrase-derived key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetEncryptionKey {
    id: Vec<u8>,
    data: Vec<u8>,
    cipher: Cipher,
}

impl AssetEncryptionKey {
    /// Wrap `raw_key` (identified by `id`) under `wrapping_key`.
    pub fn encrypt(
        id: Vec<u8>,
        raw_key: &[u8],
        wrapping_key: &[u8],
        cipher: Cipher,
    ) -> Result<Self, Error> {
        let data = cipher.encrypt(wrapping_key, &pad_to_block(raw_key))?;
        Ok(Self { id, data, cipher })
    }

    /// Unwrap the raw key.
    pub fn decrypt(&self, wrapping_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        self.cipher.decrypt(wrapping_key, &self.data)
    }

    /// Id of the wrapped key.
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Ciphertext.
    pub fn cipher_text(&self) -> &[u8] {
        &self.data
    }

    /// Descriptor of the wrapping.
    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Equality over id, ciphertext and cipher.
    pub fn is_same(&self, other: &Self) -> bool {
        self.id == other.id && self.data == other.data && self.cipher.is_same(&other.cipher)
    }

    fn write_body(&self, writer: &mut BinaryWriter) {
        writer
            .put_u8(ENCRYPTIONKEY_BYTE)
            .put_var_bytes(&self.id)
            .put_var_bytes(&self.data)
            .put_var_bytes(&self.cipher.serialize());
    }
}

/// Wallet seed encrypted under a master key.
///
/// Seeds have no fixed length, so the plaintext length travels with the
/// ciphertext and decryption truncates the block padding back off.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptedSeed {
    plain_len: u32,
    data: Vec<u8>,
    cipher: Cipher,
}

impl EncryptedSeed {
    /// Encrypt `seed` under `key`.
    pub fn encrypt(seed: &[u8], key: &[u8], cipher: Cipher) -> Result<Self, Error> {
        let plain_len = u32::try_from(seed.len())
            .map_err(|_| FormatError::Invalid("seed too long".into()))?;
        let data = cipher.encrypt(key, &pad_to_block(seed))?;
        Ok(Self {
            plain_len,
            data,
            cipher,
        })
    }

    /// Recover the seed bytes.
    pub fn decrypt(&self, key: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let mut plain = self.cipher.decrypt(key, &self.data)?;
        plain.truncate(self.plain_len as usize);
        Ok(plain)
    }

    /// Descriptor of the encryption.
    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Equality over length, ciphertext and cipher.
    pub fn is_same(&self, other: &Self) -> bool {
        self.plain_len == other.plain_len
            && self.data == other.data
            && self.cipher.is_same(&other.cipher)
    }

    fn write_body(&self, writer: &mut BinaryWriter) {
        writer
            .put_u8(ENCRYPTED_SEED_BYTE)
            .put_u32(self.plain_len)
            .put_var_bytes(&self.data)
            .put_var_bytes(&self.cipher.serialize());
    }
}

/// Any of the encrypted asset records.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EncryptedAsset {
    /// Tag `0x82`
    PrivateKey(AssetPrivateKey),
    /// Tag `0x83`
    EncryptionKey(AssetEncryptionKey),
    /// Tag `0x84`
    Seed(EncryptedSeed),
}

impl EncryptedAsset {
    /// `var_int(len) || body`
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = BinaryWriter::new();
        match self {
            Self::PrivateKey(asset) => asset.write_body(&mut body),
            Self::EncryptionKey(asset) => asset.write_body(&mut body),
            Self::Seed(asset) => asset.write_body(&mut body),
        }
        let mut out = BinaryWriter::with_capacity(body.len() + 3);
        out.put_var_bytes(body.as_slice());
        out.into_vec()
    }

    /// Parse any asset, dispatching on its tag byte.
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut reader = BinaryReader::new(data);
        let declared = reader.get_var_int()? as usize;
        if declared != reader.remaining() {
            return Err(FormatError::LengthMismatch {
                declared,
                found: reader.remaining(),
            }
            .into());
        }

        let asset = match reader.get_u8()? {
            PRIVKEY_BYTE => {
                let id = reader.get_i32()?;
                let data = reader.get_var_bytes()?.to_vec();
                let cipher = Cipher::deserialize(reader.get_var_bytes()?)?;
                Self::PrivateKey(AssetPrivateKey { id, data, cipher })
            }
            ENCRYPTIONKEY_BYTE => {
                let id = reader.get_var_bytes()?.to_vec();
                let data = reader.get_var_bytes()?.to_vec();
                let cipher = Cipher::deserialize(reader.get_var_bytes()?)?;
                Self::EncryptionKey(AssetEncryptionKey { id, data, cipher })
            }
            ENCRYPTED_SEED_BYTE => {
                let plain_len = reader.get_u32()?;
                let data = reader.get_var_bytes()?.to_vec();
                let cipher = Cipher::deserialize(reader.get_var_bytes()?)?;
                Self::Seed(EncryptedSeed {
                    plain_len,
                    data,
                    cipher,
                })
            }
            other => return Err(FormatError::UnknownPrefix(other).into()),
        };
        if !reader.is_empty() {
            return Err(FormatError::Invalid("trailing bytes after asset".into()).into());
        }
        Ok(asset)
    }

    /// Cipher protecting the asset.
    pub fn cipher(&self) -> &Cipher {
        match self {
            Self::PrivateKey(asset) => asset.cipher(),
            Self::EncryptionKey(asset) => asset.cipher(),
            Self::Seed(asset) => asset.cipher(),
        }
    }

    /// Same variant and same content.
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::PrivateKey(a), Self::PrivateKey(b)) => a.is_same(b),
            (Self::EncryptionKey(a), Self::EncryptionKey(b)) => a.is_same(b),
            (Self::Seed(a), Self::Seed(b)) => a.is_same(b),
            _ => false,
        }
    }
}

impl From<AssetPrivateKey> for EncryptedAsset {
    fn from(src: AssetPrivateKey) -> Self {
        Self::PrivateKey(src)
    }
}

impl From<AssetEncryptionKey> for EncryptedAsset {
    fn from(src: AssetEncryptionKey) -> Self {
        Self::EncryptionKey(src)
    }
}

impl From<EncryptedSeed> for EncryptedAsset {
    fn from(src: EncryptedSeed) -> Self {
        Self::Seed(src)
    }
}
