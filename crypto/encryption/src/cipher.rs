// Copyright (c) 2024 The Botho Foundation

//! AES-256-CBC cipher descriptor.

use crate::Error;
use bth_util_binary::{BinaryReader, BinaryWriter, FormatError};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Serialized tag of a cipher descriptor.
pub const CIPHER_BYTE: u8 = 0xB2;

/// AES block length; plaintext must be a multiple of it.
pub const AES_BLOCK_SIZE: usize = 16;

const AES_KEY_SIZE: usize = 32;

/// Supported block ciphers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum CipherType {
    /// AES-256 in CBC mode, no padding.
    Aes = 0,
}

impl TryFrom<u8> for CipherType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Aes),
            other => Err(FormatError::Invalid(format!("unknown cipher type {other}"))),
        }
    }
}

/// Describes how one ciphertext was produced: the KDF that stretched the
/// passphrase, the id of the encryption key and the IV.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cipher {
    cipher_type: CipherType,
    kdf_id: Vec<u8>,
    encryption_key_id: Vec<u8>,
    iv: [u8; AES_BLOCK_SIZE],
}

impl Cipher {
    /// New AES descriptor with a random IV.
    pub fn new(kdf_id: Vec<u8>, encryption_key_id: Vec<u8>) -> Self {
        let mut iv = [0u8; AES_BLOCK_SIZE];
        OsRng.fill_bytes(&mut iv);
        Self {
            cipher_type: CipherType::Aes,
            kdf_id,
            encryption_key_id,
            iv,
        }
    }

    /// Same ids, fresh IV.
    pub fn fresh_copy(&self) -> Self {
        Self::new(self.kdf_id.clone(), self.encryption_key_id.clone())
    }

    /// Same KDF, different encryption key, fresh IV.
    pub fn copy_with_key_id(&self, encryption_key_id: Vec<u8>) -> Self {
        Self::new(self.kdf_id.clone(), encryption_key_id)
    }

    /// Cipher algorithm.
    pub fn cipher_type(&self) -> CipherType {
        self.cipher_type
    }

    /// Id of the KDF used to stretch the wrapping passphrase.
    pub fn kdf_id(&self) -> &[u8] {
        &self.kdf_id
    }

    /// Id of the key that encrypted the data.
    pub fn encryption_key_id(&self) -> &[u8] {
        &self.encryption_key_id
    }

    /// Initialization vector.
    pub fn iv(&self) -> &[u8; AES_BLOCK_SIZE] {
        &self.iv
    }

    /// Value equality over `(kdf_id, encryption_key_id, iv)`.
    pub fn is_same(&self, other: &Cipher) -> bool {
        self.kdf_id == other.kdf_id
            && self.encryption_key_id == other.encryption_key_id
            && self.iv == other.iv
    }

    /// Encrypt block-aligned `data` under `key`.
    pub fn encrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
        check_key(key)?;
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(Error::Unaligned(data.len()));
        }
        let mut buf = data.to_vec();
        let len = buf.len();
        Aes256CbcEnc::new_from_slices(key, &self.iv)
            .map_err(|_| Error::InvalidKeyLength(key.len()))?
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| Error::Unaligned(len))?;
        Ok(buf)
    }

    /// Decrypt `data` under `key`. A wrong key yields garbage, not an error.
    pub fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        check_key(key)?;
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(Error::Unaligned(data.len()));
        }
        let mut buf = Zeroizing::new(data.to_vec());
        Aes256CbcDec::new_from_slices(key, &self.iv)
            .map_err(|_| Error::InvalidKeyLength(key.len()))?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| Error::Unaligned(data.len()))?;
        Ok(buf)
    }

    /// `u8 0xB2 || u8 type || var_bytes(kdf_id) || var_bytes(key_id) || var_bytes(iv)`
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        writer
            .put_u8(CIPHER_BYTE)
            .put_u8(self.cipher_type as u8)
            .put_var_bytes(&self.kdf_id)
            .put_var_bytes(&self.encryption_key_id)
            .put_var_bytes(&self.iv);
        writer.into_vec()
    }

    /// Read a descriptor from the current reader position.
    pub fn read_from(reader: &mut BinaryReader<'_>) -> Result<Self, Error> {
        let prefix = reader.get_u8()?;
        if prefix != CIPHER_BYTE {
            return Err(FormatError::UnknownPrefix(prefix).into());
        }
        let cipher_type = CipherType::try_from(reader.get_u8()?)?;
        let kdf_id = reader.get_var_bytes()?.to_vec();
        let encryption_key_id = reader.get_var_bytes()?.to_vec();
        let iv_bytes = reader.get_var_bytes()?;
        let iv: [u8; AES_BLOCK_SIZE] = iv_bytes
            .try_into()
            .map_err(|_| Error::InvalidIvLength(iv_bytes.len()))?;
        Ok(Self {
            cipher_type,
            kdf_id,
            encryption_key_id,
            iv,
        })
    }

    /// Parse a standalone serialized descriptor.
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut reader = BinaryReader::new(data);
        let cipher = Self::read_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(FormatError::Invalid("trailing bytes after cipher".into()).into());
        }
        Ok(cipher)
    }
}

/// Zero-pad `data` up to the next block boundary.
pub fn pad_to_block(data: &[u8]) -> Zeroizing<Vec<u8>> {
    let padded_len = data.len().div_ceil(AES_BLOCK_SIZE).max(1) * AES_BLOCK_SIZE;
    let mut out = Zeroizing::new(vec![0u8; padded_len]);
    out[..data.len()].copy_from_slice(data);
    out
}

fn check_key(key: &[u8]) -> Result<(), Error> {
    if key.len() != AES_KEY_SIZE {
        return Err(Error::InvalidKeyLength(key.len()));
    }
    Ok(())
}
