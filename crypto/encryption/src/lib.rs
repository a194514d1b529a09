// Copyright (c) 2024 The Botho Foundation

#![deny(unsafe_code)]

//! Encryption primitives for HD wallet key material.
//!
//! Secrets at rest are never stored in the clear. A passphrase is stretched
//! by a [`KdfRomix`] into a symmetric key, which unwraps a random master
//! [`DecryptedEncryptionKey`]; that master key in turn encrypts private keys
//! and seeds with a [`Cipher`] (AES-256-CBC). Every ciphertext records the id
//! of the KDF and of the key that produced it, so several passphrases can
//! protect the same data side by side.
//!
//! # Examples
//!
//! ```
//! use bth_crypto_encryption::{Cipher, KdfRomix, KdfSettings};
//!
//! let kdf = KdfRomix::initialize(&KdfSettings::fast());
//! let key = kdf.derive_key(b"correct horse");
//!
//! let cipher = Cipher::new(kdf.id().to_vec(), vec![0xAA; 16]);
//! let secret = [7u8; 32];
//! let encrypted = cipher.encrypt(&key, &secret).unwrap();
//! assert_eq!(&cipher.decrypt(&key, &encrypted).unwrap()[..], &secret[..]);
//! ```

mod assets;
mod cipher;
mod decrypted_key;
pub mod hash;
mod kdf;

pub use assets::{AssetEncryptionKey, AssetPrivateKey, EncryptedAsset, EncryptedSeed};
pub use cipher::{pad_to_block, Cipher, CipherType, AES_BLOCK_SIZE};
pub use decrypted_key::DecryptedEncryptionKey;
pub use kdf::{KdfRomix, KdfSettings};

pub use bth_util_binary::FormatError;

/// Errors that can occur while encrypting or decrypting assets.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Data length {0} is not a multiple of the AES block size")]
    Unaligned(usize),

    #[error("Invalid key length: {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid IV length: {0}")]
    InvalidIvLength(usize),

    #[error("Cannot compute id: {0}")]
    EmptyIdInput(&'static str),

    #[error("No key derived for KDF {0}")]
    MissingDerivedKey(String),

    #[error("Key material is not a valid secp256k1 scalar")]
    InvalidScalar,
}
