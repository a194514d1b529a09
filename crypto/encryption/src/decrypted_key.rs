// Copyright (c) 2024 The Botho Foundation

use crate::{hash, Error, KdfRomix};
use k256::{elliptic_curve::sec1::ToEncodedPoint, SecretKey};
use rand_core::{OsRng, RngCore};
use std::collections::HashMap;
use zeroize::Zeroizing;

const ENCRYPTION_KEY_ID_MESSAGE: &str = "EncyrptionKey";

/// A raw encryption key in memory, together with its KDF stretchings.
///
/// Ciphers never use the raw key directly: each KDF produces a derived key,
/// and the id of a key under a given KDF is computed from that derived
/// value. The id is what ciphertexts reference as `encryption_key_id`.
#[derive(Clone)]
pub struct DecryptedEncryptionKey {
    raw: Zeroizing<Vec<u8>>,
    derived: HashMap<Vec<u8>, Zeroizing<Vec<u8>>>,
}

impl core::fmt::Debug for DecryptedEncryptionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "DecryptedEncryptionKey {{ derived: {} }}", self.derived.len())
    }
}

impl DecryptedEncryptionKey {
    /// Wrap a raw key (a passphrase or an unwrapped master key).
    pub fn new(raw: Zeroizing<Vec<u8>>) -> Self {
        Self {
            raw,
            derived: HashMap::new(),
        }
    }

    /// A fresh random 32-byte master key.
    pub fn random() -> Self {
        let mut raw = Zeroizing::new(vec![0u8; 32]);
        OsRng.fill_bytes(&mut raw);
        Self::new(raw)
    }

    /// Raw key bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Stretch the raw key with `kdf`, reusing a previous result.
    pub fn derive_key(&mut self, kdf: &KdfRomix) -> &[u8] {
        let raw = &self.raw;
        self.derived
            .entry(kdf.id().to_vec())
            .or_insert_with(|| kdf.derive_key(raw))
            .as_slice()
    }

    /// Key previously derived for `kdf_id`.
    pub fn derived_key(&self, kdf_id: &[u8]) -> Result<&[u8], Error> {
        self.derived
            .get(kdf_id)
            .map(|key| key.as_slice())
            .ok_or_else(|| Error::MissingDerivedKey(hex::encode(kdf_id)))
    }

    /// Id of this key under `kdf_id`.
    pub fn id(&self, kdf_id: &[u8]) -> Result<[u8; 16], Error> {
        Self::compute_id(self.derived_key(kdf_id)?)
    }

    /// Treat `hash256(derived)` as a scalar and id its public key.
    pub fn compute_id(derived: &[u8]) -> Result<[u8; 16], Error> {
        let hashed = Zeroizing::new(hash::hash256(derived));
        let scalar = SecretKey::from_slice(&hashed[..]).map_err(|_| Error::InvalidScalar)?;
        let pubkey = scalar.public_key().to_encoded_point(false);
        hash::compute_data_id(pubkey.as_bytes(), ENCRYPTION_KEY_ID_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_key_is_memoised_per_kdf() {
        let kdf_a = KdfRomix::with_params(1, 1024, vec![1; 32]);
        let kdf_b = KdfRomix::with_params(1, 1024, vec![2; 32]);

        let mut key = DecryptedEncryptionKey::new(Zeroizing::new(b"test_password".to_vec()));
        assert!(key.derived_key(kdf_a.id()).is_err());

        let a = key.derive_key(&kdf_a).to_vec();
        assert_eq!(a, kdf_a.derive_key(b"test_password").to_vec());
        let b = key.derive_key(&kdf_b).to_vec();
        assert_ne!(a, b);

        assert_eq!(key.derived_key(kdf_a.id()).unwrap(), &a[..]);
        assert_ne!(key.id(kdf_a.id()).unwrap(), key.id(kdf_b.id()).unwrap());
    }

    #[test]
    fn test_id_tracks_passphrase() {
        let kdf = KdfRomix::with_params(1, 1024, vec![1; 32]);
        let mut right = DecryptedEncryptionKey::new(Zeroizing::new(b"abc".to_vec()));
        let mut again = DecryptedEncryptionKey::new(Zeroizing::new(b"abc".to_vec()));
        let mut wrong = DecryptedEncryptionKey::new(Zeroizing::new(b"xyz".to_vec()));
        right.derive_key(&kdf);
        again.derive_key(&kdf);
        wrong.derive_key(&kdf);

        assert_eq!(right.id(kdf.id()).unwrap(), again.id(kdf.id()).unwrap());
        assert_ne!(right.id(kdf.id()).unwrap(), wrong.id(kdf.id()).unwrap());
    }
}
