// Copyright (c) 2024 The Botho Foundation

//! secp256k1 arithmetic for BIP32 and chained keys.

use crate::{Error, HARDENED};
use bth_crypto_encryption::hash;
use k256::{
    elliptic_curve::{sec1::ToEncodedPoint, PrimeField},
    AffinePoint, ProjectivePoint, PublicKey, Scalar, SecretKey,
};
use zeroize::Zeroizing;

const MASTER_HMAC_KEY: &[u8] = b"Bitcoin seed";

/// BIP32 master key and chain code from seed entropy.
pub(crate) fn master_from_entropy(
    entropy: &[u8],
) -> Result<(Zeroizing<[u8; 32]>, [u8; 32]), Error> {
    if !(16..=64).contains(&entropy.len()) {
        return Err(Error::InvalidSeed(format!(
            "entropy must be 16 to 64 bytes, got {}",
            entropy.len()
        )));
    }
    let result = Zeroizing::new(hash::hmac_sha512(MASTER_HMAC_KEY, entropy));

    let mut key = Zeroizing::new([0u8; 32]);
    let mut chain_code = [0u8; 32];
    key.copy_from_slice(&result[..32]);
    chain_code.copy_from_slice(&result[32..]);

    secret_scalar(&key)?;
    Ok((key, chain_code))
}

/// Compressed public key of a private scalar.
pub fn public_key_from_private(private_key: &[u8; 32]) -> Result<[u8; 33], Error> {
    let secret = SecretKey::from_slice(private_key).map_err(|_| Error::InvalidPrivateKey)?;
    Ok(compress(&secret.public_key()))
}

/// Derive a child private key and chain code.
pub(crate) fn derive_private_child(
    parent_key: &[u8; 32],
    parent_chain: &[u8; 32],
    index: u32,
) -> Result<(Zeroizing<[u8; 32]>, [u8; 32]), Error> {
    let mut data = Zeroizing::new(Vec::with_capacity(37));
    if index >= HARDENED {
        // Hardened derivation: use 0x00 || parent_key || index
        data.push(0x00);
        data.extend_from_slice(parent_key);
    } else {
        // Normal derivation: use compressed public key || index
        data.extend_from_slice(&public_key_from_private(parent_key)?);
    }
    data.extend_from_slice(&index.to_be_bytes());
    let result = Zeroizing::new(hash::hmac_sha512(parent_chain, &data));

    let tweak = tweak_scalar(&result[..32])?;
    let child = secret_scalar(parent_key)? + tweak;
    if bool::from(child.is_zero()) {
        return Err(Error::DerivationError(format!("index {index} yields a zero key")));
    }

    let mut new_key = Zeroizing::new([0u8; 32]);
    new_key.copy_from_slice(&child.to_bytes());
    let mut new_chain = [0u8; 32];
    new_chain.copy_from_slice(&result[32..]);

    Ok((new_key, new_chain))
}

/// Derive a child public key and chain code (non-hardened only).
pub(crate) fn derive_public_child(
    parent_key: &[u8; 33],
    parent_chain: &[u8; 32],
    index: u32,
) -> Result<([u8; 33], [u8; 32]), Error> {
    if index >= HARDENED {
        return Err(Error::HardenedRequiresPrivate);
    }
    let parent = parse_public(parent_key)?;

    let mut data = Vec::with_capacity(37);
    data.extend_from_slice(parent_key);
    data.extend_from_slice(&index.to_be_bytes());
    let result = hash::hmac_sha512(parent_chain, &data);

    let tweak = tweak_scalar(&result[..32])?;
    let point = ProjectivePoint::GENERATOR * tweak + parent.to_projective();
    let child = PublicKey::from_affine(AffinePoint::from(point))
        .map_err(|_| Error::DerivationError(format!("index {index} yields infinity")))?;

    let mut new_chain = [0u8; 32];
    new_chain.copy_from_slice(&result[32..]);
    Ok((compress(&child), new_chain))
}

/// `hash256(uncompressed pubkey) XOR chain_code`, the chained-key multiplier.
fn chain_multiplier(public_key: &PublicKey, chain_code: &[u8; 32]) -> Result<Scalar, Error> {
    let uncompressed = public_key.to_encoded_point(false);
    let mut multiplier = Zeroizing::new(hash::hash256(uncompressed.as_bytes()));
    for (m, c) in multiplier.iter_mut().zip(chain_code) {
        *m ^= c;
    }
    tweak_scalar(&multiplier[..])
}

/// Private key multiplied by the chain multiplier.
pub fn chained_private_key(
    private_key: &[u8; 32],
    chain_code: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, Error> {
    let secret = SecretKey::from_slice(private_key).map_err(|_| Error::InvalidPrivateKey)?;
    let multiplier = chain_multiplier(&secret.public_key(), chain_code)?;
    let chained = secret_scalar(private_key)? * multiplier;

    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&chained.to_bytes());
    Ok(out)
}

/// Public key multiplied by the chain multiplier, compressed.
pub fn chained_public_key(public_key: &[u8; 33], chain_code: &[u8; 32]) -> Result<[u8; 33], Error> {
    let point = parse_public(public_key)?;
    let multiplier = chain_multiplier(&point, chain_code)?;
    let chained = point.to_projective() * multiplier;
    let chained = PublicKey::from_affine(AffinePoint::from(chained)).map_err(|_| Error::InvalidPublicKey)?;
    Ok(compress(&chained))
}

pub(crate) fn parse_public(public_key: &[u8]) -> Result<PublicKey, Error> {
    PublicKey::from_sec1_bytes(public_key).map_err(|_| Error::InvalidPublicKey)
}

/// Uncompressed SEC1 encoding of a compressed key.
pub(crate) fn uncompress(public_key: &[u8; 33]) -> Result<[u8; 65], Error> {
    let point = parse_public(public_key)?.to_encoded_point(false);
    let mut out = [0u8; 65];
    out.copy_from_slice(point.as_bytes());
    Ok(out)
}

fn compress(public_key: &PublicKey) -> [u8; 33] {
    let point = public_key.to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(point.as_bytes());
    out
}

fn secret_scalar(key: &[u8; 32]) -> Result<Scalar, Error> {
    let scalar = Option::<Scalar>::from(Scalar::from_repr((*key).into()))
        .ok_or(Error::InvalidPrivateKey)?;
    if bool::from(scalar.is_zero()) {
        return Err(Error::InvalidPrivateKey);
    }
    Ok(scalar)
}

fn tweak_scalar(bytes: &[u8]) -> Result<Scalar, Error> {
    let mut repr = [0u8; 32];
    repr.copy_from_slice(bytes);
    Option::<Scalar>::from(Scalar::from_repr(repr.into()))
        .ok_or_else(|| Error::DerivationError("tweak exceeds curve order".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP32 test vector 1
    const TV1_SEED: &str = "000102030405060708090a0b0c0d0e0f";

    #[test]
    fn test_bip32_vector_1_master() {
        let (key, chain) = master_from_entropy(&hex::decode(TV1_SEED).unwrap()).unwrap();
        assert_eq!(
            hex::encode(*key),
            "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35"
        );
        assert_eq!(
            hex::encode(chain),
            "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508"
        );
        assert_eq!(
            hex::encode(public_key_from_private(&key).unwrap()),
            "0339a36013301597daef41fbe593a02cc513d0b55527ec2df1050e2e8ff49c85c2"
        );
    }

    #[test]
    fn test_bip32_vector_1_hardened_child() {
        let (key, chain) = master_from_entropy(&hex::decode(TV1_SEED).unwrap()).unwrap();
        let (child, child_chain) = derive_private_child(&key, &chain, HARDENED).unwrap();
        assert_eq!(
            hex::encode(*child),
            "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea"
        );
        assert_eq!(
            hex::encode(child_chain),
            "47fdacbd0f1097043b78c63c20c34ef4ed9a111d980047ad16282c7ae6236141"
        );
    }

    #[test]
    fn test_public_derivation_matches_private() {
        let (key, chain) = master_from_entropy(&[7u8; 32]).unwrap();
        let public = public_key_from_private(&key).unwrap();
        for index in [0, 1, 42] {
            let (child_priv, priv_chain) = derive_private_child(&key, &chain, index).unwrap();
            let (child_pub, pub_chain) = derive_public_child(&public, &chain, index).unwrap();
            assert_eq!(public_key_from_private(&child_priv).unwrap(), child_pub);
            assert_eq!(priv_chain, pub_chain);
        }
        assert!(matches!(
            derive_public_child(&public, &chain, HARDENED),
            Err(Error::HardenedRequiresPrivate)
        ));
    }

    #[test]
    fn test_chained_keys_agree() {
        let (key, _) = master_from_entropy(&[9u8; 32]).unwrap();
        let public = public_key_from_private(&key).unwrap();
        let chain_code = hash::hash256(b"user@example.com");

        let chained_priv = chained_private_key(&key, &chain_code).unwrap();
        let chained_pub = chained_public_key(&public, &chain_code).unwrap();
        assert_eq!(public_key_from_private(&chained_priv).unwrap(), chained_pub);
        assert_ne!(chained_pub, public);
        assert_eq!(uncompress(&chained_pub).unwrap()[0], 0x04);
    }
}
