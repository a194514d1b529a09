// Copyright (c) 2024 The Botho Foundation

//! Bitcoin-style hash helpers.

use crate::Error;
use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256.
pub fn hash256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// RIPEMD-160 of SHA-256.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// Single SHA-512.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

/// HMAC-SHA256 of `msg` under `key`.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take any size key");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA512 of `msg` under `key`.
pub fn hmac_sha512(key: &[u8], msg: &[u8]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("HMAC can take any size key");
    mac.update(msg);
    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// 16-byte identifier of `data` bound to a context `message`.
///
/// The id is the tail of `HMAC-SHA256(key = hash256(data), message)`.
pub fn compute_data_id(data: &[u8], message: &str) -> Result<[u8; 16], Error> {
    if data.is_empty() {
        return Err(Error::EmptyIdInput("empty data"));
    }
    if message.is_empty() {
        return Err(Error::EmptyIdInput("empty message"));
    }
    let mac = hmac_sha256(&hash256(data), message.as_bytes());
    let mut id = [0u8; 16];
    id.copy_from_slice(&mac[16..]);
    Ok(id)
}
