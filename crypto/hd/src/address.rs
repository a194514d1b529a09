// Copyright (c) 2024 The Botho Foundation

//! Bitcoin addresses derived from node public keys.

use crate::{Error, NetworkType};
use bech32::{u5, FromBase32, ToBase32, Variant};
use bth_crypto_encryption::hash;
use core::{fmt, str::FromStr};

const P2WPKH_PREFIX: u8 = 0x90;
const P2WSH_PREFIX: u8 = 0x95;

/// Script type of an address.
///
/// The numeric values match the entry types persisted in wallet files.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum AddressType {
    P2pkh = 1,
    P2wpkh = 3,
    /// P2WPKH wrapped in P2SH.
    NestedP2wpkh = 0x4000_0003,
    P2wsh = 0x8000_0004,
}

impl AddressType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Native and nested P2WPKH share the same key hash.
    pub fn complementary(self) -> Option<Self> {
        match self {
            Self::P2wpkh => Some(Self::NestedP2wpkh),
            Self::NestedP2wpkh => Some(Self::P2wpkh),
            _ => None,
        }
    }
}

impl TryFrom<u32> for AddressType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::P2pkh),
            3 => Ok(Self::P2wpkh),
            0x4000_0003 => Ok(Self::NestedP2wpkh),
            0x8000_0004 => Ok(Self::P2wsh),
            other => Err(Error::InvalidAddress(format!("unknown address type {other:#x}"))),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::P2pkh => "p2pkh",
            Self::P2wpkh => "p2wpkh",
            Self::NestedP2wpkh => "p2sh-p2wpkh",
            Self::P2wsh => "p2wsh",
        })
    }
}

impl FromStr for AddressType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "p2pkh" | "legacy" => Ok(Self::P2pkh),
            "p2wpkh" | "native" | "segwit" => Ok(Self::P2wpkh),
            "p2sh-p2wpkh" | "nested" => Ok(Self::NestedP2wpkh),
            "p2wsh" => Ok(Self::P2wsh),
            other => Err(Error::InvalidAddress(format!("unknown address type {other}"))),
        }
    }
}

/// A script hash tagged with its type and network.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Address {
    network: NetworkType,
    address_type: AddressType,
    hash: Vec<u8>,
}

impl Address {
    /// Address of a compressed public key.
    pub fn from_public_key(
        public_key: &[u8; 33],
        address_type: AddressType,
        network: NetworkType,
    ) -> Result<Self, Error> {
        let key_hash = hash::hash160(public_key);
        let hash = match address_type {
            AddressType::P2pkh | AddressType::P2wpkh => key_hash.to_vec(),
            AddressType::NestedP2wpkh => hash::hash160(&p2wpkh_script(&key_hash)).to_vec(),
            AddressType::P2wsh => {
                return Err(Error::InvalidAddress(
                    "P2WSH addresses need a witness script".into(),
                ))
            }
        };
        Ok(Self {
            network,
            address_type,
            hash,
        })
    }

    /// P2WSH address of `script`.
    pub fn from_witness_script(script: &[u8], network: NetworkType) -> Self {
        Self {
            network,
            address_type: AddressType::P2wsh,
            hash: hash::sha256(script).to_vec(),
        }
    }

    /// P2WSH address of a 1-of-2 settlement script.
    pub fn settlement(buy: &[u8; 33], sell: &[u8; 33], network: NetworkType) -> Self {
        Self::from_witness_script(&Self::settlement_script(buy, sell), network)
    }

    /// `OP_1 <buy> <sell> OP_2 OP_CHECKMULTISIG`
    pub fn settlement_script(buy: &[u8; 33], sell: &[u8; 33]) -> Vec<u8> {
        let mut script = Vec::with_capacity(71);
        script.push(0x51);
        script.push(33);
        script.extend_from_slice(buy);
        script.push(33);
        script.extend_from_slice(sell);
        script.push(0x52);
        script.push(0xae);
        script
    }

    /// Witness script redeemed by a P2WPKH spend of `public_key`.
    pub fn witness_script(public_key: &[u8; 33]) -> Vec<u8> {
        p2wpkh_script(&hash::hash160(public_key))
    }

    pub fn network(&self) -> NetworkType {
        self.network
    }

    /// Parse an address expected on `network`.
    ///
    /// Base58 prefixes are shared by TestNet and RegTest, so a plain parse
    /// reports TestNet for both; this resolves the ambiguity and rejects
    /// addresses of other networks.
    pub fn parse_for(s: &str, network: NetworkType) -> Result<Self, Error> {
        let mut address: Self = s.parse()?;
        if address.network != network {
            let shared = match address.address_type {
                AddressType::P2pkh => {
                    address.network.pubkey_hash_prefix() == network.pubkey_hash_prefix()
                }
                AddressType::NestedP2wpkh => {
                    address.network.script_hash_prefix() == network.script_hash_prefix()
                }
                AddressType::P2wpkh | AddressType::P2wsh => false,
            };
            if !shared {
                return Err(Error::InvalidAddress(format!("{s} is not a {network} address")));
            }
            address.network = network;
        }
        Ok(address)
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// Script hash without a prefix byte.
    pub fn unprefixed(&self) -> &[u8] {
        &self.hash
    }

    /// Script hash behind a one byte type prefix, as used for wallet lookups.
    pub fn prefixed(&self) -> Vec<u8> {
        let prefix = match self.address_type {
            AddressType::P2pkh => self.network.pubkey_hash_prefix(),
            AddressType::NestedP2wpkh => self.network.script_hash_prefix(),
            AddressType::P2wpkh => P2WPKH_PREFIX,
            AddressType::P2wsh => P2WSH_PREFIX,
        };
        let mut out = Vec::with_capacity(self.hash.len() + 1);
        out.push(prefix);
        out.extend_from_slice(&self.hash);
        out
    }

    fn encode_segwit(&self) -> Result<String, Error> {
        let version = u5::try_from_u8(0).map_err(|e| Error::InvalidAddress(e.to_string()))?;
        let data: Vec<u5> = core::iter::once(version)
            .chain(self.hash.to_base32())
            .collect();
        bech32::encode(self.network.bech32_hrp(), data, Variant::Bech32)
            .map_err(|e| Error::InvalidAddress(e.to_string()))
    }

    fn decode_segwit(s: &str) -> Result<Self, Error> {
        let (hrp, data, variant) =
            bech32::decode(s).map_err(|e| Error::InvalidAddress(e.to_string()))?;
        let network = [NetworkType::MainNet, NetworkType::TestNet, NetworkType::RegTest]
            .into_iter()
            .find(|n| n.bech32_hrp() == hrp)
            .ok_or_else(|| Error::UnknownNetwork(hrp.clone()))?;
        if variant != Variant::Bech32 || data.first().map(|v| v.to_u8()) != Some(0) {
            return Err(Error::InvalidAddress(format!("unsupported witness version: {s}")));
        }
        let hash =
            Vec::<u8>::from_base32(&data[1..]).map_err(|e| Error::InvalidAddress(e.to_string()))?;
        let address_type = match hash.len() {
            20 => AddressType::P2wpkh,
            32 => AddressType::P2wsh,
            n => return Err(Error::InvalidAddress(format!("bad witness program length {n}"))),
        };
        Ok(Self {
            network,
            address_type,
            hash,
        })
    }

    fn decode_base58(s: &str) -> Result<Self, Error> {
        let raw = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| Error::InvalidAddress(e.to_string()))?;
        if raw.len() != 21 {
            return Err(Error::InvalidAddress(format!("bad length {}", raw.len())));
        }
        let (network, address_type) = match raw[0] {
            0x00 => (NetworkType::MainNet, AddressType::P2pkh),
            0x05 => (NetworkType::MainNet, AddressType::NestedP2wpkh),
            0x6F => (NetworkType::TestNet, AddressType::P2pkh),
            0xC4 => (NetworkType::TestNet, AddressType::NestedP2wpkh),
            other => return Err(Error::InvalidAddress(format!("unknown prefix {other:#04x}"))),
        };
        Ok(Self {
            network,
            address_type,
            hash: raw[1..].to_vec(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address_type {
            AddressType::P2pkh | AddressType::NestedP2wpkh => {
                f.write_str(&bs58::encode(self.prefixed()).with_check().into_string())
            }
            AddressType::P2wpkh | AddressType::P2wsh => {
                f.write_str(&self.encode_segwit().map_err(|_| fmt::Error)?)
            }
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let segwit = ["bc1", "tb1", "bcrt1"]
            .iter()
            .any(|hrp| lower.starts_with(hrp));
        if segwit {
            Self::decode_segwit(s)
        } else {
            Self::decode_base58(s)
        }
    }
}

fn p2wpkh_script(key_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(22);
    script.push(0x00);
    script.push(0x14);
    script.extend_from_slice(key_hash);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compressed pubkey of private key 1 (the generator)
    const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn generator() -> [u8; 33] {
        hex::decode(G).unwrap().try_into().unwrap()
    }

    #[test]
    fn test_known_addresses_of_generator() {
        let key = generator();
        let p2pkh = Address::from_public_key(&key, AddressType::P2pkh, NetworkType::MainNet).unwrap();
        assert_eq!(p2pkh.to_string(), "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");

        let p2wpkh =
            Address::from_public_key(&key, AddressType::P2wpkh, NetworkType::MainNet).unwrap();
        assert_eq!(p2wpkh.to_string(), "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");
        assert_eq!(p2wpkh.unprefixed(), p2pkh.unprefixed());
        assert_eq!(p2wpkh.prefixed()[0], P2WPKH_PREFIX);

        let nested =
            Address::from_public_key(&key, AddressType::NestedP2wpkh, NetworkType::MainNet).unwrap();
        assert_eq!(nested.unprefixed(), hash::hash160(&Address::witness_script(&key)));
        assert!(nested.to_string().starts_with('3'));
    }

    #[test]
    fn test_parse_back() {
        let key = generator();
        for address_type in [AddressType::P2pkh, AddressType::P2wpkh, AddressType::NestedP2wpkh] {
            let addr = Address::from_public_key(&key, address_type, NetworkType::TestNet).unwrap();
            let parsed: Address = addr.to_string().parse().unwrap();
            assert_eq!(parsed, addr);
        }
        assert!("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMX".parse::<Address>().is_err());
    }

    #[test]
    fn test_parse_for_regtest() {
        let key = generator();
        for address_type in [AddressType::P2pkh, AddressType::NestedP2wpkh, AddressType::P2wpkh] {
            let addr = Address::from_public_key(&key, address_type, NetworkType::RegTest).unwrap();
            let text = addr.to_string();
            assert_eq!(Address::parse_for(&text, NetworkType::RegTest).unwrap(), addr);
            assert!(Address::parse_for(&text, NetworkType::MainNet).is_err());
        }

        let testnet = Address::from_public_key(&key, AddressType::P2wpkh, NetworkType::TestNet).unwrap();
        assert!(Address::parse_for(&testnet.to_string(), NetworkType::RegTest).is_err());
    }

    #[test]
    fn test_settlement_address() {
        let buy = generator();
        let mut sell = generator();
        sell[0] = 0x03;
        let addr = Address::settlement(&buy, &sell, NetworkType::TestNet);
        assert_eq!(addr.address_type(), AddressType::P2wsh);
        assert_eq!(addr.unprefixed().len(), 32);
        assert!(addr.to_string().starts_with("tb1q"));
        assert_ne!(addr, Address::settlement(&sell, &buy, NetworkType::TestNet));
        assert!(Address::from_public_key(&buy, AddressType::P2wsh, NetworkType::TestNet).is_err());
    }

    #[test]
    fn test_complementary() {
        assert_eq!(AddressType::P2wpkh.complementary(), Some(AddressType::NestedP2wpkh));
        assert_eq!(AddressType::P2pkh.complementary(), None);
        assert_eq!(AddressType::try_from(0x4000_0003).unwrap(), AddressType::NestedP2wpkh);
        assert_eq!("nested".parse::<AddressType>().unwrap(), AddressType::NestedP2wpkh);
        assert_eq!(
            AddressType::NestedP2wpkh.to_string().parse::<AddressType>().unwrap(),
            AddressType::NestedP2wpkh
        );
        assert!("p2tr".parse::<AddressType>().is_err());
    }
}
