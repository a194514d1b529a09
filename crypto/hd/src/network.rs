// Copyright (c) 2024 The Botho Foundation

use crate::Error;
use core::{fmt, str::FromStr};

/// Bitcoin network a key or address belongs to.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum NetworkType {
    MainNet = 0,
    #[default]
    TestNet = 1,
    RegTest = 2,
}

impl NetworkType {
    /// Version byte of P2PKH addresses (also used in node ids).
    pub fn pubkey_hash_prefix(self) -> u8 {
        match self {
            Self::MainNet => 0x00,
            Self::TestNet | Self::RegTest => 0x6F,
        }
    }

    /// Version byte of P2SH addresses.
    pub fn script_hash_prefix(self) -> u8 {
        match self {
            Self::MainNet => 0x05,
            Self::TestNet | Self::RegTest => 0xC4,
        }
    }

    /// Human readable part of segwit addresses.
    pub fn bech32_hrp(self) -> &'static str {
        match self {
            Self::MainNet => "bc",
            Self::TestNet => "tb",
            Self::RegTest => "bcrt",
        }
    }

    /// Version bytes of a serialized extended private key.
    pub fn xprv_version(self) -> [u8; 4] {
        match self {
            Self::MainNet => [0x04, 0x88, 0xAD, 0xE4],
            Self::TestNet | Self::RegTest => [0x04, 0x35, 0x83, 0x94],
        }
    }

    pub fn is_mainnet(self) -> bool {
        self == Self::MainNet
    }
}

impl TryFrom<u8> for NetworkType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::MainNet),
            1 => Ok(Self::TestNet),
            2 => Ok(Self::RegTest),
            other => Err(Error::UnknownNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MainNet => write!(f, "mainnet"),
            Self::TestNet => write!(f, "testnet"),
            Self::RegTest => write!(f, "regtest"),
        }
    }
}

impl FromStr for NetworkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::MainNet),
            "testnet" | "test" => Ok(Self::TestNet),
            "regtest" => Ok(Self::RegTest),
            other => Err(Error::UnknownNetwork(other.to_string())),
        }
    }
}
