// Copyright (c) 2024 The Botho Foundation

//! BIP44 derivation paths.

use crate::Error;
use core::{cmp::Ordering, fmt, str::FromStr};

/// Hardened key offset
pub const HARDENED: u32 = 0x8000_0000;

/// BIP44 purpose element
pub const PURPOSE: u32 = 44;

/// Coin types used as the second path element.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum CoinType {
    BitcoinMain = 0,
    BitcoinTest = 1,
    BlockSettleCC = 0x4253,
    BlockSettleAuth = 0x4175_7468,
    BlockSettleSettlement = 0x0053_6574,
}

impl CoinType {
    /// The plain XBT coin type for `network`.
    pub fn bitcoin(network: crate::NetworkType) -> Self {
        if network.is_mainnet() {
            Self::BitcoinMain
        } else {
            Self::BitcoinTest
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for CoinType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value & !HARDENED {
            0 => Self::BitcoinMain,
            1 => Self::BitcoinTest,
            0x4253 => Self::BlockSettleCC,
            0x4175_7468 => Self::BlockSettleAuth,
            0x0053_6574 => Self::BlockSettleSettlement,
            other => return Err(Error::InvalidPath(format!("unknown coin type {other:#x}"))),
        })
    }
}

/// Ordered derivation indices, each flagged hardened or not.
///
/// Elements are stored without the hardened bit. A path whose first element
/// is [`PURPOSE`] is absolute and its first three elements (purpose, coin,
/// account) are always hardened.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Path {
    elems: Vec<u32>,
    hardened: Vec<bool>,
}

impl Path {
    /// Build a path from plain elements.
    pub fn new(elems: Vec<u32>) -> Self {
        let mut path = Self {
            hardened: vec![false; elems.len()],
            elems,
        };
        if path.is_absolute() {
            for flag in path.hardened.iter_mut().take(3) {
                *flag = true;
            }
        }
        path
    }

    /// `44'/coin'` for a group.
    pub fn group(coin: u32) -> Self {
        Self::new(vec![PURPOSE, coin & !HARDENED])
    }

    /// Append an element.
    pub fn append(&mut self, elem: u32, hardened: bool) -> &mut Self {
        self.elems.push(elem & !HARDENED);
        self.hardened.push(hardened || elem & HARDENED != 0);
        self
    }

    /// Copy of this path extended by `other`.
    pub fn join(&self, other: &Path) -> Path {
        let mut out = self.clone();
        for (elem, hardened) in other.elems.iter().zip(&other.hardened) {
            out.append(*elem, *hardened);
        }
        out
    }

    /// Element at `index`; negative values count from the end.
    pub fn get(&self, index: isize) -> Option<u32> {
        let idx = if index < 0 {
            self.elems.len().checked_sub(index.unsigned_abs())?
        } else {
            index as usize
        };
        self.elems.get(idx).copied()
    }

    /// Child number for BIP32 at `index`, with the hardened bit applied.
    pub fn child_number(&self, index: usize) -> Option<u32> {
        let elem = *self.elems.get(index)?;
        Some(if self.hardened[index] { elem | HARDENED } else { elem })
    }

    /// Iterate over child numbers in order.
    pub fn child_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.elems.len()).filter_map(|i| self.child_number(i))
    }

    pub fn is_hardened(&self, index: usize) -> bool {
        self.hardened.get(index).copied().unwrap_or(false)
    }

    pub fn is_absolute(&self) -> bool {
        self.elems.first() == Some(&PURPOSE)
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn elems(&self) -> &[u32] {
        &self.elems
    }

    /// Path without its first `count` elements.
    pub fn suffix(&self, count: usize) -> Path {
        let count = count.min(self.elems.len());
        Path {
            elems: self.elems[count..].to_vec(),
            hardened: self.hardened[count..].to_vec(),
        }
    }

    /// True if `self` begins with every element of `prefix`.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.elems.starts_with(&prefix.elems)
    }

    /// Render as `m/44'/1'/0'`; relative paths omit the `m/` unless
    /// `always_absolute` is set.
    pub fn to_string_with(&self, always_absolute: bool) -> String {
        if self.elems.is_empty() {
            return String::new();
        }
        let mut out = if always_absolute || self.is_absolute() {
            String::from("m/")
        } else {
            String::new()
        };
        for (i, elem) in self.elems.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            out.push_str(&elem.to_string());
            if self.hardened[i] {
                out.push('\'');
            }
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(false))
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut path = Path::default();
        for part in s.split('/') {
            let part = part.trim();
            if part.is_empty() || part == "m" {
                continue;
            }
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(digits) => (digits, true),
                None => (part, false),
            };
            let elem: u32 = digits
                .parse()
                .map_err(|_| Error::InvalidPath(s.to_string()))?;
            if elem & HARDENED != 0 {
                return Err(Error::InvalidPath(s.to_string()));
            }
            path.append(elem, hardened);
        }
        Ok(path)
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        self.elems
            .len()
            .cmp(&other.elems.len())
            .then_with(|| self.elems.cmp(&other.elems))
            .then_with(|| self.hardened.cmp(&other.hardened))
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_paths_harden_first_three() {
        let path = Path::new(vec![44, 1, 0, 0, 5]);
        assert!(path.is_absolute());
        assert_eq!(path.to_string(), "m/44'/1'/0'/0/5");
        assert_eq!(path.child_number(2), Some(HARDENED));
        assert_eq!(path.child_number(3), Some(0));

        let relative = Path::new(vec![1, 7]);
        assert_eq!(relative.to_string(), "1/7");
        assert_eq!(relative.to_string_with(true), "m/1/7");
    }

    #[test]
    fn test_parse() {
        let path: Path = "m/44'/1'/0'/1/3".parse().unwrap();
        assert_eq!(path, Path::new(vec![44, 1, 0, 1, 3]));
        assert_eq!(path.get(-1), Some(3));
        assert_eq!(path.get(-2), Some(1));
        assert_eq!(path.get(-6), None);
        assert_eq!(path.get(5), None);

        let hardened: Path = "0h//2'".parse().unwrap();
        assert!(hardened.is_hardened(0));
        assert!(hardened.is_hardened(1));
        assert_eq!(hardened.len(), 2);

        assert!("m/44'/x".parse::<Path>().is_err());
        assert!("m/2147483648".parse::<Path>().is_err());
    }

    #[test]
    fn test_ordering_is_length_first() {
        let mut paths: Vec<Path> = ["0/10", "1", "0/2", "0"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        paths.sort();
        let rendered: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["0", "1", "0/2", "0/10"]);
    }

    #[test]
    fn test_join_and_suffix() {
        let leaf = Path::new(vec![44, 0x4175_7468, 0]);
        let addr: Path = "0/3".parse().unwrap();
        let full = leaf.join(&addr);
        assert_eq!(full.to_string(), "m/44'/1098216552'/0'/0/3");
        assert!(full.starts_with(&leaf));
        assert_eq!(full.suffix(3), addr);
        assert_eq!(CoinType::try_from(full.get(1).unwrap()).unwrap(), CoinType::BlockSettleAuth);
    }
}
