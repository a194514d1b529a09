//! How a leaf turns an index into an address.

use bth_crypto_encryption::hash;
use bth_crypto_hd::{CoinType, HARDENED};

/// Pool size of an auth leaf once its user id is bound.
pub const AUTH_POOL_SIZE: u32 = 5;

/// Leaf flavour, selected by the coin type of the owning group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DerivationPolicy {
    /// Plain single-sig addresses on an external and an internal branch.
    Standard,
    /// Addresses chained by `hash256(user_id)`; nothing is materialised
    /// until a user id is bound.
    Auth { user_id: Option<String> },
    /// 1-of-2 multisig addresses keyed by settlement id.
    Settlement,
    /// External-only addresses for one colored-coin product.
    ColorCoin { product: String },
}

impl DerivationPolicy {
    /// Policy for leaves of a group with `coin` type.
    pub fn for_coin(coin: u32) -> Self {
        match CoinType::try_from(coin) {
            Ok(CoinType::BlockSettleAuth) => Self::Auth { user_id: None },
            Ok(CoinType::BlockSettleSettlement) => Self::Settlement,
            Ok(CoinType::BlockSettleCC) => Self::ColorCoin {
                product: String::new(),
            },
            _ => Self::Standard,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Auth { .. } => "auth",
            Self::Settlement => "settlement",
            Self::ColorCoin { .. } => "color coin",
        }
    }

    /// Only the external branch is used.
    pub fn ext_only(&self) -> bool {
        !matches!(self, Self::Standard)
    }

    /// Chain code applied to the leaf node, if any.
    pub fn chain_code(&self) -> Option<[u8; 32]> {
        match self {
            Self::Auth {
                user_id: Some(user_id),
            } => Some(hash::hash256(user_id.as_bytes())),
            _ => None,
        }
    }

    /// Addresses may be materialised (auth leaves wait for a user id).
    pub fn is_bound(&self) -> bool {
        !matches!(self, Self::Auth { user_id: None })
    }
}

/// Leaf index of a colored-coin product: the first four bytes of
/// `hash256(product)` read big-endian, hardened bit cleared.
pub fn product_index(product: &str) -> u32 {
    let digest = hash::hash256(product.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & !HARDENED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_coin() {
        assert_eq!(DerivationPolicy::for_coin(1), DerivationPolicy::Standard);
        assert_eq!(
            DerivationPolicy::for_coin(CoinType::BlockSettleAuth.as_u32()),
            DerivationPolicy::Auth { user_id: None }
        );
        assert_eq!(
            DerivationPolicy::for_coin(CoinType::BlockSettleSettlement.as_u32()),
            DerivationPolicy::Settlement
        );
        assert!(DerivationPolicy::for_coin(CoinType::BlockSettleCC.as_u32()).ext_only());
        assert!(!DerivationPolicy::Standard.ext_only());
    }

    #[test]
    fn test_auth_chain_code() {
        let unbound = DerivationPolicy::Auth { user_id: None };
        assert!(!unbound.is_bound());
        assert_eq!(unbound.chain_code(), None);

        let bound = DerivationPolicy::Auth {
            user_id: Some("alice".into()),
        };
        assert!(bound.is_bound());
        assert_eq!(bound.chain_code(), Some(hash::hash256(b"alice")));
    }

    #[test]
    fn test_product_index() {
        let index = product_index("BLK");
        assert_eq!(index, product_index("BLK"));
        assert_ne!(index, product_index("BLK2"));
        assert_eq!(index & HARDENED, 0);
    }
}
