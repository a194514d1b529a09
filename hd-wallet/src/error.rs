//! Wallet errors

use bth_util_binary::FormatError;
use bth_util_kvstore::StoreError;

/// Errors raised by wallets, groups and leaves.
///
/// Every variant is a local, recoverable condition; callers decide whether to
/// prompt again or abort.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HD error: {0}")]
    Hd(#[from] bth_crypto_hd::Error),

    #[error("Encryption error: {0}")]
    Encryption(#[from] bth_crypto_encryption::Error),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Wallet is watching-only")]
    WatchingOnly,

    #[error("Wrong old password")]
    WrongOldPassword,

    #[error("Address or path does not belong to this account: {0}")]
    AccountOrPathMismatch(String),

    #[error("Leaf has been shut down")]
    LeafShutdown,

    #[error("Leaf is not initialized")]
    NotInitialized,

    #[error("Leaf has no internal branch")]
    NoInternalBranch,

    #[error("No private key access")]
    NoPrivateKeyAccess,

    #[error("Address is pending until a user id is set")]
    UserIdRequired,

    #[error("Invalid key rank {0}-of-{1}")]
    InvalidKeyRank(u32, u32),

    #[error("Settlement id must be 32 bytes, got {0}")]
    InvalidSettlementId(usize),

    #[error("Operation not supported by {0} leaves")]
    WrongLeafKind(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True if the error means a passphrase did not unlock the root.
    pub fn is_wrong_passphrase(&self) -> bool {
        matches!(
            self,
            Self::Hd(bth_crypto_hd::Error::WrongPassphrase) | Self::WrongOldPassword
        )
    }
}

/// A group or leaf skipped while loading a wallet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadDefect {
    /// Which part of the wallet, e.g. `group 0x1` or `m/44'/1'/0'`.
    pub location: String,
    pub reason: String,
}

impl core::fmt::Display for LoadDefect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.location, self.reason)
    }
}
