//! Hooks between a wallet and a blockchain scanner.

use crate::Error;
use bth_crypto_hd::Address;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Scanner side of address registration.
///
/// The wallet pushes every address it wants watched; the scanner reports
/// back through [`crate::Wallet::on_address_activity`].
pub trait AddressWatcher {
    fn register_addresses_for_watching(
        &self,
        wallet_id: &str,
        addresses: &[Address],
    ) -> Result<(), Error>;
}

/// In-memory [`AddressWatcher`] that just records registrations.
#[derive(Debug, Default)]
pub struct WatchList {
    wallets: Mutex<BTreeMap<String, Vec<Address>>>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses registered for `wallet_id`.
    pub fn addresses(&self, wallet_id: &str) -> Vec<Address> {
        self.wallets.lock().get(wallet_id).cloned().unwrap_or_default()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.wallets
            .lock()
            .values()
            .any(|addresses| addresses.contains(address))
    }
}

impl AddressWatcher for WatchList {
    fn register_addresses_for_watching(
        &self,
        wallet_id: &str,
        addresses: &[Address],
    ) -> Result<(), Error> {
        let mut wallets = self.wallets.lock();
        let entry = wallets.entry(wallet_id.to_owned()).or_default();
        for address in addresses {
            if !entry.contains(address) {
                entry.push(address.clone());
            }
        }
        Ok(())
    }
}
