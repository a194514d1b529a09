//! Address command

use anyhow::{anyhow, Result};
use bth_crypto_hd::{AddressType, CoinType};
use std::path::Path;

use crate::{config::Config, Branch};

use super::{open_wallet, unlock_passphrase};

/// Run the address command
pub fn run(
    config: &Config,
    wallet: Option<&Path>,
    group: Option<u32>,
    leaf_index: u32,
    internal: bool,
    address_type: Option<&str>,
) -> Result<()> {
    let wallet = open_wallet(config, wallet)?;
    let address_type = address_type
        .map(|t| t.parse::<AddressType>())
        .transpose()
        .map_err(|e| anyhow!("{e}"))?;
    let coin = group.unwrap_or_else(|| CoinType::bitcoin(wallet.network()).as_u32());

    let leaf = match wallet.get_group(coin).and_then(|g| g.get_leaf(leaf_index)) {
        Some(leaf) => leaf,
        None => {
            let passphrase = unlock_passphrase(&wallet, "Enter wallet password: ")?;
            let root = wallet.unlock(&passphrase)?;
            wallet.create_group(coin).create_leaf(leaf_index, Some(&root))?
        }
    };

    let branch = if internal { Branch::Internal } else { Branch::External };
    let address = leaf.create_address(branch, address_type)?;
    wallet.save()?;

    let path = leaf
        .get_path_for_address(&address)
        .map(|p| leaf.path().join(&p).to_string())
        .unwrap_or_default();
    println!("{address}");
    println!("  path: {path}");

    Ok(())
}
