//! Address lookup command

use anyhow::{anyhow, Result};
use bth_crypto_hd::Address;
use std::path::Path;

use crate::config::Config;

use super::{open_wallet, print_warning};

/// Run the lookup command
pub fn run(config: &Config, wallet: Option<&Path>, address: &str) -> Result<()> {
    let wallet = open_wallet(config, wallet)?;
    let address = Address::parse_for(address, wallet.network()).map_err(|e| anyhow!("{e}"))?;

    let Some(leaf) = wallet.find_leaf_for_address(&address) else {
        print_warning("Address does not belong to this wallet");
        return Ok(());
    };

    println!("Address:  {address} ({})", address.address_type());
    println!("Leaf:     {} ({})", leaf.path(), leaf.policy().name());
    if let Some(index) = leaf.address_index(&address) {
        let branch = if leaf.is_external_address(&address) { "external" } else { "internal" };
        println!("Index:    {index} ({branch})");
    }
    if let Some(key) = leaf.public_key_for(&address) {
        println!("Pubkey:   {}", hex::encode(key));
    }
    if let Some(comment) = wallet.address_comment(&address) {
        println!("Comment:  {comment}");
    }

    Ok(())
}
