//! Address comment command

use anyhow::{anyhow, Result};
use bth_crypto_hd::Address;
use std::path::Path;

use crate::config::Config;

use super::{open_wallet, print_success};

/// Run the comment command
pub fn run(config: &Config, wallet: Option<&Path>, address: &str, text: &str) -> Result<()> {
    let wallet = open_wallet(config, wallet)?;
    let address = Address::parse_for(address, wallet.network()).map_err(|e| anyhow!("{e}"))?;

    wallet.set_address_comment(&address, text)?;
    wallet.save()?;

    if text.is_empty() {
        print_success("Comment removed.");
    } else {
        print_success("Comment saved.");
    }
    Ok(())
}
