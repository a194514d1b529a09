//! Watching-only export command

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;

use super::{open_wallet, print_success, unlock_passphrase};

/// Run the watching-only command
pub fn run(config: &Config, wallet: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let wallet = open_wallet(config, wallet)?;
    let passphrase = unlock_passphrase(&wallet, "Enter wallet password: ")?;

    let copy = wallet.create_watching_only(&passphrase)?;
    let dir = output.unwrap_or(&config.wallet_dir);
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = copy.persist_to(dir)?;

    print_success("Watching-only wallet exported.");
    println!("Saved to: {}", path.display());
    Ok(())
}
