//! Wallet structure display

use anyhow::Result;
use std::path::Path;

use crate::config::Config;

use super::open_wallet;

/// Run the info command
pub fn run(config: &Config, wallet: Option<&Path>) -> Result<()> {
    let wallet = open_wallet(config, wallet)?;
    let (m, n) = wallet.key_rank();

    println!();
    println!("Name:          {}", wallet.name());
    println!("Wallet id:     {}", wallet.wallet_id());
    println!("Network:       {}", wallet.network());
    if wallet.is_watching_only() {
        println!("Encryption:    none (watching-only)");
    } else {
        let types: Vec<String> = wallet
            .encryption_types()
            .iter()
            .map(|t| format!("{t:?}"))
            .collect();
        println!("Encryption:    {} ({m}-of-{n})", types.join(", "));
    }
    println!("Primary:       {}", if wallet.is_primary() { "yes" } else { "no" });

    for group in wallet.groups() {
        println!();
        println!("Group {} ({})", group.path(), group.policy().name());
        for leaf in group.leaves() {
            println!(
                "  {}  used: {:>4} (ext {}, int {})  pooled: {:>4}  state: {:?}",
                leaf.path(),
                leaf.used_addresses().len(),
                leaf.external_addresses().len(),
                leaf.internal_addresses().len(),
                leaf.pooled_addresses().len(),
                leaf.state(),
            );
        }
    }
    println!();

    Ok(())
}
