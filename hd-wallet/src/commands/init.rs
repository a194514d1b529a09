//! Wallet initialization command

use anyhow::{Context, Result};
use bth_crypto_hd::Seed;
use zeroize::Zeroizing;

use crate::{config::Config, PasswordData, Wallet};

use super::{print_success, print_warning, prompt_new_password};

/// Run the init command
pub fn run(
    config: &Config,
    name: &str,
    import_seed: Option<&str>,
    import_xprv: Option<&str>,
    no_password: bool,
) -> Result<()> {
    let network = config.network()?;
    let settings = config.wallet_settings()?;

    let restored = import_seed.is_some() || import_xprv.is_some();
    let seed = if let Some(hex_seed) = import_seed {
        let entropy = Zeroizing::new(hex::decode(hex_seed.trim()).context("Seed must be hex")?);
        Seed::from_entropy(entropy.to_vec(), network)
    } else if let Some(xprv) = import_xprv {
        Seed::from_extended_private_key(xprv).context("Invalid extended private key")?
    } else {
        Seed::random(network)
    };

    let passwords = if no_password {
        print_warning("The wallet root will be stored unencrypted");
        Vec::new()
    } else {
        let password = prompt_new_password()?;
        vec![PasswordData::password(password.as_bytes())]
    };
    let passphrase = passwords
        .first()
        .map(|p| p.password.clone())
        .unwrap_or_default();

    println!();
    println!("Deriving keys...");
    let wallet = Wallet::create(name, "", &seed, &passwords, settings)?;
    let leaf = wallet.create_structure(&passphrase)?;
    let address = leaf.new_external_address(None)?;

    std::fs::create_dir_all(&config.wallet_dir)
        .with_context(|| format!("Failed to create {}", config.wallet_dir.display()))?;
    let path = wallet.persist_to(&config.wallet_dir)?;

    println!();
    print_success("Wallet created successfully!");
    println!();
    println!("Wallet id:  {}", wallet.wallet_id());
    println!("Network:    {}", wallet.network());
    println!("Account:    {}", leaf.path());
    println!();
    println!("Your receiving address:");
    println!("  {}", address);
    println!();
    println!("Wallet saved to: {}", path.display());

    if !restored {
        if let Some(entropy) = seed.entropy() {
            println!();
            println!("Your seed (hex):");
            println!("  {}", Zeroizing::new(hex::encode(entropy)).as_str());
            println!();
            print_warning("IMPORTANT: Write down your seed and store it safely!");
            print_warning("Anyone with this seed can access your funds.");
        }
    }

    Ok(())
}
