//! CLI Commands
//!
//! Implementation of all wallet CLI commands.

pub mod address;
pub mod change_password;
pub mod comment;
pub mod info;
pub mod init;
pub mod lookup;
pub mod watching_only;

use anyhow::{anyhow, bail, Context, Result};
use bth_crypto_hd::EncryptionType;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::{config::Config, Wallet};

/// Prompt for password input (hidden)
pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let password = rpassword::read_password()?;
    Ok(Zeroizing::new(password))
}

/// Prompt for a new password twice
pub fn prompt_new_password() -> Result<Zeroizing<String>> {
    loop {
        let password = prompt_password("Enter new password: ")?;
        if password.is_empty() {
            print_warning("Password must not be empty (use --no-password for an unencrypted wallet)");
            continue;
        }
        let confirm = prompt_password("Confirm password: ")?;
        if *password == *confirm {
            return Ok(password);
        }
        print_error("Passwords do not match");
    }
}

/// Prompt for confirmation
pub fn prompt_confirm(message: &str) -> Result<bool> {
    print!("{} [y/N]: ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}

/// Resolve the wallet file to use.
///
/// An explicit `--wallet` wins; otherwise the wallet directory must hold
/// exactly one wallet file.
pub fn locate_wallet(config: &Config, wallet: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = wallet {
        if !path.exists() {
            bail!("Wallet file not found: {}", path.display());
        }
        return Ok(path.to_path_buf());
    }

    let dir = &config.wallet_dir;
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("No wallets found in {} (run `init` first)", dir.display()))?;
    let mut found = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "lmdb") {
            found.push(path);
        }
    }
    found.sort();

    match found.len() {
        0 => Err(anyhow!("No wallets found in {} (run `init` first)", dir.display())),
        1 => Ok(found.remove(0)),
        _ => {
            let names: Vec<String> = found.iter().map(|p| p.display().to_string()).collect();
            Err(anyhow!(
                "Several wallets in {}, pick one with --wallet:\n  {}",
                dir.display(),
                names.join("\n  ")
            ))
        }
    }
}

/// Open the wallet selected by `wallet` and report load defects.
pub fn open_wallet(config: &Config, wallet: Option<&Path>) -> Result<Wallet> {
    let path = locate_wallet(config, wallet)?;
    let wallet = Wallet::open(&path, config.wallet_settings()?)
        .with_context(|| format!("Failed to open wallet {}", path.display()))?;

    for defect in wallet.load_defects() {
        print_warning(&format!("Skipped damaged wallet data at {defect}"));
    }
    Ok(wallet)
}

/// Passphrase for `wallet`, prompting only if the root is encrypted.
pub fn unlock_passphrase(wallet: &Wallet, prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    if wallet.is_watching_only() {
        bail!("Wallet is watching-only");
    }
    if wallet.encryption_types() == [EncryptionType::Unencrypted] {
        return Ok(Zeroizing::new(Vec::new()));
    }
    let password = prompt_password(prompt)?;
    Ok(Zeroizing::new(password.as_bytes().to_vec()))
}
