//! Password change command

use anyhow::{bail, Result};
use std::path::Path;

use crate::{config::Config, Error, PasswordData};

use super::{open_wallet, print_success, print_warning, prompt_confirm, prompt_new_password, unlock_passphrase};

/// Run the change-password command
pub fn run(config: &Config, wallet: Option<&Path>, no_password: bool) -> Result<()> {
    let wallet = open_wallet(config, wallet)?;
    let old = unlock_passphrase(&wallet, "Enter current password: ")?;

    let passwords = if no_password {
        print_warning("The wallet root will be stored unencrypted");
        if !prompt_confirm("Remove the wallet password?")? {
            println!("Aborted.");
            return Ok(());
        }
        Vec::new()
    } else {
        let password = prompt_new_password()?;
        vec![PasswordData::password(password.as_bytes())]
    };

    match wallet.change_password(&passwords, (1, 1), &old) {
        Ok(()) => {}
        Err(Error::WrongOldPassword) => bail!("Current password is wrong"),
        Err(err) => return Err(err.into()),
    }

    print_success("Password changed.");
    Ok(())
}
