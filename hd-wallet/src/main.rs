//! BIP44 HD wallet CLI
//!
//! Creates and inspects encrypted BIP44 wallet files.

use anyhow::Result;
use bth_hd_wallet::{commands, config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bth-hd-wallet")]
#[command(about = "BIP44 HD wallet - derive addresses and manage encrypted wallet files")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Wallet file to operate on
    #[arg(short, long, global = true)]
    wallet: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new wallet
    Init {
        /// Restore from hex-encoded seed entropy
        #[arg(long, conflicts_with = "import_xprv")]
        import_seed: Option<String>,

        /// Restore from an extended private key (xprv/tprv)
        #[arg(long)]
        import_xprv: Option<String>,

        /// Store the root unencrypted
        #[arg(long)]
        no_password: bool,

        /// Wallet name
        #[arg(long, default_value = "Wallet")]
        name: String,
    },

    /// Show wallet structure
    Info,

    /// Hand out a new address
    Address {
        /// Coin type of the group (defaults to XBT of the wallet network)
        #[arg(long)]
        group: Option<u32>,

        /// Leaf (account) index
        #[arg(long, default_value = "0")]
        leaf: u32,

        /// Use the internal (change) branch
        #[arg(long)]
        internal: bool,

        /// Address type: p2pkh, p2wpkh, p2sh-p2wpkh
        #[arg(long = "type")]
        address_type: Option<String>,
    },

    /// Find which leaf and path an address belongs to
    Lookup {
        address: String,
    },

    /// Re-encrypt the wallet root under a new password
    ChangePassword {
        /// Remove encryption instead of setting a new password
        #[arg(long)]
        no_password: bool,
    },

    /// Export a public-only copy of the wallet
    WatchingOnly {
        /// Directory to write the copy to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Attach a comment to an address (empty text removes it)
    Comment {
        address: String,
        text: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = config::Config::load_or_default(&config_path)?;
    let wallet = cli.wallet.as_deref();

    match cli.command {
        Commands::Init {
            import_seed,
            import_xprv,
            no_password,
            name,
        } => commands::init::run(
            &config,
            &name,
            import_seed.as_deref(),
            import_xprv.as_deref(),
            no_password,
        ),
        Commands::Info => commands::info::run(&config, wallet),
        Commands::Address {
            group,
            leaf,
            internal,
            address_type,
        } => commands::address::run(&config, wallet, group, leaf, internal, address_type.as_deref()),
        Commands::Lookup { address } => commands::lookup::run(&config, wallet, &address),
        Commands::ChangePassword { no_password } => {
            commands::change_password::run(&config, wallet, no_password)
        }
        Commands::WatchingOnly { output } => {
            commands::watching_only::run(&config, wallet, output.as_deref())
        }
        Commands::Comment { address, text } => commands::comment::run(&config, wallet, &address, &text),
    }
}
