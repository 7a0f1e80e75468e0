//! ATLINK command-line entrypoint

use anyhow::Context;
use atlink::config::StateFile;
use atlink::discovery::DiscoveredAccount;
use atlink::transaction::hex_quantity;
use atlink::{
    AtlinkConfig, BridgeKeyring, EthAddress, HdPath, HostKeyring, Transaction, UnlockOutcome,
    logging,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "atlink",
    version,
    about = "AT.Wallet card keyring over the local bridge"
)]
struct Cli {
    /// Optional configuration file (toml/yaml). Defaults to atlink.{toml,yaml} in cwd/XDG config.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the bridge WebSocket URL
    #[arg(long, value_name = "URL")]
    bridge_url: Option<String>,

    /// Override the keyring state file
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,

    /// Output results as formatted JSON instead of human-readable text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Load the extended key and print the address at the HD path
    Unlock {
        /// Full path such as m/44'/60'/0'/0/0 (defaults to the configured path)
        #[arg(long, value_name = "PATH")]
        path: Option<HdPath>,
    },
    /// Browse discovery pages
    Page {
        /// Which page to fetch
        #[arg(value_enum, default_value_t = PageMove::First)]
        which: PageMove,
    },
    /// Register accounts with the card
    Add {
        /// Number of accounts
        #[arg(default_value_t = 1)]
        count: u32,
        /// First account index
        #[arg(long, value_name = "INDEX")]
        from: Option<u32>,
    },
    /// Stop tracking an account
    Remove {
        /// Account address
        address: String,
    },
    /// List tracked accounts
    Accounts,
    /// Sign a legacy transaction read from a JSON file
    Sign {
        /// Sender address
        address: String,
        /// Transaction JSON (to, value, data, chainId, nonce, gasLimit, gasPrice)
        tx_file: PathBuf,
    },
    /// Wipe tracked accounts and keys
    Forget,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PageMove {
    First,
    Next,
    Previous,
}

struct Output {
    json: bool,
}

impl Output {
    fn emit(&self, value: Value, human: Vec<String>) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            for line in human {
                println!("{line}");
            }
        }
        Ok(())
    }

    fn accounts(&self, accounts: &[EthAddress]) -> anyhow::Result<()> {
        let human = if accounts.is_empty() {
            vec!["No accounts tracked".to_string()]
        } else {
            accounts.iter().map(|a| a.to_checksum()).collect()
        };
        self.emit(json!({ "accounts": accounts }), human)
    }

    fn page(&self, page: &[DiscoveredAccount]) -> anyhow::Result<()> {
        let human = page
            .iter()
            .map(|entry| format!("  [{}] {}", entry.index, entry.address))
            .collect();
        self.emit(json!({ "page": page }), human)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AtlinkConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.bridge_url.clone() {
        config.bridge.url = url;
    }
    if let Some(path) = cli.state_file.clone() {
        config.state_file = StateFile(path);
    }

    logging::init(&config.logging)?;
    info!(bridge = %config.bridge.url, "Starting ATLINK");

    let keyring = BridgeKeyring::from_config(&config)?;
    if let Some(state) = config.state_file.load()? {
        keyring.deserialize(state).await?;
    }

    let output = Output { json: cli.json };
    let outcome = run(&keyring, cli.command, &output).await;

    // accounts committed before a failure are still saved
    let state = keyring.serialize().await?;
    config
        .state_file
        .save(&state)
        .with_context(|| format!("writing keyring state {}", config.state_file.path().display()))?;
    outcome
}

async fn run(keyring: &BridgeKeyring, action: Action, output: &Output) -> anyhow::Result<()> {
    match action {
        Action::Unlock { path } => match keyring.unlock(path.as_ref()).await? {
            UnlockOutcome::AlreadyUnlocked => {
                output.emit(json!({ "status": "already unlocked" }), vec!["already unlocked".into()])
            }
            UnlockOutcome::Unlocked(address) => {
                output.emit(json!({ "address": address }), vec![address.to_checksum()])
            }
        },
        Action::Page { which } => {
            let page = match which {
                PageMove::First => keyring.get_first_page().await?,
                PageMove::Next => keyring.get_next_page().await?,
                PageMove::Previous => keyring.get_previous_page().await?,
            };
            output.page(&page)
        }
        Action::Add { count, from } => {
            if let Some(index) = from {
                keyring.set_account_to_unlock(index).await?;
            }
            let accounts = keyring.add_accounts(count).await?;
            output.accounts(&accounts)
        }
        Action::Remove { address } => {
            keyring.remove_account(&address).await?;
            output.accounts(&keyring.get_accounts().await?)
        }
        Action::Accounts => output.accounts(&keyring.get_accounts().await?),
        Action::Sign { address, tx_file } => {
            let raw = std::fs::read_to_string(&tx_file)
                .with_context(|| format!("reading {}", tx_file.display()))?;
            let tx: Transaction = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", tx_file.display()))?;

            let signed = keyring.sign_transaction(&address, &tx).await?;
            let raw_hex = format!("0x{}", hex::encode(signed.raw()));
            let hash = format!("{:?}", signed.hash());
            output.emit(
                json!({
                    "hash": hash,
                    "raw": raw_hex,
                    "v": signed.v,
                    "r": hex_quantity(signed.r),
                    "s": hex_quantity(signed.s),
                }),
                vec![format!("hash: {hash}"), format!("raw:  {raw_hex}")],
            )
        }
        Action::Forget => {
            keyring.forget_device().await;
            output.emit(json!({ "forgotten": true }), vec!["Device forgotten".into()])
        }
    }
}
