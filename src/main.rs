use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use app::database::{self, seed_system_account};
use app::ledger::PgLedger;
use app::notify::Broadcaster;
use app::service::HistoryKind;
use app::transfer::TransferRequest;
use app::user::{Email, NewUser};
use app::{Funds, QueryRange};
use clap::{Parser, Subcommand, ValueEnum};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Deserialize)]
struct Config {
    database_url: Url,
    #[serde(default = "default_max_connections")]
    max_connections: u32,
    #[serde(default = "default_workers")]
    workers: usize,
    system_account: SystemAccountConfig,
}

#[derive(Debug, Deserialize)]
struct SystemAccountConfig {
    email: String,
    first_name: String,
    last_name: String,
}

impl SystemAccountConfig {
    fn into_new_user(self) -> NewUser {
        NewUser {
            email: Email(self.email),
            first_name: self.first_name,
            last_name: self.last_name,
            profile_picture: None,
            // The system user never logs in.
            credential_hash: String::new(),
            email_verified: true,
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_workers() -> usize {
    4
}

/// Operator tool for the funds ledger
#[derive(Parser)]
#[command(name = "funds", version, about, long_about = None)]
struct Cli {
    /// Configuration file, merged with FUNDS_* environment variables
    #[arg(long, env = "FUNDS_CONFIG", default_value = "Funds.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the system account if it does not exist yet
    Seed,

    /// Send money to another account
    Transfer {
        /// Email of the sender
        email: String,
        /// Account number of the recipient
        account: String,
        amount: i32,
    },

    /// Borrow money from the system account
    Borrow {
        email: String,
        amount: i32,
    },

    /// Show the current balance of a user
    Balance {
        email: String,
    },

    /// List ledger rows of a user, newest first
    History {
        email: String,
        #[arg(long, value_enum, default_value = "received")]
        kind: Kind,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Check a user's balance against the ledger
    Reconcile {
        email: String,
    },

    /// Run independent transfers concurrently, one `email,account,amount` line each
    Batch {
        file: PathBuf,
        /// Number of workers, overrides the configured value
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Received,
    Sent,
    Borrowed,
}

impl From<Kind> for HistoryKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Received => HistoryKind::Received,
            Kind::Sent => HistoryKind::Sent,
            Kind::Borrowed => HistoryKind::Borrowed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let db = database::connect(&config.database_url, config.max_connections)
        .await
        .context("could not connect to the database")?;
    let ledger = Arc::new(PgLedger::new(db));
    let system = config.system_account.into_new_user();

    let ctx = CancellationToken::new();
    let on_interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    if let Command::Seed = cli.command {
        let holder = seed_system_account(ledger.as_ref(), ledger.as_ref(), &system).await?;
        println!("system account {}", holder.account.number);
        return Ok(());
    }

    let funds = Funds::new(
        ledger.clone(),
        ledger,
        Broadcaster::new(),
        system.email.clone(),
    );

    match cli.command {
        Command::Seed => {}
        Command::Transfer {
            email,
            account,
            amount,
        } => {
            let receipt = funds
                .transfer(&ctx, &Email(email), amount, &account)
                .await
                .map_err(|e| anyhow::anyhow!("transfer failed [{}]: {}", e.code(), e))?;
            println!("transaction {}", receipt.transaction.0);
        }
        Command::Borrow { email, amount } => {
            let receipt = funds
                .borrow(&ctx, &Email(email), amount)
                .await
                .map_err(|e| anyhow::anyhow!("borrow failed [{}]: {}", e.code(), e))?;
            println!("transaction {}", receipt.transaction.0);
        }
        Command::Balance { email } => {
            println!("{}", funds.balance(&Email(email)).await?);
        }
        Command::History {
            email,
            kind,
            limit,
            offset,
        } => {
            let rows = funds
                .history(&Email(email), kind.into(), QueryRange { limit, offset })
                .await?;
            for row in rows {
                println!(
                    "{}\t{}\t{} -> {}\t{}",
                    row.id.0,
                    row.sent_at.to_rfc3339(),
                    row.sender.0,
                    row.receiver.0,
                    row.amount
                );
            }
        }
        Command::Reconcile { email } => {
            let report = funds.reconcile(&Email(email)).await?;
            println!(
                "balance {}, ledger {}, difference {}",
                report.balance,
                report.projected,
                report.difference()
            );
            if !report.is_consistent() {
                bail!("balance of {} does not match the ledger", report.email);
            }
        }
        Command::Batch { file, workers } => {
            let input = std::fs::read_to_string(&file)
                .with_context(|| format!("could not read {}", file.display()))?;
            let requests = parse_batch(&input)?;
            let report = funds
                .transfer_batch(&ctx, requests, workers.unwrap_or(config.workers))
                .await;
            for (id, outcome) in report.results() {
                match outcome {
                    Ok(receipt) => println!("{}\tok\ttransaction {}", id, receipt.transaction.0),
                    Err(e) => println!("{}\tfailed\t{}", id, e),
                }
            }
            if !report.all_succeeded() {
                bail!("{} of {} transfers failed", report.failures().count(), report.len());
            }
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("FUNDS_").split("__"))
        .extract()
        .context("invalid configuration")
}

/// Parses `email,account,amount` lines. Blank lines and lines starting with `#` are skipped.
fn parse_batch(input: &str) -> Result<Vec<TransferRequest>> {
    let mut requests = Vec::new();
    for (number, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [email, account, amount] = fields[..] else {
            bail!("line {}: expected email,account,amount", number + 1);
        };
        let amount = amount
            .parse()
            .with_context(|| format!("line {}: invalid amount {:?}", number + 1, amount))?;
        requests.push(TransferRequest {
            sender: Email(email.to_owned()),
            amount,
            account_number: account.to_owned(),
        });
    }
    Ok(requests)
}
