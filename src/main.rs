//! Marketplace bot operator CLI
//!
//! Registers bots and users, checks bot logins and runs one-off sweeper passes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use cstrade_bot::services::{BotPool, ReservationSweeper};
use cstrade_bot::steam::{generate_guard_code, SessionManager};
use cstrade_bot::store::OfferStore;
use cstrade_bot::types::{BotCredentials, User};
use cstrade_bot::{Config, Database};
use futures::future::join_all;
use std::env;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cstrade-bot")]
#[command(about = "Operator tools for the marketplace trading bots")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a bot account (secrets from BOT_PASSWORD, BOT_SHARED_SECRET, BOT_IDENTITY_SECRET, BOT_DEVICE_ID)
    AddBot {
        /// Bot id (the account's 64-bit id)
        #[arg(long)]
        bot_id: String,

        /// Login name
        #[arg(long)]
        account_name: String,
    },

    /// Register a user or update their trade URL
    AddUser {
        #[arg(long)]
        steam_id: String,

        #[arg(long)]
        username: String,

        #[arg(long)]
        trade_url: String,
    },

    /// Print the current guard code of a stored bot
    GuardCode {
        #[arg(long)]
        bot_id: String,
    },

    /// Log every stored bot in and report the outcome
    Login,

    /// Run one reservation sweeper pass
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let db = Database::new(&config.database_path)
        .await
        .with_context(|| format!("opening {}", config.database_path))?;

    match cli.command {
        Commands::AddBot { bot_id, account_name } => add_bot(&config, &db, bot_id, account_name).await?,
        Commands::AddUser { steam_id, username, trade_url } => {
            add_user(&db, User { steam_id, username, trade_url }).await?
        }
        Commands::GuardCode { bot_id } => guard_code(&config, &db, &bot_id).await?,
        Commands::Login => login_all(&config, &db).await?,
        Commands::Sweep => sweep(&config, db).await?,
    }

    Ok(())
}

fn required_env(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{} must be set", name))
}

async fn add_bot(config: &Config, db: &Database, bot_id: String, account_name: String) -> Result<()> {
    let credentials = BotCredentials {
        bot_id,
        account_name,
        password: required_env("BOT_PASSWORD")?,
        shared_secret: required_env("BOT_SHARED_SECRET")?,
        identity_secret: required_env("BOT_IDENTITY_SECRET")?,
        device_id: required_env("BOT_DEVICE_ID")?,
    };

    // A secret that cannot produce a code is caught now, not at the first login
    cstrade_bot::steam::guard_code_at(&credentials.shared_secret, 0)
        .context("BOT_SHARED_SECRET is not a valid shared secret")?;

    db.add_bot(&credentials, config.passphrase()?).await?;
    println!("{} bot {} ({})", "Stored".green(), credentials.bot_id, credentials.account_name);
    Ok(())
}

async fn add_user(db: &Database, user: User) -> Result<()> {
    cstrade_bot::steam::TradeUrl::parse(&user.trade_url)?;
    db.upsert_user(&user).await?;
    println!("{} user {} ({})", "Stored".green(), user.steam_id, user.username);
    Ok(())
}

async fn load_bots(config: &Config, db: &Database) -> Result<Vec<BotCredentials>> {
    let bots = db.load_bots(config.passphrase()?).await?;
    if bots.is_empty() {
        println!("{}", "No bots stored, add one with `add-bot`".yellow());
    }
    Ok(bots)
}

async fn guard_code(config: &Config, db: &Database, bot_id: &str) -> Result<()> {
    let credentials = load_bots(config, db)
        .await?
        .into_iter()
        .find(|bot| bot.bot_id == bot_id)
        .with_context(|| format!("bot {} is not stored", bot_id))?;

    let shared_secret = credentials.shared_secret.clone();
    let manager = SessionManager::new(credentials, config.session_settings())?;
    let code = generate_guard_code(&shared_secret, &manager.clock()).await?;
    println!("{}", code.bold());
    Ok(())
}

async fn login_all(config: &Config, db: &Database) -> Result<()> {
    let bots = load_bots(config, db).await?;
    let total = bots.len();

    let logins = bots.into_iter().map(|credentials| async move {
        let bot_id = credentials.bot_id.clone();
        let result = match SessionManager::new(credentials, config.session_settings()) {
            Ok(manager) => manager.login().await,
            Err(e) => Err(e),
        };
        (bot_id, result)
    });

    let mut logged_in = 0;
    for (bot_id, result) in join_all(logins).await {
        match result {
            Ok(session) => {
                logged_in += 1;
                debug!("{} session id {}", bot_id, session.session_id());
                println!("  {} {}", "OK    ".green(), bot_id);
            }
            Err(e) => println!("  {} {} [{}] {}", "FAILED".red(), bot_id, e.reason(), e),
        }
    }

    println!("\n{}/{} bots logged in", logged_in, total);
    Ok(())
}

async fn sweep(config: &Config, db: Database) -> Result<()> {
    let db = Arc::new(db);
    let bots = load_bots(config, &db).await?;
    let pool = Arc::new(BotPool::initialize(bots, config.session_settings()).await);
    pool.seed_loads(&db.reserved_counts().await?);

    let sweeper = ReservationSweeper::new(db, pool, config.sweep_interval());
    let report = sweeper.sweep_once().await?;
    println!(
        "Released {} expired reservations, {} left reserved",
        report.released.to_string().green(),
        report.kept.to_string().yellow()
    );
    Ok(())
}
