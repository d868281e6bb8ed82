// ===============================
// src/main.rs
// ===============================
/*
 cd /home/kukuhtw/rust/lb_tracker_rust

 # siapkan .env + user_addresses.json
 cargo run -- setup

 # jalankan tracker
 cargo run -- run

 # cek metrics
curl -s localhost:9899/metrics | egrep '^(poll_cycles_total|tracked_identifiers|notifications_total)'

*/
/*
=============================================================================
Project : lb_tracker_rust — Binance Futures leaderboard position tracker
Module  : main.rs
Version : 0.5.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Polls tracked leaderboard traders, diffs their open positions,
          pushes opened/closed/listing notifications to Telegram, accepts
          /add /remove /list admin commands, exposes Prometheus metrics.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
mod domain;
mod config;
mod metrics;
mod format;
mod snapshot;
mod store;
mod registry;
mod ports;
mod leaderboard;      // Binance leaderboard REST (posisi, nickname, mark price)
mod telegram;         // Telegram Bot API via teloxide (sendMessage + getUpdates)
mod poller;
mod commands;
mod setup;
#[cfg(test)]
mod testkit;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::commands::{CommandCfg, CommandScheduler};
use crate::config::{LogFormat, Settings};
use crate::leaderboard::{BinanceLeaderboard, LeaderboardCfg};
use crate::poller::{Poller, PollerCfg};
use crate::registry::Registry;
use crate::store::JsonFileStore;
use crate::telegram::{TelegramBot, TelegramCfg};

#[derive(Parser, Debug)]
#[command(name = "lb_tracker_rust", version, about = "Binance leaderboard position tracker with Telegram alerts")]
struct Cli {
    /// File .env alternatif (default: ./.env bila ada)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Override IDENTIFIERS_FILE
    #[arg(long, global = true)]
    identifiers_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Jalankan tracker (default)
    Run,
    /// Wizard interaktif untuk membuat .env dan file identifier
    Setup,
}

fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Cmd::Setup) = cli.command {
        init_logging(&LogFormat::Pretty);
        let env_path = cli.env_file.unwrap_or_else(|| PathBuf::from(".env"));
        let ids_path = cli
            .identifiers_file
            .unwrap_or_else(|| PathBuf::from(config::DEFAULT_IDENTIFIERS_FILE));
        setup::execute(&env_path, &ids_path).context("setup failed")?;
        return Ok(());
    }

    // ---- Load config ----
    let settings = config::load(cli.env_file.as_deref(), cli.identifiers_file)
        .context("invalid configuration")?;

    // ---- Logging ----
    init_logging(&settings.log_format);

    // ---- Metrics ----
    metrics::init();
    if settings.metrics_port != 0 {
        metrics::serve_metrics(settings.metrics_port);
    }

    info!(
        identifiers_file = %settings.identifiers_file.display(),
        chat_id = settings.chat_id,
        admins = ?settings.admins,
        poll_interval_secs = settings.poll_interval.as_secs(),
        fetch_concurrency = settings.fetch_concurrency,
        binance_web = %settings.binance_web_url,
        binance_fapi = %settings.binance_fapi_url,
        "startup config"
    );

    run(settings).await
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    // ---- Registry (durable) ----
    let store = Arc::new(JsonFileStore::new(settings.identifiers_file.clone()));
    let registry = Arc::new(Registry::load(store));
    info!(tracked = registry.len(), "registry ready");

    // ---- Adapter ----
    let leaderboard = Arc::new(
        BinanceLeaderboard::new(LeaderboardCfg {
            web_url: settings.binance_web_url.clone(),
            fapi_url: settings.binance_fapi_url.clone(),
            cookie: settings.binance_cookie.clone(),
            user_agent: settings.binance_user_agent.clone(),
            request_timeout: settings.request_timeout,
        })
        .context("building leaderboard client")?,
    );
    let bot = Arc::new(
        TelegramBot::new(TelegramCfg {
            api_url: settings.telegram_api_url.clone(),
            bot_token: settings.bot_token.clone(),
            long_poll_timeout: settings.long_poll_timeout,
        })
        .context("building telegram client")?,
    );

    // ---- Position monitor ----
    let poller = Poller::new(
        registry.clone(),
        leaderboard.clone(),
        leaderboard.clone(),
        leaderboard.clone(),
        bot.clone(),
        PollerCfg {
            interval: settings.poll_interval,
            fetch_concurrency: settings.fetch_concurrency,
            chat_id: settings.chat_id,
        },
    );

    // ---- Command listener ----
    let scheduler = CommandScheduler::new(
        registry,
        bot.clone(),
        bot,
        leaderboard,
        CommandCfg {
            admins: settings.admins.clone(),
            retries: settings.poll_retries,
            retry_delay: settings.poll_retry_delay,
            idle_delay: Duration::from_secs(1),
        },
    );

    let mut poll_task = tokio::spawn(poller.run());
    let mut cmd_task = tokio::spawn(scheduler.run());

    // dua loop berjalan selamanya; keluar hanya bila salah satu panik atau Ctrl-C
    tokio::select! {
        res = &mut poll_task => {
            error!(?res, "position monitor stopped");
            cmd_task.abort();
            anyhow::bail!("position monitor stopped unexpectedly");
        }
        res = &mut cmd_task => {
            error!(?res, "command listener stopped");
            poll_task.abort();
            anyhow::bail!("command listener stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            poll_task.abort();
            cmd_task.abort();
        }
    }
    Ok(())
}
