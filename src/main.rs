// ===============================
// src/main.rs
// ===============================
/*
 # exporter
 curl -s localhost:9898/metrics | egrep '^(orders_total|position_contracts|ws_connected)'

 # decisions per action
 curl -s localhost:9898/metrics | grep '^decisions_total'
*/
/*
=============================================================================
Project : krakenbot, async futures trading bot in Rust
Module  : main.rs
License : MIT (see LICENSE)

Summary : Streams Kraken Futures ticker data, batches it into fixed windows,
          asks a served model for a score, trades IOC orders within a
          position cap, journals fills to JSONL, notifies over Telegram and
          exposes Prometheus metrics.
=============================================================================
*/
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use krakenbot::bot::Bot;
use krakenbot::config;
use krakenbot::feed::{StreamSettings, StreamingClient};
use krakenbot::gateway_kraken::RestClient;
use krakenbot::kraken::{ApiKeys, KrakenApi};
use krakenbot::metrics;
use krakenbot::notify::{LogNotifier, TelegramNotifier};
use krakenbot::ports::Notifier;
use krakenbot::posttrade::NotificationTemplate;
use krakenbot::predictor::ModelClient;
use krakenbot::recorder::JournalStorage;

const JOURNAL_QUEUE: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "krakenbot", version, about = "Kraken Futures window-model trading bot")]
struct Cli {
    /// Read settings from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Overrides METRICS_PORT
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    // ---- Load config (also pulls RUST_LOG from .env) ----
    let settings = config::load(cli.env_file.as_deref())?;

    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Metrics ----
    let metrics_port = cli.metrics_port.unwrap_or(settings.metrics_port);
    metrics::init();
    tokio::spawn(metrics::serve_metrics(metrics_port));

    info!(
        instrument = %settings.params.instrument,
        rest = %settings.kraken.rest_url,
        ws = %settings.kraken.ws_url,
        predictor = %settings.predictor_url,
        journal = %settings.record_file,
        metrics_port,
        "startup config"
    );

    // ---- Exchange ----
    let keys = ApiKeys::new(&settings.kraken.public_key, &settings.kraken.private_key)?;
    let rest = RestClient::new(&settings.kraken.rest_url, keys, settings.kraken.rest_timeout)?;
    let stream = StreamingClient::new(StreamSettings {
        url: settings.kraken.ws_url.clone(),
        feed: settings.kraken.feed.clone(),
        reconnect_attempts: settings.kraken.reconnect_attempts,
        backoff: settings.kraken.backoff,
        connect_timeout: settings.kraken.connect_timeout,
        ..StreamSettings::default()
    });
    let exchange = Arc::new(KrakenApi::new(rest, stream));

    // ---- Collaborators ----
    let predictor = Arc::new(ModelClient::new(&settings.predictor_url, settings.predictor_timeout)?);
    let (storage, journal) = JournalStorage::spawn(&settings.record_file, JOURNAL_QUEUE).await?;
    let notifier: Arc<dyn Notifier> = match &settings.telegram {
        Some(tg) => Arc::new(TelegramNotifier::new(&tg.token, tg.chat_ids.clone(), tg.queue_size)),
        None => {
            warn!("TELEGRAM_TOKEN not set, notifications go to the log");
            Arc::new(LogNotifier)
        }
    };

    let bot = Bot::new(
        exchange,
        notifier,
        Arc::new(storage),
        predictor,
        settings.params.clone(),
        NotificationTemplate::default(),
    )?;
    bot.start().await?;

    {
        let done = bot.wait();
        tokio::pin!(done);
        tokio::select! {
            _ = &mut done => info!("pipeline ended"),
            res = signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "ctrl-c listener failed");
                }
                info!("shutdown requested");
                bot.stop();
                done.await;
            }
        }
    }

    info!(positions = ?bot.positions().snapshot().await, "final positions");
    drop(bot);
    // journal task flushes and exits once the last storage handle is gone
    if let Err(e) = journal.await {
        warn!(error = %e, "journal task failed");
    }
    Ok(())
}
