// ===============================
// src/recorder.rs
// ===============================
//
// Append-only JSONL journal of placed orders:
// - One row per stored order event, newline terminated.
// - BufWriter, flushed every second and every 1000 rows.
// - Parent directory is created on open.
// - A failed write triggers one reopen + retry; the row is dropped after that.
//
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::OrderEvent;
use crate::ports::{Storage, StorageError};

const FLUSH_EVERY_N_ROWS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRow {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub order_price: f64,
    pub order_size: f64,
    pub actual_price: f64,
    pub actual_amount: f64,
    pub timestamp: DateTime<Utc>,
}

impl OrderRow {
    pub fn from_event(event: &OrderEvent) -> Self {
        let snap = event.snapshot().cloned().unwrap_or_default();
        let timestamp = snap
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Self {
            symbol: snap.symbol,
            side: snap.side,
            order_type: snap.order_type,
            order_price: snap.limit_price,
            order_size: snap.quantity,
            actual_price: event.price.unwrap_or(0.0),
            actual_amount: event.amount.unwrap_or(0.0),
            timestamp,
        }
    }
}

async fn open_writer(path: &Path) -> std::io::Result<BufWriter<fs::File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_row(writer: &mut BufWriter<fs::File>, line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line).await?;
    writer.write_all(b"\n").await
}

async fn run(mut rx: mpsc::Receiver<OrderRow>, path: PathBuf, mut writer: BufWriter<fs::File>) {
    info!(path = %path.display(), "journal started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_row = rx.recv() => {
                let Some(row) = maybe_row else {
                    let _ = writer.flush().await;
                    info!("journal closed");
                    break;
                };
                let line = match serde_json::to_vec(&row) {
                    Ok(l) => l,
                    Err(e) => {
                        error!(error = %e, "journal: serialize failed, row skipped");
                        continue;
                    }
                };
                if let Err(e) = write_row(&mut writer, &line).await {
                    warn!(error = %e, "journal: write failed, reopening");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e) => {
                            error!(error = %e, "journal: reopen failed, row dropped");
                            continue;
                        }
                    }
                    if let Err(e) = write_row(&mut writer, &line).await {
                        error!(error = %e, "journal: write failed after reopen, row dropped");
                        continue;
                    }
                }
                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_ROWS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }
            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

/// `Storage` backed by the JSONL journal task.
#[derive(Clone)]
pub struct JournalStorage {
    tx: mpsc::Sender<OrderRow>,
}

impl JournalStorage {
    /// Opens the file up front so a bad path fails at startup. The task ends
    /// (after a final flush) once every clone of the storage is dropped.
    pub async fn spawn(path: impl AsRef<Path>, capacity: usize) -> Result<(Self, JoinHandle<()>), StorageError> {
        let path = path.as_ref().to_path_buf();
        let writer = open_writer(&path).await?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(rx, path, writer));
        Ok((Self { tx }, handle))
    }
}

#[async_trait]
impl Storage for JournalStorage {
    async fn store_event(&self, event: &OrderEvent) -> Result<(), StorageError> {
        self.tx.try_send(OrderRow::from_event(event)).map_err(|e| match e {
            TrySendError::Full(_) => StorageError::QueueFull,
            TrySendError::Closed(_) => StorageError::Closed,
        })
    }
}
