// ===============================
// src/sequence.rs
// ===============================
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::domain::{Tick, Window};
use crate::metrics::WINDOWS;

/// Groups ticks for one instrument into back-to-back windows of `len`.
#[derive(Debug)]
pub struct SequenceBuffer {
    instrument: String,
    len: usize,
    acc: Vec<Tick>,
}

impl SequenceBuffer {
    pub fn new(instrument: &str, len: usize) -> Self {
        let len = len.max(1);
        Self { instrument: instrument.to_string(), len, acc: Vec::with_capacity(len) }
    }

    pub fn pending(&self) -> usize { self.acc.len() }

    /// Returns a window each time `len` ticks have accumulated. Other instruments are skipped.
    pub fn push(&mut self, tick: Tick) -> Option<Window> {
        if !tick.product_id.eq_ignore_ascii_case(&self.instrument) {
            debug!(product = %tick.product_id, expected = %self.instrument, "tick for other instrument");
            return None;
        }
        self.acc.push(tick);
        if self.acc.len() < self.len {
            return None;
        }
        let ticks = std::mem::replace(&mut self.acc, Vec::with_capacity(self.len));
        Some(Window::new(self.instrument.clone(), ticks))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorExit {
    Shutdown,
    StreamEnded,
    ConsumerGone,
}

/// Collector stage: ticks in, windows out, until shutdown or either side closes.
/// Any partial window is dropped on exit.
pub async fn run(
    mut ticks: mpsc::Receiver<Tick>,
    mut buffer: SequenceBuffer,
    windows: mpsc::Sender<Window>,
    mut shutdown: watch::Receiver<bool>,
) -> CollectorExit {
    let exit = loop {
        if *shutdown.borrow() {
            break CollectorExit::Shutdown;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break CollectorExit::Shutdown;
                }
            }
            tick = ticks.recv() => {
                let Some(tick) = tick else { break CollectorExit::StreamEnded };
                if let Some(window) = buffer.push(tick) {
                    WINDOWS.inc();
                    if windows.send(window).await.is_err() {
                        break CollectorExit::ConsumerGone;
                    }
                }
            }
        }
    };
    info!(?exit, discarded = buffer.pending(), "collector stopped");
    exit
}
