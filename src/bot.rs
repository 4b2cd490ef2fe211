// ===============================
// src/bot.rs
// ===============================
//
// Wiring of one trading run:
//
//   exchange.subscribe ──ticks──▶ collector (sequence::run) ──windows──▶ processor
//                                                                         │
//                       decide ─▶ slipped price ─▶ change_position ─▶ post-trade
//
// The collector owns teardown: once the sequence stage exits it unsubscribes,
// waits for the processor, optionally cancels resting orders, stops the
// notifier and marks the bot stopped. Shutdown is a watch channel raised by `stop` or by the processor
// when its failure breaker trips.
//
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{ConfigError, Parameters};
use crate::domain::{OrderResponse, Side, Window};
use crate::error::{BotError, ExchangeError};
use crate::metrics::{ORDERS, WINDOW_FAILURES};
use crate::ports::{ExchangeApi, Notifier, PredictError, Predictor, Storage};
use crate::positions::PositionManager;
use crate::posttrade::{NotificationTemplate, PostTrade};
use crate::risk::FailureBreaker;
use crate::sequence::{self, SequenceBuffer};
use crate::strategy::DecisionEngine;

const WINDOW_QUEUE: usize = 16;

#[derive(Debug, Error)]
enum WindowError {
    #[error("prediction failed: {0}")]
    Predict(#[from] PredictError),
    #[error("order failed: {0}")]
    Exchange(#[from] ExchangeError),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("window has no ticks")]
    Empty,
}

/// Limit price pushed past the touch so an IOC order crosses the book.
pub fn slipped_price(window: &Window, side: Side, slip_percent: f64) -> Option<f64> {
    let last = window.last()?;
    Some(match side {
        Side::Buy => last.ask * (1.0 + slip_percent / 100.0),
        Side::Sell => last.bid * (1.0 - slip_percent / 100.0),
    })
}

fn outcome(resp: &OrderResponse) -> &'static str {
    if !resp.is_success() {
        "rejected"
    } else if resp.filled_amount() > 0 {
        "filled"
    } else {
        "unfilled"
    }
}

/// Per-window work shared with the processor task.
struct Pipeline {
    engine: DecisionEngine,
    predictor: Arc<dyn Predictor>,
    positions: Arc<PositionManager>,
    post: PostTrade,
    order_size: i64,
    slip_percent: f64,
}

impl Pipeline {
    async fn handle(&self, window: &Window) -> Result<(), WindowError> {
        let action = self.engine.decide(self.predictor.as_ref(), window).await?;
        let price = match action.side() {
            Some(side) => slipped_price(window, side, self.slip_percent).ok_or(WindowError::Empty)?,
            None => 0.0,
        };
        match self.positions.change_position(action, self.order_size, price).await {
            Ok(Some(resp)) => {
                ORDERS.with_label_values(&[outcome(&resp)]).inc();
                self.post.on_response(&resp).await;
                if !resp.is_success() {
                    return Err(WindowError::Rejected(resp.error_message().to_string()));
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                ORDERS.with_label_values(&["error"]).inc();
                self.post.on_failure(&e);
                Err(e.into())
            }
        }
    }
}

async fn process(
    pipeline: Arc<Pipeline>,
    mut windows: mpsc::Receiver<Window>,
    max_failures: u32,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut breaker = FailureBreaker::new(max_failures);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let window = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            w = windows.recv() => match w {
                Some(w) => w,
                None => break,
            },
        };
        match pipeline.handle(&window).await {
            Ok(()) => breaker.record_success(),
            Err(e) => {
                WINDOW_FAILURES.inc();
                error!(error = %e, "window processing failed");
                if let Err(trip) = breaker.record_failure() {
                    error!(error = %trip, "stopping bot");
                    shutdown_tx.send_replace(true);
                    break;
                }
            }
        }
    }
    info!("processor stopped");
}

struct Teardown {
    exchange: Arc<dyn ExchangeApi>,
    notifier: Arc<dyn Notifier>,
    cancel_on_stop: bool,
}

impl Teardown {
    async fn run(self, processor: JoinHandle<()>) {
        if let Err(e) = self.exchange.unsubscribe().await {
            warn!(error = %e, "unsubscribe failed");
        }
        if let Err(e) = processor.await {
            error!(error = %e, "processor task failed");
        }
        if self.cancel_on_stop {
            match self.exchange.cancel_orders().await {
                Ok(resp) if resp.is_success() => info!(status = %resp.status.status, "open orders cancelled"),
                Ok(resp) => warn!(error = resp.error_message(), "cancel all orders rejected"),
                Err(e) => warn!(error = %e, "cancel all orders failed"),
            }
        }
        self.notifier.stop();
        info!("bot stopped");
    }
}

/// Run flag and shutdown handle of the current run. The collector clears
/// both once teardown has finished.
#[derive(Default)]
struct RunState {
    running: AtomicBool,
    shutdown: Mutex<Option<Arc<watch::Sender<bool>>>>,
}

impl RunState {
    fn shutdown_slot(&self) -> MutexGuard<'_, Option<Arc<watch::Sender<bool>>>> {
        self.shutdown.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn finish(&self) {
        self.shutdown_slot().take();
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct Bot {
    params: Parameters,
    exchange: Arc<dyn ExchangeApi>,
    notifier: Arc<dyn Notifier>,
    positions: Arc<PositionManager>,
    pipeline: Arc<Pipeline>,
    run: Arc<RunState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bot {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        notifier: Arc<dyn Notifier>,
        storage: Arc<dyn Storage>,
        predictor: Arc<dyn Predictor>,
        params: Parameters,
        template: NotificationTemplate,
    ) -> Result<Self, ConfigError> {
        params.validate()?;
        let engine = DecisionEngine::new(params.decision_threshold)?;
        let positions = Arc::new(PositionManager::new(exchange.clone(), &params.instrument, params.max_position_size));
        let pipeline = Arc::new(Pipeline {
            engine,
            predictor,
            positions: positions.clone(),
            post: PostTrade::new(template, storage, notifier.clone()),
            order_size: params.order_size,
            slip_percent: params.price_slip_percent,
        });
        Ok(Self {
            params,
            exchange,
            notifier,
            positions,
            pipeline,
            run: Arc::new(RunState::default()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn positions(&self) -> &PositionManager { &self.positions }

    /// False again as soon as a run has torn down, whether `stop` or the
    /// failure breaker ended it.
    pub fn is_running(&self) -> bool { self.run.running.load(Ordering::SeqCst) }

    /// Fetches positions, subscribes and spawns the pipeline. Any failure
    /// leaves the bot stopped.
    pub async fn start(&self) -> Result<(), BotError> {
        if self.run.running.swap(true, Ordering::SeqCst) {
            return Err(BotError::AlreadyRunning);
        }
        let res = self.launch().await;
        if res.is_err() {
            self.run.finish();
        }
        res
    }

    async fn launch(&self) -> Result<(), BotError> {
        self.positions.fetch_open_positions().await.map_err(BotError::Positions)?;

        let instruments = vec![self.params.instrument.clone()];
        let ticks = self.exchange.subscribe(&instruments).await.map_err(BotError::Subscribe)?;

        if let Err(e) = self.notifier.start() {
            if let Err(u) = self.exchange.unsubscribe().await {
                warn!(error = %u, "unsubscribe after failed start");
            }
            return Err(e.into());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let (window_tx, window_rx) = mpsc::channel(WINDOW_QUEUE);

        let processor = tokio::spawn(process(
            self.pipeline.clone(),
            window_rx,
            self.params.max_consecutive_failures,
            shutdown_tx.clone(),
            shutdown_rx.clone(),
        ));

        let buffer = SequenceBuffer::new(&self.params.instrument, self.params.sequence_length);
        let teardown = Teardown {
            exchange: self.exchange.clone(),
            notifier: self.notifier.clone(),
            cancel_on_stop: self.params.cancel_on_stop,
        };
        *self.run.shutdown_slot() = Some(shutdown_tx);
        let run = self.run.clone();
        let collector = tokio::spawn(async move {
            let exit = sequence::run(ticks, buffer, window_tx, shutdown_rx).await;
            info!(?exit, "collector finished");
            teardown.run(processor).await;
            run.finish();
        });
        self.tasks_slot().push(collector);
        info!(
            instrument = %self.params.instrument,
            sequence = self.params.sequence_length,
            threshold = self.params.decision_threshold,
            "bot started"
        );
        Ok(())
    }

    /// Raises the shutdown signal for the current run.
    pub fn stop(&self) {
        if let Some(tx) = self.run.shutdown_slot().as_ref() {
            if !*tx.borrow() {
                info!("stop requested");
                tx.send_replace(true);
            }
        }
    }

    /// Joins every run started so far; resolves once they have torn down.
    pub async fn wait(&self) {
        let tasks = std::mem::take(&mut *self.tasks_slot());
        for t in tasks {
            if let Err(e) = t.await {
                error!(error = %e, "bot task failed");
            }
        }
    }

    fn tasks_slot(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }
}
