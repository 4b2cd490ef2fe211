// ===============================
// src/feed.rs
// ===============================
//
// Kraken Futures ticker subscription over WebSocket.
//
// - subscribe()   : dial + send the subscribe message, retrying up to the
//                   reconnect budget; spawns the read loop.
// - read loop     : decodes frames into Ticks; on failure while Connected it
//                   redials and resends the same subscribe message, while
//                   Closing it just stops.
// - unsubscribe() : marks Closing and has the read loop send a normal close.
//                   A redial in progress is abandoned.
//
// Each dial attempt (handshake + subscribe send) is bounded by
// `connect_timeout`; a timeout counts against the reconnect budget.
//
// The tick channel is closed when the read loop exits; that is the
// end-of-stream signal for consumers.
//
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::domain::{ConnectorState, Tick};
use crate::error::ExchangeError;
use crate::kraken::{decode_frame, Inbound, SubscribeMessage};
use crate::metrics::{TICKS, WS_CONNECTED, WS_RECONNECTS};

pub const DEFAULT_WS_URL: &str = "wss://demo-futures.kraken.com/ws/v1";
pub const RECONNECT_ATTEMPTS: u32 = 10;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub feed: String,
    pub reconnect_attempts: u32,
    pub backoff: Duration,
    pub connect_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            feed: "ticker".to_string(),
            reconnect_attempts: RECONNECT_ATTEMPTS,
            backoff: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(s: ConnectorState) -> Self { Self(AtomicU8::new(s as u8)) }
    fn get(&self) -> ConnectorState { ConnectorState::from_u8(self.0.load(Ordering::Acquire)) }
    fn set(&self, s: ConnectorState) { self.0.store(s as u8, Ordering::Release) }
    fn transition(&self, from: ConnectorState, to: ConnectorState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

enum Control {
    Close(oneshot::Sender<Result<(), ExchangeError>>),
}

pub struct StreamingClient {
    settings: Arc<StreamSettings>,
    state: Arc<StateCell>,
    control: Mutex<Option<mpsc::Sender<Control>>>,
}

impl StreamingClient {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            state: Arc::new(StateCell::new(ConnectorState::Disconnected)),
            control: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectorState { self.state.get() }

    pub async fn subscribe(&self, instruments: &[String]) -> Result<mpsc::Receiver<Tick>, ExchangeError> {
        if self.control_slot().as_ref().map_or(false, |tx| !tx.is_closed()) {
            return Err(ExchangeError::AlreadySubscribed);
        }

        let msg = SubscribeMessage::new(&self.settings.feed, instruments);
        self.state.set(ConnectorState::Disconnected);
        let ws = dial(&self.settings, &self.state, &msg).await?;
        self.state.set(ConnectorState::Connected);

        let (tick_tx, tick_rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let (ctl_tx, ctl_rx) = mpsc::channel(1);
        *self.control_slot() = Some(ctl_tx);

        tokio::spawn(read_loop(
            ws,
            msg,
            self.settings.clone(),
            self.state.clone(),
            ctl_rx,
            tick_tx,
        ));
        Ok(tick_rx)
    }

    pub async fn unsubscribe(&self) -> Result<(), ExchangeError> {
        let ctl = self.control_slot().take().ok_or(ExchangeError::NotSubscribed)?;
        self.state.set(ConnectorState::Closing);

        let (reply_tx, reply_rx) = oneshot::channel();
        if ctl.send(Control::Close(reply_tx)).await.is_err() {
            // read loop already gone
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }

    fn control_slot(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<Control>>> {
        self.control.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Dial and subscribe, up to `reconnect_attempts` tries with exponential backoff + jitter.
async fn dial(
    settings: &StreamSettings,
    state: &StateCell,
    msg: &SubscribeMessage,
) -> Result<WsStream, ExchangeError> {
    let url = Url::parse(&settings.url).map_err(|source| ExchangeError::Url {
        url: settings.url.clone(),
        source,
    })?;
    let payload = serde_json::to_string(msg)?;

    for attempt in 1..=settings.reconnect_attempts {
        if state.get() == ConnectorState::Closing {
            return Err(ExchangeError::NotSubscribed);
        }
        info!(url = %url, attempt, "connecting websocket");
        let connect = async {
            let (mut ws, _resp) = connect_async(url.as_str()).await?;
            ws.send(Message::Text(payload.clone())).await?;
            Ok::<_, tokio_tungstenite::tungstenite::Error>(ws)
        };
        match timeout(settings.connect_timeout, connect).await {
            Ok(Ok(ws)) => {
                info!(feed = %msg.feed, products = ?msg.product_ids, "subscribed");
                WS_CONNECTED.set(1);
                return Ok(ws);
            }
            Ok(Err(e)) => warn!(error = %e, attempt, "connect failed"),
            Err(_) => warn!(attempt, timeout_ms = settings.connect_timeout.as_millis() as u64, "connect timed out"),
        }
        if attempt < settings.reconnect_attempts {
            sleep(backoff_delay(settings.backoff, attempt)).await;
        }
    }
    Err(ExchangeError::MaxReconnectsExceeded { attempts: settings.reconnect_attempts })
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(6);
    let base_ms = (base.as_millis() as u64).saturating_mul(1u64 << shift);
    let jitter = if base_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=base_ms / 2) };
    Duration::from_millis(base_ms + jitter)
}

async fn send_close(ws: &mut WsStream) -> Result<(), ExchangeError> {
    let frame = CloseFrame { code: CloseCode::Normal, reason: "".into() };
    ws.send(Message::Close(Some(frame))).await?;
    Ok(())
}

async fn read_loop(
    mut ws: WsStream,
    msg: SubscribeMessage,
    settings: Arc<StreamSettings>,
    state: Arc<StateCell>,
    mut control: mpsc::Receiver<Control>,
    out: mpsc::Sender<Tick>,
) {
    let mut control_open = true;
    loop {
        let failure = tokio::select! {
            ctl = control.recv(), if control_open => {
                match ctl {
                    Some(Control::Close(reply)) => {
                        state.set(ConnectorState::Closing);
                        let _ = reply.send(send_close(&mut ws).await);
                    }
                    None => {
                        control_open = false;
                        if state.get() != ConnectorState::Closing {
                            state.set(ConnectorState::Closing);
                            let _ = send_close(&mut ws).await;
                        }
                    }
                }
                continue;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                    Ok(Inbound::Tick(tick)) => {
                        TICKS.inc();
                        if out.send(tick).await.is_err() {
                            info!("tick consumer dropped, closing subscription");
                            state.set(ConnectorState::Closing);
                            let _ = send_close(&mut ws).await;
                            break;
                        }
                        continue;
                    }
                    Ok(Inbound::Control(frame)) => {
                        debug!(event = %frame.event, feed = ?frame.feed, message = ?frame.message, "control frame");
                        continue;
                    }
                    Err(e) => format!("decode failure: {e}"),
                },
                Some(Ok(Message::Close(frame))) => format!("close frame: {frame:?}"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => format!("read error: {e}"),
                None => "stream ended".to_string(),
            },
        };

        if state.get() == ConnectorState::Closing {
            info!("websocket: normal termination");
            break;
        }
        WS_CONNECTED.set(0);
        if !state.transition(ConnectorState::Connected, ConnectorState::Disconnected) {
            break;
        }
        warn!(reason = %failure, "websocket: retry to connect");

        let dialed = tokio::select! {
            res = dial(&settings, &state, &msg) => Some(res),
            ctl = control.recv(), if control_open => {
                state.set(ConnectorState::Closing);
                if let Some(Control::Close(reply)) = ctl {
                    let _ = reply.send(Ok(()));
                }
                None
            }
        };
        let Some(dialed) = dialed else {
            info!("websocket: closed while reconnecting");
            break;
        };

        match dialed {
            Ok(mut fresh) => {
                if !state.transition(ConnectorState::Disconnected, ConnectorState::Connected) {
                    let _ = fresh.close(None).await;
                    break;
                }
                WS_RECONNECTS.inc();
                ws = fresh;
            }
            Err(e) => {
                error!(error = %e, "websocket: reconnect failed, ending subscription");
                break;
            }
        }
    }
    WS_CONNECTED.set(0);
    debug!("read loop finished");
}
