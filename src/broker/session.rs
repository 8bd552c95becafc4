// =============================================================================
// Broker Session — single persistent WebSocket to the Deriv endpoint
// =============================================================================
//
// One background task owns the socket: it is the sole reader and writer. All
// outbound frames are serialized through a bounded queue; inbound frames are
// either matched to a pending request-reply future by `passthrough.req_id` or
// dispatched as typed `BrokerEvent`s to the engine worker.
//
// Failure semantics: any socket error closes the connection, emits
// `Disconnected`, waits a bounded 5s backoff and reconnects — unless the stop
// signal is set. Authorization failures are surfaced as `ApiError` events and
// handled by the engine (which clears its running flag and waits for new
// credentials). Frames sent while disconnected are dropped for ticks/orders;
// history requests stay queued in the history worker.
//
// Keepalive: an application-level ping every 30s; the connection is declared
// dead when nothing has been received for ping interval + 10s.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::broker::protocol::{self, BrokerEvent};
use crate::config::BotConfig;

/// Reconnect backoff after a socket drop.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Application-level ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Receive staleness beyond which the socket is declared dead.
const STALE_AFTER: Duration = Duration::from_secs(40);
/// Request-reply timeout.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// Outbound queue depth.
const OUTBOUND_DEPTH: usize = 64;
/// Minimum gap between history frames.
const HISTORY_THROTTLE: Duration = Duration::from_secs(1);

/// A queued `ticks_history` request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryRequest {
    pub symbol: String,
    pub granularity: u32,
    pub count: u32,
}

/// Cheap-to-clone handle used by the engine, execution and screener layers.
#[derive(Clone)]
pub struct BrokerHandle {
    outbound_tx: mpsc::Sender<Value>,
    history_tx: mpsc::UnboundedSender<HistoryRequest>,
    connected: Arc<AtomicBool>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    req_counter: Arc<AtomicU64>,
    reconnect: Arc<Notify>,
}

impl BrokerHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Fire-and-forget send. Returns `false` (and drops the frame) when the
    /// socket is down — the tick stream is the authoritative clock and the
    /// next tick retries the preconditions.
    pub fn send(&self, frame: Value) -> bool {
        if !self.is_connected() {
            debug!("broker send dropped — socket disconnected");
            return false;
        }
        match self.outbound_tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "broker outbound queue rejected frame");
                false
            }
        }
    }

    /// Request-reply call correlated via `passthrough.req_id`, resolving on
    /// the matching response with a 10s timeout.
    pub async fn call(&self, mut frame: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(anyhow!("broker session disconnected"));
        }

        let req_id = self.req_counter.fetch_add(1, Ordering::Relaxed);
        frame["passthrough"] = serde_json::json!({ "req_id": req_id });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(req_id, tx);

        if !self.send(frame) {
            self.pending.lock().remove(&req_id);
            return Err(anyhow!("broker session rejected frame"));
        }

        let result = timeout(CALL_TIMEOUT, rx).await;
        self.pending.lock().remove(&req_id);

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(anyhow!("broker session dropped before replying")),
            Err(_) => Err(anyhow!("broker call timed out after {CALL_TIMEOUT:?}")),
        }
    }

    /// Enqueue a history fetch. Queued requests survive disconnects and are
    /// drained by the history worker at a 1/s throttle.
    pub fn fetch_history(&self, symbol: &str, granularity: u32, count: u32) {
        let _ = self.history_tx.send(HistoryRequest {
            symbol: symbol.to_string(),
            granularity,
            count,
        });
    }

    /// Drop the current socket so the session loop re-reads credentials and
    /// reconnects. Used after an `api_token` / `app_id` config change.
    pub fn force_reconnect(&self) {
        self.reconnect.notify_one();
    }
}

/// The session half that owns the receive ends of the queues.
pub struct BrokerSession {
    handle: BrokerHandle,
    outbound_rx: mpsc::Receiver<Value>,
    history_rx: mpsc::UnboundedReceiver<HistoryRequest>,
}

/// Build a broker session plus its shareable handle.
pub fn broker_session() -> (BrokerSession, BrokerHandle) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_DEPTH);
    let (history_tx, history_rx) = mpsc::unbounded_channel();

    let handle = BrokerHandle {
        outbound_tx,
        history_tx,
        connected: Arc::new(AtomicBool::new(false)),
        pending: Arc::new(Mutex::new(HashMap::new())),
        req_counter: Arc::new(AtomicU64::new(1)),
        reconnect: Arc::new(Notify::new()),
    };

    let session = BrokerSession {
        handle: handle.clone(),
        outbound_rx,
        history_rx,
    };

    (session, handle)
}

impl BrokerSession {
    /// Run the I/O loop plus the history worker until the stop signal fires.
    pub async fn run(
        self,
        config: Arc<RwLock<BotConfig>>,
        events_tx: mpsc::UnboundedSender<BrokerEvent>,
        stop: watch::Receiver<bool>,
    ) {
        let Self {
            handle,
            mut outbound_rx,
            history_rx,
        } = self;

        // History worker drains its queue through the shared handle.
        tokio::spawn(run_history_worker(handle.clone(), history_rx, stop.clone()));

        let mut stop = stop;
        while !*stop.borrow() {
            let (token, app_id) = {
                let cfg = config.read();
                (cfg.api_token.clone(), cfg.app_id.clone())
            };

            if token.is_empty() {
                // Nothing to authorize with yet; poll for credentials.
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(2)) => continue,
                    _ = stop.changed() => break,
                }
            }

            let url = format!("wss://ws.binaryws.com/websockets/v3?app_id={app_id}");
            info!(url = %url, "connecting to broker WebSocket");

            match connect_async(&url).await {
                Ok((ws, _response)) => {
                    handle.connected.store(true, Ordering::Relaxed);
                    let reason = run_connection(
                        ws,
                        &handle,
                        &mut outbound_rx,
                        &token,
                        &events_tx,
                        &mut stop,
                    )
                    .await;
                    handle.connected.store(false, Ordering::Relaxed);
                    handle.pending.lock().clear();
                    let _ = events_tx.send(BrokerEvent::Disconnected);
                    match reason {
                        Ok(()) => info!("broker WebSocket closed"),
                        Err(e) => error!(error = %e, "broker WebSocket error"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "broker WebSocket connect failed");
                }
            }

            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = stop.changed() => break,
            }
        }

        info!("broker session stopped");
    }
}

/// Drive one established connection until it drops or is told to.
async fn run_connection(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    handle: &BrokerHandle,
    outbound_rx: &mut mpsc::Receiver<Value>,
    token: &str,
    events_tx: &mpsc::UnboundedSender<BrokerEvent>,
    stop: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (mut write, mut read) = ws.split();

    // Authorize, then keep the balance and open-contract streams alive. The
    // engine reacts to `Authorized` by (re)subscribing ticks per symbol.
    for frame in [
        protocol::authorize(token),
        protocol::subscribe_balance(),
        protocol::subscribe_open_contracts(),
    ] {
        write
            .send(Message::Text(frame.to_string()))
            .await
            .context("failed to send session bootstrap frame")?;
    }

    let mut ping_timer = interval(PING_INTERVAL);
    ping_timer.tick().await; // immediate first tick consumed
    let mut last_rx = Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = stop.changed() => return Ok(()),

            _ = handle.reconnect.notified() => {
                info!("broker reconnect requested — dropping connection");
                return Ok(());
            }

            _ = ping_timer.tick() => {
                if last_rx.elapsed() > STALE_AFTER {
                    return Err(anyhow!("broker socket stale ({}s without traffic)",
                        last_rx.elapsed().as_secs()));
                }
                write
                    .send(Message::Text(protocol::ping().to_string()))
                    .await
                    .context("failed to send keepalive ping")?;
            }

            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { return Ok(()) };
                write
                    .send(Message::Text(frame.to_string()))
                    .await
                    .context("failed to send outbound frame")?;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_rx = Instant::now();
                        handle_frame(handle, events_tx, &text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_rx = Instant::now();
                        write.send(Message::Pong(data)).await.ok();
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_rx = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Route one inbound frame: pending request-reply futures first, then typed
/// event dispatch. Parse failures are logged and dropped — state stays
/// consistent and the stream keeps flowing.
fn handle_frame(
    handle: &BrokerHandle,
    events_tx: &mpsc::UnboundedSender<BrokerEvent>,
    text: &str,
) {
    let data: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to parse broker frame");
            return;
        }
    };

    if let Some(req_id) = protocol::req_id_of(&data) {
        if let Some(tx) = handle.pending.lock().remove(&req_id) {
            let _ = tx.send(data);
            return;
        }
    }

    match protocol::parse_event(&data) {
        Ok(Some(event)) => {
            let _ = events_tx.send(event);
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "dropped malformed broker frame"),
    }
}

/// Drain the history queue at ≥1s intervals, deduping by
/// `(symbol, granularity, current-candle-epoch)`. Requests arriving while
/// disconnected wait for the next connection.
async fn run_history_worker(
    handle: BrokerHandle,
    mut history_rx: mpsc::UnboundedReceiver<HistoryRequest>,
    mut stop: watch::Receiver<bool>,
) {
    info!("history worker started");
    let mut last_fetches: HashMap<(String, u32), i64> = HashMap::new();

    loop {
        let req = tokio::select! {
            r = history_rx.recv() => match r {
                Some(r) => r,
                None => return,
            },
            _ = stop.changed() => return,
        };

        // Wait for the socket before sending; the queue preserves requests
        // across disconnects.
        while !handle.is_connected() {
            if *stop.borrow() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let bucket = current_fetch_bucket(&req, chrono::Utc::now().timestamp());
        let key = (req.symbol.clone(), req.granularity);
        if last_fetches.get(&key) == Some(&bucket) {
            debug!(symbol = %req.symbol, granularity = req.granularity, "history fetch deduped");
            continue;
        }

        debug!(symbol = %req.symbol, granularity = req.granularity, count = req.count, "history fetch");
        if handle.send(protocol::ticks_history(
            &req.symbol,
            req.granularity,
            req.count,
        )) {
            last_fetches.insert(key, bucket);
        }

        tokio::select! {
            _ = tokio::time::sleep(HISTORY_THROTTLE) => {}
            _ = stop.changed() => return,
        }
    }
}

/// Dedup bucket for a history request: one fetch per candle period (floored
/// at one minute for tick-level granularities).
fn current_fetch_bucket(req: &HistoryRequest, now: i64) -> i64 {
    now / i64::from(req.granularity.max(60))
}
