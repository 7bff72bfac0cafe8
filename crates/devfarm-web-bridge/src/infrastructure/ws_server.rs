//! WebSocket server: accept loop and per-connection routing.
//!
//! Each accepted TCP connection is upgraded to a WebSocket, its request path
//! is parsed into a [`Route`], and the connection is handed to the engine:
//!
//! - `/stream/...`: the socket is wrapped as a [`FrameSink`] plus an
//!   [`InputSource`] and passed to [`StreamingEngine::attach_connection`],
//!   which owns it until either side ends.
//! - `/logs/...`: the socket receives one text message per device log line.
//!
//! A path that matches neither receives a single `{"error": ...}` message and
//! is closed.
//!
//! # Shutdown
//!
//! The accept loop polls a shared `AtomicBool` every 200 ms, so `main.rs`
//! can stop it from a Ctrl+C handler.  Connections already handed off keep
//! running until their client leaves or the engine is stopped.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use devfarm_core::{DeviceIdentity, InputEvent, VideoFrame};
use devfarm_engine::{EngineError, FrameSink, InputSource, StreamingEngine};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::application::{
    error_notice_json, parse_client_message, parse_route, translate_client_message, Route,
};
use crate::domain::config::BridgeConfig;

type WsStream = WebSocketStream<TcpStream>;
type WsTx = SplitSink<WsStream, WsMessage>;
type WsRx = SplitStream<WsStream>;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.ws_bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(
    config: BridgeConfig,
    engine: Arc<StreamingEngine>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.ws_bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.ws_bind_addr))?;

    info!("WebSocket bridge listening on {}", config.ws_bind_addr);
    serve(listener, engine, running).await;
    Ok(())
}

/// Runs the accept loop on an already bound listener.
pub async fn serve(listener: TcpListener, engine: Arc<StreamingEngine>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, engine).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, engine: Arc<StreamingEngine>) {
    match run_connection(stream, peer_addr, engine).await {
        Ok(()) => info!("connection {peer_addr} closed"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    engine: Arc<StreamingEngine>,
) -> anyhow::Result<()> {
    let _ = stream.set_nodelay(true);

    let mut path = String::new();
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        Ok::<Response, ErrorResponse>(resp)
    })
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let route = match parse_route(&path) {
        Ok(route) => route,
        Err(e) => {
            warn!("connection {peer_addr}: {e}");
            let (tx, _rx) = ws.split();
            let sink = WsFrameSink::new(tx);
            sink.send_error(&e.to_string()).await.ok();
            sink.close().await;
            return Ok(());
        }
    };

    info!(peer = %peer_addr, route = ?route, "WebSocket session established");
    let (tx, rx) = ws.split();

    match route {
        Route::Stream(identity) => {
            let sink: Arc<dyn FrameSink> = Arc::new(WsFrameSink::new(tx));
            let input = Box::new(WsInputSource::new(rx, identity.clone()));
            let outcome = engine.attach_connection(&identity, sink, input).await;
            info!(peer = %peer_addr, device = %identity, ?outcome, "stream connection finished");
        }
        Route::Logs(identity) => forward_logs(&engine, identity, tx, rx).await,
    }
    Ok(())
}

/// Pushes device log lines to the client until either side goes away.
async fn forward_logs(engine: &StreamingEngine, identity: DeviceIdentity, tx: WsTx, mut rx: WsRx) {
    let sink = WsFrameSink::new(tx);
    let mut lines = match engine.open_log_stream(&identity).await {
        Ok(lines) => lines,
        Err(e) => {
            warn!(device = %identity, error = %e, "log stream unavailable");
            sink.send_error(&e.to_string()).await.ok();
            sink.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Ok(line) => {
                    if sink.send_text(line).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(device = %identity, skipped, "log viewer fell behind, lines dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(device = %identity, "log stream ended");
                    break;
                }
            },
            incoming = rx.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    sink.close().await;
}

// ── Engine adapters ───────────────────────────────────────────────────────────

/// Outgoing half of a browser connection.
///
/// Frames go out as binary messages; errors as one JSON text message.
pub struct WsFrameSink {
    tx: Mutex<WsTx>,
}

impl WsFrameSink {
    fn new(tx: WsTx) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    async fn send(&self, msg: WsMessage) -> Result<(), EngineError> {
        self.tx.lock().await.send(msg).await.map_err(|e| {
            debug!("WebSocket send failed: {e}");
            EngineError::StreamTerminated
        })
    }

    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        self.send(WsMessage::Text(text)).await
    }
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&self, frame: VideoFrame) -> Result<(), EngineError> {
        self.send(WsMessage::Binary(frame.into_payload())).await
    }

    async fn send_error(&self, reason: &str) -> Result<(), EngineError> {
        self.send_text(error_notice_json(reason)).await
    }

    async fn close(&self) {
        let mut tx = self.tx.lock().await;
        if let Err(e) = tx.send(WsMessage::Close(None)).await {
            debug!("close frame not sent: {e}");
        }
        let _ = tx.close().await;
    }
}

/// Incoming half of a browser connection.
///
/// Malformed or invalid messages are logged and skipped; the connection
/// only ends when the browser closes it.
pub struct WsInputSource {
    rx: WsRx,
    identity: DeviceIdentity,
    pending: VecDeque<InputEvent>,
}

impl WsInputSource {
    fn new(rx: WsRx, identity: DeviceIdentity) -> Self {
        Self {
            rx,
            identity,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl InputSource for WsInputSource {
    async fn next_event(&mut self) -> Result<Option<InputEvent>, EngineError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            match self.rx.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let events =
                        parse_client_message(&text).and_then(|msg| translate_client_message(&msg));
                    match events {
                        Ok(events) => self.pending.extend(events),
                        Err(e) => warn!(device = %self.identity, "ignoring client message: {e}"),
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    debug!(
                        device = %self.identity,
                        len = data.len(),
                        "ignoring binary message from client"
                    );
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(device = %self.identity, "client read error: {e}");
                    return Ok(None);
                }
            }
        }
    }
}
