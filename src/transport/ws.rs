use super::{Transport, TransportEvent, TransportLink};
use crate::config::{calculate_backoff, Config, RetryConfig};
use crate::error::MasterError;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport with exponential reconnect backoff.
#[derive(Debug, Clone)]
pub struct WsTransport {
    retry: RetryConfig,
    connect_timeout: Duration,
    buffer: usize,
}

impl WsTransport {
    pub fn new(retry: RetryConfig, connect_timeout: Duration, buffer: usize) -> Self {
        // wss needs a process-wide crypto provider; an earlier install wins.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self {
            retry,
            connect_timeout,
            buffer: buffer.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.reconnect.clone(),
            config.connect_timeout(),
            config.event_buffer,
        )
    }
}

impl Transport for WsTransport {
    fn open(&self, url: Url) -> TransportLink {
        let (events_tx, events_rx) = mpsc::channel(self.buffer);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.buffer);
        let task = tokio::spawn(run(self.clone(), url, events_tx, outbound_rx));
        TransportLink::new(events_rx, outbound_tx).with_task(task)
    }
}

enum PumpExit {
    /// The session dropped its side of the link.
    Released,
    Lost(String),
}

async fn run(
    transport: WsTransport,
    url: Url,
    events: mpsc::Sender<TransportEvent>,
    mut outbound: mpsc::Receiver<String>,
) {
    let mut attempt: u32 = 0;

    loop {
        let reason = match tokio::time::timeout(transport.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => {
                info!(host = url.host_str().unwrap_or_default(), "Transport connected");
                attempt = 0;
                // Requests queued while no connection was up belong to the lost one.
                let mut stale = 0usize;
                while outbound.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!(stale, "Dropped requests queued before the connection opened");
                }
                if events.send(TransportEvent::Open).await.is_err() {
                    return;
                }
                match pump(ws, &mut outbound, &events).await {
                    PumpExit::Released => return,
                    PumpExit::Lost(reason) => reason,
                }
            }
            Ok(Err(e)) => MasterError::Transport {
                message: e.to_string(),
                attempt,
            }
            .to_string(),
            Err(_) => MasterError::Transport {
                message: format!("connect timed out after {:?}", transport.connect_timeout),
                attempt,
            }
            .to_string(),
        };

        warn!(%reason, attempt, "Transport connection lost");
        if events.send(TransportEvent::Closed { reason: reason.clone() }).await.is_err() {
            return;
        }

        if !transport.retry.allows_attempt(attempt) {
            let _ = events
                .send(TransportEvent::GaveUp {
                    reason: format!("giving up after {} reconnect attempts: {}", attempt, reason),
                })
                .await;
            return;
        }

        let delay = calculate_backoff(attempt, &transport.retry);
        debug!(delay_ms = delay, attempt, "Scheduling reconnect");
        attempt = attempt.saturating_add(1);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            _ = events.closed() => return,
        }
    }
}

async fn pump(
    ws: WsStream,
    outbound: &mut mpsc::Receiver<String>,
    events: &mpsc::Sender<TransportEvent>,
) -> PumpExit {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return PumpExit::Released;
                };
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    return PumpExit::Lost(format!("send failed: {}", e));
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    None => return PumpExit::Lost("connection closed".to_string()),
                    Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Frame(text.as_str().to_owned())).await.is_err() {
                            return PumpExit::Released;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return PumpExit::Lost("closed by server".to_string());
                    }
                    // Pings are answered by tungstenite; binary frames are not part of the protocol
                    Some(Ok(_)) => continue,
                }
            }
        }
    }
}
