//! Push channel listener.
//!
//! Connects to the game server's WebSocket, decodes `{event, data}` frames and
//! forwards them to the event loop. Reconnects with exponential backoff until
//! cancelled; connection changes are reported as [`Inbound`] events too.

use crate::protocol::{PushEvent, PushFrame};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the listener hands to the event loop
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Push(PushEvent),
    Connected,
    Disconnected(String),
}

/// Decode one text frame. `Ok(None)` for events the dashboard does not consume.
pub fn decode_frame(text: &str) -> Result<Option<PushEvent>, serde_json::Error> {
    let frame: PushFrame = serde_json::from_str(text)?;
    PushEvent::from_frame(frame)
}

/// Run the listener until `stop` is cancelled or the event loop goes away
pub async fn run(url: String, tx: mpsc::Sender<Inbound>, stop: CancellationToken) {
    let mut delay = INITIAL_DELAY;

    loop {
        let reason = tokio::select! {
            _ = stop.cancelled() => break,
            outcome = connect_and_pump(&url, &tx) => match outcome {
                PumpOutcome::LoopGone => break,
                PumpOutcome::Closed { reason, was_connected } => {
                    if was_connected {
                        delay = INITIAL_DELAY;
                    }
                    reason
                }
            }
        };

        tracing::warn!(%url, reason = %reason, delay_secs = delay.as_secs_f32(), "Push channel down, reconnecting");
        if tx.send(Inbound::Disconnected(reason)).await.is_err() {
            break;
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = sleep(delay) => {}
        }
        delay = (delay * 2).min(MAX_DELAY);
    }

    tracing::info!("Push listener stopped");
}

enum PumpOutcome {
    Closed { reason: String, was_connected: bool },
    LoopGone,
}

async fn connect_and_pump(url: &str, tx: &mpsc::Sender<Inbound>) -> PumpOutcome {
    let stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(url)).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            return PumpOutcome::Closed {
                reason: format!("Connection failed: {}", e),
                was_connected: false,
            }
        }
        Err(_) => {
            return PumpOutcome::Closed {
                reason: "Handshake timed out".to_string(),
                was_connected: false,
            }
        }
    };

    tracing::info!(%url, "Push channel connected");
    if tx.send(Inbound::Connected).await.is_err() {
        return PumpOutcome::LoopGone;
    }

    let (mut sink, mut source) = stream.split();

    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                Ok(Some(event)) => {
                    tracing::debug!(event = event.name(), "Push event received");
                    if tx.send(Inbound::Push(event)).await.is_err() {
                        return PumpOutcome::LoopGone;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed push frame");
                }
            },
            Some(Ok(Message::Ping(payload))) => {
                sink.send(Message::Pong(payload)).await.ok();
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "Push channel closed by server");
                break "Closed by server".to_string();
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break format!("WebSocket error: {}", e),
            None => break "Stream ended".to_string(),
        }
    };

    let _ = sink.close().await;
    PumpOutcome::Closed {
        reason,
        was_connected: true,
    }
}
