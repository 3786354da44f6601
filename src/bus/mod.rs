//! Bus client (spec §6): JSON-over-WebSocket envelope and the async
//! connection that sends/receives it. Grounded on the pack's
//! `tokio-tungstenite` usage (`jguida941-voiceterm`'s backend client) since
//! the teacher crate has no bus of its own.

pub mod facade;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::error::{ListenerError, Result};

/// Default timeout for `wait_for_response` (spec §4.7's 10s
/// `_emit_utterance_to_skills` wait).
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// The wire envelope for every message crossing the bus (spec §3
/// supplement): `{type, data, context}`, mirroring `ovos_bus_client.Message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub context: Value,
}

impl BusMessage {
    pub fn new(msg_type: impl Into<String>, data: Value, context: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            context,
        }
    }

    /// `ident` carried in `context.ident`, if any.
    pub fn ident(&self) -> Option<String> {
        self.context.get("ident").and_then(Value::as_str).map(str::to_string)
    }

    /// Build a reply: copies this message's `context`, and stamps the reply
    /// `type` with the request's `ident` if present, else `<type>.response`
    /// (spec §3 supplement, mirroring `service.py`'s
    /// `message.context.get("ident") or "neon.get_stt.response"` fallback).
    pub fn reply(&self, data: Value) -> Self {
        let reply_type = self.ident().unwrap_or_else(|| format!("{}.response", self.msg_type));
        Self {
            msg_type: reply_type,
            data,
            context: self.context.clone(),
        }
    }
}

struct PendingEntry {
    tx: oneshot::Sender<BusMessage>,
}

/// Tracks in-flight request/response pairs keyed by `ident` (spec §3
/// `PendingRequest`).
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, ident: String) -> oneshot::Receiver<BusMessage> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(ident, PendingEntry { tx });
        rx
    }

    /// Resolves a pending request if `message`'s `type` matches a registered
    /// ident; returns `true` if it was consumed.
    pub async fn resolve(&self, message: BusMessage) -> bool {
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.remove(&message.msg_type) {
            let _ = entry.tx.send(message);
            true
        } else {
            false
        }
    }

    pub async fn abandon_all(&self) {
        self.inner.lock().await.clear();
    }
}

/// Thin async client over a Mycroft-compatible WebSocket bus.
pub struct BusClient {
    sink: Mutex<futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        WsMessage,
    >>,
    pending: PendingRequests,
}

impl BusClient {
    /// Connects and spawns the reader task. Messages that don't match a
    /// registered `PendingRequests` ident (i.e. inbound requests rather than
    /// replies to our own `request()` calls) are pushed onto the returned
    /// `UnboundedReceiver` for a caller-owned dispatch loop (spec §4.7: the
    /// facade handlers live outside the bus client itself).
    pub async fn connect(
        url: &str,
        pending: PendingRequests,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>, tokio::sync::mpsc::UnboundedReceiver<BusMessage>)> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ListenerError::BusDisconnected(e.to_string()))?;
        let (sink, mut source) = stream.split();
        let client = Arc::new(Self {
            sink: Mutex::new(sink),
            pending: pending.clone(),
        });

        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
        let reader_pending = pending;
        let reader_handle = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<BusMessage>(&text) {
                        Ok(msg) => {
                            if !reader_pending.resolve(msg.clone()).await {
                                if inbound_tx.send(msg).is_err() {
                                    debug!("no dispatch loop listening for inbound bus messages");
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to decode bus message"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "bus read error");
                        break;
                    }
                }
            }
        });

        Ok((client, reader_handle, inbound_rx))
    }

    pub async fn emit(&self, message: &BusMessage) -> Result<()> {
        let text = serde_json::to_string(message).map_err(|e| ListenerError::Decode(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| ListenerError::BusDisconnected(e.to_string()))
    }

    /// Emits `message` as a request and waits up to `wait` for a reply whose
    /// `type` matches `reply_ident` (spec §4.7's `_emit_utterance_to_skills`).
    pub async fn request(&self, message: &BusMessage, reply_ident: String, wait: Duration) -> Result<Option<BusMessage>> {
        let rx = self.pending.register(reply_ident).await;
        self.emit(message).await?;
        match timeout(wait, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Ok(None),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_uses_ident_when_present() {
        let msg = BusMessage::new(
            "neon.get_stt",
            Value::Null,
            serde_json::json!({"ident": "abc123"}),
        );
        let reply = msg.reply(serde_json::json!({"ok": true}));
        assert_eq!(reply.msg_type, "abc123");
    }

    #[test]
    fn reply_falls_back_to_type_dot_response() {
        let msg = BusMessage::new("neon.get_stt", Value::Null, Value::Null);
        let reply = msg.reply(serde_json::json!({"ok": true}));
        assert_eq!(reply.msg_type, "neon.get_stt.response");
    }
}
