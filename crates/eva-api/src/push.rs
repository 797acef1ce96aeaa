//! WebSocket push channel.
//!
//! Connects to the server's `/ws` endpoint and forwards every text frame
//! through an [`mpsc`] receiver as a [`ChannelEvent`]. Outgoing frames are
//! queued and written by the same background task, so [`PushChannel::send_text`]
//! never blocks and may be called before the socket is open.
//!
//! The channel never reconnects on its own: liveness detection and restart
//! policy belong to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use eva_api::push::{ChannelEvent, PushChannel};
//! use url::Url;
//!
//! let url = Url::parse("wss://hmi.local/ws?k=token")?;
//! let (channel, mut events) = PushChannel::open(url);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChannelEvent::Opened => channel.send_json(&serde_json::json!({"m": "ping"}))?,
//!         ChannelEvent::Frame(text) => println!("{text}"),
//!         ChannelEvent::Closed { .. } | ChannelEvent::Failed(_) => break,
//!     }
//! }
//! ```

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── ChannelEvent ─────────────────────────────────────────────────────

/// Lifecycle and data events emitted by a [`PushChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The WebSocket handshake completed.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The peer closed the connection (or the stream ended).
    Closed { code: u16, reason: String },
    /// Connecting or reading failed; the channel is dead.
    Failed(String),
}

// ── PushChannel ──────────────────────────────────────────────────────

/// Handle to a running push channel.
pub struct PushChannel {
    outgoing: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

impl PushChannel {
    /// Spawn the connection task and return the handle plus its event
    /// receiver. Returns immediately; [`ChannelEvent::Opened`] is emitted
    /// once the handshake completes.
    pub fn open(url: Url) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let result = connect_and_run(&url, &event_tx, outgoing_rx, &task_cancel).await;
            match result {
                Ok(Some((code, reason))) => {
                    let _ = event_tx.send(ChannelEvent::Closed { code, reason });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "push channel failed");
                    let _ = event_tx.send(ChannelEvent::Failed(e.to_string()));
                }
            }
            tracing::debug!("push channel task exiting");
        });

        (Self { outgoing, cancel }, event_rx)
    }

    /// Queue a raw text frame.
    ///
    /// Every frame is followed by an empty frame, which the server treats
    /// as the end of a command.
    pub fn send_text(&self, text: String) -> Result<(), Error> {
        self.outgoing
            .send(Message::Text(text.into()))
            .and_then(|()| self.outgoing.send(Message::Text(String::new().into())))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Serialize `frame` as JSON and queue it.
    pub fn send_json(&self, frame: &impl Serialize) -> Result<(), Error> {
        let text = serde_json::to_string(frame).map_err(|e| Error::InvalidResponse {
            message: format!("unserializable frame: {e}"),
            body: String::new(),
        })?;
        self.send_text(text)
    }

    /// Close the channel.
    ///
    /// Fails with [`Error::ChannelClosed`] if the connection task already
    /// exited; the task is signalled to stop in either case.
    pub fn close(&self) -> Result<(), Error> {
        let queued = self.outgoing.send(Message::Close(None));
        self.cancel.cancel();
        queued.map_err(|_| Error::ChannelClosed)
    }

    /// Whether the connection task is still running.
    pub fn is_open(&self) -> bool {
        !self.outgoing.is_closed()
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish the connection, then pump frames both ways until either side
/// stops. Returns the close code/reason when the peer closed.
async fn connect_and_run(
    url: &Url,
    event_tx: &mpsc::UnboundedSender<ChannelEvent>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    cancel: &CancellationToken,
) -> Result<Option<(u16, String)>, Error> {
    tracing::info!(url = %redacted(url), "connecting push channel");

    let connect = tokio_tungstenite::connect_async(url.as_str());
    let (ws_stream, _response) = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(None),
        result = connect => result.map_err(|e| Error::WebSocketConnect(e.to_string()))?,
    };

    tracing::info!("push channel connected");
    let _ = event_tx.send(ChannelEvent::Opened);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // Flush whatever was queued before the close request.
                while let Ok(message) = outgoing.try_recv() {
                    let closing = matches!(message, Message::Close(_));
                    if write.send(message).await.is_err() || closing {
                        break;
                    }
                }
                return Ok(None);
            }
            message = outgoing.recv() => {
                let Some(message) = message else { return Ok(None) };
                let closing = matches!(message, Message::Close(_));
                write
                    .send(message)
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                if closing {
                    return Ok(None);
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        tracing::trace!(len = text.len(), "push frame");
                        let _ = event_tx.send(ChannelEvent::Frame(text.to_string()));
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("push channel ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (1005, String::new()),
                            |cf| (u16::from(cf.code), cf.reason.to_string()),
                        );
                        tracing::info!(code, %reason, "push channel closed by server");
                        return Ok(Some((code, reason)));
                    }
                    Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                        tracing::info!("push channel stream ended");
                        return Ok(Some((1006, "stream ended".into())));
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

/// Strip the session token from a channel URL before logging it.
fn redacted(url: &Url) -> Url {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "k" { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return shown;
    }
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn token_is_redacted_in_logs() {
        let url = Url::parse("wss://hmi.local/ws?k=secret&client_id=panel1").unwrap();
        let shown = redacted(&url);
        assert_eq!(shown.as_str(), "wss://hmi.local/ws?k=***&client_id=panel1");
    }

    #[test]
    fn url_without_query_is_unchanged() {
        let url = Url::parse("ws://hmi.local/ws").unwrap();
        assert_eq!(redacted(&url), url);
    }

    #[tokio::test]
    async fn unreachable_server_reports_failure() {
        // Port 9 (discard) is closed on test hosts; the handshake fails.
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let (channel, mut events) = PushChannel::open(url);
        let event = events.recv().await.unwrap();
        assert!(matches!(event, ChannelEvent::Failed(_)), "got {event:?}");
        assert!(channel.close().is_err());
    }

    #[tokio::test]
    async fn frames_can_be_queued_before_open() {
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let (channel, _events) = PushChannel::open(url);
        // The task has not run yet; sends are queued, not rejected.
        assert!(channel.send_json(&serde_json::json!({"m": "ping"})).is_ok());
    }
}
