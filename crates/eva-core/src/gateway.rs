// ── Transport seams ──
//
// The supervisor talks to the server through two small traits: a request
// gateway and a push channel factory. `eva-api` provides the real
// implementations; tests plug in scripted ones.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use eva_api::{ChannelEvent, PushChannel, RpcClient};

use crate::error::CoreError;

/// Request/response transport.
pub trait Gateway: Send + Sync {
    /// Issue one call and return its result.
    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Value, CoreError>>;

    /// Issue several calls in one round trip. The outer error fails the
    /// whole batch; inner results are in request order.
    fn call_bulk(
        &self,
        calls: Vec<(String, Value)>,
    ) -> BoxFuture<'_, Result<Vec<Result<Value, CoreError>>, CoreError>>;
}

/// An open push channel.
pub trait Channel: Send + Sync {
    /// Queue a JSON frame.
    fn send(&self, frame: &Value) -> Result<(), CoreError>;

    /// Close the channel. May fail when the channel is already gone.
    fn close(&self) -> Result<(), CoreError>;
}

/// Opens push channels.
pub trait ChannelConnector: Send + Sync {
    fn open(&self, url: Url) -> (Arc<dyn Channel>, mpsc::UnboundedReceiver<ChannelEvent>);
}

// ── eva-api implementations ──────────────────────────────────────────

impl Gateway for RpcClient {
    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Value, CoreError>> {
        Box::pin(async move { RpcClient::call(self, method, params).await.map_err(CoreError::from) })
    }

    fn call_bulk(
        &self,
        calls: Vec<(String, Value)>,
    ) -> BoxFuture<'_, Result<Vec<Result<Value, CoreError>>, CoreError>> {
        Box::pin(async move {
            let mut bulk = self.bulk();
            let parts: Vec<_> = calls
                .into_iter()
                .map(|(method, params)| bulk.prepare(&method, params))
                .collect();
            let mut response = bulk.call().await?;
            Ok(parts
                .into_iter()
                .map(|part| match response.take(part) {
                    Some(result) => result.map_err(CoreError::from),
                    None => Err(CoreError::Protocol {
                        message: format!("no reply for bulk call {}", part.id()),
                    }),
                })
                .collect())
        })
    }
}

impl Channel for PushChannel {
    fn send(&self, frame: &Value) -> Result<(), CoreError> {
        self.send_json(frame).map_err(CoreError::from)
    }

    fn close(&self) -> Result<(), CoreError> {
        PushChannel::close(self).map_err(CoreError::from)
    }
}

/// Opens real WebSocket push channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl ChannelConnector for WebSocketConnector {
    fn open(&self, url: Url) -> (Arc<dyn Channel>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (channel, events) = PushChannel::open(url);
        (Arc::new(channel), events)
    }
}
