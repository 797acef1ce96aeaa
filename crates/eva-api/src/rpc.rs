// JSON-RPC 2.0 gateway
//
// Wraps `reqwest::Client` with request id allocation, the `/jrpc` endpoint
// and response envelope validation. Bulk calls live in `bulk.rs` and reuse
// the same id counter and envelope checks.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

const JSONRPC_VERSION: &str = "2.0";

/// A single JSON-RPC request as it goes over the wire.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
    pub id: u32,
}

/// Error object inside a JSON-RPC reply.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// JSON-RPC reply envelope.
///
/// `result` distinguishes "absent" from an explicit `null`, which is a
/// valid result for calls that return nothing.
#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl RpcResponse {
    /// The numeric request id this reply answers, if well-formed.
    pub(crate) fn request_id(&self) -> Option<u32> {
        self.id
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
    }

    /// Turn the envelope into the call outcome. `raw` is kept for
    /// diagnostics when the envelope carries neither result nor error.
    pub(crate) fn into_result(self, raw: &str) -> Result<Value, Error> {
        if let Some(err) = self.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        self.result.ok_or_else(|| Error::InvalidResponse {
            message: "neither result nor error in reply".into(),
            body: raw.to_owned(),
        })
    }
}

/// HTTP client for the server's JSON-RPC endpoint.
///
/// Request ids are allocated from a monotonic counter that wraps back to 1
/// after `u32::MAX`. Every reply is checked against the id of the request it
/// answers.
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: Url,
    last_id: AtomicU32,
}

impl RpcClient {
    /// Create a new client for the server at `api_uri`.
    ///
    /// The JSON-RPC endpoint is `{api_uri}/jrpc`.
    pub fn new(api_uri: &Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::with_client(http, api_uri)
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, api_uri: &Url) -> Result<Self, Error> {
        let endpoint = Url::parse(&format!(
            "{}/jrpc",
            api_uri.as_str().trim_end_matches('/')
        ))?;
        Ok(Self {
            http,
            endpoint,
            last_id: AtomicU32::new(0),
        })
    }

    /// The full JSON-RPC endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Allocate the next request id.
    pub(crate) fn next_id(&self) -> u32 {
        let mut current = self.last_id.load(Ordering::Relaxed);
        loop {
            let next = if current == u32::MAX { 1 } else { current + 1 };
            match self.last_id.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Build a request envelope with a fresh id.
    pub fn prepare(&self, method: &str, params: Value) -> RpcRequest {
        let id = self.next_id();
        debug!(id, endpoint = %self.endpoint, method, "preparing call");
        trace!(id, %params, "call params");
        RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_owned(),
            params,
            id,
        }
    }

    /// Issue a single call and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let request = self.prepare(method, params);
        let id = request.id;
        let body = self.post(&request).await.inspect_err(|e| {
            debug!(id, code = e.code(), error = %e, "call failed");
        })?;

        let response: RpcResponse =
            serde_json::from_str(&body).map_err(|e| Error::InvalidResponse {
                message: e.to_string(),
                body: body.clone(),
            })?;

        if response.request_id() != Some(id) {
            return Err(Error::InvalidResponse {
                message: format!("reply id does not match request id {id}"),
                body,
            });
        }

        let result = response.into_result(&body);
        match &result {
            Ok(value) => {
                debug!(id, method, "call succeeded");
                trace!(id, %value, "call response");
            }
            Err(e) => debug!(id, method, code = e.code(), error = %e, "call failed"),
        }
        result
    }

    /// POST a JSON body to the endpoint and return the raw reply text.
    pub(crate) async fn post(&self, body: &impl Serialize) -> Result<String, Error> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Server {
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(Error::Transport)
    }
}
