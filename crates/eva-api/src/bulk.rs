// Bulk (batched) JSON-RPC calls
//
// Several requests are sent as one JSON array; every reply element is
// matched back to its request by id and resolved independently.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::Error;
use crate::rpc::{RpcClient, RpcRequest, RpcResponse};

/// Handle to one prepared part of a [`BulkRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BulkPart {
    id: u32,
}

impl BulkPart {
    /// The request id allocated to this part.
    pub fn id(self) -> u32 {
        self.id
    }
}

/// A batch of calls sent in a single HTTP round trip.
pub struct BulkRequest<'a> {
    client: &'a RpcClient,
    payload: Vec<RpcRequest>,
}

impl<'a> BulkRequest<'a> {
    pub(crate) fn new(client: &'a RpcClient) -> Self {
        Self {
            client,
            payload: Vec::new(),
        }
    }

    /// Queue a call. The returned part resolves the call's outcome from the
    /// [`BulkResponse`].
    pub fn prepare(&mut self, method: &str, params: Value) -> BulkPart {
        let request = self.client.prepare(method, params);
        let part = BulkPart { id: request.id };
        self.payload.push(request);
        part
    }

    /// Number of queued calls.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Send the whole batch.
    ///
    /// Fails as a whole only when the reply is not a JSON array or one of
    /// its elements is not a valid envelope. Remote errors of individual
    /// calls are kept per part.
    pub async fn call(self) -> Result<BulkResponse, Error> {
        debug!(
            endpoint = %self.client.endpoint(),
            calls = self.payload.len(),
            "sending bulk call"
        );
        let body = self.client.post(&self.payload).await?;

        let replies: Value = serde_json::from_str(&body).map_err(|e| Error::InvalidResponse {
            message: e.to_string(),
            body: body.clone(),
        })?;
        let Value::Array(replies) = replies else {
            return Err(Error::InvalidResponse {
                message: "bulk reply is not an array".into(),
                body,
            });
        };

        let mut results = HashMap::with_capacity(replies.len());
        for reply in replies {
            let raw = reply.to_string();
            let response: RpcResponse =
                serde_json::from_value(reply).map_err(|e| Error::InvalidResponse {
                    message: e.to_string(),
                    body: raw.clone(),
                })?;
            let Some(id) = response.request_id() else {
                return Err(Error::InvalidResponse {
                    message: "bulk reply element without id".into(),
                    body: raw,
                });
            };
            if response.result.is_none() && response.error.is_none() {
                return Err(Error::InvalidResponse {
                    message: format!("bulk reply {id} has neither result nor error"),
                    body: raw,
                });
            }
            let outcome = response.into_result(&raw);
            if let Err(ref e) = outcome {
                debug!(id, code = e.code(), error = %e, "bulk part failed");
            }
            results.insert(id, outcome);
        }

        debug!(replies = results.len(), "bulk call complete");
        Ok(BulkResponse { results })
    }
}

/// Outcome of a bulk call, keyed by part.
#[derive(Debug)]
pub struct BulkResponse {
    results: HashMap<u32, Result<Value, Error>>,
}

impl BulkResponse {
    /// Take the outcome of a part. Returns `None` when the server sent no
    /// reply for it (or it was already taken).
    pub fn take(&mut self, part: BulkPart) -> Option<Result<Value, Error>> {
        self.results.remove(&part.id)
    }

    /// Number of replies still held.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl RpcClient {
    /// Start a new bulk request bound to this client.
    pub fn bulk(&self) -> BulkRequest<'_> {
        BulkRequest::new(self)
    }
}
