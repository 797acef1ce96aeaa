// ── Bulk calls through the client ──
//
// A thin batch builder on top of `Gateway::call_bulk`. Every part gets the
// session token injected just like a single call.

use serde_json::Value;

use crate::client::Client;
use crate::error::CoreError;

/// Handle to one call of a [`BulkRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BulkPart(usize);

/// A batch of calls sent in one round trip.
pub struct BulkRequest<'a> {
    client: &'a Client,
    calls: Vec<(String, Value)>,
}

impl<'a> BulkRequest<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            calls: Vec::new(),
        }
    }

    /// Add a call to the batch.
    pub fn prepare(&mut self, method: &str, params: Value) -> BulkPart {
        let part = BulkPart(self.calls.len());
        self.calls
            .push((method.to_owned(), self.client.prepare_params(params)));
        part
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Send the batch. An empty batch resolves without a request.
    pub async fn call(self) -> Result<BulkResponse, CoreError> {
        if self.calls.is_empty() {
            return Ok(BulkResponse {
                results: Vec::new(),
            });
        }
        let results = self.client.gateway().call_bulk(self.calls).await?;
        Ok(BulkResponse {
            results: results.into_iter().map(Some).collect(),
        })
    }
}

/// Per-part results of a bulk call.
#[derive(Debug)]
pub struct BulkResponse {
    results: Vec<Option<Result<Value, CoreError>>>,
}

impl BulkResponse {
    /// Take the result of one part. Each part can be taken once.
    pub fn take(&mut self, part: BulkPart) -> Option<Result<Value, CoreError>> {
        self.results.get_mut(part.0).and_then(Option::take)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
