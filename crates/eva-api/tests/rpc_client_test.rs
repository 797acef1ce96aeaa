#![allow(clippy::unwrap_used)]
// Integration tests for `RpcClient` and `BulkRequest` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use eva_api::error::{CODE_INVALID_RESPONSE, CODE_SERVER_ERROR};
use eva_api::{Error, RpcClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, RpcClient) {
    let server = MockServer::start().await;
    let api_uri = Url::parse(&server.uri()).unwrap();
    let client = RpcClient::with_client(reqwest::Client::new(), &api_uri).unwrap();
    (server, client)
}

// ── Single calls ────────────────────────────────────────────────────

#[tokio::test]
async fn test_call_success() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jrpc"))
        .and(body_json(json!({
            "jsonrpc": "2.0",
            "method": "test",
            "params": {"k": "token"},
            "id": 1
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"system_name": "plant1", "time": 1_700_000_000.5}
        })))
        .mount(&server)
        .await;

    let result = client.call("test", json!({"k": "token"})).await.unwrap();
    assert_eq!(result["system_name"], "plant1");
}

#[tokio::test]
async fn test_call_remote_error_verbatim() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jrpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32022, "message": "|OTP|totp|REQ"}
        })))
        .mount(&server)
        .await;

    let err = client.call("login", json!({"u": "op"})).await.unwrap_err();
    match err {
        Error::Rpc { code, message, data } => {
            assert_eq!(code, -32022);
            assert_eq!(message, "|OTP|totp|REQ");
            assert!(data.is_none());
        }
        other => panic!("expected Rpc error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_call_id_mismatch_is_invalid_response() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jrpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 42,
            "result": true
        })))
        .mount(&server)
        .await;

    let err = client.call("test", json!({})).await.unwrap_err();
    assert!(
        matches!(err, Error::InvalidResponse { .. }),
        "expected InvalidResponse, got: {err:?}"
    );
    assert_eq!(err.code(), CODE_INVALID_RESPONSE);
}

#[tokio::test]
async fn test_call_http_failure_is_server_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jrpc"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client.call("test", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Server { status: 500 }), "got: {err:?}");
    assert_eq!(err.code(), CODE_SERVER_ERROR);
}

#[tokio::test]
async fn test_call_garbage_body_is_invalid_response() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jrpc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = client.call("test", json!({})).await.unwrap_err();
    match err {
        Error::InvalidResponse { body, .. } => assert_eq!(body, "<html>proxy</html>"),
        other => panic!("expected InvalidResponse, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_call_null_result_is_success() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jrpc"))
        .and(body_partial_json(json!({"method": "logout"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": null
        })))
        .mount(&server)
        .await;

    let result = client.call("logout", json!({"a": "token"})).await.unwrap();
    assert!(result.is_null());
}

// ── Bulk calls ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_bulk_resolves_parts_independently() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jrpc"))
        .and(body_json(json!([
            {"jsonrpc": "2.0", "method": "item.state", "params": {"i": "sensor:env/temp1"}, "id": 1},
            {"jsonrpc": "2.0", "method": "action.result", "params": {"u": "nope"}, "id": 2}
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"jsonrpc": "2.0", "id": 2, "error": {"code": -32001, "message": "not found"}},
            {"jsonrpc": "2.0", "id": 1, "result": [{"oid": "sensor:env/temp1", "status": 1}]}
        ])))
        .mount(&server)
        .await;

    let mut bulk = client.bulk();
    let state = bulk.prepare("item.state", json!({"i": "sensor:env/temp1"}));
    let action = bulk.prepare("action.result", json!({"u": "nope"}));
    assert_eq!(bulk.len(), 2);

    let mut response = bulk.call().await.unwrap();
    let states = response.take(state).unwrap().unwrap();
    assert_eq!(states[0]["oid"], "sensor:env/temp1");

    let err = response.take(action).unwrap().unwrap_err();
    assert_eq!(err.code(), -32001);

    // Already taken.
    assert!(response.take(state).is_none());
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_bulk_non_array_reply_fails_whole_batch() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jrpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": true
        })))
        .mount(&server)
        .await;

    let mut bulk = client.bulk();
    bulk.prepare("test", json!({}));
    let err = bulk.call().await.unwrap_err();
    assert_eq!(err.code(), CODE_INVALID_RESPONSE);
}

#[tokio::test]
async fn test_bulk_shares_id_counter_with_single_calls() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jrpc"))
        .and(body_partial_json(json!({"method": "test"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {}
        })))
        .mount(&server)
        .await;

    client.call("test", json!({})).await.unwrap();

    let mut bulk = client.bulk();
    let part = bulk.prepare("test", json!({}));
    assert_eq!(part.id(), 2);
}
