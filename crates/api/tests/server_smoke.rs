use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use ddocache_api::server::{build_app, ApiRuntimeConfig};
use ddocache_core::{make_did, Address};
use ddocache_indexer::storage::{CursorKind, DdoState, RetryEntry, RetryKind, Storage};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const CHAIN_ID: u64 = 8996;

fn nft() -> Address {
    "0x6f7f1e9b3b8ffaa3e04e1b66e4f1b2c7d6d9c8e1".parse().unwrap()
}

fn dataset() -> Value {
    json!({
        "@context": ["https://w3id.org/did/v1"],
        "id": make_did(&nft(), CHAIN_ID).to_string(),
        "version": "4.1.0",
        "chainId": CHAIN_ID,
        "nftAddress": nft().to_string(),
        "metadata": {
            "created": "2021-12-20T14:35:20Z",
            "updated": "2021-12-20T14:35:20Z",
            "type": "dataset",
            "name": "Weather readings",
            "description": "Hourly readings from 40 stations",
            "author": "Met",
            "license": "MIT"
        },
        "services": [{
            "id": "0",
            "type": "access",
            "files": "0xdeadbeef",
            "datatokenAddress": "0x0a2f4a24f3e1e4c7e0a0b2f95c8ca7e3f8f3b1a2",
            "serviceEndpoint": "https://provider.example",
            "timeout": 0
        }]
    })
}

/// Seeded database plus a router over it. The directory must outlive the app.
async fn seeded_app() -> (Router, TempDir) {
    let temp = TempDir::new().expect("tempdir");
    let db_path = temp.path().join("ddocache.db");
    let db_url = format!("sqlite://{}", db_path.display());

    let storage = Storage::new(&db_url, None, None).await.expect("storage");
    storage.run_migrations().await.expect("migrations");

    storage
        .reset_cursor(CHAIN_ID, CursorKind::Logs, 120)
        .await
        .expect("cursor");
    storage
        .reset_cursor(137, CursorKind::Logs, 9)
        .await
        .expect("cursor");

    let did = make_did(&nft(), CHAIN_ID).to_string();
    storage
        .record_state(&DdoState {
            chain_id: CHAIN_ID,
            nft: nft().to_string(),
            tx: format!("0x{}", "ab".repeat(32)),
            did: Some(did.clone()),
            valid: false,
            message: "Decrypt failed: 403".to_string(),
            timestamp: 1_700_000_000,
        })
        .await
        .expect("state");

    storage
        .insert_retry(&RetryEntry {
            id: "a".repeat(64),
            kind: RetryKind::Tx,
            chain_id: CHAIN_ID,
            nft_address: Some(nft().to_string()),
            did: Some(did),
            params: json!({ "txId": format!("0x{}", "cd".repeat(32)) }),
            number_retries: 1,
            next_retry: 1_700_000_300,
            first_added: 1_700_000_000,
            last_error: Some("connection refused".to_string()),
        })
        .await
        .expect("retry");
    storage
        .insert_retry(&RetryEntry {
            id: "b".repeat(64),
            kind: RetryKind::Block,
            chain_id: 137,
            nft_address: None,
            did: None,
            params: json!({ "blockNumber": 42 }),
            number_retries: 0,
            next_retry: 1_700_000_300,
            first_added: 1_700_000_000,
            last_error: None,
        })
        .await
        .expect("retry");
    storage.close().await;

    let app = build_app(&ApiRuntimeConfig::for_test(db_url))
        .await
        .expect("build app");
    (app, temp)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_validate(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/ddo/validate")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _temp) = seeded_app().await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn validate_accepts_conforming_ddo() {
    let (app, _temp) = seeded_app().await;
    let (status, body) = send(&app, post_validate(dataset().to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true, "{body}");
    assert_eq!(body["errors"], json!({}));
}

#[tokio::test]
async fn validate_ignores_system_fields() {
    let (app, _temp) = seeded_app().await;
    let mut ddo = dataset();
    ddo["event"] = json!({ "tx": "0x01", "block": 7 });
    ddo["purgatory"] = json!({ "state": false });

    let (status, body) = send(&app, post_validate(ddo.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true, "{body}");
}

#[tokio::test]
async fn validate_reports_field_errors() {
    let (app, _temp) = seeded_app().await;
    let mut ddo = dataset();
    ddo["metadata"].as_object_mut().unwrap().remove("name");

    let (status, body) = send(&app, post_validate(ddo.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["errors"]["metadata.name"], "Less than 1 values");
}

#[tokio::test]
async fn validate_rejects_malformed_json() {
    let (app, _temp) = seeded_app().await;
    let (status, body) = send(&app, post_validate("{\"version\": ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn chains_list_and_status() {
    let (app, _temp) = seeded_app().await;

    let (status, body) = send(&app, get("/chains/list")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "137": true, "8996": true }));

    let (status, body) = send(&app, get("/chains/status/8996")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["last_block"], 120);
    assert!(body["updated_at"].as_i64().unwrap() > 0);

    let (status, body) = send(&app, get("/chains/status/1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn ddo_state_lookups() {
    let (app, _temp) = seeded_app().await;
    let did = make_did(&nft(), CHAIN_ID).to_string();

    let lower_nft = format!("{:#x}", nft());
    let (status, body) = send(
        &app,
        get(&format!("/state/ddo?chainId={}&nft={}", CHAIN_ID, lower_nft)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["message"], "Decrypt failed: 403");
    assert_eq!(body["did"], did.as_str());

    let tx = format!("0x{}", "AB".repeat(32));
    let (status, body) = send(&app, get(&format!("/state/ddo?txId={}", tx))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chainId"], CHAIN_ID);

    let (status, _) = send(&app, get(&format!("/state/ddo?did={}", did))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        get(&format!("/state/ddo?chainId=137&nft={}", lower_nft)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, get("/state/ddo?chainId=8996")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn retry_queue_filters() {
    let (app, _temp) = seeded_app().await;

    let (status, body) = send(&app, get("/state/retryQueue")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&app, get("/state/retryQueue?chainId=8996")).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["type"], "tx");
    assert_eq!(entries[0]["number_retries"], 1);

    let (_, body) = send(&app, get("/state/retryQueue?type=block")).await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["chainId"], 137);

    let upper_nft = nft().to_string().to_uppercase().replacen("0X", "0x", 1);
    let (_, body) = send(&app, get(&format!("/state/retryQueue?nft={}", upper_nft))).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, get("/state/retryQueue?type=receipt")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
