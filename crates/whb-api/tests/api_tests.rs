//! HTTP tests of the bridge API against an in-memory controller and store

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use whb_api::{create_router, AppState};
use whb_bridge::{Bridge, BridgeSettings};
use whb_client::testing::wait_for;
use whb_client::{DeviceGateway, MockDevice};
use whb_conv::{Datapoint, FunctionTypeConfig};
use whb_core::{HostStore, MemoryStore};

const TEMP_OID: &str = "/60/1/1/0/1/0";
const TEMP_ID: &str = "windhager.0.60.1-1.1.00-001";
const LAST_ID: &str = "windhager.0.60.1-2.2.02-010";

const CONFIG: &str = r#"
knownFctType:
  10:
    00-001:
      groupNr: 0
      memberNr: 1
      typeId: 9
      unit: "°C"
      minValue: "5"
      maxValue: "30"
      levelId: 1
    02-010:
      groupNr: 2
      memberNr: 10
      typeId: 30
      writeProt: true
      levelId: 2
"#;

// =============================================================================
// Test Server
// =============================================================================

/// API server on an ephemeral local port
struct TestServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(router: axum::Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            addr,
            handle,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Harness {
    device: Arc<MockDevice>,
    store: Arc<MemoryStore>,
    bridge: Arc<Bridge>,
    server: TestServer,
}

fn datapoint(oid: &str, type_id: i64, value: &str) -> Datapoint {
    Datapoint {
        oid: oid.to_string(),
        type_id: Some(type_id),
        value: Some(Value::String(value.to_string())),
        ..Default::default()
    }
}

async fn harness() -> Harness {
    let mut device = MockDevice::new(60)
        .with_function(1, 1, 10, "Heizkreis 1")
        .with_function(1, 2, 10, "Heizkreis 2");
    for fct in [1, 2] {
        device = device
            .with_datapoint(datapoint(&format!("/60/1/{}/0/1/0", fct), 9, "21.5"))
            .with_datapoint(datapoint(&format!("/60/1/{}/2/10/0", fct), 30, "Automatik"));
    }

    let device = Arc::new(device);
    let store = Arc::new(MemoryStore::new());
    let gateway: Arc<dyn DeviceGateway> = device.clone();
    let host: Arc<dyn HostStore> = store.clone();
    let settings = BridgeSettings {
        connect_retry_secs: 0,
        update_interval_secs: 3600,
        ..Default::default()
    };
    let config = FunctionTypeConfig::from_yaml(CONFIG).unwrap();
    let bridge = Arc::new(Bridge::new(settings, "de", gateway, host, config));
    let server = TestServer::start(create_router(AppState::new(bridge.clone()))).await;

    Harness {
        device,
        store,
        bridge,
        server,
    }
}

/// Harness with a connected bridge and a structure rebuilt from the device
async fn connected() -> Harness {
    let h = harness().await;
    h.bridge.ensure_control_objects().await.unwrap();
    h.store
        .set_state("windhager.0._initializeStructure", json!({"cmd": "windhager"}), false)
        .await
        .unwrap();
    h.bridge.start().await.unwrap();
    assert!(wait_for_state(&h.store, LAST_ID, (json!("Automatik"), true)).await);
    h
}

async fn wait_for_state(store: &MemoryStore, id: &str, expected: (Value, bool)) -> bool {
    let expected = &expected;
    wait_for(
        move || async move {
            let current = store
                .get_state(id)
                .await
                .unwrap()
                .map(|state| (state.val, state.ack));
            current.as_ref() == Some(expected)
        },
        Duration::from_secs(2),
    )
    .await
}

// =============================================================================
// Status
// =============================================================================

#[tokio::test]
async fn test_health() {
    let h = harness().await;
    let response = h.server.client.get(h.server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_functions_need_connection() {
    let h = harness().await;

    let response = h.server.client.get(h.server.url("/functions")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "service_unavailable");

    let status: Value = h
        .server
        .client
        .get(h.server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["connected"], false);
}

#[tokio::test]
async fn test_status_and_functions_when_connected() {
    let h = connected().await;

    let status: Value = h
        .server
        .client
        .get(h.server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["connected"], true);
    assert_eq!(status["subnet"], 60);
    assert_eq!(status["functions"], 2);
    assert_eq!(status["mappings"], 4);

    let functions: Value = h
        .server
        .client
        .get(h.server.url("/functions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(functions["subnet"], 60);
    assert_eq!(functions["items"].as_array().unwrap().len(), 2);
    assert_eq!(functions["items"][0]["functionId"], "1-1");

    h.bridge.shutdown().await;
}

// =============================================================================
// States
// =============================================================================

#[tokio::test]
async fn test_get_state() {
    let h = connected().await;

    let body: Value = h
        .server
        .client
        .get(h.server.url(&format!("/states/{}", TEMP_ID)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["id"], TEMP_ID);
    assert_eq!(body["object"]["native"]["OID"], TEMP_OID);
    assert_eq!(body["state"]["val"], 21.5);
    assert_eq!(body["state"]["ack"], true);

    let response = h
        .server
        .client
        .get(h.server.url("/states/windhager.0.60.9-9"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    h.bridge.shutdown().await;
}

#[tokio::test]
async fn test_list_states_under_prefix() {
    let h = connected().await;

    let body: Value = h
        .server
        .client
        .get(h.server.url("/states?prefix=windhager.0.60.1-2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"windhager.0.60.1-2"));
    assert!(ids.contains(&LAST_ID));
    assert!(ids.iter().all(|id| id.starts_with("windhager.0.60.1-2")));
    assert_eq!(body["count"], ids.len());

    h.bridge.shutdown().await;
}

#[tokio::test]
async fn test_put_state_writes_through() {
    let h = connected().await;
    let events = h.bridge.spawn_event_loop();

    let response = h
        .server
        .client
        .put(h.server.url(&format!("/states/{}", TEMP_ID)))
        .json(&json!({"val": 22.5}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ack"], false);

    assert!(wait_for_state(&h.store, TEMP_ID, (json!(22.5), true)).await);
    assert!(h
        .device
        .writes()
        .contains(&(TEMP_OID.to_string(), "22.5".to_string())));

    h.bridge.shutdown().await;
    events.await.unwrap();
}

#[tokio::test]
async fn test_put_unknown_state() {
    let h = harness().await;
    let response = h
        .server
        .client
        .put(h.server.url("/states/windhager.0.60.1-1.1.00-001"))
        .json(&json!({"val": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(h.device.writes().is_empty());
}

// =============================================================================
// Sync and Structure
// =============================================================================

#[tokio::test]
async fn test_sync() {
    let h = connected().await;
    h.device.set_value(TEMP_OID, "19");

    let report: Value = h
        .server
        .client
        .post(h.server.url("/sync"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["updated"], 4);
    assert_eq!(report["failed"], 0);
    assert!(wait_for_state(&h.store, TEMP_ID, (json!(19), true)).await);

    h.bridge.shutdown().await;
}

#[tokio::test]
async fn test_export_and_import_struct() {
    let h = connected().await;

    let doc: Value = h
        .server
        .client
        .get(h.server.url("/export?type=struct"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["model"], "windhager.adapter.export");
    assert_eq!(doc["type"], "struct");
    assert!(doc["fct"]["1-1"].is_object());
    assert!(doc["fctType"]["10"].is_object());

    let report: Value = h
        .server
        .client
        .post(h.server.url("/import?delete_first=true"))
        .json(&doc)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["failed"], 0);
    assert!(report["created"].as_u64().unwrap() > 0);
    assert_eq!(h.bridge.mapping().len(), 4);

    h.bridge.shutdown().await;
}

#[tokio::test]
async fn test_import_rejects_foreign_document() {
    let h = connected().await;

    let response = h
        .server
        .client
        .post(h.server.url("/import"))
        .json(&json!({"model": "other", "type": "flat", "states": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .server
        .client
        .post(h.server.url("/import"))
        .json(&json!({"model": "windhager.adapter.export", "type": "tree"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "bad_request");

    h.bridge.shutdown().await;
}

#[tokio::test]
async fn test_export_known() {
    let h = connected().await;

    let response = h
        .server
        .client
        .post(h.server.url("/export/known"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = response.json().await.unwrap();
    assert!(doc.is_object());
    assert!(h.store.get_state("windhager.0.export").await.unwrap().is_some());

    h.bridge.shutdown().await;
}
