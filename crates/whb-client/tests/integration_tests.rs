//! Integration tests for whb-client
//!
//! These tests serve a MockDevice over HTTP with a digest challenge and
//! drive the real DeviceClient against it.

use serde_json::json;
use whb_client::testing::{TestDevice, TEST_USER};
use whb_client::{DeviceError, DeviceGateway, MockDevice};
use whb_conv::{Datapoint, ResourceKind};

// =============================================================================
// Fixtures
// =============================================================================

fn datapoint(oid: &str, value: &str) -> Datapoint {
    Datapoint {
        oid: oid.to_string(),
        type_id: Some(9),
        unit: Some("°C".to_string()),
        value: Some(json!(value)),
        ..Default::default()
    }
}

fn device() -> MockDevice {
    MockDevice::new(60)
        .with_function(1, 1, 10, "Heizkreis 1")
        .with_function(1, 2, 14, "Modul")
        .with_lookup("/60/1/1", json!([{ "id": 1, "name": "Betriebswahl" }]))
        .with_datapoint(datapoint("/60/1/1/0/1/0", "20.5"))
        .with_datapoint(datapoint("/60/1/1/0/2/0", "45"))
        .with_resource(
            ResourceKind::DatapointNames,
            r#"<VarIdentTexte><gn id="0"><mn id="1">Raumtemperatur</mn></gn></VarIdentTexte>"#,
        )
}

// =============================================================================
// Structure queries
// =============================================================================

#[tokio::test]
async fn test_discover_subnet() {
    let device = TestDevice::start(device()).await.unwrap();

    let subnet = device.client.discover_subnet().await.unwrap();
    assert_eq!(subnet, 60);
}

#[tokio::test]
async fn test_lookup_nodes() {
    let device = TestDevice::start(device()).await.unwrap();

    let nodes = device.client.lookup(Some("/60")).await.unwrap();
    let functions = nodes[0]["functions"].as_array().unwrap();
    assert_eq!(functions.len(), 2);
    assert_eq!(functions[1]["fctType"], json!(14));

    let levels = device.client.lookup(Some("/60/1/1")).await.unwrap();
    assert_eq!(levels[0]["id"], json!(1));
}

#[tokio::test]
async fn test_lookup_unknown_path_fails_with_status() {
    let device = TestDevice::start(device()).await.unwrap();

    let err = device.client.lookup(Some("/60/9/9")).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(!err.is_retryable());
}

// =============================================================================
// Datapoint reads and writes
// =============================================================================

#[tokio::test]
async fn test_read_datapoint() {
    let device = TestDevice::start(device()).await.unwrap();

    let dp = device.client.read_datapoint("/60/1/1/0/1/0").await.unwrap();
    assert_eq!(dp.oid, "/60/1/1/0/1/0");
    assert_eq!(dp.value_string().as_deref(), Some("20.5"));
}

#[tokio::test]
async fn test_read_all_datapoints() {
    let device = TestDevice::start(device()).await.unwrap();

    let dps = device.client.read_all_datapoints().await.unwrap();
    let oids: Vec<_> = dps.iter().map(|dp| dp.oid.as_str()).collect();
    assert_eq!(oids, vec!["/60/1/1/0/1/0", "/60/1/1/0/2/0"]);
}

#[tokio::test]
async fn test_write_sends_string_value() {
    let device = TestDevice::start(device()).await.unwrap();

    device
        .client
        .write_datapoint("/60/1/1/0/1/0", &json!(22))
        .await
        .unwrap();

    assert_eq!(
        device.device.writes(),
        vec![("/60/1/1/0/1/0".to_string(), "22".to_string())]
    );
    let dp = device.client.read_datapoint("/60/1/1/0/1/0").await.unwrap();
    assert_eq!(dp.value_string().as_deref(), Some("22"));
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_challenge_is_cached() {
    let device = TestDevice::start(device()).await.unwrap();

    device.client.discover_subnet().await.unwrap();
    device.client.read_all_datapoints().await.unwrap();
    device.client.read_datapoint("/60/1/1/0/2/0").await.unwrap();

    assert_eq!(device.challenges_issued(), 1);
}

#[tokio::test]
async fn test_wrong_credentials() {
    let device = TestDevice::start_with_credentials(device(), "intruder", "guess")
        .await
        .unwrap();

    let err = device.client.discover_subnet().await.unwrap_err();
    assert!(matches!(err, DeviceError::AuthenticationFailed(_)));
    assert!(!err.is_retryable());
    assert_eq!(device.challenges_issued(), 2);
}

#[tokio::test]
async fn test_wrong_password() {
    let device = TestDevice::start_with_credentials(device(), TEST_USER, "definitely-wrong")
        .await
        .unwrap();

    let err = device.client.discover_subnet().await.unwrap_err();
    assert!(matches!(err, DeviceError::AuthenticationFailed(_)));
    assert_eq!(device.challenges_issued(), 2);
    assert!(device.device.writes().is_empty());
}

// =============================================================================
// Resources
// =============================================================================

#[tokio::test]
async fn test_resource_text() {
    let device = TestDevice::start(device()).await.unwrap();

    let xml = device
        .client
        .resource_text(ResourceKind::DatapointNames, "de")
        .await
        .unwrap();
    assert!(xml.contains("Raumtemperatur"));

    let err = device
        .client
        .resource_text(ResourceKind::ErrorTexts, "de")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}
