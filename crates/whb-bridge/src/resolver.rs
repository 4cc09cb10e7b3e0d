//! Structure resolver
//!
//! Walks subnet -> node -> function once per connect cycle and keeps the
//! functions that are unlocked and have a configured type. An optional full
//! scan also walks every level of every function and collects the datapoint
//! definitions found there.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use whb_client::DeviceGateway;
use whb_conv::{Datapoint, FunctionTypeConfig};

use crate::error::{BridgeError, BridgeResult};
use crate::session::{FunctionInfo, FunctionTable};

/// Level holding the module capability datapoints
const MODULE_LEVEL: u32 = 103;
/// Module datapoint announcing domestic hot water
const MODULE_DHW: &str = "05-076";
/// Module datapoint announcing a heating circuit
const MODULE_HEATING: &str = "07-076";

/// Result of a full scan
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Datapoint definitions keyed by OID, without volatile fields
    pub known: BTreeMap<String, Datapoint>,
    /// Levels that could not be read
    pub failed: usize,
}

/// Build the function table of a subnet
///
/// Fails only if the node listing itself cannot be fetched or is not a list.
pub async fn resolve_functions(
    gateway: &dyn DeviceGateway,
    subnet: u32,
    config: &FunctionTypeConfig,
) -> BridgeResult<FunctionTable> {
    let nodes = gateway.lookup(Some(&format!("/{}", subnet))).await?;
    let nodes = nodes
        .as_array()
        .ok_or_else(|| BridgeError::MalformedResponse(format!("node listing of subnet {}", subnet)))?;

    let mut functions = FunctionTable::new();
    for node in nodes {
        let Some(node_id) = as_u32(&node["nodeId"]) else {
            warn!(node = %node, "Skipping node without nodeId");
            continue;
        };
        let Some(entries) = node["functions"].as_array() else {
            continue;
        };

        for entry in entries {
            let Some(fct_id) = as_u32(&entry["fctId"]) else {
                warn!(node = node_id, "Skipping function without fctId");
                continue;
            };
            let name = entry["name"].as_str().unwrap_or_default();
            let fct_type = as_i64(&entry["fctType"]);
            let locked = entry["lock"].as_bool().unwrap_or(false);

            let Some(fct_type) = fct_type.filter(|t| *t >= 0 && !locked) else {
                debug!(node = node_id, fct = fct_id, name, "Skipping locked or untyped function");
                continue;
            };
            if !config.is_known_type(fct_type) {
                debug!(node = node_id, fct = fct_id, fct_type, name, "Skipping unknown function type");
                continue;
            }

            let mut function = FunctionInfo::new(node_id, fct_id, fct_type, name);
            if config.is_module_type(fct_type) {
                read_module_flags(gateway, subnet, &mut function).await;
            }
            functions.insert(function.function_id.clone(), function);
        }
    }

    info!(subnet, functions = functions.len(), "Controller structure resolved");
    Ok(functions)
}

/// Set the module capability flags; failures leave them unset
async fn read_module_flags(gateway: &dyn DeviceGateway, subnet: u32, function: &mut FunctionInfo) {
    let path = format!("/{}/{}/{}/{}", subnet, function.node, function.fct, MODULE_LEVEL);
    let entries = match gateway.lookup(Some(&path)).await {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => {
            debug!(%path, "Module level is not a list");
            return;
        }
        Err(e) => {
            debug!(%path, %e, "Module lookup failed");
            return;
        }
    };

    for entry in entries {
        if !is_set(&entry["value"]) {
            continue;
        }
        match entry["name"].as_str() {
            Some(MODULE_DHW) => function.dhw = true,
            Some(MODULE_HEATING) => function.heating = true,
            _ => {}
        }
    }
}

/// Read every level of every function
///
/// Levels are read with at most `block_size` requests in flight. A level
/// that fails is logged and counted.
pub async fn full_scan(
    gateway: &dyn DeviceGateway,
    subnet: u32,
    functions: &FunctionTable,
    block_size: usize,
) -> ScanResult {
    let block_size = block_size.max(1);
    info!(functions = functions.len(), "Full scan of the controller, this takes a while");

    let level_lists: Vec<_> = stream::iter(functions.values().cloned())
        .map(|function| async move {
            let path = format!("/{}/{}/{}", subnet, function.node, function.fct);
            (function, gateway.lookup(Some(&path)).await)
        })
        .buffer_unordered(block_size)
        .collect()
        .await;

    let mut result = ScanResult::default();
    let mut levels = Vec::new();
    for (function, listing) in level_lists {
        match listing {
            Ok(Value::Array(entries)) => {
                for entry in entries {
                    match as_i64(&entry["id"]) {
                        Some(level) => levels.push((function.clone(), level)),
                        None => warn!(function = %function.function_id, "Level without id"),
                    }
                }
            }
            Ok(_) => {
                error!(function = %function.function_id, "Level listing is not a list");
                result.failed += 1;
            }
            Err(e) => {
                error!(function = %function.function_id, %e, "Failed to list levels");
                result.failed += 1;
            }
        }
    }

    let level_reads: Vec<_> = stream::iter(levels)
        .map(|(function, level)| async move {
            let path = format!("/{}/{}/{}/{}", subnet, function.node, function.fct, level);
            (path.clone(), level, gateway.lookup(Some(&path)).await)
        })
        .buffer_unordered(block_size)
        .collect()
        .await;

    for (path, level, answer) in level_reads {
        let entries = match answer {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                error!(%path, "Level datapoints are not a list");
                result.failed += 1;
                continue;
            }
            Err(e) => {
                error!(%path, %e, "Failed to read level");
                result.failed += 1;
                continue;
            }
        };
        for entry in entries {
            match serde_json::from_value::<Datapoint>(entry) {
                Ok(mut dp) if !dp.oid.is_empty() => {
                    dp.strip_volatile();
                    dp.level_id = Some(level);
                    result.known.insert(dp.oid.clone(), dp);
                }
                Ok(_) => warn!(%path, "Datapoint without OID"),
                Err(e) => warn!(%path, %e, "Malformed datapoint"),
            }
        }
    }

    info!(datapoints = result.known.len(), failed = result.failed, "Full scan finished");
    result
}

fn as_u32(value: &Value) -> Option<u32> {
    as_i64(value).and_then(|v| u32::try_from(v).ok())
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Controller flags are `0`/`1` as number or string
fn is_set(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => s.trim().parse::<f64>().map(|v| v != 0.0).unwrap_or(false),
        Value::Bool(b) => *b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use whb_client::MockDevice;

    fn config() -> FunctionTypeConfig {
        FunctionTypeConfig::from_yaml(
            r#"
knownFctType:
  10: {}
  14: {}
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_filters_functions() {
        let device = MockDevice::new(60)
            .with_function(1, 1, 10, "Heizkreis")
            .with_locked_function(1, 2, 10, "Gesperrt")
            .with_function(1, 3, -1, "Ohne Typ")
            .with_function(2, 1, 99, "Unbekannt")
            .with_function(2, 2, 14, "Modul")
            .with_lookup(
                "/60/2/2/103",
                json!([
                    { "name": "05-076", "value": "1" },
                    { "name": "07-076", "value": "0" }
                ]),
            );

        let functions = resolve_functions(&device, 60, &config()).await.unwrap();
        let ids: Vec<_> = functions.keys().cloned().collect();
        assert_eq!(ids, vec!["1-1", "2-2"]);
        assert!(functions["2-2"].dhw);
        assert!(!functions["2-2"].heating);
        assert!(!functions["1-1"].dhw);
    }

    #[tokio::test]
    async fn test_module_flags_are_best_effort() {
        let device = MockDevice::new(60).with_function(1, 1, 14, "Modul");

        let functions = resolve_functions(&device, 60, &config()).await.unwrap();
        assert_eq!(functions.len(), 1);
        assert!(!functions["1-1"].dhw);
    }

    #[tokio::test]
    async fn test_resolve_fails_without_listing() {
        let device = MockDevice::new(60);
        assert!(resolve_functions(&device, 60, &config()).await.is_err());

        let device = MockDevice::new(60).with_lookup("/60", json!({"nodes": []}));
        assert!(matches!(
            resolve_functions(&device, 60, &config()).await,
            Err(BridgeError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_full_scan() {
        let device = MockDevice::new(60)
            .with_function(1, 1, 10, "Heizkreis")
            .with_function(1, 2, 10, "Heizkreis 2")
            .with_lookup("/60/1/1", json!([{ "id": 1 }, { "id": 2 }]))
            .with_lookup(
                "/60/1/1/1",
                json!([{
                    "OID": "/60/1/1/0/1/0",
                    "name": "00-001",
                    "typeId": 9,
                    "value": "21.5",
                    "stepId": 3,
                    "timestamp": "2024-01-01"
                }]),
            )
            .with_lookup("/60/1/1/2", json!([{ "OID": "/60/1/1/1/12/0", "typeId": 4 }]));

        let functions = resolve_functions(&device, 60, &config()).await.unwrap();
        let scan = full_scan(&device, 60, &functions, 4).await;

        assert_eq!(scan.known.len(), 2);
        assert_eq!(scan.failed, 1);
        let dp = &scan.known["/60/1/1/0/1/0"];
        assert_eq!(dp.level_id, Some(1));
        assert!(dp.value.is_none());
        assert!(!dp.extra.contains_key("stepId"));
        assert!(!dp.extra.contains_key("timestamp"));
        assert_eq!(scan.known["/60/1/1/1/12/0"].level_id, Some(2));
    }

    #[test]
    fn test_is_set() {
        assert!(is_set(&json!(1)));
        assert!(is_set(&json!("1")));
        assert!(!is_set(&json!("0")));
        assert!(!is_set(&json!(0)));
        assert!(!is_set(&Value::Null));
    }
}
