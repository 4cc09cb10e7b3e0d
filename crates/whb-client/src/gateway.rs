//! DeviceGateway trait - the core abstraction over the controller API

use async_trait::async_trait;
use serde_json::Value;
use whb_conv::{Datapoint, ResourceKind};

use crate::error::{DeviceError, Result};

/// Authenticated request/response exchange with one controller
///
/// Writes to the same OID must be serialized by the caller.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Realtime structural/value query (`/api/1.0/lookup[path]`)
    async fn lookup(&self, path: Option<&str>) -> Result<Value>;

    /// Cached single datapoint read
    async fn read_datapoint(&self, oid: &str) -> Result<Datapoint>;

    /// Cached read of every datapoint
    async fn read_all_datapoints(&self) -> Result<Vec<Datapoint>>;

    /// Write a datapoint; the value is sent in its string form
    async fn write_datapoint(&self, oid: &str, value: &Value) -> Result<()>;

    /// Raw XML of a static text resource
    async fn resource_text(&self, kind: ResourceKind, _lang: &str) -> Result<String> {
        Err(DeviceError::NotSupported(format!(
            "resource {}",
            kind.file_stem()
        )))
    }

    /// Subnet id: first element of the unparameterized lookup
    async fn discover_subnet(&self) -> Result<u32> {
        let root = self.lookup(None).await?;
        parse_subnet(&root)
    }
}

/// Extract the subnet id from the root lookup answer
pub fn parse_subnet(root: &Value) -> Result<u32> {
    let first = root.as_array().and_then(|a| a.first());
    let subnet = match first {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    subnet.ok_or_else(|| DeviceError::request_failed(None, format!("unexpected subnet listing: {}", root)))
}

/// Decode a datapoint answer; the controller answers some reads with a
/// one-element list.
pub fn parse_datapoint(value: Value) -> Result<Datapoint> {
    let value = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    let body = value.to_string();
    serde_json::from_value(value).map_err(|e| {
        DeviceError::request_failed(None, format!("malformed datapoint ({}): {}", e, body))
    })
}
