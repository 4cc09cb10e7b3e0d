//! In-memory controller for tests
//!
//! [`MockDevice`] implements [`DeviceGateway`] without any I/O. It records
//! writes and can simulate authentication failures and outages.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use whb_conv::{value_to_device_string, Datapoint, ResourceKind};

use crate::error::{DeviceError, Result};
use crate::gateway::DeviceGateway;

/// Scriptable in-memory controller
#[derive(Debug)]
pub struct MockDevice {
    subnet: u32,
    lookups: RwLock<HashMap<String, Value>>,
    datapoints: RwLock<BTreeMap<String, Datapoint>>,
    resources: RwLock<HashMap<ResourceKind, String>>,
    writes: RwLock<Vec<(String, String)>>,
    reject_credentials: RwLock<bool>,
    unreachable_for: AtomicU32,
    requests: AtomicUsize,
}

impl MockDevice {
    pub fn new(subnet: u32) -> Self {
        Self {
            subnet,
            lookups: RwLock::new(HashMap::new()),
            datapoints: RwLock::new(BTreeMap::new()),
            resources: RwLock::new(HashMap::new()),
            writes: RwLock::new(Vec::new()),
            reject_credentials: RwLock::new(false),
            unreachable_for: AtomicU32::new(0),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn subnet(&self) -> u32 {
        self.subnet
    }

    /// Register a function in the subnet listing
    pub fn with_function(self, node: u32, fct: u32, fct_type: i64, name: &str) -> Self {
        self.add_function(node, fct, fct_type, name, false);
        self
    }

    /// Register a locked function in the subnet listing
    pub fn with_locked_function(self, node: u32, fct: u32, fct_type: i64, name: &str) -> Self {
        self.add_function(node, fct, fct_type, name, true);
        self
    }

    /// Answer `lookup(path)` with `value`
    pub fn with_lookup(self, path: &str, value: Value) -> Self {
        self.lookups.write().insert(path.to_string(), value);
        self
    }

    /// Add a cached datapoint
    pub fn with_datapoint(self, datapoint: Datapoint) -> Self {
        self.set_datapoint(datapoint);
        self
    }

    /// Serve a text resource
    pub fn with_resource(self, kind: ResourceKind, xml: &str) -> Self {
        self.resources.write().insert(kind, xml.to_string());
        self
    }

    fn add_function(&self, node: u32, fct: u32, fct_type: i64, name: &str, lock: bool) {
        let path = format!("/{}", self.subnet);
        let mut lookups = self.lookups.write();
        let nodes = lookups.entry(path).or_insert_with(|| json!([]));
        let Some(nodes) = nodes.as_array_mut() else {
            return;
        };
        let entry = json!({ "fctId": fct, "fctType": fct_type, "name": name, "lock": lock });
        match nodes.iter_mut().find(|n| n["nodeId"] == json!(node)) {
            Some(existing) => {
                if let Some(functions) = existing["functions"].as_array_mut() {
                    functions.push(entry);
                }
            }
            None => nodes.push(json!({ "nodeId": node, "functions": [entry] })),
        }
    }

    /// Insert or replace a cached datapoint
    pub fn set_datapoint(&self, datapoint: Datapoint) {
        self.datapoints
            .write()
            .insert(datapoint.oid.clone(), datapoint);
    }

    /// Change the cached value of a datapoint
    pub fn set_value(&self, oid: &str, value: &str) {
        if let Some(dp) = self.datapoints.write().get_mut(oid) {
            dp.value = Some(Value::String(value.to_string()));
        }
    }

    /// Drop a datapoint from the cache
    pub fn remove_datapoint(&self, oid: &str) {
        self.datapoints.write().remove(oid);
    }

    /// Current cached value of a datapoint
    pub fn value(&self, oid: &str) -> Option<String> {
        self.datapoints.read().get(oid).and_then(|dp| dp.value_string())
    }

    /// Reject every request with `AuthenticationFailed`
    pub fn reject_credentials(&self, reject: bool) {
        *self.reject_credentials.write() = reject;
    }

    /// Fail the next `count` requests with `Unreachable`
    pub fn set_unreachable_for(&self, count: u32) {
        self.unreachable_for.store(count, Ordering::SeqCst);
    }

    /// Writes received so far as `(oid, value)`
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.read().clone()
    }

    /// Number of requests received so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if *self.reject_credentials.read() {
            return Err(DeviceError::AuthenticationFailed(
                "mock device rejects credentials".to_string(),
            ));
        }
        let pending = self.unreachable_for.load(Ordering::SeqCst);
        if pending > 0 {
            self.unreachable_for.store(pending - 1, Ordering::SeqCst);
            return Err(DeviceError::Unreachable("mock device offline".to_string()));
        }
        Ok(())
    }

    fn not_found(what: &str) -> DeviceError {
        DeviceError::request_failed(Some(404), format!("{} not found", what))
    }
}

#[async_trait]
impl DeviceGateway for MockDevice {
    async fn lookup(&self, path: Option<&str>) -> Result<Value> {
        self.check()?;
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            return Ok(json!([self.subnet]));
        };
        if let Some(value) = self.lookups.read().get(path) {
            return Ok(value.clone());
        }
        match self.datapoints.read().get(path) {
            Some(dp) => Ok(serde_json::to_value(dp)
                .map_err(|e| DeviceError::request_failed(Some(500), e.to_string()))?),
            None => Err(Self::not_found(path)),
        }
    }

    async fn read_datapoint(&self, oid: &str) -> Result<Datapoint> {
        self.check()?;
        self.datapoints
            .read()
            .get(oid)
            .cloned()
            .ok_or_else(|| Self::not_found(oid))
    }

    async fn read_all_datapoints(&self) -> Result<Vec<Datapoint>> {
        self.check()?;
        Ok(self.datapoints.read().values().cloned().collect())
    }

    async fn write_datapoint(&self, oid: &str, value: &Value) -> Result<()> {
        self.check()?;
        let text = value_to_device_string(value);
        let mut datapoints = self.datapoints.write();
        let dp = datapoints.get_mut(oid).ok_or_else(|| Self::not_found(oid))?;
        dp.value = Some(Value::String(text.clone()));
        self.writes.write().push((oid.to_string(), text));
        Ok(())
    }

    async fn resource_text(&self, kind: ResourceKind, _lang: &str) -> Result<String> {
        self.check()?;
        self.resources
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| Self::not_found(kind.file_stem()))
    }
}
