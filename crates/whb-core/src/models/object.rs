//! Host object models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key in `native` that ties a state to a controller OID
pub const NATIVE_OID: &str = "OID";
/// Key in `native` that carries the function type of a device object
pub const NATIVE_FCT_TYPE: &str = "fctType";

/// Kind of host object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// Adapter instance (carries `common.enabled`)
    Instance,
    Folder,
    Device,
    Channel,
    State,
    Meta,
}

/// Common metadata of a host object
///
/// Fields the bridge does not interpret are kept in `extra` so that objects
/// survive export/import unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectCommon {
    /// Display name (plain string or per-language map)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    /// Value type: `number`, `string`, `boolean`, `json`, ...
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Enum labels keyed by raw value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObjectCommon {
    /// Common metadata with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(Value::String(name.into())),
            ..Default::default()
        }
    }
}

/// A structured object in the host store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostObject {
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    #[serde(default)]
    pub common: ObjectCommon,
    #[serde(default)]
    pub native: Map<String, Value>,
}

impl HostObject {
    pub fn new(object_type: ObjectType, common: ObjectCommon) -> Self {
        Self {
            object_type,
            common,
            native: Map::new(),
        }
    }

    /// Device object of a controller function
    pub fn device(name: impl Into<String>, fct_type: i64) -> Self {
        let mut obj = Self::new(ObjectType::Device, ObjectCommon::named(name));
        obj.native
            .insert(NATIVE_FCT_TYPE.to_string(), Value::from(fct_type));
        obj
    }

    /// Channel object grouping states of one level
    pub fn channel(name: impl Into<String>) -> Self {
        Self::new(ObjectType::Channel, ObjectCommon::named(name))
    }

    /// State object tied to a controller OID
    pub fn state(common: ObjectCommon, oid: impl Into<String>) -> Self {
        let mut obj = Self::new(ObjectType::State, common);
        obj.native
            .insert(NATIVE_OID.to_string(), Value::String(oid.into()));
        obj
    }

    pub fn is_state(&self) -> bool {
        self.object_type == ObjectType::State
    }

    /// Controller OID recorded in `native.OID`
    pub fn oid(&self) -> Option<&str> {
        self.native
            .get(NATIVE_OID)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Function type recorded in `native.fctType`
    pub fn fct_type(&self) -> Option<i64> {
        match self.native.get(NATIVE_FCT_TYPE)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Whether `common.enabled` is not explicitly false
    pub fn is_enabled(&self) -> bool {
        self.common
            .extra
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// One row of a range view query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    pub id: String,
    pub value: HostObject,
}
