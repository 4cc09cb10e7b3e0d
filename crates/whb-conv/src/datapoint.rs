//! Raw datapoints as reported by the controller
//!
//! The controller is loose about JSON types (numbers arrive as strings and
//! vice versa), so the numeric fields are kept as [`Value`] and read through
//! the accessor methods.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::oid::{format_name, Oid};

/// Fields that change on every read and are dropped from known datapoints
const VOLATILE_FIELDS: [&str; 2] = ["stepId", "timestamp"];

/// One datapoint of a controller function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datapoint {
    /// Full OID (`/subnet/node/fct/group/member/ext`)
    #[serde(rename = "OID", default, skip_serializing_if = "String::is_empty")]
    pub oid: String,
    /// `GG-MMM` name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_nr: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_nr: Option<u32>,
    /// Raw controller type id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Current value (string encoded by the controller)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_prot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Value>,
    /// Permitted raw codes, encoded as `"[0,1,2]"`
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<String>,
    /// UI level the datapoint belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_id: Option<i64>,
    /// Localized display names (configuration entries only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<BTreeMap<String, String>>,
    /// Remaining controller fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Datapoint {
    /// Parse the datapoint OID
    pub fn parsed_oid(&self) -> crate::ConvResult<Oid> {
        Oid::parse(&self.oid)
    }

    /// Datapoint name, from the `name` field or derived from the coordinates
    pub fn resolved_name(&self) -> Option<String> {
        if let Some(name) = &self.name {
            return Some(name.clone());
        }
        match (self.group_nr, self.member_nr) {
            (Some(g), Some(m)) => format_name(g as i64, m as i64).ok(),
            _ => Oid::parse(&self.oid).ok().map(|o| o.name()),
        }
    }

    /// Numeric unit code, from `unitId` or a numeric `unit`
    pub fn unit_code(&self) -> Option<i64> {
        self.unit_id
            .as_ref()
            .and_then(as_i64)
            .or_else(|| self.unit.as_deref().and_then(|u| u.trim().parse().ok()))
    }

    /// Lower bound as a number; garbled bounds are ignored
    pub fn min_bound(&self) -> Option<f64> {
        self.min_value.as_ref().and_then(as_f64)
    }

    /// Upper bound as a number; garbled bounds are ignored
    pub fn max_bound(&self) -> Option<f64> {
        self.max_value.as_ref().and_then(as_f64)
    }

    /// Decode the `"[a,b,c]"` enum list into codes
    ///
    /// Entries that are not integers are skipped; an empty result is `None`.
    pub fn enum_codes(&self) -> Option<Vec<i64>> {
        let raw = self.enumeration.as_deref()?.trim();
        let inner = raw.strip_prefix('[').unwrap_or(raw);
        let inner = inner.strip_suffix(']').unwrap_or(inner);
        let codes: Vec<i64> = inner
            .split(',')
            .filter_map(|c| c.trim().parse().ok())
            .collect();
        if codes.is_empty() {
            None
        } else {
            Some(codes)
        }
    }

    /// Current value as the controller string form
    pub fn value_string(&self) -> Option<String> {
        self.value.as_ref().map(value_to_device_string)
    }

    /// Drop the value and per-read bookkeeping so the entry can be stored as
    /// a known datapoint.
    pub fn strip_volatile(&mut self) {
        self.value = None;
        for field in VOLATILE_FIELDS {
            self.extra.remove(field);
        }
    }
}

/// Render a host value the way the controller expects it on write
pub fn value_to_device_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
