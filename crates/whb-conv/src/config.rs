//! Function-type configuration
//!
//! The configuration document classifies datapoints per function type:
//!
//! ```yaml
//! knownFctType:
//!   1:                      # function type
//!     00-001:               # datapoint name (GG-MMM)
//!       groupNr: 0
//!       memberNr: 1
//!       typeId: 4
//!       unit: "°C"
//!       levelId: 0
//! correction:
//!   1:
//!     00-001:
//!       name: { de: Außentemperatur, en: Outside temperature }
//!       writeProt: true
//! dataType:
//!   4: number
//! moduleTypes: [14]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::DataType;
use crate::datapoint::Datapoint;
use crate::error::ConvResult;

/// Install-specific override for one datapoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    /// Display name per language
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub name: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_prot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    /// Replaces the derived enum mapping entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enums: Option<BTreeMap<String, String>>,
}

/// Complete function-type configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionTypeConfig {
    /// function type -> datapoint name -> known datapoint
    #[serde(default)]
    pub known_fct_type: BTreeMap<i64, BTreeMap<String, Datapoint>>,
    /// function type -> datapoint name -> correction
    #[serde(default)]
    pub correction: BTreeMap<i64, BTreeMap<String, Correction>>,
    /// raw type id -> data type override used during read-back
    #[serde(default)]
    pub data_type: BTreeMap<i64, DataType>,
    /// Export document used by the `default` structure command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_struct: Option<Value>,
    /// Function types that carry the module capability datapoints
    #[serde(default = "default_module_types")]
    pub module_types: Vec<i64>,
}

fn default_module_types() -> Vec<i64> {
    vec![14]
}

impl Default for FunctionTypeConfig {
    fn default() -> Self {
        Self {
            known_fct_type: BTreeMap::new(),
            correction: BTreeMap::new(),
            data_type: BTreeMap::new(),
            default_struct: None,
            module_types: default_module_types(),
        }
    }
}

impl FunctionTypeConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> ConvResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Load from a JSON string
    pub fn from_json(json: &str) -> ConvResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a YAML string
    pub fn from_yaml(yaml: &str) -> ConvResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Whether the function type has a classification schema
    pub fn is_known_type(&self, fct_type: i64) -> bool {
        self.known_fct_type.contains_key(&fct_type)
    }

    /// Whether functions of this type carry module capability flags
    pub fn is_module_type(&self, fct_type: i64) -> bool {
        self.module_types.contains(&fct_type)
    }

    /// Known datapoints of a function type, keyed by name
    pub fn known_datapoints(&self, fct_type: i64) -> Option<&BTreeMap<String, Datapoint>> {
        self.known_fct_type.get(&fct_type)
    }

    /// One known datapoint of a function type
    pub fn known_datapoint(&self, fct_type: i64, name: &str) -> Option<&Datapoint> {
        self.known_fct_type.get(&fct_type)?.get(name)
    }

    /// Correction overlay for one datapoint
    pub fn correction(&self, fct_type: i64, name: &str) -> Option<&Correction> {
        self.correction.get(&fct_type)?.get(name)
    }

    /// Data type override for a raw type id
    pub fn data_type_for(&self, type_id: i64) -> Option<DataType> {
        self.data_type.get(&type_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
knownFctType:
  1:
    00-001:
      groupNr: 0
      memberNr: 1
      typeId: 4
      unit: "°C"
      levelId: 0
      displayName:
        de: Außentemperatur
correction:
  1:
    00-001:
      name:
        en: Outside temperature
      writeProt: true
      minValue: -20
dataType:
  4: number
  21: string
"#;

    #[test]
    fn test_from_yaml() {
        let config = FunctionTypeConfig::from_yaml(YAML).unwrap();
        assert!(config.is_known_type(1));
        assert!(!config.is_known_type(2));
        assert!(config.is_module_type(14));

        let dp = config.known_datapoint(1, "00-001").unwrap();
        assert_eq!(dp.type_id, Some(4));
        assert_eq!(dp.level_id, Some(0));
        assert_eq!(
            dp.display_name.as_ref().unwrap().get("de").map(String::as_str),
            Some("Außentemperatur")
        );

        let corr = config.correction(1, "00-001").unwrap();
        assert_eq!(corr.write_prot, Some(true));
        assert_eq!(corr.min_value, Some(-20.0));
        assert_eq!(config.data_type_for(4), Some(DataType::Number));
        assert_eq!(config.data_type_for(21), Some(DataType::String));
        assert_eq!(config.data_type_for(99), None);
    }

    #[test]
    fn test_from_json_string_keys() {
        let json = r#"{
            "knownFctType": { "14": { "05-076": { "groupNr": 5, "memberNr": 76, "typeId": 1 } } },
            "moduleTypes": [14, 15]
        }"#;
        let config = FunctionTypeConfig::from_json(json).unwrap();
        assert!(config.is_known_type(14));
        assert!(config.is_module_type(15));
        assert!(config.known_datapoint(14, "05-076").is_some());
    }

    #[test]
    fn test_empty_document() {
        let config = FunctionTypeConfig::from_json("{}").unwrap();
        assert_eq!(config, FunctionTypeConfig::default());
    }
}
