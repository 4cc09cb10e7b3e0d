//! Datapoint classification
//!
//! Turns a raw datapoint plus its function-type configuration into a
//! host-state descriptor (display name, data type, unit, bounds, enums,
//! write protection).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::config::FunctionTypeConfig;
use crate::datapoint::Datapoint;
use crate::error::{ConvError, ConvResult};
use crate::oid::Oid;
use crate::resources::TextResources;

/// Type ids at or above this value are strings
pub const STRING_TYPE_THRESHOLD: i64 = 20;

/// Type id that carries date/time values in some units
const DATE_TIME_TYPE_ID: i64 = 4;
/// Units that turn [`DATE_TIME_TYPE_ID`] into a string
const DATE_TIME_UNITS: [i64; 2] = [20, 21];

/// Host-side data type of a datapoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Number,
    String,
}

impl DataType {
    /// Derive the data type from the raw type id and unit code
    pub fn from_raw(type_id: Option<i64>, unit_code: Option<i64>) -> Self {
        match type_id {
            Some(DATE_TIME_TYPE_ID)
                if unit_code.is_some_and(|u| DATE_TIME_UNITS.contains(&u)) =>
            {
                DataType::String
            }
            Some(t) if t < STRING_TYPE_THRESHOLD => DataType::Number,
            _ => DataType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Number => "number",
            DataType::String => "string",
        }
    }

    /// Convert a controller value into a host value of this type
    ///
    /// Returns `None` if a number cannot be parsed.
    pub fn coerce(&self, raw: &Value) -> Option<Value> {
        match self {
            DataType::String => Some(match raw {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            }),
            DataType::Number => match raw {
                Value::Number(_) => Some(raw.clone()),
                Value::String(s) => {
                    let s = s.trim();
                    if let Ok(i) = s.parse::<i64>() {
                        Some(Value::Number(i.into()))
                    } else {
                        s.parse::<f64>()
                            .ok()
                            .and_then(Number::from_f64)
                            .map(Value::Number)
                    }
                }
                _ => None,
            },
        }
    }
}

/// Classification result for one datapoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub data_type: DataType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub write_prot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enums: Option<BTreeMap<String, String>>,
}

/// Classifies datapoints of one session
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    config: &'a FunctionTypeConfig,
    resources: &'a TextResources,
    lang: &'a str,
}

impl<'a> Classifier<'a> {
    pub fn new(config: &'a FunctionTypeConfig, resources: &'a TextResources, lang: &'a str) -> Self {
        Self {
            config,
            resources,
            lang,
        }
    }

    /// Classify the datapoint at `oid` of a function of type `fct_type`
    ///
    /// `dp` is the raw datapoint if one was read or scanned; without it the
    /// configured known datapoint is used. With neither, the descriptor is
    /// write protected.
    pub fn classify(
        &self,
        oid: &Oid,
        fct_type: i64,
        dp: Option<&Datapoint>,
    ) -> ConvResult<Descriptor> {
        if !self.config.is_known_type(fct_type) {
            return Err(ConvError::UnknownFunctionType(fct_type));
        }

        let name = oid.name();
        let correction = self.config.correction(fct_type, &name);
        let known = self.config.known_datapoint(fct_type, &name);
        let dp = dp.or(known);

        let display_name = correction
            .and_then(|c| c.name.get(self.lang))
            .or_else(|| {
                known
                    .and_then(|k| k.display_name.as_ref())
                    .and_then(|names| names.get(self.lang))
            })
            .cloned()
            .or_else(|| {
                self.resources
                    .dp_name(oid.group_nr, oid.member_nr)
                    .map(str::to_string)
            });

        let Some(dp) = dp else {
            return Ok(Descriptor {
                display_name,
                data_type: DataType::String,
                unit: None,
                write_prot: true,
                min_value: None,
                max_value: None,
                enums: correction.and_then(|c| c.enums.clone()),
            });
        };

        let data_type = DataType::from_raw(dp.type_id, dp.unit_code());
        let date_time = dp.type_id == Some(DATE_TIME_TYPE_ID)
            && dp.unit_code().is_some_and(|u| DATE_TIME_UNITS.contains(&u));

        let unit = if date_time {
            None
        } else {
            correction
                .and_then(|c| c.unit.clone())
                .or_else(|| dp.unit.clone())
                .filter(|u| !u.is_empty())
        };

        let write_prot = correction
            .and_then(|c| c.write_prot)
            .or(dp.write_prot)
            .unwrap_or(false);

        let (min_value, max_value) = if data_type == DataType::Number {
            (
                correction.and_then(|c| c.min_value).or_else(|| dp.min_bound()),
                correction.and_then(|c| c.max_value).or_else(|| dp.max_bound()),
            )
        } else {
            (None, None)
        };

        let enums = match correction.and_then(|c| c.enums.clone()) {
            Some(enums) => Some(enums),
            None => dp.enum_codes().and_then(|codes| {
                self.resources
                    .enum_names(oid.group_nr, oid.member_nr, Some(&codes))
            }),
        };

        Ok(Descriptor {
            display_name,
            data_type,
            unit,
            write_prot,
            min_value,
            max_value,
            enums,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ResourceKind, ResourceTree};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> FunctionTypeConfig {
        FunctionTypeConfig::from_json(
            r#"{
            "knownFctType": {
                "1": {
                    "00-001": { "groupNr": 0, "memberNr": 1, "typeId": 1, "unit": "°C", "writeProt": true },
                    "01-002": { "groupNr": 1, "memberNr": 2, "typeId": 1, "unit": "°C",
                                "minValue": "5", "maxValue": "30",
                                "displayName": { "de": "Raumtemperatur Soll" } },
                    "05-012": { "groupNr": 5, "memberNr": 12, "typeId": 10, "enum": "[0,1,2]" }
                }
            },
            "correction": {
                "1": {
                    "01-002": { "name": { "en": "Room setpoint" }, "maxValue": 28 },
                    "05-013": { "enums": { "0": "off", "1": "on" } }
                }
            }
        }"#,
        )
        .unwrap()
    }

    fn resources() -> TextResources {
        let mut res = TextResources::default();
        res.set(
            ResourceKind::DatapointNames,
            ResourceTree::from_xml(
                r#"<t><g id="0"><m id="1">Außentemperatur</m></g><g id="1"><m id="2">Sollwert</m></g></t>"#,
            )
            .unwrap(),
        );
        res.set(
            ResourceKind::EnumNames,
            ResourceTree::from_xml(
                r#"<t><g id="5"><m id="12"><e id="0">Aus</e><e id="1">Ein</e></m></g></t>"#,
            )
            .unwrap(),
        );
        res
    }

    #[test]
    fn test_data_type_rule() {
        assert_eq!(DataType::from_raw(Some(1), None), DataType::Number);
        assert_eq!(DataType::from_raw(Some(19), Some(3)), DataType::Number);
        assert_eq!(DataType::from_raw(Some(20), None), DataType::String);
        assert_eq!(DataType::from_raw(Some(35), None), DataType::String);
        assert_eq!(DataType::from_raw(None, None), DataType::String);
        // date/time units force a string even below the threshold
        assert_eq!(DataType::from_raw(Some(4), Some(20)), DataType::String);
        assert_eq!(DataType::from_raw(Some(4), Some(21)), DataType::String);
        assert_eq!(DataType::from_raw(Some(4), Some(22)), DataType::Number);
        assert_eq!(DataType::from_raw(Some(5), Some(20)), DataType::Number);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(DataType::Number.coerce(&json!("21")), Some(json!(21)));
        assert_eq!(DataType::Number.coerce(&json!("21.5")), Some(json!(21.5)));
        assert_eq!(DataType::Number.coerce(&json!(3)), Some(json!(3)));
        assert_eq!(DataType::Number.coerce(&json!("n/a")), None);
        assert_eq!(DataType::String.coerce(&json!("12:30")), Some(json!("12:30")));
        assert_eq!(DataType::String.coerce(&json!(7)), Some(json!("7")));
    }

    #[test]
    fn test_classify_number() {
        let config = config();
        let res = resources();
        let classifier = Classifier::new(&config, &res, "de");

        let oid = Oid::parse("/60/1/1/0/1/0").unwrap();
        let dp: Datapoint = serde_json::from_value(json!({
            "OID": "/60/1/1/0/1/0", "typeId": 1, "unit": "°C", "writeProt": false,
            "minValue": "-20", "maxValue": "junk"
        }))
        .unwrap();

        let d = classifier.classify(&oid, 1, Some(&dp)).unwrap();
        assert_eq!(d.display_name.as_deref(), Some("Außentemperatur"));
        assert_eq!(d.data_type, DataType::Number);
        assert_eq!(d.unit.as_deref(), Some("°C"));
        assert!(!d.write_prot);
        assert_eq!(d.min_value, Some(-20.0));
        assert_eq!(d.max_value, None);
    }

    #[test]
    fn test_classify_date_time_exception() {
        let config = config();
        let res = resources();
        let classifier = Classifier::new(&config, &res, "de");

        let oid = Oid::parse("/60/1/1/0/1/0").unwrap();
        let dp: Datapoint = serde_json::from_value(json!({
            "typeId": 4, "unit": "21", "minValue": "0", "maxValue": "1440"
        }))
        .unwrap();

        let d = classifier.classify(&oid, 1, Some(&dp)).unwrap();
        assert_eq!(d.data_type, DataType::String);
        assert_eq!(d.unit, None);
        assert_eq!(d.min_value, None);
        assert_eq!(d.max_value, None);
    }

    #[test]
    fn test_classify_correction_overlay() {
        let config = config();
        let res = resources();

        let oid = Oid::parse("/60/1/1/1/2/0").unwrap();
        let en = Classifier::new(&config, &res, "en")
            .classify(&oid, 1, None)
            .unwrap();
        assert_eq!(en.display_name.as_deref(), Some("Room setpoint"));
        assert_eq!(en.min_value, Some(5.0));
        assert_eq!(en.max_value, Some(28.0));

        // configuration name wins over the resource text
        let de = Classifier::new(&config, &res, "de")
            .classify(&oid, 1, None)
            .unwrap();
        assert_eq!(de.display_name.as_deref(), Some("Raumtemperatur Soll"));
    }

    #[test]
    fn test_classify_enums() {
        let config = config();
        let res = resources();
        let classifier = Classifier::new(&config, &res, "de");

        let oid = Oid::parse("/60/1/1/5/12/0").unwrap();
        let d = classifier.classify(&oid, 1, None).unwrap();
        let enums = d.enums.unwrap();
        assert_eq!(enums.get("0").map(String::as_str), Some("Aus"));
        assert_eq!(enums.get("1").map(String::as_str), Some("Ein"));
        assert_eq!(enums.get("2").map(String::as_str), Some("2"));

        // correction enums replace, not merge
        let oid = Oid::parse("/60/1/1/5/13/0").unwrap();
        let dp: Datapoint =
            serde_json::from_value(json!({ "typeId": 10, "enum": "[0,1,2,3]" })).unwrap();
        let d = classifier.classify(&oid, 1, Some(&dp)).unwrap();
        assert_eq!(d.enums.unwrap().len(), 2);
    }

    #[test]
    fn test_classify_unknown_datapoint_is_write_protected() {
        let config = config();
        let res = resources();
        let classifier = Classifier::new(&config, &res, "de");

        let oid = Oid::parse("/60/1/1/9/99/0").unwrap();
        let d = classifier.classify(&oid, 1, None).unwrap();
        assert!(d.write_prot);
        assert_eq!(d.data_type, DataType::String);
    }

    #[test]
    fn test_classify_unknown_function_type() {
        let config = config();
        let res = resources();
        let classifier = Classifier::new(&config, &res, "de");

        let oid = Oid::parse("/60/1/1/0/1/0").unwrap();
        assert!(matches!(
            classifier.classify(&oid, 42, None),
            Err(ConvError::UnknownFunctionType(42))
        ));
    }
}
