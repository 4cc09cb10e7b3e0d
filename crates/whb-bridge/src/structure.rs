//! Structure import and export
//!
//! Two portable document shapes carry a host structure:
//!
//! - `flat`: every object under the adapter namespace, keyed by relative id.
//! - `struct`: a template per function *type*. Only the states of the first
//!   function of each type are kept, with OIDs reduced to their
//!   `/group/member/ext` suffix, so one export can be replayed on any
//!   function of the same type.
//!
//! Both carry `model = "windhager.adapter.export"`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use whb_conv::{Datapoint, Oid};
use whb_core::{is_in_subtree, subtree_range, HostObject, HostStore, ObjectCommon, ObjectType, ViewRow};

use crate::error::{BridgeError, BridgeResult};
use crate::session::Session;

/// Mandatory `model` value of every export document
pub const MODEL_SENTINEL: &str = "windhager.adapter.export";

// =============================================================================
// Documents
// =============================================================================

/// Path-preserving dump of the managed structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatDocument {
    pub model: String,
    /// relative id -> `{type, common, native}`
    #[serde(default)]
    pub states: BTreeMap<String, Value>,
}

/// Structure template keyed by function type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDocument {
    pub model: String,
    #[serde(default)]
    pub subnet: Option<String>,
    /// `node-fct` -> device object
    #[serde(default)]
    pub fct: BTreeMap<String, Value>,
    /// function type -> id relative to the function -> object
    #[serde(rename = "fctType", default)]
    pub fct_type: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Export document discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExportDocument {
    Flat(FlatDocument),
    Struct(StructDocument),
}

impl ExportDocument {
    /// Validate and decode an export document
    ///
    /// A JSON string holding the document is accepted as well.
    pub fn from_value(value: &Value) -> BridgeResult<Self> {
        if let Value::String(text) = value {
            let parsed: Value = serde_json::from_str(text)
                .map_err(|e| BridgeError::InvalidDocument(e.to_string()))?;
            return Self::from_value(&parsed);
        }

        if value.get("model").and_then(Value::as_str) != Some(MODEL_SENTINEL) {
            return Err(BridgeError::InvalidDocument(format!(
                "model must be \"{}\"",
                MODEL_SENTINEL
            )));
        }
        match value.get("type").and_then(Value::as_str) {
            Some("flat") | Some("struct") => {}
            Some(other) => return Err(BridgeError::UnknownImportType(other.to_string())),
            None => return Err(BridgeError::UnknownImportType("<missing>".to_string())),
        }

        serde_json::from_value(value.clone()).map_err(|e| BridgeError::InvalidDocument(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExportDocument::Flat(_) => "flat",
            ExportDocument::Struct(_) => "struct",
        }
    }
}

/// Which export shape to produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    #[default]
    Flat,
    Struct,
}

fn to_entry(object: &HostObject) -> Value {
    serde_json::to_value(object).unwrap_or_default()
}

fn relative_id<'a>(namespace: &str, id: &'a str) -> Option<&'a str> {
    id.strip_prefix(namespace)?.strip_prefix('.').filter(|rel| !rel.is_empty())
}

// =============================================================================
// Export
// =============================================================================

/// Re-key every row under `namespace` to its relative id
pub fn export_flat(namespace: &str, rows: &[ViewRow]) -> FlatDocument {
    let states = rows
        .iter()
        .filter_map(|row| {
            let rel = relative_id(namespace, &row.id)?;
            Some((rel.to_string(), to_entry(&row.value)))
        })
        .collect();

    FlatDocument {
        model: MODEL_SENTINEL.to_string(),
        states,
    }
}

/// Split a relative id into `(subnet, function, rest)`
fn split_struct_id(rel: &str) -> Option<(&str, Option<&str>, Option<&str>)> {
    let mut parts = rel.splitn(3, '.');
    let subnet = parts.next().filter(|s| is_digits(s))?;
    let Some(function) = parts.next() else {
        return Some((subnet, None, None));
    };
    let (node, fct) = function.split_once('-')?;
    if !is_digits(node) || !is_digits(fct) {
        return None;
    }
    Some((subnet, Some(function), parts.next()))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Build a `struct` template from the rows of the managed subtree
///
/// Rows must be sorted by id (as range views are). Returns the document and
/// the number of rows that could not be exported.
pub fn export_generic(namespace: &str, rows: &[ViewRow]) -> (StructDocument, usize) {
    let mut doc = StructDocument {
        model: MODEL_SENTINEL.to_string(),
        subnet: None,
        fct: BTreeMap::new(),
        fct_type: BTreeMap::new(),
    };
    let mut fct_types: BTreeMap<String, i64> = BTreeMap::new();
    let mut first_of_type: BTreeMap<i64, String> = BTreeMap::new();
    let mut failed = 0;

    for row in rows {
        let parsed = relative_id(namespace, &row.id).and_then(split_struct_id);
        let Some((subnet, function, rest)) = parsed else {
            warn!(id = %row.id, "Unexpected id structure, not exported");
            failed += 1;
            continue;
        };
        if doc.subnet.is_none() {
            doc.subnet = Some(subnet.to_string());
        }
        let Some(function) = function else {
            continue;
        };

        match rest {
            None => {
                let Some(fct_type) = row.value.fct_type() else {
                    warn!(id = %row.id, "Function object without fctType, not exported");
                    failed += 1;
                    continue;
                };
                doc.fct.insert(function.to_string(), to_entry(&row.value));
                fct_types.insert(function.to_string(), fct_type);
                if !first_of_type.contains_key(&fct_type) {
                    first_of_type.insert(fct_type, function.to_string());
                    doc.fct_type.insert(fct_type.to_string(), BTreeMap::new());
                }
            }
            Some(rest) => {
                let Some(fct_type) = fct_types.get(function).copied() else {
                    warn!(id = %row.id, "Object of unknown function, not exported");
                    failed += 1;
                    continue;
                };
                if first_of_type.get(&fct_type).map(String::as_str) != Some(function) {
                    continue;
                }

                let mut object = row.value.clone();
                if let Some(oid) = object.oid() {
                    match Oid::parse(oid) {
                        Ok(oid) => {
                            object
                                .native
                                .insert(whb_core::NATIVE_OID.to_string(), Value::String(oid.suffix()));
                        }
                        Err(e) => {
                            warn!(id = %row.id, %e, "Invalid OID, not exported");
                            failed += 1;
                            continue;
                        }
                    }
                }
                if let Some(template) = doc.fct_type.get_mut(&fct_type.to_string()) {
                    template.insert(rest.to_string(), to_entry(&object));
                }
            }
        }
    }

    (doc, failed)
}

// =============================================================================
// State builder
// =============================================================================

/// Build the host state object for a datapoint
///
/// Fields of an imported object's `common` win over classification; unknown
/// `common` fields are preserved. If classification fails, an imported
/// object is still accepted with its own `common`.
pub fn build_state_object(
    session: &Session,
    imported: Option<&HostObject>,
    oid: &Oid,
    dp: Option<&Datapoint>,
) -> BridgeResult<HostObject> {
    let descriptor = match session.classify(oid, dp) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => match imported {
            Some(_) => {
                debug!(oid = %oid, %e, "Classification failed, using imported metadata");
                None
            }
            None => return Err(e.into()),
        },
    };

    let mut common = imported.map(|o| o.common.clone()).unwrap_or_default();
    if let Some(descriptor) = descriptor {
        if common.name.is_none() {
            common.name = descriptor.display_name.map(Value::String);
        }
        if common.value_type.is_none() {
            common.value_type = Some(descriptor.data_type.as_str().to_string());
        }
        if common.write.is_none() {
            common.write = Some(!descriptor.write_prot);
        }
        if common.unit.is_none() {
            common.unit = descriptor.unit;
        }
        if common.min.is_none() {
            common.min = descriptor.min_value;
        }
        if common.max.is_none() {
            common.max = descriptor.max_value;
        }
        if common.states.is_none() {
            common.states = descriptor.enums;
        }
    }
    if common.name.is_none() {
        common.name = Some(Value::String(oid.name()));
    }
    if common.value_type.is_none() {
        common.value_type = Some("string".to_string());
    }
    common.read = Some(true);
    if common.write.is_none() {
        common.write = Some(false);
    }

    Ok(HostObject::state(common, oid.to_string()))
}

// =============================================================================
// Import
// =============================================================================

/// Objects to create, keyed (and therefore sorted) by id
#[derive(Debug, Default)]
pub struct ImportPlan {
    pub objects: BTreeMap<String, HostObject>,
    /// Entries that could not be turned into objects
    pub failed: usize,
}

/// Outcome of writing an import plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Objects written
    pub created: usize,
    /// Objects that already existed and were left alone
    pub existing: usize,
    /// Entries skipped or rejected by the store
    pub failed: usize,
}

fn parse_entry(id: &str, entry: &Value) -> Option<HostObject> {
    match serde_json::from_value::<HostObject>(entry.clone()) {
        Ok(object) => Some(object),
        Err(e) => {
            error!(id, %e, "Invalid object in import document");
            None
        }
    }
}

/// Turn an export document into host objects for the live structure
pub fn plan_import(doc: &ExportDocument, namespace: &str, session: &Session) -> ImportPlan {
    match doc {
        ExportDocument::Flat(doc) => plan_flat(doc, namespace, session),
        ExportDocument::Struct(doc) => plan_struct(doc, namespace, session),
    }
}

fn plan_flat(doc: &FlatDocument, namespace: &str, session: &Session) -> ImportPlan {
    let mut plan = ImportPlan::default();
    for (rel, entry) in &doc.states {
        let id = format!("{}.{}", namespace, rel);
        let Some(object) = parse_entry(&id, entry) else {
            plan.failed += 1;
            continue;
        };
        if !object.is_state() {
            plan.objects.insert(id, object);
            continue;
        }

        let Some(oid) = object.oid() else {
            error!(id = %id, "OID missing in imported state");
            plan.failed += 1;
            continue;
        };
        let built = Oid::parse(oid)
            .map_err(BridgeError::from)
            .and_then(|oid| build_state_object(session, Some(&object), &oid, None));
        match built {
            Ok(state) => {
                plan.objects.insert(id, state);
            }
            Err(e) => {
                error!(id = %id, %e, "Failed to import state");
                plan.failed += 1;
            }
        }
    }
    plan
}

fn plan_struct(doc: &StructDocument, namespace: &str, session: &Session) -> ImportPlan {
    let mut plan = ImportPlan::default();
    for function in session.functions.values() {
        let Some(template) = doc.fct_type.get(&function.function_type.to_string()) else {
            continue;
        };
        let function_path = session.function_path(function);
        let function_id = format!("{}.{}", namespace, function_path);
        plan.objects.insert(
            function_id.clone(),
            HostObject::device(function.name.clone(), function.function_type),
        );

        for (rel, entry) in template {
            let id = format!("{}.{}", function_id, rel);
            let Some(object) = parse_entry(&id, entry) else {
                plan.failed += 1;
                continue;
            };
            if !object.is_state() {
                plan.objects.insert(id, object);
                continue;
            }

            let Some(suffix) = object.oid() else {
                error!(id = %id, fct_type = function.function_type, "OID missing in imported state");
                plan.failed += 1;
                continue;
            };
            let built = Oid::rehydrate(&function_path, suffix)
                .map_err(BridgeError::from)
                .and_then(|oid| build_state_object(session, Some(&object), &oid, None));
            match built {
                Ok(state) => {
                    plan.objects.insert(id, state);
                }
                Err(e) => {
                    error!(id = %id, fct_type = function.function_type, %e, "Failed to import state");
                    plan.failed += 1;
                }
            }
        }
    }
    plan
}

/// Default structure: device per function, channel per level, state per
/// known datapoint
pub fn build_default_structure(session: &Session, namespace: &str) -> ImportPlan {
    let mut plan = ImportPlan::default();

    for function in session.functions.values() {
        plan.objects.insert(
            format!("{}.{}", namespace, session.function_path(function)),
            HostObject::device(function.name.clone(), function.function_type),
        );
    }

    for (oid_text, dp) in session.all_known_datapoints() {
        let oid = match Oid::parse(&oid_text) {
            Ok(oid) => oid,
            Err(e) => {
                warn!(oid = %oid_text, %e, "Skipping known datapoint");
                plan.failed += 1;
                continue;
            }
        };
        let Some(function) = session.function_for(&oid) else {
            warn!(oid = %oid_text, "Known datapoint of a function that is not present");
            plan.failed += 1;
            continue;
        };

        let level = dp.level_id.unwrap_or(0);
        let channel_id = format!("{}.{}.{}", namespace, session.function_path(function), level);
        let state_id = format!("{}.{}", channel_id, oid.name());

        if !plan.objects.contains_key(&channel_id) {
            let name = session
                .resources
                .level_name(function.function_type, level)
                .map(str::to_string)
                .unwrap_or_else(|| level.to_string());
            plan.objects.insert(channel_id, HostObject::channel(name));
        }

        match build_state_object(session, None, &oid, Some(&dp)) {
            Ok(state) => {
                plan.objects.insert(state_id, state);
            }
            Err(e) => {
                warn!(oid = %oid_text, %e, "Skipping known datapoint");
                plan.failed += 1;
            }
        }
    }
    plan
}

/// Write a plan in id order; existing objects are left untouched
pub async fn apply_plan(store: &dyn HostStore, plan: ImportPlan) -> ImportReport {
    let mut report = ImportReport {
        failed: plan.failed,
        ..Default::default()
    };
    for (id, object) in plan.objects {
        match store.set_object_not_exists(&id, object).await {
            Ok(true) => report.created += 1,
            Ok(false) => report.existing += 1,
            Err(e) => {
                error!(id = %id, %e, "Failed to write object");
                report.failed += 1;
            }
        }
    }
    info!(
        created = report.created,
        existing = report.existing,
        failed = report.failed,
        "Structure written"
    );
    report
}

/// Delete exactly the managed subtree `<namespace>.<subnet>`
///
/// Nothing is deleted unless the range query succeeds.
pub async fn delete_managed_subtree(
    store: &dyn HostStore,
    namespace: &str,
    subnet: u32,
) -> BridgeResult<usize> {
    let prefix = format!("{}.{}", namespace, subnet);
    let (start, end) = subtree_range(&prefix);
    let rows = store.object_view(&start, &end).await?;

    let ids: Vec<String> = rows
        .into_iter()
        .map(|row| row.id)
        .filter(|id| is_in_subtree(id, &prefix))
        .collect();

    for id in &ids {
        store.del_object(id).await?;
    }
    info!(prefix = %prefix, deleted = ids.len(), "Managed structure deleted");
    Ok(ids.len())
}

// =============================================================================
// Structure initialization request
// =============================================================================

/// What to do with the managed structure
#[derive(Debug, Clone, PartialEq)]
pub enum StructureInit {
    None,
    ImportFlat(FlatDocument),
    ImportStruct(StructDocument),
    RebuildFromDevice,
}

impl From<ExportDocument> for StructureInit {
    fn from(doc: ExportDocument) -> Self {
        match doc {
            ExportDocument::Flat(doc) => StructureInit::ImportFlat(doc),
            ExportDocument::Struct(doc) => StructureInit::ImportStruct(doc),
        }
    }
}

/// Decoded `_initializeStructure` value
#[derive(Debug, Clone, PartialEq)]
pub struct StructureRequest {
    pub init: StructureInit,
    pub delete_first: bool,
}

impl StructureRequest {
    pub fn none() -> Self {
        Self {
            init: StructureInit::None,
            delete_first: false,
        }
    }

    /// Decode `{cmd: none|file|default|windhager, file, deleteBefore}`
    ///
    /// `default` imports `default_struct` from the function-type
    /// configuration. A JSON string holding the object is accepted as well.
    pub fn parse(value: &Value, default_struct: Option<&Value>) -> BridgeResult<Self> {
        let value = match value {
            Value::Null => return Ok(Self::none()),
            Value::String(text) if text.trim().is_empty() => return Ok(Self::none()),
            Value::String(text) => serde_json::from_str(text)
                .map_err(|e| BridgeError::InvalidDocument(format!("_initializeStructure: {}", e)))?,
            other => other.clone(),
        };

        let delete_first = value
            .get("deleteBefore")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let init = match value.get("cmd").and_then(Value::as_str).unwrap_or("none") {
            "none" => StructureInit::None,
            "file" => {
                let file = value
                    .get("file")
                    .ok_or_else(|| BridgeError::InvalidDocument("file missing".to_string()))?;
                ExportDocument::from_value(file)?.into()
            }
            "default" => {
                let doc = default_struct.ok_or_else(|| {
                    BridgeError::Config("defaultStruct missing in function-type configuration".to_string())
                })?;
                ExportDocument::from_value(doc)?.into()
            }
            "windhager" => StructureInit::RebuildFromDevice,
            other => {
                return Err(BridgeError::InvalidDocument(format!(
                    "unknown structure command '{}'",
                    other
                )))
            }
        };

        Ok(Self { init, delete_first })
    }

    /// Value written back after the request was applied
    pub fn reset_value() -> Value {
        let mut map = Map::new();
        map.insert("cmd".to_string(), Value::String("none".to_string()));
        Value::Object(map)
    }
}

// =============================================================================
// Known-datapoint export
// =============================================================================

/// Per function type: datapoint name -> known datapoint without its OID,
/// plus a `diff` section listing names whose definitions differ between
/// functions of the same type.
pub fn export_known_datapoints(session: &Session) -> Value {
    let mut by_type: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    let mut diff: BTreeMap<String, BTreeMap<String, Vec<Value>>> = BTreeMap::new();

    for (oid_text, mut dp) in session.all_known_datapoints() {
        let function = Oid::parse(&oid_text)
            .ok()
            .and_then(|oid| session.function_for(&oid).map(|f| (oid, f.function_type)));
        let Some((oid, fct_type)) = function else {
            warn!(oid = %oid_text, "Known datapoint of a function that is not present");
            continue;
        };

        let name = dp.name.clone().unwrap_or_else(|| oid.name());
        dp.oid.clear();
        let entry = serde_json::to_value(&dp).unwrap_or_default();
        let fct_type = fct_type.to_string();

        let known = by_type.entry(fct_type.clone()).or_default();
        match known.get(&name) {
            Some(first) if *first != entry => {
                warn!(name = %name, fct_type = %fct_type, "Datapoint differs between functions of one type");
                let list = diff
                    .entry(fct_type)
                    .or_default()
                    .entry(name)
                    .or_insert_with(|| vec![first.clone()]);
                list.push(entry);
            }
            Some(_) => {}
            None => {
                known.insert(name, entry);
            }
        }
    }

    let mut doc = Map::new();
    for (fct_type, known) in by_type {
        doc.insert(fct_type, Value::Object(known.into_iter().collect()));
    }
    if !diff.is_empty() {
        let diff = diff
            .into_iter()
            .map(|(fct_type, names)| {
                let names = names
                    .into_iter()
                    .map(|(name, list)| (name, Value::Array(list)))
                    .collect();
                (fct_type, Value::Object(names))
            })
            .collect();
        doc.insert("diff".to_string(), Value::Object(diff));
    }
    Value::Object(doc)
}

/// Host object for a control state of the adapter
pub fn control_state(name: &str, value_type: &str, role: &str, write: bool) -> HostObject {
    HostObject::new(
        ObjectType::State,
        ObjectCommon {
            name: Some(Value::String(name.to_string())),
            value_type: Some(value_type.to_string()),
            role: Some(role.to_string()),
            read: Some(true),
            write: Some(write),
            ..Default::default()
        },
    )
}
