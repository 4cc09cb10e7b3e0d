//! Per-connection session context
//!
//! Everything learned during one connect cycle (subnet, function table,
//! text resources, known datapoints) lives in a [`Session`]. A reconnect
//! builds a new session and replaces the old one wholesale.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use whb_client::DeviceGateway;
use whb_conv::{
    parse_name, Classifier, ConvError, ConvResult, Datapoint, Descriptor, FunctionTypeConfig, Oid,
    ResourceKind, ResourceTree, TextResources,
};

/// One usable controller function
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    /// `node-fct`
    pub function_id: String,
    pub node: u32,
    pub fct: u32,
    pub function_type: i64,
    /// Label reported by the controller
    pub name: String,
    /// Module supports domestic hot water
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dhw: bool,
    /// Module supports a heating circuit
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub heating: bool,
}

impl FunctionInfo {
    pub fn new(node: u32, fct: u32, function_type: i64, name: impl Into<String>) -> Self {
        Self {
            function_id: format!("{}-{}", node, fct),
            node,
            fct,
            function_type,
            name: name.into(),
            dhw: false,
            heating: false,
        }
    }
}

/// Live functions keyed by `node-fct`
pub type FunctionTable = BTreeMap<String, FunctionInfo>;

/// State of one connect cycle
#[derive(Debug, Clone)]
pub struct Session {
    pub subnet: u32,
    pub functions: FunctionTable,
    pub config: Arc<FunctionTypeConfig>,
    pub resources: TextResources,
    pub lang: String,
    /// Datapoints found by a full scan (or reloaded from a previous one),
    /// keyed by OID. Empty when no scan was ever run.
    pub known: BTreeMap<String, Datapoint>,
}

impl Session {
    pub fn new(subnet: u32, functions: FunctionTable, config: Arc<FunctionTypeConfig>) -> Self {
        Self {
            subnet,
            functions,
            config,
            resources: TextResources::default(),
            lang: "de".to_string(),
            known: BTreeMap::new(),
        }
    }

    pub fn with_resources(mut self, resources: TextResources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_known(mut self, known: BTreeMap<String, Datapoint>) -> Self {
        self.known = known;
        self
    }

    /// Host path of a function: `subnet.node-fct`
    pub fn function_path(&self, function: &FunctionInfo) -> String {
        format!("{}.{}", self.subnet, function.function_id)
    }

    /// Live function owning an OID
    pub fn function_for(&self, oid: &Oid) -> Option<&FunctionInfo> {
        if oid.subnet != self.subnet {
            return None;
        }
        self.functions.get(&oid.function_id())
    }

    pub fn classifier(&self) -> Classifier<'_> {
        Classifier::new(&self.config, &self.resources, &self.lang)
    }

    /// Classify the datapoint at `oid`
    ///
    /// Without a raw datapoint the known datapoint for the OID is used.
    pub fn classify(&self, oid: &Oid, dp: Option<&Datapoint>) -> ConvResult<Descriptor> {
        let function = self
            .function_for(oid)
            .ok_or_else(|| ConvError::UnknownFunction(oid.function_path()))?;
        let known = match dp {
            Some(_) => None,
            None => self.known_datapoint(oid),
        };
        self.classifier()
            .classify(oid, function.function_type, dp.or(known.as_ref()))
    }

    /// Known datapoint for an OID: from the scan if there was one, else from
    /// the configuration of the owning function's type.
    pub fn known_datapoint(&self, oid: &Oid) -> Option<Datapoint> {
        if !self.known.is_empty() {
            return self.known.get(&oid.to_string()).cloned();
        }
        let function = self.function_for(oid)?;
        let mut dp = self
            .config
            .known_datapoint(function.function_type, &oid.name())?
            .clone();
        dp.oid = oid.to_string();
        Some(dp)
    }

    /// Every known datapoint of the live structure, keyed by OID
    ///
    /// Without a scan the datapoints are synthesized from the configuration
    /// as `/<subnet>/<node>/<fct>/<group>/<member>/0`.
    pub fn all_known_datapoints(&self) -> BTreeMap<String, Datapoint> {
        if !self.known.is_empty() {
            return self.known.clone();
        }

        let mut all = BTreeMap::new();
        for function in self.functions.values() {
            let Some(known) = self.config.known_datapoints(function.function_type) else {
                continue;
            };
            for (name, template) in known {
                let coordinates = match (template.group_nr, template.member_nr) {
                    (Some(g), Some(m)) => Some((g, m)),
                    _ => parse_name(name).ok(),
                };
                let Some((group_nr, member_nr)) = coordinates else {
                    warn!(name = %name, function_type = function.function_type, "Known datapoint without coordinates");
                    continue;
                };
                let oid = Oid::for_function(self.subnet, function.node, function.fct, group_nr, member_nr);
                let mut dp = template.clone();
                dp.oid = oid.to_string();
                all.insert(dp.oid.clone(), dp);
            }
        }
        all
    }
}

/// Fetch and flatten every text resource
///
/// A resource that cannot be fetched or parsed leaves its table empty.
pub async fn load_text_resources(gateway: &dyn DeviceGateway, lang: &str) -> TextResources {
    let mut resources = TextResources::default();
    for kind in ResourceKind::ALL {
        let tree = match gateway.resource_text(kind, lang).await {
            Ok(xml) => match ResourceTree::from_xml(&xml) {
                Ok(tree) => tree,
                Err(e) => {
                    warn!(resource = kind.file_stem(), %e, "Failed to parse text resource");
                    continue;
                }
            },
            Err(e) => {
                warn!(resource = kind.file_stem(), %e, "Failed to load text resource");
                continue;
            }
        };
        debug!(resource = kind.file_stem(), entries = tree.entries().len(), "Loaded text resource");
        resources.set(kind, tree);
    }
    resources
}
