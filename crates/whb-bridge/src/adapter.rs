//! Bridge adapter
//!
//! [`Bridge`] ties one controller to one host namespace. It owns the connect
//! cycle, the current [`Session`], the [`MappingTable`] and the interval
//! read-back, and reacts to host store events through [`AdapterHandler`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use whb_client::DeviceGateway;
use whb_conv::{Datapoint, FunctionTypeConfig};
use whb_core::{
    dispatch_event, subtree_range, AdapterHandler, HostObject, HostStore, ObjectCommon, ObjectType,
    StateValue, StoreError, NATIVE_OID,
};

use crate::error::{BridgeError, BridgeResult};
use crate::mapping::MappingTable;
use crate::resolver::{full_scan, resolve_functions};
use crate::session::{load_text_resources, Session};
use crate::settings::BridgeSettings;
use crate::structure::{
    apply_plan, build_default_structure, control_state, delete_managed_subtree, export_flat,
    export_generic, export_known_datapoints, plan_import, ExportDocument, ExportKind, ImportPlan,
    ImportReport, StructureInit, StructureRequest,
};
use crate::sync::{SyncReport, Synchronizer};

const INFO_CHANNEL: &str = "info";
const INFO_CONNECTION: &str = "info.connection";
const TRIGGER_UPDATE: &str = "trigger_update";
const TRIGGER_EXPORT: &str = "trigger_export";
const EXPORT: &str = "export";
const INIT_STRUCTURE: &str = "_initializeStructure";
const KNOWN_DPS: &str = "knownDPs";

/// Snapshot of the bridge for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub connected: bool,
    pub enabled: bool,
    pub namespace: String,
    pub subnet: Option<u32>,
    pub functions: usize,
    pub mappings: usize,
}

/// Connection flag and instance switch
#[derive(Clone)]
struct Control {
    store: Arc<dyn HostStore>,
    namespace: String,
    connected: Arc<AtomicBool>,
}

impl Control {
    fn id(&self, rel: &str) -> String {
        format!("{}.{}", self.namespace, rel)
    }

    fn instance_id(&self) -> String {
        format!("system.adapter.{}", self.namespace)
    }

    async fn set_connection(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if let Err(e) = self
            .store
            .set_state(&self.id(INFO_CONNECTION), Value::Bool(connected), true)
            .await
        {
            warn!(%e, "Failed to update connection state");
        }
    }

    /// Switch the instance off after a fatal failure
    async fn disable(&self, reason: &str) {
        error!(reason, "Disabling adapter");
        let patch = json!({ "common": { "enabled": false } });
        if let Err(e) = self.store.extend_object(&self.instance_id(), patch).await {
            error!(%e, "Failed to disable adapter instance");
        }
        self.set_connection(false).await;
    }
}

struct IntervalTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One adapter instance
pub struct Bridge {
    settings: BridgeSettings,
    language: String,
    gateway: Arc<dyn DeviceGateway>,
    store: Arc<dyn HostStore>,
    config: Arc<FunctionTypeConfig>,
    mapping: Arc<MappingTable>,
    sync: Arc<Synchronizer>,
    control: Control,
    session: RwLock<Option<Arc<Session>>>,
    interval: Mutex<Option<IntervalTask>>,
    shutdown: CancellationToken,
}

impl Bridge {
    pub fn new(
        settings: BridgeSettings,
        language: impl Into<String>,
        gateway: Arc<dyn DeviceGateway>,
        store: Arc<dyn HostStore>,
        config: FunctionTypeConfig,
    ) -> Self {
        let mapping = Arc::new(MappingTable::new());
        let sync = Synchronizer::new(gateway.clone(), store.clone(), mapping.clone())
            .with_strategy(settings.read_strategy, settings.effective_block_size());
        let control = Control {
            store: store.clone(),
            namespace: settings.namespace.clone(),
            connected: Arc::new(AtomicBool::new(false)),
        };

        Self {
            settings,
            language: language.into(),
            gateway,
            store,
            config: Arc::new(config),
            mapping,
            sync: Arc::new(sync),
            control,
            session: RwLock::new(None),
            interval: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    pub fn store(&self) -> &Arc<dyn HostStore> {
        &self.store
    }

    pub fn mapping(&self) -> &Arc<MappingTable> {
        &self.mapping
    }

    /// Session of the current connect cycle
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.control.connected.load(Ordering::SeqCst)
    }

    fn require_session(&self) -> BridgeResult<Arc<Session>> {
        self.session().ok_or(BridgeError::NotConnected)
    }

    fn subnet_prefix(&self, subnet: u32) -> String {
        format!("{}.{}", self.settings.namespace, subnet)
    }

    pub async fn status(&self) -> BridgeStatus {
        let enabled = match self.store.get_object(&self.control.instance_id()).await {
            Ok(Some(instance)) => instance.is_enabled(),
            _ => true,
        };
        let session = self.session();
        BridgeStatus {
            connected: self.is_connected(),
            enabled,
            namespace: self.settings.namespace.clone(),
            subnet: session.as_ref().map(|s| s.subnet),
            functions: session.as_ref().map_or(0, |s| s.functions.len()),
            mappings: self.mapping.len(),
        }
    }

    // =========================================================================
    // Connect cycle
    // =========================================================================

    /// Create the control objects of the namespace if they are missing
    pub async fn ensure_control_objects(&self) -> BridgeResult<()> {
        let ns = &self.settings.namespace;
        let mut instance = HostObject::new(ObjectType::Instance, ObjectCommon::named(ns.clone()));
        instance.common.extra.insert("enabled".to_string(), Value::Bool(true));

        let objects = [
            (self.control.instance_id(), instance),
            (
                ns.clone(),
                HostObject::new(ObjectType::Meta, ObjectCommon::named("Windhager")),
            ),
            (self.control.id(INFO_CHANNEL), HostObject::channel("Information")),
            (
                self.control.id(INFO_CONNECTION),
                control_state("Connected to controller", "boolean", "indicator.connected", false),
            ),
            (
                self.control.id(TRIGGER_UPDATE),
                control_state("Read all values", "boolean", "button", true),
            ),
            (
                self.control.id(TRIGGER_EXPORT),
                control_state("Export known datapoints", "boolean", "button", true),
            ),
            (
                self.control.id(EXPORT),
                control_state("Known datapoint export", "json", "json", false),
            ),
            (
                self.control.id(INIT_STRUCTURE),
                control_state("Initialize structure", "json", "json", true),
            ),
        ];
        for (id, object) in objects {
            self.store.set_object_not_exists(&id, object).await?;
        }

        let init_id = self.control.id(INIT_STRUCTURE);
        if self.store.get_state(&init_id).await?.is_none() {
            self.store
                .set_state(&init_id, StructureRequest::reset_value(), true)
                .await?;
        }
        Ok(())
    }

    /// Connect with the configured retry budget
    ///
    /// Wrong credentials and an exhausted budget disable the instance.
    pub async fn start(&self) -> BridgeResult<()> {
        self.ensure_control_objects().await?;
        let instance = self.store.get_object(&self.control.instance_id()).await?;
        if instance.is_some_and(|i| !i.is_enabled()) {
            return Err(BridgeError::Disabled("instance is disabled".to_string()));
        }

        let attempts = self.settings.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if err.is_fatal() {
                self.control.disable(&err.to_string()).await;
                return Err(err);
            }
            if !err.is_retryable() {
                error!(%err, "Connect failed");
                self.control.set_connection(false).await;
                return Err(err);
            }
            if attempt >= attempts {
                let reason = format!("connect failed after {} attempts: {}", attempts, err);
                self.control.disable(&reason).await;
                return Err(BridgeError::Disabled(reason));
            }

            warn!(
                attempt,
                attempts,
                %err,
                retry_secs = self.settings.connect_retry_secs,
                "Controller not reachable, retrying"
            );
            self.control.set_connection(false).await;
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(BridgeError::NotConnected),
                _ = tokio::time::sleep(self.settings.connect_retry()) => {}
            }
            attempt += 1;
        }
    }

    /// One connect cycle; builds a fresh session
    pub async fn connect(&self) -> BridgeResult<()> {
        let subnet = self.gateway.discover_subnet().await?;
        info!(subnet, "Connected to controller");
        self.control.set_connection(true).await;

        let known = self.load_known_datapoints().await;
        let config = self.effective_config().await;
        let functions = resolve_functions(self.gateway.as_ref(), subnet, &config).await?;
        let known = if self.settings.full_scan {
            let scan = full_scan(
                self.gateway.as_ref(),
                subnet,
                &functions,
                self.settings.effective_block_size(),
            )
            .await;
            self.persist_known_datapoints(&scan.known).await?;
            scan.known
        } else {
            known
        };
        let resources = load_text_resources(self.gateway.as_ref(), &self.language).await;

        let session = Arc::new(
            Session::new(subnet, functions, config)
                .with_resources(resources)
                .with_language(self.language.clone())
                .with_known(known),
        );
        *self.session.write() = Some(session.clone());

        let init_id = self.control.id(INIT_STRUCTURE);
        if let Some(pending) = self.store.get_state(&init_id).await? {
            self.run_structure_request(&session, &pending.val).await;
        }
        self.rebuild_mapping(subnet).await?;

        self.start_interval(session);
        Ok(())
    }

    /// Function-type configuration, overridden by the host's config state
    async fn effective_config(&self) -> Arc<FunctionTypeConfig> {
        let id = format!("{}.state-config", self.control.instance_id());
        let value = match self.store.get_state(&id).await {
            Ok(Some(state)) => state.val,
            _ => return self.config.clone(),
        };
        let parsed = match &value {
            Value::Null => return self.config.clone(),
            Value::String(text) if text.trim().is_empty() => return self.config.clone(),
            Value::String(text) => FunctionTypeConfig::from_json(text),
            other => FunctionTypeConfig::from_json(&other.to_string()),
        };
        match parsed {
            Ok(config) => {
                info!(%id, "Using function-type configuration from the host");
                Arc::new(config)
            }
            Err(e) => {
                warn!(%id, %e, "Ignoring invalid function-type configuration");
                self.config.clone()
            }
        }
    }

    async fn load_known_datapoints(&self) -> BTreeMap<String, Datapoint> {
        let object = match self.store.get_object(&self.settings.namespace).await {
            Ok(Some(object)) => object,
            _ => return BTreeMap::new(),
        };
        let Some(raw) = object.native.get(KNOWN_DPS) else {
            return BTreeMap::new();
        };
        match serde_json::from_value(raw.clone()) {
            Ok(known) => known,
            Err(e) => {
                warn!(%e, "Ignoring persisted known datapoints");
                BTreeMap::new()
            }
        }
    }

    async fn persist_known_datapoints(&self, known: &BTreeMap<String, Datapoint>) -> BridgeResult<()> {
        let ns = &self.settings.namespace;
        let mut object = self
            .store
            .get_object(ns)
            .await?
            .ok_or_else(|| BridgeError::NotFound(ns.clone()))?;
        let known = serde_json::to_value(known).map_err(StoreError::from)?;
        object.native.insert(KNOWN_DPS.to_string(), known);
        self.store.set_object(ns, object).await?;
        debug!("Known datapoints persisted");
        Ok(())
    }

    /// Reload the mapping from the managed subtree
    pub async fn rebuild_mapping(&self, subnet: u32) -> BridgeResult<usize> {
        let (start, end) = subtree_range(&self.subnet_prefix(subnet));
        let rows = self.store.object_view(&start, &end).await?;
        let n = self.mapping.rebuild(&rows);
        info!(mappings = n, "Mapping table rebuilt");
        Ok(n)
    }

    fn start_interval(&self, session: Arc<Session>) {
        let cancel = self.shutdown.child_token();
        let sync = self.sync.clone();
        let control = self.control.clone();
        let interval = self.settings.update_interval();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = sync.run(session, interval, task_cancel).await {
                control.disable(&e.to_string()).await;
            }
        });

        let previous = self.interval.lock().replace(IntervalTask { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    // =========================================================================
    // Structure
    // =========================================================================

    /// Apply an `_initializeStructure` value and reset it
    async fn run_structure_request(&self, session: &Session, value: &Value) {
        let request = StructureRequest::parse(value, session.config.default_struct.as_ref());
        let result = match request {
            Ok(request) if request.init == StructureInit::None => Ok(()),
            Ok(request) => self.apply_structure(session, request).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(%e, "Structure initialization failed");
        }

        let init_id = self.control.id(INIT_STRUCTURE);
        if let Err(e) = self
            .store
            .set_state(&init_id, StructureRequest::reset_value(), true)
            .await
        {
            warn!(%e, "Failed to reset structure request");
        }
    }

    /// Import or rebuild the managed structure, then reload the mapping
    pub async fn apply_structure(
        &self,
        session: &Session,
        request: StructureRequest,
    ) -> BridgeResult<ImportReport> {
        let namespace = &self.settings.namespace;
        let plan: ImportPlan = match request.init {
            StructureInit::None => return Ok(ImportReport::default()),
            StructureInit::ImportFlat(doc) => plan_import(&ExportDocument::Flat(doc), namespace, session),
            StructureInit::ImportStruct(doc) => {
                plan_import(&ExportDocument::Struct(doc), namespace, session)
            }
            StructureInit::RebuildFromDevice => build_default_structure(session, namespace),
        };

        if request.delete_first {
            delete_managed_subtree(self.store.as_ref(), namespace, session.subnet).await?;
        }
        let report = apply_plan(self.store.as_ref(), plan).await;
        self.rebuild_mapping(session.subnet).await?;
        Ok(report)
    }

    /// Import an export document into the live structure
    pub async fn import_document(
        &self,
        doc: ExportDocument,
        delete_first: bool,
    ) -> BridgeResult<ImportReport> {
        let session = self.require_session()?;
        let request = StructureRequest {
            init: doc.into(),
            delete_first,
        };
        self.apply_structure(&session, request).await
    }

    /// Export the managed structure
    pub async fn export_document(&self, kind: ExportKind) -> BridgeResult<ExportDocument> {
        let session = self.require_session()?;
        let prefix = self.subnet_prefix(session.subnet);
        let (start, end) = subtree_range(&prefix);
        let rows = self.store.object_view(&start, &end).await?;

        Ok(match kind {
            ExportKind::Flat => ExportDocument::Flat(export_flat(&self.settings.namespace, &rows)),
            ExportKind::Struct => {
                let (doc, failed) = export_generic(&self.settings.namespace, &rows);
                if failed > 0 {
                    warn!(failed, "Objects left out of the struct export");
                }
                ExportDocument::Struct(doc)
            }
        })
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Run one read-back now
    pub async fn update_now(&self) -> BridgeResult<SyncReport> {
        let session = self.require_session()?;
        self.sync.update_once(&session).await
    }

    /// Write the known-datapoint export into the `export` state
    pub async fn export_known(&self) -> BridgeResult<Value> {
        let session = self.require_session()?;
        let doc = export_known_datapoints(&session);
        self.store
            .set_state(&self.control.id(EXPORT), doc.clone(), true)
            .await?;
        info!("Known datapoints exported");
        Ok(doc)
    }

    /// Validate and forward one host write to the controller
    pub async fn write_through(&self, state_id: &str, value: &Value) -> BridgeResult<()> {
        self.require_session()?;
        self.sync.write_through(state_id, value).await
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Apply an object change to the mapping table
    ///
    /// A state claiming an OID that another state holds takes it over; the
    /// other state loses its value and its OID.
    pub async fn track_object(&self, id: &str, object: Option<&HostObject>) -> BridgeResult<()> {
        let Some(session) = self.session() else {
            return Ok(());
        };
        let prefix = self.subnet_prefix(session.subnet);
        if !id.starts_with(&format!("{}.", prefix)) {
            return Ok(());
        }

        let oid = object.filter(|o| o.is_state()).and_then(HostObject::oid);
        let Some(oid) = oid else {
            if let Some(oid) = self.mapping.remove_state(id) {
                debug!(%id, %oid, "Mapping removed");
            }
            return Ok(());
        };
        if self.mapping.get(oid).as_deref() == Some(id) {
            return Ok(());
        }

        let Some(previous) = self.mapping.put(oid, id) else {
            return Ok(());
        };
        let conflict = BridgeError::MappingConflict {
            oid: oid.to_string(),
            previous: previous.clone(),
            current: id.to_string(),
        };
        warn!(%conflict, "Mapping conflict, newest association wins");

        self.store.set_state(&previous, Value::Null, true).await?;
        if let Some(mut old) = self.store.get_object(&previous).await? {
            old.native.remove(NATIVE_OID);
            self.store.set_object(&previous, old).await?;
        }
        Ok(())
    }

    /// Subscribe to the store and dispatch events until shutdown
    ///
    /// Events are handled one at a time, so write-throughs never overlap.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.store.subscribe();
        let bridge = Arc::clone(self);
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => dispatch_event(bridge.as_ref(), &event).await,
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "Store events dropped"),
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Event loop stopped");
        })
    }

    /// Stop the interval loop and the event loop
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.interval.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!(%e, "Interval task ended abnormally");
                }
            }
        }
        self.control.set_connection(false).await;
        info!("Bridge stopped");
    }
}

#[async_trait]
impl AdapterHandler for Bridge {
    async fn on_ready(&self) {
        if let Err(e) = self.start().await {
            error!(%e, "Bridge did not start");
        }
    }

    async fn on_object_change(&self, id: &str, object: Option<&HostObject>) {
        if let Err(e) = self.track_object(id, object).await {
            error!(%id, %e, "Failed to update mapping");
        }
    }

    async fn on_state_change(&self, id: &str, state: Option<&StateValue>) {
        let Some(state) = state.filter(|s| !s.ack) else {
            return;
        };
        let Some(rel) = id
            .strip_prefix(self.settings.namespace.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            return;
        };

        match rel {
            TRIGGER_UPDATE => {
                match self.update_now().await {
                    Ok(report) => info!(updated = report.updated, "Manual update finished"),
                    Err(e) => error!(%e, "Manual update failed"),
                }
                if let Err(e) = self.store.set_state(id, state.val.clone(), true).await {
                    warn!(%id, %e, "Failed to acknowledge trigger");
                }
            }
            TRIGGER_EXPORT => {
                if let Err(e) = self.export_known().await {
                    error!(%e, "Known datapoint export failed");
                }
                if let Err(e) = self.store.set_state(id, json!("done"), true).await {
                    warn!(%id, %e, "Failed to acknowledge trigger");
                }
            }
            INIT_STRUCTURE => match self.session() {
                Some(session) => self.run_structure_request(&session, &state.val).await,
                None => debug!("Structure request kept until connected"),
            },
            _ => {
                let Some(session) = self.session() else {
                    return;
                };
                if !rel.starts_with(&format!("{}.", session.subnet)) {
                    return;
                }
                if let Err(e) = self.write_through(id, &state.val).await {
                    error!(%id, %e, "Write to controller rejected");
                }
            }
        }
    }

    async fn on_unload(&self) {
        self.shutdown().await;
    }
}
