//! Synchronizer
//!
//! Read-back copies controller values into mapped host states; write-through
//! validates an unacknowledged host write, sends it to the controller and
//! acknowledges it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use whb_client::{DeviceError, DeviceGateway};
use whb_conv::{value_to_device_string, DataType, Datapoint, Oid};
use whb_core::{HostStore, ObjectCommon};

use crate::error::{BridgeError, BridgeResult};
use crate::mapping::MappingTable;
use crate::session::Session;
use crate::settings::ReadStrategy;

/// Counters of one read-back cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Host states written
    pub updated: usize,
    /// Datapoints read without a mapped host state
    pub not_found: usize,
    /// Mapped OIDs the controller did not answer for
    pub missing: usize,
    /// Values that could not be converted or stored
    pub failed: usize,
}

/// Moves values between the controller and the host store
pub struct Synchronizer {
    gateway: Arc<dyn DeviceGateway>,
    store: Arc<dyn HostStore>,
    mapping: Arc<MappingTable>,
    strategy: ReadStrategy,
    block_size: usize,
}

impl Synchronizer {
    pub fn new(
        gateway: Arc<dyn DeviceGateway>,
        store: Arc<dyn HostStore>,
        mapping: Arc<MappingTable>,
    ) -> Self {
        Self {
            gateway,
            store,
            mapping,
            strategy: ReadStrategy::Bulk,
            block_size: 16,
        }
    }

    pub fn with_strategy(mut self, strategy: ReadStrategy, block_size: usize) -> Self {
        self.strategy = strategy;
        self.block_size = block_size.max(1);
        self
    }

    // =========================================================================
    // Read-back
    // =========================================================================

    /// Run one read-back cycle
    ///
    /// Only a failing bulk read fails the cycle; single values are counted.
    #[instrument(skip(self, session), fields(subnet = session.subnet))]
    pub async fn update_once(&self, session: &Session) -> BridgeResult<SyncReport> {
        let report = match self.strategy {
            ReadStrategy::Bulk => self.read_bulk(session).await?,
            ReadStrategy::PerDatapoint => self.read_each(session).await,
        };
        debug!(
            updated = report.updated,
            not_found = report.not_found,
            missing = report.missing,
            failed = report.failed,
            "Read-back finished"
        );
        Ok(report)
    }

    async fn read_bulk(&self, session: &Session) -> BridgeResult<SyncReport> {
        let datapoints = self.gateway.read_all_datapoints().await?;
        let mut report = SyncReport::default();
        let mut seen = BTreeSet::new();

        for dp in &datapoints {
            seen.insert(dp.oid.as_str());
            self.apply(session, dp, &mut report).await;
        }

        for (oid, state_id) in self.mapping.entries() {
            if !seen.contains(oid.as_str()) {
                debug!(%oid, %state_id, "Mapped datapoint lost");
                report.missing += 1;
            }
        }
        Ok(report)
    }

    async fn read_each(&self, session: &Session) -> SyncReport {
        let gateway = &self.gateway;
        let reads: Vec<_> = stream::iter(self.mapping.entries())
            .map(|(oid, _)| async move {
                let answer = gateway.read_datapoint(&oid).await;
                (oid, answer)
            })
            .buffer_unordered(self.block_size)
            .collect()
            .await;

        let mut report = SyncReport::default();
        for (oid, answer) in reads {
            match answer {
                Ok(dp) => self.apply(session, &dp, &mut report).await,
                Err(DeviceError::RequestFailed {
                    status: Some(404), ..
                }) => {
                    debug!(%oid, "Mapped datapoint lost");
                    report.missing += 1;
                }
                Err(e) => {
                    warn!(%oid, %e, "Failed to read datapoint");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Push one controller value into its mapped host state
    async fn apply(&self, session: &Session, dp: &Datapoint, report: &mut SyncReport) {
        let Some(state_id) = self.mapping.get(&dp.oid) else {
            debug!(oid = %dp.oid, "No host state for datapoint");
            report.not_found += 1;
            return;
        };
        let Some(raw) = dp.value.as_ref() else {
            debug!(oid = %dp.oid, "Datapoint without value");
            report.failed += 1;
            return;
        };

        let data_type = resolve_data_type(session, dp);
        let Some(val) = data_type.coerce(raw) else {
            warn!(oid = %dp.oid, value = %raw, data_type = data_type.as_str(), "Value does not match its type");
            report.failed += 1;
            return;
        };

        match self.store.set_state(&state_id, val, true).await {
            Ok(()) => report.updated += 1,
            Err(e) => {
                error!(%state_id, %e, "Failed to store value");
                report.failed += 1;
            }
        }
    }

    // =========================================================================
    // Write-through
    // =========================================================================

    /// Validate and send a host write, then acknowledge it
    ///
    /// A rejected value issues no device request and leaves the state
    /// unacknowledged.
    #[instrument(skip(self, value))]
    pub async fn write_through(&self, state_id: &str, value: &Value) -> BridgeResult<()> {
        let oid = self
            .mapping
            .get_reverse(state_id)
            .ok_or_else(|| BridgeError::NotFound(format!("no OID mapped to {}", state_id)))?;
        let object = self
            .store
            .get_object(state_id)
            .await?
            .ok_or_else(|| BridgeError::NotFound(state_id.to_string()))?;

        validate_write(&object.common, value)?;

        self.gateway.write_datapoint(&oid, value).await?;
        self.store.set_state(state_id, value.clone(), true).await?;
        info!(%oid, value = %value_to_device_string(value), "Value written to controller");
        Ok(())
    }

    // =========================================================================
    // Interval loop
    // =========================================================================

    /// Read back every `interval` until cancelled
    ///
    /// The next cycle is scheduled after the previous one finished, so cycles
    /// never overlap. Returns early with the error if a cycle fails fatally.
    pub async fn run(
        &self,
        session: Arc<Session>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> BridgeResult<()> {
        info!(interval_secs = interval.as_secs(), "Interval read-back started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.update_once(&session).await {
                if e.is_fatal() {
                    error!(%e, "Read-back failed fatally");
                    return Err(e);
                }
                warn!(%e, "Read-back failed");
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Interval read-back stopped");
        Ok(())
    }
}

/// Host data type of a datapoint value
///
/// The configured `dataType[typeId]` wins over the type rule. A datapoint
/// without a type id borrows it from the known datapoint.
pub fn resolve_data_type(session: &Session, dp: &Datapoint) -> DataType {
    let known = match dp.type_id {
        Some(_) => None,
        None => Oid::parse(&dp.oid)
            .ok()
            .and_then(|oid| session.known_datapoint(&oid)),
    };
    let source = known.as_ref().unwrap_or(dp);

    source
        .type_id
        .and_then(|type_id| session.config.data_type_for(type_id))
        .unwrap_or_else(|| DataType::from_raw(source.type_id, source.unit_code()))
}

/// Check a value against the recorded constraints of a host state
pub fn validate_write(common: &ObjectCommon, value: &Value) -> BridgeResult<()> {
    if common.write == Some(false) {
        return Err(BridgeError::Validation("state is write protected".to_string()));
    }

    let type_ok = match common.value_type.as_deref() {
        Some("number") => value.is_number(),
        Some("string") => value.is_string(),
        Some("boolean") => value.is_boolean(),
        _ => true,
    };
    if !type_ok {
        return Err(BridgeError::Validation("wrong state type".to_string()));
    }

    if let Some(states) = &common.states {
        if !states.contains_key(&enum_key(value)) {
            return Err(BridgeError::Validation("wrong enum entry".to_string()));
        }
    }

    if let Some(number) = value.as_f64() {
        if common.min.is_some_and(|min| number < min) {
            return Err(BridgeError::Validation("value smaller than min value".to_string()));
        }
        if common.max.is_some_and(|max| number > max) {
            return Err(BridgeError::Validation("value greater than max value".to_string()));
        }
    }
    Ok(())
}

/// Enum key of a written value; whole-valued floats match integer keys
fn enum_key(value: &Value) -> String {
    match value.as_f64() {
        Some(f) if value.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            (f as i64).to_string()
        }
        _ => value_to_device_string(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn common(value_type: &str) -> ObjectCommon {
        ObjectCommon {
            value_type: Some(value_type.to_string()),
            write: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_write_protection() {
        let mut c = common("number");
        c.write = Some(false);
        let err = validate_write(&c, &json!(1)).unwrap_err();
        assert_eq!(err.to_string(), "state cannot be set: state is write protected");

        c.write = None;
        assert!(validate_write(&c, &json!(1)).is_ok());
    }

    #[test]
    fn test_validate_type() {
        assert!(validate_write(&common("number"), &json!("21")).is_err());
        assert!(validate_write(&common("string"), &json!(21)).is_err());
        assert!(validate_write(&common("string"), &json!("08:00")).is_ok());
    }

    #[test]
    fn test_validate_bounds() {
        let mut c = common("number");
        c.min = Some(0.0);
        c.max = Some(30.0);
        assert!(validate_write(&c, &json!(0)).is_ok());
        assert!(validate_write(&c, &json!(30)).is_ok());
        assert!(matches!(
            validate_write(&c, &json!(-0.5)),
            Err(BridgeError::Validation(m)) if m == "value smaller than min value"
        ));
        assert!(matches!(
            validate_write(&c, &json!(30.5)),
            Err(BridgeError::Validation(m)) if m == "value greater than max value"
        ));
    }

    #[test]
    fn test_validate_enum() {
        let mut c = common("number");
        c.states = Some(BTreeMap::from([
            ("0".to_string(), "Aus".to_string()),
            ("1".to_string(), "Ein".to_string()),
        ]));
        assert!(validate_write(&c, &json!(1)).is_ok());
        assert!(validate_write(&c, &json!(1.0)).is_ok());
        assert!(validate_write(&c, &json!(1.5)).is_err());
        assert!(matches!(
            validate_write(&c, &json!(2)),
            Err(BridgeError::Validation(m)) if m == "wrong enum entry"
        ));
    }
}
