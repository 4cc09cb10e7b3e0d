//! whb-bridge - Windhager controller to host store bridge
//!
//! The engine behind `whbd`:
//!
//! - **Resolver** - discovers the subnet and the usable functions, with an
//!   optional full scan of every level
//! - **Session** - everything learned during one connect cycle
//! - **Mapping** - the one-to-one OID <-> host state table
//! - **Structure** - flat and struct export documents, import, the default
//!   structure and the known-datapoint export
//! - **Synchronizer** - interval read-back and validated write-through
//! - **Bridge** - the adapter lifecycle tying it all to a [`HostStore`]
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use whb_bridge::{Bridge, Settings};
//! use whb_client::DeviceClient;
//! use whb_conv::FunctionTypeConfig;
//! use whb_core::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load("whbd.toml")?;
//!     let config = FunctionTypeConfig::from_file("function-types.yaml")?;
//!     let client = DeviceClient::new(&settings.device.host, &settings.device.username, &settings.device.password)?;
//!
//!     let bridge = Arc::new(Bridge::new(
//!         settings.bridge,
//!         settings.device.language,
//!         Arc::new(client),
//!         Arc::new(MemoryStore::new()),
//!         config,
//!     ));
//!     let events = bridge.spawn_event_loop();
//!     bridge.start().await?;
//!
//!     let report = bridge.update_now().await?;
//!     println!("{} values updated", report.updated);
//!
//!     bridge.shutdown().await;
//!     events.await?;
//!     Ok(())
//! }
//! ```
//!
//! [`HostStore`]: whb_core::HostStore

pub mod adapter;
pub mod error;
pub mod mapping;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod structure;
pub mod sync;

pub use adapter::{Bridge, BridgeStatus};
pub use error::{BridgeError, BridgeResult};
pub use mapping::MappingTable;
pub use resolver::{full_scan, resolve_functions, ScanResult};
pub use session::{load_text_resources, FunctionInfo, FunctionTable, Session};
pub use settings::{
    BridgeSettings, DeviceSettings, ReadStrategy, ServerSettings, Settings, StoreSettings,
};
pub use structure::{
    ExportDocument, ExportKind, FlatDocument, ImportReport, StructDocument, StructureInit,
    StructureRequest, MODEL_SENTINEL,
};
pub use sync::{validate_write, SyncReport, Synchronizer};
