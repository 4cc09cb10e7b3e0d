//! whb-conv - Windhager controller data conversion
//!
//! Pure, I/O-free building blocks shared by the device client and the bridge:
//!
//! - **OIDs** - parse `/subnet/node/fct/group/member[/ext]` identifiers and
//!   derive host paths and `GG-MMM` datapoint names
//! - **Datapoints** - lenient model of the controller's datapoint JSON
//! - **Function-type configuration** - per function type known datapoints,
//!   correction overlays and data type overrides
//! - **Text resources** - flattening of the controller's XML text tables
//! - **Classification** - raw datapoint + configuration -> host descriptor
//!
//! # Quick Start
//!
//! ```rust
//! use whb_conv::{Classifier, DataType, FunctionTypeConfig, Oid, TextResources};
//!
//! let config = FunctionTypeConfig::from_yaml(r#"
//! knownFctType:
//!   1:
//!     00-001: { groupNr: 0, memberNr: 1, typeId: 1, unit: "°C" }
//! "#).unwrap();
//! let resources = TextResources::default();
//!
//! let oid = Oid::parse("/60/1/1/0/1/0").unwrap();
//! assert_eq!(oid.name(), "00-001");
//!
//! let descriptor = Classifier::new(&config, &resources, "de")
//!     .classify(&oid, 1, None)
//!     .unwrap();
//! assert_eq!(descriptor.data_type, DataType::Number);
//! assert_eq!(descriptor.unit.as_deref(), Some("°C"));
//! ```

pub mod classify;
pub mod config;
pub mod datapoint;
pub mod error;
pub mod oid;
pub mod resources;

pub use classify::{Classifier, DataType, Descriptor, STRING_TYPE_THRESHOLD};
pub use config::{Correction, FunctionTypeConfig};
pub use datapoint::{value_to_device_string, Datapoint};
pub use error::{ConvError, ConvResult};
pub use oid::{format_name, parse_name, Oid};
pub use resources::{ResourceKind, ResourceNode, ResourceTree, TextResources};
