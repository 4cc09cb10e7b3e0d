//! whb-client - Device gateway for Windhager heating controllers
//!
//! Provides the [`DeviceGateway`] abstraction and its digest-authenticated
//! HTTP implementation [`DeviceClient`].
//!
//! # Example
//!
//! ```rust,no_run
//! use whb_client::{DeviceClient, DeviceGateway};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DeviceClient::new("192.168.1.20", "USER", "123")?;
//!
//!     let subnet = client.discover_subnet().await?;
//!     let nodes = client.lookup(Some(&format!("/{}", subnet))).await?;
//!
//!     // Bulk read of every cached datapoint
//!     let datapoints = client.read_all_datapoints().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! [`MockDevice`] implements the gateway in memory. The `testing` module
//! serves it over HTTP with a digest challenge:
//!
//! ```rust,ignore
//! use whb_client::testing::TestDevice;
//!
//! let device = TestDevice::start(MockDevice::new(60)).await?;
//! let subnet = device.client.discover_subnet().await?;
//! ```

mod client;
mod error;
mod gateway;
mod mock;
mod retry;
pub mod testing;

pub use client::DeviceClient;
pub use error::{DeviceError, Result};
pub use gateway::{parse_datapoint, parse_subnet, DeviceGateway};
pub use mock::MockDevice;
pub use retry::RetryPolicy;
