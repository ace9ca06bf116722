//! # miswitch
//!
//! Local control of Xiaomi miio smart plugs over UDP, with a persisted switch
//! table that caches each plug's last known power state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use miswitch::{DeviceStore, PowerController, ProtocolClient, StoreConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> miswitch::Result<()> {
//! let store = Arc::new(DeviceStore::open(&StoreConfig::default())?);
//! let controller = PowerController::new(store, ProtocolClient::new());
//! controller.init().await?;
//! controller.set_power(0, true).await?;
//! # Ok(())
//! # }
//! ```
//!
pub mod client;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod store;

#[cfg(test)]
mod test_support;

pub use client::{Confirmation, ProtocolClient};
pub use config::{ClientConfig, StoreConfig};
pub use controller::{PowerController, QuerySummary};
pub use crypto::MiioCipher;
pub use error::{ErrorKind, MiioError, Result};
pub use protocol::{Command, Session};
pub use store::{DeviceCollection, DeviceRecord, DeviceStore, FileStorage, MemoryStorage, Storage};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
