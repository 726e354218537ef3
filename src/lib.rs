//! # fieldbus-bridge
//!
//! A Modbus-to-platform gateway bridge: polls slave devices over a
//! fieldbus Transport, maps register/coil data to typed platform feeds,
//! and routes inbound control feeds (`DFV`/`RPW`/`SMV`) back onto device
//! writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Bridge                                                         │
//! │   - builds SlaveDevice/Mapping trees from Config               │
//! │   - classifies inbound feed updates (control feeds vs. writes) │
//! │   - turns poller ChangeEvents into outbound Reading/Attribute  │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Poller                     │ LifecycleController               │
//! │   owns Transport exclusively│   drives poller start/stop off   │
//! │   one read+write cycle/tick │   connected ∧ registered edges   │
//! ├───────────────────────────────────────────────────────────────┤
//! │ SlaveDevice → Group → Mapping → Codec                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Transport (ModbusTcpTransport / SerialRtuTransport)             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use fieldbus_bridge::config::{ModuleConfig, DevicesConfig, resolve_devices};
//! use fieldbus_bridge::transport::{tcp_shared, TcpTransportConfig};
//!
//! let module = ModuleConfig::load("module.yaml")?;
//! let devices_cfg = DevicesConfig::load("devices.yaml")?;
//! let resolved = resolve_devices(&module, &devices_cfg)?;
//! let transport = tcp_shared(TcpTransportConfig::default());
//! ```
//!
//! ## Feature flags
//!
//! - `modbus-tcp`: Modbus TCP transport (default)
//! - `modbus-rtu`: Modbus RTU transport over a serial port (requires `serial`)

#![cfg_attr(feature = "no_std", no_std)]

#[cfg(feature = "no_std")]
extern crate alloc;

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod group;
pub mod lifecycle;
pub mod mapping;
pub mod persistence;
pub mod platform;
pub mod poller;
pub mod slave_device;
pub mod transport;
pub mod types;

pub use bridge::Bridge;
pub use error::{BridgeError, Result};
pub use lifecycle::LifecycleController;
pub use poller::Poller;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
