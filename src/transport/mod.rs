//! §6.1 Transport — the fieldbus provider contract.
//!
//! The core (Poller, Bridge) depends only on [`Transport`]; this module
//! also ships the reference implementations bundled with the crate:
//! - [`ModbusTcpTransport`] (MBAP framing over TCP, `modbus-tcp` feature, default)
//! - [`SerialRtuTransport`] (RTU framing over a serial port, `modbus-rtu` feature)

mod tcp;
pub use tcp::{shared as tcp_shared, ModbusTcpTransport, TcpTransportConfig};

#[cfg(feature = "modbus-rtu")]
mod rtu;
#[cfg(feature = "modbus-rtu")]
pub use rtu::{RtuParity, SerialRtuTransport, SerialRtuTransportConfig};

use crate::error::Result;
use async_trait::async_trait;

/// Minimum operation set the core consumes from a fieldbus transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;

    /// Switches the addressed slave for subsequent operations.
    fn set_slave(&self, id: u8);

    async fn read_holding(&self, addr: u16, count: u16) -> Result<Vec<u16>>;
    async fn read_input(&self, addr: u16, count: u16) -> Result<Vec<u16>>;
    async fn write_single_holding(&self, addr: u16, value: u16) -> Result<()>;
    async fn write_multiple_holding(&self, addr: u16, values: &[u16]) -> Result<()>;

    async fn read_coils(&self, addr: u16, count: u16) -> Result<Vec<bool>>;
    async fn read_discrete_inputs(&self, addr: u16, count: u16) -> Result<Vec<bool>>;
    async fn write_single_coil(&self, addr: u16, value: bool) -> Result<()>;
}
