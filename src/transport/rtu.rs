//! RTU-framed Modbus transport over a serial line.
//!
//! `serialport` has no native async I/O, so each call is bounced onto a
//! blocking task via `tokio::task::spawn_blocking`, the same bridging
//! pattern used elsewhere in the ecosystem for blocking hardware APIs.

use super::Transport;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Serial parity, mirroring the original source's `BitParity` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtuParity {
    None,
    Even,
    Odd,
}

impl From<RtuParity> for serialport::Parity {
    fn from(p: RtuParity) -> Self {
        match p {
            RtuParity::None => serialport::Parity::None,
            RtuParity::Even => serialport::Parity::Even,
            RtuParity::Odd => serialport::Parity::Odd,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerialRtuTransportConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: RtuParity,
    pub response_timeout: Duration,
}

/// Modbus RTU transport: address byte + PDU + CRC16/Modbus, little-endian on the wire.
pub struct SerialRtuTransport {
    config: SerialRtuTransportConfig,
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    connected: AtomicBool,
    slave_id: AtomicU8,
}

impl SerialRtuTransport {
    pub fn new(config: SerialRtuTransportConfig) -> Self {
        Self {
            config,
            port: Mutex::new(None),
            connected: AtomicBool::new(false),
            slave_id: AtomicU8::new(1),
        }
    }

    fn data_bits(&self) -> serialport::DataBits {
        match self.config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> serialport::StopBits {
        match self.config.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        }
    }

    fn open_blocking(config: &SerialRtuTransportConfig, data_bits: serialport::DataBits, stop_bits: serialport::StopBits) -> Result<Box<dyn serialport::SerialPort>> {
        serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(config.parity.into())
            .timeout(config.response_timeout)
            .open()
            .map_err(|e| BridgeError::TransportIo(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }

    fn request_blocking(port: &mut dyn serialport::SerialPort, slave: u8, function_code: u8, pdu_tail: &[u8]) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(4 + pdu_tail.len());
        frame.push(slave);
        frame.push(function_code);
        frame.extend_from_slice(pdu_tail);
        let crc = crc16_modbus(&frame);
        frame.push((crc & 0xFF) as u8);
        frame.push((crc >> 8) as u8);

        port.write_all(&frame).map_err(BridgeError::TransportIo)?;

        let mut buffer = vec![0u8; 256];
        let n = port.read(&mut buffer).map_err(BridgeError::TransportIo)?;
        buffer.truncate(n);
        if buffer.len() < 4 {
            return Err(BridgeError::TransportProtocol("RTU frame too short".into()));
        }
        let (body, crc_bytes) = buffer.split_at(buffer.len() - 2);
        let received_crc = (crc_bytes[1] as u16) << 8 | crc_bytes[0] as u16;
        if received_crc != crc16_modbus(body) {
            return Err(BridgeError::TransportProtocol("RTU CRC mismatch".into()));
        }
        if body.len() >= 2 && body[1] & 0x80 != 0 {
            let exception_code = body[2];
            return Err(match exception_code {
                1 => BridgeError::IllegalFunction { slave, function: body[1] & 0x7F },
                2 => BridgeError::IllegalAddress { slave, address: 0 },
                6 => BridgeError::SlaveBusy { slave },
                _ => BridgeError::TransportProtocol(format!("exception code {exception_code}")),
            });
        }
        Ok(body[2..].to_vec())
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn serialport::SerialPort) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(BridgeError::TransportIo(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "not connected",
            )));
        }
        let port_handle = self.port.lock().unwrap().take();
        let Some(mut port) = port_handle else {
            return Err(BridgeError::TransportIo(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "not connected",
            )));
        };
        let result = tokio::task::spawn_blocking(move || {
            let r = f(port.as_mut());
            (port, r)
        })
        .await
        .map_err(|e| BridgeError::Internal { reason: e.to_string() })?;
        *self.port.lock().unwrap() = Some(result.0);
        result.1
    }
}

#[async_trait]
impl Transport for SerialRtuTransport {
    async fn connect(&self) -> Result<()> {
        let config = self.config.clone();
        let data_bits = self.data_bits();
        let stop_bits = self.stop_bits();
        let port = tokio::task::spawn_blocking(move || Self::open_blocking(&config, data_bits, stop_bits))
            .await
            .map_err(|e| BridgeError::Internal { reason: e.to_string() })??;
        *self.port.lock().unwrap() = Some(port);
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.port.lock().unwrap().take();
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn set_slave(&self, id: u8) {
        self.slave_id.store(id, Ordering::Relaxed);
    }

    async fn read_holding(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        let slave = self.slave_id.load(Ordering::Relaxed);
        let tail = [(addr >> 8) as u8, (addr & 0xFF) as u8, (count >> 8) as u8, (count & 0xFF) as u8];
        let pdu = self.run(move |p| Self::request_blocking(p, slave, 0x03, &tail)).await?;
        Ok(words_from_bytes(&pdu[1..]))
    }

    async fn read_input(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        let slave = self.slave_id.load(Ordering::Relaxed);
        let tail = [(addr >> 8) as u8, (addr & 0xFF) as u8, (count >> 8) as u8, (count & 0xFF) as u8];
        let pdu = self.run(move |p| Self::request_blocking(p, slave, 0x04, &tail)).await?;
        Ok(words_from_bytes(&pdu[1..]))
    }

    async fn write_single_holding(&self, addr: u16, value: u16) -> Result<()> {
        let slave = self.slave_id.load(Ordering::Relaxed);
        let tail = [(addr >> 8) as u8, (addr & 0xFF) as u8, (value >> 8) as u8, (value & 0xFF) as u8];
        self.run(move |p| Self::request_blocking(p, slave, 0x06, &tail)).await?;
        Ok(())
    }

    async fn write_multiple_holding(&self, addr: u16, values: &[u16]) -> Result<()> {
        let slave = self.slave_id.load(Ordering::Relaxed);
        let quantity = values.len() as u16;
        let mut tail = vec![(addr >> 8) as u8, (addr & 0xFF) as u8, (quantity >> 8) as u8, (quantity & 0xFF) as u8, (quantity * 2) as u8];
        for v in values {
            tail.push((*v >> 8) as u8);
            tail.push((*v & 0xFF) as u8);
        }
        self.run(move |p| Self::request_blocking(p, slave, 0x10, &tail)).await?;
        Ok(())
    }

    async fn read_coils(&self, addr: u16, count: u16) -> Result<Vec<bool>> {
        let slave = self.slave_id.load(Ordering::Relaxed);
        let tail = [(addr >> 8) as u8, (addr & 0xFF) as u8, (count >> 8) as u8, (count & 0xFF) as u8];
        let pdu = self.run(move |p| Self::request_blocking(p, slave, 0x01, &tail)).await?;
        Ok(bits_from_bytes(&pdu[1..], count))
    }

    async fn read_discrete_inputs(&self, addr: u16, count: u16) -> Result<Vec<bool>> {
        let slave = self.slave_id.load(Ordering::Relaxed);
        let tail = [(addr >> 8) as u8, (addr & 0xFF) as u8, (count >> 8) as u8, (count & 0xFF) as u8];
        let pdu = self.run(move |p| Self::request_blocking(p, slave, 0x02, &tail)).await?;
        Ok(bits_from_bytes(&pdu[1..], count))
    }

    async fn write_single_coil(&self, addr: u16, value: bool) -> Result<()> {
        let slave = self.slave_id.load(Ordering::Relaxed);
        let word = if value { 0xFF00u16 } else { 0x0000u16 };
        let tail = [(addr >> 8) as u8, (addr & 0xFF) as u8, (word >> 8) as u8, (word & 0xFF) as u8];
        self.run(move |p| Self::request_blocking(p, slave, 0x05, &tail)).await?;
        Ok(())
    }
}

fn words_from_bytes(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks(2).filter(|c| c.len() == 2).map(|c| ((c[0] as u16) << 8) | c[1] as u16).collect()
}

fn bits_from_bytes(bytes: &[u8], count: u16) -> Vec<bool> {
    let mut bits = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let byte = bytes.get(i / 8).copied().unwrap_or(0);
        bits.push((byte >> (i % 8)) & 1 != 0);
    }
    bits
}

/// CRC-16/MODBUS, polynomial 0xA001, initial value 0xFFFF.
fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_vector() {
        // Read holding registers request: slave 1, FC 0x03, addr 0, count 10
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let crc = crc16_modbus(&frame);
        assert_eq!(crc, 0xCDC5);
    }

    #[test]
    fn test_words_from_bytes() {
        assert_eq!(words_from_bytes(&[0x00, 0x42, 0x01, 0x00]), vec![0x0042, 0x0100]);
    }

    #[test]
    fn test_bits_from_bytes() {
        assert_eq!(bits_from_bytes(&[0b0000_0101], 3), vec![true, false, true]);
    }
}
