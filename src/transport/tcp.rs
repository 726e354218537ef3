//! MBAP-framed Modbus TCP transport.
//!
//! Combines the teacher's generic TCP reconnect/backoff client with its
//! MBAP build/parse logic into a single [`Transport`] implementation, since
//! the core only ever needs one concrete collaborator per connection.

use super::Transport;
use crate::error::BridgeError;
use crate::error::Result;
use crate::types::{timestamp_ns, ConnectionState};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    pub remote_addr: SocketAddr,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub tcp_nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            remote_addr: "127.0.0.1:502".parse().unwrap(),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_millis(200),
            tcp_nodelay: true,
        }
    }
}

/// Modbus TCP transport, MBAP-framed, with bounded exponential reconnect.
pub struct ModbusTcpTransport {
    config: TcpTransportConfig,
    state: RwLock<ConnectionState>,
    stream: Mutex<Option<TcpStream>>,
    transaction_id: AtomicU16,
    slave_id: AtomicU8,
}

impl ModbusTcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            stream: Mutex::new(None),
            transaction_id: AtomicU16::new(1),
            slave_id: AtomicU8::new(1),
        }
    }

    async fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != new_state {
            debug!(?new_state, "transport state change");
        }
        *state = new_state;
    }

    fn next_transaction_id(&self) -> u16 {
        let id = self.transaction_id.fetch_add(1, Ordering::SeqCst);
        if id == 0 {
            self.transaction_id.fetch_add(1, Ordering::SeqCst)
        } else {
            id
        }
    }

    fn build_mbap(&self, transaction_id: u16, pdu_length: usize) -> [u8; 7] {
        let length = (pdu_length + 1) as u16;
        [
            (transaction_id >> 8) as u8,
            (transaction_id & 0xFF) as u8,
            0x00,
            0x00,
            (length >> 8) as u8,
            (length & 0xFF) as u8,
            self.slave_id.load(Ordering::Relaxed),
        ]
    }

    fn parse_mbap<'a>(&self, data: &'a [u8]) -> Result<(u16, &'a [u8])> {
        if data.len() < 8 {
            return Err(BridgeError::TransportProtocol("response too short".into()));
        }
        let transaction_id = ((data[0] as u16) << 8) | (data[1] as u16);
        let protocol_id = ((data[2] as u16) << 8) | (data[3] as u16);
        if protocol_id != 0 {
            return Err(BridgeError::TransportProtocol(format!(
                "invalid protocol id {protocol_id}"
            )));
        }
        Ok((transaction_id, &data[7..]))
    }

    async fn try_connect(&self) -> Result<()> {
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(self.config.remote_addr))
            .await
            .map_err(|_| BridgeError::TransportTimeout {
                timeout_ms: self.config.connect_timeout.as_millis() as u64,
            })?
            .map_err(BridgeError::TransportIo)?;
        stream.set_nodelay(self.config.tcp_nodelay).map_err(BridgeError::TransportIo)?;
        *self.stream.lock().await = Some(stream);
        self.set_state(ConnectionState::Connected).await;
        info!(addr = %self.config.remote_addr, "modbus tcp connected");
        Ok(())
    }

    async fn send_frame(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or_else(|| BridgeError::TransportIo(
            std::io::Error::new(std::io::ErrorKind::NotConnected, "not connected"),
        ))?;

        timeout(self.config.response_timeout, stream.write_all(frame))
            .await
            .map_err(|_| BridgeError::TransportTimeout {
                timeout_ms: self.config.response_timeout.as_millis() as u64,
            })?
            .map_err(BridgeError::TransportIo)?;

        let mut buffer = vec![0u8; 512];
        let n = timeout(self.config.response_timeout, stream.read(&mut buffer))
            .await
            .map_err(|_| BridgeError::TransportTimeout {
                timeout_ms: self.config.response_timeout.as_millis() as u64,
            })?
            .map_err(BridgeError::TransportIo)?;
        buffer.truncate(n);
        Ok(buffer)
    }

    fn check_exception(&self, pdu: &[u8]) -> Result<()> {
        if !pdu.is_empty() && pdu[0] & 0x80 != 0 {
            let exception_code = pdu.get(1).copied().unwrap_or(0);
            let slave = self.slave_id.load(Ordering::Relaxed);
            return Err(match exception_code {
                1 => BridgeError::IllegalFunction { slave, function: pdu[0] & 0x7F },
                2 => BridgeError::IllegalAddress { slave, address: 0 },
                6 => BridgeError::SlaveBusy { slave },
                _ => BridgeError::TransportProtocol(format!("exception code {exception_code}")),
            });
        }
        Ok(())
    }

    async fn request(&self, function_code: u8, pdu_tail: Vec<u8>) -> Result<Vec<u8>> {
        let transaction_id = self.next_transaction_id();
        let mut pdu = vec![function_code];
        pdu.extend(pdu_tail);

        let mbap = self.build_mbap(transaction_id, pdu.len());
        let mut frame = Vec::with_capacity(7 + pdu.len());
        frame.extend_from_slice(&mbap);
        frame.extend_from_slice(&pdu);

        let response = self.send_frame(&frame).await?;
        let (resp_id, resp_pdu) = self.parse_mbap(&response)?;
        if resp_id != transaction_id {
            return Err(BridgeError::TransportProtocol(format!(
                "transaction id mismatch: expected {transaction_id}, got {resp_id}"
            )));
        }
        self.check_exception(resp_pdu)?;
        Ok(resp_pdu.to_vec())
    }

    async fn read_words(&self, function_code: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        let pdu_tail = vec![(addr >> 8) as u8, (addr & 0xFF) as u8, (count >> 8) as u8, (count & 0xFF) as u8];
        let pdu = self.request(function_code, pdu_tail).await?;
        let byte_count = *pdu.get(1).unwrap_or(&0) as usize;
        let mut values = Vec::with_capacity(byte_count / 2);
        for i in 0..(byte_count / 2) {
            let idx = 2 + i * 2;
            values.push(((pdu[idx] as u16) << 8) | (pdu[idx + 1] as u16));
        }
        Ok(values)
    }

    async fn read_bits(&self, function_code: u8, addr: u16, count: u16) -> Result<Vec<bool>> {
        let pdu_tail = vec![(addr >> 8) as u8, (addr & 0xFF) as u8, (count >> 8) as u8, (count & 0xFF) as u8];
        let pdu = self.request(function_code, pdu_tail).await?;
        let byte_count = *pdu.get(1).unwrap_or(&0) as usize;
        let mut bits = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let byte = pdu.get(2 + i / 8).copied().unwrap_or(0);
            bits.push((byte >> (i % 8)) & 1 != 0);
            if bits.len() >= byte_count * 8 {
                break;
            }
        }
        bits.truncate(count as usize);
        Ok(bits)
    }
}

#[async_trait]
impl Transport for ModbusTcpTransport {
    /// One bounded connect attempt; does not retry internally. The caller
    /// (the Poller's cycle loop) owns retry cadence and cancellation, so a
    /// dead endpoint never blocks `stop()` behind an unbounded reconnect
    /// loop (§4.5/§5 cancellation contract).
    async fn connect(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting).await;
        match self.try_connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.set_state(ConnectionState::Reconnecting).await;
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;
        guard.take();
        self.set_state(ConnectionState::Disconnected).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.try_read().map(|s| *s == ConnectionState::Connected).unwrap_or(false)
    }

    fn set_slave(&self, id: u8) {
        self.slave_id.store(id, Ordering::Relaxed);
    }

    async fn read_holding(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(0x03, addr, count).await
    }

    async fn read_input(&self, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(0x04, addr, count).await
    }

    async fn write_single_holding(&self, addr: u16, value: u16) -> Result<()> {
        let pdu_tail = vec![(addr >> 8) as u8, (addr & 0xFF) as u8, (value >> 8) as u8, (value & 0xFF) as u8];
        self.request(0x06, pdu_tail).await?;
        Ok(())
    }

    async fn write_multiple_holding(&self, addr: u16, values: &[u16]) -> Result<()> {
        let quantity = values.len() as u16;
        let mut pdu_tail = vec![
            (addr >> 8) as u8,
            (addr & 0xFF) as u8,
            (quantity >> 8) as u8,
            (quantity & 0xFF) as u8,
            (quantity * 2) as u8,
        ];
        for v in values {
            pdu_tail.push((*v >> 8) as u8);
            pdu_tail.push((*v & 0xFF) as u8);
        }
        self.request(0x10, pdu_tail).await?;
        Ok(())
    }

    async fn read_coils(&self, addr: u16, count: u16) -> Result<Vec<bool>> {
        self.read_bits(0x01, addr, count).await
    }

    async fn read_discrete_inputs(&self, addr: u16, count: u16) -> Result<Vec<bool>> {
        self.read_bits(0x02, addr, count).await
    }

    async fn write_single_coil(&self, addr: u16, value: bool) -> Result<()> {
        let word = if value { 0xFF00u16 } else { 0x0000u16 };
        let pdu_tail = vec![(addr >> 8) as u8, (addr & 0xFF) as u8, (word >> 8) as u8, (word & 0xFF) as u8];
        self.request(0x05, pdu_tail).await?;
        Ok(())
    }
}

/// Convenience constructor returning a shareable handle, since the Poller
/// task and any handed-out references both need `Arc<dyn Transport>`.
pub fn shared(config: TcpTransportConfig) -> Arc<ModbusTcpTransport> {
    Arc::new(ModbusTcpTransport::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbap_build() {
        let transport = ModbusTcpTransport::new(TcpTransportConfig::default());
        transport.set_slave(1);
        let mbap = transport.build_mbap(1, 5);
        assert_eq!(mbap[0], 0x00);
        assert_eq!(mbap[1], 0x01);
        assert_eq!(mbap[4], 0x00);
        assert_eq!(mbap[5], 0x06);
        assert_eq!(mbap[6], 0x01);
    }

    #[test]
    fn test_transaction_id_never_zero() {
        let transport = ModbusTcpTransport::new(TcpTransportConfig::default());
        for _ in 0..70_000 {
            assert_ne!(transport.next_transaction_id(), 0);
        }
    }

    #[test]
    fn test_disconnected_initially() {
        let transport = ModbusTcpTransport::new(TcpTransportConfig::default());
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_exception_classification() {
        let transport = ModbusTcpTransport::new(TcpTransportConfig::default());
        transport.set_slave(7);
        let err = transport.check_exception(&[0x83, 0x02]).unwrap_err();
        assert!(matches!(err, BridgeError::IllegalAddress { slave: 7, .. }));
    }
}
