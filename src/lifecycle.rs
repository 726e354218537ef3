//! §4.8 Lifecycle controller — drives the poller off platform connection
//! and registration edges, and fires the safe-mode write batch exactly
//! once per `connected: true -> false` edge.

use crate::mapping::Mapping;
use crate::poller::{write_mapping_value, Poller};
use crate::slave_device::SlaveDevice;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// `{connected, registered}` pair driving whether the poller should run.
/// `poller: stopped|running` is represented by the Poller's own
/// `is_running()`, not duplicated here.
pub struct LifecycleController {
    transport: Arc<dyn Transport>,
    devices: Arc<Mutex<Vec<SlaveDevice>>>,
    poller: Arc<Poller>,
    connected: AtomicBool,
    registered: AtomicBool,
}

impl LifecycleController {
    pub fn new(transport: Arc<dyn Transport>, devices: Arc<Mutex<Vec<SlaveDevice>>>, poller: Arc<Poller>) -> Self {
        Self {
            transport,
            devices,
            poller,
            connected: AtomicBool::new(false),
            registered: AtomicBool::new(false),
        }
    }

    async fn start_poller_if_ready(&self) {
        if self.connected.load(Ordering::SeqCst) && self.registered.load(Ordering::SeqCst) {
            self.poller.start().await;
        }
    }

    /// Platform connection edge. On a true->false edge, writes every
    /// mapping's effective safe-mode value exactly once before stopping
    /// the poller.
    pub async fn on_platform_connected(&self, connected: bool) {
        let was_connected = self.connected.swap(connected, Ordering::SeqCst);
        if connected {
            info!("platform connected");
            self.start_poller_if_ready().await;
            return;
        }
        if was_connected {
            info!("platform disconnected, writing safe-mode values");
            self.write_safe_mode_batch().await;
        }
        self.poller.stop().await;
    }

    /// Registration completed for all devices.
    pub async fn on_registration_complete(&self) {
        self.registered.store(true, Ordering::SeqCst);
        info!("device registration complete");
        self.start_poller_if_ready().await;
    }

    async fn write_safe_mode_batch(&self) {
        if !self.transport.is_connected() {
            if let Err(e) = self.transport.connect().await {
                warn!(error = %e, "safe-mode batch: transport connect failed");
                return;
            }
        }
        let mut devices = self.devices.lock().await;
        for device in devices.iter_mut() {
            self.transport.set_slave(device.slave_id);
            for mapping in device.mappings.iter_mut() {
                if let Some(value) = mapping.effective_safe_mode() {
                    if let Err(e) = write_mapping_value(&*self.transport, mapping, &value).await {
                        warn!(reference = mapping.reference(), error = %e, "safe-mode write failed");
                    }
                }
            }
        }
    }

    /// Stops the poller and closes the Transport.
    pub async fn stop(&self) {
        self.poller.stop().await;
        let _ = self.transport.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingDef;
    use crate::transport::Transport;
    use crate::types::{MappingType, OperationType, OutputType, RegisterType};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FakeTransport {
        connected: AtomicBool,
        writes: StdMutex<Vec<(u16, u16)>>,
        reads: AtomicU32,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self) -> crate::error::Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) -> crate::error::Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn set_slave(&self, _id: u8) {}
        async fn read_holding(&self, _addr: u16, _count: u16) -> crate::error::Result<Vec<u16>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0])
        }
        async fn read_input(&self, _addr: u16, _count: u16) -> crate::error::Result<Vec<u16>> {
            Ok(vec![])
        }
        async fn write_single_holding(&self, addr: u16, value: u16) -> crate::error::Result<()> {
            self.writes.lock().unwrap().push((addr, value));
            Ok(())
        }
        async fn write_multiple_holding(&self, _addr: u16, _values: &[u16]) -> crate::error::Result<()> {
            Ok(())
        }
        async fn read_coils(&self, _addr: u16, _count: u16) -> crate::error::Result<Vec<bool>> {
            Ok(vec![])
        }
        async fn read_discrete_inputs(&self, _addr: u16, _count: u16) -> crate::error::Result<Vec<bool>> {
            Ok(vec![])
        }
        async fn write_single_coil(&self, _addr: u16, _value: bool) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn def_with_safe(reference: &str, addr: u16, safe: &str) -> MappingDef {
        MappingDef {
            reference: reference.into(),
            name: reference.into(),
            register_type: RegisterType::HoldingRegister,
            output_type: OutputType::U16,
            operation_type: OperationType::None,
            mapping_type: MappingType::ReadWrite,
            start_address: addr,
            register_count: 1,
            deadband: 0.0,
            frequency_filter: Duration::ZERO,
            default_value: None,
            repeat_interval: None,
            safe_mode_value: Some(safe.to_string()),
        }
    }

    #[tokio::test]
    async fn test_safe_mode_written_exactly_once_on_disconnect_edge() {
        let fake = Arc::new(FakeTransport {
            connected: AtomicBool::new(true),
            writes: StdMutex::new(Vec::new()),
            reads: AtomicU32::new(0),
        });
        let transport: Arc<dyn Transport> = Arc::clone(&fake) as Arc<dyn Transport>;
        let device = SlaveDevice::new("d1".into(), 1, vec![def_with_safe("a", 1, "0")]);
        let devices = Arc::new(Mutex::new(vec![device]));
        let (tx, _rx) = mpsc::unbounded_channel();
        let poller = Poller::new(Arc::clone(&transport), Arc::clone(&devices), crate::poller::PollerConfig { period: Duration::from_secs(3600) }, tx);
        let lifecycle = LifecycleController::new(transport, devices, poller);

        lifecycle.on_platform_connected(true).await;
        lifecycle.on_platform_connected(false).await;
        // A second disconnect while already disconnected must not re-fire.
        lifecycle.on_platform_connected(false).await;

        assert_eq!(*fake.writes.lock().unwrap(), vec![(1, 0)]);
    }

    #[tokio::test]
    async fn test_poller_starts_only_when_connected_and_registered() {
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport {
            connected: AtomicBool::new(true),
            writes: StdMutex::new(Vec::new()),
            reads: AtomicU32::new(0),
        });
        let device = SlaveDevice::new("d1".into(), 1, vec![def_with_safe("a", 1, "0")]);
        let devices = Arc::new(Mutex::new(vec![device]));
        let (tx, _rx) = mpsc::unbounded_channel();
        let poller = Poller::new(Arc::clone(&transport), Arc::clone(&devices), crate::poller::PollerConfig { period: Duration::from_secs(3600) }, tx);
        let lifecycle = LifecycleController::new(transport, devices, Arc::clone(&poller));

        lifecycle.on_platform_connected(true).await;
        assert!(!poller.is_running());

        lifecycle.on_registration_complete().await;
        assert!(poller.is_running());

        lifecycle.stop().await;
        assert!(!poller.is_running());
    }
}
