//! §4.5 Poller — single background task owning the Transport exclusively.

use crate::codec;
use crate::error::{BridgeError, Result};
use crate::mapping::Mapping;
use crate::slave_device::{ChangeEvent, GroupReadResult, SlaveDevice};
use crate::transport::Transport;
use crate::types::RegisterType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Fixed cycle period `T` (§4.5), typically 100ms-5s.
    pub period: Duration,
}

/// Writes `value_str` to the device through `transport` for one mapping,
/// recording success/failure on the mapping itself. Shared by the Poller's
/// repeat-write step and the Bridge's startup default-write sequencing.
pub async fn write_mapping_value(
    transport: &dyn Transport,
    mapping: &mut Mapping,
    value_str: &str,
) -> Result<()> {
    let words = mapping.encode_for_write(value_str)?;
    let result = write_words(transport, mapping.def.register_type, mapping.def.start_address, &words).await;
    match result {
        Ok(()) => {
            let decoded = codec::decode(&words, Some(words.first().copied().unwrap_or(0) != 0), mapping.def.output_type, mapping.def.operation_type)
                .unwrap_or_else(|_| crate::types::Value::String(value_str.to_string()));
            mapping.record_write(decoded);
            Ok(())
        }
        Err(e) => {
            mapping.record_write_failure();
            Err(e)
        }
    }
}

async fn write_words(transport: &dyn Transport, register_type: RegisterType, addr: u16, words: &[u16]) -> Result<()> {
    match register_type {
        RegisterType::HoldingRegister => {
            if words.len() <= 1 {
                transport.write_single_holding(addr, words.first().copied().unwrap_or(0)).await
            } else {
                transport.write_multiple_holding(addr, words).await
            }
        }
        RegisterType::Coil => transport.write_single_coil(addr, words.first().copied().unwrap_or(0) != 0).await,
        RegisterType::InputRegister | RegisterType::InputContact => Err(BridgeError::WriteToReadOnly {
            reference: String::new(),
        }),
    }
}

/// Owns the Transport exclusively; walks every device's groups once per
/// cycle, decodes changes onto `change_tx`, and issues due repeat-writes.
pub struct Poller {
    transport: Arc<dyn Transport>,
    devices: Arc<Mutex<Vec<SlaveDevice>>>,
    config: PollerConfig,
    change_tx: mpsc::UnboundedSender<ChangeEvent>,
    running: AtomicBool,
    shutdown: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn Transport>,
        devices: Arc<Mutex<Vec<SlaveDevice>>>,
        config: PollerConfig,
        change_tx: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            devices,
            config,
            change_tx,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            handle: Mutex::new(None),
        })
    }

    /// Idempotent: a second call while already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.handle.lock().await = Some(handle);
    }

    /// Idempotent: joins the task and guarantees no further callbacks fire
    /// after it returns.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs exactly one poll cycle without the background task or its
    /// interval timer. Used by integration tests to drive deterministic
    /// cycles against a scripted Transport.
    pub async fn run_cycle_once(&self) {
        self.run_cycle().await;
    }

    async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.notified() => break,
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.run_cycle().await;
        }
    }

    async fn run_cycle(&self) {
        if !self.transport.is_connected() {
            if let Err(e) = self.transport.connect().await {
                warn!(error = %e, "poll cycle: transport connect failed");
                return;
            }
        }

        let mut devices = self.devices.lock().await;
        for device in devices.iter_mut() {
            self.transport.set_slave(device.slave_id);

            for group_idx in 0..device.groups.len() {
                if !self.running.load(Ordering::SeqCst) {
                    return;
                }
                let group = device.groups[group_idx].clone();
                match self.read_group(group.function_class, group.start_address, group.count).await {
                    Ok(result) => {
                        for event in device.apply_group_read(group_idx, &result) {
                            if self.change_tx.send(event).is_err() {
                                debug!("change event channel closed");
                            }
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "group read failed");
                        device.apply_group_failure(group_idx);
                    }
                }
            }

            // Reads complete before this cycle's writes (§4.5 ordering guarantee).
            let now = Instant::now();
            for mapping in device.mappings.iter_mut() {
                if !self.running.load(Ordering::SeqCst) {
                    return;
                }
                if mapping.repeat_due(now) {
                    if let Some(value) = mapping.effective_default() {
                        self.transport.set_slave(device.slave_id);
                        let _ = write_mapping_value(&*self.transport, mapping, &value).await;
                    }
                    mapping.record_repeat_write();
                }
            }
        }
    }

    async fn read_group(&self, function_class: RegisterType, addr: u16, count: u16) -> Result<GroupReadResult> {
        match function_class {
            RegisterType::HoldingRegister => self.transport.read_holding(addr, count).await.map(GroupReadResult::Words),
            RegisterType::InputRegister => self.transport.read_input(addr, count).await.map(GroupReadResult::Words),
            RegisterType::Coil => self.transport.read_coils(addr, count).await.map(GroupReadResult::Bits),
            RegisterType::InputContact => self.transport.read_discrete_inputs(addr, count).await.map(GroupReadResult::Bits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingDef;
    use crate::types::{MappingType, OperationType, OutputType};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    struct FakeTransport {
        words: StdMutex<Vec<u16>>,
        connected: AtomicBool,
        reads: AtomicU32,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn set_slave(&self, _id: u8) {}
        async fn read_holding(&self, _addr: u16, _count: u16) -> Result<Vec<u16>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.words.lock().unwrap().clone())
        }
        async fn read_input(&self, _addr: u16, _count: u16) -> Result<Vec<u16>> {
            Ok(vec![])
        }
        async fn write_single_holding(&self, _addr: u16, value: u16) -> Result<()> {
            self.words.lock().unwrap()[0] = value;
            Ok(())
        }
        async fn write_multiple_holding(&self, _addr: u16, _values: &[u16]) -> Result<()> {
            Ok(())
        }
        async fn read_coils(&self, _addr: u16, _count: u16) -> Result<Vec<bool>> {
            Ok(vec![])
        }
        async fn read_discrete_inputs(&self, _addr: u16, _count: u16) -> Result<Vec<bool>> {
            Ok(vec![])
        }
        async fn write_single_coil(&self, _addr: u16, _value: bool) -> Result<()> {
            Ok(())
        }
    }

    fn def() -> MappingDef {
        MappingDef {
            reference: "t".into(),
            name: "t".into(),
            register_type: RegisterType::HoldingRegister,
            output_type: OutputType::U16,
            operation_type: OperationType::None,
            mapping_type: MappingType::ReadWrite,
            start_address: 10,
            register_count: 1,
            deadband: 0.0,
            frequency_filter: Duration::ZERO,
            default_value: None,
            repeat_interval: None,
            safe_mode_value: None,
        }
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport {
            words: StdMutex::new(vec![0x42]),
            connected: AtomicBool::new(true),
            reads: AtomicU32::new(0),
        });
        let device = SlaveDevice::new("d1".into(), 1, vec![def()]);
        let devices = Arc::new(Mutex::new(vec![device]));
        let (tx, _rx) = mpsc::unbounded_channel();
        let poller = Poller::new(transport, devices, PollerConfig { period: Duration::from_millis(20) }, tx);

        poller.start().await;
        poller.start().await;
        assert!(poller.is_running());

        poller.stop().await;
        poller.stop().await;
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_cycle_emits_change_event() {
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport {
            words: StdMutex::new(vec![0x42]),
            connected: AtomicBool::new(true),
            reads: AtomicU32::new(0),
        });
        let device = SlaveDevice::new("d1".into(), 1, vec![def()]);
        let devices = Arc::new(Mutex::new(vec![device]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = Poller::new(transport, devices, PollerConfig { period: Duration::from_secs(3600) }, tx);

        poller.run_cycle().await;
        let event = rx.try_recv().expect("expected a change event");
        assert_eq!(event.reference, "t");
    }
}
