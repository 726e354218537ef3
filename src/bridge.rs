//! §4.7 Bridge — wires config-derived devices to the platform collaborator.
//!
//! Builds `key_by_slave`/`mapping_by_fqref` indices from parsed templates
//! and device records, classifies inbound feed updates (control feeds vs.
//! direct writes), and turns poller `ChangeEvent`s into outbound
//! Reading/Attribute publishes.

use crate::error::{BridgeError, Result};
use crate::persistence::KeyValuePersistence;
use crate::platform::{Attribute, DeviceRegistration, FeedDescriptor, FeedDirection, PlatformClient, Reading};
use crate::poller::write_mapping_value;
use crate::slave_device::{ChangeEvent, SlaveDevice};
use crate::transport::Transport;
use crate::types::{MappingType, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Fully-qualified reference separator: `"{device_key}{SEPARATOR}{mapping_reference}"`.
/// Part of the on-disk persistence contract; preserved byte-for-byte.
pub const FQREF_SEPARATOR: char = '.';

pub fn fqref(device_key: &str, reference: &str) -> String {
    format!("{device_key}{FQREF_SEPARATOR}{reference}")
}

/// Classification of one inbound platform reading.
#[derive(Debug, Clone, PartialEq)]
enum FeedKind {
    Default(String),
    RepeatWrite(String),
    SafeMode(String),
    Direct(String),
}

fn classify(reference: &str) -> FeedKind {
    if let Some(inner) = strip_wrapped(reference, "DFV(") {
        FeedKind::Default(inner)
    } else if let Some(inner) = strip_wrapped(reference, "RPW(") {
        FeedKind::RepeatWrite(inner)
    } else if let Some(inner) = strip_wrapped(reference, "SMV(") {
        FeedKind::SafeMode(inner)
    } else {
        FeedKind::Direct(reference.to_string())
    }
}

fn strip_wrapped(reference: &str, prefix: &str) -> Option<String> {
    reference.strip_prefix(prefix).and_then(|rest| rest.strip_suffix(')')).map(|s| s.to_string())
}

/// Ties devices, transport, persistence and the platform collaborator
/// together. Does not own the Poller task directly; `start()` performs the
/// startup default-write sequencing documented in §4.7, then the caller is
/// expected to start the Poller and LifecycleController.
pub struct Bridge {
    devices: Arc<Mutex<Vec<SlaveDevice>>>,
    transport: Arc<dyn Transport>,
    platform: Arc<dyn PlatformClient>,
    default_store: KeyValuePersistence,
    repeat_store: KeyValuePersistence,
    safe_store: KeyValuePersistence,
}

impl Bridge {
    pub fn new(
        devices: Arc<Mutex<Vec<SlaveDevice>>>,
        transport: Arc<dyn Transport>,
        platform: Arc<dyn PlatformClient>,
        default_store: KeyValuePersistence,
        repeat_store: KeyValuePersistence,
        safe_store: KeyValuePersistence,
    ) -> Self {
        Self {
            devices,
            transport,
            platform,
            default_store,
            repeat_store,
            safe_store,
        }
    }

    /// Loads persisted overrides onto every mapping, writes each mapping's
    /// effective default in address-ascending order, registers every device
    /// with the platform, and publishes a synthetic outbound reading for
    /// each enabled side-policy (`DFV`/`RPW`/`SMV`) so the platform mirrors
    /// current state (§4.7). The first real `Changed` event still reflects
    /// the post-default state (§4.7 startup sequencing invariant).
    pub async fn start(&self) -> Result<()> {
        self.register_devices().await?;

        let defaults = self.default_store.load_all().await;
        let repeats = self.repeat_store.load_all().await;
        let safes = self.safe_store.load_all().await;

        let mut devices = self.devices.lock().await;
        let mut synthetic: Vec<(String, Vec<Reading>)> = Vec::new();
        for device in devices.iter_mut() {
            self.transport.set_slave(device.slave_id);
            let key = device.key.clone();

            // Apply persisted overrides before writing defaults, so a
            // reload honors "override wins on every reload" (§4.7).
            for mapping in device.mappings.iter_mut() {
                let fq = fqref(&key, mapping.reference());
                if let Some(v) = defaults.get(&fq) {
                    mapping.default_override = Some(v.clone());
                }
                if let Some(v) = repeats.get(&fq) {
                    if let Ok(ms) = v.parse::<u64>() {
                        mapping.repeat_interval = Some(std::time::Duration::from_millis(ms));
                    }
                }
                if let Some(v) = safes.get(&fq) {
                    mapping.safe_mode_override = Some(v.clone());
                }
            }

            // Address-ascending order: mappings are stored in template
            // declaration order, which build_groups sorts by address
            // within a function class but the vec itself retains
            // declaration order; sort indices explicitly here.
            let mut order: Vec<usize> = (0..device.mappings.len()).collect();
            order.sort_by_key(|&i| device.mappings[i].def.start_address);

            for idx in order {
                let mapping = &mut device.mappings[idx];
                if let Some(value) = mapping.effective_default() {
                    if let Err(e) = write_mapping_value(&*self.transport, mapping, &value).await {
                        warn!(reference = mapping.reference(), error = %e, "startup default write failed");
                    }
                }
            }

            let readings = device.mappings.iter().flat_map(synthetic_readings_for).collect::<Vec<_>>();
            if !readings.is_empty() {
                synthetic.push((key, readings));
            }
        }
        drop(devices);

        for (key, readings) in synthetic {
            if let Err(e) = self.platform.publish_readings(&key, readings).await {
                warn!(device_key = %key, error = %e, "failed to publish synthetic control-feed readings");
            }
        }

        Ok(())
    }

    /// Builds a `DeviceRegistration` per device (one feed per mapping, plus
    /// a synthetic `DFV`/`RPW`/`SMV` feed per enabled side-policy) and
    /// registers all of them with the platform (§6.2).
    pub async fn register_devices(&self) -> Result<()> {
        let devices = self.devices.lock().await;
        let registrations: Vec<DeviceRegistration> = devices.iter().map(build_registration).collect();
        drop(devices);
        self.platform.register_devices(registrations).await
    }

    /// Inbound platform reading classification and dispatch (§4.7).
    pub async fn on_feed_update(&self, device_key: &str, readings: Vec<(String, String)>) {
        for (reference, payload) in readings {
            match classify(&reference) {
                FeedKind::Default(target) => self.apply_default_override(device_key, &target, payload).await,
                FeedKind::RepeatWrite(target) => self.apply_repeat_override(device_key, &target, payload).await,
                FeedKind::SafeMode(target) => self.apply_safe_override(device_key, &target, payload).await,
                FeedKind::Direct(target) => self.apply_direct_write(device_key, &target, payload).await,
            }
        }
    }

    async fn apply_default_override(&self, device_key: &str, reference: &str, payload: String) {
        let mut devices = self.devices.lock().await;
        if let Some(device) = devices.iter_mut().find(|d| d.key == device_key) {
            if let Some(idx) = device.mapping_index_by_reference(reference) {
                device.mappings[idx].default_override = Some(payload.clone());
            }
        }
        drop(devices);
        let fq = fqref(device_key, reference);
        if let Err(e) = self.default_store.put(&fq, &payload).await {
            warn!(key = %fq, error = %e, "failed to persist default override");
        }
    }

    async fn apply_repeat_override(&self, device_key: &str, reference: &str, payload: String) {
        let ms: u64 = match payload.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                error!(device_key, reference, payload, "RPW payload is not an unsigned integer, skipping");
                return;
            }
        };
        let mut devices = self.devices.lock().await;
        if let Some(device) = devices.iter_mut().find(|d| d.key == device_key) {
            if let Some(idx) = device.mapping_index_by_reference(reference) {
                // Resolved open question: the parsed value becomes the live
                // repeat_interval (S6), not a zero-valued placeholder.
                device.mappings[idx].repeat_interval = Some(std::time::Duration::from_millis(ms));
            }
        }
        drop(devices);
        let fq = fqref(device_key, reference);
        if let Err(e) = self.repeat_store.put(&fq, &payload).await {
            warn!(key = %fq, error = %e, "failed to persist repeat override");
        }
    }

    async fn apply_safe_override(&self, device_key: &str, reference: &str, payload: String) {
        let mut devices = self.devices.lock().await;
        if let Some(device) = devices.iter_mut().find(|d| d.key == device_key) {
            if let Some(idx) = device.mapping_index_by_reference(reference) {
                device.mappings[idx].safe_mode_override = Some(payload.clone());
            }
        }
        drop(devices);
        let fq = fqref(device_key, reference);
        if let Err(e) = self.safe_store.put(&fq, &payload).await {
            warn!(key = %fq, error = %e, "failed to persist safe-mode override");
        }
    }

    async fn apply_direct_write(&self, device_key: &str, reference: &str, payload: String) {
        let mut devices = self.devices.lock().await;
        let Some(device) = devices.iter_mut().find(|d| d.key == device_key) else {
            warn!(device_key, "direct write for unknown device");
            return;
        };
        let Some(idx) = device.mapping_index_by_reference(reference) else {
            warn!(device_key, reference, "direct write for unknown mapping");
            return;
        };
        self.transport.set_slave(device.slave_id);
        if let Err(e) = write_mapping_value(&*self.transport, &mut device.mappings[idx], &payload).await {
            match &e {
                BridgeError::WriteToReadOnly { .. } | BridgeError::UnsupportedOperation { .. } | BridgeError::EncodeInvalid { .. } => {
                    warn!(device_key, reference, error = %e, "rejected inbound write");
                }
                _ => {
                    debug!(device_key, reference, error = %e, "inbound write failed");
                }
            }
        }
    }

    /// `on_parameter_update` is log-only; no behavior required by the core (§4.7).
    pub fn on_parameter_update(&self, device_key: &str, params: Vec<(String, String)>) {
        for (name, value) in params {
            debug!(device_key, name, value, "parameter update (log-only)");
        }
    }

    /// Consumes poller `ChangeEvent`s until the channel closes, publishing
    /// each as an outbound Reading or Attribute per the mapping's
    /// `mapping_type`.
    pub async fn drive_changes(&self, mut changes: tokio::sync::mpsc::UnboundedReceiver<ChangeEvent>) {
        while let Some(event) = changes.recv().await {
            self.publish_change(event).await;
        }
    }

    async fn publish_change(&self, event: ChangeEvent) {
        let devices = self.devices.lock().await;
        let Some(device) = devices.iter().find(|d| d.key == event.device_key) else {
            return;
        };
        let Some(idx) = device.mapping_index_by_reference(&event.reference) else {
            return;
        };
        let mapping_type = device.mappings[idx].def.mapping_type.resolve(device.mappings[idx].def.register_type);
        drop(devices);

        let result = if mapping_type == MappingType::Attribute {
            self.platform
                .publish_attribute(
                    &event.device_key,
                    Attribute {
                        name: event.reference.clone(),
                        data_type: value_type_name(&event.value),
                        value: event.value.to_wire_string(),
                    },
                )
                .await
        } else {
            self.platform
                .publish_readings(&event.device_key, vec![Reading { reference: event.reference.clone(), value: event.value }])
                .await
        };
        if let Err(e) = result {
            warn!(device_key = %event.device_key, reference = %event.reference, error = %e, "platform publish failed");
        }
    }
}

/// One `DeviceRegistration` for a device: one feed per non-attribute
/// mapping (attributes are listed separately), plus a synthetic feed for
/// each enabled side-policy (§6.2).
fn build_registration(device: &SlaveDevice) -> DeviceRegistration {
    let mut feeds = Vec::new();
    let mut attributes = Vec::new();
    for mapping in &device.mappings {
        let resolved = mapping.def.mapping_type.resolve(mapping.def.register_type);
        if resolved == MappingType::Attribute {
            attributes.push(mapping.reference().to_string());
        } else {
            feeds.push(FeedDescriptor {
                reference: mapping.reference().to_string(),
                direction: FeedDirection::resolve(mapping.def.register_type, mapping.def.mapping_type),
            });
        }
        if mapping.def.default_value.is_some() {
            feeds.push(FeedDescriptor { reference: format!("DFV({})", mapping.reference()), direction: FeedDirection::InOut });
        }
        if mapping.def.repeat_interval.is_some() {
            feeds.push(FeedDescriptor { reference: format!("RPW({})", mapping.reference()), direction: FeedDirection::InOut });
        }
        if mapping.def.safe_mode_value.is_some() {
            feeds.push(FeedDescriptor { reference: format!("SMV({})", mapping.reference()), direction: FeedDirection::InOut });
        }
    }
    DeviceRegistration { device_key: device.key.clone(), feeds, attributes }
}

/// Synthetic `DFV`/`RPW`/`SMV` readings mirroring one mapping's current
/// side-policy state, published once on startup (§4.7).
fn synthetic_readings_for(mapping: &crate::mapping::Mapping) -> Vec<Reading> {
    let mut readings = Vec::new();
    if let Some(v) = mapping.effective_default() {
        readings.push(Reading { reference: format!("DFV({})", mapping.reference()), value: Value::String(v) });
    }
    if let Some(interval) = mapping.repeat_interval {
        readings.push(Reading {
            reference: format!("RPW({})", mapping.reference()),
            value: Value::String(interval.as_millis().to_string()),
        });
    }
    if let Some(v) = mapping.effective_safe_mode() {
        readings.push(Reading { reference: format!("SMV({})", mapping.reference()), value: Value::String(v) });
    }
    readings
}

fn value_type_name(value: &Value) -> String {
    match value {
        Value::Bool(_) => "bool",
        Value::U16(_) | Value::U32(_) => "uint",
        Value::I16(_) | Value::I32(_) => "int",
        Value::F32(_) => "float",
        Value::String(_) => "string",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_control_feeds() {
        assert_eq!(classify("DFV(t)"), FeedKind::Default("t".into()));
        assert_eq!(classify("RPW(t)"), FeedKind::RepeatWrite("t".into()));
        assert_eq!(classify("SMV(t)"), FeedKind::SafeMode("t".into()));
        assert_eq!(classify("t"), FeedKind::Direct("t".into()));
    }

    #[test]
    fn test_fqref_format_preserved() {
        assert_eq!(fqref("dev1", "t"), "dev1.t");
    }

    fn def(reference: &str) -> crate::mapping::MappingDef {
        crate::mapping::MappingDef {
            reference: reference.into(),
            name: reference.into(),
            register_type: crate::types::RegisterType::HoldingRegister,
            output_type: crate::types::OutputType::U16,
            operation_type: crate::types::OperationType::None,
            mapping_type: MappingType::ReadWrite,
            start_address: 0,
            register_count: 1,
            deadband: 0.0,
            frequency_filter: std::time::Duration::ZERO,
            default_value: None,
            repeat_interval: None,
            safe_mode_value: None,
        }
    }

    #[test]
    fn test_build_registration_adds_synthetic_feeds_per_side_policy() {
        let mut d = def("t");
        d.default_value = Some("0".into());
        d.repeat_interval = Some(std::time::Duration::from_millis(500));
        d.safe_mode_value = Some("0".into());
        let device = SlaveDevice::new("d1".into(), 1, vec![d]);

        let reg = build_registration(&device);
        assert_eq!(reg.device_key, "d1");
        let refs: Vec<&str> = reg.feeds.iter().map(|f| f.reference.as_str()).collect();
        assert!(refs.contains(&"t"));
        assert!(refs.contains(&"DFV(t)"));
        assert!(refs.contains(&"RPW(t)"));
        assert!(refs.contains(&"SMV(t)"));
    }

    #[test]
    fn test_synthetic_readings_empty_without_side_policies() {
        let device = SlaveDevice::new("d1".into(), 1, vec![def("t")]);
        assert!(synthetic_readings_for(&device.mappings[0]).is_empty());
    }

    #[test]
    fn test_synthetic_readings_carry_current_values() {
        let mut d = def("t");
        d.default_value = Some("42".into());
        let device = SlaveDevice::new("d1".into(), 1, vec![d]);
        let readings = synthetic_readings_for(&device.mappings[0]);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].reference, "DFV(t)");
        assert_eq!(readings[0].value, Value::String("42".to_string()));
    }
}
