//! §6.4 Configuration inputs — module config and devices config.
//!
//! Mirrors the teacher's `GatewayConfig`/`DeviceConfig` pattern: plain
//! `#[derive(Deserialize)]` structs with per-field `#[serde(default = "...")]`
//! helper functions for optional knobs, loaded from YAML via `serde_yaml`.

use crate::error::{BridgeError, Result};
use crate::mapping::MappingDef;
use crate::types::{MappingType, OperationType, OutputType, RegisterType};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Module configuration
// =============================================================================

/// Fieldbus connection type, internally tagged the way the wider
/// Modbus-bridge ecosystem encodes `ConnectionConfig`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionConfig {
    TcpIp {
        host: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    SerialRtu {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
        #[serde(default)]
        parity: SerialParity,
    },
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

/// Top-level module configuration: platform endpoint plus fieldbus
/// connection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    pub mqtt_host: String,
    pub connection: ConnectionConfig,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_register_read_period_ms")]
    pub register_read_period_ms: u64,
}

impl ModuleConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn register_read_period(&self) -> Duration {
        Duration::from_millis(self.register_read_period_ms)
    }

    /// Loads and parses a module config document; I/O and parse failures are
    /// both reported as `ConfigInvalid`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::ConfigInvalid {
            reason: format!("reading module config {}: {e}", path.display()),
        })?;
        serde_yaml::from_str(&content).map_err(|e| BridgeError::ConfigInvalid {
            reason: format!("parsing module config {}: {e}", path.display()),
        })
    }
}

fn default_modbus_port() -> u16 {
    502
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_response_timeout_ms() -> u64 {
    200
}
fn default_register_read_period_ms() -> u64 {
    1000
}

// =============================================================================
// Devices configuration
// =============================================================================

/// One mapping definition as it appears in a template, before instantiation.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingTemplateEntry {
    pub reference: String,
    pub name: String,
    pub register_type: RegisterType,
    pub output_type: OutputType,
    #[serde(default)]
    pub operation_type: OperationType,
    #[serde(default)]
    pub mapping_type: MappingType,
    pub start_address: u16,
    #[serde(default = "default_register_count")]
    pub register_count: u16,
    #[serde(default)]
    pub deadband: f64,
    #[serde(default)]
    pub frequency_filter_ms: u64,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub repeat_interval_ms: Option<u64>,
    #[serde(default)]
    pub safe_mode_value: Option<String>,
}

fn default_register_count() -> u16 {
    1
}

impl MappingTemplateEntry {
    fn into_def(self) -> MappingDef {
        MappingDef {
            reference: self.reference,
            name: self.name,
            register_type: self.register_type,
            output_type: self.output_type,
            operation_type: self.operation_type,
            mapping_type: self.mapping_type,
            start_address: self.start_address,
            register_count: self.register_count,
            deadband: self.deadband,
            frequency_filter: Duration::from_millis(self.frequency_filter_ms),
            default_value: self.default_value,
            repeat_interval: self.repeat_interval_ms.map(Duration::from_millis),
            safe_mode_value: self.safe_mode_value,
        }
    }
}

impl Default for MappingType {
    fn default() -> Self {
        MappingType::Default
    }
}

impl Default for OperationType {
    fn default() -> Self {
        OperationType::None
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    pub name: String,
    pub mappings: Vec<MappingTemplateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub key: String,
    pub template: String,
    pub slave_id: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevicesConfig {
    pub templates: Vec<TemplateConfig>,
    pub devices: Vec<DeviceEntry>,
}

impl DevicesConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::ConfigInvalid {
            reason: format!("reading devices config {}: {e}", path.display()),
        })?;
        serde_yaml::from_str(&content).map_err(|e| BridgeError::ConfigInvalid {
            reason: format!("parsing devices config {}: {e}", path.display()),
        })
    }
}

/// One resolved device, ready to become a `SlaveDevice`.
pub struct ResolvedDevice {
    pub key: String,
    pub slave_id: u8,
    pub mappings: Vec<MappingDef>,
}

/// Applies §6.4's startup validation: fatal (no templates/no devices,
/// `TcpIp` with more than one device, zero slave ids) vs. skip-with-warning
/// (per-device invalid template, duplicate slave id) with a fatal empty
/// result set.
pub fn resolve_devices(module: &ModuleConfig, devices_cfg: &DevicesConfig) -> Result<Vec<ResolvedDevice>> {
    if devices_cfg.templates.is_empty() {
        return Err(BridgeError::ConfigInvalid { reason: "no templates defined".into() });
    }
    if devices_cfg.devices.is_empty() {
        return Err(BridgeError::ConfigInvalid { reason: "no devices defined".into() });
    }
    if matches!(module.connection, ConnectionConfig::TcpIp { .. }) && devices_cfg.devices.len() != 1 {
        return Err(BridgeError::ConfigInvalid {
            reason: format!("TcpIp connection requires exactly one device, found {}", devices_cfg.devices.len()),
        });
    }

    for d in &devices_cfg.devices {
        if d.slave_id == 0 {
            return Err(BridgeError::ConfigInvalid { reason: format!("device {}: slave_id must be nonzero", d.key) });
        }
    }

    let mut resolved = Vec::new();
    let mut used_slave_ids: HashSet<u8> = HashSet::new();
    for d in &devices_cfg.devices {
        let Some(template) = devices_cfg.templates.iter().find(|t| t.name == d.template) else {
            warn!(device = %d.key, template = %d.template, "skipping device: invalid template");
            continue;
        };
        if !used_slave_ids.insert(d.slave_id) {
            warn!(device = %d.key, slave_id = d.slave_id, "skipping device: duplicate slave id");
            continue;
        }
        let mappings: Vec<MappingDef> = template.mappings.iter().cloned().map(MappingTemplateEntry::into_def).collect();
        for m in &mappings {
            m.validate()?;
        }
        resolved.push(ResolvedDevice {
            key: d.key.clone(),
            slave_id: d.slave_id,
            mappings,
        });
    }

    if resolved.is_empty() {
        return Err(BridgeError::ConfigInvalid { reason: "no valid devices after per-device validation".into() });
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(conn: ConnectionConfig) -> ModuleConfig {
        ModuleConfig {
            mqtt_host: "tcp://localhost:1883".into(),
            connection: conn,
            response_timeout_ms: 200,
            register_read_period_ms: 1000,
        }
    }

    fn template(name: &str) -> TemplateConfig {
        TemplateConfig {
            name: name.into(),
            mappings: vec![MappingTemplateEntry {
                reference: "t".into(),
                name: "t".into(),
                register_type: RegisterType::HoldingRegister,
                output_type: OutputType::U16,
                operation_type: OperationType::None,
                mapping_type: MappingType::Default,
                start_address: 0,
                register_count: 1,
                deadband: 0.0,
                frequency_filter_ms: 0,
                default_value: None,
                repeat_interval_ms: None,
                safe_mode_value: None,
            }],
        }
    }

    #[test]
    fn test_no_templates_is_fatal() {
        let module = module(ConnectionConfig::SerialRtu {
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        });
        let devices = DevicesConfig { templates: vec![], devices: vec![] };
        assert!(resolve_devices(&module, &devices).is_err());
    }

    #[test]
    fn test_tcpip_requires_single_device() {
        let module = module(ConnectionConfig::TcpIp { host: "10.0.0.1".into(), port: 502 });
        let devices = DevicesConfig {
            templates: vec![template("t1")],
            devices: vec![
                DeviceEntry { name: "a".into(), key: "a".into(), template: "t1".into(), slave_id: 1 },
                DeviceEntry { name: "b".into(), key: "b".into(), template: "t1".into(), slave_id: 2 },
            ],
        };
        assert!(resolve_devices(&module, &devices).is_err());
    }

    #[test]
    fn test_duplicate_slave_id_skips_later_device_keeps_first() {
        let module = module(ConnectionConfig::SerialRtu {
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        });
        let devices = DevicesConfig {
            templates: vec![template("t1")],
            devices: vec![
                DeviceEntry { name: "a".into(), key: "a".into(), template: "t1".into(), slave_id: 1 },
                DeviceEntry { name: "b".into(), key: "b".into(), template: "t1".into(), slave_id: 1 },
            ],
        };
        let resolved = resolve_devices(&module, &devices).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].key, "a");
    }

    #[test]
    fn test_zero_slave_id_is_fatal() {
        let module = module(ConnectionConfig::SerialRtu {
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        });
        let devices = DevicesConfig {
            templates: vec![template("t1")],
            devices: vec![DeviceEntry { name: "a".into(), key: "a".into(), template: "t1".into(), slave_id: 0 }],
        };
        assert!(resolve_devices(&module, &devices).is_err());
    }

    #[test]
    fn test_missing_template_skips_device_but_keeps_others() {
        let module = module(ConnectionConfig::SerialRtu {
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        });
        let devices = DevicesConfig {
            templates: vec![template("t1")],
            devices: vec![
                DeviceEntry { name: "a".into(), key: "a".into(), template: "missing".into(), slave_id: 1 },
                DeviceEntry { name: "b".into(), key: "b".into(), template: "t1".into(), slave_id: 2 },
            ],
        };
        let resolved = resolve_devices(&module, &devices).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].key, "b");
    }

    #[test]
    fn test_all_devices_missing_template_is_fatal() {
        let module = module(ConnectionConfig::SerialRtu {
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        });
        let devices = DevicesConfig {
            templates: vec![template("t1")],
            devices: vec![DeviceEntry { name: "a".into(), key: "a".into(), template: "missing".into(), slave_id: 1 }],
        };
        assert!(resolve_devices(&module, &devices).is_err());
    }

    #[test]
    fn test_valid_config_resolves() {
        let module = module(ConnectionConfig::SerialRtu {
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        });
        let devices = DevicesConfig {
            templates: vec![template("t1")],
            devices: vec![DeviceEntry { name: "a".into(), key: "dev1".into(), template: "t1".into(), slave_id: 1 }],
        };
        let resolved = resolve_devices(&module, &devices).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].key, "dev1");
        assert_eq!(resolved[0].mappings.len(), 1);
    }
}
