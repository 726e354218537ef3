//! Common types shared across the bridge core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Output / Register / Operation / Mapping type tags
// =============================================================================

/// The typed shape a decoded mapping value takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Bool,
    U16,
    I16,
    U32,
    I32,
    F32,
    String,
}

impl OutputType {
    /// Number of 16-bit registers this output type requires, given a
    /// mapping-declared `register_count` (relevant only for `String`).
    pub fn default_register_count(&self) -> u16 {
        match self {
            Self::Bool | Self::U16 | Self::I16 => 1,
            Self::U32 | Self::I32 | Self::F32 => 2,
            Self::String => 1,
        }
    }

    /// Whether deadband filtering applies (numeric types only).
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Bool | Self::String)
    }
}

/// Fieldbus function class a mapping addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    /// Read/write bit (FC 01/05/15).
    Coil,
    /// Read-only bit (FC 02).
    InputContact,
    /// Read/write 16-bit word (FC 03/06/16).
    HoldingRegister,
    /// Read-only 16-bit word (FC 04).
    InputRegister,
}

impl RegisterType {
    /// Whether this function class supports writes.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }

    /// Whether this function class addresses bits rather than words.
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::InputContact)
    }
}

/// How raw register words become a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationType {
    None,
    TakeBit { index: u8 },
    MergeBigEndian,
    MergeLittleEndian,
    MergeFloatBigEndian,
    MergeFloatLittleEndian,
    StringifyAsciiBigEndian,
    StringifyAsciiLittleEndian,
    StringifyUnicodeBigEndian,
    StringifyUnicodeLittleEndian,
}

/// Platform-side role of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    Attribute,
    /// Resolves to `ReadWrite` for writable register classes, `ReadOnly` otherwise.
    Default,
}

impl MappingType {
    /// Resolves `Default` against a register class; all other variants pass through.
    pub fn resolve(self, register_type: RegisterType) -> MappingType {
        match self {
            MappingType::Default => {
                if register_type.is_writable() {
                    MappingType::ReadWrite
                } else {
                    MappingType::ReadOnly
                }
            }
            other => other,
        }
    }

    /// Whether this role permits the core to accept inbound writes.
    pub fn accepts_writes(&self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }
}

// =============================================================================
// Decoded value
// =============================================================================

/// A mapping's decoded runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    String(String),
}

impl Value {
    /// Numeric view used for deadband comparison; `None` for non-numeric types.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::U16(v) => Some(*v as f64),
            Self::I16(v) => Some(*v as f64),
            Self::U32(v) => Some(*v as f64),
            Self::I32(v) => Some(*v as f64),
            Self::F32(v) => Some(*v as f64),
            Self::Bool(_) | Self::String(_) => None,
        }
    }

    /// Renders the value the way a Reading/Attribute payload carries it.
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Bool(v) => v.to_string(),
            Self::U16(v) => v.to_string(),
            Self::I16(v) => v.to_string(),
            Self::U32(v) => v.to_string(),
            Self::I32(v) => v.to_string(),
            Self::F32(v) => v.to_string(),
            Self::String(v) => v.clone(),
        }
    }
}

// =============================================================================
// Connection / device state
// =============================================================================

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
}

/// SlaveDevice status as reported to the Bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceStatus {
    Connected = 0,
    Disconnected = 1,
}

// =============================================================================
// Time utilities
// =============================================================================

/// Returns current timestamp in nanoseconds since Unix epoch.
pub fn timestamp_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}
