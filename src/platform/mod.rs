//! §6.2 PlatformClient — the outward-facing collaborator contract.
//!
//! Trait-only: no MQTT session, registration handshake, or publish queue
//! is implemented here. A concrete collaborator (or [`logging::LoggingPlatformClient`]
//! for demos/tests) is supplied by the caller.

pub mod logging;

use crate::error::Result;
use crate::types::{MappingType, RegisterType, Value};
use async_trait::async_trait;

/// Direction of a registered feed, as seen from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedDirection {
    In,
    Out,
    InOut,
}

impl FeedDirection {
    /// Per §6.2: `InOut` for `HoldingRegister`/`Coil`, `In` otherwise;
    /// `ReadWrite`/`WriteOnly` force `InOut`; `ReadOnly` forces `In`.
    pub fn resolve(register_type: RegisterType, mapping_type: MappingType) -> Self {
        match mapping_type {
            MappingType::ReadOnly => FeedDirection::In,
            MappingType::ReadWrite | MappingType::WriteOnly => FeedDirection::InOut,
            MappingType::Attribute | MappingType::Default => {
                if register_type.is_writable() {
                    FeedDirection::InOut
                } else {
                    FeedDirection::In
                }
            }
        }
    }
}

/// One outbound time-series value.
#[derive(Debug, Clone)]
pub struct Reading {
    pub reference: String,
    pub value: Value,
}

/// One outbound static metadata value.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub data_type: String,
    pub value: String,
}

/// One feed descriptor registered for a device's mapping (or a synthetic
/// control feed for an enabled side-policy).
#[derive(Debug, Clone)]
pub struct FeedDescriptor {
    pub reference: String,
    pub direction: FeedDirection,
}

/// Everything the platform needs to know about one device up front.
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub device_key: String,
    pub feeds: Vec<FeedDescriptor>,
    pub attributes: Vec<String>,
}

/// Connection status toward the platform, as observed by the Lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformStatus {
    Connected,
    Disconnected,
}

/// The outward collaborator the Bridge publishes to and installs inbound
/// callbacks on.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn publish_readings(&self, device_key: &str, readings: Vec<Reading>) -> Result<()>;
    async fn publish_attribute(&self, device_key: &str, attribute: Attribute) -> Result<()>;
    async fn register_devices(&self, registrations: Vec<DeviceRegistration>) -> Result<()>;
}
