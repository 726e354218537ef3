//! A test/demo [`PlatformClient`] that logs outbound calls and exposes
//! inbound callbacks as a channel, rather than speaking a real protocol.

use super::{Attribute, DeviceRegistration, PlatformClient, PlatformStatus, Reading};
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

/// One inbound event a live platform session would otherwise deliver;
/// tests and the demo binary inject these on the sender half of
/// [`inbound_channel`], forwarding them into `Bridge::on_*`.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    FeedUpdate { device_key: String, readings: Vec<(String, String)> },
    ParameterUpdate { device_key: String, params: Vec<(String, String)> },
    PlatformStatus(PlatformStatus),
}

/// Creates the channel pair used to simulate inbound platform events: the
/// sender is held by test code (or a real platform session adapter), the
/// receiver is drained by a task that calls into `Bridge::on_*`.
pub fn inbound_channel() -> (mpsc::UnboundedSender<InboundEvent>, mpsc::UnboundedReceiver<InboundEvent>) {
    mpsc::unbounded_channel()
}

/// Logs every outbound publish via `tracing`. Carries no state; inbound
/// events are driven separately through [`inbound_channel`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPlatformClient;

impl LoggingPlatformClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlatformClient for LoggingPlatformClient {
    async fn publish_readings(&self, device_key: &str, readings: Vec<Reading>) -> Result<()> {
        for r in &readings {
            info!(device_key, reference = %r.reference, value = %r.value.to_wire_string(), "publish reading");
        }
        Ok(())
    }

    async fn publish_attribute(&self, device_key: &str, attribute: Attribute) -> Result<()> {
        info!(device_key, name = %attribute.name, value = %attribute.value, "publish attribute");
        Ok(())
    }

    async fn register_devices(&self, registrations: Vec<DeviceRegistration>) -> Result<()> {
        for reg in &registrations {
            info!(device_key = %reg.device_key, feed_count = reg.feeds.len(), "register device");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[tokio::test]
    async fn test_publish_readings_does_not_error() {
        let client = LoggingPlatformClient::new();
        let readings = vec![Reading { reference: "t".into(), value: Value::U16(66) }];
        client.publish_readings("dev1", readings).await.unwrap();
    }

    #[tokio::test]
    async fn test_inbound_channel_delivers_events() {
        let (tx, mut rx) = inbound_channel();
        tx.send(InboundEvent::PlatformStatus(PlatformStatus::Connected)).unwrap();
        assert!(matches!(rx.recv().await, Some(InboundEvent::PlatformStatus(PlatformStatus::Connected))));
    }
}
