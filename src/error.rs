//! Error types for the bridge core.

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge core error types.
#[derive(Error, Debug)]
pub enum BridgeError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration, fatal at startup.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Transport call did not complete within the configured timeout.
    #[error("transport timeout after {timeout_ms}ms")]
    TransportTimeout { timeout_ms: u64 },

    /// Underlying I/O failure (socket, serial port).
    #[error("transport I/O error: {0}")]
    TransportIo(#[from] std::io::Error),

    /// Malformed frame or protocol-level exception from the remote device.
    #[error("transport protocol error: {0}")]
    TransportProtocol(String),

    /// Device returned an illegal address exception.
    #[error("illegal address: slave {slave}, address {address}")]
    IllegalAddress { slave: u8, address: u16 },

    /// Device returned an illegal function exception.
    #[error("illegal function: slave {slave}, function {function}")]
    IllegalFunction { slave: u8, function: u8 },

    /// Device returned a busy/acknowledge exception.
    #[error("slave {slave} busy")]
    SlaveBusy { slave: u8 },

    // =========================================================================
    // Codec / Mapping Errors
    // =========================================================================
    /// Raw words could not be decoded into the declared output type.
    #[error("decode failed for reference {reference}: {reason}")]
    DecodeInvalid { reference: String, reason: String },

    /// User-supplied string could not be encoded into register words.
    #[error("encode failed for reference {reference}: {reason}")]
    EncodeInvalid { reference: String, reason: String },

    /// A write was attempted against a read-only register class.
    #[error("write to read-only mapping: {reference}")]
    WriteToReadOnly { reference: String },

    /// An operation is not supported on this mapping (e.g. a TakeBit write).
    #[error("unsupported operation on {reference}: {reason}")]
    UnsupportedOperation { reference: String, reason: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Durable store read/write failure.
    #[error("persistence error on {path}: {reason}")]
    PersistenceIo { path: String, reason: String },

    // =========================================================================
    // Platform Errors
    // =========================================================================
    /// The platform client failed to accept an outbound publish.
    #[error("platform publish failed: {reason}")]
    PlatformPublishFailed { reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Catch-all for conditions that should not occur given upstream checks.
    #[error("internal error: {reason}")]
    Internal { reason: String },

    /// Channel send failed (receiver dropped).
    #[error("channel send error")]
    ChannelSend,
}

impl BridgeError {
    /// Short machine-readable tag, grouped by concern, for logging/metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "config.invalid",
            Self::TransportTimeout { .. } => "transport.timeout",
            Self::TransportIo(_) => "transport.io",
            Self::TransportProtocol(_) => "transport.protocol",
            Self::IllegalAddress { .. } => "transport.illegal_address",
            Self::IllegalFunction { .. } => "transport.illegal_function",
            Self::SlaveBusy { .. } => "transport.slave_busy",
            Self::DecodeInvalid { .. } => "codec.decode_invalid",
            Self::EncodeInvalid { .. } => "codec.encode_invalid",
            Self::WriteToReadOnly { .. } => "mapping.write_to_read_only",
            Self::UnsupportedOperation { .. } => "mapping.unsupported_operation",
            Self::PersistenceIo { .. } => "persistence.io",
            Self::PlatformPublishFailed { .. } => "platform.publish_failed",
            Self::Internal { .. } => "internal",
            Self::ChannelSend => "internal.channel_send",
        }
    }

    /// Whether a failing Transport call should merely invalidate the current
    /// cycle's reading (`true`) or indicates the slave is unreachable and the
    /// device status should flip to `Disconnected` (`false`).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TransportTimeout { .. } => true,
            Self::SlaveBusy { .. } => true,
            Self::TransportProtocol(_) => true,
            _ => false,
        }
    }
}
