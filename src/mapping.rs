//! §4.2 Mapping — per-datapoint runtime state.

use crate::codec;
use crate::error::{BridgeError, Result};
use crate::types::{MappingType, OperationType, OutputType, RegisterType, Value};
use std::time::{Duration, Instant};

/// Outcome of feeding freshly-read words into a [`Mapping`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Unchanged,
    Changed(Value),
}

/// Static definition of one datapoint, shared by all instances of a template.
#[derive(Debug, Clone)]
pub struct MappingDef {
    pub reference: String,
    pub name: String,
    pub register_type: RegisterType,
    pub output_type: OutputType,
    pub operation_type: OperationType,
    pub mapping_type: MappingType,
    pub start_address: u16,
    pub register_count: u16,
    pub deadband: f64,
    pub frequency_filter: Duration,
    pub default_value: Option<String>,
    pub repeat_interval: Option<Duration>,
    pub safe_mode_value: Option<String>,
}

impl MappingDef {
    /// Validates the invariants in SPEC_FULL §3 (Mapping).
    pub fn validate(&self) -> Result<()> {
        if self.register_count == 0 {
            return Err(BridgeError::ConfigInvalid {
                reason: format!("{}: register_count must be >= 1", self.reference),
            });
        }
        let needs_two = matches!(
            self.output_type,
            OutputType::U32 | OutputType::I32 | OutputType::F32
        );
        if needs_two && self.register_count != 2 {
            return Err(BridgeError::ConfigInvalid {
                reason: format!("{}: {:?} requires register_count = 2", self.reference, self.output_type),
            });
        }
        if matches!(self.operation_type, OperationType::TakeBit { .. }) && self.register_count != 1 {
            return Err(BridgeError::ConfigInvalid {
                reason: format!("{}: TakeBit requires register_count = 1", self.reference),
            });
        }
        if self.safe_mode_value.is_some()
            && matches!(
                self.register_type,
                RegisterType::InputRegister | RegisterType::InputContact
            )
        {
            return Err(BridgeError::ConfigInvalid {
                reason: format!("{}: safe_mode_value forbidden on read-only register class", self.reference),
            });
        }
        if self.repeat_interval.is_some() && self.default_value.is_none() {
            return Err(BridgeError::ConfigInvalid {
                reason: format!("{}: repeat_interval requires default_value", self.reference),
            });
        }
        Ok(())
    }
}

/// One live instance of a [`MappingDef`] bound to a device.
#[derive(Debug)]
pub struct Mapping {
    pub def: MappingDef,
    pub last_value: Option<Value>,
    pub last_emit_at: Option<Instant>,
    pub last_write_at: Option<Instant>,
    pub valid: bool,
    pub initialized: bool,
    /// Live override of `def.default_value`, set by an inbound `DFV(ref)` feed.
    pub default_override: Option<String>,
    /// Live repeat-write interval; starts at `def.repeat_interval` but an
    /// inbound `RPW(ref)` feed updates it directly (§9 open question).
    pub repeat_interval: Option<Duration>,
    /// Live override of `def.safe_mode_value`, set by an inbound `SMV(ref)` feed.
    pub safe_mode_override: Option<String>,
    pub last_repeat_write_at: Option<Instant>,
}

impl Mapping {
    pub fn new(def: MappingDef) -> Self {
        let repeat_interval = def.repeat_interval;
        Self {
            def,
            last_value: None,
            last_emit_at: None,
            last_write_at: None,
            default_override: None,
            repeat_interval,
            safe_mode_override: None,
            last_repeat_write_at: None,
            valid: false,
            initialized: false,
        }
    }

    pub fn reference(&self) -> &str {
        &self.def.reference
    }

    /// Persisted override wins over the template default on every reload.
    pub fn effective_default(&self) -> Option<String> {
        self.default_override.clone().or_else(|| self.def.default_value.clone())
    }

    pub fn effective_safe_mode(&self) -> Option<String> {
        self.safe_mode_override.clone().or_else(|| self.def.safe_mode_value.clone())
    }

    /// Whether this cycle is due for a periodic repeat-write.
    pub fn repeat_due(&self, now: Instant) -> bool {
        match (self.repeat_interval, self.effective_default()) {
            (Some(interval), Some(_)) => match self.last_repeat_write_at {
                Some(last) => now.duration_since(last) >= interval,
                None => true,
            },
            _ => false,
        }
    }

    pub fn record_repeat_write(&mut self) {
        self.last_repeat_write_at = Some(Instant::now());
    }

    /// Decodes freshly-read words/bit and applies deadband + frequency filter.
    pub fn update_from_words(&mut self, words: &[u16], bit: Option<bool>) -> Result<UpdateOutcome> {
        let decoded = codec::decode(words, bit, self.def.output_type, self.def.operation_type).map_err(|reason| {
            BridgeError::DecodeInvalid {
                reference: self.def.reference.clone(),
                reason,
            }
        })?;
        self.valid = true;
        self.initialized = true;

        if let Some(prev) = &self.last_value {
            if let (Some(p), Some(n)) = (prev.as_f64(), decoded.as_f64()) {
                if (n - p).abs() <= self.def.deadband {
                    self.last_value = Some(decoded);
                    return Ok(UpdateOutcome::Unchanged);
                }
            } else if *prev == decoded {
                return Ok(UpdateOutcome::Unchanged);
            }
        }

        let now = Instant::now();
        if let Some(last_emit) = self.last_emit_at {
            if now.duration_since(last_emit) < self.def.frequency_filter {
                self.last_value = Some(decoded);
                return Ok(UpdateOutcome::Unchanged);
            }
        }

        self.last_value = Some(decoded.clone());
        self.last_emit_at = Some(now);
        Ok(UpdateOutcome::Changed(decoded))
    }

    /// Encodes `user_string` and returns the words to write, validating that
    /// the mapping is writable. Does not perform the Transport call itself —
    /// the caller (Poller/Bridge) issues the write and reports success via
    /// [`Mapping::record_write`].
    pub fn encode_for_write(&self, user_string: &str) -> Result<Vec<u16>> {
        if !self.def.register_type.is_writable() {
            return Err(BridgeError::WriteToReadOnly {
                reference: self.def.reference.clone(),
            });
        }
        if matches!(self.def.operation_type, OperationType::TakeBit { .. }) {
            return Err(BridgeError::UnsupportedOperation {
                reference: self.def.reference.clone(),
                reason: "no atomic bit-in-word write".to_string(),
            });
        }
        codec::encode(
            user_string,
            self.def.output_type,
            self.def.operation_type,
            self.def.register_count,
        )
        .map_err(|reason| BridgeError::EncodeInvalid {
            reference: self.def.reference.clone(),
            reason,
        })
    }

    /// Records a successful write: updates `last_value`/`last_write_at`.
    pub fn record_write(&mut self, value: Value) {
        self.last_value = Some(value);
        self.last_write_at = Some(Instant::now());
        self.valid = true;
    }

    /// Marks the mapping invalid after a failed write, without touching `last_value`.
    pub fn record_write_failure(&mut self) {
        self.valid = false;
    }

    pub fn to_wire_value(&self) -> Option<String> {
        self.last_value.as_ref().map(Value::to_wire_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(deadband: f64, frequency_filter: Duration) -> MappingDef {
        MappingDef {
            reference: "t".into(),
            name: "t".into(),
            register_type: RegisterType::HoldingRegister,
            output_type: OutputType::U16,
            operation_type: OperationType::None,
            mapping_type: MappingType::ReadWrite,
            start_address: 10,
            register_count: 1,
            deadband,
            frequency_filter,
            default_value: None,
            repeat_interval: None,
            safe_mode_value: None,
        }
    }

    #[test]
    fn test_deadband_suppresses_small_change() {
        let mut m = Mapping::new(def(5.0, Duration::ZERO));
        assert_eq!(
            m.update_from_words(&[100], None).unwrap(),
            UpdateOutcome::Changed(Value::U16(100))
        );
        assert_eq!(
            m.update_from_words(&[103], None).unwrap(),
            UpdateOutcome::Unchanged
        );
        assert_eq!(
            m.update_from_words(&[120], None).unwrap(),
            UpdateOutcome::Changed(Value::U16(120))
        );
    }

    #[test]
    fn test_frequency_filter_suppresses_fast_repeat() {
        let mut m = Mapping::new(def(0.0, Duration::from_secs(3600)));
        assert_eq!(
            m.update_from_words(&[1], None).unwrap(),
            UpdateOutcome::Changed(Value::U16(1))
        );
        assert_eq!(
            m.update_from_words(&[2], None).unwrap(),
            UpdateOutcome::Unchanged
        );
        assert_eq!(m.last_value, Some(Value::U16(2)));
    }

    #[test]
    fn test_write_to_read_only_rejected() {
        let mut d = def(0.0, Duration::ZERO);
        d.register_type = RegisterType::InputRegister;
        let m = Mapping::new(d);
        assert!(matches!(
            m.encode_for_write("1"),
            Err(BridgeError::WriteToReadOnly { .. })
        ));
    }

    #[test]
    fn test_take_bit_write_rejected() {
        let mut d = def(0.0, Duration::ZERO);
        d.operation_type = OperationType::TakeBit { index: 0 };
        d.output_type = OutputType::Bool;
        let m = Mapping::new(d);
        assert!(matches!(
            m.encode_for_write("true"),
            Err(BridgeError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_safe_mode_on_read_only_rejected_at_validate() {
        let mut d = def(0.0, Duration::ZERO);
        d.register_type = RegisterType::InputRegister;
        d.safe_mode_value = Some("0".into());
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_repeat_interval_requires_default() {
        let mut d = def(0.0, Duration::ZERO);
        d.repeat_interval = Some(Duration::from_secs(1));
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_effective_default_prefers_override() {
        let mut d = def(0.0, Duration::ZERO);
        d.default_value = Some("100".into());
        let mut m = Mapping::new(d);
        assert_eq!(m.effective_default(), Some("100".to_string()));
        m.default_override = Some("250".into());
        assert_eq!(m.effective_default(), Some("250".to_string()));
    }

    #[test]
    fn test_repeat_due_without_prior_write_is_true_when_configured() {
        let mut d = def(0.0, Duration::ZERO);
        d.default_value = Some("1".into());
        d.repeat_interval = Some(Duration::from_millis(10));
        let m = Mapping::new(d);
        assert!(m.repeat_due(Instant::now()));
    }

    #[test]
    fn test_repeat_not_due_without_default() {
        let d = def(0.0, Duration::ZERO);
        let mut m = Mapping::new(d);
        m.repeat_interval = Some(Duration::from_millis(10));
        assert!(!m.repeat_due(Instant::now()));
    }
}
