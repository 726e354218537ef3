//! §4.4 SlaveDevice — one slave's groups, with change-event fan-out.

use crate::group::{build_groups, GroupDef, DEFAULT_MAX_BITS_PER_REQUEST, DEFAULT_MAX_WORDS_PER_REQUEST};
use crate::mapping::{Mapping, MappingDef, UpdateOutcome};
use crate::types::{DeviceStatus, Value};

/// A value change surfaced by the Poller; consumed by the Bridge.
///
/// Carries no back-pointer to the Mapping/Group/SlaveDevice it came from —
/// routing back to the platform happens by `(device_key, reference)` lookup
/// in the Bridge's `mapping_by_fqref` index (see design notes §9).
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub device_key: String,
    pub reference: String,
    pub value: Value,
}

/// Result of reading one group's words/bits from the Transport.
pub enum GroupReadResult {
    Words(Vec<u16>),
    Bits(Vec<bool>),
}

/// One slave's full set of mappings, grouped for bulk reads.
pub struct SlaveDevice {
    pub key: String,
    pub slave_id: u8,
    pub mappings: Vec<Mapping>,
    pub groups: Vec<GroupDef>,
    pub status: DeviceStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl SlaveDevice {
    pub fn new(key: String, slave_id: u8, defs: Vec<MappingDef>) -> Self {
        let groups = build_groups(&defs, DEFAULT_MAX_WORDS_PER_REQUEST, DEFAULT_MAX_BITS_PER_REQUEST);
        let mappings = defs.into_iter().map(Mapping::new).collect();
        Self {
            key,
            slave_id,
            mappings,
            groups,
            status: DeviceStatus::Disconnected,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    /// Applies a successful group read, dispatching each member mapping's
    /// slice of the shared buffer and collecting `Changed` outcomes in
    /// address-ascending order.
    pub fn apply_group_read(&mut self, group_idx: usize, result: &GroupReadResult) -> Vec<ChangeEvent> {
        self.note_success();
        let group = &self.groups[group_idx];
        let mut events = Vec::new();
        for &mapping_idx in &group.member_indices {
            let mapping = &mut self.mappings[mapping_idx];
            let start = mapping.def.start_address;
            let offset = (start - group.start_address) as usize;
            let outcome = match result {
                GroupReadResult::Words(words) => {
                    let count = mapping.def.register_count as usize;
                    if offset + count > words.len() {
                        continue;
                    }
                    mapping.update_from_words(&words[offset..offset + count], None)
                }
                GroupReadResult::Bits(bits) => {
                    if offset >= bits.len() {
                        continue;
                    }
                    mapping.update_from_words(&[], Some(bits[offset]))
                }
            };
            if let Ok(UpdateOutcome::Changed(value)) = outcome {
                events.push(ChangeEvent {
                    device_key: self.key.clone(),
                    reference: mapping.reference().to_string(),
                    value,
                });
            }
        }
        events
    }

    /// Marks every member of a group invalid after a failed Transport read,
    /// retaining each mapping's `last_value`.
    pub fn apply_group_failure(&mut self, group_idx: usize) {
        self.note_failure();
        for &mapping_idx in &self.groups[group_idx].member_indices {
            self.mappings[mapping_idx].valid = false;
        }
    }

    fn note_success(&mut self) {
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
        self.status = DeviceStatus::Connected;
    }

    fn note_failure(&mut self) {
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.status = DeviceStatus::Disconnected;
    }

    pub fn mapping_index_by_reference(&self, reference: &str) -> Option<usize> {
        self.mappings.iter().position(|m| m.reference() == reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MappingType, OperationType, OutputType, RegisterType};
    use std::time::Duration;

    fn def(reference: &str, start: u16) -> MappingDef {
        MappingDef {
            reference: reference.into(),
            name: reference.into(),
            register_type: RegisterType::HoldingRegister,
            output_type: OutputType::U16,
            operation_type: OperationType::None,
            mapping_type: MappingType::ReadWrite,
            start_address: start,
            register_count: 1,
            deadband: 0.0,
            frequency_filter: Duration::ZERO,
            default_value: None,
            repeat_interval: None,
            safe_mode_value: None,
        }
    }

    #[test]
    fn test_group_read_emits_change_in_address_order() {
        let mut dev = SlaveDevice::new("d1".into(), 1, vec![def("a", 10), def("b", 11)]);
        assert_eq!(dev.groups.len(), 1);
        let events = dev.apply_group_read(0, &GroupReadResult::Words(vec![5, 6]));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].reference, "a");
        assert_eq!(events[1].reference, "b");
        assert_eq!(dev.status, DeviceStatus::Connected);
    }

    #[test]
    fn test_group_failure_marks_members_invalid_keeps_last_value() {
        let mut dev = SlaveDevice::new("d1".into(), 1, vec![def("a", 10)]);
        dev.apply_group_read(0, &GroupReadResult::Words(vec![42]));
        assert_eq!(dev.mappings[0].last_value, Some(Value::U16(42)));
        dev.apply_group_failure(0);
        assert!(!dev.mappings[0].valid);
        assert_eq!(dev.mappings[0].last_value, Some(Value::U16(42)));
        assert_eq!(dev.status, DeviceStatus::Disconnected);
    }
}
