//! §4.3 Group — contiguous address runs read in one bulk Transport call.

use crate::mapping::MappingDef;
use crate::types::RegisterType;

/// Default Modbus-class limits: 125 words per request, 2000 bits per request.
pub const DEFAULT_MAX_WORDS_PER_REQUEST: u16 = 125;
pub const DEFAULT_MAX_BITS_PER_REQUEST: u16 = 2000;

/// A contiguous run of one function class on one slave, read in a single call.
#[derive(Debug, Clone)]
pub struct GroupDef {
    pub function_class: RegisterType,
    pub start_address: u16,
    pub count: u16,
    /// Indices into the owning device's mapping vec, address-ascending.
    pub member_indices: Vec<usize>,
}

impl GroupDef {
    fn end_address(&self) -> u16 {
        self.start_address + self.count - 1
    }
}

/// Builds the minimal set of groups for one slave's mappings.
///
/// Sorts by `(function_class, start_address)`, then greedily merges a
/// mapping into the current group when it is contiguous with (or shares
/// the same word as, for co-located `TakeBit` mappings) the group's
/// address range and the merge would not exceed the per-request limit.
pub fn build_groups(
    defs: &[MappingDef],
    max_words: u16,
    max_bits: u16,
) -> Vec<GroupDef> {
    let mut order: Vec<usize> = (0..defs.len()).collect();
    order.sort_by_key(|&i| (function_class_rank(defs[i].register_type), defs[i].start_address));

    let mut groups: Vec<GroupDef> = Vec::new();
    for idx in order {
        let def = &defs[idx];
        let limit = if def.register_type.is_bit() {
            max_bits
        } else {
            max_words
        };
        let def_end = def.start_address + def.register_count - 1;

        if let Some(group) = groups.last_mut() {
            let same_class = group.function_class == def.register_type;
            let adjoins = def.start_address <= group.end_address() + 1;
            let new_end = def_end.max(group.end_address());
            let new_count = new_end - group.start_address + 1;
            if same_class && adjoins && new_count <= limit {
                group.count = new_count;
                group.member_indices.push(idx);
                continue;
            }
        }

        groups.push(GroupDef {
            function_class: def.register_type,
            start_address: def.start_address,
            count: def.register_count,
            member_indices: vec![idx],
        });
    }
    groups
}

fn function_class_rank(t: RegisterType) -> u8 {
    match t {
        RegisterType::Coil => 0,
        RegisterType::InputContact => 1,
        RegisterType::HoldingRegister => 2,
        RegisterType::InputRegister => 3,
    }
}
