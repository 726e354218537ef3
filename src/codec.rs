//! Pure decode/encode between register words and typed [`Value`]s.
//!
//! Nothing in this module performs I/O; `decode` is total given the
//! declared `register_count`, and `encode` either produces the exact
//! word count the mapping declared or fails with a parse error.

use crate::types::{OperationType, OutputType, Value};

/// Decodes raw register words (or a single bit, for `Coil`/`InputContact`
/// reads) into a typed [`Value`] per the declared output/operation tags.
pub fn decode(
    words: &[u16],
    bit: Option<bool>,
    output_type: OutputType,
    operation_type: OperationType,
) -> Result<Value, String> {
    match (output_type, operation_type) {
        (OutputType::Bool, OperationType::TakeBit { index }) => {
            let word = *words.first().ok_or("missing word for TakeBit")?;
            Ok(Value::Bool((word >> index) & 1 != 0))
        }
        (OutputType::Bool, _) => {
            if let Some(b) = bit {
                Ok(Value::Bool(b))
            } else {
                let word = *words.first().ok_or("missing word for bool")?;
                Ok(Value::Bool(word != 0))
            }
        }
        (OutputType::U16, _) => {
            let word = *words.first().ok_or("missing word for u16")?;
            Ok(Value::U16(word))
        }
        (OutputType::I16, _) => {
            let word = *words.first().ok_or("missing word for i16")?;
            Ok(Value::I16(word as i16))
        }
        (OutputType::U32, OperationType::MergeLittleEndian) => {
            let (hi, lo) = two_words(words)?;
            Ok(Value::U32(((lo as u32) << 16) | hi as u32))
        }
        (OutputType::U32, _) => {
            let (hi, lo) = two_words(words)?;
            Ok(Value::U32(((hi as u32) << 16) | lo as u32))
        }
        (OutputType::I32, OperationType::MergeLittleEndian) => {
            let (hi, lo) = two_words(words)?;
            Ok(Value::I32(((lo as u32) << 16 | hi as u32) as i32))
        }
        (OutputType::I32, _) => {
            let (hi, lo) = two_words(words)?;
            Ok(Value::I32(((hi as u32) << 16 | lo as u32) as i32))
        }
        (OutputType::F32, OperationType::MergeFloatLittleEndian) => {
            let (hi, lo) = two_words(words)?;
            let bits = ((lo as u32) << 16) | hi as u32;
            Ok(Value::F32(f32::from_bits(bits)))
        }
        (OutputType::F32, OperationType::MergeFloatBigEndian) | (OutputType::F32, _) => {
            let (hi, lo) = two_words(words)?;
            let bits = ((hi as u32) << 16) | lo as u32;
            Ok(Value::F32(f32::from_bits(bits)))
        }
        (OutputType::String, op) => Ok(Value::String(decode_string(words, op)?)),
    }
}

fn two_words(words: &[u16]) -> Result<(u16, u16), String> {
    if words.len() < 2 {
        return Err(format!("expected 2 words, got {}", words.len()));
    }
    Ok((words[0], words[1]))
}

fn decode_string(words: &[u16], operation_type: OperationType) -> Result<String, String> {
    use OperationType::*;
    let s = match operation_type {
        StringifyAsciiBigEndian => {
            let mut bytes = Vec::with_capacity(words.len() * 2);
            for w in words {
                bytes.push((w >> 8) as u8);
                bytes.push((w & 0xFF) as u8);
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }
        StringifyAsciiLittleEndian => {
            let mut bytes = Vec::with_capacity(words.len() * 2);
            for w in words {
                bytes.push((w & 0xFF) as u8);
                bytes.push((w >> 8) as u8);
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }
        StringifyUnicodeBigEndian => {
            let units: Vec<u16> = words.to_vec();
            String::from_utf16_lossy(&units)
        }
        StringifyUnicodeLittleEndian => {
            let units: Vec<u16> = words.iter().map(|w| w.swap_bytes()).collect();
            String::from_utf16_lossy(&units)
        }
        _ => return Err("String output type requires a Stringify* operation".into()),
    };
    Ok(s.trim_end_matches('\u{0}').to_string())
}

/// Encodes a user-supplied string into register words per the declared
/// output/operation tags and register count. Fails without partial output
/// on parse error.
pub fn encode(
    user_string: &str,
    output_type: OutputType,
    operation_type: OperationType,
    register_count: u16,
) -> Result<Vec<u16>, String> {
    match output_type {
        OutputType::Bool => {
            let b = parse_bool(user_string)?;
            if let OperationType::TakeBit { .. } = operation_type {
                return Err("TakeBit write is not supported".into());
            }
            Ok(vec![if b { 1 } else { 0 }])
        }
        OutputType::U16 => {
            let v: u16 = user_string
                .trim()
                .parse()
                .map_err(|_| format!("invalid u16: {user_string}"))?;
            Ok(vec![v])
        }
        OutputType::I16 => {
            let v: i16 = user_string
                .trim()
                .parse()
                .map_err(|_| format!("invalid i16: {user_string}"))?;
            Ok(vec![v as u16])
        }
        OutputType::U32 => {
            let v: u32 = user_string
                .trim()
                .parse()
                .map_err(|_| format!("invalid u32: {user_string}"))?;
            Ok(split_words(v, operation_type))
        }
        OutputType::I32 => {
            let v: i32 = user_string
                .trim()
                .parse()
                .map_err(|_| format!("invalid i32: {user_string}"))?;
            Ok(split_words(v as u32, operation_type))
        }
        OutputType::F32 => {
            let v: f32 = user_string
                .trim()
                .parse()
                .map_err(|_| format!("invalid f32: {user_string}"))?;
            let bits = v.to_bits();
            let hi = (bits >> 16) as u16;
            let lo = (bits & 0xFFFF) as u16;
            Ok(match operation_type {
                OperationType::MergeFloatLittleEndian => vec![lo, hi],
                _ => vec![hi, lo],
            })
        }
        OutputType::String => encode_string(user_string, operation_type, register_count),
    }
}

fn split_words(v: u32, operation_type: OperationType) -> Vec<u16> {
    let hi = (v >> 16) as u16;
    let lo = (v & 0xFFFF) as u16;
    match operation_type {
        OperationType::MergeLittleEndian => vec![lo, hi],
        _ => vec![hi, lo],
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(format!("invalid bool: {other}")),
    }
}

fn encode_string(
    s: &str,
    operation_type: OperationType,
    register_count: u16,
) -> Result<Vec<u16>, String> {
    use OperationType::*;
    let n = register_count as usize;
    match operation_type {
        StringifyAsciiBigEndian | StringifyAsciiLittleEndian => {
            let mut bytes = s.as_bytes().to_vec();
            bytes.resize(n * 2, 0);
            let mut words = Vec::with_capacity(n);
            for chunk in bytes.chunks(2) {
                let (hi, lo) = (chunk[0] as u16, chunk[1] as u16);
                words.push(if operation_type == StringifyAsciiBigEndian {
                    (hi << 8) | lo
                } else {
                    (lo << 8) | hi
                });
            }
            Ok(words)
        }
        StringifyUnicodeBigEndian | StringifyUnicodeLittleEndian => {
            let mut units: Vec<u16> = s.encode_utf16().collect();
            units.resize(n, 0);
            if operation_type == StringifyUnicodeLittleEndian {
                units = units.into_iter().map(|u| u.swap_bytes()).collect();
            }
            Ok(units)
        }
        _ => Err("String output type requires a Stringify* operation".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_u16_round_trip() {
        let words = encode("66", OutputType::U16, OperationType::None, 1).unwrap();
        let v = decode(&words, None, OutputType::U16, OperationType::None).unwrap();
        assert_eq!(v, Value::U16(66));
    }

    #[test]
    fn test_i16_negative_round_trip() {
        let words = encode("-123", OutputType::I16, OperationType::None, 1).unwrap();
        assert_eq!(words, vec![0xFF85]);
        let v = decode(&words, None, OutputType::I16, OperationType::None).unwrap();
        assert_eq!(v, Value::I16(-123));
    }

    #[test]
    fn test_float_big_endian_decode() {
        let words = [0x4048, 0xF5C3];
        let v = decode(
            &words,
            None,
            OutputType::F32,
            OperationType::MergeFloatBigEndian,
        )
        .unwrap();
        match v {
            Value::F32(f) => assert!((f - 3.14).abs() < 1e-4),
            _ => panic!("expected F32"),
        }
    }

    #[test]
    fn test_take_bit() {
        let word = 0b0000_0000_0010_0100u16;
        let v = decode(
            &[word],
            None,
            OutputType::Bool,
            OperationType::TakeBit { index: 2 },
        )
        .unwrap();
        assert_eq!(v, Value::Bool(true));
        let v = decode(
            &[word],
            None,
            OutputType::Bool,
            OperationType::TakeBit { index: 3 },
        )
        .unwrap();
        assert_eq!(v, Value::Bool(false));
    }

    #[test]
    fn test_take_bit_write_unsupported() {
        let err = encode("true", OutputType::Bool, OperationType::TakeBit { index: 0 }, 1);
        assert!(err.is_err());
    }

    #[test]
    fn test_string_ascii_round_trip() {
        let words = encode(
            "hi",
            OutputType::String,
            OperationType::StringifyAsciiBigEndian,
            2,
        )
        .unwrap();
        let v = decode(
            &words,
            None,
            OutputType::String,
            OperationType::StringifyAsciiBigEndian,
        )
        .unwrap();
        assert_eq!(v, Value::String("hi".to_string()));
    }

    #[test]
    fn test_bool_parse_invalid() {
        assert!(parse_bool("maybe").is_err());
        assert!(parse_bool("TRUE").unwrap());
    }

    proptest::proptest! {
        #[test]
        fn prop_u16_round_trip(v: u16) {
            let words = encode(&v.to_string(), OutputType::U16, OperationType::None, 1).unwrap();
            let decoded = decode(&words, None, OutputType::U16, OperationType::None).unwrap();
            prop_assert_eq!(decoded, Value::U16(v));
        }

        #[test]
        fn prop_i32_round_trip(v: i32) {
            let words = encode(&v.to_string(), OutputType::I32, OperationType::MergeBigEndian, 2).unwrap();
            let decoded = decode(&words, None, OutputType::I32, OperationType::MergeBigEndian).unwrap();
            prop_assert_eq!(decoded, Value::I32(v));
        }
    }
}
