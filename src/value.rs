//! Typed register values and their on-wire little-endian byte encoding.

use crate::error::{Error, Result};
use crate::register::Dtype;

/// A decoded register value, tagged by its dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValue {
    U8(u8),
    S8(i8),
    U16(u16),
    S16(i16),
    U32(u32),
    S32(i32),
    U64(u64),
    S64(i64),
    Float(f32),
    Str(String),
    ByteArray512(Vec<u8>),
    Bool(bool),
}

impl RegisterValue {
    pub fn dtype(&self) -> Dtype {
        match self {
            RegisterValue::U8(_) => Dtype::U8,
            RegisterValue::S8(_) => Dtype::S8,
            RegisterValue::U16(_) => Dtype::U16,
            RegisterValue::S16(_) => Dtype::S16,
            RegisterValue::U32(_) => Dtype::U32,
            RegisterValue::S32(_) => Dtype::S32,
            RegisterValue::U64(_) => Dtype::U64,
            RegisterValue::S64(_) => Dtype::S64,
            RegisterValue::Float(_) => Dtype::Float,
            RegisterValue::Str(_) => Dtype::Str,
            RegisterValue::ByteArray512(_) => Dtype::ByteArray512,
            RegisterValue::Bool(_) => Dtype::Bool,
        }
    }

    /// Encode to little-endian wire bytes. `field_size` is only consulted
    /// for `Str` (NUL-padded to this size) and is ignored otherwise.
    pub fn to_bytes(&self, field_size: usize) -> Vec<u8> {
        match self {
            RegisterValue::U8(v) => vec![*v],
            RegisterValue::S8(v) => vec![*v as u8],
            RegisterValue::U16(v) => v.to_le_bytes().to_vec(),
            RegisterValue::S16(v) => v.to_le_bytes().to_vec(),
            RegisterValue::U32(v) => v.to_le_bytes().to_vec(),
            RegisterValue::S32(v) => v.to_le_bytes().to_vec(),
            RegisterValue::U64(v) => v.to_le_bytes().to_vec(),
            RegisterValue::S64(v) => v.to_le_bytes().to_vec(),
            RegisterValue::Float(v) => v.to_le_bytes().to_vec(),
            RegisterValue::Bool(v) => vec![*v as u8],
            RegisterValue::Str(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.resize(field_size.max(bytes.len() + 1), 0);
                bytes
            }
            RegisterValue::ByteArray512(b) => {
                let mut bytes = b.clone();
                bytes.resize(512, 0);
                bytes
            }
        }
    }

    /// Decode wire bytes according to `dtype`.
    pub fn from_bytes(dtype: Dtype, bytes: &[u8]) -> Result<Self> {
        let need = |n: usize| -> Result<&[u8]> {
            bytes
                .get(..n)
                .ok_or_else(|| Error::Value(format!("expected at least {n} bytes, got {}", bytes.len())))
        };
        Ok(match dtype {
            Dtype::U8 => RegisterValue::U8(need(1)?[0]),
            Dtype::S8 => RegisterValue::S8(need(1)?[0] as i8),
            Dtype::U16 => RegisterValue::U16(u16::from_le_bytes(need(2)?.try_into().unwrap())),
            Dtype::S16 => RegisterValue::S16(i16::from_le_bytes(need(2)?.try_into().unwrap())),
            Dtype::U32 => RegisterValue::U32(u32::from_le_bytes(need(4)?.try_into().unwrap())),
            Dtype::S32 => RegisterValue::S32(i32::from_le_bytes(need(4)?.try_into().unwrap())),
            Dtype::U64 => RegisterValue::U64(u64::from_le_bytes(need(8)?.try_into().unwrap())),
            Dtype::S64 => RegisterValue::S64(i64::from_le_bytes(need(8)?.try_into().unwrap())),
            Dtype::Float => RegisterValue::Float(f32::from_le_bytes(need(4)?.try_into().unwrap())),
            Dtype::Bool => RegisterValue::Bool(need(1)?[0] != 0),
            Dtype::Str => {
                // NUL-trimmed: cut at the first NUL, ignore anything after.
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let s = std::str::from_utf8(&bytes[..end])
                    .map_err(|e| Error::Value(format!("invalid UTF-8 in STR register: {e}")))?;
                RegisterValue::Str(s.to_string())
            }
            Dtype::ByteArray512 => RegisterValue::ByteArray512(bytes.to_vec()),
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            RegisterValue::U8(v) => Some(v as i64),
            RegisterValue::S8(v) => Some(v as i64),
            RegisterValue::U16(v) => Some(v as i64),
            RegisterValue::S16(v) => Some(v as i64),
            RegisterValue::U32(v) => Some(v as i64),
            RegisterValue::S32(v) => Some(v as i64),
            RegisterValue::U64(v) => Some(v as i64),
            RegisterValue::S64(v) => Some(v),
            RegisterValue::Bool(v) => Some(v as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip() {
        for v in [-1234i32, 0, i32::MAX, i32::MIN] {
            let rv = RegisterValue::S32(v);
            let bytes = rv.to_bytes(4);
            assert_eq!(RegisterValue::from_bytes(Dtype::S32, &bytes).unwrap(), rv);
        }
    }

    #[test]
    fn string_trims_trailing_nul_and_pads_to_field_size() {
        let rv = RegisterValue::Str("hello".into());
        let bytes = rv.to_bytes(16);
        assert_eq!(bytes.len(), 16);
        assert_eq!(RegisterValue::from_bytes(Dtype::Str, &bytes).unwrap(), rv);
    }

    #[test]
    fn float_round_trip_matches_known_ieee754_bits() {
        let rv = RegisterValue::Float(25.5);
        assert_eq!(rv.to_bytes(4), 0x41CC_0000u32.to_le_bytes().to_vec());
    }
}
