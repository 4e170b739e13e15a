//! The register model: dtype lexicon, access rules, cyclic eligibility,
//! addressing flavors, range/enum/bitfield metadata.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Register data type. Each variant has a fixed wire size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dtype {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    U64,
    S64,
    Float,
    Str,
    ByteArray512,
    Bool,
}

impl Dtype {
    /// Fixed size in bytes; `None` for the variable-length `Str`.
    pub fn size(self) -> Option<usize> {
        match self {
            Dtype::U8 | Dtype::S8 | Dtype::Bool => Some(1),
            Dtype::U16 | Dtype::S16 => Some(2),
            Dtype::U32 | Dtype::S32 | Dtype::Float => Some(4),
            Dtype::U64 | Dtype::S64 => Some(8),
            Dtype::ByteArray512 => Some(512),
            Dtype::Str => None,
        }
    }

    pub fn from_xml_name(s: &str) -> Option<Self> {
        Some(match s {
            "u8" => Dtype::U8,
            "s8" => Dtype::S8,
            "u16" => Dtype::U16,
            "s16" => Dtype::S16,
            "u32" => Dtype::U32,
            "s32" => Dtype::S32,
            "u64" => Dtype::U64,
            "s64" => Dtype::S64,
            "float" => Dtype::Float,
            "str" => Dtype::Str,
            "byte_array_512" => Dtype::ByteArray512,
            "bool" => Dtype::Bool,
            _ => return None,
        })
    }
}

/// Register access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Ro,
    Wo,
    Rw,
}

impl Access {
    pub fn from_xml_name(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "ro" | "r" => Access::Ro,
            "wo" | "w" => Access::Wo,
            "rw" => Access::Rw,
            _ => return None,
        })
    }

    pub fn readable(self) -> bool {
        matches!(self, Access::Ro | Access::Rw)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::Wo | Access::Rw)
    }
}

/// Cyclic/PDO eligibility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cyclic {
    Config,
    Rx,
    Tx,
    RxTx,
    Si,
    So,
    SiSo,
}

impl Cyclic {
    pub fn from_xml_name(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "CONFIG" => Cyclic::Config,
            "CYCLIC_RX" => Cyclic::Rx,
            "CYCLIC_TX" => Cyclic::Tx,
            "CYCLIC_RXTX" => Cyclic::RxTx,
            "CYCLIC_SI" => Cyclic::Si,
            "CYCLIC_SO" => Cyclic::So,
            "CYCLIC_SISO" => Cyclic::SiSo,
            _ => return None,
        })
    }

    pub fn valid_in_rpdo(self) -> bool {
        matches!(self, Cyclic::Rx | Cyclic::RxTx)
    }

    pub fn valid_in_tpdo(self) -> bool {
        matches!(self, Cyclic::Tx | Cyclic::RxTx)
    }
}

/// Opaque physical-unit tag; uninterpreted by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phy {
    #[default]
    None,
    Torque,
    Pos,
    Vel,
    Acc,
    VoltRel,
    Rad,
}

/// Transport-specific addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    /// Flat 12-bit IP-side address.
    IpFlat(u16),
    /// CANopen/CoE (index, sub-index).
    CanOpen { index: u16, subindex: u8 },
}

impl Address {
    /// Apply the EtherCAT CiA offset for subnode `k`: subnode 0 → base
    /// 0x5800, subnode k>0 → 0x2000 + 0x800*(k-1).
    pub fn ethercat_coe_index(subnode: u8, idx_within_subnode: u16) -> u16 {
        let base = if subnode == 0 { 0x5800 } else { 0x2000 + 0x0800 * (subnode as u16 - 1) };
        base + idx_within_subnode
    }
}

/// Inclusive min/max for integer-typed registers. `None` for STR/BYTE_ARRAY_512.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Range {
    pub fn default_for(dtype: Dtype) -> Option<Self> {
        match dtype {
            Dtype::U8 => Some(Range { min: u8::MIN as i64, max: u8::MAX as i64 }),
            Dtype::S8 => Some(Range { min: i8::MIN as i64, max: i8::MAX as i64 }),
            Dtype::U16 => Some(Range { min: u16::MIN as i64, max: u16::MAX as i64 }),
            Dtype::S16 => Some(Range { min: i16::MIN as i64, max: i16::MAX as i64 }),
            Dtype::U32 => Some(Range { min: u32::MIN as i64, max: u32::MAX as i64 }),
            Dtype::S32 => Some(Range { min: i32::MIN as i64, max: i32::MAX as i64 }),
            Dtype::U64 => Some(Range { min: 0, max: i64::MAX }),
            Dtype::S64 => Some(Range { min: i64::MIN, max: i64::MAX }),
            Dtype::Bool => Some(Range { min: 0, max: 1 }),
            Dtype::Str | Dtype::ByteArray512 => None,
        }
    }

    pub fn contains(&self, v: i64) -> bool {
        v >= self.min && v <= self.max
    }
}

/// A named sub-field of an integer register, `[start_bit, end_bit]`
/// inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitfield {
    pub start_bit: u8,
    pub end_bit: u8,
}

impl Bitfield {
    pub fn mask(&self) -> u64 {
        let width = self.end_bit - self.start_bit + 1;
        let base: u64 = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        base << self.start_bit
    }

    pub fn max_value(&self) -> u64 {
        self.mask() >> self.start_bit
    }
}

/// A single addressable register.
#[derive(Debug, Clone)]
pub struct Register {
    pub identifier: String,
    pub dtype: Dtype,
    pub access: Access,
    pub cyclic: Cyclic,
    pub phy: Phy,
    pub subnode: u8,
    pub address: Address,
    pub range: Option<Range>,
    pub enums: BTreeMap<String, i64>,
    pub bitfields: BTreeMap<String, Bitfield>,
    pub default: Option<crate::value::RegisterValue>,
    pub storage: Option<crate::value::RegisterValue>,
    pub storage_valid: bool,
}

impl Register {
    /// Declared on-wire field size in bytes (the transport-declared
    /// maximum of 512 for STR).
    pub fn field_size(&self) -> usize {
        self.dtype.size().unwrap_or(512)
    }

    pub fn check_write_access(&self) -> Result<()> {
        if !self.access.writable() {
            return Err(Error::Access { uid: self.identifier.clone() });
        }
        Ok(())
    }

    pub fn check_read_access(&self) -> Result<()> {
        if !self.access.readable() {
            return Err(Error::Access { uid: self.identifier.clone() });
        }
        Ok(())
    }

    pub fn bitfield(&self, name: &str) -> Result<Bitfield> {
        self.bitfields
            .get(name)
            .copied()
            .ok_or_else(|| Error::Value(format!("register {} has no bitfield named {name}", self.identifier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitfield_mask_and_max() {
        let bf = Bitfield { start_bit: 4, end_bit: 7 };
        assert_eq!(bf.mask(), 0xF0);
        assert_eq!(bf.max_value(), 0xF);
    }

    #[test]
    fn ethercat_coe_offset_matches_known_index_table() {
        assert_eq!(Address::ethercat_coe_index(0, 0), 0x5800);
        assert_eq!(Address::ethercat_coe_index(1, 0), 0x2000);
        assert_eq!(Address::ethercat_coe_index(2, 0), 0x2800);
    }
}
