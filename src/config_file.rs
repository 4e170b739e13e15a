//! Configuration file I/O: dump/load register storage to `.xcf` XML,
//! a CSV sibling format, and a RAII scope that snapshots and restores
//! registers around a block of writes.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dictionary::Interface;
use crate::error::{Error, Result};
use crate::register::{Access, Dtype};
use crate::servo::Servo;
use crate::transport::Transport;
use crate::value::RegisterValue;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "IngeniaDictionary")]
struct XcfRoot {
    #[serde(rename = "Header")]
    header: XcfHeader,
    #[serde(rename = "Body")]
    body: XcfBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct XcfHeader {
    #[serde(rename = "Version")]
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct XcfBody {
    #[serde(rename = "Device")]
    device: XcfDevice,
}

#[derive(Debug, Serialize, Deserialize)]
struct XcfDevice {
    #[serde(rename = "@Interface")]
    interface: String,
    #[serde(rename = "@firmwareVersion")]
    firmware_version: String,
    #[serde(rename = "@ProductCode")]
    product_code: String,
    #[serde(rename = "@RevisionNumber")]
    revision_number: String,
    #[serde(rename = "@PartNumber")]
    part_number: String,
    #[serde(rename = "Registers")]
    registers: XcfRegisters,
}

#[derive(Debug, Serialize, Deserialize)]
struct XcfRegisters {
    #[serde(rename = "Register", default)]
    register: Vec<XcfRegister>,
}

#[derive(Debug, Serialize, Deserialize)]
struct XcfRegister {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@subnode")]
    subnode: u8,
    #[serde(rename = "@dtype")]
    dtype: String,
    #[serde(rename = "@access")]
    access: String,
    #[serde(rename = "@storage", skip_serializing_if = "Option::is_none")]
    storage: Option<String>,
}

fn dtype_xml_name(d: Dtype) -> &'static str {
    match d {
        Dtype::U8 => "u8",
        Dtype::S8 => "s8",
        Dtype::U16 => "u16",
        Dtype::S16 => "s16",
        Dtype::U32 => "u32",
        Dtype::S32 => "s32",
        Dtype::U64 => "u64",
        Dtype::S64 => "s64",
        Dtype::Float => "float",
        Dtype::Str => "str",
        Dtype::ByteArray512 => "byte_array_512",
        Dtype::Bool => "bool",
    }
}

fn access_xml_name(a: Access) -> &'static str {
    match a {
        Access::Ro => "r",
        Access::Wo => "w",
        Access::Rw => "rw",
    }
}

fn value_to_storage_text(v: &RegisterValue) -> String {
    match v {
        RegisterValue::U8(x) => x.to_string(),
        RegisterValue::S8(x) => x.to_string(),
        RegisterValue::U16(x) => x.to_string(),
        RegisterValue::S16(x) => x.to_string(),
        RegisterValue::U32(x) => x.to_string(),
        RegisterValue::S32(x) => x.to_string(),
        RegisterValue::U64(x) => x.to_string(),
        RegisterValue::S64(x) => x.to_string(),
        RegisterValue::Float(x) => x.to_string(),
        RegisterValue::Bool(x) => if *x { "1".into() } else { "0".into() },
        RegisterValue::Str(s) => s.clone(),
        RegisterValue::ByteArray512(_) => String::new(),
    }
}

/// Save the current value of every RW register matching `subnode_filter`
/// (`None` = all axes) into a `.xcf` file at `path`.
pub fn save_configuration<T: Transport>(servo: &Servo<T>, path: impl AsRef<Path>, subnode_filter: Option<u8>) -> Result<()> {
    let dict = servo.dictionary();

    let product_code = servo
        .read("DRV_ID_PRODUCT_CODE_COCO", 0)
        .or_else(|_| servo.read("DRV_ID_PRODUCT_CODE", 1))
        .map(|v| v.as_i64().unwrap_or(0))
        .unwrap_or(dict.product_code as i64);
    let revision_number = servo
        .read("DRV_ID_REVISION_NUMBER_COCO", 0)
        .or_else(|_| servo.read("DRV_ID_REVISION_NUMBER", 1))
        .map(|v| v.as_i64().unwrap_or(0))
        .unwrap_or(dict.revision_number as i64);

    let mut registers = Vec::new();
    for (&subnode, regs) in dict_registers_iter(dict) {
        if let Some(filter) = subnode_filter {
            if subnode != filter {
                continue;
            }
        }
        for reg in regs.values() {
            if reg.access != Access::Rw {
                continue;
            }
            let storage = match servo.read(&reg.identifier, subnode) {
                Ok(v) => Some(value_to_storage_text(&v)),
                Err(e) => {
                    warn!("save_configuration: failed to read {}: {e}", reg.identifier);
                    None
                }
            };
            registers.push(XcfRegister {
                id: reg.identifier.clone(),
                subnode,
                dtype: dtype_xml_name(reg.dtype).to_string(),
                access: access_xml_name(reg.access).to_string(),
                storage,
            });
        }
    }

    let root = XcfRoot {
        header: XcfHeader { version: dict.version.clone() },
        body: XcfBody {
            device: XcfDevice {
                interface: interface_xml_name(dict.interface).to_string(),
                firmware_version: dict.firmware_version.clone(),
                product_code: product_code.to_string(),
                revision_number: revision_number.to_string(),
                part_number: dict.part_number.clone(),
                registers: XcfRegisters { register: registers },
            },
        },
    };

    let xml = quick_xml::se::to_string(&root).map_err(|e| Error::ConfigurationFileParse(e.to_string()))?;
    std::fs::write(path, format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{xml}\n"))?;
    Ok(())
}

/// Load a `.xcf` file, writing every stored RW register to the drive.
/// Per-register write failures are logged and do not abort the load.
pub fn load_configuration<T: Transport>(servo: &Servo<T>, path: impl AsRef<Path>, subnode_filter: Option<u8>) -> Result<()> {
    let xml = std::fs::read_to_string(path)?;
    let root: XcfRoot = quick_xml::de::from_str(&xml).map_err(|e| Error::ConfigurationFileParse(e.to_string()))?;

    for reg in &root.body.device.registers.register {
        if let Some(filter) = subnode_filter {
            if reg.subnode != filter {
                continue;
            }
        }
        if reg.access != "rw" {
            continue;
        }
        let Some(storage) = &reg.storage else { continue };
        let dict_reg = match servo.dictionary().register(&reg.id, reg.subnode) {
            Ok(r) => r,
            Err(e) => {
                warn!("load_configuration: {e}");
                continue;
            }
        };
        let value = match parse_storage_text(dict_reg.dtype, storage) {
            Ok(v) => v,
            Err(e) => {
                warn!("load_configuration: bad storage value for {}: {e}", reg.id);
                continue;
            }
        };
        if let Err(e) = servo.write(&reg.id, value, reg.subnode, false) {
            warn!("load_configuration: failed to write {}: {e}", reg.id);
        }
    }

    Ok(())
}

fn parse_storage_text(dtype: Dtype, s: &str) -> Result<RegisterValue> {
    Ok(match dtype {
        Dtype::U8 => RegisterValue::U8(s.parse().map_err(|_| Error::Value(format!("bad u8 {s}")))?),
        Dtype::S8 => RegisterValue::S8(s.parse().map_err(|_| Error::Value(format!("bad s8 {s}")))?),
        Dtype::U16 => RegisterValue::U16(s.parse().map_err(|_| Error::Value(format!("bad u16 {s}")))?),
        Dtype::S16 => RegisterValue::S16(s.parse().map_err(|_| Error::Value(format!("bad s16 {s}")))?),
        Dtype::U32 => RegisterValue::U32(s.parse().map_err(|_| Error::Value(format!("bad u32 {s}")))?),
        Dtype::S32 => RegisterValue::S32(s.parse().map_err(|_| Error::Value(format!("bad s32 {s}")))?),
        Dtype::U64 => RegisterValue::U64(s.parse().map_err(|_| Error::Value(format!("bad u64 {s}")))?),
        Dtype::S64 => RegisterValue::S64(s.parse().map_err(|_| Error::Value(format!("bad s64 {s}")))?),
        Dtype::Float => RegisterValue::Float(s.parse().map_err(|_| Error::Value(format!("bad float {s}")))?),
        Dtype::Bool => RegisterValue::Bool(s == "1"),
        Dtype::Str => RegisterValue::Str(s.to_string()),
        Dtype::ByteArray512 => return Err(Error::Value("byte_array_512 has no text storage form".into())),
    })
}

fn interface_xml_name(i: Interface) -> &'static str {
    match i {
        Interface::Can => "CAN",
        Interface::Ecat => "ECAT",
        Interface::Eoe => "EoE",
        Interface::Eth => "ETH",
        Interface::Virtual => "VIRTUAL",
    }
}

fn dict_registers_iter(
    dict: &crate::dictionary::Dictionary,
) -> impl Iterator<Item = (&u8, &BTreeMap<String, crate::register::Register>)> {
    dict.subnodes.keys().filter_map(move |sn| dict.registers(*sn).map(|m| (sn, m)))
}

/// A CSV sibling of `.xcf`, carrying the same (uid, subnode, storage)
/// rows without the XML envelope — a legacy format supplemented from
/// `csv_configuration_file.py` in the original source.
pub mod csv {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct CsvRow {
        id: String,
        subnode: u8,
        dtype: String,
        access: String,
        storage: String,
    }

    pub fn save_configuration_csv<T: Transport>(servo: &Servo<T>, path: impl AsRef<Path>, subnode_filter: Option<u8>) -> Result<()> {
        let dict = servo.dictionary();
        let mut writer = ::csv::Writer::from_path(path)?;
        for (&subnode, regs) in dict_registers_iter(dict) {
            if let Some(filter) = subnode_filter {
                if subnode != filter {
                    continue;
                }
            }
            for reg in regs.values() {
                if reg.access != Access::Rw {
                    continue;
                }
                let storage = servo.read(&reg.identifier, subnode).ok().map(|v| value_to_storage_text(&v)).unwrap_or_default();
                writer.serialize(CsvRow {
                    id: reg.identifier.clone(),
                    subnode,
                    dtype: dtype_xml_name(reg.dtype).to_string(),
                    access: access_xml_name(reg.access).to_string(),
                    storage,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load_configuration_csv<T: Transport>(servo: &Servo<T>, path: impl AsRef<Path>, subnode_filter: Option<u8>) -> Result<()> {
        let mut reader = ::csv::Reader::from_path(path)?;
        for result in reader.deserialize() {
            let row: CsvRow = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!("load_configuration_csv: malformed row: {e}");
                    continue;
                }
            };
            if let Some(filter) = subnode_filter {
                if row.subnode != filter {
                    continue;
                }
            }
            if row.access != "rw" || row.storage.is_empty() {
                continue;
            }
            let dict_reg = match servo.dictionary().register(&row.id, row.subnode) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if let Ok(value) = parse_storage_text(dict_reg.dtype, &row.storage) {
                if let Err(e) = servo.write(&row.id, value, row.subnode, false) {
                    warn!("load_configuration_csv: failed to write {}: {e}", row.id);
                }
            }
        }
        Ok(())
    }
}

/// Registers that are fire-and-forget "magic writes" and must never be
/// replayed by a [`ConfigScope`] on exit.
fn default_ignore_set() -> Vec<&'static str> {
    vec![
        "DRV_STORE_COCO_ALL",
        "DRV_RESTORE_COCO_ALL",
        "DRV_STORE_MOCO_ALL",
        "DRV_RESTORE_MOCO_ALL",
    ]
}

/// Snapshots every RW register's value on construction; on drop, re-reads
/// each one and writes the original value back wherever it changed and
/// isn't in the ignore set.
///
/// This is a blind snapshot-then-diff, not a subscription: it does not
/// hook `Servo::register_update_subscribe`, so it can't tell a write this
/// scope made from one that arrived from another `Servo` handle, a PDO
/// cycle, or the drive itself between construction and drop — any of
/// those will be diffed (and restored) the same as a write this scope
/// caused. It also holds one `RegisterValue` per RW register in memory
/// for the scope's lifetime. Accepted for the same reason the guarded
/// block is expected to be short and exclusive: restoring by tracking
/// actual write events would need every writer on the servo to go through
/// this scope, which `Servo`'s shared `Arc<Mutex<T>>` transport handle
/// doesn't enforce.
pub struct ConfigScope<'a, T: Transport> {
    servo: &'a Servo<T>,
    snapshot: BTreeMap<(u8, String), RegisterValue>,
    ignore: Vec<String>,
}

impl<'a, T: Transport> ConfigScope<'a, T> {
    pub fn new(servo: &'a Servo<T>) -> Self {
        let dict = servo.dictionary();
        let mut snapshot = BTreeMap::new();
        for (&subnode, regs) in dict_registers_iter(dict) {
            for reg in regs.values() {
                if reg.access != Access::Rw {
                    continue;
                }
                if let Ok(v) = servo.read(&reg.identifier, subnode) {
                    snapshot.insert((subnode, reg.identifier.clone()), v);
                }
            }
        }
        Self { servo, snapshot, ignore: default_ignore_set().into_iter().map(String::from).collect() }
    }
}

impl<'a, T: Transport> Drop for ConfigScope<'a, T> {
    fn drop(&mut self) {
        for ((subnode, uid), original) in &self.snapshot {
            if self.ignore.iter().any(|i| i == uid) {
                continue;
            }
            match self.servo.read(uid, *subnode) {
                Ok(current) if &current != original => {
                    if let Err(e) = self.servo.write(uid, original.clone(), *subnode, false) {
                        warn!("ConfigScope: failed to restore {uid}: {e}");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("ConfigScope: failed to re-read {uid} on exit: {e}"),
            }
        }
    }
}
