//! Register dictionary: XML (`.xdf`) parsing into the typed register model
//! of `register.rs`.
//!
//! Two on-disk shapes are supported, distinguished by
//! `/IngeniaDictionary/Header/Version`: V2 (flat, single-level registers,
//! `address` is a combined hex word) and V3 (hierarchical, explicit
//! `<Object index=".." subindex=".."/>` children, per-register defaults).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::register::{Access, Address, Bitfield, Cyclic, Dtype, Range, Register};
use crate::value::RegisterValue;

/// Transport a dictionary was authored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Can,
    Ecat,
    Eoe,
    Eth,
    Virtual,
}

impl Interface {
    fn from_xml(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "CAN" => Interface::Can,
            "ECAT" => Interface::Ecat,
            "EOE" => Interface::Eoe,
            "ETH" => Interface::Eth,
            "VIRTUAL" => Interface::Virtual,
            _ => return None,
        })
    }
}

/// What a subnode represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnodeKind {
    Communication,
    Motion,
    Safety,
}

/// One entry of the error catalog.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub code_str: String,
    pub affected_module: String,
    pub severity: String,
    pub description: String,
}

/// A loaded, immutable register catalog.
#[derive(Debug, Clone)]
pub struct Dictionary {
    pub path: Option<String>,
    pub version: String,
    pub firmware_version: String,
    pub product_code: u32,
    pub revision_number: u32,
    pub part_number: String,
    /// Drive name from the XDF `Device` element, falling back to the part
    /// number when the dictionary doesn't declare one.
    pub drive_name: String,
    /// Number of motion-control (MOCO) axes, i.e. subnodes of
    /// `SubnodeKind::Motion` — one per `<Axis>` in the XDF, or 1 for a
    /// single-axis dictionary with no `Axes` block at all.
    pub moco_axis: u8,
    pub interface: Interface,
    pub subnodes: BTreeMap<u8, SubnodeKind>,
    registers: BTreeMap<u8, BTreeMap<String, Register>>,
    pub errors: BTreeMap<u32, ErrorEntry>,
    pub categories: Vec<(String, String)>,
    /// V3 only: parent uid → ordered child uids, within one subnode.
    child_index: BTreeMap<(u8, String), Vec<String>>,
    pub is_safe: bool,
}

impl Dictionary {
    /// Registers reserved for transport plumbing that are always present
    /// on the drive but never listed in the XML (PDO assign/map registers
    /// for EtherCAT, and the monitoring/disturbance byte-buffer registers
    /// for every transport).
    fn reserved_registers(interface: Interface, subnodes: &BTreeMap<u8, SubnodeKind>) -> Vec<Register> {
        let mut regs = Vec::new();

        let byte_buffer = |uid: &str, address: u16| Register {
            identifier: uid.to_string(),
            dtype: Dtype::ByteArray512,
            access: Access::Rw,
            cyclic: Cyclic::Config,
            phy: crate::register::Phy::None,
            subnode: 0,
            address: Address::IpFlat(address),
            range: None,
            enums: BTreeMap::new(),
            bitfields: BTreeMap::new(),
            default: None,
            storage: None,
            storage_valid: false,
        };
        regs.push(byte_buffer("MON_DATA_VALUE", 0xB2));
        regs.push(byte_buffer("DIST_DATA_VALUE", 0xB4));

        let u16_reg = |uid: &str, address: u16| Register {
            identifier: uid.to_string(),
            dtype: Dtype::U16,
            access: Access::Rw,
            cyclic: Cyclic::Config,
            phy: crate::register::Phy::None,
            subnode: 0,
            address: Address::IpFlat(address),
            range: None,
            enums: BTreeMap::new(),
            bitfields: BTreeMap::new(),
            default: None,
            storage: None,
            storage_valid: false,
        };
        regs.push(u16_reg("MON_DIST_ENABLE", 0xC0));
        regs.push(u16_reg("DIST_ENABLE", 0xC7));

        if interface == Interface::Ecat {
            for subnode in subnodes.keys() {
                let mk = |uid: String, index: u16, subindex: u8| Register {
                    identifier: uid,
                    dtype: Dtype::U32,
                    access: Access::Rw,
                    cyclic: Cyclic::Config,
                    phy: crate::register::Phy::None,
                    subnode: *subnode,
                    address: Address::CanOpen { index, subindex },
                    range: None,
                    enums: BTreeMap::new(),
                    bitfields: BTreeMap::new(),
                    default: None,
                    storage: None,
                    storage_valid: false,
                };
                regs.push(mk(format!("RPDO_ASSIGN_S{subnode}"), 0x1C12, 0));
                regs.push(mk(format!("RPDO_ASSIGN_S{subnode}_SUB1"), 0x1C12, 1));
                regs.push(mk(format!("RPDO_MAP_S{subnode}"), 0x1600, 0));
                regs.push(mk(format!("RPDO_MAP_S{subnode}_SUB1"), 0x1600, 1));
                regs.push(mk(format!("TPDO_ASSIGN_S{subnode}"), 0x1C13, 0));
                regs.push(mk(format!("TPDO_ASSIGN_S{subnode}_SUB1"), 0x1C13, 1));
                regs.push(mk(format!("TPDO_MAP_S{subnode}"), 0x1A00, 0));
                regs.push(mk(format!("TPDO_MAP_S{subnode}_SUB1"), 0x1A00, 1));
                regs.push(mk(format!("PDO_WATCHDOG_S{subnode}"), 0x1C32, 2));
            }
        }
        regs
    }

    /// Load a dictionary from disk, validating that its declared
    /// interface matches `expected`.
    pub fn load(path: impl AsRef<Path>, expected: Interface) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path)?;
        let mut dict = Self::parse(&xml)?;
        dict.path = Some(path.to_string_lossy().into_owned());

        if dict.interface != expected {
            return Err(Error::Creation(format!(
                "dictionary declares interface {:?} but caller requested {:?}",
                dict.interface, expected
            )));
        }

        Ok(dict)
    }

    /// Parse dictionary XML text directly (used by tests and by callers
    /// that already have the bytes in memory).
    pub fn parse(xml: &str) -> Result<Self> {
        let raw: XdfRoot = quick_xml::de::from_str(xml)?;
        raw.into_dictionary()
    }

    pub fn registers(&self, subnode: u8) -> Option<&BTreeMap<String, Register>> {
        self.registers.get(&subnode)
    }

    pub fn register(&self, uid: &str, subnode: u8) -> Result<&Register> {
        self.registers
            .get(&subnode)
            .and_then(|m| m.get(uid))
            .ok_or_else(|| Error::Value(format!("unknown register {uid} on subnode {subnode}")))
    }

    /// V3 hierarchical child lookup; empty for V2 dictionaries (flat, no
    /// sub-object nesting).
    pub fn child_registers(&self, uid: &str, subnode: u8) -> &[String] {
        self.child_index
            .get(&(subnode, uid.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the drive is flagged safety-capable (gates the PDO engine's
    /// safe-PDO requirement).
    pub fn is_safe(&self) -> bool {
        self.is_safe
    }
}

// ---- XML deserialization shape -------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename = "IngeniaDictionary")]
struct XdfRoot {
    #[serde(rename = "Header")]
    header: XdfHeader,
    #[serde(rename = "Body")]
    body: XdfBody,
}

#[derive(Debug, Deserialize)]
struct XdfHeader {
    #[serde(rename = "Version")]
    version: String,
}

#[derive(Debug, Deserialize)]
struct XdfBody {
    #[serde(rename = "Device")]
    device: XdfDevice,
    #[serde(rename = "Errors", default)]
    errors: Option<XdfErrors>,
    #[serde(rename = "Categories", default)]
    categories: Option<XdfCategories>,
}

#[derive(Debug, Deserialize)]
struct XdfDevice {
    #[serde(rename = "@Interface")]
    interface: String,
    #[serde(rename = "@firmwareVersion", default)]
    firmware_version: String,
    #[serde(rename = "@ProductCode", default)]
    product_code: String,
    #[serde(rename = "@RevisionNumber", default)]
    revision_number: String,
    #[serde(rename = "@PartNumber", default)]
    part_number: String,
    #[serde(rename = "@Name", default)]
    name: Option<String>,
    #[serde(rename = "Axes", default)]
    axes: Option<XdfAxes>,
    #[serde(rename = "Registers")]
    registers: XdfRegisters,
}

#[derive(Debug, Deserialize)]
struct XdfAxes {
    #[serde(rename = "Axis", default)]
    axis: Vec<XdfAxis>,
}

#[derive(Debug, Deserialize)]
struct XdfAxis {
    #[serde(rename = "@subnode")]
    subnode: u8,
}

#[derive(Debug, Deserialize)]
struct XdfRegisters {
    #[serde(rename = "Register", default)]
    register: Vec<XdfRegister>,
}

#[derive(Debug, Deserialize)]
struct XdfRegister {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@dtype")]
    dtype: String,
    #[serde(rename = "@access")]
    access: String,
    #[serde(rename = "@subnode", default)]
    subnode: u8,
    #[serde(rename = "@cyclic", default)]
    cyclic: Option<String>,
    #[serde(rename = "@address_type", default)]
    address_type: Option<String>,
    #[serde(rename = "@address", default)]
    address: Option<String>,
    #[serde(rename = "@storage", default)]
    storage: Option<String>,
    #[serde(rename = "Range", default)]
    range: Option<XdfRange>,
    #[serde(rename = "Enumerations", default)]
    enumerations: Option<XdfEnumerations>,
    #[serde(rename = "Object", default)]
    objects: Vec<XdfObject>,
}

#[derive(Debug, Deserialize)]
struct XdfObject {
    #[serde(rename = "@index")]
    index: String,
    #[serde(rename = "@subindex", default)]
    subindex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XdfRange {
    #[serde(rename = "@min")]
    min: i64,
    #[serde(rename = "@max")]
    max: i64,
}

#[derive(Debug, Deserialize)]
struct XdfEnumerations {
    #[serde(rename = "Enum", default)]
    r#enum: Vec<XdfEnum>,
}

#[derive(Debug, Deserialize)]
struct XdfEnum {
    #[serde(rename = "@value")]
    value: i64,
    #[serde(rename = "$text", default)]
    label: String,
}

#[derive(Debug, Deserialize)]
struct XdfErrors {
    #[serde(rename = "Error", default)]
    error: Vec<XdfError>,
}

#[derive(Debug, Deserialize)]
struct XdfError {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@affected_module", default)]
    affected_module: String,
    #[serde(rename = "@error_type", default)]
    error_type: String,
    #[serde(rename = "Labels", default)]
    labels: Option<XdfLabels>,
}

#[derive(Debug, Deserialize)]
struct XdfLabels {
    #[serde(rename = "Label", default)]
    label: Vec<XdfLabel>,
}

#[derive(Debug, Deserialize)]
struct XdfLabel {
    #[serde(rename = "$text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct XdfCategories {
    #[serde(rename = "Category", default)]
    category: Vec<XdfCategory>,
}

#[derive(Debug, Deserialize)]
struct XdfCategory {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "Labels", default)]
    labels: Option<XdfLabels>,
}

impl XdfRoot {
    fn into_dictionary(self) -> Result<Dictionary> {
        let interface = Interface::from_xml(&self.body.device.interface)
            .ok_or_else(|| Error::Creation(format!("unknown Interface {:?}", self.body.device.interface)))?;

        let mut subnodes = BTreeMap::new();
        subnodes.insert(0, SubnodeKind::Communication);
        if let Some(axes) = &self.body.device.axes {
            for axis in &axes.axis {
                subnodes.entry(axis.subnode).or_insert(SubnodeKind::Motion);
            }
        } else {
            subnodes.entry(1).or_insert(SubnodeKind::Motion);
        }

        let is_v3 = self.header.version.trim_start().starts_with('3');

        let mut registers: BTreeMap<u8, BTreeMap<String, Register>> = BTreeMap::new();
        let mut child_index: BTreeMap<(u8, String), Vec<String>> = BTreeMap::new();
        let mut safety_subnodes: std::collections::BTreeSet<u8> = std::collections::BTreeSet::new();

        for raw in &self.body.device.registers.register {
            let Some(dtype) = Dtype::from_xml_name(&raw.dtype) else {
                warn!("skipping register {}: unknown dtype {:?}", raw.id, raw.dtype);
                continue;
            };
            let Some(access) = Access::from_xml_name(&raw.access) else {
                warn!("skipping register {}: unknown access {:?}", raw.id, raw.access);
                continue;
            };
            let address_type = raw.address_type.as_deref().unwrap_or("");
            let Some(address) = parse_address(address_type, raw.address.as_deref(), interface, raw.subnode, &raw.objects)
            else {
                warn!("skipping register {}: unparseable address_type {:?}", raw.id, address_type);
                continue;
            };

            let cyclic = raw
                .cyclic
                .as_deref()
                .and_then(Cyclic::from_xml_name)
                .unwrap_or(Cyclic::Config);
            if matches!(cyclic, Cyclic::Si | Cyclic::So | Cyclic::SiSo) {
                safety_subnodes.insert(raw.subnode);
            }

            let range = raw
                .range
                .as_ref()
                .map(|r| Range { min: r.min, max: r.max })
                .or_else(|| Range::default_for(dtype));

            let enums = raw
                .enumerations
                .as_ref()
                .map(|e| e.r#enum.iter().map(|v| (v.label.clone(), v.value)).collect())
                .unwrap_or_default();

            let storage = raw
                .storage
                .as_deref()
                .and_then(|s| parse_storage(dtype, s).ok());

            let register = Register {
                identifier: raw.id.clone(),
                dtype,
                access,
                cyclic,
                phy: crate::register::Phy::None,
                subnode: raw.subnode,
                address,
                range,
                enums,
                bitfields: BTreeMap::new(),
                default: storage.clone(),
                storage: storage.clone(),
                storage_valid: storage.is_some(),
            };

            registers.entry(raw.subnode).or_default().insert(raw.id.clone(), register);

            // V3: a register with more than one <Object> is a hierarchical
            // group — the first Object is the register itself, and every
            // following one is a distinct sub-item, addressed at its own
            // index/subindex and named `{parent}_{n}` (matches the
            // dictionary's own naming for e.g. `CIA301_COMMS_RPDO1_MAP_1`).
            if is_v3 && raw.objects.len() > 1 {
                let parent_uid = raw.id.clone();
                let mut children = Vec::with_capacity(raw.objects.len() - 1);
                for (n, obj) in raw.objects[1..].iter().enumerate() {
                    let child_uid = format!("{parent_uid}_{}", n + 1);
                    let child_address = (|| {
                        let index = parse_hex_or_dec(&obj.index)?;
                        let subindex = obj.subindex.as_deref().and_then(parse_hex_or_dec).unwrap_or(0);
                        Some(Address::CanOpen { index: index as u16, subindex: subindex as u8 })
                    })();
                    if let Some(child_address) = child_address {
                        let child_register = Register {
                            identifier: child_uid.clone(),
                            dtype,
                            access,
                            cyclic,
                            phy: crate::register::Phy::None,
                            subnode: raw.subnode,
                            address: child_address,
                            range,
                            enums: BTreeMap::new(),
                            bitfields: BTreeMap::new(),
                            default: None,
                            storage: None,
                            storage_valid: false,
                        };
                        registers.entry(raw.subnode).or_default().insert(child_uid.clone(), child_register);
                    }
                    children.push(child_uid);
                }
                if !children.is_empty() {
                    child_index.insert((raw.subnode, parent_uid), children);
                }
            }
        }

        let errors = self
            .body
            .errors
            .map(|e| {
                e.error
                    .into_iter()
                    .filter_map(|err| {
                        let code = u32::from_str_radix(err.id.trim_start_matches("0x"), 16).ok()?;
                        let description = err
                            .labels
                            .map(|l| l.label.into_iter().map(|x| x.text).collect::<Vec<_>>().join("; "))
                            .unwrap_or_default();
                        Some((
                            code,
                            ErrorEntry {
                                code_str: err.id,
                                affected_module: err.affected_module,
                                severity: err.error_type,
                                description,
                            },
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let categories = self
            .body
            .categories
            .map(|c| {
                c.category
                    .into_iter()
                    .map(|cat| {
                        let label = cat
                            .labels
                            .map(|l| l.label.into_iter().map(|x| x.text).collect::<Vec<_>>().join("; "))
                            .unwrap_or_default();
                        (cat.id, label)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let product_code = parse_hex_or_dec(&self.body.device.product_code).unwrap_or(0);
        let revision_number = parse_hex_or_dec(&self.body.device.revision_number).unwrap_or(0);
        let drive_name = self.body.device.name.clone().unwrap_or_else(|| self.body.device.part_number.clone());
        let moco_axis = subnodes.values().filter(|kind| matches!(kind, SubnodeKind::Motion)).count().max(1) as u8;

        for reg in Dictionary::reserved_registers(interface, &subnodes) {
            registers.entry(reg.subnode).or_default().entry(reg.identifier.clone()).or_insert(reg);
        }

        for subnode in &safety_subnodes {
            subnodes.insert(*subnode, SubnodeKind::Safety);
        }
        let is_safe = !safety_subnodes.is_empty();

        Ok(Dictionary {
            path: None,
            version: self.header.version,
            firmware_version: self.body.device.firmware_version,
            product_code,
            revision_number,
            part_number: self.body.device.part_number,
            drive_name,
            moco_axis,
            interface,
            subnodes,
            registers,
            errors,
            categories,
            child_index,
            is_safe,
        })
    }
}

fn parse_hex_or_dec(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_address(
    address_type: &str,
    raw: Option<&str>,
    interface: Interface,
    subnode: u8,
    objects: &[XdfObject],
) -> Option<Address> {
    // V3: explicit <Object index=".." subindex=".."/> children take priority.
    if let Some(first) = objects.first() {
        let index = parse_hex_or_dec(&first.index)? as u16;
        let subindex = first
            .subindex
            .as_deref()
            .and_then(parse_hex_or_dec)
            .unwrap_or(0) as u8;
        return Some(Address::CanOpen { index, subindex });
    }

    let raw = raw?;
    let word = parse_hex_or_dec(raw)?;

    match address_type.to_ascii_uppercase().as_str() {
        "IP" | "" => Some(Address::IpFlat((word & 0x0FFF) as u16)),
        "CAN" | "CANOPEN" => {
            let index = (word >> 8) as u16;
            let subindex = (word & 0xFF) as u8;
            Some(Address::CanOpen { index, subindex })
        }
        "ECAT" => {
            let _ = interface;
            let index_within_subnode = (word >> 8) as u16;
            let index = Address::ethercat_coe_index(subnode, index_within_subnode);
            Some(Address::CanOpen { index, subindex: 0 })
        }
        _ => None,
    }
}

fn parse_storage(dtype: Dtype, s: &str) -> Result<RegisterValue> {
    Ok(match dtype {
        Dtype::U8 => RegisterValue::U8(s.parse().map_err(|_| Error::Parse(format!("bad u8 {s}")))?),
        Dtype::S8 => RegisterValue::S8(s.parse().map_err(|_| Error::Parse(format!("bad s8 {s}")))?),
        Dtype::U16 => RegisterValue::U16(s.parse().map_err(|_| Error::Parse(format!("bad u16 {s}")))?),
        Dtype::S16 => RegisterValue::S16(s.parse().map_err(|_| Error::Parse(format!("bad s16 {s}")))?),
        Dtype::U32 => RegisterValue::U32(s.parse().map_err(|_| Error::Parse(format!("bad u32 {s}")))?),
        Dtype::S32 => RegisterValue::S32(s.parse().map_err(|_| Error::Parse(format!("bad s32 {s}")))?),
        Dtype::U64 => RegisterValue::U64(s.parse().map_err(|_| Error::Parse(format!("bad u64 {s}")))?),
        Dtype::S64 => RegisterValue::S64(s.parse().map_err(|_| Error::Parse(format!("bad s64 {s}")))?),
        Dtype::Float => RegisterValue::Float(s.parse().map_err(|_| Error::Parse(format!("bad float {s}")))?),
        Dtype::Bool => RegisterValue::Bool(s == "1" || s.eq_ignore_ascii_case("true")),
        Dtype::Str => RegisterValue::Str(s.to_string()),
        Dtype::ByteArray512 => return Err(Error::Parse("byte_array_512 has no storage text form".into())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const V2_SAMPLE: &str = r#"
    <IngeniaDictionary>
      <Header><Version>2.1</Version></Header>
      <Body>
        <Device Interface="ETH" firmwareVersion="1.0" ProductCode="0x1" RevisionNumber="0x1" PartNumber="X">
          <Registers>
            <Register id="DRV_BUS_VOLT" dtype="float" access="ro" subnode="1" cyclic="CYCLIC_TX" address_type="IP" address="0x630"/>
            <Register id="DRV_OP_CMD" dtype="u16" access="rw" subnode="1" cyclic="CYCLIC_RX" address_type="IP" address="0x640"/>
            <Register id="DRV_HW_VERSION" dtype="str" access="ro" subnode="0" address_type="IP" address="0x6E5"/>
          </Registers>
        </Device>
      </Body>
    </IngeniaDictionary>
    "#;

    #[test]
    fn parses_v2_flat_dictionary() {
        let dict = Dictionary::parse(V2_SAMPLE).unwrap();
        assert_eq!(dict.interface, Interface::Eth);
        let reg = dict.register("DRV_BUS_VOLT", 1).unwrap();
        assert_eq!(reg.dtype, Dtype::Float);
        assert_eq!(reg.address, Address::IpFlat(0x630));
        assert!(!reg.access.writable());
    }

    #[test]
    fn reserved_monitoring_registers_always_present() {
        let dict = Dictionary::parse(V2_SAMPLE).unwrap();
        assert!(dict.register("MON_DATA_VALUE", 0).is_ok());
        assert!(dict.register("DIST_DATA_VALUE", 0).is_ok());
    }

    #[test]
    fn unknown_dtype_is_skipped_not_fatal() {
        let xml = V2_SAMPLE.replace(r#"dtype="float""#, r#"dtype="nonsense""#);
        let dict = Dictionary::parse(&xml).unwrap();
        assert!(dict.register("DRV_BUS_VOLT", 1).is_err());
        assert!(dict.register("DRV_OP_CMD", 1).is_ok());
    }

    #[test]
    fn parsed_interface_is_reported_accurately() {
        let dict = Dictionary::parse(V2_SAMPLE).unwrap();
        assert_eq!(dict.interface, Interface::Eth);
        // load()'s interface-mismatch rejection is exercised against a
        // real file in tests/dictionary.rs.
    }

    #[test]
    fn v2_dictionary_reports_single_default_axis_and_falls_back_drive_name() {
        let dict = Dictionary::parse(V2_SAMPLE).unwrap();
        assert_eq!(dict.moco_axis, 1);
        assert_eq!(dict.drive_name, "X");
        assert!(!dict.is_safe);
    }

    const V3_SAMPLE: &str = r#"
    <IngeniaDictionary>
      <Header><Version>3.0</Version></Header>
      <Body>
        <Device Interface="ECAT" firmwareVersion="2.0" ProductCode="0x2" RevisionNumber="0x1" PartNumber="Y" Name="Everest">
          <Axes>
            <Axis subnode="1"/>
            <Axis subnode="4"/>
          </Axes>
          <Registers>
            <Register id="CIA301_COMMS_RPDO1_MAP" dtype="u32" access="rw" subnode="0">
              <Object index="0x1600" subindex="0x00"/>
              <Object index="0x1600" subindex="0x01"/>
              <Object index="0x1600" subindex="0x02"/>
            </Register>
            <Register id="SAFE_INPUTS_VALUE" dtype="u16" access="ro" subnode="4" cyclic="CYCLIC_SI">
              <Object index="0x6510" subindex="0x01"/>
            </Register>
          </Registers>
        </Device>
      </Body>
    </IngeniaDictionary>
    "#;

    #[test]
    fn v3_multi_object_register_materializes_addressable_children() {
        let dict = Dictionary::parse(V3_SAMPLE).unwrap();
        let children = dict.child_registers("CIA301_COMMS_RPDO1_MAP", 0);
        assert_eq!(children, ["CIA301_COMMS_RPDO1_MAP_1".to_string(), "CIA301_COMMS_RPDO1_MAP_2".to_string()]);

        let child1 = dict.register("CIA301_COMMS_RPDO1_MAP_1", 0).unwrap();
        assert_eq!(child1.address, Address::CanOpen { index: 0x1600, subindex: 0x01 });
        let child2 = dict.register("CIA301_COMMS_RPDO1_MAP_2", 0).unwrap();
        assert_eq!(child2.address, Address::CanOpen { index: 0x1600, subindex: 0x02 });
    }

    #[test]
    fn v3_safety_cyclic_register_marks_its_subnode_safe() {
        let dict = Dictionary::parse(V3_SAMPLE).unwrap();
        assert!(dict.is_safe);
        assert_eq!(dict.subnodes.get(&4), Some(&SubnodeKind::Safety));
        assert_eq!(dict.moco_axis, 2);
        assert_eq!(dict.drive_name, "Everest");
    }
}
