//! Exercises `Dictionary::load` against a real file on disk, including the
//! interface-mismatch rejection that `src/dictionary.rs`'s inline tests
//! only assert in-memory.

use mcbdrive::error::Error;
use mcbdrive::{Dictionary, Interface};

const SAMPLE_XDF: &str = r#"
<IngeniaDictionary>
  <Header><Version>2.1</Version></Header>
  <Body>
    <Device Interface="ETH" firmwareVersion="2.3.1" ProductCode="0x1A2B" RevisionNumber="0x1" PartNumber="EVE-XCR-E">
      <Registers>
        <Register id="DRV_BUS_VOLT" dtype="float" access="ro" subnode="1" cyclic="CYCLIC_TX" address_type="IP" address="0x630"/>
        <Register id="DRV_HW_VERSION" dtype="str" access="ro" subnode="0" address_type="IP" address="0x6E5"/>
      </Registers>
    </Device>
  </Body>
</IngeniaDictionary>
"#;

fn write_sample(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, SAMPLE_XDF).unwrap();
    path
}

#[test]
fn load_reads_a_dictionary_file_from_disk() {
    let dir = std::env::temp_dir().join("mcbdrive-test-load-ok");
    std::fs::create_dir_all(&dir).unwrap();
    let path = write_sample(&dir, "sample.xdf");

    let dict = Dictionary::load(&path, Interface::Eth).unwrap();
    assert_eq!(dict.interface, Interface::Eth);
    assert_eq!(dict.firmware_version, "2.3.1");
    assert!(dict.register("DRV_BUS_VOLT", 1).is_ok());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn load_rejects_interface_mismatch_as_creation_error() {
    let dir = std::env::temp_dir().join("mcbdrive-test-load-mismatch");
    std::fs::create_dir_all(&dir).unwrap();
    let path = write_sample(&dir, "sample.xdf");

    let err = Dictionary::load(&path, Interface::Can).unwrap_err();
    assert!(matches!(err, Error::Creation(_)));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn load_surfaces_missing_file_as_io_error() {
    let missing = std::env::temp_dir().join("mcbdrive-test-load-missing/does-not-exist.xdf");
    let err = Dictionary::load(&missing, Interface::Eth).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}
