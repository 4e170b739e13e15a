//! Scenario 6 from the seed tests: a cyclic RPDO/TPDO exchange against an
//! echoing loopback transport, driven through `Network::start_pdo`, with
//! an independent SDO-style register read confirming the two channels
//! agree.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcbdrive::error::Result;
use mcbdrive::pdo::{PdoDirection, PdoEngineConfig, PdoMap, PdoMapItem};
use mcbdrive::register::Register;
use mcbdrive::{Dictionary, Network, Transport};

const DICTIONARY_XML: &str = r#"
<IngeniaDictionary>
  <Header><Version>2.1</Version></Header>
  <Body>
    <Device Interface="ECAT" firmwareVersion="1.0" ProductCode="0x1" RevisionNumber="0x1" PartNumber="X">
      <Registers>
        <Register id="DRV_OP_CMD" dtype="u16" access="rw" subnode="1" cyclic="CYCLIC_RX" address_type="ECAT" address="0x4000"/>
        <Register id="CL_POS_FBK_VALUE" dtype="u16" access="ro" subnode="1" cyclic="CYCLIC_TX" address_type="ECAT" address="0x6400"/>
      </Registers>
    </Device>
  </Body>
</IngeniaDictionary>
"#;

/// Mirrors whatever RPDO bytes it was last sent straight back as the TPDO
/// image, and answers plain register reads from that same buffer — a
/// virtual drive that loops its command straight to its feedback.
struct EchoTransport {
    last_tx: Mutex<Vec<u8>>,
}

impl Transport for EchoTransport {
    fn read_raw(&mut self, _register: &Register) -> Result<Vec<u8>> {
        Ok(self.last_tx.lock().unwrap().clone())
    }

    fn write_raw(&mut self, _register: &Register, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn send_and_receive_processdata(&mut self, tx: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        *self.last_tx.lock().unwrap() = tx.to_vec();
        Ok(tx.to_vec())
    }
}

#[test]
fn pdo_cycle_echoes_rpdo_into_tpdo_and_agrees_with_sdo_read() {
    let dictionary = Arc::new(Dictionary::parse(DICTIONARY_XML).unwrap());
    let mut network = Network::new(EchoTransport { last_tx: Mutex::new(vec![5, 0]) });
    let servo = network.connect_servo(Arc::clone(&dictionary));

    let op_cmd = dictionary.register("DRV_OP_CMD", 1).unwrap().clone();
    let pos_fbk = dictionary.register("CL_POS_FBK_VALUE", 1).unwrap().clone();

    let rpdo = Arc::new(PdoMap::new(PdoDirection::Rpdo, vec![PdoMapItem::mapped(op_cmd, 16)]).unwrap());
    let tpdo = Arc::new(PdoMap::new(PdoDirection::Tpdo, vec![PdoMapItem::mapped(pos_fbk, 16)]).unwrap());
    rpdo.items[0].set_value(&5u16.to_le_bytes());

    let last_position = Arc::new(AtomicU16::new(0));
    let observer_position = Arc::clone(&last_position);

    let send_observers: Vec<mcbdrive::pdo::SendObserver> = vec![Box::new({
        let rpdo = Arc::clone(&rpdo);
        move |_maps| rpdo.items[0].set_value(&1u16.to_le_bytes())
    })];
    let receive_observers: Vec<mcbdrive::pdo::ReceiveObserver> = vec![Box::new(move |maps| {
        let bytes = maps[0].items[0].get_value();
        observer_position.store(u16::from_le_bytes([bytes[0], bytes[1]]), Ordering::SeqCst);
    })];

    network
        .start_pdo(
            &servo,
            1,
            vec![rpdo],
            vec![tpdo],
            send_observers,
            receive_observers,
            PdoEngineConfig { refresh_rate: Duration::from_millis(10), watchdog_override: None },
            false,
            Box::new(|_e| {}),
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(50));

    let sdo_value = servo.read("DRV_OP_CMD", 1).unwrap().as_i64().unwrap();
    assert_eq!(sdo_value, 1);

    let position = last_position.load(Ordering::SeqCst);
    assert!((position as i32 - sdo_value as i32).abs() <= 2);

    network.stop_pdo(&servo).unwrap();
    assert!(!network.is_pdo_running(&servo));
}
