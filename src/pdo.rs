//! PDO (Process Data Object) engine: map construction and the cyclic
//! send/receive loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::register::{Cyclic, Register};
use crate::transport::Transport;

/// Default cycle period.
pub const DEFAULT_REFRESH_RATE: Duration = Duration::from_millis(10);
/// Minimum cycle period.
pub const MIN_REFRESH_RATE: Duration = Duration::from_millis(1);
/// Floor applied to the computed watchdog.
pub const MIN_WATCHDOG: Duration = Duration::from_millis(100);
/// Per-map byte limit enforced before any mapping I/O, matching the
/// mapping-register word count CiA 402 drives commonly expose (16 mapped
/// entries of 4 bytes each).
pub const MAX_PDO_MAP_BYTES: u32 = 64;

const SAFETY_RPDO_UID: &str = "ETG_COMMS_RPDO_MAP256";
const SAFETY_TPDO_UID: &str = "ETG_COMMS_TPDO_MAP256";

/// Whether a map is sent to the drive (RPDO) or received from it (TPDO).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdoDirection {
    Rpdo,
    Tpdo,
}

/// One entry of a PDO map: a mapped register, or raw padding bits.
pub enum PdoMapItem {
    Mapped { register: Register, size_bits: u32, value: Mutex<Vec<u8>> },
    Padding { size_bits: u32 },
}

impl PdoMapItem {
    pub fn mapped(register: Register, size_bits: u32) -> Self {
        let bytes = (size_bits as usize + 7) / 8;
        PdoMapItem::Mapped { register, size_bits, value: Mutex::new(vec![0u8; bytes]) }
    }

    pub fn padding(size_bits: u32) -> Self {
        PdoMapItem::Padding { size_bits }
    }

    pub fn size_bits(&self) -> u32 {
        match self {
            PdoMapItem::Mapped { size_bits, .. } => *size_bits,
            PdoMapItem::Padding { size_bits } => *size_bits,
        }
    }

    /// Descriptor word for the CoE mapping register: `(index << 16) |
    /// size_bits`. Padding items map to index 0.
    pub fn descriptor(&self) -> u32 {
        let index = match self {
            PdoMapItem::Mapped { register, .. } => match register.address {
                crate::register::Address::CanOpen { index, .. } => index,
                crate::register::Address::IpFlat(_) => 0,
            },
            PdoMapItem::Padding { .. } => 0,
        };
        ((index as u32) << 16) | self.size_bits()
    }

    pub fn set_value(&self, bytes: &[u8]) {
        if let PdoMapItem::Mapped { value, .. } = self {
            *value.lock().unwrap() = bytes.to_vec();
        }
    }

    pub fn get_value(&self) -> Vec<u8> {
        match self {
            PdoMapItem::Mapped { value, .. } => value.lock().unwrap().clone(),
            PdoMapItem::Padding { size_bits } => vec![0u8; (*size_bits as usize + 7) / 8],
        }
    }
}

/// A configured PDO map (RPDO or TPDO).
pub struct PdoMap {
    pub direction: PdoDirection,
    pub items: Vec<PdoMapItem>,
    pub map_register_index: Mutex<Option<u16>>,
}

impl PdoMap {
    /// Build a map, validating that every mapped item's cyclic class is
    /// legal for `direction`.
    pub fn new(direction: PdoDirection, items: Vec<PdoMapItem>) -> Result<Self> {
        for item in &items {
            if let PdoMapItem::Mapped { register, .. } = item {
                let ok = match direction {
                    PdoDirection::Rpdo => register.cyclic.valid_in_rpdo(),
                    PdoDirection::Tpdo => register.cyclic.valid_in_tpdo(),
                };
                if !ok {
                    return Err(Error::Value(format!(
                        "register {} (cyclic {:?}) is not valid in a {:?} map",
                        register.identifier, register.cyclic, direction
                    )));
                }
            }
        }
        Ok(Self { direction, items, map_register_index: Mutex::new(None) })
    }

    pub fn data_length_bits(&self) -> u32 {
        self.items.iter().map(|i| i.size_bits()).sum()
    }

    pub fn data_length_bytes(&self) -> u32 {
        (self.data_length_bits() + 7) / 8
    }

    fn is_safety_map(&self) -> bool {
        self.items.iter().any(|item| match item {
            PdoMapItem::Mapped { register, .. } => {
                register.identifier == SAFETY_RPDO_UID || register.identifier == SAFETY_TPDO_UID
            }
            PdoMapItem::Padding { .. } => false,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data_length_bytes() as usize);
        for item in &self.items {
            out.extend_from_slice(&item.get_value());
        }
        out
    }

    fn decode(&self, bytes: &[u8]) {
        let mut offset = 0usize;
        for item in &self.items {
            let len = ((item.size_bits() as usize) + 7) / 8;
            if let Some(slice) = bytes.get(offset..offset + len) {
                item.set_value(slice);
            }
            offset += len;
        }
    }
}

/// Write the RPDO/TPDO assign-count and map-register sub-0/sub-1
/// descriptors for one subnode to the drive, rejecting any map that
/// exceeds the per-map byte limit before issuing I/O. Only the first map
/// of each direction is mapped — one PDO slot per subnode, matching the
/// crate's own `{RPDO,TPDO}_{ASSIGN,MAP}_S{subnode}` reserved registers.
pub fn map_pdos(
    transport: &mut dyn Transport,
    dictionary: &Dictionary,
    subnode: u8,
    rpdo_maps: &[Arc<PdoMap>],
    tpdo_maps: &[Arc<PdoMap>],
) -> Result<()> {
    for map in rpdo_maps.iter().chain(tpdo_maps.iter()) {
        if map.data_length_bytes() > MAX_PDO_MAP_BYTES {
            return Err(Error::Value(format!(
                "{:?} map for subnode {subnode} is {} bytes, exceeding the drive's {MAX_PDO_MAP_BYTES}-byte map limit",
                map.direction,
                map.data_length_bytes()
            )));
        }
    }

    write_direction(transport, dictionary, subnode, "RPDO", 0x1600, rpdo_maps.first())?;
    write_direction(transport, dictionary, subnode, "TPDO", 0x1A00, tpdo_maps.first())
}

fn write_direction(
    transport: &mut dyn Transport,
    dictionary: &Dictionary,
    subnode: u8,
    prefix: &str,
    map_register_index: u16,
    map: Option<&Arc<PdoMap>>,
) -> Result<()> {
    let assign_sub0 = dictionary.register(&format!("{prefix}_ASSIGN_S{subnode}"), subnode)?;
    let assign_sub1 = dictionary.register(&format!("{prefix}_ASSIGN_S{subnode}_SUB1"), subnode)?;
    let map_sub0 = dictionary.register(&format!("{prefix}_MAP_S{subnode}"), subnode)?;
    let map_sub1 = dictionary.register(&format!("{prefix}_MAP_S{subnode}_SUB1"), subnode)?;

    transport.write_raw(assign_sub0, &0u32.to_le_bytes())?;
    transport.write_raw(map_sub0, &0u32.to_le_bytes())?;

    let Some(map) = map else { return Ok(()) };

    let descriptors: Vec<u8> = map.items.iter().flat_map(|item| item.descriptor().to_le_bytes()).collect();
    transport.write_complete_access(map_sub0, &(map.items.len() as u32).to_le_bytes(), map_sub1, &descriptors)?;
    transport.write_complete_access(assign_sub0, &1u32.to_le_bytes(), assign_sub1, &(map_register_index as u32).to_le_bytes())?;
    *map.map_register_index.lock().unwrap() = Some(map_register_index);
    Ok(())
}

/// Write the computed watchdog duration to the drive before the first
/// process-data exchange. A drive that rejects the value (above its
/// configured maximum) surfaces as a dedicated, easily matched error.
fn write_watchdog(transport: &mut dyn Transport, dictionary: &Dictionary, subnode: u8, watchdog: Duration) -> Result<()> {
    let register = dictionary.register(&format!("PDO_WATCHDOG_S{subnode}"), subnode)?;
    let micros = watchdog.as_micros().min(u32::MAX as u128) as u32;
    transport.write_raw(register, &micros.to_le_bytes()).map_err(|_| Error::Value("sampling time too high".into()))
}

/// Observers invoked once per PDO cycle.
pub type SendObserver = Box<dyn Fn(&[Arc<PdoMap>]) + Send>;
pub type ReceiveObserver = Box<dyn Fn(&[Arc<PdoMap>]) + Send>;
/// Invoked when the thread stops because of an error; carries a
/// description that includes the measured iteration duration vs the
/// watchdog.
pub type ExceptionObserver = Box<dyn Fn(&Error) + Send + Sync>;

/// Configuration for one engine run.
pub struct PdoEngineConfig {
    pub refresh_rate: Duration,
    pub watchdog_override: Option<Duration>,
}

impl Default for PdoEngineConfig {
    fn default() -> Self {
        Self { refresh_rate: DEFAULT_REFRESH_RATE, watchdog_override: None }
    }
}

impl PdoEngineConfig {
    pub fn watchdog(&self) -> Duration {
        self.watchdog_override.unwrap_or_else(|| MIN_WATCHDOG.max(self.refresh_rate * 2))
    }
}

struct RunningState {
    stop_flag: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    thread_id: ThreadId,
}

/// One PDO engine per `Network`; at most one active thread.
#[derive(Default)]
pub struct PdoEngine {
    running: Option<RunningState>,
}

impl PdoEngine {
    pub fn new() -> Self {
        Self { running: None }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start the cyclic thread. `is_safe` gates the safety-PDO
    /// requirement. Before spawning, writes the RPDO/TPDO mapping and the
    /// watchdog duration to `subnode` on the drive.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        transport: Arc<Mutex<dyn Transport>>,
        dictionary: &Dictionary,
        subnode: u8,
        rpdo_maps: Vec<Arc<PdoMap>>,
        tpdo_maps: Vec<Arc<PdoMap>>,
        send_observers: Vec<SendObserver>,
        receive_observers: Vec<ReceiveObserver>,
        config: PdoEngineConfig,
        is_safe: bool,
        on_exception: ExceptionObserver,
    ) -> Result<()> {
        if self.is_running() {
            return Err(Error::State("PDO engine already running".into()));
        }
        if config.refresh_rate < MIN_REFRESH_RATE {
            return Err(Error::Value(format!(
                "refresh_rate {:?} is below the minimum of {:?}",
                config.refresh_rate, MIN_REFRESH_RATE
            )));
        }
        if is_safe {
            let has_safe_rpdo = rpdo_maps.iter().any(|m| m.is_safety_map());
            let has_safe_tpdo = tpdo_maps.iter().any(|m| m.is_safety_map());
            if !has_safe_rpdo || !has_safe_tpdo {
                return Err(Error::State(
                    "wrong PDO configuration in a safe drive: safety RPDO/TPDO not present".into(),
                ));
            }
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let watchdog = config.watchdog();
        let period = config.refresh_rate;

        {
            let mut guard = transport.lock().map_err(|_| Error::Internal("PDO transport lock poisoned".into()))?;
            map_pdos(&mut *guard, dictionary, subnode, &rpdo_maps, &tpdo_maps)?;
            write_watchdog(&mut *guard, dictionary, subnode, watchdog)?;
        }

        let thread_stop_flag = Arc::clone(&stop_flag);
        let thread = thread::Builder::new()
            .name("pdo-cycle".into())
            .spawn(move || {
                Self::run_loop(
                    transport,
                    rpdo_maps,
                    tpdo_maps,
                    send_observers,
                    receive_observers,
                    period,
                    watchdog,
                    thread_stop_flag,
                    on_exception,
                )
            })
            .map_err(|e| Error::Internal(format!("failed to spawn PDO thread: {e}")))?;

        self.running = Some(RunningState { stop_flag, thread_id: thread.thread().id(), thread });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_loop(
        transport: Arc<Mutex<dyn Transport>>,
        rpdo_maps: Vec<Arc<PdoMap>>,
        tpdo_maps: Vec<Arc<PdoMap>>,
        send_observers: Vec<SendObserver>,
        receive_observers: Vec<ReceiveObserver>,
        period: Duration,
        watchdog: Duration,
        stop_flag: Arc<AtomicBool>,
        on_exception: ExceptionObserver,
    ) {
        while !stop_flag.load(Ordering::Acquire) {
            let iteration_start = Instant::now();

            for obs in &send_observers {
                obs(&rpdo_maps);
            }

            let tx: Vec<u8> = rpdo_maps.iter().flat_map(|m| m.encode()).collect();

            let rx = {
                let mut guard = match transport.lock() {
                    Ok(g) => g,
                    Err(_) => {
                        on_exception(&Error::Internal("PDO transport lock poisoned".into()));
                        return;
                    }
                };
                guard.send_and_receive_processdata(&tx, watchdog)
            };

            let rx = match rx {
                Ok(rx) => rx,
                Err(e) => {
                    on_exception(&e);
                    return;
                }
            };

            let mut offset = 0usize;
            for map in &tpdo_maps {
                let len = map.data_length_bytes() as usize;
                if let Some(slice) = rx.get(offset..offset + len) {
                    map.decode(slice);
                }
                offset += len;
            }

            for obs in &receive_observers {
                obs(&tpdo_maps);
            }

            let elapsed = iteration_start.elapsed();
            if elapsed > watchdog {
                on_exception(&Error::Timeout);
                error!("PDO iteration took {elapsed:?}, exceeding watchdog {watchdog:?}");
                return;
            }

            if let Some(remaining) = period.checked_sub(elapsed) {
                spin_sleep::sleep(remaining);
            }
        }
    }

    /// Stop the thread and join it. If called from within the thread
    /// itself (its own exception handler), returns immediately to avoid
    /// self-deadlock.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else { return };
        running.stop_flag.store(true, Ordering::Release);
        if thread::current().id() == running.thread_id {
            // Put it back un-joined; the thread will exit on its own.
            self.running = None;
            return;
        }
        let _ = running.thread.join();
    }
}

impl Drop for PdoEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::{Access, Address, Dtype, Phy};
    use std::collections::BTreeMap;

    fn reg(uid: &str, cyclic: Cyclic) -> Register {
        Register {
            identifier: uid.into(),
            dtype: Dtype::U16,
            access: Access::Rw,
            cyclic,
            phy: Phy::None,
            subnode: 1,
            address: Address::CanOpen { index: 0x6040, subindex: 0 },
            range: None,
            enums: BTreeMap::new(),
            bitfields: BTreeMap::new(),
            default: None,
            storage: None,
            storage_valid: false,
        }
    }

    #[test]
    fn data_length_rounds_up_to_bytes() {
        let items = vec![PdoMapItem::mapped(reg("A", Cyclic::Rx), 12), PdoMapItem::padding(4)];
        let map = PdoMap::new(PdoDirection::Rpdo, items).unwrap();
        assert_eq!(map.data_length_bits(), 16);
        assert_eq!(map.data_length_bytes(), 2);
    }

    #[test]
    fn rejects_wrong_cyclic_class_in_rpdo() {
        let items = vec![PdoMapItem::mapped(reg("A", Cyclic::Tx), 16)];
        assert!(PdoMap::new(PdoDirection::Rpdo, items).is_err());
    }

    const ECAT_DICTIONARY: &str = r#"
    <IngeniaDictionary>
      <Header><Version>2.1</Version></Header>
      <Body>
        <Device Interface="ECAT" firmwareVersion="1.0" ProductCode="0x1" RevisionNumber="0x1" PartNumber="X">
          <Registers>
            <Register id="DRV_OP_CMD" dtype="u16" access="rw" subnode="1" cyclic="CYCLIC_RX" address_type="ECAT" address="0x4000"/>
          </Registers>
        </Device>
      </Body>
    </IngeniaDictionary>
    "#;

    struct RecordingTransport {
        writes: Vec<(String, Vec<u8>)>,
        fail_uid: Option<&'static str>,
    }

    impl Transport for RecordingTransport {
        fn read_raw(&mut self, _register: &Register) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn write_raw(&mut self, register: &Register, data: &[u8]) -> Result<()> {
            if Some(register.identifier.as_str()) == self.fail_uid {
                return Err(Error::Io { message: "rejected by drive".into(), uid: Some(register.identifier.clone()) });
            }
            self.writes.push((register.identifier.clone(), data.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn map_pdos_resets_then_maps_then_assigns_each_direction() {
        let dictionary = Dictionary::parse(ECAT_DICTIONARY).unwrap();
        let op_cmd = dictionary.register("DRV_OP_CMD", 1).unwrap().clone();
        let rpdo = Arc::new(PdoMap::new(PdoDirection::Rpdo, vec![PdoMapItem::mapped(op_cmd, 16)]).unwrap());
        let mut transport = RecordingTransport { writes: Vec::new(), fail_uid: None };

        map_pdos(&mut transport, &dictionary, 1, &[rpdo], &[]).unwrap();

        let uids: Vec<&str> = transport.writes.iter().map(|(uid, _)| uid.as_str()).collect();
        assert_eq!(
            uids,
            [
                "RPDO_ASSIGN_S1",
                "RPDO_MAP_S1",
                "RPDO_MAP_S1",
                "RPDO_MAP_S1_SUB1",
                "RPDO_ASSIGN_S1",
                "RPDO_ASSIGN_S1_SUB1",
                "TPDO_ASSIGN_S1",
                "TPDO_MAP_S1",
            ]
        );
        assert_eq!(*rpdo.map_register_index.lock().unwrap(), Some(0x1600));
    }

    #[test]
    fn map_pdos_rejects_oversized_map_before_any_write() {
        let dictionary = Dictionary::parse(ECAT_DICTIONARY).unwrap();
        let op_cmd = dictionary.register("DRV_OP_CMD", 1).unwrap().clone();
        let huge = Arc::new(PdoMap::new(PdoDirection::Rpdo, vec![PdoMapItem::mapped(op_cmd, (MAX_PDO_MAP_BYTES + 8) * 8)]).unwrap());
        let mut transport = RecordingTransport { writes: Vec::new(), fail_uid: None };

        let err = map_pdos(&mut transport, &dictionary, 1, &[huge], &[]).unwrap_err();
        assert!(matches!(err, Error::Value(_)));
        assert!(transport.writes.is_empty());
    }

    #[test]
    fn write_watchdog_failure_reports_sampling_time_too_high() {
        let dictionary = Dictionary::parse(ECAT_DICTIONARY).unwrap();
        let mut transport = RecordingTransport { writes: Vec::new(), fail_uid: Some("PDO_WATCHDOG_S1") };

        let err = write_watchdog(&mut transport, &dictionary, 1, Duration::from_millis(20)).unwrap_err();
        match err {
            Error::Value(message) => assert_eq!(message, "sampling time too high"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let items = vec![PdoMapItem::mapped(reg("A", Cyclic::RxTx), 16)];
        let map = PdoMap::new(PdoDirection::Rpdo, items).unwrap();
        map.items[0].set_value(&[0x34, 0x12]);
        let encoded = map.encode();
        assert_eq!(encoded, vec![0x34, 0x12]);
        map.decode(&[0xAA, 0xBB]);
        assert_eq!(map.items[0].get_value(), vec![0xAA, 0xBB]);
    }
}
