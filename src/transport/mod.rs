//! Transport abstraction shared by all three physical media. Each
//! transport exposes the same two blocking primitives to L3; everything
//! above this module is transport-agnostic.

pub mod can;
pub mod ethercat;
pub mod ip;

use std::time::Duration;

use crate::error::Result;
use crate::register::Register;

/// Default timeout for MCB-over-IP request/response pairs.
pub const DEFAULT_IP_TIMEOUT: Duration = Duration::from_millis(200);
/// Default timeout for CANopen SDO request/response pairs.
pub const DEFAULT_CAN_TIMEOUT: Duration = Duration::from_millis(300);

/// A synchronous, blocking register transport. One instance is bound to
/// exactly one peer.
pub trait Transport: Send {
    /// Read the raw wire bytes backing `register`.
    fn read_raw(&mut self, register: &Register) -> Result<Vec<u8>>;

    /// Write `data` (already encoded per `register.dtype`) to `register`.
    fn write_raw(&mut self, register: &Register, data: &[u8]) -> Result<()>;

    /// CoE complete-access: write both sub-0 and sub-1 of a mapping
    /// register as one CoE transaction. Only EtherCAT implements this as
    /// a true single transfer; other transports fall back to two
    /// sequential transactions.
    fn write_complete_access(&mut self, sub0: &Register, sub0_data: &[u8], sub1: &Register, sub1_data: &[u8]) -> Result<()> {
        self.write_raw(sub0, sub0_data)?;
        self.write_raw(sub1, sub1_data)
    }

    /// Transact one PDO cycle: send `tx` (RPDO, host → drive) and return
    /// the received TPDO bytes (drive → host). Only meaningful for
    /// transports that have process-data channels (EtherCAT/CAN); the
    /// default implementation errors.
    fn send_and_receive_processdata(&mut self, _tx: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        Err(crate::error::Error::Io { message: "transport has no process-data channel".into(), uid: None })
    }

    /// Stream a firmware image to the peer (FoE/FTP or transport-specific
    /// equivalent). The actual file-transfer protocol is an external
    /// collaborator; this is only the interface a transport-specific
    /// uploader hangs off of. The default implementation errors, since
    /// most transports never implement it.
    fn write_firmware_stream(&mut self, _data: &[u8], _timeout: Duration) -> Result<()> {
        Err(crate::error::Error::FirmwareLoad("transport does not support firmware streaming".into()))
    }
}
