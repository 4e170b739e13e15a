//! EtherCAT/CoE transport: mailbox SDO access plus the cyclic
//! process-data exchange used by the PDO engine.
//!
//! As with [`super::can`], the EtherCAT master itself (frame scheduling,
//! working-counter accounting, distributed clocks) is an external
//! collaborator; this module only states the interface it must expose.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::register::{Address, Register};
use crate::transport::Transport;

/// EtherCAT mailbox-SDO sub-cases of a working-counter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingCounterError {
    NoResponse,
    NoFrame,
    Timeout,
}

impl WorkingCounterError {
    pub fn code(self) -> i32 {
        match self {
            WorkingCounterError::NoResponse => 0,
            WorkingCounterError::NoFrame => -1,
            WorkingCounterError::Timeout => -5,
        }
    }
}

/// A CoE mailbox + process-data backend, implemented by an EtherCAT
/// master the host application supplies.
pub trait CoeMailbox: Send {
    /// Mailbox SDO upload (read).
    fn coe_upload(&mut self, slave_index: u16, index: u16, subindex: u8, timeout: Duration) -> Result<Vec<u8>>;

    /// Mailbox SDO download (write).
    fn coe_download(&mut self, slave_index: u16, index: u16, subindex: u8, data: &[u8], timeout: Duration) -> Result<()>;

    /// Complete-access SDO transfer of sub-0 and sub-1 together, as one
    /// CoE transaction.
    fn coe_complete_access_download(
        &mut self,
        slave_index: u16,
        index: u16,
        sub0: &[u8],
        sub1: &[u8],
        timeout: Duration,
    ) -> Result<()>;

    /// One process-data cycle: write the RPDO image, exchange, return the
    /// TPDO image. Implementations must surface working-counter
    /// mismatches as `Err(Error::Io { .. })`.
    fn exchange_processdata(&mut self, slave_index: u16, rpdo: &[u8], timeout: Duration) -> Result<Vec<u8>>;
}

/// EtherCAT/CoE transport: one servo = one slave on the segment.
pub struct EthercatTransport<M: CoeMailbox> {
    mailbox: M,
    slave_index: u16,
    timeout: Duration,
}

impl<M: CoeMailbox> EthercatTransport<M> {
    pub fn new(mailbox: M, slave_index: u16, timeout: Duration) -> Self {
        Self { mailbox, slave_index, timeout }
    }

    fn coe_address(register: &Register) -> Result<(u16, u8)> {
        match register.address {
            Address::CanOpen { index, subindex } => Ok((index, subindex)),
            Address::IpFlat(_) => {
                Err(Error::Creation(format!("register {} has no CoE address", register.identifier)))
            }
        }
    }
}

impl<M: CoeMailbox> Transport for EthercatTransport<M> {
    fn read_raw(&mut self, register: &Register) -> Result<Vec<u8>> {
        let (index, subindex) = Self::coe_address(register)?;
        self.mailbox.coe_upload(self.slave_index, index, subindex, self.timeout)
    }

    fn write_raw(&mut self, register: &Register, data: &[u8]) -> Result<()> {
        let (index, subindex) = Self::coe_address(register)?;
        self.mailbox.coe_download(self.slave_index, index, subindex, data, self.timeout)
    }

    fn write_complete_access(&mut self, sub0: &Register, sub0_data: &[u8], sub1: &Register, sub1_data: &[u8]) -> Result<()> {
        let (index, _) = Self::coe_address(sub0)?;
        self.mailbox.coe_complete_access_download(self.slave_index, index, sub0_data, sub1_data, self.timeout)
    }

    fn send_and_receive_processdata(&mut self, tx: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.mailbox.exchange_processdata(self.slave_index, tx, timeout)
    }
}
