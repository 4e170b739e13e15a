//! Multi-transport client library for servo drive parameter access and
//! process-data exchange.
//!
//! A [`Network`](network::Network) owns one [`Transport`](transport::Transport)
//! (MCB-over-IP, CANopen SDO, or EtherCAT CoE) and the [`Servo`](servo::Servo)s
//! bound to it. Each servo exposes typed register access keyed by a
//! [`Dictionary`](dictionary::Dictionary) loaded from a `.xdf` file, the CiA
//! 402 enable/disable/fault-reset state machine, and — through the network —
//! a cyclic [`PdoEngine`](pdo::PdoEngine) for mapped process data. Monitoring
//! and disturbance ring buffers, `.xcf`/`.csv` configuration round-trip, and
//! EMCY decoding round out the surface.

#[macro_use]
mod logging;

pub mod config_file;
pub mod dictionary;
pub mod disturbance;
pub mod emcy;
pub mod error;
pub mod mcb;
pub mod monitoring;
pub mod network;
pub mod pdo;
pub mod register;
pub mod servo;
pub mod state;
pub mod transport;
pub mod value;

pub use config_file::ConfigScope;
pub use dictionary::{Dictionary, Interface};
pub use disturbance::DisturbanceConfig;
pub use emcy::EmergencyMessage;
pub use error::{Error, Result};
pub use monitoring::{MonitoringConfig, MonitoringReader};
pub use network::Network;
pub use pdo::{PdoDirection, PdoEngine, PdoMap, PdoMapItem};
pub use register::{Access, Dtype, Register};
pub use servo::Servo;
pub use state::ServoState;
pub use transport::Transport;
pub use value::RegisterValue;
