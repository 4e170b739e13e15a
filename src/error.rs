//! Error types shared by every layer of the crate.

use std::fmt;

/// The crate's unified error type.
#[derive(Debug)]
pub enum Error {
    /// A dictionary or servo could not be constructed.
    Creation(String),
    /// XML was well-formed but not a valid dictionary/config file.
    Parse(String),
    /// A user-supplied value was out of range, or named a nonexistent
    /// bitfield/subnode.
    Value(String),
    /// Attempted to read a write-only register, or write a read-only one.
    Access {
        /// Register identifier.
        uid: String,
    },
    /// A transport-level failure (socket error, CAN bus error, CoE mailbox
    /// error), tagged with the register that was in flight when known.
    Io {
        /// Underlying message.
        message: String,
        /// Register identifier in flight, if any.
        uid: Option<String>,
    },
    /// A bounded wait (response, state change, PDO watchdog) expired.
    Timeout,
    /// The CiA 402 state machine is stuck, or an operation is illegal in
    /// the current state.
    State(String),
    /// The drive replied with a NACK frame.
    Nack(u32),
    /// Reply address did not match the request address.
    WrongRegister {
        /// Address we asked for.
        expected: u16,
        /// Address the reply carried.
        received: u16,
    },
    /// CRC verification failed on a received frame.
    WrongCrc,
    /// Firmware transfer failed.
    FirmwareLoad(String),
    /// `.xcf`/`.csv` configuration file failed to parse.
    ConfigurationFileParse(String),
    /// Something internal that should not happen (e.g. a poisoned lock).
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Creation(msg) => write!(f, "could not create dictionary/servo: {msg}"),
            Error::Parse(msg) => write!(f, "dictionary/config parse error: {msg}"),
            Error::Value(msg) => write!(f, "invalid value: {msg}"),
            Error::Access { uid } => write!(f, "access denied for register {uid}"),
            Error::Io { message, uid: Some(uid) } => {
                write!(f, "transport error on register {uid}: {message}")
            }
            Error::Io { message, uid: None } => write!(f, "transport error: {message}"),
            Error::Timeout => f.write_str("operation timed out"),
            Error::State(msg) => write!(f, "state machine error: {msg}"),
            Error::Nack(code) => write!(f, "drive replied NACK (error code 0x{code:08X})"),
            Error::WrongRegister { expected, received } => write!(
                f,
                "reply address 0x{received:03X} does not match requested address 0x{expected:03X}"
            ),
            Error::WrongCrc => f.write_str("CRC verification failed on received frame"),
            Error::FirmwareLoad(msg) => write!(f, "firmware load failed: {msg}"),
            Error::ConfigurationFileParse(msg) => write!(f, "configuration file error: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io { message: e.to_string(), uid: None }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<quick_xml::DeError> for Error {
    fn from(e: quick_xml::DeError) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::ConfigurationFileParse(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
