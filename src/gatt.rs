//! GATT transport interface for the Audio Stream Control Service.
//!
//! The profile roles never touch ATT PDUs. The Client role submits discovery,
//! read, subscribe, and write operations through [`Client`], and the
//! transport reports completions and notifications back through the
//! [`Stack`](crate::Stack) handlers. The Server role answers reads and writes
//! synchronously and sends notifications through [`Server`].

use std::fmt::Debug;

use crate::ascs::Direction;
use crate::ConnLid;

/// Error type returned by GATT transports.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("ATT error: {0}")]
    Att(#[from] ErrorCode),
    #[error("Audio Stream Control Service not found")]
    NotFound,
    #[error("ACL connection lost")]
    Disconnected,
    #[error("ATT transaction timeout")]
    Timeout,
    #[error("GATT bearer busy")]
    Busy,
}

/// Common GATT result type.
pub type Result<T> = std::result::Result<T, Error>;

/// ATT error codes returned by the ASCS server ([Vol 3] Part F, Section
/// 3.4.1.1).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
    thiserror::Error,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorCode {
    /// The attribute cannot be read.
    ReadNotPermitted = 0x02,
    /// The attribute cannot be written.
    WriteNotPermitted = 0x03,
    /// The attribute requires encryption before it can be read or written.
    InsufficientEncryption = 0x0F,
    /// The attribute value length is invalid for the operation.
    InvalidAttributeValueLength = 0x0D,
    /// The request could not be completed for an unlikely reason.
    UnlikelyError = 0x0E,
    /// Insufficient resources to complete the request.
    InsufficientResources = 0x11,
    /// The attribute parameter value was not allowed.
    ValueNotAllowed = 0x13,
}

/// ASCS characteristic instance ([ASCS] Section 4).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
pub enum Chr {
    /// ASE Control Point.
    AseCp,
    /// Sink or Source ASE with the specified instance index. Instances are
    /// numbered from zero per direction in the order of discovery.
    Ase(Direction, u8),
}

/// Characteristic counts of a discovered ASCS instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Service {
    pub sink_ases: u8,
    pub source_ases: u8,
}

/// GATT client transport. All methods submit an operation and return
/// immediately. An error means that the operation was not started.
pub trait Client: Debug + Send {
    /// Discovers the ASCS instance of the peer. Completion is reported via
    /// [`Stack::gatt_discovered`](crate::Stack::gatt_discovered).
    fn discover(&mut self, con: ConnLid) -> Result<()>;

    /// Reads a characteristic value. Completion is reported via
    /// [`Stack::gatt_read`](crate::Stack::gatt_read).
    fn read(&mut self, con: ConnLid, chr: Chr) -> Result<()>;

    /// Enables notifications for a characteristic.
    fn subscribe(&mut self, con: ConnLid, chr: Chr) -> Result<()>;

    /// Writes a characteristic value using a Write Request if `reliable` is
    /// set, or a Write Command otherwise. Write Request completion is
    /// reported via [`Stack::gatt_written`](crate::Stack::gatt_written).
    fn write(&mut self, con: ConnLid, chr: Chr, val: &[u8], reliable: bool) -> Result<()>;
}

/// GATT server transport.
pub trait Server: Debug + Send {
    /// Sends a characteristic value notification.
    fn notify(&mut self, con: ConnLid, chr: Chr, val: &[u8]) -> Result<()>;
}
