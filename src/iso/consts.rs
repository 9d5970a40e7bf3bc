#![allow(clippy::use_self)]

use bitflags::bitflags;

/// Controller status codes relevant to isochronous channels
/// ([Vol 1] Part F, Section 1.3).
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::FromPrimitive, strum::Display, thiserror::Error,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    UnknownCommand = 0x01,
    UnknownConnectionIdentifier = 0x02,
    HardwareFailure = 0x03,
    MemoryCapacityExceeded = 0x07,
    ConnectionTimeout = 0x08,
    ConnectionLimitExceeded = 0x09,
    ConnectionAlreadyExists = 0x0B,
    CommandDisallowed = 0x0C,
    ConnectionRejectedDueToLimitedResources = 0x0D,
    ConnectionAcceptTimeoutExceeded = 0x10,
    UnsupportedFeatureOrParameterValue = 0x11,
    InvalidCommandParameters = 0x12,
    RemoteUserTerminatedConnection = 0x13,
    RemoteDeviceTerminatedConnectionDueToLowResources = 0x14,
    RemoteDeviceTerminatedConnectionDueToPowerOff = 0x15,
    ConnectionTerminatedByLocalHost = 0x16,
    UnsupportedRemoteFeature = 0x1A,
    InvalidLmpLlParameters = 0x1E,
    #[num_enum(default)] // [Vol 4] Part E, Section 1.2
    UnspecifiedError = 0x1F,
    UnsupportedLmpLlParameterValue = 0x20,
    LmpLlResponseTimeout = 0x22,
    InstantPassed = 0x28,
    InsufficientSecurity = 0x2F,
    ControllerBusy = 0x3A,
    ConnectionTerminatedDueToMicFailure = 0x3D,
    ConnectionFailedToBeEstablished = 0x3E,
    OperationCancelledByHost = 0x44,
}

impl Status {
    /// Returns whether status is `Success`.
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl Default for Status {
    #[inline]
    fn default() -> Self {
        Self::Success
    }
}

bitflags! {
    /// LE PHY bit field ([Vol 4] Part E, Section 7.8.97).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[derive(serde::Deserialize, serde::Serialize)]
    #[repr(transparent)]
    #[serde(transparent)]
    pub struct Phy: u8 {
        const LE_1M = 1 << 0;
        const LE_2M = 1 << 1;
        const LE_CODED = 1 << 2;
    }
}

impl Phy {
    /// Returns whether exactly one PHY is selected.
    #[inline]
    #[must_use]
    pub const fn is_single(self) -> bool {
        self.bits().count_ones() == 1
    }
}

/// SDU framing ([Vol 6] Part G, Section 2).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
)]
#[repr(u8)]
pub enum Framing {
    #[default]
    Unframed = 0x00,
    Framed = 0x01,
}

/// CIS packing within a CIG ([Vol 4] Part E, Section 7.8.97).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
)]
#[repr(u8)]
pub enum Packing {
    #[default]
    Sequential = 0x00,
    Interleaved = 0x01,
}

/// Worst-case sleep clock accuracy of all Peripherals in a CIG
/// ([Vol 4] Part E, Section 7.8.97).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
)]
#[repr(u8)]
pub enum Sca {
    #[default]
    Ppm251To500 = 0x00,
    Ppm151To250 = 0x01,
    Ppm101To150 = 0x02,
    Ppm76To100 = 0x03,
    Ppm51To75 = 0x04,
    Ppm31To50 = 0x05,
    Ppm21To30 = 0x06,
    Ppm0To20 = 0x07,
}

/// ISO data path direction relative to the Controller
/// ([Vol 4] Part E, Section 7.8.109).
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
)]
#[repr(u8)]
pub enum DpDirection {
    /// Host to Controller (transmit).
    Input = 0x00,
    /// Controller to Host (receive).
    Output = 0x01,
}

impl DpDirection {
    /// Returns the index of the direction in per-direction tables.
    #[inline(always)]
    #[must_use]
    pub(super) const fn idx(self) -> usize {
        self as usize
    }
}

/// Data path over the HCI transport ([Vol 4] Part E, Section 7.8.109).
pub const DATA_PATH_HCI: u8 = 0x00;
