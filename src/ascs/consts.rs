#![allow(clippy::use_self)]

/// ASE state ([ASCS] Section 3.1 and Table 4.2).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    enum_iterator::Sequence,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[repr(u8)]
pub enum AseState {
    #[default]
    Idle = 0x00,
    CodecConfigured = 0x01,
    QosConfigured = 0x02,
    Enabling = 0x03,
    Streaming = 0x04,
    Disabling = 0x05,
    Releasing = 0x06,
}

impl AseState {
    /// Returns whether an ASE in this state is bound to a stream.
    #[inline]
    #[must_use]
    pub const fn has_stream(self) -> bool {
        matches!(
            self,
            Self::QosConfigured | Self::Enabling | Self::Streaming | Self::Disabling
        )
    }

    /// Returns whether the ASE carries metadata in this state.
    #[inline]
    #[must_use]
    pub const fn has_metadata(self) -> bool {
        matches!(self, Self::Enabling | Self::Streaming | Self::Disabling)
    }
}

/// ASE Control Point opcode ([ASCS] Section 5.1 and Table 5.1).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    enum_iterator::Sequence,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum Opcode {
    ConfigCodec = 0x01,
    ConfigQos = 0x02,
    Enable = 0x03,
    ReceiverStartReady = 0x04,
    Disable = 0x05,
    ReceiverStopReady = 0x06,
    UpdateMetadata = 0x07,
    Release = 0x08,
}

/// ASE Control Point response code ([ASCS] Section 5.1 and Table 5.2).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    enum_iterator::Sequence,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
    thiserror::Error,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum RspCode {
    Success = 0x00,
    UnsupportedOpcode = 0x01,
    InvalidLength = 0x02,
    InvalidAseId = 0x03,
    InvalidAseStateMachineTransition = 0x04,
    InvalidAseDirection = 0x05,
    UnsupportedAudioCapabilities = 0x06,
    UnsupportedConfigurationParameterValue = 0x07,
    RejectedConfigurationParameterValue = 0x08,
    InvalidConfigurationParameterValue = 0x09,
    UnsupportedMetadata = 0x0A,
    RejectedMetadata = 0x0B,
    InvalidMetadata = 0x0C,
    InsufficientResources = 0x0D,
    UnspecifiedError = 0x0E,
}

impl RspCode {
    /// Returns whether the reason field identifies a configuration parameter.
    #[inline]
    #[must_use]
    pub const fn has_cfg_reason(self) -> bool {
        matches!(
            self,
            Self::UnsupportedConfigurationParameterValue
                | Self::RejectedConfigurationParameterValue
                | Self::InvalidConfigurationParameterValue
        )
    }

    /// Returns whether the reason field is a metadata LTV type.
    #[inline]
    #[must_use]
    pub const fn has_metadata_reason(self) -> bool {
        matches!(
            self,
            Self::UnsupportedMetadata | Self::RejectedMetadata | Self::InvalidMetadata
        )
    }
}

/// Configuration parameter identified by a response
/// ([ASCS] Section 5.1 and Table 5.3).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum Reason {
    #[default]
    None = 0x00,
    CodecId = 0x01,
    CodecSpecificConfiguration = 0x02,
    SduInterval = 0x03,
    Framing = 0x04,
    Phy = 0x05,
    MaxSdu = 0x06,
    RetransmissionNumber = 0x07,
    MaxTransportLatency = 0x08,
    PresentationDelay = 0x09,
    InvalidAseCisMapping = 0x0A,
}

/// ASE direction as seen from the server ([BAP] Section 3.5.2).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    enum_iterator::Sequence,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
)]
#[repr(u8)]
pub enum Direction {
    /// Server receives audio.
    Sink = 0x01,
    /// Server transmits audio.
    Source = 0x02,
}

/// Target latency requested with Config Codec ([ASCS] Section 5.1).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
)]
#[repr(u8)]
pub enum TargetLatency {
    #[default]
    LowLatency = 0x01,
    Balanced = 0x02,
    HighReliability = 0x03,
}

/// Target PHY requested with Config Codec ([ASCS] Section 5.1).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
)]
#[repr(u8)]
pub enum TargetPhy {
    Le1M = 0x01,
    #[default]
    Le2M = 0x02,
    LeCoded = 0x03,
}

/// Codec identifier ([Vol 4] Part E, Section 7.8.109 and
/// [Assigned Numbers] Section 2.11).
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize,
)]
pub struct CodecId {
    /// Coding format.
    pub format: u8,
    /// Company ID for vendor-specific formats.
    pub company: u16,
    /// Vendor-defined codec ID.
    pub vendor: u16,
}

impl CodecId {
    /// Transparent (Controller does not transcode).
    pub const TRANSPARENT: Self = Self::new(0x03);
    /// Low Complexity Communication Codec.
    pub const LC3: Self = Self::new(0x06);
    /// Vendor-specific coding format.
    const VENDOR_FORMAT: u8 = 0xFF;

    /// Creates an assigned codec ID.
    #[inline(always)]
    #[must_use]
    pub const fn new(format: u8) -> Self {
        Self {
            format,
            company: 0,
            vendor: 0,
        }
    }

    /// Creates a vendor-specific codec ID.
    #[inline(always)]
    #[must_use]
    pub const fn vendor(company: u16, vendor: u16) -> Self {
        Self {
            format: Self::VENDOR_FORMAT,
            company,
            vendor,
        }
    }

    /// Returns whether this is the transparent coding format.
    #[inline(always)]
    #[must_use]
    pub const fn is_transparent(&self) -> bool {
        self.format == Self::TRANSPARENT.format
    }

    /// Returns whether the vendor-specific fields are consistent with the
    /// coding format.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.format == Self::VENDOR_FORMAT || (self.company == 0 && self.vendor == 0)
    }
}
