use crate::ascs::CodecId;
use crate::ltv::Ltv;

use super::DATA_PATH_HCI;

/// ISO data path state for one stream direction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display)]
pub enum DpState {
    #[default]
    NotSetUp,
    SettingUp,
    SetUp,
    Removing,
}

impl DpState {
    /// Returns whether a setup or remove operation is pending.
    #[inline(always)]
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::SettingUp | Self::Removing)
    }

    /// Returns the state after the pending operation completes with the
    /// specified result, and whether the operation was a setup.
    #[inline]
    #[must_use]
    pub(super) const fn complete(self, ok: bool) -> Option<(Self, bool)> {
        match (self, ok) {
            (Self::SettingUp, true) => Some((Self::SetUp, true)),
            (Self::SettingUp, false) => Some((Self::NotSetUp, true)),
            (Self::Removing, true) => Some((Self::NotSetUp, false)),
            (Self::Removing, false) => Some((Self::SetUp, false)),
            (Self::NotSetUp | Self::SetUp, _) => None,
        }
    }
}

/// ISO data path setup parameters ([Vol 4] Part E, Section 7.8.109).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataPathCfg {
    /// Data path ID. `0x00` is HCI, other values are vendor-specific.
    pub path_id: u8,
    /// Codec used by the Controller. Transparent means the Host transports
    /// already encoded SDUs.
    pub codec_id: CodecId,
    /// Controller delay in microseconds.
    pub ctl_delay_us: u32,
    /// Codec configuration for in-controller transcoding.
    pub codec_cfg: Ltv,
}

impl DataPathCfg {
    /// Creates a transparent HCI data path configuration.
    #[inline]
    #[must_use]
    pub const fn hci() -> Self {
        Self {
            path_id: DATA_PATH_HCI,
            codec_id: CodecId::TRANSPARENT,
            ctl_delay_us: 0,
            codec_cfg: Ltv::new(),
        }
    }

    /// Creates a vendor data path configuration that transcodes with the
    /// specified codec.
    #[inline]
    #[must_use]
    pub const fn vendor(path_id: u8, codec_id: CodecId, ctl_delay_us: u32, cfg: Ltv) -> Self {
        Self {
            path_id,
            codec_id,
            ctl_delay_us,
            codec_cfg: cfg,
        }
    }

    /// Returns whether the Controller only transports encoded data.
    #[inline]
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.codec_id.is_transparent()
    }
}

impl Default for DataPathCfg {
    #[inline]
    fn default() -> Self {
        Self::hci()
    }
}
