use smallvec::SmallVec;

use crate::{ConnLid, Lid};

use super::{Framing, Packing, Role, Sca, StreamLid};

/// Group handle.
pub type GroupLid = Lid<Group>;

/// CIG timing parameters shared by all member streams
/// ([Vol 4] Part E, Section 7.8.97).
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct GroupParams {
    /// SDU interval from Central to Peripheral in microseconds.
    pub sdu_intv_m2s_us: u32,
    /// SDU interval from Peripheral to Central in microseconds.
    pub sdu_intv_s2m_us: u32,
    /// Maximum transport latency from Central to Peripheral in milliseconds.
    pub tlatency_m2s_ms: u16,
    /// Maximum transport latency from Peripheral to Central in milliseconds.
    pub tlatency_s2m_ms: u16,
    pub packing: Packing,
    pub framing: Framing,
    pub sca: Sca,
}

impl GroupParams {
    const SDU_INTV_US: std::ops::RangeInclusive<u32> = 0xFF..=0xF_FFFF;
    const TLATENCY_MS: std::ops::RangeInclusive<u16> = 0x05..=0xFA0;

    /// Creates symmetric parameters for the specified SDU interval and
    /// maximum transport latency.
    #[inline]
    #[must_use]
    pub const fn new(sdu_intv_us: u32, tlatency_ms: u16) -> Self {
        Self {
            sdu_intv_m2s_us: sdu_intv_us,
            sdu_intv_s2m_us: sdu_intv_us,
            tlatency_m2s_ms: tlatency_ms,
            tlatency_s2m_ms: tlatency_ms,
            packing: Packing::Sequential,
            framing: Framing::Unframed,
            sca: Sca::Ppm251To500,
        }
    }

    /// Sets the packing scheme.
    #[inline(always)]
    #[must_use]
    pub const fn with_packing(mut self, v: Packing) -> Self {
        self.packing = v;
        self
    }

    /// Sets the SDU framing.
    #[inline(always)]
    #[must_use]
    pub const fn with_framing(mut self, v: Framing) -> Self {
        self.framing = v;
        self
    }

    /// Sets the worst-case sleep clock accuracy.
    #[inline(always)]
    #[must_use]
    pub const fn with_sca(mut self, v: Sca) -> Self {
        self.sca = v;
        self
    }

    /// Returns whether all values are within the ranges accepted by the
    /// Controller.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        Self::SDU_INTV_US.contains(&self.sdu_intv_m2s_us)
            && Self::SDU_INTV_US.contains(&self.sdu_intv_s2m_us)
            && Self::TLATENCY_MS.contains(&self.tlatency_m2s_ms)
            && Self::TLATENCY_MS.contains(&self.tlatency_s2m_ms)
    }
}

impl Default for GroupParams {
    #[inline]
    fn default() -> Self {
        Self::new(10_000, 20)
    }
}

/// CIG commit state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum GroupState {
    /// Parameters defined, but not committed to the Controller.
    Defined,
    /// CIG parameter command issued.
    Configuring,
    /// CIG committed to the Controller.
    Configured,
    /// CIG owned by a peer Central.
    Remote,
}

/// Connected Isochronous Group.
#[derive(Clone, Debug)]
pub struct Group {
    pub(super) cig_id: u8,
    pub(super) role: Role,
    pub(super) con: Option<ConnLid>,
    pub(super) params: GroupParams,
    pub(super) state: GroupState,
    /// CIG exists in the Controller, even if its parameters are stale.
    pub(super) in_ctl: bool,
    pub(super) streams: SmallVec<[StreamLid; 4]>,
}

impl Group {
    #[inline]
    pub(super) fn new(cig_id: u8, role: Role, con: Option<ConnLid>, params: GroupParams) -> Self {
        Self {
            cig_id,
            role,
            con,
            params,
            state: match role {
                Role::Central => GroupState::Defined,
                Role::Peripheral => GroupState::Remote,
            },
            in_ctl: false,
            streams: SmallVec::new(),
        }
    }

    /// Returns the CIG ID.
    #[inline(always)]
    #[must_use]
    pub const fn cig_id(&self) -> u8 {
        self.cig_id
    }

    /// Returns the local role in the group.
    #[inline(always)]
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the connection of a peer-owned group.
    #[inline(always)]
    #[must_use]
    pub const fn con(&self) -> Option<ConnLid> {
        self.con
    }

    /// Returns the timing parameters.
    #[inline(always)]
    #[must_use]
    pub const fn params(&self) -> &GroupParams {
        &self.params
    }

    /// Returns the commit state.
    #[inline(always)]
    #[must_use]
    pub const fn state(&self) -> GroupState {
        self.state
    }

    /// Returns the member streams.
    #[inline(always)]
    #[must_use]
    pub fn streams(&self) -> &[StreamLid] {
        &self.streams
    }

    /// Returns whether the CIG is committed to the Controller.
    #[inline(always)]
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self.state, GroupState::Configured | GroupState::Remote)
    }

    /// Drops the commit after a parameter or membership change.
    #[inline]
    pub(super) fn invalidate(&mut self) {
        if self.state == GroupState::Configured {
            self.state = GroupState::Defined;
        }
    }
}
