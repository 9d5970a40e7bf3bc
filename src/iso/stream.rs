use crate::ascs::{AseLid, Direction};
use crate::{ConnLid, Lid};

use super::{ConnHandle, DpDirection, DpState, GroupLid, Phy, Role};

/// Stream handle.
pub type StreamLid = Lid<Stream>;

/// Per-direction CIS parameters requested by the Host
/// ([Vol 4] Part E, Section 7.8.97).
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct DirParams {
    /// Maximum SDU size. Zero if the direction is unused.
    pub max_sdu: u16,
    pub phy: Phy,
    /// Retransmission number.
    pub rtn: u8,
}

impl Default for DirParams {
    #[inline]
    fn default() -> Self {
        Self {
            max_sdu: 0,
            phy: Phy::LE_2M,
            rtn: 2,
        }
    }
}

/// CIS parameters requested by the Host.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize,
)]
#[serde(default)]
pub struct StreamParams {
    /// Central to Peripheral.
    pub m2s: DirParams,
    /// Peripheral to Central.
    pub s2m: DirParams,
}

impl StreamParams {
    /// Returns the parameters for the link direction used by ASEs of type
    /// `dir`. Sink ASEs receive from the Central.
    #[inline]
    #[must_use]
    pub const fn dir(&self, dir: Direction) -> &DirParams {
        match dir {
            Direction::Sink => &self.m2s,
            Direction::Source => &self.s2m,
        }
    }

    #[inline]
    pub(super) fn dir_mut(&mut self, dir: Direction) -> &mut DirParams {
        match dir {
            Direction::Sink => &mut self.m2s,
            Direction::Source => &mut self.s2m,
        }
    }
}

/// Negotiated CIS configuration reported by the Controller when the stream is
/// established ([Vol 4] Part E, Section 7.7.65.25).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CisConfig {
    pub cig_sync_delay_us: u32,
    pub cis_sync_delay_us: u32,
    pub tlatency_m2s_us: u32,
    pub tlatency_s2m_us: u32,
    pub phy_m2s: Phy,
    pub phy_s2m: Phy,
    /// Number of subevents.
    pub nse: u8,
    /// Burst numbers.
    pub bn_m2s: u8,
    pub bn_s2m: u8,
    /// Flush timeouts.
    pub ft_m2s: u8,
    pub ft_s2m: u8,
    pub max_pdu_m2s: u16,
    pub max_pdu_s2m: u16,
    /// ISO interval in units of 1.25 ms.
    pub iso_intv: u16,
}

/// Stream lifecycle state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum StreamState {
    /// Not bound to an ACL connection.
    Unbound,
    /// Bound to an ACL connection, CIS not established.
    Configured,
    /// CIS creation or acceptance in progress.
    Establishing,
    /// CIS established.
    Established,
    /// CIS lost or failed to be established.
    Disconnected,
}

impl StreamState {
    /// Returns whether the stream occupies Controller resources.
    #[inline(always)]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Establishing | Self::Established)
    }
}

/// Connected Isochronous Stream.
#[derive(Clone, Debug)]
pub struct Stream {
    pub(super) group: GroupLid,
    pub(super) cis_id: u8,
    pub(super) role: Role,
    pub(super) con: Option<ConnLid>,
    pub(super) params: StreamParams,
    pub(super) state: StreamState,
    /// Stream is removed once it has no bound ASEs and no CIS.
    pub(super) auto: bool,
    /// Disconnection requested.
    pub(super) closing: bool,
    pub(super) hdl: Option<ConnHandle>,
    pub(super) cfg: Option<CisConfig>,
    pub(super) ase_sink: Option<AseLid>,
    pub(super) ase_src: Option<AseLid>,
    pub(super) dp: [DpState; 2],
}

impl Stream {
    #[inline]
    pub(super) fn new(group: GroupLid, cis_id: u8, role: Role, params: StreamParams) -> Self {
        Self {
            group,
            cis_id,
            role,
            con: None,
            params,
            state: StreamState::Unbound,
            auto: false,
            closing: false,
            hdl: None,
            cfg: None,
            ase_sink: None,
            ase_src: None,
            dp: [DpState::NotSetUp; 2],
        }
    }

    /// Returns the owning group.
    #[inline(always)]
    #[must_use]
    pub const fn group(&self) -> GroupLid {
        self.group
    }

    /// Returns the CIS ID.
    #[inline(always)]
    #[must_use]
    pub const fn cis_id(&self) -> u8 {
        self.cis_id
    }

    /// Returns the local role.
    #[inline(always)]
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the ACL connection of a bound stream.
    #[inline(always)]
    #[must_use]
    pub const fn con(&self) -> Option<ConnLid> {
        self.con
    }

    /// Returns the requested parameters.
    #[inline(always)]
    #[must_use]
    pub const fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Returns the lifecycle state.
    #[inline(always)]
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Returns the CIS connection handle of an established stream.
    #[inline]
    #[must_use]
    pub fn conhdl(&self) -> Option<ConnHandle> {
        self.hdl.filter(|_| self.state == StreamState::Established)
    }

    /// Returns the negotiated configuration of an established stream.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> Option<&CisConfig> {
        self.cfg.as_ref()
    }

    /// Returns the ASE of type `dir` bound to the stream.
    #[inline]
    #[must_use]
    pub const fn ase(&self, dir: Direction) -> Option<AseLid> {
        match dir {
            Direction::Sink => self.ase_sink,
            Direction::Source => self.ase_src,
        }
    }

    /// Returns all bound ASEs.
    #[inline]
    pub fn ases(&self) -> impl Iterator<Item = AseLid> {
        self.ase_sink.into_iter().chain(self.ase_src)
    }

    /// Returns the data path state for direction `dir`.
    #[inline(always)]
    #[must_use]
    pub const fn dp_state(&self, dir: DpDirection) -> DpState {
        self.dp[dir.idx()]
    }

    #[inline]
    pub(super) fn ase_mut(&mut self, dir: Direction) -> &mut Option<AseLid> {
        match dir {
            Direction::Sink => &mut self.ase_sink,
            Direction::Source => &mut self.ase_src,
        }
    }

    /// Returns whether the stream can be removed.
    #[inline]
    pub(super) const fn is_idle(&self) -> bool {
        !self.state.is_active() && self.ase_sink.is_none() && self.ase_src.is_none()
    }

    /// Returns whether the stream can be bound to any connection.
    #[inline]
    pub(super) const fn is_free(&self) -> bool {
        matches!(self.state, StreamState::Unbound)
            || (matches!(self.state, StreamState::Disconnected) && self.is_idle())
    }

    /// Drops all CIS state after establishment failure or disconnection.
    pub(super) fn reset(&mut self) {
        self.state = StreamState::Disconnected;
        self.closing = false;
        self.hdl = None;
        self.cfg = None;
        self.dp = [DpState::NotSetUp; 2];
    }
}
