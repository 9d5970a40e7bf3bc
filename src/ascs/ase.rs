use std::fmt::{Display, Formatter};

use crate::iso::{DirParams, Framing, Phy, StreamLid};
use crate::ltv::Ltv;
use crate::{ConnLid, Lid};

use super::{AseState, CodecId, Direction, Opcode, Reason, RspCode, TargetLatency, TargetPhy};

/// ASE handle.
pub type AseLid = Lid<Ase>;

/// Rejected ASE Control Point operation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub struct Rejection {
    pub code: RspCode,
    /// Configuration parameter [`Reason`] or metadata LTV type, depending on
    /// the code.
    pub reason: u8,
}

impl Rejection {
    /// Creates a rejection with the specified reason.
    #[inline(always)]
    #[must_use]
    pub fn new(code: RspCode, reason: impl Into<u8>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Creates an Invalid ASE State Machine Transition rejection.
    #[inline(always)]
    #[must_use]
    pub const fn invalid_transition() -> Self {
        Self::plain(RspCode::InvalidAseStateMachineTransition)
    }

    /// Creates a rejection without a reason.
    #[inline(always)]
    #[must_use]
    pub const fn plain(code: RspCode) -> Self {
        Self { code, reason: 0 }
    }

    /// Creates an Invalid Configuration Parameter Value rejection.
    #[inline(always)]
    #[must_use]
    pub const fn invalid_cfg(r: Reason) -> Self {
        Self {
            code: RspCode::InvalidConfigurationParameterValue,
            reason: r as u8,
        }
    }

    /// Returns the configuration parameter reason, if the code carries one.
    #[must_use]
    pub fn cfg_reason(&self) -> Option<Reason> {
        (self.code.has_cfg_reason())
            .then(|| Reason::try_from(self.reason).ok())
            .flatten()
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.cfg_reason() {
            Some(r) => write!(f, "{} ({r})", self.code),
            None if self.reason != 0 => write!(f, "{} ({:#04X})", self.code, self.reason),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Returns the state reached by a successful operation `op` in state `s`,
/// or [`None`] if the transition is invalid ([ASCS] Table 3.2).
///
/// Release leads to `Releasing`. The final state after release and the
/// direction-specific handling of Receiver Start/Stop Ready and Disable are
/// applied by the profile roles.
#[must_use]
pub const fn transition(s: AseState, op: Opcode) -> Option<AseState> {
    use AseState::*;
    match (op, s) {
        (Opcode::ConfigCodec, Idle | CodecConfigured | QosConfigured) => Some(CodecConfigured),
        (Opcode::ConfigQos, CodecConfigured) => Some(QosConfigured),
        (Opcode::Enable, QosConfigured) => Some(Enabling),
        (Opcode::ReceiverStartReady, Enabling) => Some(Streaming),
        (Opcode::Disable, Enabling | Streaming) => Some(Disabling),
        (Opcode::ReceiverStopReady, Disabling) => Some(QosConfigured),
        (Opcode::UpdateMetadata, Enabling | Streaming) => Some(s),
        (Opcode::Release, CodecConfigured | QosConfigured | Enabling | Streaming | Disabling) => {
            Some(Releasing)
        }
        _ => None,
    }
}

/// Codec configuration ([ASCS] Section 5.1).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CodecCfg {
    pub codec_id: CodecId,
    /// Opaque Codec Specific Configuration.
    pub cfg: Ltv,
    pub target_latency: TargetLatency,
    pub target_phy: TargetPhy,
    /// Controller delay in microseconds used for data path setup.
    pub ctl_delay_us: u32,
}

impl CodecCfg {
    /// Creates a codec configuration with default targets.
    #[inline]
    #[must_use]
    pub fn new(codec_id: CodecId, cfg: impl Into<Ltv>) -> Self {
        Self {
            codec_id,
            cfg: cfg.into(),
            ..Self::default()
        }
    }
}

/// Server's preferred QoS reported in the Codec Configured state
/// ([ASCS] Section 4.3.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct QosPref {
    /// Unframed ISOAL PDUs are supported.
    pub unframed: bool,
    pub phy: Phy,
    pub rtn: u8,
    pub max_tlatency_ms: u16,
    pub pres_delay_min_us: u32,
    pub pres_delay_max_us: u32,
    /// Preferred presentation delay range. Zero means no preference.
    pub pref_pres_delay_min_us: u32,
    pub pref_pres_delay_max_us: u32,
}

impl QosPref {
    /// Returns whether `q` satisfies the server's requirements. Preferences
    /// are not enforced.
    pub(crate) fn check(&self, q: &QosCfg) -> Result<(), Rejection> {
        let reject = |r| Err(Rejection::new(RspCode::RejectedConfigurationParameterValue, r));
        if !self.unframed && q.framing == Framing::Unframed {
            return reject(Reason::Framing);
        }
        if !(self.pres_delay_min_us..=self.pres_delay_max_us).contains(&q.pres_delay_us) {
            return reject(Reason::PresentationDelay);
        }
        Ok(())
    }
}

impl Default for QosPref {
    #[inline]
    fn default() -> Self {
        Self {
            unframed: true,
            phy: Phy::LE_2M,
            rtn: 2,
            max_tlatency_ms: 20,
            pres_delay_min_us: 20_000,
            pres_delay_max_us: 40_000,
            pref_pres_delay_min_us: 0,
            pref_pres_delay_max_us: 0,
        }
    }
}

/// QoS configuration ([ASCS] Section 5.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct QosCfg {
    pub cig_id: u8,
    pub cis_id: u8,
    pub sdu_intv_us: u32,
    pub framing: Framing,
    pub phy: Phy,
    pub max_sdu: u16,
    pub rtn: u8,
    pub max_tlatency_ms: u16,
    pub pres_delay_us: u32,
}

impl QosCfg {
    const MAX_ID: u8 = 0xEF;
    const MAX_SDU: u16 = 0xFFF;

    /// Creates a configuration for the specified CIG/CIS with 2M PHY,
    /// unframed SDUs, and a 40 ms presentation delay.
    #[inline]
    #[must_use]
    pub const fn new(cig_id: u8, cis_id: u8, sdu_intv_us: u32, max_sdu: u16) -> Self {
        Self {
            cig_id,
            cis_id,
            sdu_intv_us,
            framing: Framing::Unframed,
            phy: Phy::LE_2M,
            max_sdu,
            rtn: 2,
            max_tlatency_ms: 20,
            pres_delay_us: 40_000,
        }
    }

    /// Returns the first invalid parameter ([ASCS] Section 5.2).
    pub fn validate(&self) -> Result<(), Rejection> {
        let err = |r| Err(Rejection::invalid_cfg(r));
        if self.cig_id > Self::MAX_ID || self.cis_id > Self::MAX_ID {
            return err(Reason::InvalidAseCisMapping);
        }
        if !(0xFF..=0xF_FFFF).contains(&self.sdu_intv_us) {
            return err(Reason::SduInterval);
        }
        if !self.phy.is_single() || self.phy.bits() & !Phy::all().bits() != 0 {
            return err(Reason::Phy);
        }
        if self.max_sdu > Self::MAX_SDU {
            return err(Reason::MaxSdu);
        }
        if !(0x05..=0xFA0).contains(&self.max_tlatency_ms) {
            return err(Reason::MaxTransportLatency);
        }
        if self.pres_delay_us > 0xFF_FFFF {
            return err(Reason::PresentationDelay);
        }
        Ok(())
    }

    /// Returns the stream parameters for one link direction.
    #[inline]
    #[must_use]
    pub const fn dir_params(&self) -> DirParams {
        DirParams {
            max_sdu: self.max_sdu,
            phy: self.phy,
            rtn: self.rtn,
        }
    }
}

/// Audio Stream Endpoint.
#[derive(Clone, Debug)]
pub struct Ase {
    pub(crate) con: ConnLid,
    pub(crate) instance: u8,
    pub(crate) id: u8,
    pub(crate) dir: Direction,
    pub(crate) state: AseState,
    pub(crate) codec: Option<CodecCfg>,
    pub(crate) qos_pref: QosPref,
    pub(crate) qos: Option<QosCfg>,
    pub(crate) metadata: Ltv,
    pub(crate) stream: Option<StreamLid>,
    pub(crate) pending: Option<Opcode>,
    pub(crate) reliable: bool,
}

impl Ase {
    /// Creates an Idle ASE record.
    #[must_use]
    pub(crate) fn new(con: ConnLid, instance: u8, id: u8, dir: Direction) -> Self {
        Self {
            con,
            instance,
            id,
            dir,
            state: AseState::Idle,
            codec: None,
            qos_pref: QosPref::default(),
            qos: None,
            metadata: Ltv::new(),
            stream: None,
            pending: None,
            reliable: true,
        }
    }

    /// Returns the owning connection.
    #[inline(always)]
    #[must_use]
    pub const fn con(&self) -> ConnLid {
        self.con
    }

    /// Returns the characteristic instance index.
    #[inline(always)]
    #[must_use]
    pub const fn instance(&self) -> u8 {
        self.instance
    }

    /// Returns the ASE_ID.
    #[inline(always)]
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    #[inline(always)]
    #[must_use]
    pub const fn dir(&self) -> Direction {
        self.dir
    }

    #[inline(always)]
    #[must_use]
    pub const fn state(&self) -> AseState {
        self.state
    }

    /// Returns the codec configuration, if configured.
    #[inline(always)]
    #[must_use]
    pub const fn codec(&self) -> Option<&CodecCfg> {
        self.codec.as_ref()
    }

    /// Returns the server's preferred QoS.
    #[inline(always)]
    #[must_use]
    pub const fn qos_pref(&self) -> &QosPref {
        &self.qos_pref
    }

    /// Returns the QoS configuration, if configured.
    #[inline(always)]
    #[must_use]
    pub const fn qos(&self) -> Option<&QosCfg> {
        self.qos.as_ref()
    }

    #[inline(always)]
    #[must_use]
    pub const fn metadata(&self) -> &Ltv {
        &self.metadata
    }

    /// Returns the bound stream.
    #[inline(always)]
    #[must_use]
    pub const fn stream(&self) -> Option<StreamLid> {
        self.stream
    }

    /// Returns the pending Control Point operation.
    #[inline(always)]
    #[must_use]
    pub const fn pending(&self) -> Option<Opcode> {
        self.pending
    }

    /// Returns whether Control Point writes for this ASE use Write Request.
    #[inline(always)]
    #[must_use]
    pub const fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Validates operation `op` against the current state and any pending
    /// transaction, returning the next state.
    pub fn check(&self, op: Opcode) -> Result<AseState, Rejection> {
        if self.pending.is_some() {
            return Err(Rejection::invalid_transition());
        }
        transition(self.state, op).ok_or_else(Rejection::invalid_transition)
    }

    /// Validates an operation received from the client. Receiver Start/Stop
    /// Ready are only sent by the client for Source ASEs ([ASCS] Section
    /// 5.4 and 5.6).
    pub fn check_remote(&self, op: Opcode) -> Result<AseState, Rejection> {
        if matches!(op, Opcode::ReceiverStartReady | Opcode::ReceiverStopReady)
            && self.dir == Direction::Sink
        {
            return Err(Rejection::plain(RspCode::InvalidAseDirection));
        }
        self.check(op)
    }

    /// Moves the ASE to a new state, dropping configuration that the state no
    /// longer carries.
    pub(crate) fn set_state(&mut self, s: AseState) {
        self.state = s;
        match s {
            AseState::Idle => {
                self.codec = None;
                self.qos = None;
                self.metadata = Ltv::new();
            }
            AseState::CodecConfigured => {
                self.qos = None;
                self.metadata = Ltv::new();
            }
            AseState::QosConfigured => self.metadata = Ltv::new(),
            AseState::Enabling | AseState::Streaming | AseState::Disabling | AseState::Releasing => {}
        }
    }
}
