//! ASE Control Point and ASE characteristic value encoding ([ASCS] Section 4
//! and 5).

use smallvec::SmallVec;
use structbuf::{Pack, Packer, StructBuf, Unpacker};
use tracing::{trace, warn};

use crate::iso::{Framing, Phy};
use crate::ltv::Ltv;

use super::*;

/// Maximum encoded PDU length.
const MAX_PDU: usize = 512;
/// Maximum Number_of_ASEs in a Control Point write, limited by the size of the
/// response.
pub const MAX_CP_ASES: usize = (MAX_PDU - 2) / 3;
/// Number_of_ASEs value used when the whole PDU is rejected.
const ALL_ASES: u8 = 0xFF;

/// Control Point operation for one ASE ([ASCS] Section 5.1-5.8).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CpOp {
    /// Codec configuration. The Controller delay is not transmitted.
    ConfigCodec(CodecCfg),
    ConfigQos(QosCfg),
    Enable(Ltv),
    ReceiverStartReady,
    Disable,
    ReceiverStopReady,
    UpdateMetadata(Ltv),
    Release,
}

impl CpOp {
    /// Returns the operation opcode.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match *self {
            Self::ConfigCodec(_) => Opcode::ConfigCodec,
            Self::ConfigQos(_) => Opcode::ConfigQos,
            Self::Enable(_) => Opcode::Enable,
            Self::ReceiverStartReady => Opcode::ReceiverStartReady,
            Self::Disable => Opcode::Disable,
            Self::ReceiverStopReady => Opcode::ReceiverStopReady,
            Self::UpdateMetadata(_) => Opcode::UpdateMetadata,
            Self::Release => Opcode::Release,
        }
    }

    /// Encodes a Control Point write for one or more ASEs. All operations
    /// must have the same opcode.
    #[must_use]
    pub fn encode(ases: &[(u8, Self)]) -> Vec<u8> {
        let Some(op) = ases.first().map(|(_, op)| op.opcode()) else {
            return Vec::new();
        };
        debug_assert!(ases.iter().all(|(_, v)| v.opcode() == op));
        let mut b = StructBuf::new(MAX_PDU);
        #[allow(clippy::cast_possible_truncation)]
        b.append().u8(op).u8(ases.len() as u8);
        for (id, v) in ases {
            v.pack(b.append().u8(*id));
        }
        b.as_ref().to_vec()
    }

    fn pack(&self, p: &mut Packer) {
        match *self {
            Self::ConfigCodec(ref c) => {
                p.u8(c.target_latency).u8(c.target_phy);
                put_codec_id(p, c.codec_id);
                put_ltv(p, &c.cfg);
            }
            Self::ConfigQos(ref q) => {
                p.u8(q.cig_id).u8(q.cis_id);
                put_u24(p, q.sdu_intv_us);
                p.u8(q.framing).u8(q.phy.bits()).u16(q.max_sdu).u8(q.rtn);
                p.u16(q.max_tlatency_ms);
                put_u24(p, q.pres_delay_us);
            }
            Self::Enable(ref md) | Self::UpdateMetadata(ref md) => put_ltv(p, md),
            Self::ReceiverStartReady | Self::Disable | Self::ReceiverStopReady | Self::Release => {}
        }
    }

    /// Decodes the parameters of one ASE, returning `None` if the PDU is
    /// truncated. Invalid parameter values are reported per ASE.
    fn unpack(op: Opcode, p: &mut Unpacker) -> Option<(u8, Result<Self, Rejection>)> {
        let id = p.u8();
        let v = match op {
            Opcode::ConfigCodec => {
                let (lat, phy) = (p.u8(), p.u8());
                let codec_id = read_codec_id(p);
                let cfg = read_ltv(p)?;
                (|| -> Result<Self, Rejection> {
                    let c = CodecCfg {
                        codec_id,
                        cfg,
                        target_latency: TargetLatency::try_from(lat)
                            .map_err(|_| Rejection::invalid_cfg(Reason::None))?,
                        target_phy: TargetPhy::try_from(phy)
                            .map_err(|_| Rejection::invalid_cfg(Reason::Phy))?,
                        ctl_delay_us: 0,
                    };
                    if !c.codec_id.is_valid() {
                        return Err(Rejection::invalid_cfg(Reason::CodecId));
                    }
                    if !c.cfg.is_valid() {
                        return Err(Rejection::invalid_cfg(Reason::CodecSpecificConfiguration));
                    }
                    Ok(Self::ConfigCodec(c))
                })()
            }
            Opcode::ConfigQos => {
                let (cig_id, cis_id) = (p.u8(), p.u8());
                let sdu_intv_us = read_u24(p);
                let (framing, phy, max_sdu, rtn) = (p.u8(), p.u8(), p.u16(), p.u8());
                let (max_tlatency_ms, pres_delay_us) = (p.u16(), read_u24(p));
                (|| -> Result<Self, Rejection> {
                    let q = QosCfg {
                        cig_id,
                        cis_id,
                        sdu_intv_us,
                        framing: Framing::try_from(framing)
                            .map_err(|_| Rejection::invalid_cfg(Reason::Framing))?,
                        phy: Phy::from_bits(phy).ok_or(Rejection::invalid_cfg(Reason::Phy))?,
                        max_sdu,
                        rtn,
                        max_tlatency_ms,
                        pres_delay_us,
                    };
                    q.validate()?;
                    Ok(Self::ConfigQos(q))
                })()
            }
            Opcode::Enable | Opcode::UpdateMetadata => {
                let md = read_ltv(p)?;
                if md.is_valid() {
                    Ok(if op == Opcode::Enable {
                        Self::Enable(md)
                    } else {
                        Self::UpdateMetadata(md)
                    })
                } else {
                    Err(Rejection::plain(RspCode::InvalidMetadata))
                }
            }
            Opcode::ReceiverStartReady => Ok(Self::ReceiverStartReady),
            Opcode::Disable => Ok(Self::Disable),
            Opcode::ReceiverStopReady => Ok(Self::ReceiverStopReady),
            Opcode::Release => Ok(Self::Release),
        };
        p.is_ok().then_some((id, v))
    }
}

/// Decoded Control Point write.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CpReq {
    pub op: Opcode,
    /// ASE_ID and operation or parameter rejection for each ASE.
    pub ases: SmallVec<[(u8, Result<CpOp, Rejection>); 2]>,
}

impl CpReq {
    /// Decodes a Control Point write. PDUs with an unsupported opcode or an
    /// invalid length are rejected as a whole ([ASCS] Section 5).
    pub fn decode(v: &[u8]) -> Result<Self, CpRsp> {
        trace!("CP write: {v:02X?}");
        let mut p = Unpacker::new(v);
        let raw = p.u8();
        let Ok(op) = Opcode::try_from(raw) else {
            warn!("Unsupported Control Point opcode: {raw:#04X}");
            return Err(CpRsp::all(raw, RspCode::UnsupportedOpcode));
        };
        let n = p.u8();
        if usize::from(n) > MAX_CP_ASES {
            warn!("Too many ASEs in {op} Control Point write: {n}");
            return Err(CpRsp::all(raw, RspCode::InvalidLength));
        }
        let mut ases = SmallVec::with_capacity(usize::from(n));
        for _ in 0..n {
            let Some(v) = CpOp::unpack(op, &mut p) else { break };
            ases.push(v);
        }
        if n == 0 || ases.len() != usize::from(n) || !p.is_ok() || !p.is_empty() {
            warn!("Invalid {op} Control Point length");
            return Err(CpRsp::all(raw, RspCode::InvalidLength));
        }
        Ok(Self { op, ases })
    }
}

/// Per-ASE Control Point response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CpRspEntry {
    pub ase_id: u8,
    pub code: RspCode,
    pub reason: u8,
}

impl CpRspEntry {
    /// Creates a response entry from an operation result.
    #[must_use]
    pub fn new(ase_id: u8, r: Result<(), Rejection>) -> Self {
        let e = r.err().unwrap_or(Rejection::plain(RspCode::Success));
        Self {
            ase_id,
            code: e.code,
            reason: e.reason,
        }
    }

    /// Returns the operation result.
    pub fn result(&self) -> Result<(), Rejection> {
        match self.code {
            RspCode::Success => Ok(()),
            code => Err(Rejection {
                code,
                reason: self.reason,
            }),
        }
    }
}

/// Control Point notification ([ASCS] Section 4.2).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CpRsp {
    /// Opcode of the request, which may be unsupported.
    pub op: u8,
    /// Whether the whole PDU was rejected.
    pub all: bool,
    pub ases: SmallVec<[CpRspEntry; 2]>,
}

impl CpRsp {
    /// Creates an empty response to opcode `op`.
    #[inline]
    #[must_use]
    pub fn new(op: Opcode) -> Self {
        Self {
            op: op.into(),
            all: false,
            ases: SmallVec::new(),
        }
    }

    /// Creates a response that rejects the whole PDU.
    #[must_use]
    pub fn all(op: u8, code: RspCode) -> Self {
        let mut ases = SmallVec::new();
        ases.push(CpRspEntry {
            ase_id: 0,
            code,
            reason: 0,
        });
        Self {
            op,
            all: true,
            ases,
        }
    }

    /// Returns the response opcode, if supported.
    #[inline]
    #[must_use]
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::try_from(self.op).ok()
    }

    /// Encodes the notification value.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut b = StructBuf::new(2 + 3 * self.ases.len());
        #[allow(clippy::cast_possible_truncation)]
        let n = if self.all { ALL_ASES } else { self.ases.len() as u8 };
        b.append().u8(self.op).u8(n);
        for e in &self.ases {
            b.append().u8(e.ase_id).u8(e.code).u8(e.reason);
        }
        b.as_ref().to_vec()
    }

    /// Decodes a notification value.
    #[must_use]
    pub fn decode(v: &[u8]) -> Option<Self> {
        let mut p = Unpacker::new(v);
        let (op, n) = (p.u8(), p.u8());
        let all = n == ALL_ASES;
        let mut ases = SmallVec::new();
        let count = if all { 1 } else { n };
        for _ in 0..count {
            let (ase_id, code, reason) = (p.u8(), p.u8(), p.u8());
            ases.push(CpRspEntry {
                ase_id,
                code: RspCode::try_from(code).unwrap_or(RspCode::UnspecifiedError),
                reason,
            });
        }
        (p.is_ok() && p.is_empty()).then_some(Self { op, all, ases })
    }
}

/// State-specific ASE characteristic parameters ([ASCS] Section 4.1).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AseParams {
    None,
    CodecConfigured {
        pref: QosPref,
        codec_id: CodecId,
        cfg: Ltv,
    },
    QosConfigured(QosCfg),
    /// Enabling, Streaming, and Disabling.
    Enabled {
        cig_id: u8,
        cis_id: u8,
        metadata: Ltv,
    },
}

/// ASE characteristic value ([ASCS] Section 4.1).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AseValue {
    pub id: u8,
    pub state: AseState,
    pub params: AseParams,
}

impl AseValue {
    /// Encodes the characteristic value.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut b = StructBuf::new(MAX_PDU);
        self.pack(&mut b.append());
        b.as_ref().to_vec()
    }

    fn pack(&self, p: &mut Packer) {
        p.u8(self.id).u8(self.state);
        match self.params {
            AseParams::None => {}
            AseParams::CodecConfigured {
                ref pref,
                codec_id: id,
                ref cfg,
            } => {
                p.u8(u8::from(!pref.unframed)).u8(pref.phy.bits()).u8(pref.rtn);
                p.u16(pref.max_tlatency_ms);
                put_u24(p, pref.pres_delay_min_us);
                put_u24(p, pref.pres_delay_max_us);
                put_u24(p, pref.pref_pres_delay_min_us);
                put_u24(p, pref.pref_pres_delay_max_us);
                put_codec_id(p, id);
                put_ltv(p, cfg);
            }
            AseParams::QosConfigured(ref q) => {
                p.u8(q.cig_id).u8(q.cis_id);
                put_u24(p, q.sdu_intv_us);
                p.u8(q.framing).u8(q.phy.bits()).u16(q.max_sdu).u8(q.rtn);
                p.u16(q.max_tlatency_ms);
                put_u24(p, q.pres_delay_us);
            }
            AseParams::Enabled {
                cig_id,
                cis_id,
                ref metadata,
            } => {
                p.u8(cig_id).u8(cis_id);
                put_ltv(p, metadata);
            }
        }
    }

    /// Decodes a characteristic value.
    #[must_use]
    pub fn decode(v: &[u8]) -> Option<Self> {
        let mut p = Unpacker::new(v);
        let id = p.u8();
        let state = AseState::try_from(p.u8()).ok()?;
        let params = match state {
            AseState::Idle | AseState::Releasing => AseParams::None,
            AseState::CodecConfigured => {
                let unframed = p.u8() == 0;
                let pref = QosPref {
                    unframed,
                    phy: Phy::from_bits_truncate(p.u8()),
                    rtn: p.u8(),
                    max_tlatency_ms: p.u16(),
                    pres_delay_min_us: read_u24(&mut p),
                    pres_delay_max_us: read_u24(&mut p),
                    pref_pres_delay_min_us: read_u24(&mut p),
                    pref_pres_delay_max_us: read_u24(&mut p),
                };
                let codec_id = read_codec_id(&mut p);
                AseParams::CodecConfigured {
                    pref,
                    codec_id,
                    cfg: read_ltv(&mut p)?,
                }
            }
            AseState::QosConfigured => AseParams::QosConfigured(QosCfg {
                cig_id: p.u8(),
                cis_id: p.u8(),
                sdu_intv_us: read_u24(&mut p),
                framing: Framing::try_from(p.u8()).ok()?,
                phy: Phy::from_bits_truncate(p.u8()),
                max_sdu: p.u16(),
                rtn: p.u8(),
                max_tlatency_ms: p.u16(),
                pres_delay_us: read_u24(&mut p),
            }),
            AseState::Enabling | AseState::Streaming | AseState::Disabling => AseParams::Enabled {
                cig_id: p.u8(),
                cis_id: p.u8(),
                metadata: read_ltv(&mut p)?,
            },
        };
        (p.is_ok() && p.is_empty()).then_some(Self { id, state, params })
    }
}

impl From<&Ase> for AseValue {
    fn from(a: &Ase) -> Self {
        let ids = a.qos.map_or((0, 0), |q| (q.cig_id, q.cis_id));
        let params = match a.state {
            AseState::Idle | AseState::Releasing => AseParams::None,
            AseState::CodecConfigured => {
                let c = a.codec.clone().unwrap_or_default();
                AseParams::CodecConfigured {
                    pref: a.qos_pref,
                    codec_id: c.codec_id,
                    cfg: c.cfg,
                }
            }
            AseState::QosConfigured => a.qos.map_or(AseParams::None, AseParams::QosConfigured),
            AseState::Enabling | AseState::Streaming | AseState::Disabling => AseParams::Enabled {
                cig_id: ids.0,
                cis_id: ids.1,
                metadata: a.metadata.clone(),
            },
        };
        Self {
            id: a.id,
            state: a.state,
            params,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn put_u24(p: &mut Packer, v: u32) {
    p.u16(v as u16).u8((v >> 16) as u8);
}

#[inline]
fn read_u24(p: &mut Unpacker) -> u32 {
    let lo = u32::from(p.u16());
    lo | u32::from(p.u8()) << 16
}

#[inline]
fn put_codec_id(p: &mut Packer, c: CodecId) {
    p.u8(c.format).u16(c.company).u16(c.vendor);
}

#[inline]
fn read_codec_id(p: &mut Unpacker) -> CodecId {
    CodecId {
        format: p.u8(),
        company: p.u16(),
        vendor: p.u16(),
    }
}

fn put_ltv(p: &mut Packer, v: &Ltv) {
    let n = u8::try_from(v.len()).unwrap_or(u8::MAX);
    p.u8(n).put(&v.as_bytes()[..usize::from(n)]);
}

/// Reads a length-prefixed LTV value.
fn read_ltv(p: &mut Unpacker) -> Option<Ltv> {
    let n = usize::from(p.u8());
    let v = p.skip(n)?;
    v.into_inner().map(Ltv::from)
}
