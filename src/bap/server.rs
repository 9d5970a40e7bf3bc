use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::ascs::{
    Ase, AseLid, AseParams, AseState, AseValue, CodecCfg, CpOp, CpReq, CpRsp, CpRspEntry,
    Direction, Opcode, QosCfg, QosPref, Reason, Rejection, RspCode,
};
use crate::gatt::{self, Chr, ErrorCode};
use crate::iso::{self, DpState, Event, Manager, Role, StreamLid, StreamState};
use crate::ltv::Ltv;
use crate::{Arena, ConnLid};

use super::{ase_dir, dp_cfg, dp_dir, Error, Result, ServerCallbacks, ServerConfig};

/// Client request awaiting confirmation by the application.
#[derive(Clone, Debug)]
enum Req {
    ConfigCodec { codec: CodecCfg, fresh: bool },
    ConfigQos(QosCfg),
    Enable(Ltv),
    UpdateMetadata(Ltv),
    Disable,
    Release,
}

impl Req {
    const fn opcode(&self) -> Opcode {
        match *self {
            Self::ConfigCodec { .. } => Opcode::ConfigCodec,
            Self::ConfigQos(_) => Opcode::ConfigQos,
            Self::Enable(_) => Opcode::Enable,
            Self::UpdateMetadata(_) => Opcode::UpdateMetadata,
            Self::Disable => Opcode::Disable,
            Self::Release => Opcode::Release,
        }
    }
}

/// Per-ASE result of a Control Point write.
#[derive(Clone, Copy, Debug)]
struct Entry {
    ase_id: u8,
    lid: Option<AseLid>,
    /// Result, or [`None`] while awaiting confirmation.
    result: Option<std::result::Result<(), Rejection>>,
}

/// Control Point write awaiting confirmation of one or more ASEs.
#[derive(Debug)]
struct Txn {
    op: Opcode,
    entries: SmallVec<[Entry; 2]>,
    /// ASE values to notify after the Control Point response.
    values: Vec<(Chr, Vec<u8>)>,
}

impl Txn {
    fn has(&self, ase: AseLid) -> bool {
        self.entries.iter().any(|e| e.lid == Some(ase))
    }

    fn is_done(&self) -> bool {
        self.entries.iter().all(|e| e.result.is_some())
    }
}

/// Connected Client.
#[derive(Debug, Default)]
struct Conn {
    /// ASE records indexed by ASE_ID - 1.
    ases: SmallVec<[Option<AseLid>; 4]>,
    txns: Vec<Txn>,
}

/// BAP Unicast Server ([BAP] Section 5.7).
pub struct Server {
    cfg: ServerConfig,
    gatt: Box<dyn gatt::Server>,
    cb: Box<dyn ServerCallbacks>,
    ases: Arena<Ase>,
    conns: HashMap<ConnLid, Conn>,
    reqs: HashMap<AseLid, Req>,
    /// Outstanding data path update requests (`true` for start).
    dp_reqs: HashMap<AseLid, bool>,
    /// Released ASEs waiting for CIS disconnection, with the final idle flag.
    releasing: HashMap<AseLid, bool>,
}

impl Debug for Server {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("cfg", &self.cfg)
            .field("gatt", &self.gatt)
            .field("ases", &self.ases.len())
            .field("conns", &self.conns)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a new Server role.
    #[must_use]
    pub fn new(cfg: ServerConfig, gatt: Box<dyn gatt::Server>, cb: Box<dyn ServerCallbacks>) -> Self {
        let max_ases = u16::from(cfg.ases()) * u16::from(cfg.max_conns);
        Self {
            cfg,
            gatt,
            cb,
            ases: Arena::new(max_ases),
            conns: HashMap::new(),
            reqs: HashMap::new(),
            dp_reqs: HashMap::new(),
            releasing: HashMap::new(),
        }
    }

    /// Returns the ASE record.
    #[inline]
    #[must_use]
    pub fn ase(&self, ase: AseLid) -> Option<&Ase> {
        self.ases.get(ase)
    }

    /// Returns the ASE record of connection `con` with the specified ASE_ID.
    #[must_use]
    pub fn find_ase(&self, con: ConnLid, ase_id: u8) -> Option<AseLid> {
        let c = self.conns.get(&con)?;
        *c.ases.get(usize::from(ase_id.checked_sub(1)?))?
    }

    /// Answers [`ServerCallbacks::configure_codec_req`] with the preferred
    /// QoS or a rejection.
    pub fn configure_codec_cfm(
        &mut self,
        iso: &mut Manager,
        ase: AseLid,
        r: std::result::Result<QosPref, Rejection>,
    ) -> Result<()> {
        let (con, Req::ConfigCodec { codec, fresh }) = self.take_req(ase, Opcode::ConfigCodec)? else {
            return Err(Error::NoRequest(ase));
        };
        match r {
            Ok(pref) => {
                self.apply_codec(iso, ase, codec, pref);
                self.resolve(con, ase, Ok(()));
            }
            Err(rej) => {
                self.resolve(con, ase, Err(rej));
                if fresh {
                    self.free(ase);
                }
            }
        }
        Ok(())
    }

    /// Answers [`ServerCallbacks::configure_qos_req`]. On acceptance, the ASE
    /// is bound to the stream of the requested CIS.
    pub fn configure_qos_cfm(
        &mut self,
        iso: &mut Manager,
        ase: AseLid,
        r: std::result::Result<(), Rejection>,
    ) -> Result<()> {
        let (con, Req::ConfigQos(q)) = self.take_req(ase, Opcode::ConfigQos)? else {
            return Err(Error::NoRequest(ase));
        };
        let r = r.and_then(|_| self.bind(iso, con, ase, &q));
        if let Ok(stream) = r {
            let a = self.ase_mut(ase)?;
            a.qos = Some(q);
            a.stream = Some(stream);
            self.set_state(ase, AseState::QosConfigured);
        }
        self.resolve(con, ase, r.map(|_| ()));
        Ok(())
    }

    /// Answers [`ServerCallbacks::enable_req`].
    pub fn enable_cfm(
        &mut self,
        iso: &Manager,
        ase: AseLid,
        r: std::result::Result<(), Rejection>,
    ) -> Result<()> {
        let (con, Req::Enable(md)) = self.take_req(ase, Opcode::Enable)? else {
            return Err(Error::NoRequest(ase));
        };
        if r.is_ok() {
            let a = self.ase_mut(ase)?;
            a.metadata = md;
            let stream = a.stream;
            self.set_state(ase, AseState::Enabling);
            let est = stream.and_then(|s| iso.stream(s)).map_or(false, |s| s.state() == StreamState::Established);
            if est {
                self.dp_req(ase, true);
            }
        }
        self.resolve(con, ase, r);
        Ok(())
    }

    /// Answers [`ServerCallbacks::update_metadata_req`].
    pub fn update_metadata_cfm(&mut self, ase: AseLid, r: std::result::Result<(), Rejection>) -> Result<()> {
        let (con, Req::UpdateMetadata(md)) = self.take_req(ase, Opcode::UpdateMetadata)? else {
            return Err(Error::NoRequest(ase));
        };
        if r.is_ok() {
            self.ase_mut(ase)?.metadata = md;
            self.notify(ase);
        }
        self.resolve(con, ase, r);
        Ok(())
    }

    /// Answers [`ServerCallbacks::disable_req`].
    pub fn disable_cfm(
        &mut self,
        iso: &mut Manager,
        ase: AseLid,
        r: std::result::Result<(), Rejection>,
    ) -> Result<()> {
        let (con, _) = self.take_req(ase, Opcode::Disable)?;
        if r.is_ok() {
            self.apply_disable(iso, ase);
        }
        self.resolve(con, ase, r);
        Ok(())
    }

    /// Answers [`ServerCallbacks::release_req`]. The ASE moves to Idle if
    /// `idle` is set, or to Codec Configured with its codec configuration
    /// cached otherwise.
    pub fn release_cfm(
        &mut self,
        iso: &mut Manager,
        ase: AseLid,
        r: std::result::Result<(), Rejection>,
        idle: bool,
    ) -> Result<()> {
        let (con, _) = self.take_req(ase, Opcode::Release)?;
        if r.is_ok() {
            self.apply_release(iso, ase, idle);
        }
        self.resolve(con, ase, r);
        Ok(())
    }

    /// Answers [`ServerCallbacks::dp_update_req`].
    pub fn dp_update_cfm(&mut self, iso: &mut Manager, ase: AseLid, accept: bool) -> Result<()> {
        let start = self.dp_reqs.remove(&ase).ok_or(Error::NoRequest(ase))?;
        let a = self.ases.get(ase).ok_or(Error::InvalidAse(ase))?;
        let stream = a.stream.ok_or(Error::NotBound(ase))?;
        let dir = dp_dir(Role::Peripheral, a.dir);
        if start {
            if accept {
                iso.dp_setup(stream, dir, &dp_cfg(self.cfg.data_path_id, a.codec()))?;
            } else {
                debug!("Data path start declined for {ase}");
            }
            return Ok(());
        }
        let set_up = iso.stream(stream).map_or(false, |s| s.dp_state(dir) == DpState::SetUp);
        if accept && set_up {
            iso.dp_remove(stream, dir)?;
        } else if a.dir == Direction::Sink && a.state == AseState::Disabling {
            self.set_state(ase, AseState::QosConfigured);
        }
        Ok(())
    }

    /// Configures the codec of local ASE `instance` of type `dir` without a
    /// Client request.
    pub fn configure_codec(
        &mut self,
        iso: &mut Manager,
        con: ConnLid,
        dir: Direction,
        instance: u8,
        codec: CodecCfg,
        pref: QosPref,
    ) -> Result<AseLid> {
        let op = Opcode::ConfigCodec;
        let Some(ase_id) = self.ase_id(dir, instance) else {
            return Err(Error::InvalidInstance { con, dir, instance });
        };
        self.conn(con).map_err(|_| Error::NoResources)?;
        let (ase, fresh) = self.alloc(con, ase_id, dir, instance).ok_or(Error::NoResources)?;
        let r = self.check_op(ase, op).and_then(|_| {
            if codec.codec_id.is_valid() && codec.cfg.is_valid() {
                Ok(())
            } else {
                Err(Rejection::invalid_cfg(Reason::CodecSpecificConfiguration))
            }
        });
        if let Err(rej) = r {
            if fresh {
                self.free(ase);
            }
            return Err(Error::Rejected { ase, op, rej });
        }
        self.apply_codec(iso, ase, codec, pref);
        Ok(ase)
    }

    /// Disables an enabling or streaming ASE without a Client request.
    pub fn disable(&mut self, iso: &mut Manager, ase: AseLid) -> Result<()> {
        self.check(ase, Opcode::Disable)?;
        self.apply_disable(iso, ase);
        Ok(())
    }

    /// Releases an ASE without a Client request.
    pub fn release(&mut self, iso: &mut Manager, ase: AseLid, idle: bool) -> Result<()> {
        let a = self.ases.get(ase).ok_or(Error::InvalidAse(ase))?;
        if a.state == AseState::Idle && a.pending.is_none() {
            return Err(Error::AlreadyIdle(ase));
        }
        self.check(ase, Opcode::Release)?;
        self.apply_release(iso, ase, idle);
        Ok(())
    }

    /// Replaces the metadata of an enabling or streaming ASE without a
    /// Client request.
    pub fn update_metadata(&mut self, ase: AseLid, md: Ltv) -> Result<()> {
        let op = Opcode::UpdateMetadata;
        self.check(ase, op)?;
        if !md.is_valid() {
            let rej = Rejection::plain(RspCode::InvalidMetadata);
            return Err(Error::Rejected { ase, op, rej });
        }
        self.ase_mut(ase)?.metadata = md;
        self.notify(ase);
        Ok(())
    }

    /// Handles a characteristic read from a Client.
    pub(crate) fn read(&self, con: ConnLid, chr: Chr) -> std::result::Result<Vec<u8>, ErrorCode> {
        let Chr::Ase(dir, instance) = chr else {
            return Err(ErrorCode::ReadNotPermitted);
        };
        let id = self.ase_id(dir, instance).ok_or(ErrorCode::UnlikelyError)?;
        let v = match self.find_ase(con, id).and_then(|ase| self.ases.get(ase)) {
            Some(a) => AseValue::from(a),
            None => AseValue {
                id,
                state: AseState::Idle,
                params: AseParams::None,
            },
        };
        Ok(v.encode())
    }

    /// Handles a characteristic write from a Client. Control Point errors are
    /// reported by notification, so only access errors are returned.
    pub(crate) fn write(&mut self, iso: &Manager, con: ConnLid, chr: Chr, v: &[u8]) -> std::result::Result<(), ErrorCode> {
        if chr != Chr::AseCp {
            return Err(ErrorCode::WriteNotPermitted);
        }
        self.conn(con)?;
        trace!("{con} Control Point write: {v:02X?}");
        let req = match CpReq::decode(v) {
            Ok(req) => req,
            Err(rsp) => {
                warn!("Invalid Control Point write from {con}: {v:02X?}");
                self.send(con, Chr::AseCp, &rsp.encode());
                return Ok(());
            }
        };
        let mut entries = SmallVec::new();
        let mut ready: SmallVec<[(AseLid, AseState); 2]> = SmallVec::new();
        let mut reqs: SmallVec<[AseLid; 2]> = SmallVec::new();
        let mut seen: SmallVec<[u8; 4]> = SmallVec::new();
        for (ase_id, op) in req.ases {
            if seen.contains(&ase_id) {
                warn!("{} for ASE {ase_id:#04X} repeated by {con}", req.op);
                let rej = Rejection::invalid_transition();
                entries.push(Entry { ase_id, lid: None, result: Some(Err(rej)) });
                continue;
            }
            seen.push(ase_id);
            let e = match self.validate(iso, con, ase_id, op) {
                Ok((lid, Some(next))) => {
                    ready.push((lid, next));
                    Entry { ase_id, lid: Some(lid), result: Some(Ok(())) }
                }
                Ok((lid, None)) => {
                    reqs.push(lid);
                    Entry { ase_id, lid: Some(lid), result: None }
                }
                Err(rej) => {
                    warn!("{} for ASE {ase_id:#04X} on {con} rejected: {rej}", req.op);
                    Entry { ase_id, lid: None, result: Some(Err(rej)) }
                }
            };
            entries.push(e);
        }
        if let Some(c) = self.conns.get_mut(&con) {
            c.txns.push(Txn {
                op: req.op,
                entries,
                values: Vec::new(),
            });
        }
        for (ase, next) in ready {
            self.set_state(ase, next);
        }
        for ase in reqs {
            self.request(ase);
        }
        self.finish(con);
        Ok(())
    }

    /// Handles an isochronous event for a Peripheral stream.
    pub(crate) fn iso_event(&mut self, iso: &mut Manager, evt: &Event) {
        match *evt {
            Event::Enabled { stream, .. } => {
                for ase in self.bound(iso, stream) {
                    if self.ases.get(ase).map_or(false, |a| a.state == AseState::Enabling) {
                        self.dp_req(ase, true);
                    }
                }
            }
            Event::Disabled { stream, .. } => {
                for ase in self.bound(iso, stream) {
                    self.dp_reqs.remove(&ase);
                    if let Some(idle) = self.releasing.remove(&ase) {
                        self.finish_release(iso, ase, idle);
                    } else if (self.ases.get(ase))
                        .map_or(false, |a| a.dir == Direction::Sink && a.state == AseState::Disabling)
                    {
                        self.set_state(ase, AseState::QosConfigured);
                    }
                }
            }
            Event::DataPath {
                stream,
                dir,
                setup,
                status,
            } => {
                let Some(ase) = iso.stream(stream).and_then(|s| s.ase(ase_dir(Role::Peripheral, dir))) else {
                    return;
                };
                let Some(a) = self.ases.get(ase) else { return };
                match (setup, a.dir, a.state) {
                    (true, _, AseState::Disabling) if status.is_ok() => self.dp_req(ase, false),
                    (true, Direction::Sink, AseState::Enabling) if status.is_ok() => {
                        self.set_state(ase, AseState::Streaming);
                    }
                    (false, Direction::Sink, AseState::Disabling) => {
                        self.set_state(ase, AseState::QosConfigured);
                    }
                    _ => {}
                }
            }
            Event::GroupConfigured { .. } | Event::EstablishReq { .. } => {}
        }
    }

    /// Handles ACL connection loss. All ASEs of the connection are forced to
    /// Idle and their records are freed.
    pub(crate) fn disconnected(&mut self, iso: &mut Manager, con: ConnLid) {
        let Some(c) = self.conns.remove(&con) else { return };
        for ase in c.ases.into_iter().flatten() {
            self.reqs.remove(&ase);
            self.dp_reqs.remove(&ase);
            self.releasing.remove(&ase);
            let Some(a) = self.ases.remove(ase) else { continue };
            if let Some(s) = a.stream {
                iso.unbind_ase(s, ase);
            }
            debug!("{ase} lost with {con}");
            self.cb.ase_state(ase, None, AseState::Idle);
        }
    }

    /// Validates one ASE operation of a Control Point write. Returns the next
    /// state for operations that complete immediately, or [`None`] for
    /// requests forwarded to the application.
    fn validate(
        &mut self,
        iso: &Manager,
        con: ConnLid,
        ase_id: u8,
        op: std::result::Result<CpOp, Rejection>,
    ) -> std::result::Result<(AseLid, Option<AseState>), Rejection> {
        let Some((dir, instance)) = self.id_dir(ase_id) else {
            return Err(Rejection::plain(RspCode::InvalidAseId));
        };
        let op = op?;
        let opc = op.opcode();
        let (ase, fresh) = match self.find_ase(con, ase_id) {
            Some(ase) => (ase, false),
            None if opc == Opcode::ConfigCodec => (self.alloc(con, ase_id, dir, instance))
                .ok_or(Rejection::plain(RspCode::InsufficientResources))?,
            None => return Err(Rejection::invalid_transition()),
        };
        let r = (self.ases.get(ase))
            .map_or_else(|| Err(Rejection::invalid_transition()), |a| a.check_remote(opc))
            .and_then(|next| match op {
            CpOp::ConfigQos(ref q) => self.check_qos(iso, con, ase, q).map(|_| next),
            CpOp::ReceiverStartReady if !self.cis_established(iso, ase) => {
                Err(Rejection::invalid_transition())
            }
            _ => Ok(next),
        });
        let next = match r {
            Ok(next) => next,
            Err(rej) => {
                if fresh {
                    self.free(ase);
                }
                return Err(rej);
            }
        };
        let req = match op {
            CpOp::ReceiverStartReady | CpOp::ReceiverStopReady => return Ok((ase, Some(next))),
            CpOp::ConfigCodec(codec) => Req::ConfigCodec { codec, fresh },
            CpOp::ConfigQos(q) => Req::ConfigQos(q),
            CpOp::Enable(md) => Req::Enable(md),
            CpOp::UpdateMetadata(md) => Req::UpdateMetadata(md),
            CpOp::Disable => Req::Disable,
            CpOp::Release => Req::Release,
        };
        if let Some(a) = self.ases.get_mut(ase) {
            a.pending = Some(opc);
        }
        self.reqs.insert(ase, req);
        Ok((ase, None))
    }

    /// Returns whether the CIS of an ASE is established.
    fn cis_established(&self, iso: &Manager, ase: AseLid) -> bool {
        (self.ases.get(ase).and_then(|a| a.stream))
            .and_then(|s| iso.stream(s))
            .map_or(false, |s| s.state() == StreamState::Established)
    }

    /// Validates a QoS configuration against the preferences and the CIS
    /// mapping of other ASEs.
    fn check_qos(&self, iso: &Manager, con: ConnLid, ase: AseLid, q: &QosCfg) -> std::result::Result<(), Rejection> {
        let Some(a) = self.ases.get(ase) else {
            return Err(Rejection::invalid_transition());
        };
        a.qos_pref.check(q)?;
        let taken = (self.ases.iter()).any(|(other, o)| {
            other != ase
                && o.con == con
                && o.dir == a.dir
                && o.state.has_stream()
                && o.qos.map_or(false, |oq| oq.cig_id == q.cig_id && oq.cis_id == q.cis_id)
        });
        let busy = (iso.find_peer_stream(con, q.cig_id, q.cis_id))
            .and_then(|s| iso.stream(s))
            .map_or(false, |s| s.ase(a.dir).map_or(false, |o| o != ase));
        if taken || busy {
            return Err(Rejection::invalid_cfg(Reason::InvalidAseCisMapping));
        }
        Ok(())
    }

    /// Binds an ASE to the stream for its QoS configuration.
    fn bind(&mut self, iso: &mut Manager, con: ConnLid, ase: AseLid, q: &QosCfg) -> std::result::Result<StreamLid, Rejection> {
        let dir = self.ases.get(ase).map_or(Direction::Sink, |a| a.dir);
        let stream = iso.peer_stream(con, q.cig_id, q.cis_id).map_err(|e| {
            error!("Failed to create stream for {ase}: {e}");
            Rejection::plain(RspCode::InsufficientResources)
        })?;
        iso.bind_ase(stream, con, dir, ase, q.dir_params()).map_err(|e| {
            error!("Failed to bind {ase} to {stream}: {e}");
            iso.unbind_ase(stream, ase);
            match e {
                iso::Error::AseSlotBusy { .. } | iso::Error::ConnMismatch(_) => {
                    Rejection::invalid_cfg(Reason::InvalidAseCisMapping)
                }
                _ => Rejection::plain(RspCode::InsufficientResources),
            }
        })?;
        Ok(stream)
    }

    fn apply_codec(&mut self, iso: &mut Manager, ase: AseLid, codec: CodecCfg, pref: QosPref) {
        let Some(a) = self.ases.get_mut(ase) else { return };
        if let Some(s) = a.stream.take() {
            iso.unbind_ase(s, ase);
        }
        a.codec = Some(codec);
        a.qos_pref = pref;
        self.dp_reqs.remove(&ase);
        self.set_state(ase, AseState::CodecConfigured);
    }

    /// Moves an ASE to Disabling and stops its data path. Sink ASEs move on
    /// to QoS Configured once the data path is stopped.
    fn apply_disable(&mut self, iso: &Manager, ase: AseLid) {
        self.dp_reqs.remove(&ase);
        self.set_state(ase, AseState::Disabling);
        let Some(a) = self.ases.get(ase) else { return };
        let dp = (a.stream.and_then(|s| iso.stream(s)))
            .map_or(DpState::NotSetUp, |s| s.dp_state(dp_dir(Role::Peripheral, a.dir)));
        match dp {
            DpState::SetUp => self.dp_req(ase, false),
            DpState::NotSetUp if a.dir == Direction::Sink => {
                self.set_state(ase, AseState::QosConfigured);
            }
            _ => {}
        }
    }

    /// Moves an ASE to Releasing. The release completes once the CIS is
    /// disconnected, or immediately if the CIS is not established or still
    /// used by another ASE.
    fn apply_release(&mut self, iso: &mut Manager, ase: AseLid, idle: bool) {
        self.dp_reqs.remove(&ase);
        self.set_state(ase, AseState::Releasing);
        let Some(stream) = self.ases.get(ase).and_then(Ase::stream) else {
            return self.finish_release(iso, ase, idle);
        };
        let Some(s) = iso.stream(stream) else {
            return self.finish_release(iso, ase, idle);
        };
        let last = (s.ases()).all(|o| self.ases.get(o).map_or(true, |o| o.state == AseState::Releasing));
        if s.state() == StreamState::Established && last {
            debug!("{ase} waiting for {stream} disconnection");
            self.releasing.insert(ase, idle);
        } else {
            self.finish_release(iso, ase, idle);
        }
    }

    fn finish_release(&mut self, iso: &mut Manager, ase: AseLid, idle: bool) {
        let Some(a) = self.ases.get_mut(ase) else { return };
        if let Some(s) = a.stream.take() {
            let dir = dp_dir(Role::Peripheral, a.dir);
            if iso.stream(s).map_or(false, |s| s.dp_state(dir) == DpState::SetUp) {
                if let Err(e) = iso.dp_remove(s, dir) {
                    error!("Failed to remove data path of {s}: {e}");
                }
            }
            iso.unbind_ase(s, ase);
        }
        let next = if idle {
            AseState::Idle
        } else {
            AseState::CodecConfigured
        };
        self.set_state(ase, next);
    }

    /// Forwards a validated request to the application.
    fn request(&mut self, ase: AseLid) {
        let (Some(req), Some(a)) = (self.reqs.get(&ase), self.ases.get(ase)) else {
            return;
        };
        debug!("{} requested for {ase}", req.opcode());
        match *req {
            Req::ConfigCodec { ref codec, .. } => self.cb.configure_codec_req(ase, a.con, a.dir, codec),
            Req::ConfigQos(ref q) => self.cb.configure_qos_req(ase, q),
            Req::Enable(ref md) => self.cb.enable_req(ase, md),
            Req::UpdateMetadata(ref md) => self.cb.update_metadata_req(ase, md),
            Req::Disable => self.cb.disable_req(ase),
            Req::Release => self.cb.release_req(ase),
        }
    }

    /// Removes the pending request of `ase` for operation `op`.
    fn take_req(&mut self, ase: AseLid, op: Opcode) -> Result<(ConnLid, Req)> {
        let a = self.ases.get(ase).ok_or(Error::InvalidAse(ase))?;
        if self.reqs.get(&ase).map(Req::opcode) != Some(op) {
            return Err(Error::NoRequest(ase));
        }
        let con = a.con;
        self.reqs.remove(&ase).map(|r| (con, r)).ok_or(Error::NoRequest(ase))
    }

    /// Records the result of a confirmed request and completes the
    /// transaction if all of its ASEs are resolved.
    fn resolve(&mut self, con: ConnLid, ase: AseLid, r: std::result::Result<(), Rejection>) {
        if let Some(a) = self.ases.get_mut(ase) {
            a.pending = None;
        }
        if let Err(rej) = r {
            warn!("Request for {ase} rejected: {rej}");
        }
        let Some(c) = self.conns.get_mut(&con) else { return };
        let e = (c.txns.iter_mut().flat_map(|t| t.entries.iter_mut()))
            .find(|e| e.lid == Some(ase) && e.result.is_none());
        if let Some(e) = e {
            e.result = Some(r);
        }
        self.finish(con);
    }

    /// Sends responses for all completed transactions of `con`.
    fn finish(&mut self, con: ConnLid) {
        loop {
            let Some(c) = self.conns.get_mut(&con) else { return };
            let Some(i) = c.txns.iter().position(Txn::is_done) else { return };
            let t = c.txns.remove(i);
            let mut rsp = CpRsp::new(t.op);
            for e in &t.entries {
                rsp.ases.push(CpRspEntry::new(e.ase_id, e.result.unwrap_or(Ok(()))));
            }
            self.send(con, Chr::AseCp, &rsp.encode());
            for (chr, v) in t.values {
                self.send(con, chr, &v);
            }
        }
    }

    /// Moves an ASE to state `s` and notifies the Client.
    fn set_state(&mut self, ase: AseLid, s: AseState) {
        let Some(a) = self.ases.get_mut(ase) else { return };
        let (prev, con) = (a.state, a.con);
        a.set_state(s);
        if prev != s {
            debug!("{ase} {prev} -> {s}");
            self.cb.ase_state(ase, Some(con), s);
        }
        self.notify(ase);
    }

    /// Notifies the ASE value, deferring it until the Control Point response
    /// if the ASE is part of an open transaction. Sink ASEs never expose the
    /// Disabling state.
    fn notify(&mut self, ase: AseLid) {
        let Some(a) = self.ases.get(ase) else { return };
        if a.dir == Direction::Sink && a.state == AseState::Disabling {
            return;
        }
        let (con, chr) = (a.con, Chr::Ase(a.dir, a.instance));
        let v = AseValue::from(a).encode();
        let txn = (self.conns.get_mut(&con)).and_then(|c| c.txns.iter_mut().find(|t| t.has(ase)));
        match txn {
            Some(t) => t.values.push((chr, v)),
            None => self.send(con, chr, &v),
        }
    }

    fn send(&mut self, con: ConnLid, chr: Chr, v: &[u8]) {
        trace!("{con} {chr} notification: {v:02X?}");
        if let Err(e) = self.gatt.notify(con, chr, v) {
            error!("Failed to notify {chr} to {con}: {e}");
        }
    }

    fn check(&self, ase: AseLid, op: Opcode) -> Result<()> {
        self.ases.get(ase).ok_or(Error::InvalidAse(ase))?;
        self.check_op(ase, op).map_err(|rej| Error::Rejected { ase, op, rej })
    }

    fn check_op(&self, ase: AseLid, op: Opcode) -> std::result::Result<(), Rejection> {
        (self.ases.get(ase)).map_or_else(|| Err(Rejection::invalid_transition()), |a| a.check(op).map(|_| ()))
    }

    /// Asks the application to start or stop the data path of `ase`.
    fn dp_req(&mut self, ase: AseLid, start: bool) {
        if self.dp_reqs.insert(ase, start) != Some(start) {
            self.cb.dp_update_req(ase, start);
        }
    }

    fn bound(&self, iso: &Manager, stream: StreamLid) -> SmallVec<[AseLid; 2]> {
        iso.stream(stream).map(|s| s.ases().collect()).unwrap_or_default()
    }

    fn conn(&mut self, con: ConnLid) -> std::result::Result<&mut Conn, ErrorCode> {
        let n = self.conns.len();
        let ases = usize::from(self.cfg.ases());
        if !self.conns.contains_key(&con) && n >= usize::from(self.cfg.max_conns) {
            warn!("Too many Clients to accept {con}");
            return Err(ErrorCode::InsufficientResources);
        }
        Ok((self.conns.entry(con)).or_insert_with(|| Conn {
            ases: SmallVec::from_elem(None, ases),
            txns: Vec::new(),
        }))
    }

    /// Returns the ASE record for `ase_id`, allocating it if needed.
    fn alloc(&mut self, con: ConnLid, ase_id: u8, dir: Direction, instance: u8) -> Option<(AseLid, bool)> {
        if let Some(ase) = self.find_ase(con, ase_id) {
            return Some((ase, false));
        }
        let ase = self.ases.insert(Ase::new(con, instance, ase_id, dir))?;
        let slot = (self.conns.get_mut(&con)).and_then(|c| c.ases.get_mut(usize::from(ase_id - 1)));
        match slot {
            Some(slot) => *slot = Some(ase),
            None => {
                self.ases.remove(ase);
                return None;
            }
        }
        Some((ase, true))
    }

    fn free(&mut self, ase: AseLid) {
        let Some(a) = self.ases.remove(ase) else { return };
        let slot = (self.conns.get_mut(&a.con)).and_then(|c| c.ases.get_mut(usize::from(a.id - 1)));
        if let Some(slot) = slot {
            *slot = None;
        }
    }

    fn ase_mut(&mut self, ase: AseLid) -> Result<&mut Ase> {
        self.ases.get_mut(ase).ok_or(Error::InvalidAse(ase))
    }

    /// Returns the ASE type and instance index for `ase_id`. Sink ASEs are
    /// numbered first.
    fn id_dir(&self, ase_id: u8) -> Option<(Direction, u8)> {
        let sinks = self.cfg.sink_ases;
        match ase_id {
            0 => None,
            id if id <= sinks => Some((Direction::Sink, id - 1)),
            id if id <= self.cfg.ases() => Some((Direction::Source, id - sinks - 1)),
            _ => None,
        }
    }

    fn ase_id(&self, dir: Direction, instance: u8) -> Option<u8> {
        match dir {
            Direction::Sink if instance < self.cfg.sink_ases => Some(instance + 1),
            Direction::Source if instance < self.cfg.source_ases => Some(self.cfg.sink_ases + instance + 1),
            _ => None,
        }
    }
}
