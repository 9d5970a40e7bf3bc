use std::collections::{HashMap, VecDeque};
use std::fmt::{Debug, Formatter};

use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::ascs::{
    Ase, AseLid, AseParams, AseState, AseValue, CodecCfg, CpOp, CpRsp, Direction, Opcode, QosCfg,
    Reason, Rejection, RspCode,
};
use crate::gatt::{self, Chr};
use crate::iso::{self, DpState, Event, GroupLid, Manager, Role, StreamLid, StreamState};
use crate::ltv::Ltv;
use crate::{Arena, ConnLid};

use super::{ase_dir, dp_cfg, dp_dir, ClientCallbacks, ClientConfig, Error, Result};

/// Control Point transaction awaiting completion.
#[derive(Clone, Debug)]
struct Txn {
    op: Opcode,
    /// ASE record was allocated for this transaction.
    fresh: bool,
    /// Success response received.
    acked: bool,
    /// ASE notification received.
    seen: bool,
    /// Requested codec configuration for Config Codec.
    codec: Option<CodecCfg>,
    /// Target group for Config QoS.
    group: Option<GroupLid>,
    /// Stream binding failure.
    err: Option<iso::Error>,
    /// Receiver ready operation to send once this transaction succeeds.
    then: Option<CpOp>,
}

impl Txn {
    const fn new(op: Opcode) -> Self {
        Self {
            op,
            fresh: false,
            acked: false,
            seen: false,
            codec: None,
            group: None,
            err: None,
            then: None,
        }
    }
}

/// Remote ASE characteristic.
#[derive(Clone, Copy, Debug, Default)]
struct Remote {
    /// ASE_ID, or zero until the first read.
    id: u8,
    lid: Option<AseLid>,
}

/// Discovered ASCS instance of a peer Server.
#[derive(Debug, Default)]
struct Peer {
    svc: gatt::Service,
    ready: bool,
    /// Outstanding discovery reads.
    reads: usize,
    sinks: SmallVec<[Remote; 4]>,
    sources: SmallVec<[Remote; 4]>,
    /// ASEs of outstanding Write Requests in submission order.
    writes: VecDeque<AseLid>,
}

impl Peer {
    fn remote(&self, dir: Direction, instance: u8) -> Option<&Remote> {
        match dir {
            Direction::Sink => self.sinks.get(usize::from(instance)),
            Direction::Source => self.sources.get(usize::from(instance)),
        }
    }

    fn remote_mut(&mut self, dir: Direction, instance: u8) -> Option<&mut Remote> {
        match dir {
            Direction::Sink => self.sinks.get_mut(usize::from(instance)),
            Direction::Source => self.sources.get_mut(usize::from(instance)),
        }
    }
}

/// BAP Unicast Client ([BAP] Section 5.6).
pub struct Client {
    cfg: ClientConfig,
    gatt: Box<dyn gatt::Client>,
    cb: Box<dyn ClientCallbacks>,
    ases: Arena<Ase>,
    peers: HashMap<ConnLid, Peer>,
    txns: HashMap<AseLid, Txn>,
    /// Outstanding data path update requests (`true` for start).
    dp_reqs: HashMap<AseLid, bool>,
}

impl Debug for Client {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cfg", &self.cfg)
            .field("gatt", &self.gatt)
            .field("ases", &self.ases.len())
            .field("peers", &self.peers)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new Client role.
    #[must_use]
    pub fn new(cfg: ClientConfig, gatt: Box<dyn gatt::Client>, cb: Box<dyn ClientCallbacks>) -> Self {
        Self {
            cfg,
            gatt,
            cb,
            ases: Arena::new(cfg.max_ases),
            peers: HashMap::new(),
            txns: HashMap::new(),
            dp_reqs: HashMap::new(),
        }
    }

    /// Returns the ASE record.
    #[inline]
    #[must_use]
    pub fn ase(&self, ase: AseLid) -> Option<&Ase> {
        self.ases.get(ase)
    }

    /// Returns the ASE record for a remote characteristic instance, if one
    /// has been allocated.
    #[must_use]
    pub fn find_ase(&self, con: ConnLid, dir: Direction, instance: u8) -> Option<AseLid> {
        self.peers.get(&con)?.remote(dir, instance)?.lid
    }

    /// Discovers the ASCS instance of peer `con`, subscribes to its
    /// characteristics, and reads all ASE values. Completion is reported via
    /// [`ClientCallbacks::discovered`].
    pub fn discover(&mut self, con: ConnLid) -> Result<()> {
        if self.peers.contains_key(&con) {
            return Err(Error::Gatt(gatt::Error::Busy));
        }
        self.gatt.discover(con)?;
        self.peers.insert(con, Peer::default());
        debug!("Discovering ASCS on {con}");
        Ok(())
    }

    /// Configures the codec of a remote ASE, allocating its record if needed.
    pub fn configure_codec(
        &mut self,
        con: ConnLid,
        dir: Direction,
        instance: u8,
        codec: CodecCfg,
    ) -> Result<AseLid> {
        let peer = (self.peers.get(&con))
            .filter(|p| p.ready)
            .ok_or(Error::UnknownConn(con))?;
        let r = *(peer.remote(dir, instance)).ok_or(Error::InvalidInstance { con, dir, instance })?;
        let (ase, fresh) = match r.lid {
            Some(ase) => (ase, false),
            None => {
                let mut a = Ase::new(con, instance, r.id, dir);
                a.reliable = self.cfg.reliable;
                (self.ases.insert(a).ok_or(Error::NoResources)?, true)
            }
        };
        let op = Opcode::ConfigCodec;
        let valid = (self.check(ase, op)).and_then(|_| {
            if !codec.codec_id.is_valid() {
                return Err(self.reject(ase, op, Rejection::invalid_cfg(Reason::CodecId)));
            }
            if !codec.cfg.is_valid() {
                let rej = Rejection::invalid_cfg(Reason::CodecSpecificConfiguration);
                return Err(self.reject(ase, op, rej));
            }
            Ok(())
        });
        let txn = Txn {
            fresh,
            codec: Some(codec.clone()),
            ..Txn::new(op)
        };
        let r = valid.and_then(|_| self.write(ase, CpOp::ConfigCodec(codec), txn));
        if let Err(e) = r {
            if fresh {
                self.ases.remove(ase);
            }
            return Err(e);
        }
        if let Some(r) = self.remote_mut(con, dir, instance) {
            r.lid = Some(ase);
        }
        Ok(ase)
    }

    /// Configures the QoS of an ASE, binding it to CIS `qos.cis_id` of
    /// `group` once the server accepts. The CIG ID is taken from the group.
    pub fn configure_qos(&mut self, iso: &Manager, ase: AseLid, group: GroupLid, mut qos: QosCfg) -> Result<()> {
        let op = Opcode::ConfigQos;
        self.check(ase, op)?;
        let g = iso.group(group).ok_or(iso::Error::InvalidGroup(group))?;
        qos.cig_id = g.cig_id();
        if let Err(rej) = qos.validate() {
            return Err(self.reject(ase, op, rej));
        }
        let a = self.ases.get(ase).ok_or(Error::InvalidAse(ase))?;
        iso.check_bind(group, qos.cis_id, a.con, a.dir, ase)?;
        let txn = Txn {
            group: Some(group),
            ..Txn::new(op)
        };
        self.write(ase, CpOp::ConfigQos(qos), txn)
    }

    /// Enables an ASE. The group of its stream must be committed.
    pub fn enable(&mut self, iso: &Manager, ase: AseLid, md: Ltv) -> Result<()> {
        let op = Opcode::Enable;
        self.check(ase, op)?;
        if !md.is_valid() {
            return Err(self.reject(ase, op, Rejection::plain(RspCode::InvalidMetadata)));
        }
        let stream = (self.ases.get(ase).and_then(Ase::stream)).ok_or(Error::NotBound(ase))?;
        let s = iso.stream(stream).ok_or(iso::Error::InvalidStream(stream))?;
        if !iso.group(s.group()).map_or(false, iso::Group::is_committed) {
            return Err(iso::Error::GroupNotCommitted(s.group()).into());
        }
        self.write(ase, CpOp::Enable(md), Txn::new(op))
    }

    /// Replaces the metadata of an enabling or streaming ASE.
    pub fn update_metadata(&mut self, ase: AseLid, md: Ltv) -> Result<()> {
        let op = Opcode::UpdateMetadata;
        self.check(ase, op)?;
        if !md.is_valid() {
            return Err(self.reject(ase, op, Rejection::plain(RspCode::InvalidMetadata)));
        }
        self.write(ase, CpOp::UpdateMetadata(md), Txn::new(op))
    }

    /// Disables an enabling or streaming ASE.
    pub fn disable(&mut self, ase: AseLid) -> Result<()> {
        let op = Opcode::Disable;
        self.check(ase, op)?;
        self.write(ase, CpOp::Disable, Txn::new(op))
    }

    /// Releases an ASE. The CIS is disconnected once all ASEs using it are
    /// released.
    pub fn release(&mut self, ase: AseLid) -> Result<()> {
        let a = self.ases.get(ase).ok_or(Error::InvalidAse(ase))?;
        if a.state == AseState::Idle && a.pending.is_none() {
            return Err(Error::AlreadyIdle(ase));
        }
        let op = Opcode::Release;
        self.check(ase, op)?;
        self.write(ase, CpOp::Release, Txn::new(op))
    }

    /// Sets the Control Point write type used for operations on an ASE.
    pub fn set_write_type(&mut self, ase: AseLid, reliable: bool) -> Result<()> {
        let a = self.ases.get_mut(ase).ok_or(Error::InvalidAse(ase))?;
        a.reliable = reliable;
        Ok(())
    }

    /// Answers [`ClientCallbacks::dp_update_req`].
    pub fn dp_update_cfm(&mut self, iso: &mut Manager, ase: AseLid, accept: bool) -> Result<()> {
        let start = self.dp_reqs.remove(&ase).ok_or(Error::NoRequest(ase))?;
        let a = self.ases.get(ase).ok_or(Error::InvalidAse(ase))?;
        let stream = a.stream.ok_or(Error::NotBound(ase))?;
        let dir = dp_dir(Role::Central, a.dir);
        let stopping = a.dir == Direction::Source && a.state == AseState::Disabling;
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
        } else if stopping {
            self.receiver_ready(ase, CpOp::ReceiverStopReady);
        }
        Ok(())
    }

    /// Handles ASCS discovery completion.
    pub(crate) fn discovered(&mut self, con: ConnLid, r: gatt::Result<gatt::Service>) {
        let Some(peer) = self.peers.get_mut(&con) else {
            warn!("Unexpected ASCS discovery for {con}");
            return;
        };
        let svc = match r {
            Ok(svc) if peer.sinks.is_empty() && peer.sources.is_empty() => svc,
            Ok(_) => return warn!("Duplicate ASCS discovery for {con}"),
            Err(e) => return self.fail_discovery(con, e),
        };
        debug!("Discovered ASCS on {con}: {svc:?}");
        peer.svc = svc;
        peer.sinks.resize(usize::from(svc.sink_ases), Remote::default());
        peer.sources.resize(usize::from(svc.source_ases), Remote::default());
        let chrs: SmallVec<[Chr; 8]> = (0..svc.sink_ases)
            .map(|i| Chr::Ase(Direction::Sink, i))
            .chain((0..svc.source_ases).map(|i| Chr::Ase(Direction::Source, i)))
            .collect();
        peer.reads = chrs.len();
        let mut r = Ok(());
        if self.cfg.subscribe {
            r = (std::iter::once(Chr::AseCp).chain(chrs.iter().copied()))
                .try_for_each(|chr| self.gatt.subscribe(con, chr));
        }
        let r = r.and_then(|_| chrs.iter().try_for_each(|&chr| self.gatt.read(con, chr)));
        if let Err(e) = r {
            return self.fail_discovery(con, e);
        }
        if chrs.is_empty() {
            self.discovery_done(con);
        }
    }

    /// Handles completion of an ASE characteristic read.
    pub(crate) fn read_done(&mut self, iso: &mut Manager, con: ConnLid, chr: Chr, r: gatt::Result<&[u8]>) {
        let Chr::Ase(dir, instance) = chr else { return };
        match r {
            Ok(v) => {
                trace!("{con} {chr} value: {v:02X?}");
                match AseValue::decode(v) {
                    Some(v) => self.update(iso, con, dir, instance, v),
                    None => warn!("Invalid {chr} value from {con}: {v:02X?}"),
                }
            }
            Err(e) => {
                error!("Failed to read {chr} from {con}: {e}");
                if self.peers.get(&con).map_or(false, |p| !p.ready) {
                    return self.fail_discovery(con, e);
                }
            }
        }
        let Some(peer) = self.peers.get_mut(&con) else { return };
        if !peer.ready {
            peer.reads = peer.reads.saturating_sub(1);
            if peer.reads == 0 {
                self.discovery_done(con);
            }
        }
    }

    /// Handles completion of a Control Point Write Request.
    pub(crate) fn written(&mut self, con: ConnLid, chr: Chr, r: gatt::Result<()>) {
        if chr != Chr::AseCp {
            return;
        }
        let Some(ase) = self.peers.get_mut(&con).and_then(|p| p.writes.pop_front()) else {
            warn!("Unexpected write completion from {con}");
            return;
        };
        if let Err(e) = r {
            error!("Control Point write for {ase} failed: {e}");
            self.complete(ase, Err(e.into()));
        }
    }

    /// Handles a notification from the peer Server.
    pub(crate) fn notified(&mut self, iso: &mut Manager, con: ConnLid, chr: Chr, v: &[u8]) {
        trace!("{con} {chr} notification: {v:02X?}");
        if !self.peers.contains_key(&con) {
            return;
        }
        match chr {
            Chr::AseCp => match CpRsp::decode(v) {
                Some(rsp) => self.cp_rsp(con, &rsp),
                None => warn!("Invalid Control Point notification from {con}"),
            },
            Chr::Ase(dir, instance) => match AseValue::decode(v) {
                Some(v) => self.update(iso, con, dir, instance, v),
                None => warn!("Invalid {chr} notification from {con}"),
            },
        }
    }

    /// Handles an isochronous event for a Central stream.
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
                }
            }
            Event::DataPath {
                stream,
                dir,
                setup,
                status,
            } => {
                let Some(ase) = iso.stream(stream).and_then(|s| s.ase(ase_dir(Role::Central, dir))) else {
                    return;
                };
                let Some(a) = self.ases.get(ase) else { return };
                if !status.is_ok() {
                    return;
                }
                // Disabled or released while the setup was in progress
                if setup && !matches!(a.state, AseState::Enabling | AseState::Streaming) {
                    debug!("Removing stale data path of {ase}");
                    self.dp_req(ase, false);
                    return;
                }
                if a.dir != Direction::Source {
                    return;
                }
                match (setup, a.state) {
                    (true, AseState::Enabling) => self.receiver_ready(ase, CpOp::ReceiverStartReady),
                    (false, AseState::Disabling) => self.receiver_ready(ase, CpOp::ReceiverStopReady),
                    _ => {}
                }
            }
            Event::GroupConfigured { .. } | Event::EstablishReq { .. } => {}
        }
    }

    /// Handles ACL connection loss. All ASEs of the connection are forced to
    /// Idle and their records are freed.
    pub(crate) fn disconnected(&mut self, iso: &mut Manager, con: ConnLid) {
        if self.peers.remove(&con).is_none() {
            return;
        }
        for ase in self.ases.filter(|a| a.con == con) {
            if let Some(txn) = self.txns.remove(&ase) {
                let e = Error::Gatt(gatt::Error::Disconnected);
                self.cb.cp_complete(ase, txn.op, Err(e));
            }
            self.dp_reqs.remove(&ase);
            let Some(a) = self.ases.remove(ase) else { continue };
            if let Some(s) = a.stream {
                iso.unbind_ase(s, ase);
            }
            debug!("{ase} lost with {con}");
            self.cb.ase_state(ase, None, AseState::Idle);
        }
    }

    /// Applies an ASE value read or notified by the Server.
    fn update(&mut self, iso: &mut Manager, con: ConnLid, dir: Direction, instance: u8, v: AseValue) {
        let Some(r) = self.remote_mut(con, dir, instance) else {
            return warn!("Unknown {dir} ASE {instance} on {con}");
        };
        r.id = v.id;
        let ase = match r.lid {
            Some(ase) => ase,
            None if v.state == AseState::Idle => return,
            None => {
                let mut a = Ase::new(con, instance, v.id, dir);
                a.reliable = self.cfg.reliable;
                let Some(ase) = self.ases.insert(a) else {
                    return error!("No ASE record for {dir} ASE {instance} on {con}");
                };
                if let Some(r) = self.remote_mut(con, dir, instance) {
                    r.lid = Some(ase);
                }
                ase
            }
        };
        let Some(a) = self.ases.get_mut(ase) else { return };
        let prev = a.state;
        a.id = v.id;
        a.set_state(v.state);
        let mut txn = self.txns.get_mut(&ase);
        match v.params {
            AseParams::None => {}
            AseParams::CodecConfigured { pref, codec_id, cfg } => {
                let mut c = (txn.as_ref().and_then(|t| t.codec.clone()))
                    .or_else(|| a.codec.take())
                    .unwrap_or_default();
                c.codec_id = codec_id;
                c.cfg = cfg;
                a.codec = Some(c);
                a.qos_pref = pref;
            }
            AseParams::QosConfigured(q) => a.qos = Some(q),
            AseParams::Enabled { metadata, .. } => a.metadata = metadata,
        }
        if prev != v.state {
            debug!("{ase} {prev} -> {}", v.state);
        }

        // Stream binding
        match v.state {
            AseState::Idle | AseState::CodecConfigured => {
                if let Some(s) = a.stream.take() {
                    iso.unbind_ase(s, ase);
                    self.dp_reqs.remove(&ase);
                }
            }
            AseState::QosConfigured if a.stream.is_none() => {
                let group = txn.as_ref().and_then(|t| t.group);
                match (group, a.qos) {
                    (Some(group), Some(q)) => {
                        let r = (iso.central_stream(group, q.cis_id))
                            .and_then(|s| iso.bind_ase(s, con, dir, ase, q.dir_params()).map(|_| s));
                        match r {
                            Ok(s) => a.stream = Some(s),
                            Err(e) => {
                                error!("Failed to bind {ase} to CIS {:#04X}: {e}", q.cis_id);
                                if let Some(t) = txn.as_mut() {
                                    t.err = Some(e);
                                }
                            }
                        }
                    }
                    _ => warn!("{ase} is QoS configured without a local stream"),
                }
            }
            _ => {}
        }
        if let Some(t) = txn {
            t.seen = true;
        }

        // Callbacks
        let Some(a) = self.ases.get(ase) else { return };
        if prev != v.state {
            self.cb.ase_state(ase, Some(con), v.state);
        }
        match v.state {
            AseState::CodecConfigured => {
                if let Some(c) = a.codec.as_ref() {
                    self.cb.codec_configured(ase, c, &a.qos_pref);
                }
            }
            AseState::QosConfigured if prev == AseState::CodecConfigured => {
                if let Some(q) = a.qos.as_ref() {
                    self.cb.qos_configured(ase, q, a.stream);
                }
            }
            AseState::Enabling | AseState::Streaming => self.cb.metadata(ase, &a.metadata),
            _ => {}
        }

        // Stream and data path control
        let stream = a.stream;
        let adir = a.dir;
        if let Some(stream) = stream {
            self.drive(iso, ase, stream, adir, prev, v.state);
        }
        if self.txns.get(&ase).map_or(false, |t| t.acked && t.seen) {
            self.complete_txn(ase);
        }
    }

    /// Performs CIS and data path actions after an ASE state change.
    fn drive(&mut self, iso: &mut Manager, ase: AseLid, stream: StreamLid, dir: Direction, prev: AseState, next: AseState) {
        let Some(s) = iso.stream(stream) else { return };
        let st = s.state();
        let dp = s.dp_state(dp_dir(Role::Central, dir));
        match next {
            AseState::Enabling if prev != AseState::Enabling => match st {
                StreamState::Configured | StreamState::Disconnected => {
                    if let Err(e) = iso.us_enable(stream) {
                        error!("Failed to enable {stream} for {ase}: {e}");
                    }
                }
                StreamState::Established => self.dp_req(ase, true),
                _ => {}
            },
            AseState::Disabling if prev != AseState::Disabling => {
                if dp == DpState::NotSetUp {
                    self.receiver_ready(ase, CpOp::ReceiverStopReady);
                } else {
                    self.dp_req(ase, false);
                }
            }
            AseState::QosConfigured if prev.has_metadata() && dp != DpState::NotSetUp => {
                self.dp_req(ase, false);
            }
            AseState::Releasing if st == StreamState::Established => {
                let done = (s.ases()).all(|a| self.ases.get(a).map_or(true, |a| a.state == AseState::Releasing));
                if done {
                    if let Err(e) = iso.us_disable(stream) {
                        error!("Failed to disable {stream}: {e}");
                    }
                }
            }
            _ => {}
        }
    }

    /// Handles a Control Point notification.
    fn cp_rsp(&mut self, con: ConnLid, rsp: &CpRsp) {
        if rsp.all {
            let rej = rsp.ases.first().map_or_else(
                || Rejection::plain(RspCode::UnspecifiedError),
                |e| Rejection::new(e.code, e.reason),
            );
            warn!("{con} rejected Control Point opcode {:#04X}: {rej}", rsp.op);
            let ases: SmallVec<[AseLid; 4]> = (self.txns.iter())
                .filter(|(&ase, t)| {
                    !t.acked && u8::from(t.op) == rsp.op && self.ases.get(ase).map_or(false, |a| a.con == con)
                })
                .map(|(&ase, _)| ase)
                .collect();
            for ase in ases {
                let op = self.txns[&ase].op;
                self.complete(ase, Err(Error::Rejected { ase, op, rej }));
            }
            return;
        }
        for e in &rsp.ases {
            let Some(ase) = self.ases.find(|a| a.con == con && a.id == e.ase_id) else {
                warn!("Control Point response for unknown ASE {:#04X} from {con}", e.ase_id);
                continue;
            };
            let Some(t) = self.txns.get_mut(&ase).filter(|t| u8::from(t.op) == rsp.op) else {
                warn!("Unexpected Control Point response for {ase}");
                continue;
            };
            match e.result() {
                Ok(()) => {
                    t.acked = true;
                    if t.seen {
                        self.complete_txn(ase);
                    }
                }
                Err(rej) => {
                    let op = t.op;
                    warn!("{op} for {ase} rejected: {rej}");
                    self.complete(ase, Err(Error::Rejected { ase, op, rej }));
                }
            }
        }
    }

    /// Completes an acknowledged transaction.
    fn complete_txn(&mut self, ase: AseLid) {
        let err = self.txns.get_mut(&ase).and_then(|t| t.err.take());
        self.complete(ase, err.map_or(Ok(()), |e| Err(e.into())));
    }

    /// Ends the transaction of `ase` with the specified result.
    fn complete(&mut self, ase: AseLid, r: Result<()>) {
        let Some(mut txn) = self.txns.remove(&ase) else { return };
        if let Some(a) = self.ases.get_mut(ase) {
            a.pending = None;
        }
        if r.is_err() && txn.fresh {
            if let Some(a) = self.ases.remove(ase) {
                if let Some(r) = self.remote_mut(a.con, a.dir, a.instance) {
                    r.lid = None;
                }
            }
        }
        let next = if r.is_ok() { txn.then.take() } else { None };
        self.cb.cp_complete(ase, txn.op, r);
        if let Some(op) = next {
            self.receiver_ready(ase, op);
        }
    }

    /// Sends Receiver Start Ready or Receiver Stop Ready for a Source ASE, or
    /// queues it behind the current transaction.
    fn receiver_ready(&mut self, ase: AseLid, op: CpOp) {
        if let Some(t) = self.txns.get_mut(&ase) {
            trace!("{} for {ase} waits for {}", op.opcode(), t.op);
            t.then = Some(op);
            return;
        }
        let opcode = op.opcode();
        if let Err(e) = self.check(ase, opcode).and_then(|_| self.write(ase, op, Txn::new(opcode))) {
            error!("Failed to send {opcode} for {ase}: {e}");
        }
    }

    /// Validates operation `op` against the local copy of the ASE state.
    fn check(&self, ase: AseLid, op: Opcode) -> Result<()> {
        let a = self.ases.get(ase).ok_or(Error::InvalidAse(ase))?;
        if !self.peers.get(&a.con).map_or(false, |p| p.ready) {
            return Err(Error::UnknownConn(a.con));
        }
        match a.check(op) {
            Ok(_) => Ok(()),
            Err(rej) => Err(self.reject(ase, op, rej)),
        }
    }

    /// Returns a local rejection error.
    fn reject(&self, ase: AseLid, op: Opcode, rej: Rejection) -> Error {
        warn!("{op} for {ase} rejected locally: {rej}");
        Error::Rejected { ase, op, rej }
    }

    /// Writes a Control Point operation for a single ASE and starts a
    /// transaction.
    fn write(&mut self, ase: AseLid, op: CpOp, txn: Txn) -> Result<()> {
        if self.txns.contains_key(&ase) {
            return Err(self.reject(ase, txn.op, Rejection::invalid_transition()));
        }
        let a = self.ases.get_mut(ase).ok_or(Error::InvalidAse(ase))?;
        let pdu = CpOp::encode(&[(a.id, op)]);
        trace!("{} Control Point write: {pdu:02X?}", a.con);
        self.gatt.write(a.con, Chr::AseCp, &pdu, a.reliable)?;
        if a.reliable {
            if let Some(p) = self.peers.get_mut(&a.con) {
                p.writes.push_back(ase);
            }
        }
        a.pending = Some(txn.op);
        debug!("{} requested for {ase}", txn.op);
        self.txns.insert(ase, txn);
        Ok(())
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

    fn remote_mut(&mut self, con: ConnLid, dir: Direction, instance: u8) -> Option<&mut Remote> {
        self.peers.get_mut(&con)?.remote_mut(dir, instance)
    }

    fn discovery_done(&mut self, con: ConnLid) {
        let Some(peer) = self.peers.get_mut(&con) else { return };
        peer.ready = true;
        let svc = peer.svc;
        debug!("ASCS on {con} is ready");
        self.cb.discovered(con, Ok(svc));
    }

    fn fail_discovery(&mut self, con: ConnLid, e: gatt::Error) {
        error!("ASCS discovery on {con} failed: {e}");
        self.peers.remove(&con);
        for ase in self.ases.filter(|a| a.con == con) {
            self.ases.remove(ase);
        }
        self.cb.discovered(con, Err(e.into()));
    }
}
