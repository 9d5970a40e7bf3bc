use std::sync::Arc;

use matches::assert_matches;

use crate::ascs::{Ase, AseParams, AseValue, CodecId, CpOp, CpRsp, CpRspEntry, Reason, RspCode};
use crate::gatt::{Chr, ErrorCode, Service};
use crate::iso::tests::{Call, MockCtl};
use crate::iso::{CisConfig, ConnHandle, DpState, GroupParams, Status, StreamParams, StreamState};
use crate::ltv::lc3;
use crate::{Stack, SyncMutex};

use super::*;

const CON: ConnLid = ConnLid(1);

/// GATT operation recorded by [`MockGatt`].
#[derive(Clone, Debug, Eq, PartialEq)]
enum Op {
    Discover(ConnLid),
    Read(ConnLid, Chr),
    Subscribe(ConnLid, Chr),
    Write(ConnLid, Chr, Vec<u8>, bool),
    Notify(ConnLid, Chr, Vec<u8>),
}

/// GATT transport that records all operations and always succeeds.
#[derive(Clone, Debug, Default)]
struct MockGatt(Arc<SyncMutex<Vec<Op>>>);

impl MockGatt {
    fn take(&self) -> Vec<Op> {
        std::mem::take(&mut *self.0.lock())
    }

    fn push(&self, op: Op) -> gatt::Result<()> {
        self.0.lock().push(op);
        Ok(())
    }
}

impl gatt::Client for MockGatt {
    fn discover(&mut self, con: ConnLid) -> gatt::Result<()> {
        self.push(Op::Discover(con))
    }

    fn read(&mut self, con: ConnLid, chr: Chr) -> gatt::Result<()> {
        self.push(Op::Read(con, chr))
    }

    fn subscribe(&mut self, con: ConnLid, chr: Chr) -> gatt::Result<()> {
        self.push(Op::Subscribe(con, chr))
    }

    fn write(&mut self, con: ConnLid, chr: Chr, val: &[u8], reliable: bool) -> gatt::Result<()> {
        self.push(Op::Write(con, chr, val.to_vec(), reliable))
    }
}

impl gatt::Server for MockGatt {
    fn notify(&mut self, con: ConnLid, chr: Chr, val: &[u8]) -> gatt::Result<()> {
        self.push(Op::Notify(con, chr, val.to_vec()))
    }
}

/// Application callback recorded by [`Rec`].
#[derive(Clone, Debug)]
enum Evt {
    Discovered(ConnLid, Result<Service>),
    CpComplete(AseLid, Opcode, Result<()>),
    AseState(AseLid, Option<ConnLid>, AseState),
    CodecConfigured(AseLid, CodecCfg, QosPref),
    QosConfigured(AseLid, QosCfg, Option<StreamLid>),
    Metadata(AseLid, Ltv),
    DpUpdateReq(AseLid, bool),
    ConfigureCodecReq(AseLid, ConnLid, Direction, CodecCfg),
    ConfigureQosReq(AseLid, QosCfg),
    EnableReq(AseLid, Ltv),
    UpdateMetadataReq(AseLid, Ltv),
    DisableReq(AseLid),
    ReleaseReq(AseLid),
    Disabled(StreamLid, Status),
}

/// Callbacks that record all calls. CIS requests are always accepted.
#[derive(Clone, Debug, Default)]
struct Rec(Arc<SyncMutex<Vec<Evt>>>);

impl Rec {
    fn take(&self) -> Vec<Evt> {
        std::mem::take(&mut *self.0.lock())
    }

    fn push(&self, e: Evt) {
        self.0.lock().push(e);
    }
}

impl ClientCallbacks for Rec {
    fn discovered(&mut self, con: ConnLid, r: Result<Service>) {
        self.push(Evt::Discovered(con, r));
    }

    fn cp_complete(&mut self, ase: AseLid, op: Opcode, r: Result<()>) {
        self.push(Evt::CpComplete(ase, op, r));
    }

    fn ase_state(&mut self, ase: AseLid, con: Option<ConnLid>, state: AseState) {
        self.push(Evt::AseState(ase, con, state));
    }

    fn codec_configured(&mut self, ase: AseLid, codec: &CodecCfg, pref: &QosPref) {
        self.push(Evt::CodecConfigured(ase, codec.clone(), *pref));
    }

    fn qos_configured(&mut self, ase: AseLid, qos: &QosCfg, stream: Option<StreamLid>) {
        self.push(Evt::QosConfigured(ase, *qos, stream));
    }

    fn metadata(&mut self, ase: AseLid, md: &Ltv) {
        self.push(Evt::Metadata(ase, md.clone()));
    }

    fn dp_update_req(&mut self, ase: AseLid, start: bool) {
        self.push(Evt::DpUpdateReq(ase, start));
    }
}

impl ServerCallbacks for Rec {
    fn configure_codec_req(&mut self, ase: AseLid, con: ConnLid, dir: Direction, codec: &CodecCfg) {
        self.push(Evt::ConfigureCodecReq(ase, con, dir, codec.clone()));
    }

    fn configure_qos_req(&mut self, ase: AseLid, qos: &QosCfg) {
        self.push(Evt::ConfigureQosReq(ase, *qos));
    }

    fn enable_req(&mut self, ase: AseLid, md: &Ltv) {
        self.push(Evt::EnableReq(ase, md.clone()));
    }

    fn update_metadata_req(&mut self, ase: AseLid, md: &Ltv) {
        self.push(Evt::UpdateMetadataReq(ase, md.clone()));
    }

    fn disable_req(&mut self, ase: AseLid) {
        self.push(Evt::DisableReq(ase));
    }

    fn release_req(&mut self, ase: AseLid) {
        self.push(Evt::ReleaseReq(ase));
    }

    fn dp_update_req(&mut self, ase: AseLid, start: bool) {
        self.push(Evt::DpUpdateReq(ase, start));
    }

    fn ase_state(&mut self, ase: AseLid, con: Option<ConnLid>, state: AseState) {
        self.push(Evt::AseState(ase, con, state));
    }
}

impl iso::Callbacks for Rec {
    fn establish_req(&mut self, _: StreamLid, _: ConnLid, _: u8, _: u8) -> bool {
        true
    }

    fn disabled(&mut self, stream: StreamLid, reason: Status) {
        self.push(Evt::Disabled(stream, reason));
    }
}

/// Test fixture with mock transports.
struct Fix {
    st: Stack,
    gatt: MockGatt,
    ctl: MockCtl,
    rec: Rec,
}

impl Fix {
    fn new() -> Self {
        let (gatt, ctl, rec) = (MockGatt::default(), MockCtl::default(), Rec::default());
        let st = Stack::new(Box::new(ctl.clone()), &iso::Config::default(), Box::new(rec.clone()));
        Self { st, gatt, ctl, rec }
    }

    fn client() -> Self {
        let mut f = Self::new();
        let (gatt, rec) = (Box::new(f.gatt.clone()), Box::new(f.rec.clone()));
        f.st = f.st.with_client(ClientConfig::default(), gatt, rec);
        f
    }

    fn server() -> Self {
        let mut f = Self::new();
        let (gatt, rec) = (Box::new(f.gatt.clone()), Box::new(f.rec.clone()));
        f.st = f.st.with_server(ServerConfig::default(), gatt, rec);
        f
    }

    /// Discovers one Sink (ASE_ID 1) and one Source (ASE_ID 2) ASE.
    fn discover(&mut self) {
        self.st.cli_discover(CON).unwrap();
        let svc = Service {
            sink_ases: 1,
            source_ases: 1,
        };
        self.st.gatt_discovered(CON, Ok(svc));
        let (sink, src) = (Chr::Ase(Direction::Sink, 0), Chr::Ase(Direction::Source, 0));
        assert_eq!(
            self.gatt.take(),
            [
                Op::Discover(CON),
                Op::Subscribe(CON, Chr::AseCp),
                Op::Subscribe(CON, sink),
                Op::Subscribe(CON, src),
                Op::Read(CON, sink),
                Op::Read(CON, src),
            ]
        );
        self.st.gatt_read(CON, sink, Ok(&[0x01, 0x00]));
        assert!(self.rec.take().is_empty());
        self.st.gatt_read(CON, src, Ok(&[0x02, 0x00]));
        assert_matches!(&self.rec.take()[..], [Evt::Discovered(CON, Ok(s))] if *s == svc);
    }

    /// Answers the last Control Point write with success and notifies the
    /// ASE value.
    fn accept(&mut self, id: u8, op: Opcode, state: AseState, params: AseParams) {
        assert_matches!(&self.gatt.take()[..], [Op::Write(CON, Chr::AseCp, v, true)] if v[0] == u8::from(op));
        self.st.gatt_written(CON, Chr::AseCp, Ok(()));
        let mut rsp = CpRsp::new(op);
        rsp.ases.push(CpRspEntry::new(id, Ok(())));
        self.st.gatt_notified(CON, Chr::AseCp, &rsp.encode());
        self.notify(id, state, params);
    }

    fn notify(&mut self, id: u8, state: AseState, params: AseParams) {
        let dir = if id == 1 { Direction::Sink } else { Direction::Source };
        let v = AseValue { id, state, params }.encode();
        self.st.gatt_notified(CON, Chr::Ase(dir, 0), &v);
    }

    /// Configures the codec of a discovered ASE.
    fn codec(&mut self, dir: Direction) -> AseLid {
        let id = if dir == Direction::Sink { 1 } else { 2 };
        let ase = self.st.cli_configure_codec(CON, dir, 0, codec()).unwrap();
        let params = AseParams::CodecConfigured {
            pref: QosPref::default(),
            codec_id: CodecId::LC3,
            cfg: codec().cfg,
        };
        self.accept(id, Opcode::ConfigCodec, AseState::CodecConfigured, params);
        assert_matches!(
            &self.rec.take()[..],
            [
                Evt::AseState(a, Some(CON), AseState::CodecConfigured),
                Evt::CodecConfigured(b, c, _),
                Evt::CpComplete(d, Opcode::ConfigCodec, Ok(())),
            ] if *a == ase && *b == ase && *d == ase && *c == codec()
        );
        ase
    }

    /// Configures QoS for CIS 2 of a new group with CIG ID 1.
    fn qos(&mut self, ase: AseLid) -> (iso::GroupLid, StreamLid) {
        let id = self.st.client().unwrap().ase(ase).unwrap().id();
        let g = self.st.iso_mut().ug_add(1, GroupParams::default()).unwrap();
        let s = self.st.iso_mut().us_add(g, 2, StreamParams::default()).unwrap();
        self.st.cli_configure_qos(ase, g, qos()).unwrap();
        self.accept(id, Opcode::ConfigQos, AseState::QosConfigured, AseParams::QosConfigured(qos()));
        assert_matches!(
            &self.rec.take()[..],
            [
                Evt::AseState(_, _, AseState::QosConfigured),
                Evt::QosConfigured(_, q, Some(b)),
                Evt::CpComplete(_, Opcode::ConfigQos, Ok(())),
            ] if *q == qos() && *b == s
        );
        (g, s)
    }

    /// Enables a Sink ASE and starts its data path.
    fn stream(&mut self) -> (AseLid, iso::GroupLid, StreamLid) {
        self.discover();
        let ase = self.codec(Direction::Sink);
        let (g, s) = self.qos(ase);
        self.st.iso_mut().ug_config(g).unwrap();
        self.st.cig_configured(1, Status::Success);
        assert_eq!(self.ctl.take(), [Call::SetCigParams(1, vec![2])]);

        self.st.cli_enable(ase, md()).unwrap();
        self.accept(1, Opcode::Enable, AseState::Enabling, enabled());
        assert_eq!(self.ctl.take(), [Call::CreateCis(1, 2, CON)]);
        self.st.cis_established(CON, 1, 2, Ok((hdl(), CisConfig::default())));
        assert_matches!(
            &self.rec.take()[..],
            [
                Evt::AseState(_, _, AseState::Enabling),
                Evt::Metadata(_, m),
                Evt::CpComplete(_, Opcode::Enable, Ok(())),
                Evt::DpUpdateReq(a, true),
            ] if *m == md() && *a == ase
        );
        self.st.cli_dp_update_cfm(ase, true).unwrap();
        assert_eq!(self.ctl.take(), [Call::SetupDataPath(hdl(), DpDirection::Input)]);
        self.st.dp_complete(hdl(), DpDirection::Input, Status::Success);
        self.notify(1, AseState::Streaming, enabled());
        assert_eq!(self.st.client().unwrap().ase(ase).unwrap().state(), AseState::Streaming);
        self.rec.take();
        assert!(self.gatt.take().is_empty());
        (ase, g, s)
    }
}

fn hdl() -> ConnHandle {
    ConnHandle::new(0x20).unwrap()
}

fn codec() -> CodecCfg {
    CodecCfg::new(CodecId::LC3, lc3::config(lc3::FREQ_16K, lc3::DURATION_10MS, 1, 40))
}

fn qos() -> QosCfg {
    QosCfg::new(1, 2, 10_000, 40)
}

fn md() -> Ltv {
    Ltv::from([0x03, 0x02, 0x04, 0x00])
}

fn enabled() -> AseParams {
    AseParams::Enabled {
        cig_id: 1,
        cis_id: 2,
        metadata: md(),
    }
}

fn cp_write(ases: &[(u8, CpOp)]) -> Vec<u8> {
    CpOp::encode(ases)
}

fn cp_rsp(op: Opcode, ases: &[(u8, std::result::Result<(), Rejection>)]) -> Op {
    let mut rsp = CpRsp::new(op);
    for &(id, r) in ases {
        rsp.ases.push(CpRspEntry::new(id, r));
    }
    Op::Notify(CON, Chr::AseCp, rsp.encode())
}

fn value(a: &Ase) -> Op {
    Op::Notify(CON, Chr::Ase(a.dir(), a.instance()), AseValue::from(a).encode())
}

// Unicast Client

#[test]
fn cli_codec_configured() {
    let mut f = Fix::client();
    assert_matches!(
        f.st.cli_configure_codec(CON, Direction::Sink, 0, codec()),
        Err(Error::UnknownConn(CON))
    );
    f.discover();
    assert_matches!(
        f.st.cli_configure_codec(CON, Direction::Sink, 1, codec()),
        Err(Error::InvalidInstance { instance: 1, .. })
    );
    let ase = f.codec(Direction::Sink);
    let a = f.st.client().unwrap().ase(ase).unwrap();
    assert_eq!(a.codec(), Some(&codec()));
    assert_eq!(a.state(), AseState::CodecConfigured);
    assert_eq!(f.st.client().unwrap().find_ase(CON, Direction::Sink, 0), Some(ase));
}

#[test]
fn cli_codec_rejected() {
    let mut f = Fix::client();
    f.discover();
    let ase = f.st.cli_configure_codec(CON, Direction::Source, 0, codec()).unwrap();
    f.gatt.take();
    f.st.gatt_written(CON, Chr::AseCp, Ok(()));
    let rej = Rejection::new(RspCode::UnsupportedConfigurationParameterValue, Reason::CodecSpecificConfiguration);
    let mut rsp = CpRsp::new(Opcode::ConfigCodec);
    rsp.ases.push(CpRspEntry::new(2, Err(rej)));
    f.st.gatt_notified(CON, Chr::AseCp, &rsp.encode());
    assert_matches!(
        &f.rec.take()[..],
        [Evt::CpComplete(a, Opcode::ConfigCodec, Err(Error::Rejected { rej: r, .. }))] if *a == ase && *r == rej
    );
    // Record allocated for the request is freed
    assert!(f.st.client().unwrap().ase(ase).is_none());
    assert_eq!(f.st.client().unwrap().find_ase(CON, Direction::Source, 0), None);
}

#[test]
fn cli_qos_binds_stream() {
    let mut f = Fix::client();
    f.discover();
    let ase = f.codec(Direction::Sink);
    let (_, s) = f.qos(ase);
    let stream = f.st.iso().stream(s).unwrap();
    assert_eq!(stream.cis_id(), 2);
    assert_eq!(stream.con(), Some(CON));
    assert_eq!(stream.ase(Direction::Sink), Some(ase));
    assert_eq!(stream.params().m2s.max_sdu, 40);
    assert_eq!(f.st.client().unwrap().ase(ase).unwrap().stream(), Some(s));
}

#[test]
fn cli_enable_idle() {
    let mut f = Fix::client();
    f.discover();
    let ase = f.codec(Direction::Sink);
    f.st.cli_release(ase).unwrap();
    f.accept(1, Opcode::Release, AseState::Releasing, AseParams::None);
    f.notify(1, AseState::Idle, AseParams::None);
    assert_matches!(
        &f.rec.take()[..],
        [
            Evt::AseState(_, _, AseState::Releasing),
            Evt::CpComplete(_, Opcode::Release, Ok(())),
            Evt::AseState(_, _, AseState::Idle),
        ]
    );
    assert_matches!(f.st.cli_release(ase), Err(Error::AlreadyIdle(_)));
    let r = f.st.cli_enable(ase, md());
    assert_matches!(r, Err(Error::Rejected { op: Opcode::Enable, .. }));
    assert_eq!(r.unwrap_err().rejection(), Some(Rejection::invalid_transition()));
    assert!(f.gatt.take().is_empty());
    assert!(f.rec.take().is_empty());
}

#[test]
fn cli_one_txn_per_ase() {
    let mut f = Fix::client();
    f.discover();
    let ase = f.codec(Direction::Sink);
    let g = f.st.iso_mut().ug_add(1, GroupParams::default()).unwrap();
    f.st.cli_configure_qos(ase, g, qos()).unwrap();
    assert_eq!(f.gatt.take().len(), 1);
    let r = f.st.cli_configure_qos(ase, g, qos());
    assert_eq!(r.unwrap_err().rejection(), Some(Rejection::invalid_transition()));
    assert!(f.gatt.take().is_empty());
    assert_eq!(f.st.client().unwrap().ase(ase).unwrap().pending(), Some(Opcode::ConfigQos));
}

#[test]
fn cli_write_failure() {
    let mut f = Fix::client();
    f.discover();
    let ase = f.codec(Direction::Sink);
    f.st.cli_disable(ase).unwrap_err();
    f.st.cli_set_write_type(ase, true).unwrap();
    let g = f.st.iso_mut().ug_add(1, GroupParams::default()).unwrap();
    f.st.cli_configure_qos(ase, g, qos()).unwrap();
    f.gatt.take();
    f.st.gatt_written(CON, Chr::AseCp, Err(gatt::Error::Timeout));
    assert_matches!(
        &f.rec.take()[..],
        [Evt::CpComplete(_, Opcode::ConfigQos, Err(Error::Gatt(gatt::Error::Timeout)))]
    );
    let a = f.st.client().unwrap().ase(ase).unwrap();
    assert_eq!((a.state(), a.pending()), (AseState::CodecConfigured, None));
}

#[test]
fn cli_streaming_disconnect() {
    let mut f = Fix::client();
    let (ase, _, s) = f.stream();
    f.st.acl_disconnected(CON, Status::ConnectionTimeout);
    assert_matches!(
        &f.rec.take()[..],
        [Evt::Disabled(a, Status::ConnectionTimeout), Evt::AseState(b, None, AseState::Idle)]
            if *a == s && *b == ase
    );
    assert!(f.st.client().unwrap().ase(ase).is_none());
    let stream = f.st.iso().stream(s).unwrap();
    assert_eq!(stream.state(), StreamState::Disconnected);
    assert_eq!(stream.ase(Direction::Sink), None);
    assert_eq!(stream.dp_state(DpDirection::Input), DpState::NotSetUp);
    assert!(f.ctl.take().is_empty());
    assert_matches!(f.st.cli_enable(ase, md()), Err(Error::InvalidAse(_)));
}

#[test]
fn cli_group_update_while_established() {
    let mut f = Fix::client();
    let (ase, g, s) = f.stream();
    assert_matches!(
        f.st.iso_mut().ug_update(g, GroupParams::new(7_500, 10)),
        Err(iso::Error::GroupBusy(_))
    );
    f.st.cli_release(ase).unwrap();
    f.accept(1, Opcode::Release, AseState::Releasing, AseParams::None);
    assert_eq!(f.ctl.take(), [Call::Disconnect(hdl())]);
    f.st.cis_disconnected(hdl(), Status::ConnectionTerminatedByLocalHost);
    f.notify(1, AseState::Idle, AseParams::None);
    assert_eq!(f.st.iso().stream(s).unwrap().state(), StreamState::Disconnected);
    f.st.iso_mut().ug_update(g, GroupParams::new(7_500, 10)).unwrap();
    assert!(!f.st.iso().group(g).unwrap().is_committed());
}

#[test]
fn cli_source_receiver_ready() {
    let mut f = Fix::client();
    f.discover();
    let ase = f.codec(Direction::Source);
    let (g, _) = f.qos(ase);
    f.st.iso_mut().ug_config(g).unwrap();
    f.st.cig_configured(1, Status::Success);
    f.st.cli_enable(ase, md()).unwrap();
    f.accept(2, Opcode::Enable, AseState::Enabling, enabled());
    f.st.cis_established(CON, 1, 2, Ok((hdl(), CisConfig::default())));
    f.rec.take();
    f.ctl.take();

    f.st.cli_dp_update_cfm(ase, true).unwrap();
    assert_matches!(f.st.cli_dp_update_cfm(ase, true), Err(Error::NoRequest(_)));
    assert_eq!(f.ctl.take(), [Call::SetupDataPath(hdl(), DpDirection::Output)]);
    f.st.dp_complete(hdl(), DpDirection::Output, Status::Success);
    f.accept(2, Opcode::ReceiverStartReady, AseState::Streaming, enabled());
    assert_matches!(
        &f.rec.take()[..],
        [
            Evt::AseState(_, _, AseState::Streaming),
            Evt::Metadata(..),
            Evt::CpComplete(_, Opcode::ReceiverStartReady, Ok(())),
        ]
    );

    // Disable stops the data path before Receiver Stop Ready
    f.st.cli_disable(ase).unwrap();
    f.accept(2, Opcode::Disable, AseState::Disabling, enabled());
    assert!(f.rec.take().iter().any(|e| matches!(e, Evt::DpUpdateReq(a, false) if *a == ase)));
    f.st.cli_dp_update_cfm(ase, true).unwrap();
    assert_eq!(f.ctl.take(), [Call::RemoveDataPath(hdl(), DpDirection::Output)]);
    f.st.dp_complete(hdl(), DpDirection::Output, Status::Success);
    f.accept(2, Opcode::ReceiverStopReady, AseState::QosConfigured, AseParams::QosConfigured(qos()));
    assert_eq!(f.st.client().unwrap().ase(ase).unwrap().state(), AseState::QosConfigured);
}

/// Enables the Source ASE and waits for the CIS without establishing it.
fn cli_source_enabling(f: &mut Fix) -> AseLid {
    f.discover();
    let ase = f.codec(Direction::Source);
    let (g, _) = f.qos(ase);
    f.st.iso_mut().ug_config(g).unwrap();
    f.st.cig_configured(1, Status::Success);
    f.st.cli_enable(ase, md()).unwrap();
    f.accept(2, Opcode::Enable, AseState::Enabling, enabled());
    assert_eq!(f.ctl.take(), [Call::SetCigParams(1, vec![2]), Call::CreateCis(1, 2, CON)]);
    f.rec.take();
    ase
}

#[test]
fn cli_source_disable_before_cis() {
    let mut f = Fix::client();
    let ase = cli_source_enabling(&mut f);

    // Receiver Stop Ready follows the Disable completion
    f.st.cli_disable(ase).unwrap();
    f.accept(2, Opcode::Disable, AseState::Disabling, enabled());
    assert_matches!(
        &f.rec.take()[..],
        [
            Evt::AseState(a, _, AseState::Disabling),
            Evt::CpComplete(b, Opcode::Disable, Ok(())),
        ] if *a == ase && *b == ase
    );
    assert_eq!(f.st.client().unwrap().ase(ase).unwrap().pending(), Some(Opcode::ReceiverStopReady));
    f.accept(2, Opcode::ReceiverStopReady, AseState::QosConfigured, AseParams::QosConfigured(qos()));
    assert_matches!(
        &f.rec.take()[..],
        [
            Evt::AseState(_, _, AseState::QosConfigured),
            Evt::CpComplete(a, Opcode::ReceiverStopReady, Ok(())),
        ] if *a == ase
    );
    assert!(f.gatt.take().is_empty());
    assert_eq!(f.st.client().unwrap().ase(ase).unwrap().pending(), None);
}

#[test]
fn cli_disable_during_dp_setup() {
    let mut f = Fix::client();
    let ase = cli_source_enabling(&mut f);
    f.st.cis_established(CON, 1, 2, Ok((hdl(), CisConfig::default())));
    assert_matches!(&f.rec.take()[..], [Evt::DpUpdateReq(a, true)] if *a == ase);
    f.st.cli_dp_update_cfm(ase, true).unwrap();
    assert_eq!(f.ctl.take(), [Call::SetupDataPath(hdl(), DpDirection::Output)]);

    f.st.cli_disable(ase).unwrap();
    f.accept(2, Opcode::Disable, AseState::Disabling, enabled());
    assert_matches!(
        &f.rec.take()[..],
        [
            Evt::AseState(_, _, AseState::Disabling),
            Evt::DpUpdateReq(_, false),
            Evt::CpComplete(_, Opcode::Disable, Ok(())),
        ]
    );
    // Nothing to remove yet
    f.st.cli_dp_update_cfm(ase, true).unwrap();
    assert!(f.ctl.take().is_empty());
    f.accept(2, Opcode::ReceiverStopReady, AseState::QosConfigured, AseParams::QosConfigured(qos()));
    assert_matches!(
        &f.rec.take()[..],
        [
            Evt::AseState(_, _, AseState::QosConfigured),
            Evt::DpUpdateReq(_, false),
            Evt::CpComplete(_, Opcode::ReceiverStopReady, Ok(())),
        ]
    );
    f.st.cli_dp_update_cfm(ase, true).unwrap();
    assert!(f.ctl.take().is_empty());

    // Late setup completion is undone
    f.st.dp_complete(hdl(), DpDirection::Output, Status::Success);
    assert_matches!(&f.rec.take()[..], [Evt::DpUpdateReq(a, false)] if *a == ase);
    f.st.cli_dp_update_cfm(ase, true).unwrap();
    assert_eq!(f.ctl.take(), [Call::RemoveDataPath(hdl(), DpDirection::Output)]);
    f.st.dp_complete(hdl(), DpDirection::Output, Status::Success);
    let s = f.st.client().unwrap().ase(ase).unwrap().stream().unwrap();
    assert_eq!(f.st.iso().stream(s).unwrap().dp_state(DpDirection::Output), DpState::NotSetUp);
    assert!(f.gatt.take().is_empty());
    assert!(f.rec.take().is_empty());
}

#[test]
fn cli_cis_failure() {
    let mut f = Fix::client();
    f.discover();
    let ase = f.codec(Direction::Sink);
    let (g, s) = f.qos(ase);
    f.st.iso_mut().ug_config(g).unwrap();
    f.st.cig_configured(1, Status::Success);
    f.st.cli_enable(ase, md()).unwrap();
    f.accept(1, Opcode::Enable, AseState::Enabling, enabled());
    f.ctl.take();
    f.rec.take();

    f.st.cis_established(CON, 1, 2, Err(Status::ConnectionFailedToBeEstablished));
    assert_matches!(
        &f.rec.take()[..],
        [Evt::Disabled(a, Status::ConnectionFailedToBeEstablished)] if *a == s
    );
    let stream = f.st.iso().stream(s).unwrap();
    assert_eq!(stream.state(), StreamState::Disconnected);
    assert_eq!(stream.ase(Direction::Sink), Some(ase));
    let a = f.st.client().unwrap().ase(ase).unwrap();
    assert_eq!((a.state(), a.stream()), (AseState::Enabling, Some(s)));
    assert!(f.ctl.take().is_empty());

    // ASE can still be disabled
    f.st.cli_disable(ase).unwrap();
    f.accept(1, Opcode::Disable, AseState::QosConfigured, AseParams::QosConfigured(qos()));
    assert_matches!(
        &f.rec.take()[..],
        [Evt::AseState(_, _, AseState::QosConfigured), Evt::CpComplete(_, Opcode::Disable, Ok(()))]
    );
    assert!(f.ctl.take().is_empty());
    assert!(f.gatt.take().is_empty());
}

#[test]
fn cli_unsupported_opcode() {
    let mut f = Fix::client();
    f.discover();
    let ase = f.codec(Direction::Sink);
    f.st.cli_set_write_type(ase, false).unwrap();
    f.st.cli_release(ase).unwrap();
    assert_matches!(&f.gatt.take()[..], [Op::Write(CON, Chr::AseCp, _, false)]);
    let rsp = CpRsp::all(u8::from(Opcode::Release), RspCode::UnsupportedOpcode);
    f.st.gatt_notified(CON, Chr::AseCp, &rsp.encode());
    assert_matches!(
        &f.rec.take()[..],
        [Evt::CpComplete(_, Opcode::Release, Err(e))] if e.rejection() == Some(Rejection::plain(RspCode::UnsupportedOpcode))
    );
}

#[test]
fn cli_discovery_failure() {
    let mut f = Fix::client();
    f.st.cli_discover(CON).unwrap();
    assert_matches!(f.st.cli_discover(CON), Err(Error::Gatt(gatt::Error::Busy)));
    f.st.gatt_discovered(CON, Err(gatt::Error::NotFound));
    assert_matches!(&f.rec.take()[..], [Evt::Discovered(CON, Err(Error::Gatt(gatt::Error::NotFound)))]);
    f.st.cli_discover(CON).unwrap();
}

// Unicast Server

fn srv_ase(f: &Fix, id: u8) -> AseLid {
    f.st.server().unwrap().find_ase(CON, id).unwrap()
}

fn srv_val(f: &Fix, id: u8) -> Op {
    value(f.st.server().unwrap().ase(srv_ase(f, id)).unwrap())
}

/// Configures Sink ASE 1 up to QoS Configured for CIS 1/2.
fn srv_qos(f: &mut Fix) -> AseLid {
    let w = cp_write(&[(1, CpOp::ConfigCodec(codec()))]);
    assert_eq!(f.st.gatt_write_req(CON, Chr::AseCp, &w), Ok(()));
    let ase = srv_ase(f, 1);
    assert_matches!(
        &f.rec.take()[..],
        [Evt::ConfigureCodecReq(a, CON, Direction::Sink, c)] if *a == ase && *c == codec()
    );
    assert!(f.gatt.take().is_empty());
    f.st.srv_configure_codec_cfm(ase, Ok(QosPref::default())).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::ConfigCodec, &[(1, Ok(()))]), srv_val(f, 1)]);

    let w = cp_write(&[(1, CpOp::ConfigQos(qos()))]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    assert_matches!(&f.rec.take()[..], [.., Evt::ConfigureQosReq(_, q)] if *q == qos());
    f.st.srv_configure_qos_cfm(ase, Ok(())).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::ConfigQos, &[(1, Ok(()))]), srv_val(f, 1)]);
    f.rec.take();
    ase
}

#[test]
fn srv_read() {
    let f = Fix::server();
    assert_eq!(f.st.server().unwrap().find_ase(CON, 1), None);
    let mut st = f.st;
    assert_eq!(st.gatt_read_req(CON, Chr::Ase(Direction::Source, 0)), Ok(vec![0x03, 0x00]));
    assert_eq!(st.gatt_read_req(CON, Chr::AseCp), Err(ErrorCode::ReadNotPermitted));
    assert_eq!(
        st.gatt_write_req(CON, Chr::Ase(Direction::Sink, 0), &[0x00]),
        Err(ErrorCode::WriteNotPermitted)
    );
}

#[test]
fn srv_configure() {
    let mut f = Fix::server();
    let ase = srv_qos(&mut f);
    let a = f.st.server().unwrap().ase(ase).unwrap();
    assert_eq!(a.state(), AseState::QosConfigured);
    let s = a.stream().unwrap();
    let stream = f.st.iso().stream(s).unwrap();
    assert_eq!((stream.cis_id(), stream.role()), (2, iso::Role::Peripheral));
    assert_eq!(stream.ase(Direction::Sink), Some(ase));

    // Second Config QoS from QoS Configured is an invalid transition
    let w = cp_write(&[(1, CpOp::ConfigQos(qos()))]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    assert_eq!(
        f.gatt.take(),
        [cp_rsp(Opcode::ConfigQos, &[(1, Err(Rejection::invalid_transition()))])]
    );
    assert!(f.rec.take().is_empty());
}

#[test]
fn srv_multi_ase_write() {
    let mut f = Fix::server();
    let w = cp_write(&[(1, CpOp::ConfigCodec(codec())), (3, CpOp::ConfigCodec(codec()))]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    let (sink, src) = (srv_ase(&f, 1), srv_ase(&f, 3));
    assert_matches!(
        &f.rec.take()[..],
        [
            Evt::ConfigureCodecReq(a, _, Direction::Sink, _),
            Evt::ConfigureCodecReq(b, _, Direction::Source, _),
        ] if *a == sink && *b == src
    );
    f.st.srv_configure_codec_cfm(src, Ok(QosPref::default())).unwrap();
    assert!(f.gatt.take().is_empty());
    let rej = Rejection::new(RspCode::UnsupportedConfigurationParameterValue, Reason::CodecSpecificConfiguration);
    f.st.srv_configure_codec_cfm(sink, Err(rej)).unwrap();
    assert_eq!(
        f.gatt.take(),
        [cp_rsp(Opcode::ConfigCodec, &[(1, Err(rej)), (3, Ok(()))]), srv_val(&f, 3)]
    );
    assert_eq!(f.st.server().unwrap().find_ase(CON, 1), None);
    assert_matches!(
        f.st.srv_configure_codec_cfm(src, Ok(QosPref::default())),
        Err(Error::NoRequest(_))
    );
}

#[test]
fn srv_invalid_requests() {
    let mut f = Fix::server();
    let w = cp_write(&[(9, CpOp::Release)]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::Release, &[(9, Err(Rejection::plain(RspCode::InvalidAseId)))])]);

    let w = cp_write(&[(1, CpOp::Enable(md()))]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::Enable, &[(1, Err(Rejection::invalid_transition()))])]);

    f.st.gatt_write_req(CON, Chr::AseCp, &[0x01, 0x00]).unwrap();
    let all = CpRsp::all(u8::from(Opcode::ConfigCodec), RspCode::InvalidLength);
    assert_eq!(f.gatt.take(), [Op::Notify(CON, Chr::AseCp, all.encode())]);
    assert!(f.rec.take().is_empty());

    // Connection limit
    f.st.gatt_write_req(ConnLid(2), Chr::AseCp, &w).unwrap();
    f.gatt.take();
    assert_eq!(
        f.st.gatt_write_req(ConnLid(3), Chr::AseCp, &w),
        Err(ErrorCode::InsufficientResources)
    );
}

#[test]
fn srv_sink_streaming() {
    let mut f = Fix::server();
    let ase = srv_qos(&mut f);

    // Receiver Start Ready is only valid for Source ASEs
    let w = cp_write(&[(1, CpOp::Enable(md()))]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    assert_matches!(&f.rec.take()[..], [Evt::EnableReq(_, m)] if *m == md());
    f.st.srv_enable_cfm(ase, Ok(())).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::Enable, &[(1, Ok(()))]), srv_val(&f, 1)]);
    let w = cp_write(&[(1, CpOp::ReceiverStartReady)]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    let rej = Rejection::plain(RspCode::InvalidAseDirection);
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::ReceiverStartReady, &[(1, Err(rej))])]);

    // CIS request from the Client is accepted
    f.st.cis_request(CON, 1, 2, hdl());
    assert_eq!(f.ctl.take(), [Call::AcceptCis(hdl())]);
    f.st.cis_established(CON, 1, 2, Ok((hdl(), CisConfig::default())));
    assert_matches!(&f.rec.take()[..], [Evt::AseState(_, _, AseState::Enabling), Evt::DpUpdateReq(_, true)]);
    f.st.srv_dp_update_cfm(ase, true).unwrap();
    assert_eq!(f.ctl.take(), [Call::SetupDataPath(hdl(), DpDirection::Output)]);
    f.st.dp_complete(hdl(), DpDirection::Output, Status::Success);
    assert_eq!(f.st.server().unwrap().ase(ase).unwrap().state(), AseState::Streaming);
    assert_eq!(f.gatt.take(), [srv_val(&f, 1)]);

    // Local disable goes straight to QoS Configured once the path is removed
    f.st.srv_disable(ase).unwrap();
    assert!(f.gatt.take().is_empty());
    f.rec.take();
    f.st.srv_dp_update_cfm(ase, true).unwrap();
    assert_eq!(f.ctl.take(), [Call::RemoveDataPath(hdl(), DpDirection::Output)]);
    f.st.dp_complete(hdl(), DpDirection::Output, Status::Success);
    assert_eq!(f.st.server().unwrap().ase(ase).unwrap().state(), AseState::QosConfigured);
    assert_eq!(f.gatt.take(), [srv_val(&f, 1)]);
}

#[test]
fn srv_release_waits_for_cis() {
    let mut f = Fix::server();
    let ase = srv_qos(&mut f);
    f.st.cis_request(CON, 1, 2, hdl());
    f.st.cis_established(CON, 1, 2, Ok((hdl(), CisConfig::default())));
    f.ctl.take();
    f.rec.take();

    let w = cp_write(&[(1, CpOp::Release)]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    assert_matches!(&f.rec.take()[..], [Evt::ReleaseReq(_)]);
    f.st.srv_release_cfm(ase, Ok(()), false).unwrap();
    assert_eq!(f.st.server().unwrap().ase(ase).unwrap().state(), AseState::Releasing);
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::Release, &[(1, Ok(()))]), srv_val(&f, 1)]);

    f.st.cis_disconnected(hdl(), Status::RemoteUserTerminatedConnection);
    let a = f.st.server().unwrap().ase(ase).unwrap();
    assert_eq!((a.state(), a.stream()), (AseState::CodecConfigured, None));
    assert_eq!(a.codec(), Some(&codec()));
    assert_eq!(f.gatt.take(), [srv_val(&f, 1)]);
    assert_matches!(f.st.srv_release(ase, true), Ok(()));
    assert_matches!(f.st.srv_release(ase, true), Err(Error::AlreadyIdle(_)));
}

#[test]
fn srv_autonomous() {
    let mut f = Fix::server();
    let ase = f
        .st
        .srv_configure_codec(CON, Direction::Source, 0, codec(), QosPref::default())
        .unwrap();
    assert_eq!(ase, srv_ase(&f, 3));
    assert_eq!(f.gatt.take(), [srv_val(&f, 3)]);
    assert_matches!(
        f.st.srv_configure_codec(CON, Direction::Source, 1, codec(), QosPref::default()),
        Err(Error::InvalidInstance { .. })
    );
    assert_matches!(f.st.srv_update_metadata(ase, md()), Err(Error::Rejected { .. }));
    assert_matches!(f.st.srv_disable(ase), Err(Error::Rejected { .. }));
}

#[test]
fn srv_disconnect() {
    let mut f = Fix::server();
    let ase = srv_qos(&mut f);
    let s = f.st.server().unwrap().ase(ase).unwrap().stream().unwrap();
    f.st.acl_disconnected(CON, Status::ConnectionTimeout);
    assert_matches!(&f.rec.take()[..], [Evt::AseState(a, None, AseState::Idle)] if *a == ase);
    assert!(f.st.server().unwrap().ase(ase).is_none());
    assert!(f.st.iso().stream(s).is_none());
}

/// Configures and enables Source ASE 3 for CIS 1/2.
fn srv_source_enabling(f: &mut Fix) -> AseLid {
    let w = cp_write(&[(3, CpOp::ConfigCodec(codec()))]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    let ase = srv_ase(f, 3);
    assert_matches!(&f.rec.take()[..], [Evt::ConfigureCodecReq(a, CON, Direction::Source, _)] if *a == ase);
    f.st.srv_configure_codec_cfm(ase, Ok(QosPref::default())).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::ConfigCodec, &[(3, Ok(()))]), srv_val(f, 3)]);

    let w = cp_write(&[(3, CpOp::ConfigQos(qos()))]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    f.st.srv_configure_qos_cfm(ase, Ok(())).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::ConfigQos, &[(3, Ok(()))]), srv_val(f, 3)]);

    let w = cp_write(&[(3, CpOp::Enable(md()))]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    f.st.srv_enable_cfm(ase, Ok(())).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::Enable, &[(3, Ok(()))]), srv_val(f, 3)]);
    assert_eq!(f.st.server().unwrap().ase(ase).unwrap().state(), AseState::Enabling);
    f.rec.take();
    ase
}

#[test]
fn srv_source_streaming() {
    let mut f = Fix::server();
    let ase = srv_source_enabling(&mut f);

    // Receiver Start Ready requires an established CIS
    let start = cp_write(&[(3, CpOp::ReceiverStartReady)]);
    f.st.gatt_write_req(CON, Chr::AseCp, &start).unwrap();
    assert_eq!(
        f.gatt.take(),
        [cp_rsp(Opcode::ReceiverStartReady, &[(3, Err(Rejection::invalid_transition()))])]
    );
    assert_eq!(f.st.server().unwrap().ase(ase).unwrap().state(), AseState::Enabling);

    f.st.cis_request(CON, 1, 2, hdl());
    assert_eq!(f.ctl.take(), [Call::AcceptCis(hdl())]);
    f.st.cis_established(CON, 1, 2, Ok((hdl(), CisConfig::default())));
    assert_matches!(&f.rec.take()[..], [Evt::DpUpdateReq(a, true)] if *a == ase);
    f.st.srv_dp_update_cfm(ase, true).unwrap();
    assert_eq!(f.ctl.take(), [Call::SetupDataPath(hdl(), DpDirection::Input)]);
    f.st.dp_complete(hdl(), DpDirection::Input, Status::Success);
    assert!(f.gatt.take().is_empty());

    f.st.gatt_write_req(CON, Chr::AseCp, &start).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::ReceiverStartReady, &[(3, Ok(()))]), srv_val(&f, 3)]);
    assert_matches!(&f.rec.take()[..], [Evt::AseState(a, _, AseState::Streaming)] if *a == ase);

    // Source ASE waits in Disabling for Receiver Stop Ready
    let w = cp_write(&[(3, CpOp::Disable)]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    assert_matches!(&f.rec.take()[..], [Evt::DisableReq(a)] if *a == ase);
    f.st.srv_disable_cfm(ase, Ok(())).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::Disable, &[(3, Ok(()))]), srv_val(&f, 3)]);
    assert_matches!(
        &f.rec.take()[..],
        [Evt::AseState(_, _, AseState::Disabling), Evt::DpUpdateReq(a, false)] if *a == ase
    );
    f.st.srv_dp_update_cfm(ase, true).unwrap();
    assert_eq!(f.ctl.take(), [Call::RemoveDataPath(hdl(), DpDirection::Input)]);
    f.st.dp_complete(hdl(), DpDirection::Input, Status::Success);
    assert!(f.gatt.take().is_empty());
    assert_eq!(f.st.server().unwrap().ase(ase).unwrap().state(), AseState::Disabling);

    let w = cp_write(&[(3, CpOp::ReceiverStopReady)]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    assert_eq!(f.gatt.take(), [cp_rsp(Opcode::ReceiverStopReady, &[(3, Ok(()))]), srv_val(&f, 3)]);
    assert_eq!(f.st.server().unwrap().ase(ase).unwrap().state(), AseState::QosConfigured);
}

#[test]
fn srv_duplicate_ase_ids() {
    let mut f = Fix::server();
    let w = cp_write(&[(1, CpOp::ConfigCodec(codec())), (1, CpOp::ConfigCodec(codec()))]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    let ase = srv_ase(&f, 1);
    assert_matches!(&f.rec.take()[..], [Evt::ConfigureCodecReq(a, ..)] if *a == ase);
    f.st.srv_configure_codec_cfm(ase, Ok(QosPref::default())).unwrap();
    let dup = Err(Rejection::invalid_transition());
    assert_eq!(
        f.gatt.take(),
        [cp_rsp(Opcode::ConfigCodec, &[(1, Ok(())), (1, dup)]), srv_val(&f, 1)]
    );

    // Operations applied immediately are not repeated either
    let mut f = Fix::server();
    let ase = srv_source_enabling(&mut f);
    f.st.cis_request(CON, 1, 2, hdl());
    f.st.cis_established(CON, 1, 2, Ok((hdl(), CisConfig::default())));
    f.rec.take();
    let w = cp_write(&[(3, CpOp::ReceiverStartReady), (3, CpOp::ReceiverStartReady)]);
    f.st.gatt_write_req(CON, Chr::AseCp, &w).unwrap();
    assert_eq!(
        f.gatt.take(),
        [cp_rsp(Opcode::ReceiverStartReady, &[(3, Ok(())), (3, dup)]), srv_val(&f, 3)]
    );
    assert_matches!(&f.rec.take()[..], [Evt::AseState(a, _, AseState::Streaming)] if *a == ase);
}

#[test]
fn srv_oversized_write() {
    let mut f = Fix::server();
    let mut w = vec![u8::from(Opcode::Release), 200];
    w.extend(1..=200u8);
    assert_eq!(f.st.gatt_write_req(CON, Chr::AseCp, &w), Ok(()));
    let all = CpRsp::all(u8::from(Opcode::Release), RspCode::InvalidLength);
    assert_eq!(f.gatt.take(), [Op::Notify(CON, Chr::AseCp, all.encode())]);
    assert!(f.rec.take().is_empty());
}
