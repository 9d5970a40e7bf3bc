use enum_iterator::all;
use matches::assert_matches;

use crate::iso::{Framing, Phy};
use crate::ltv::{lc3, Ltv};
use crate::ConnLid;

use super::*;

fn ase(dir: Direction, state: AseState) -> Ase {
    let mut a = Ase::new(ConnLid(0), 0, 1, dir);
    a.state = state;
    a
}

#[test]
fn state_table() {
    use AseState::*;
    #[rustfmt::skip]
    let valid = [
        (Opcode::ConfigCodec, Idle), (Opcode::ConfigCodec, CodecConfigured),
        (Opcode::ConfigCodec, QosConfigured),
        (Opcode::ConfigQos, CodecConfigured),
        (Opcode::Enable, QosConfigured),
        (Opcode::ReceiverStartReady, Enabling),
        (Opcode::Disable, Enabling), (Opcode::Disable, Streaming),
        (Opcode::ReceiverStopReady, Disabling),
        (Opcode::UpdateMetadata, Enabling), (Opcode::UpdateMetadata, Streaming),
        (Opcode::Release, CodecConfigured), (Opcode::Release, QosConfigured),
        (Opcode::Release, Enabling), (Opcode::Release, Streaming),
        (Opcode::Release, Disabling),
    ];
    for s in all::<AseState>() {
        for op in all::<Opcode>() {
            let a = ase(Direction::Source, s);
            let r = a.check(op);
            if valid.contains(&(op, s)) {
                assert!(r.is_ok(), "{op} in {s}");
            } else {
                assert_eq!(r, Err(Rejection::invalid_transition()), "{op} in {s}");
            }
            assert_eq!(a.state(), s);
        }
    }
}

#[test]
fn destinations() {
    use AseState::*;
    assert_eq!(transition(Idle, Opcode::ConfigCodec), Some(CodecConfigured));
    assert_eq!(transition(QosConfigured, Opcode::ConfigCodec), Some(CodecConfigured));
    assert_eq!(transition(Enabling, Opcode::ReceiverStartReady), Some(Streaming));
    assert_eq!(transition(Streaming, Opcode::UpdateMetadata), Some(Streaming));
    assert_eq!(transition(Disabling, Opcode::ReceiverStopReady), Some(QosConfigured));
    assert_eq!(transition(Streaming, Opcode::Release), Some(Releasing));
    assert_eq!(transition(Idle, Opcode::Release), None);
    assert_eq!(transition(Releasing, Opcode::Release), None);
}

#[test]
fn pending() {
    let mut a = ase(Direction::Sink, AseState::CodecConfigured);
    assert_eq!(a.check(Opcode::ConfigQos), Ok(AseState::QosConfigured));
    a.pending = Some(Opcode::ConfigQos);
    for op in all::<Opcode>() {
        assert_eq!(a.check(op), Err(Rejection::invalid_transition()));
    }
}

#[test]
fn receiver_ready_direction() {
    let a = ase(Direction::Sink, AseState::Enabling);
    assert_eq!(
        a.check_remote(Opcode::ReceiverStartReady),
        Err(Rejection::plain(RspCode::InvalidAseDirection))
    );
    assert_eq!(a.check(Opcode::ReceiverStartReady), Ok(AseState::Streaming));
    let a = ase(Direction::Source, AseState::Enabling);
    assert_eq!(a.check_remote(Opcode::ReceiverStartReady), Ok(AseState::Streaming));
}

#[test]
fn set_state_clears() {
    let mut a = ase(Direction::Sink, AseState::Idle);
    a.codec = Some(CodecCfg::new(CodecId::LC3, [0x02, 0x01, 0x03]));
    a.qos = Some(QosCfg::new(1, 2, 10_000, 40));
    a.metadata = Ltv::from([0x03, 0x02, 0x04, 0x00]);
    a.set_state(AseState::Streaming);
    assert!(!a.metadata().is_empty());
    a.set_state(AseState::QosConfigured);
    assert!(a.metadata().is_empty());
    assert!(a.qos().is_some());
    a.set_state(AseState::CodecConfigured);
    assert!(a.qos().is_none());
    assert!(a.codec().is_some());
    a.set_state(AseState::Idle);
    assert!(a.codec().is_none());
}

#[test]
fn qos_validate() {
    let q = QosCfg::new(1, 2, 10_000, 40);
    assert_eq!(q.validate(), Ok(()));
    let bad = |f: fn(&mut QosCfg)| {
        let mut q = q;
        f(&mut q);
        q.validate().unwrap_err().cfg_reason()
    };
    assert_eq!(bad(|q| q.sdu_intv_us = 0x10), Some(Reason::SduInterval));
    assert_eq!(bad(|q| q.phy = Phy::LE_1M | Phy::LE_2M), Some(Reason::Phy));
    assert_eq!(bad(|q| q.max_sdu = 0x1000), Some(Reason::MaxSdu));
    assert_eq!(bad(|q| q.max_tlatency_ms = 0), Some(Reason::MaxTransportLatency));
    assert_eq!(bad(|q| q.cis_id = 0xF0), Some(Reason::InvalidAseCisMapping));
}

#[test]
fn config_codec_pdu() {
    let cfg = lc3::config(lc3::FREQ_16K, lc3::DURATION_10MS, 1, 40);
    let op = CpOp::ConfigCodec(CodecCfg::new(CodecId::LC3, cfg.clone()));
    let v = CpOp::encode(&[(3, op.clone())]);
    assert_eq!(&v[..10], &[0x01, 1, 3, 0x01, 0x02, 0x06, 0, 0, 0, 0]);
    assert_eq!(usize::from(v[10]), cfg.len());
    assert_eq!(&v[11..], cfg.as_bytes());

    let req = CpReq::decode(&v).unwrap();
    assert_eq!(req.op, Opcode::ConfigCodec);
    assert_eq!(req.ases.len(), 1);
    assert_eq!(req.ases[0], (3, Ok(op)));
}

#[test]
fn config_qos_pdu() {
    let q = QosCfg::new(1, 2, 10_000, 40);
    let v = CpOp::encode(&[(1, CpOp::ConfigQos(q))]);
    #[rustfmt::skip]
    assert_eq!(v, [
        0x02, 1,
        1, 1, 2,
        0x10, 0x27, 0x00,
        0x00, 0x02, 40, 0, 2, 20, 0,
        0x40, 0x9C, 0x00,
    ]);
    let req = CpReq::decode(&v).unwrap();
    assert_eq!(req.ases[0], (1, Ok(CpOp::ConfigQos(q))));

    // Invalid framing is rejected for the ASE only
    let mut bad = v.clone();
    bad[8] = 0x05;
    let req = CpReq::decode(&bad).unwrap();
    assert_eq!(req.ases[0], (1, Err(Rejection::invalid_cfg(Reason::Framing))));
}

#[test]
fn multi_ase_pdu() {
    let md = Ltv::from([0x03, 0x02, 0x04, 0x00]);
    let v = CpOp::encode(&[(1, CpOp::Enable(md.clone())), (2, CpOp::Enable(Ltv::new()))]);
    assert_eq!(v, [0x03, 2, 1, 4, 0x03, 0x02, 0x04, 0x00, 2, 0]);
    let req = CpReq::decode(&v).unwrap();
    assert_eq!(req.ases[0], (1, Ok(CpOp::Enable(md))));
    assert_eq!(req.ases[1], (2, Ok(CpOp::Enable(Ltv::new()))));

    let req = CpReq::decode(&[0x03, 1, 1, 2, 0x05, 0x01]).unwrap();
    assert_eq!(req.ases[0], (1, Err(Rejection::plain(RspCode::InvalidMetadata))));
}

#[test]
fn invalid_pdu() {
    let reject = |op, code| -> Result<CpReq, CpRsp> { Err(CpRsp::all(op, code)) };
    assert_eq!(CpReq::decode(&[0x09, 1, 1]), reject(0x09, RspCode::UnsupportedOpcode));
    assert_eq!(CpReq::decode(&[0x00]), reject(0x00, RspCode::UnsupportedOpcode));
    assert_eq!(CpReq::decode(&[0x08, 0]), reject(0x08, RspCode::InvalidLength));
    assert_eq!(CpReq::decode(&[0x08, 2, 1]), reject(0x08, RspCode::InvalidLength));
    assert_eq!(CpReq::decode(&[0x08, 1, 1, 2]), reject(0x08, RspCode::InvalidLength));
    assert_eq!(CpReq::decode(&[0x03, 1, 1, 3, 0]), reject(0x03, RspCode::InvalidLength));
    assert_matches!(CpReq::decode(&[0x08, 2, 1, 2]), Ok(CpReq { op: Opcode::Release, .. }));
}

#[test]
fn oversized_pdu() {
    let release = |n: u8| -> Vec<u8> { [0x08, n].into_iter().chain(1..=n).collect() };
    assert_eq!(
        CpReq::decode(&release(200)),
        Err(CpRsp::all(0x08, RspCode::InvalidLength))
    );
    assert_eq!(
        CpReq::decode(&release(171)),
        Err(CpRsp::all(0x08, RspCode::InvalidLength))
    );

    // Largest accepted write still has a response that fits
    let req = CpReq::decode(&release(170)).unwrap();
    assert_eq!(req.ases.len(), MAX_CP_ASES);
    let mut rsp = CpRsp::new(req.op);
    for &(id, _) in &req.ases {
        rsp.ases.push(CpRspEntry::new(id, Err(Rejection::plain(RspCode::InvalidAseId))));
    }
    let v = rsp.encode();
    assert_eq!(v.len(), 2 + 3 * MAX_CP_ASES);
    assert_eq!(CpRsp::decode(&v), Some(rsp));
}

#[test]
fn cp_rsp() {
    let mut rsp = CpRsp::new(Opcode::ConfigQos);
    rsp.ases.push(CpRspEntry::new(1, Ok(())));
    rsp.ases.push(CpRspEntry::new(2, Err(Rejection::invalid_transition())));
    let v = rsp.encode();
    assert_eq!(v, [0x02, 2, 1, 0x00, 0x00, 2, 0x04, 0x00]);
    let dec = CpRsp::decode(&v).unwrap();
    assert_eq!(dec, rsp);
    assert_eq!(dec.opcode(), Some(Opcode::ConfigQos));
    assert_eq!(dec.ases[1].result(), Err(Rejection::invalid_transition()));

    let v = CpRsp::all(0x0A, RspCode::UnsupportedOpcode).encode();
    assert_eq!(v, [0x0A, 0xFF, 0x00, 0x01, 0x00]);
    let dec = CpRsp::decode(&v).unwrap();
    assert!(dec.all);
    assert_eq!(dec.opcode(), None);
    assert_eq!(CpRsp::decode(&[0x02, 1, 1]), None);
}

#[test]
fn ase_value() {
    let cfg = lc3::config(lc3::FREQ_48K, lc3::DURATION_10MS, 1, 100);
    let mut a = ase(Direction::Sink, AseState::Idle);
    assert_eq!(AseValue::from(&a).encode(), [1, 0]);

    a.codec = Some(CodecCfg::new(CodecId::LC3, cfg.clone()));
    a.set_state(AseState::CodecConfigured);
    let v = AseValue::from(&a).encode();
    assert_eq!(&v[..2], &[1, 1]);
    let dec = AseValue::decode(&v).unwrap();
    assert_matches!(
        dec.params,
        AseParams::CodecConfigured { codec_id: CodecId::LC3, ref cfg, .. } if cfg.as_bytes() == a.codec().unwrap().cfg.as_bytes()
    );

    let mut q = QosCfg::new(1, 2, 10_000, 100);
    q.framing = Framing::Framed;
    a.qos = Some(q);
    a.set_state(AseState::QosConfigured);
    let dec = AseValue::decode(&AseValue::from(&a).encode()).unwrap();
    assert_eq!(dec.params, AseParams::QosConfigured(q));

    a.metadata = Ltv::from([0x03, 0x02, 0x04, 0x00]);
    a.set_state(AseState::Streaming);
    let v = AseValue::from(&a).encode();
    assert_eq!(v, [1, 4, 1, 2, 4, 0x03, 0x02, 0x04, 0x00]);
    assert_eq!(AseValue::decode(&v).unwrap().state, AseState::Streaming);

    a.set_state(AseState::Releasing);
    assert_eq!(AseValue::from(&a).encode(), [1, 6]);
    assert_eq!(AseValue::decode(&[1, 7]), None);
    assert_eq!(AseValue::decode(&[1, 2, 0]), None);
}

#[test]
fn rejection_display() {
    assert_eq!(
        Rejection::invalid_cfg(Reason::MaxSdu).to_string(),
        "InvalidConfigurationParameterValue (MaxSdu)"
    );
    assert_eq!(
        Rejection::new(RspCode::RejectedMetadata, 0x02).to_string(),
        "RejectedMetadata (0x02)"
    );
    assert_eq!(Rejection::invalid_transition().to_string(), "InvalidAseStateMachineTransition");
}
