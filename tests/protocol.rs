//! Protocol behaviour observed through the transport surface.

use bytes::Bytes;

use vbc::{
    control::{ControlConfig, ControlDispatcher, ControlOutcome, ControlRequest, ControlStage, Direction, RequestType},
    engine::{Engine, EngineConfig, LifecycleEvent, Phase, ProtocolState},
    frame::{CommandFrame, Status, StatusFrame},
    transport::{BulkTransport, TxFifo},
    CTRL_ECHO, CTRL_ENTER_PROGRAMMING_MODE, CTRL_INIT, CTRL_REPLY_LEN, MAX_PACKET_SIZE, PROTO_DEFAULT,
    VENDOR_INTERFACE,
};

mod util;
use util::*;

const ROUNDS: usize = 200;

fn status_frames(writes: &[Bytes]) -> Vec<StatusFrame> {
    writes.iter().map(|w| StatusFrame::parse(w).expect("not a status frame")).collect()
}

#[test]
fn write_in_any_chunking_yields_one_ready_status() {
    init_log();

    let mut chunker = Chunker::new(SEED, 3 * MAX_PACKET_SIZE);
    let mut engine = Engine::default();
    let mut tx = FlakyTransport::new(SEED, 256);

    for _ in 0..ROUNDS {
        let len = chunker.length(2_000);
        tx.reroll();
        while tx.write_available() < 3 {
            tx.reroll();
        }

        assert_eq!(engine.receive(&CommandFrame::write(PROTO_DEFAULT, len).to_bytes(), &mut tx), None);

        let chunks = chunker.split(len.into());
        let (last, head) = chunks.split_last().unwrap();
        for chunk in head {
            assert_eq!(engine.receive(chunk, &mut tx), None);
            assert_eq!(engine.phase(), Phase::AwaitingWriteData);
        }
        assert_eq!(engine.receive(last, &mut tx), Some(StatusFrame::new(Status::Ready, len)));

        assert_eq!(status_frames(&tx.take_writes()), [StatusFrame::new(Status::Ready, len)]);
        assert_eq!(tx.unflushed, 0);
        assert_eq!(engine.state(), ProtocolState::IDLE);
    }
}

#[test]
fn write_without_payload_is_acknowledged() {
    let mut engine = Engine::default();
    let mut fifo = TxFifo::default();

    engine.receive(&CommandFrame::write(PROTO_DEFAULT, 0).to_bytes(), &mut fifo);
    assert_eq!(fifo.take_flushed(), Some(Bytes::from_static(&[2, 0, 0])));
    assert_eq!(engine.phase(), Phase::Idle);
}

#[test]
fn read_delivers_exact_length_in_bounded_chunks() {
    init_log();

    let mut chunker = Chunker::new(SEED + 1, 1);
    let mut engine = Engine::default();
    let mut tx = FlakyTransport::new(SEED + 1, 200);

    for _ in 0..ROUNDS {
        let len = chunker.length(5_000);
        assert_eq!(engine.receive(&CommandFrame::read(PROTO_DEFAULT, len).to_bytes(), &mut tx), None);

        while engine.phase() == Phase::AwaitingReadSend {
            tx.reroll();
            let space = tx.write_available();
            let flushes = tx.flushes;

            let sent = engine.poll(&mut tx);
            assert!(sent <= MAX_PACKET_SIZE);
            assert!(sent <= space);
            if sent > 0 {
                assert_eq!(tx.flushes, flushes + 1, "chunk was not flushed");
            }
        }

        let writes = tx.take_writes();
        assert_eq!(writes.iter().map(Bytes::len).sum::<usize>(), usize::from(len));
        assert!(writes.iter().all(|w| w.len() <= MAX_PACKET_SIZE && w.iter().all(|&b| b == b'x')));

        // completion is silent
        tx.reroll();
        assert_eq!(engine.poll(&mut tx), 0);
        assert!(tx.writes.is_empty());
    }
}

#[test]
fn read_chunk_cap_is_configurable() {
    let mut engine = Engine::new(EngineConfig::default().with_chunk_cap(16).with_fill(0));
    let mut fifo = TxFifo::new(128);

    engine.receive(&CommandFrame::read(PROTO_DEFAULT, 40).to_bytes(), &mut fifo);
    let mut sizes = Vec::new();
    loop {
        match engine.poll(&mut fifo) {
            0 => break,
            n => sizes.push(n),
        }
    }
    assert_eq!(sizes, [16, 16, 8]);
}

#[test]
fn read_without_payload_is_silent() {
    let mut engine = Engine::default();
    let mut fifo = TxFifo::default();

    assert_eq!(engine.receive(&CommandFrame::read(PROTO_DEFAULT, 0).to_bytes(), &mut fifo), None);
    assert_eq!(engine.poll(&mut fifo), 0);
    assert!(fifo.is_empty());
    assert_eq!(engine.state(), ProtocolState::IDLE);
}

#[test]
fn malformed_frames_report_error_and_stay_idle() {
    let mut engine = Engine::default();
    let mut fifo = TxFifo::default();

    let frames: [&[u8]; 5] = [&[9], &[9, 16, 4], &[9, 16, 4, 0, 0], &[7, 16, 4, 0], &[0, 0, 0, 0]];
    for frame in frames {
        assert_eq!(engine.receive(frame, &mut fifo), Some(StatusFrame::new(Status::Error, 0)), "{frame:?}");
        assert_eq!(fifo.take_flushed(), Some(Bytes::from_static(&[3, 0, 0])));
        assert_eq!(engine.state(), ProtocolState::IDLE);
    }
}

#[test]
fn lifecycle_reset_discards_partial_write() {
    let events = [
        LifecycleEvent::Mounted,
        LifecycleEvent::Unmounted,
        LifecycleEvent::Suspended { remote_wakeup: false },
        LifecycleEvent::Resumed,
    ];

    for event in events {
        let mut engine = Engine::default();
        let mut fifo = TxFifo::default();

        engine.receive(&CommandFrame::write(PROTO_DEFAULT, 20).to_bytes(), &mut fifo);
        engine.receive(&[0; 10], &mut fifo);
        assert_eq!(engine.state().handled_len, 10);

        engine.lifecycle(event);
        assert_eq!(engine.state(), ProtocolState::IDLE);
        assert!(!fifo.has_flushed());

        // the remaining payload now parses as a malformed command
        assert_eq!(engine.receive(&[0; 10], &mut fifo), Some(StatusFrame::new(Status::Error, 0)));
    }
}

#[test]
fn lifecycle_reset_stops_read() {
    let mut engine = Engine::default();
    let mut fifo = TxFifo::new(1024);

    engine.receive(&CommandFrame::read(PROTO_DEFAULT, 500).to_bytes(), &mut fifo);
    engine.poll(&mut fifo);
    engine.lifecycle(LifecycleEvent::Unmounted);
    fifo.clear();

    assert_eq!(engine.poll(&mut fifo), 0);
    assert!(fifo.is_empty());
}

#[test]
fn control_echo_and_init() {
    let dispatcher = ControlDispatcher::default();
    let mut engine = Engine::default();
    let mut fifo = TxFifo::default();
    let mut ctrl = ControlRecorder::default();

    let echo = ControlRequest::class(Direction::In, CTRL_ECHO, VENDOR_INTERFACE);
    assert!(dispatcher.handle(&mut engine, ControlStage::Setup, &echo, &mut ctrl));
    let echo_out = ControlRequest::class(Direction::Out, CTRL_ECHO, VENDOR_INTERFACE);
    assert!(!dispatcher.handle(&mut engine, ControlStage::Setup, &echo_out, &mut ctrl));

    engine.receive(&CommandFrame::read(PROTO_DEFAULT, 100).to_bytes(), &mut fifo);
    assert_eq!(engine.phase(), Phase::AwaitingReadSend);

    let init = ControlRequest::class(Direction::In, CTRL_INIT, VENDOR_INTERFACE);
    assert!(dispatcher.handle(&mut engine, ControlStage::Setup, &init, &mut ctrl));
    assert_eq!(engine.state(), ProtocolState::IDLE);

    assert_eq!(ctrl.replies.len(), 2);
    assert_eq!(ctrl.replies[0], Bytes::from_static(&[CTRL_ECHO]));
    assert_eq!(ctrl.replies[1].len(), CTRL_REPLY_LEN);
    assert_eq!(ctrl.replies[1][..2], [0x08, 0x03]);
}

#[test]
fn init_discards_queued_read_data() {
    let dispatcher = ControlDispatcher::default();
    let mut engine = Engine::default();
    let mut ctrl = ControlRecorder::default();

    engine.receive(&CommandFrame::read(PROTO_DEFAULT, 500).to_bytes(), &mut ctrl.fifo);
    assert_eq!(engine.poll(&mut ctrl.fifo), MAX_PACKET_SIZE);
    assert_eq!(ctrl.fifo.write_available(), 0);

    let init = ControlRequest::class(Direction::In, CTRL_INIT, VENDOR_INTERFACE);
    assert!(dispatcher.handle(&mut engine, ControlStage::Setup, &init, &mut ctrl));
    assert_eq!(engine.state(), ProtocolState::IDLE);
    assert!(ctrl.fifo.is_empty());

    let status = engine.receive(&CommandFrame::write(PROTO_DEFAULT, 0).to_bytes(), &mut ctrl.fifo);
    assert_eq!(status, Some(StatusFrame::new(Status::Ready, 0)));
    assert_eq!(ctrl.fifo.take_flushed(), Some(Bytes::from_static(&[2, 0, 0])));
    assert_eq!(ctrl.fifo.take_flushed(), None);
}

#[test]
fn status_never_reaches_the_wire_truncated() {
    let mut engine = Engine::default();
    let mut fifo = TxFifo::new(MAX_PACKET_SIZE + 2);

    engine.receive(&CommandFrame::read(PROTO_DEFAULT, 200).to_bytes(), &mut fifo);
    assert_eq!(engine.poll(&mut fifo), MAX_PACKET_SIZE);
    assert_eq!(engine.receive(&[0; 3], &mut fifo), None);

    let mut wire = Vec::new();
    while let Some(packet) = fifo.take_flushed() {
        wire.extend_from_slice(&packet);
    }
    assert_eq!(wire, vec![b'x'; MAX_PACKET_SIZE]);
}

#[test]
fn control_requests_outside_contract_get_no_response() {
    let dispatcher = ControlDispatcher::new(ControlConfig::default().with_interface(2));
    let mut engine = Engine::default();
    let mut ctrl = ControlRecorder::default();

    let wrong_interface = ControlRequest::class(Direction::In, CTRL_ECHO, 0);
    let mut wrong_type = ControlRequest::class(Direction::In, CTRL_ECHO, 2);
    wrong_type.request_type = RequestType::Standard;
    let setup = ControlRequest::parse(&[0xc1, CTRL_ECHO, 0, 0, 2, 0, 1, 0]).unwrap();

    for req in [wrong_interface, wrong_type, setup] {
        assert_eq!(dispatcher.dispatch(&mut engine, ControlStage::Setup, &req), ControlOutcome::Reject);
        assert!(!dispatcher.handle(&mut engine, ControlStage::Setup, &req, &mut ctrl));
    }
    assert!(ctrl.replies.is_empty());

    let ok = ControlRequest::parse(&[0xa1, CTRL_ECHO, 0, 0, 2, 0, 1, 0]).unwrap();
    assert!(dispatcher.handle(&mut engine, ControlStage::Setup, &ok, &mut ctrl));
    assert_eq!(ctrl.replies, [Bytes::from_static(&[CTRL_ECHO])]);
}

#[test]
fn programming_mode_reboots_without_reply() {
    let dispatcher = ControlDispatcher::default();
    let mut engine = Engine::default();
    let mut ctrl = ControlRecorder::default();

    let req = ControlRequest::class(Direction::Out, CTRL_ENTER_PROGRAMMING_MODE, VENDOR_INTERFACE);
    assert!(!dispatcher.handle(&mut engine, ControlStage::Setup, &req, &mut ctrl));
    assert_eq!(ctrl.reboots, 1);
    assert!(ctrl.replies.is_empty());
}
