//! End-to-end tests: two engines wired back to back over the loopback
//! transport, exchanging control and data frames.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use dmapipe_mux::{ChannelHandler, Multiplexer, MuxConfig, MuxError, PacketBuf};
use dmapipe_transport::{BusTransport, LoopbackTransport};

struct RecordingHandler {
    received: Sender<Bytes>,
    write_done: Sender<Bytes>,
}

impl RecordingHandler {
    fn new() -> (Arc<Self>, Receiver<Bytes>, Receiver<Bytes>) {
        let (received_tx, received_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        (
            Arc::new(Self {
                received: received_tx,
                write_done: done_tx,
            }),
            received_rx,
            done_rx,
        )
    }
}

impl ChannelHandler for RecordingHandler {
    fn on_receive(&self, payload: Bytes) {
        let _ = self.received.send(payload);
    }

    fn on_write_done(&self, payload: Bytes) {
        let _ = self.write_done.send(payload);
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

struct Pair {
    left: Multiplexer,
    right: Multiplexer,
    left_transport: LoopbackTransport,
}

fn start_pair() -> Pair {
    let (left_transport, right_transport) = LoopbackTransport::pair();
    let left = Multiplexer::start(
        Arc::new(left_transport.clone()) as Arc<dyn BusTransport>,
        MuxConfig::immediate(),
    )
    .unwrap();
    let right = Multiplexer::start(
        Arc::new(right_transport) as Arc<dyn BusTransport>,
        MuxConfig::immediate(),
    )
    .unwrap();
    assert!(wait_until(|| left.is_ready() && right.is_ready()));
    Pair {
        left,
        right,
        left_transport,
    }
}

/// Open `ch` on both engines and wait until both see it fully open.
fn open_channel(
    pair: &Pair,
    ch: u8,
) -> (
    (Receiver<Bytes>, Receiver<Bytes>),
    (Receiver<Bytes>, Receiver<Bytes>),
) {
    let (left_handler, left_received, left_done) = RecordingHandler::new();
    let (right_handler, right_received, right_done) = RecordingHandler::new();
    pair.left.open(ch, left_handler).unwrap();
    pair.right.open(ch, right_handler).unwrap();
    assert!(wait_until(|| pair.left.is_open(ch) && pair.right.is_open(ch)));
    ((left_received, left_done), (right_received, right_done))
}

#[test]
fn open_handshake_completes_both_sides() {
    let pair = start_pair();
    open_channel(&pair, 1);

    let table = pair.left.channel_table();
    assert!(table[1].is_open());
    assert!(!table[0].local_open);
}

#[test]
fn payload_crosses_the_pipe_and_write_done_fires() {
    let pair = start_pair();
    let ((_, left_done), (right_received, _)) = open_channel(&pair, 3);

    pair.left
        .write(3, PacketBuf::from_payload(b"hello, peer"))
        .unwrap();

    let payload = right_received.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(payload.as_ref(), b"hello, peer");

    let done = left_done.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(done.as_ref(), b"hello, peer");

    assert!(wait_until(|| pair.right.stats().read_bytes == 11));
    assert!(wait_until(|| pair.left.stats().write_bytes == 11));
}

#[test]
fn traffic_flows_both_directions() {
    let pair = start_pair();
    let ((left_received, _), (right_received, _)) = open_channel(&pair, 2);

    pair.left.write(2, PacketBuf::from_payload(b"ping")).unwrap();
    let payload = right_received.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(payload.as_ref(), b"ping");

    pair.right.write(2, PacketBuf::from_payload(b"pong")).unwrap();
    let payload = left_received.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(payload.as_ref(), b"pong");
}

#[test]
fn channels_are_independent() {
    let pair = start_pair();
    let (_, (rx_ch1, _)) = open_channel(&pair, 1);
    let (_, (rx_ch5, _)) = open_channel(&pair, 5);

    pair.left.write(5, PacketBuf::from_payload(b"five")).unwrap();
    pair.left.write(1, PacketBuf::from_payload(b"one")).unwrap();

    assert_eq!(
        rx_ch5.recv_timeout(Duration::from_secs(5)).unwrap().as_ref(),
        b"five"
    );
    assert_eq!(
        rx_ch1.recv_timeout(Duration::from_secs(5)).unwrap().as_ref(),
        b"one"
    );
}

#[test]
fn close_propagates_to_the_peer() {
    let pair = start_pair();
    open_channel(&pair, 4);

    pair.left.close(4).unwrap();

    assert!(wait_until(|| !pair.right.is_remote_open(4)));
    assert!(matches!(
        pair.left.write(4, PacketBuf::from_payload(b"x")),
        Err(MuxError::ChannelNotOpen { id: 4 })
    ));
    assert!(matches!(
        pair.right.write(4, PacketBuf::from_payload(b"x")),
        Err(MuxError::ChannelNotOpen { id: 4 })
    ));
}

#[test]
fn reopen_after_close_restores_traffic() {
    let pair = start_pair();
    open_channel(&pair, 4);
    pair.left.close(4).unwrap();
    assert!(wait_until(|| !pair.right.is_remote_open(4)));

    let (handler, left_received, _done) = RecordingHandler::new();
    pair.left.open(4, handler).unwrap();
    assert!(wait_until(|| pair.left.is_open(4) && pair.right.is_open(4)));

    pair.right.write(4, PacketBuf::from_payload(b"back")).unwrap();
    assert_eq!(
        left_received
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .as_ref(),
        b"back"
    );
}

#[test]
fn injected_junk_is_dropped_without_stalling_the_pipe() {
    let pair = start_pair();
    let ((left_received, _), _) = open_channel(&pair, 1);

    for _ in 0..3 {
        pair.left_transport
            .inject_inbound(Bytes::from_static(b"\xde\xad\xbe\xef\x00\x00\x00\x00"));
    }
    assert!(wait_until(|| pair.left.stats().rx_dropped == 3));
    assert!(left_received.try_recv().is_err());

    // The pipe is still alive: real traffic keeps flowing.
    pair.right.write(1, PacketBuf::from_payload(b"alive")).unwrap();
    assert_eq!(
        left_received
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .as_ref(),
        b"alive"
    );
}

#[test]
fn many_frames_arrive_in_order() {
    let pair = start_pair();
    let (_, (right_received, _)) = open_channel(&pair, 6);

    for i in 0..16u32 {
        let payload = format!("frame-{i:04}");
        pair.left
            .write(6, PacketBuf::from_payload(payload.as_bytes()))
            .unwrap();
    }

    for i in 0..16u32 {
        let payload = right_received.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(payload.as_ref(), format!("frame-{i:04}").as_bytes());
    }
}

#[test]
fn writes_to_an_unopened_peer_channel_fail() {
    let pair = start_pair();
    let (handler, _received, _done) = RecordingHandler::new();
    pair.left.open(7, handler).unwrap();

    // The peer never opened channel 7.
    assert!(matches!(
        pair.left.write(7, PacketBuf::from_payload(b"x")),
        Err(MuxError::ChannelNotOpen { id: 7 })
    ));
}
