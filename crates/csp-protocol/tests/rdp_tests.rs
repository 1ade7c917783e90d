//! RDP state machine scenarios against an in-memory I/O.

use csp_core::Packet;
use csp_protocol::rdp::*;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

type Seg = Box<Packet>;

struct MockIo {
    sent: Vec<Seg>,
    delivered: Vec<Seg>,
    room: usize,
    capacity: usize,
    iss: u16,
}

impl MockIo {
    fn new(iss: u16) -> Self {
        Self {
            sent: Vec::new(),
            delivered: Vec::new(),
            room: 10,
            capacity: 10,
            iss,
        }
    }

    fn take_sent(&mut self) -> Vec<Seg> {
        std::mem::take(&mut self.sent)
    }

    fn take_one(&mut self) -> Seg {
        let mut sent = self.take_sent();
        assert_eq!(sent.len(), 1, "expected exactly one segment");
        sent.remove(0)
    }
}

impl RdpIo for MockIo {
    type Buf = Seg;

    fn alloc(&mut self) -> Option<Seg> {
        Some(Box::new(Packet::new()))
    }

    fn duplicate(&mut self, packet: &Packet) -> Option<Seg> {
        Some(Box::new(packet.clone()))
    }

    fn transmit(&mut self, segment: Seg) {
        self.sent.push(segment);
    }

    fn deliver(&mut self, packet: Seg) -> Result<(), Seg> {
        if self.room == 0 {
            return Err(packet);
        }
        self.delivered.push(packet);
        Ok(())
    }

    fn delivery_room(&self) -> usize {
        self.room
    }

    fn delivery_capacity(&self) -> usize {
        self.capacity
    }

    fn initial_sequence(&mut self) -> u16 {
        self.iss
    }
}

fn header_of(p: &Packet) -> RdpHeader {
    let mut copy = p.clone();
    RdpHeader::strip_from(&mut copy).unwrap()
}

fn data(bytes: &[u8]) -> Seg {
    let mut p = Packet::new();
    p.set_payload(bytes).unwrap();
    Box::new(p)
}

fn segment(flags: u8, seq: u16, ack: u16, payload: &[u8]) -> Seg {
    let mut p = data(payload);
    RdpHeader::new(flags, seq, ack).append_to(&mut p).unwrap();
    p
}

fn copy(seg: &Seg) -> Seg {
    Box::new((**seg).clone())
}

struct Pair {
    client: RdpConnection<Seg>,
    cio: MockIo,
    server: RdpConnection<Seg>,
    sio: MockIo,
}

const CLIENT_ISS: u16 = 100;
const SERVER_ISS: u16 = 500;

fn open_pair(opts: RdpOptions) -> Pair {
    let mut client = RdpConnection::new(opts, 0);
    let mut cio = MockIo::new(CLIENT_ISS);
    let mut server = RdpConnection::new(RdpOptions::default(), 0);
    let mut sio = MockIo::new(SERVER_ISS);

    client.connect(0, &mut cio).unwrap();
    let syn = cio.take_one();
    assert_eq!(server.on_segment(syn, 0, &mut sio), SegmentOutcome::Keep);
    let synack = sio.take_one();
    assert_eq!(client.on_segment(synack, 0, &mut cio), SegmentOutcome::Established);
    let ack = cio.take_one();
    assert_eq!(server.on_segment(ack, 0, &mut sio), SegmentOutcome::Established);

    Pair {
        client,
        cio,
        server,
        sio,
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[test]
fn three_way_handshake() {
    let opts = RdpOptions {
        window_size: 6,
        ..RdpOptions::default()
    };
    let mut client = RdpConnection::new(opts, 0);
    let mut cio = MockIo::new(CLIENT_ISS);
    let mut server = RdpConnection::new(RdpOptions::default(), 0);
    let mut sio = MockIo::new(SERVER_ISS);

    client.connect(0, &mut cio).unwrap();
    assert_eq!(client.state(), RdpState::SynSent);
    let syn = cio.take_one();
    let h = header_of(&syn);
    assert!(h.has(FLAG_SYN) && !h.has(FLAG_ACK));
    assert_eq!(h.seq, CLIENT_ISS);
    assert_eq!(syn.len(), SYN_OPTIONS_SIZE + HEADER_SIZE);

    server.on_segment(syn, 5, &mut sio);
    assert_eq!(server.state(), RdpState::SynRcvd);
    assert_eq!(server.options().window_size, 6, "server adopts client options");
    let synack = sio.take_one();
    let h = header_of(&synack);
    assert!(h.has(FLAG_SYN) && h.has(FLAG_ACK));
    assert_eq!((h.seq, h.ack), (SERVER_ISS, CLIENT_ISS));

    assert_eq!(client.on_segment(synack, 10, &mut cio), SegmentOutcome::Established);
    assert!(client.is_open());
    let ack = cio.take_one();
    let h = header_of(&ack);
    assert_eq!(h.flags, FLAG_ACK);
    assert_eq!(h.ack, SERVER_ISS);

    assert_eq!(server.on_segment(ack, 15, &mut sio), SegmentOutcome::Established);
    assert!(server.is_open());
    assert_eq!(server.stats().unacked, 0);
    assert_eq!(client.stats().unacked, 0);
}

#[test]
fn connect_twice_is_busy() {
    let mut client = RdpConnection::new(RdpOptions::default(), 0);
    let mut cio = MockIo::new(1);
    client.connect(0, &mut cio).unwrap();
    assert!(matches!(
        client.connect(0, &mut cio),
        Err(csp_protocol::RdpError::Busy(RdpState::SynSent))
    ));
}

#[test]
fn unanswered_syn_is_retransmitted() {
    let mut client = RdpConnection::new(RdpOptions::default(), 0);
    let mut cio = MockIo::new(7);
    client.connect(0, &mut cio).unwrap();
    cio.take_sent();

    assert_eq!(client.check_timeouts(999, &mut cio), TimerOutcome::Keep);
    assert!(cio.sent.is_empty());
    client.check_timeouts(1000, &mut cio);
    let again = cio.take_one();
    assert!(header_of(&again).has(FLAG_SYN));
}

#[test]
fn lost_handshake_ack_recovered_by_data() {
    let mut client = RdpConnection::new(RdpOptions::default(), 0);
    let mut cio = MockIo::new(CLIENT_ISS);
    let mut server = RdpConnection::new(RdpOptions::default(), 0);
    let mut sio = MockIo::new(SERVER_ISS);

    client.connect(0, &mut cio).unwrap();
    server.on_segment(cio.take_one(), 0, &mut sio);
    client.on_segment(sio.take_one(), 0, &mut cio);
    let _lost_ack = cio.take_one();

    client.send(data(b"first"), 1, &mut cio).unwrap();
    let seg = cio.take_one();
    assert_eq!(server.on_segment(seg, 1, &mut sio), SegmentOutcome::Established);
    assert!(server.is_open());
    assert_eq!(sio.delivered.len(), 1);
    assert_eq!(sio.delivered[0].payload(), b"first");
}

#[test]
fn non_syn_on_new_connection_closes() {
    let mut server: RdpConnection<Seg> = RdpConnection::new(RdpOptions::default(), 0);
    let mut sio = MockIo::new(1);
    let seg = segment(FLAG_ACK, 10, 20, b"stray");
    assert_eq!(server.on_segment(seg, 0, &mut sio), SegmentOutcome::Close);
}

#[test]
fn syn_with_bad_options_closes() {
    let mut server: RdpConnection<Seg> = RdpConnection::new(RdpOptions::default(), 0);
    let mut sio = MockIo::new(1);
    let bad = RdpOptions {
        window_size: 0,
        ..RdpOptions::default()
    };
    let seg = segment(FLAG_SYN, 10, 0, &bad.to_syn_payload());
    assert_eq!(server.on_segment(seg, 0, &mut sio), SegmentOutcome::Close);
    assert!(sio.sent.is_empty());
}

// ---------------------------------------------------------------------------
// Data transfer
// ---------------------------------------------------------------------------

#[test]
fn in_order_delivery_with_delayed_ack() {
    let mut p = open_pair(RdpOptions::default());

    p.client.send(data(b"one"), 1, &mut p.cio).unwrap();
    p.server.on_segment(p.cio.take_one(), 1, &mut p.sio);
    assert_eq!(p.sio.delivered.len(), 1);
    assert!(p.sio.sent.is_empty(), "first ack is held back");

    p.client.send(data(b"two"), 2, &mut p.cio).unwrap();
    p.server.on_segment(p.cio.take_one(), 2, &mut p.sio);
    let ack = p.sio.take_one();
    assert_eq!(header_of(&ack).ack, CLIENT_ISS + 2);

    assert_eq!(p.client.in_flight(), 2);
    p.client.on_segment(ack, 3, &mut p.cio);
    assert_eq!(p.client.in_flight(), 0);
    assert_eq!(p.client.stats().unacked, 0);

    let payloads: Vec<&[u8]> = p.sio.delivered.iter().map(|b| b.payload()).collect();
    assert_eq!(payloads, vec![&b"one"[..], &b"two"[..]]);
}

#[test]
fn immediate_ack_without_delay() {
    let opts = RdpOptions {
        delayed_acks: false,
        ..RdpOptions::default()
    };
    let mut p = open_pair(opts);
    p.client.send(data(b"x"), 1, &mut p.cio).unwrap();
    p.server.on_segment(p.cio.take_one(), 1, &mut p.sio);
    let ack = p.sio.take_one();
    assert_eq!(header_of(&ack).ack, CLIENT_ISS + 1);
}

#[test]
fn held_ack_sent_on_ack_timeout() {
    let mut p = open_pair(RdpOptions::default());
    p.client.send(data(b"x"), 0, &mut p.cio).unwrap();
    p.server.on_segment(p.cio.take_one(), 0, &mut p.sio);
    assert!(p.sio.sent.is_empty());

    p.server.check_timeouts(249, &mut p.sio);
    assert!(p.sio.sent.is_empty());
    p.server.check_timeouts(250, &mut p.sio);
    let ack = p.sio.take_one();
    assert_eq!(header_of(&ack).ack, CLIENT_ISS + 1);
}

#[test]
fn out_of_order_segments_reordered() {
    let mut p = open_pair(RdpOptions::default());
    for (i, body) in [b"a", b"b", b"c"].iter().enumerate() {
        p.client.send(data(*body), i as u64, &mut p.cio).unwrap();
    }
    let mut segs = p.cio.take_sent();
    let third = segs.pop().unwrap();
    let second = segs.pop().unwrap();
    let first = segs.pop().unwrap();

    p.server.on_segment(third, 5, &mut p.sio);
    p.server.on_segment(second, 5, &mut p.sio);
    assert!(p.sio.delivered.is_empty());
    assert_eq!(p.server.stats().reordered, 2);

    let eacks = p.sio.take_sent();
    assert_eq!(eacks.len(), 2);
    let last = eacks.last().unwrap();
    let h = header_of(last);
    assert!(h.has(FLAG_EAK));
    assert_eq!(h.ack, CLIENT_ISS);
    assert_eq!(last.len(), HEADER_SIZE + 4);

    p.server.on_segment(first, 6, &mut p.sio);
    let payloads: Vec<&[u8]> = p.sio.delivered.iter().map(|b| b.payload()).collect();
    assert_eq!(payloads, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    assert_eq!(p.server.stats().rcv_cur, CLIENT_ISS + 3);
    assert_eq!(p.server.stats().reordered, 0);
}

#[test]
fn duplicate_segment_delivered_once() {
    let mut p = open_pair(RdpOptions::default());
    p.client.send(data(b"once"), 0, &mut p.cio).unwrap();
    let seg = p.cio.take_one();
    let dup = copy(&seg);

    p.server.on_segment(seg, 1, &mut p.sio);
    p.server.on_segment(dup, 2, &mut p.sio);
    assert_eq!(p.sio.delivered.len(), 1);

    // The duplicate is answered so a sender that lost our ack can move on.
    let reply = p.sio.take_one();
    assert_eq!(header_of(&reply).ack, CLIENT_ISS + 1);
}

#[test]
fn eack_prunes_and_fast_retransmits() {
    let mut p = open_pair(RdpOptions::default());
    for body in [b"a", b"b", b"c"] {
        p.client.send(data(body), 0, &mut p.cio).unwrap();
    }
    let mut segs = p.cio.take_sent();
    let third = segs.pop().unwrap();
    let second = segs.pop().unwrap();
    drop(segs);

    p.server.on_segment(second, 1, &mut p.sio);
    p.server.on_segment(third, 1, &mut p.sio);
    let eack = p.sio.take_sent().pop().unwrap();

    p.client.on_segment(eack, 2, &mut p.cio);
    assert_eq!(p.client.stats().unacked, 1);
    let resent = p.cio.take_one();
    assert_eq!(header_of(&resent).seq, CLIENT_ISS + 1);

    p.server.on_segment(resent, 3, &mut p.sio);
    assert_eq!(p.sio.delivered.len(), 3);
    let ack = p.sio.take_one();
    p.client.on_segment(ack, 4, &mut p.cio);
    assert_eq!(p.client.in_flight(), 0);
}

#[test]
fn full_receive_queue_drops_segment_for_retransmission() {
    let mut p = open_pair(RdpOptions::default());
    p.sio.room = 0;
    p.client.send(data(b"later"), 0, &mut p.cio).unwrap();
    let seg = p.cio.take_one();
    let retry = copy(&seg);

    p.server.on_segment(seg, 1, &mut p.sio);
    assert!(p.sio.delivered.is_empty());
    assert_eq!(p.server.stats().rcv_cur, CLIENT_ISS);

    p.sio.room = 10;
    p.server.on_segment(retry, 2, &mut p.sio);
    assert_eq!(p.sio.delivered.len(), 1);
}

#[test]
fn ack_held_while_receiver_lacks_room_for_window() {
    let opts = RdpOptions {
        delayed_acks: false,
        ..RdpOptions::default()
    };
    let mut p = open_pair(opts);
    p.sio.room = 2;
    p.client.send(data(b"x"), 0, &mut p.cio).unwrap();
    p.server.on_segment(p.cio.take_one(), 0, &mut p.sio);
    assert_eq!(p.sio.delivered.len(), 1);
    assert!(p.sio.sent.is_empty());

    p.server.check_timeouts(1_000, &mut p.sio);
    assert!(p.sio.sent.is_empty());

    p.sio.room = 10;
    p.server.check_timeouts(1_001, &mut p.sio);
    assert_eq!(header_of(&p.sio.take_one()).ack, CLIENT_ISS + 1);
}

#[test]
fn window_wider_than_receive_queue_still_acks() {
    let opts = RdpOptions {
        window_size: 12,
        ..RdpOptions::default()
    };
    let mut p = open_pair(opts);
    assert_eq!(p.server.options().window_size, 12);

    p.client.send(data(b"x"), 0, &mut p.cio).unwrap();
    p.server.on_segment(p.cio.take_one(), 0, &mut p.sio);
    assert_eq!(p.sio.delivered.len(), 1);
    // Below the delay count; the ack waits for the timer.
    assert!(p.sio.sent.is_empty());

    p.server.check_timeouts(u64::from(opts.ack_timeout_ms), &mut p.sio);
    assert_eq!(header_of(&p.sio.take_one()).ack, CLIENT_ISS + 1);
}

#[test]
fn window_wider_than_receive_queue_acks_on_delay_count() {
    let opts = RdpOptions {
        window_size: 12,
        ack_delay_count: 2,
        ..RdpOptions::default()
    };
    let mut p = open_pair(opts);
    // Two of three places taken by unread packets.
    p.sio.capacity = 3;
    p.sio.room = 1;

    p.client.send(data(b"a"), 0, &mut p.cio).unwrap();
    p.client.send(data(b"b"), 0, &mut p.cio).unwrap();
    for seg in p.cio.take_sent() {
        p.server.on_segment(seg, 1, &mut p.sio);
    }
    assert_eq!(p.sio.delivered.len(), 2);
    assert!(p.sio.sent.is_empty());
    p.server.check_timeouts(1_000, &mut p.sio);
    assert!(p.sio.sent.is_empty());

    p.sio.room = 3;
    p.server.check_timeouts(1_001, &mut p.sio);
    assert_eq!(header_of(&p.sio.take_one()).ack, CLIENT_ISS + 2);
}

#[test]
fn send_rejects_empty_and_unopened() {
    let mut p = open_pair(RdpOptions::default());
    assert!(matches!(
        p.client.send(data(b""), 0, &mut p.cio),
        Err(csp_protocol::RdpError::EmptySegment)
    ));

    let mut fresh: RdpConnection<Seg> = RdpConnection::new(RdpOptions::default(), 0);
    let mut io = MockIo::new(0);
    assert!(matches!(
        fresh.send(data(b"x"), 0, &mut io),
        Err(csp_protocol::RdpError::NotOpen(RdpState::Closed))
    ));
}

// ---------------------------------------------------------------------------
// Window and retransmission
// ---------------------------------------------------------------------------

#[test]
fn window_limits_outstanding_segments() {
    let mut p = open_pair(RdpOptions::default());
    for i in 0..4u8 {
        assert!(p.client.can_send());
        p.client.send(data(&[i]), 0, &mut p.cio).unwrap();
    }
    assert!(!p.client.can_send());
    assert!(matches!(
        p.client.send(data(b"overflow"), 0, &mut p.cio),
        Err(csp_protocol::RdpError::WindowFull)
    ));
    assert_eq!(p.cio.take_sent().len(), 4);
}

#[test]
fn oldest_segment_retransmitted_once_per_timeout() {
    let mut p = open_pair(RdpOptions::default());
    for i in 0..4u8 {
        p.client.send(data(&[i]), 0, &mut p.cio).unwrap();
    }
    p.cio.take_sent();

    assert_eq!(p.client.check_timeouts(999, &mut p.cio), TimerOutcome::Keep);
    assert!(p.cio.sent.is_empty());

    p.client.check_timeouts(1_000, &mut p.cio);
    let first = p.cio.take_one();
    assert_eq!(header_of(&first).seq, CLIENT_ISS + 1);
    assert_eq!(first.payload()[0], 0);

    p.client.check_timeouts(1_500, &mut p.cio);
    assert!(p.cio.sent.is_empty(), "no second retransmit inside the interval");

    p.client.check_timeouts(2_000, &mut p.cio);
    assert_eq!(header_of(&p.cio.take_one()).seq, CLIENT_ISS + 1);

    assert_eq!(p.client.in_flight(), 4);
    assert!(!p.client.can_send());
    assert_eq!(p.client.stats().snd_una, CLIENT_ISS + 1);
}

#[test]
fn retries_exhausted_closes() {
    let mut p = open_pair(RdpOptions::default());
    p.client.send(data(b"lost"), 0, &mut p.cio).unwrap();
    p.cio.take_sent();

    for n in 1..=MAX_RETRIES as u64 {
        assert_eq!(p.client.check_timeouts(n * 1_000, &mut p.cio), TimerOutcome::Keep);
    }
    assert_eq!(p.cio.take_sent().len(), MAX_RETRIES as usize);

    let t = (MAX_RETRIES as u64 + 1) * 1_000;
    assert_eq!(p.client.check_timeouts(t, &mut p.cio), TimerOutcome::Close);
    assert!(header_of(&p.cio.take_one()).has(FLAG_RST));
}

#[test]
fn inactivity_closes() {
    let mut p = open_pair(RdpOptions::default());
    assert_eq!(p.server.check_timeouts(9_999, &mut p.sio), TimerOutcome::Keep);
    assert_eq!(p.server.check_timeouts(10_000, &mut p.sio), TimerOutcome::Close);
}

#[test]
fn traffic_keeps_connection_alive() {
    let mut p = open_pair(RdpOptions::default());
    p.client.send(data(b"ping"), 9_000, &mut p.cio).unwrap();
    p.server.on_segment(p.cio.take_one(), 9_000, &mut p.sio);
    assert_eq!(p.server.check_timeouts(10_000, &mut p.sio), TimerOutcome::Keep);
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

#[test]
fn reset_handshake_closes_both_ends() {
    let mut p = open_pair(RdpOptions::default());

    assert!(!p.client.close(100, &mut p.cio));
    assert_eq!(p.client.state(), RdpState::CloseWait);
    let rst = p.cio.take_one();
    assert_eq!(header_of(&rst).flags, FLAG_RST);

    assert_eq!(p.server.on_segment(rst, 101, &mut p.sio), SegmentOutcome::Keep);
    assert_eq!(p.server.state(), RdpState::CloseWait);
    let rst_ack = p.sio.take_one();
    assert_eq!(header_of(&rst_ack).flags, FLAG_RST | FLAG_ACK);

    assert_eq!(p.client.on_segment(rst_ack, 102, &mut p.cio), SegmentOutcome::Close);

    assert_eq!(p.server.check_timeouts(10_100, &mut p.sio), TimerOutcome::Keep);
    assert_eq!(p.server.check_timeouts(10_101, &mut p.sio), TimerOutcome::Close);
}

#[test]
fn close_of_unopened_connection_is_immediate() {
    let mut conn: RdpConnection<Seg> = RdpConnection::new(RdpOptions::default(), 0);
    let mut io = MockIo::new(0);
    assert!(conn.close(0, &mut io));
    assert!(io.sent.is_empty());
}

#[test]
fn repeated_close_keeps_waiting() {
    let mut p = open_pair(RdpOptions::default());
    assert!(!p.client.close(0, &mut p.cio));
    p.cio.take_sent();
    assert!(!p.client.close(1, &mut p.cio));
    assert!(p.cio.sent.is_empty());
}
