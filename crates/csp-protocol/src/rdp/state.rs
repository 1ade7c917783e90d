//! Per-connection RDP state machine.
//!
//! [`RdpConnection`] holds sequence state, the queue of unacknowledged
//! segments and the out-of-order receive buffer. It never blocks and never
//! reads a clock: every entry point takes `now` in milliseconds and acts
//! through an [`RdpIo`]. The caller decides what to do with the returned
//! [`SegmentOutcome`] / [`TimerOutcome`].

use std::collections::VecDeque;
use std::fmt;

use super::constants::*;
use super::header::RdpHeader;
use super::io::RdpIo;
use super::options::RdpOptions;
use super::seq::{seq_before, seq_between};
use crate::error::RdpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdpState {
    Closed,
    SynSent,
    SynRcvd,
    Open,
    CloseWait,
}

impl RdpState {
    pub const fn as_str(self) -> &'static str {
        match self {
            RdpState::Closed => "CLOSED",
            RdpState::SynSent => "SYN-SENT",
            RdpState::SynRcvd => "SYN-RCVD",
            RdpState::Open => "OPEN",
            RdpState::CloseWait => "CLOSE-WAIT",
        }
    }
}

impl fmt::Display for RdpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller should do after an incoming segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    Keep,
    /// The handshake just completed; a server connection should now be
    /// offered to its listening socket.
    Established,
    /// Release the connection.
    Close,
}

/// What the caller should do after timer maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Keep,
    Close,
}

/// Counters for connection listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdpStats {
    pub state: RdpState,
    pub snd_nxt: u16,
    pub snd_una: u16,
    pub rcv_cur: u16,
    pub unacked: usize,
    pub reordered: usize,
}

struct Outstanding<B> {
    seq: u16,
    segment: B,
    sent_at: u64,
    retries: u32,
    fast_resent: bool,
}

pub struct RdpConnection<B> {
    state: RdpState,
    opts: RdpOptions,

    // ---- Send side ----
    snd_iss: u16,
    snd_nxt: u16,
    snd_una: u16,

    // ---- Receive side ----
    rcv_irs: u16,
    rcv_cur: u16,
    /// Last sequence number we acknowledged.
    rcv_lsa: u16,

    unacked: VecDeque<Outstanding<B>>,
    reorder: VecDeque<(u16, B)>,

    last_rx: u64,
    ack_at: u64,
    close_wait_since: u64,
}

impl<B> RdpConnection<B>
where
    B: std::ops::DerefMut<Target = csp_core::Packet>,
{
    /// A connection in CLOSED state, ready for `connect` or an incoming SYN.
    pub fn new(opts: RdpOptions, now: u64) -> Self {
        let window = opts.window_size as usize;
        Self {
            state: RdpState::Closed,
            opts,
            snd_iss: 0,
            snd_nxt: 0,
            snd_una: 0,
            rcv_irs: 0,
            rcv_cur: 0,
            rcv_lsa: 0,
            unacked: VecDeque::with_capacity(window + 1),
            reorder: VecDeque::with_capacity(window * 2),
            last_rx: now,
            ack_at: now,
            close_wait_since: now,
        }
    }

    pub fn state(&self) -> RdpState {
        self.state
    }

    pub fn options(&self) -> &RdpOptions {
        &self.opts
    }

    pub fn is_open(&self) -> bool {
        self.state == RdpState::Open
    }

    fn window(&self) -> u16 {
        self.opts.window_size as u16
    }

    /// Segments sent but not yet acknowledged.
    pub fn in_flight(&self) -> u16 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    /// Whether `send` would be accepted right now.
    pub fn can_send(&self) -> bool {
        self.state == RdpState::Open && self.in_flight() < self.window()
    }

    pub fn stats(&self) -> RdpStats {
        RdpStats {
            state: self.state,
            snd_nxt: self.snd_nxt,
            snd_una: self.snd_una,
            rcv_cur: self.rcv_cur,
            unacked: self.unacked.len(),
            reordered: self.reorder.len(),
        }
    }

    // ------------------------------------------------------------------ //
    // Segment output
    // ------------------------------------------------------------------ //

    fn build_control<I>(&self, flags: u8, payload: &[u8], io: &mut I) -> Result<B, RdpError>
    where
        I: RdpIo<Buf = B>,
    {
        let mut buf = io.alloc().ok_or(RdpError::NoBuffers)?;
        buf.set_payload(payload)?;
        let seq = if flags & FLAG_SYN != 0 {
            self.snd_iss
        } else {
            self.snd_nxt
        };
        RdpHeader::new(flags, seq, self.rcv_cur).append_to(&mut buf)?;
        Ok(buf)
    }

    /// Transmit `segment` and keep a copy until it is acknowledged.
    fn transmit_tracked<I>(&mut self, segment: B, seq: u16, now: u64, io: &mut I) -> Result<(), RdpError>
    where
        I: RdpIo<Buf = B>,
    {
        let copy = io.duplicate(&segment).ok_or(RdpError::NoBuffers)?;
        self.unacked.push_back(Outstanding {
            seq,
            segment: copy,
            sent_at: now,
            retries: 0,
            fast_resent: false,
        });
        io.transmit(segment);
        Ok(())
    }

    fn send_control<I>(&mut self, flags: u8, payload: &[u8], now: u64, io: &mut I)
    where
        I: RdpIo<Buf = B>,
    {
        match self.build_control(flags, payload, io) {
            Ok(buf) => {
                tracing::trace!(
                    header = %RdpHeader::new(flags, self.snd_nxt, self.rcv_cur),
                    "rdp: control segment"
                );
                io.transmit(buf);
                if flags & FLAG_ACK != 0 {
                    self.rcv_lsa = self.rcv_cur;
                    self.ack_at = now;
                }
            }
            Err(err) => {
                tracing::debug!(%err, flags, "rdp: control segment not sent");
            }
        }
    }

    fn send_ack<I: RdpIo<Buf = B>>(&mut self, now: u64, io: &mut I) {
        self.send_control(FLAG_ACK, &[], now, io);
    }

    /// ACK|EAK listing every segment held in the reorder buffer.
    fn send_eack<I: RdpIo<Buf = B>>(&mut self, now: u64, io: &mut I) {
        let mut list = [0u8; csp_core::constants::MTU];
        let mut len = 0;
        for (seq, _) in &self.reorder {
            if len + 2 > list.len() {
                break;
            }
            list[len..len + 2].copy_from_slice(&seq.to_be_bytes());
            len += 2;
        }
        self.send_control(FLAG_ACK | FLAG_EAK, &list[..len], now, io);
    }

    // ------------------------------------------------------------------ //
    // User operations
    // ------------------------------------------------------------------ //

    /// Active open: send a SYN carrying our options.
    pub fn connect<I>(&mut self, now: u64, io: &mut I) -> Result<(), RdpError>
    where
        I: RdpIo<Buf = B>,
    {
        if self.state != RdpState::Closed {
            return Err(RdpError::Busy(self.state));
        }
        self.opts.validate()?;

        self.snd_iss = io.initial_sequence();
        self.snd_nxt = self.snd_iss.wrapping_add(1);
        self.snd_una = self.snd_iss;

        let syn = self.build_control(FLAG_SYN, &self.opts.to_syn_payload(), io)?;
        self.transmit_tracked(syn, self.snd_iss, now, io)?;

        self.state = RdpState::SynSent;
        self.last_rx = now;
        tracing::debug!(iss = self.snd_iss, window = self.opts.window_size, "rdp: SYN sent");
        Ok(())
    }

    /// Queue one data segment. Fails without side effects when the window is
    /// full; the buffer is released on any error.
    pub fn send<I>(&mut self, mut data: B, now: u64, io: &mut I) -> Result<(), RdpError>
    where
        I: RdpIo<Buf = B>,
    {
        if self.state != RdpState::Open {
            return Err(RdpError::NotOpen(self.state));
        }
        if data.is_empty() {
            return Err(RdpError::EmptySegment);
        }
        if !self.can_send() {
            return Err(RdpError::WindowFull);
        }

        let seq = self.snd_nxt;
        RdpHeader::new(FLAG_ACK, seq, self.rcv_cur).append_to(&mut data)?;
        self.transmit_tracked(data, seq, now, io)?;
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.rcv_lsa = self.rcv_cur;
        self.ack_at = now;
        tracing::trace!(seq, in_flight = self.in_flight(), "rdp: data sent");
        Ok(())
    }

    /// Start an orderly close. Returns `true` when nothing is left to wait
    /// for and the connection can be released at once.
    pub fn close<I>(&mut self, now: u64, io: &mut I) -> bool
    where
        I: RdpIo<Buf = B>,
    {
        match self.state {
            RdpState::Closed => true,
            RdpState::CloseWait => false,
            _ => {
                self.send_control(FLAG_RST, &[], now, io);
                self.enter_close_wait(now);
                false
            }
        }
    }

    fn enter_close_wait(&mut self, now: u64) {
        tracing::debug!(from = %self.state, "rdp: entering CLOSE-WAIT");
        self.state = RdpState::CloseWait;
        self.close_wait_since = now;
    }

    // ------------------------------------------------------------------ //
    // Incoming segments
    // ------------------------------------------------------------------ //

    pub fn on_segment<I>(&mut self, mut segment: B, now: u64, io: &mut I) -> SegmentOutcome
    where
        I: RdpIo<Buf = B>,
    {
        let header = match RdpHeader::strip_from(&mut segment) {
            Ok(h) => h,
            Err(err) => {
                tracing::debug!(%err, "rdp: dropping malformed segment");
                return SegmentOutcome::Keep;
            }
        };
        self.last_rx = now;
        tracing::trace!(
            state = %self.state,
            %header,
            len = segment.len(),
            "rdp: segment received"
        );

        if header.has(FLAG_RST) {
            return self.on_reset(header, now, io);
        }

        match self.state {
            RdpState::Closed => self.on_closed(header, segment, now, io),
            RdpState::SynSent => self.on_syn_sent(header, now, io),
            RdpState::SynRcvd => self.on_syn_rcvd(header, segment, now, io),
            RdpState::Open => self.on_open(header, segment, now, io),
            RdpState::CloseWait => {
                tracing::trace!("rdp: ignoring segment in CLOSE-WAIT");
                SegmentOutcome::Keep
            }
        }
    }

    fn on_reset<I>(&mut self, header: RdpHeader, now: u64, io: &mut I) -> SegmentOutcome
    where
        I: RdpIo<Buf = B>,
    {
        match self.state {
            RdpState::CloseWait if header.has(FLAG_ACK) => {
                tracing::debug!("rdp: RST|ACK in CLOSE-WAIT, closing");
                SegmentOutcome::Close
            }
            RdpState::CloseWait => {
                self.send_control(FLAG_RST | FLAG_ACK, &[], now, io);
                SegmentOutcome::Keep
            }
            RdpState::Closed => SegmentOutcome::Close,
            _ => {
                tracing::debug!(state = %self.state, "rdp: reset by peer");
                self.send_control(FLAG_RST | FLAG_ACK, &[], now, io);
                self.enter_close_wait(now);
                SegmentOutcome::Keep
            }
        }
    }

    /// Passive open: only a bare SYN is acceptable.
    fn on_closed<I>(&mut self, header: RdpHeader, segment: B, now: u64, io: &mut I) -> SegmentOutcome
    where
        I: RdpIo<Buf = B>,
    {
        if !header.has(FLAG_SYN) || header.has(FLAG_ACK) {
            tracing::debug!(%header, "rdp: expected SYN on new connection");
            return SegmentOutcome::Close;
        }
        let opts = match RdpOptions::from_syn_payload(segment.payload()) {
            Ok(opts) => opts,
            Err(err) => {
                tracing::warn!(%err, "rdp: rejecting SYN");
                return SegmentOutcome::Close;
            }
        };
        drop(segment);

        self.opts = opts;
        self.rcv_irs = header.seq;
        self.rcv_cur = header.seq;
        self.rcv_lsa = header.seq;
        self.snd_iss = io.initial_sequence();
        self.snd_nxt = self.snd_iss.wrapping_add(1);
        self.snd_una = self.snd_iss;

        let synack = match self.build_control(FLAG_SYN | FLAG_ACK, &[], io) {
            Ok(buf) => buf,
            Err(err) => {
                tracing::warn!(%err, "rdp: cannot answer SYN");
                return SegmentOutcome::Close;
            }
        };
        if let Err(err) = self.transmit_tracked(synack, self.snd_iss, now, io) {
            tracing::warn!(%err, "rdp: cannot answer SYN");
            return SegmentOutcome::Close;
        }
        self.ack_at = now;
        self.state = RdpState::SynRcvd;
        tracing::debug!(
            irs = self.rcv_irs,
            iss = self.snd_iss,
            window = self.opts.window_size,
            "rdp: SYN received, SYN|ACK sent"
        );
        SegmentOutcome::Keep
    }

    fn on_syn_sent<I>(&mut self, header: RdpHeader, now: u64, io: &mut I) -> SegmentOutcome
    where
        I: RdpIo<Buf = B>,
    {
        if !(header.has(FLAG_SYN) && header.has(FLAG_ACK)) {
            tracing::debug!(%header, "rdp: unexpected segment in SYN-SENT");
            return SegmentOutcome::Keep;
        }
        if header.ack != self.snd_iss {
            tracing::debug!(ack = header.ack, iss = self.snd_iss, "rdp: SYN|ACK for another SYN");
            self.send_control(FLAG_RST, &[], now, io);
            return SegmentOutcome::Close;
        }

        self.rcv_irs = header.seq;
        self.rcv_cur = header.seq;
        self.snd_una = header.ack.wrapping_add(1);
        self.release_acknowledged();
        self.state = RdpState::Open;
        self.send_ack(now, io);
        tracing::debug!(irs = self.rcv_irs, "rdp: connection open (client)");
        SegmentOutcome::Established
    }

    fn on_syn_rcvd<I>(&mut self, header: RdpHeader, segment: B, now: u64, io: &mut I) -> SegmentOutcome
    where
        I: RdpIo<Buf = B>,
    {
        if header.has(FLAG_SYN) {
            tracing::trace!(seq = header.seq, "rdp: repeated SYN in SYN-RCVD");
            return SegmentOutcome::Keep;
        }
        if !header.has(FLAG_ACK) || header.ack != self.snd_iss {
            tracing::debug!(%header, "rdp: unexpected segment in SYN-RCVD");
            return SegmentOutcome::Keep;
        }

        self.snd_una = self.snd_iss.wrapping_add(1);
        self.release_acknowledged();
        self.state = RdpState::Open;
        tracing::debug!("rdp: connection open (server)");

        // The ACK may carry data if the client's bare ACK was lost.
        match self.on_open(header, segment, now, io) {
            SegmentOutcome::Close => SegmentOutcome::Close,
            _ => SegmentOutcome::Established,
        }
    }

    fn on_open<I>(&mut self, header: RdpHeader, segment: B, now: u64, io: &mut I) -> SegmentOutcome
    where
        I: RdpIo<Buf = B>,
    {
        if header.has(FLAG_SYN) {
            if header.has(FLAG_ACK) && header.seq == self.rcv_irs {
                // Our handshake ACK was lost; the server is repeating SYN|ACK.
                self.send_ack(now, io);
            } else {
                tracing::debug!(%header, "rdp: unexpected SYN in OPEN");
            }
            return SegmentOutcome::Keep;
        }
        if !header.has(FLAG_ACK) {
            tracing::debug!(%header, "rdp: segment without ACK in OPEN");
            return SegmentOutcome::Keep;
        }

        let window = self.window();
        let oldest = self.snd_una.wrapping_sub(1).wrapping_sub(window.wrapping_mul(2));
        if !seq_between(header.ack, oldest, self.snd_nxt.wrapping_sub(1)) {
            tracing::debug!(
                ack = header.ack,
                snd_una = self.snd_una,
                snd_nxt = self.snd_nxt,
                "rdp: acknowledgement outside send window"
            );
            return SegmentOutcome::Keep;
        }
        let acked_through = header.ack.wrapping_add(1);
        if seq_before(self.snd_una, acked_through) {
            self.snd_una = acked_through;
            self.release_acknowledged();
        }

        if header.has(FLAG_EAK) {
            self.on_eack(segment.payload(), now, io);
            return SegmentOutcome::Keep;
        }
        if segment.is_empty() {
            return SegmentOutcome::Keep;
        }

        let first = self.rcv_cur.wrapping_add(1);
        if !seq_between(header.seq, first, self.rcv_cur.wrapping_add(window.wrapping_mul(2))) {
            tracing::trace!(seq = header.seq, rcv_cur = self.rcv_cur, "rdp: duplicate or out-of-window segment");
            self.send_eack(now, io);
            return SegmentOutcome::Keep;
        }

        if header.seq == first {
            if let Err(rejected) = io.deliver(segment) {
                tracing::debug!(seq = header.seq, "rdp: receive queue full, segment dropped");
                drop(rejected);
                return SegmentOutcome::Keep;
            }
            self.rcv_cur = header.seq;
            self.flush_reorder(io);
            self.maybe_ack(now, io);
        } else {
            if self.reorder.iter().any(|(seq, _)| *seq == header.seq) {
                tracing::trace!(seq = header.seq, "rdp: segment already buffered");
            } else if self.reorder.len() < window as usize * 2 {
                self.reorder.push_back((header.seq, segment));
            }
            self.send_eack(now, io);
        }
        SegmentOutcome::Keep
    }

    /// Drop retransmission copies for everything before `snd_una`.
    fn release_acknowledged(&mut self) {
        let una = self.snd_una;
        self.unacked.retain(|o| !seq_before(o.seq, una));
    }

    fn on_eack<I>(&mut self, list: &[u8], now: u64, io: &mut I)
    where
        I: RdpIo<Buf = B>,
    {
        let mut newest: Option<u16> = None;
        for raw in list.chunks_exact(2) {
            let seq = u16::from_be_bytes([raw[0], raw[1]]);
            self.unacked.retain(|o| o.seq != seq);
            newest = match newest {
                Some(n) if !seq_before(n, seq) => Some(n),
                _ => Some(seq),
            };
        }
        let Some(newest) = newest else {
            return;
        };

        // Anything older than a segment the peer holds was lost in transit.
        for entry in self.unacked.iter_mut() {
            if entry.fast_resent || !seq_before(entry.seq, newest) {
                continue;
            }
            if let Some(copy) = io.duplicate(&entry.segment) {
                tracing::debug!(seq = entry.seq, "rdp: fast retransmit after EACK");
                io.transmit(copy);
                entry.sent_at = now;
                entry.fast_resent = true;
            }
        }
    }

    fn flush_reorder<I: RdpIo<Buf = B>>(&mut self, io: &mut I) {
        loop {
            let next = self.rcv_cur.wrapping_add(1);
            let Some(pos) = self.reorder.iter().position(|(seq, _)| *seq == next) else {
                break;
            };
            let Some((seq, buf)) = self.reorder.remove(pos) else {
                break;
            };
            match io.deliver(buf) {
                Ok(()) => self.rcv_cur = seq,
                Err(buf) => {
                    self.reorder.push_front((seq, buf));
                    break;
                }
            }
        }
    }

    /// Whether the receive queue can take another full window. A queue
    /// smaller than the window counts as a full window once it is empty.
    fn has_room_for_window<I: RdpIo<Buf = B>>(&self, io: &I) -> bool {
        let window = (self.opts.window_size as usize).min(io.delivery_capacity());
        io.delivery_room() >= window
    }

    /// Acknowledge now unless acks are being delayed or the receiver lacks
    /// room for another window.
    fn maybe_ack<I: RdpIo<Buf = B>>(&mut self, now: u64, io: &mut I) {
        let pending = self.rcv_cur.wrapping_sub(self.rcv_lsa) as u32;
        if pending == 0 {
            return;
        }
        if !self.has_room_for_window(io) {
            tracing::trace!(pending, "rdp: holding ack, receive queue short of a window");
            return;
        }
        if self.opts.delayed_acks && pending < self.opts.ack_delay_count {
            return;
        }
        self.send_ack(now, io);
    }

    // ------------------------------------------------------------------ //
    // Timers
    // ------------------------------------------------------------------ //

    /// Periodic maintenance: close-wait expiry, inactivity, retransmission
    /// of the oldest expired segment, and delayed acknowledgements.
    pub fn check_timeouts<I>(&mut self, now: u64, io: &mut I) -> TimerOutcome
    where
        I: RdpIo<Buf = B>,
    {
        let conn_timeout = u64::from(self.opts.conn_timeout_ms);
        match self.state {
            RdpState::Closed => return TimerOutcome::Keep,
            RdpState::CloseWait => {
                if now.saturating_sub(self.close_wait_since) >= conn_timeout {
                    tracing::debug!("rdp: CLOSE-WAIT expired");
                    return TimerOutcome::Close;
                }
                return TimerOutcome::Keep;
            }
            _ => {}
        }

        if now.saturating_sub(self.last_rx) >= conn_timeout {
            tracing::warn!(state = %self.state, "rdp: connection inactive, closing");
            self.send_control(FLAG_RST, &[], now, io);
            return TimerOutcome::Close;
        }

        let packet_timeout = u64::from(self.opts.packet_timeout_ms);
        let expired = self
            .unacked
            .front()
            .filter(|o| now.saturating_sub(o.sent_at) >= packet_timeout)
            .map(|o| (o.seq, o.retries));
        if let Some((seq, retries)) = expired {
            if retries >= MAX_RETRIES {
                tracing::warn!(seq, retries, "rdp: segment unacknowledged after retries, closing");
                self.send_control(FLAG_RST, &[], now, io);
                return TimerOutcome::Close;
            }
            let copy = self.unacked.front().and_then(|o| io.duplicate(&o.segment));
            match copy {
                Some(copy) => {
                    io.transmit(copy);
                    if let Some(front) = self.unacked.front_mut() {
                        front.sent_at = now;
                        front.retries += 1;
                    }
                    tracing::debug!(seq, retries = retries + 1, "rdp: retransmit");
                }
                None => tracing::debug!(seq, "rdp: no buffer for retransmit"),
            }
        }

        if self.state == RdpState::Open
            && self.rcv_cur != self.rcv_lsa
            && now.saturating_sub(self.ack_at) >= u64::from(self.opts.ack_timeout_ms)
            && self.has_room_for_window(io)
        {
            self.send_ack(now, io);
        }
        TimerOutcome::Keep
    }
}

impl<B> fmt::Debug for RdpConnection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdpConnection")
            .field("state", &self.state)
            .field("snd_nxt", &self.snd_nxt)
            .field("snd_una", &self.snd_una)
            .field("rcv_cur", &self.rcv_cur)
            .field("unacked", &self.unacked.len())
            .field("reordered", &self.reorder.len())
            .finish()
    }
}
