//! Duplicate packet suppression.
//!
//! Keeps the signatures of the last [`DEDUP_ENTRIES`] packets seen, each
//! valid for [`DEDUP_WINDOW_MS`]. A signature is a CRC32 over the packed
//! header and the payload, so packets differing in any header field or
//! payload byte are distinct, while a retransmitted or replayed copy is
//! caught.

use serde::Deserialize;

use csp_core::{AddressMode, Packet};

pub const DEDUP_ENTRIES: usize = 16;
pub const DEDUP_WINDOW_MS: u64 = 1_000;

/// Which packets the router runs through the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupMode {
    #[default]
    Off,
    /// Only packets addressed to this node.
    Incoming,
    /// Only packets being relayed.
    Forward,
    All,
}

impl DedupMode {
    pub fn applies(self, is_to_me: bool) -> bool {
        match self {
            DedupMode::Off => false,
            DedupMode::Incoming => is_to_me,
            DedupMode::Forward => !is_to_me,
            DedupMode::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Seen {
    sig: u32,
    at: u64,
}

#[derive(Debug)]
pub struct DedupFilter {
    ring: [Option<Seen>; DEDUP_ENTRIES],
    next: usize,
    window_ms: u64,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::with_window(DEDUP_WINDOW_MS)
    }

    pub fn with_window(window_ms: u64) -> Self {
        Self {
            ring: [None; DEDUP_ENTRIES],
            next: 0,
            window_ms,
        }
    }

    pub fn signature(packet: &Packet) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&packet.id.pack(AddressMode::Extended).to_be_bytes());
        hasher.update(packet.payload());
        hasher.finalize()
    }

    /// True if an identical packet was seen within the window. Otherwise
    /// records this one, evicting the oldest entry.
    pub fn is_duplicate(&mut self, packet: &Packet, now: u64) -> bool {
        let sig = Self::signature(packet);
        let hit = self
            .ring
            .iter()
            .flatten()
            .any(|seen| seen.sig == sig && now.saturating_sub(seen.at) < self.window_ms);
        if hit {
            return true;
        }
        self.ring[self.next] = Some(Seen { sig, at: now });
        self.next = (self.next + 1) % DEDUP_ENTRIES;
        false
    }

    pub fn clear(&mut self) {
        self.ring = [None; DEDUP_ENTRIES];
        self.next = 0;
    }
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new()
    }
}
