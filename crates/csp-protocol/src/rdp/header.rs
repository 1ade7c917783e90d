//! Segment header, carried at the end of the payload.
//!
//! ```text
//! [data ...][flags:1][seq:2 BE][ack:2 BE]
//! ```

use csp_core::{Packet, PacketError};

use super::constants::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdpHeader {
    pub flags: u8,
    pub seq: u16,
    pub ack: u16,
}

impl RdpHeader {
    pub const fn new(flags: u8, seq: u16, ack: u16) -> Self {
        Self { flags, seq, ack }
    }

    pub const fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let seq = self.seq.to_be_bytes();
        let ack = self.ack.to_be_bytes();
        [self.flags, seq[0], seq[1], ack[0], ack[1]]
    }

    /// Append the header behind the current payload.
    pub fn append_to(&self, packet: &mut Packet) -> Result<(), PacketError> {
        packet.append(&self.to_bytes())
    }

    /// Read the header from the end of the payload and remove it.
    pub fn strip_from(packet: &mut Packet) -> Result<Self, PacketError> {
        let raw = packet.trailer(HEADER_SIZE).ok_or(PacketError::TooShort {
            min: HEADER_SIZE,
            actual: packet.len(),
        })?;
        let header = Self {
            flags: raw[0],
            seq: u16::from_be_bytes([raw[1], raw[2]]),
            ack: u16::from_be_bytes([raw[3], raw[4]]),
        };
        packet.strip_trailer(HEADER_SIZE)?;
        Ok(header)
    }
}

impl std::fmt::Display for RdpHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (FLAG_SYN, "SYN"),
            (FLAG_ACK, "ACK"),
            (FLAG_EAK, "EAK"),
            (FLAG_RST, "RST"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.has(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        write!(f, " seq={} ack={}", self.seq, self.ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sits_behind_data() {
        let mut p = Packet::new();
        p.set_payload(b"data").unwrap();
        RdpHeader::new(FLAG_ACK, 0x0102, 0xA0B0).append_to(&mut p).unwrap();
        assert_eq!(p.payload(), &[b'd', b'a', b't', b'a', 0x04, 0x01, 0x02, 0xA0, 0xB0]);

        let h = RdpHeader::strip_from(&mut p).unwrap();
        assert_eq!(h, RdpHeader::new(FLAG_ACK, 0x0102, 0xA0B0));
        assert_eq!(p.payload(), b"data");
    }

    #[test]
    fn strip_from_short_packet_fails() {
        let mut p = Packet::new();
        p.set_payload(&[1, 2, 3]).unwrap();
        assert_eq!(
            RdpHeader::strip_from(&mut p),
            Err(PacketError::TooShort { min: 5, actual: 3 })
        );
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn display_lists_flags() {
        let h = RdpHeader::new(FLAG_SYN | FLAG_ACK, 7, 9);
        assert_eq!(h.to_string(), "SYN|ACK seq=7 ack=9");
        assert_eq!(RdpHeader::default().to_string(), "- seq=0 ack=0");
    }
}
