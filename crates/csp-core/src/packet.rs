//! Fixed-size packet storage.
//!
//! A [`Packet`] holds a parsed header plus up to [`MTU`] payload bytes, with
//! [`TRAILER_ROOM`] spare bytes behind the payload for integrity trailers and
//! the reliable-transport segment header. Packets never allocate; the
//! transport layer keeps them in a fixed pool.

use crate::constants::{MTU, PACKET_DATA_CAPACITY, Priority};
use crate::error::PacketError;
use crate::id::{AddressMode, CspId};

#[derive(Clone)]
pub struct Packet {
    pub id: CspId,
    /// Index of the interface the packet arrived on, if any.
    pub ingress: Option<u8>,
    length: u16,
    data: [u8; PACKET_DATA_CAPACITY],
}

impl Packet {
    pub const fn new() -> Self {
        Self {
            id: CspId::new(Priority::Normal, 0, 0, 0, 0),
            ingress: None,
            length: 0,
            data: [0u8; PACKET_DATA_CAPACITY],
        }
    }

    /// Clear header, length and ingress. Payload bytes are left as is.
    pub fn reset(&mut self) {
        self.id = CspId::default();
        self.ingress = None;
        self.length = 0;
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length as usize]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.length as usize]
    }

    /// Replace the payload. Rejects anything above the MTU.
    pub fn set_payload(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        if bytes.len() > MTU {
            return Err(PacketError::TooLarge {
                max: MTU,
                actual: bytes.len(),
            });
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.length = bytes.len() as u16;
        Ok(())
    }

    /// Append bytes behind the payload, using the trailer room if needed.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        let start = self.len();
        let end = start + bytes.len();
        if end > PACKET_DATA_CAPACITY {
            return Err(PacketError::TooLarge {
                max: PACKET_DATA_CAPACITY,
                actual: end,
            });
        }
        self.data[start..end].copy_from_slice(bytes);
        self.length = end as u16;
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.length = len as u16;
        }
    }

    /// The last `n` payload bytes, if the payload is that long.
    pub fn trailer(&self, n: usize) -> Option<&[u8]> {
        let len = self.len();
        (len >= n).then(|| &self.data[len - n..len])
    }

    /// Remove `n` bytes from the end of the payload.
    pub fn strip_trailer(&mut self, n: usize) -> Result<(), PacketError> {
        let len = self.len();
        if len < n {
            return Err(PacketError::TooShort { min: n, actual: len });
        }
        self.length = (len - n) as u16;
        Ok(())
    }

    /// Copy header, ingress and payload from `other`.
    pub fn copy_from(&mut self, other: &Packet) {
        self.id = other.id;
        self.ingress = other.ingress;
        self.length = other.length;
        self.data[..other.len()].copy_from_slice(other.payload());
    }

    /// Serialize header and payload into `out`, returning the frame length.
    pub fn write_frame(&self, mode: AddressMode, out: &mut [u8]) -> Result<usize, PacketError> {
        let header = mode.header_size();
        let total = header + self.len();
        if out.len() < total {
            return Err(PacketError::TooShort {
                min: total,
                actual: out.len(),
            });
        }
        self.id.encode(mode, out)?;
        out[header..total].copy_from_slice(self.payload());
        Ok(total)
    }

    /// Parse a raw frame (header followed by payload and any trailers).
    pub fn read_frame(&mut self, mode: AddressMode, frame: &[u8]) -> Result<(), PacketError> {
        let header = mode.header_size();
        self.id = CspId::decode(mode, frame)?;
        let body = &frame[header..];
        if body.len() > PACKET_DATA_CAPACITY {
            return Err(PacketError::TooLarge {
                max: PACKET_DATA_CAPACITY,
                actual: body.len(),
            });
        }
        self.data[..body.len()].copy_from_slice(body);
        self.length = body.len() as u16;
        Ok(())
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Packet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("ingress", &self.ingress)
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TRAILER_ROOM;
    use crate::flags::HeaderFlags;

    #[test]
    fn set_payload_rejects_oversize() {
        let mut p = Packet::new();
        let big = [0u8; MTU + 1];
        assert_eq!(
            p.set_payload(&big),
            Err(PacketError::TooLarge { max: MTU, actual: MTU + 1 })
        );
        assert!(p.is_empty());
    }

    #[test]
    fn trailer_room_is_usable() {
        let mut p = Packet::new();
        p.set_payload(&[1u8; MTU]).unwrap();
        p.append(&[2u8; TRAILER_ROOM]).unwrap();
        assert_eq!(p.len(), PACKET_DATA_CAPACITY);
        assert!(p.append(&[3]).is_err());
    }

    #[test]
    fn strip_trailer_shortens() {
        let mut p = Packet::new();
        p.set_payload(b"hello").unwrap();
        p.append(&[0xAA, 0xBB]).unwrap();
        assert_eq!(p.trailer(2), Some(&[0xAA, 0xBB][..]));
        p.strip_trailer(2).unwrap();
        assert_eq!(p.payload(), b"hello");
        assert!(p.strip_trailer(6).is_err());
    }

    #[test]
    fn frame_write_then_read() {
        let mut p = Packet::new();
        p.id = CspId::new(Priority::High, 7, 9, 10, 33);
        p.id.flags = HeaderFlags::CRC32;
        p.set_payload(b"abc").unwrap();

        let mut buf = [0u8; 32];
        let n = p.write_frame(AddressMode::Legacy, &mut buf).unwrap();
        assert_eq!(n, 4 + 3);

        let mut q = Packet::new();
        q.read_frame(AddressMode::Legacy, &buf[..n]).unwrap();
        assert_eq!(q.id, p.id);
        assert_eq!(q.payload(), b"abc");
    }

    #[test]
    fn read_frame_too_short_for_header() {
        let mut p = Packet::new();
        let err = p.read_frame(AddressMode::Extended, &[1, 2, 3, 4]).unwrap_err();
        assert_eq!(err, PacketError::TooShort { min: 6, actual: 4 });
    }

    #[test]
    fn copy_from_takes_everything() {
        let mut a = Packet::new();
        a.id = CspId::new(Priority::Low, 1, 2, 3, 4);
        a.ingress = Some(2);
        a.set_payload(b"xyz").unwrap();
        let mut b = Packet::new();
        b.copy_from(&a);
        assert_eq!(b.id, a.id);
        assert_eq!(b.ingress, Some(2));
        assert_eq!(b.payload(), b"xyz");
    }
}
