//! Packet identity (the header) and its wire layouts.
//!
//! Two layouts are supported, both big-endian on the wire:
//!
//! ```text
//! legacy   (32 bit): pri:2 | src:5  | dst:5  | dport:6 | sport:6 | flags:8
//! extended (48 bit): pri:2 | dst:14 | src:14 | dport:6 | sport:6 | flags:6
//! ```
//!
//! Connection lookup compares packed identities under a mask, so the mask
//! must be built for the same layout the identities were packed with.

use crate::constants::Priority;
use crate::error::PacketError;
use crate::flags::HeaderFlags;

/// Header layout / address width in use on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    Legacy,
    #[default]
    Extended,
}

struct Layout {
    size: usize,
    addr_bits: u32,
    flag_bits: u32,
    pri_shift: u32,
    src_shift: u32,
    dst_shift: u32,
    dport_shift: u32,
    sport_shift: u32,
}

const LEGACY: Layout = Layout {
    size: 4,
    addr_bits: 5,
    flag_bits: 8,
    pri_shift: 30,
    src_shift: 25,
    dst_shift: 20,
    dport_shift: 14,
    sport_shift: 8,
};

const EXTENDED: Layout = Layout {
    size: 6,
    addr_bits: 14,
    flag_bits: 6,
    pri_shift: 46,
    dst_shift: 32,
    src_shift: 18,
    dport_shift: 12,
    sport_shift: 6,
};

const PORT_BITS: u32 = 6;

const fn ones(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

impl AddressMode {
    const fn layout(self) -> &'static Layout {
        match self {
            AddressMode::Legacy => &LEGACY,
            AddressMode::Extended => &EXTENDED,
        }
    }

    /// Encoded header length in bytes.
    pub const fn header_size(self) -> usize {
        self.layout().size
    }

    pub const fn address_bits(self) -> u32 {
        self.layout().addr_bits
    }

    pub const fn max_address(self) -> u16 {
        ones(self.layout().addr_bits) as u16
    }

    /// Network-wide broadcast address (all address bits set).
    pub const fn broadcast_address(self) -> u16 {
        self.max_address()
    }
}

/// Individual identity fields, used to build masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdField {
    Priority,
    Source,
    Destination,
    DestPort,
    SourcePort,
    Flags,
}

/// Bit mask over a packed identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdMask(u64);

impl IdMask {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Mask selecting exactly `fields` in the given layout.
    pub fn of(mode: AddressMode, fields: &[IdField]) -> Self {
        let l = mode.layout();
        let mut bits = 0u64;
        for field in fields {
            bits |= match field {
                IdField::Priority => ones(2) << l.pri_shift,
                IdField::Source => ones(l.addr_bits) << l.src_shift,
                IdField::Destination => ones(l.addr_bits) << l.dst_shift,
                IdField::DestPort => ones(PORT_BITS) << l.dport_shift,
                IdField::SourcePort => ones(PORT_BITS) << l.sport_shift,
                IdField::Flags => ones(l.flag_bits),
            };
        }
        Self(bits)
    }

    /// The mask that identifies a connection: everything but the flags.
    pub fn connection(mode: AddressMode) -> Self {
        Self::of(
            mode,
            &[
                IdField::Priority,
                IdField::Source,
                IdField::Destination,
                IdField::DestPort,
                IdField::SourcePort,
            ],
        )
    }
}

/// Parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CspId {
    pub pri: Priority,
    pub flags: HeaderFlags,
    pub src: u16,
    pub dst: u16,
    pub dport: u8,
    pub sport: u8,
}

impl CspId {
    pub const fn new(pri: Priority, src: u16, dst: u16, dport: u8, sport: u8) -> Self {
        Self {
            pri,
            flags: HeaderFlags::NONE,
            src,
            dst,
            dport,
            sport,
        }
    }

    /// Identity of the reverse direction: addresses and ports swapped,
    /// priority and flags kept.
    pub const fn reversed(&self) -> Self {
        Self {
            pri: self.pri,
            flags: self.flags,
            src: self.dst,
            dst: self.src,
            dport: self.sport,
            sport: self.dport,
        }
    }

    /// Pack into the integer form of `mode`. Fields wider than the layout
    /// are truncated.
    pub const fn pack(&self, mode: AddressMode) -> u64 {
        let l = mode.layout();
        let addr = ones(l.addr_bits);
        let port = ones(PORT_BITS);
        ((self.pri.bits() as u64 & 0x03) << l.pri_shift)
            | ((self.src as u64 & addr) << l.src_shift)
            | ((self.dst as u64 & addr) << l.dst_shift)
            | ((self.dport as u64 & port) << l.dport_shift)
            | ((self.sport as u64 & port) << l.sport_shift)
            | (self.flags.bits() as u64 & ones(l.flag_bits))
    }

    pub const fn unpack(mode: AddressMode, raw: u64) -> Self {
        let l = mode.layout();
        let addr = ones(l.addr_bits);
        let port = ones(PORT_BITS);
        Self {
            pri: Priority::from_bits((raw >> l.pri_shift) as u8),
            flags: HeaderFlags::from_bits((raw & ones(l.flag_bits)) as u8),
            src: ((raw >> l.src_shift) & addr) as u16,
            dst: ((raw >> l.dst_shift) & addr) as u16,
            dport: ((raw >> l.dport_shift) & port) as u8,
            sport: ((raw >> l.sport_shift) & port) as u8,
        }
    }

    /// `(self & mask) == (other & mask)` on the packed form.
    pub const fn matches(&self, other: &CspId, mask: IdMask, mode: AddressMode) -> bool {
        self.pack(mode) & mask.0 == other.pack(mode) & mask.0
    }

    /// Write the header to the front of `out`, returning the bytes written.
    pub fn encode(&self, mode: AddressMode, out: &mut [u8]) -> Result<usize, PacketError> {
        let size = mode.header_size();
        if out.len() < size {
            return Err(PacketError::TooShort {
                min: size,
                actual: out.len(),
            });
        }
        let bytes = self.pack(mode).to_be_bytes();
        out[..size].copy_from_slice(&bytes[8 - size..]);
        Ok(size)
    }

    /// Parse a header from the front of `raw`.
    pub fn decode(mode: AddressMode, raw: &[u8]) -> Result<Self, PacketError> {
        let size = mode.header_size();
        if raw.len() < size {
            return Err(PacketError::TooShort {
                min: size,
                actual: raw.len(),
            });
        }
        let mut bytes = [0u8; 8];
        bytes[8 - size..].copy_from_slice(&raw[..size]);
        Ok(Self::unpack(mode, u64::from_be_bytes(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_bit_positions() {
        let mut id = CspId::new(Priority::High, 3, 10, 20, 31);
        id.flags = HeaderFlags::RDP | HeaderFlags::CRC32;
        let packed = id.pack(AddressMode::Legacy);
        assert_eq!(packed >> 30, 1);
        assert_eq!((packed >> 25) & 0x1F, 3);
        assert_eq!((packed >> 20) & 0x1F, 10);
        assert_eq!((packed >> 14) & 0x3F, 20);
        assert_eq!((packed >> 8) & 0x3F, 31);
        assert_eq!(packed & 0xFF, 0x03);
    }

    #[test]
    fn extended_encode_known_bytes() {
        let mut id = CspId::new(Priority::Normal, 0x0001, 0x3FFF, 1, 2);
        id.flags = HeaderFlags::HMAC;
        let mut out = [0u8; 6];
        assert_eq!(id.encode(AddressMode::Extended, &mut out), Ok(6));
        // pri=2 | dst=0x3fff | src=1 | dport=1 | sport=2 | flags=0x08
        let expected: u64 = (2 << 46) | (0x3FFF << 32) | (1 << 18) | (1 << 12) | (2 << 6) | 0x08;
        assert_eq!(hex::encode(out), hex::encode(&expected.to_be_bytes()[2..]));
        assert_eq!(CspId::decode(AddressMode::Extended, &out), Ok(id));
    }

    #[test]
    fn decode_too_short() {
        let err = CspId::decode(AddressMode::Extended, &[0, 1, 2]).unwrap_err();
        assert_eq!(err, PacketError::TooShort { min: 6, actual: 3 });
    }

    #[test]
    fn legacy_truncates_wide_addresses() {
        let id = CspId::new(Priority::Low, 0x25, 0x41, 7, 8);
        let back = CspId::unpack(AddressMode::Legacy, id.pack(AddressMode::Legacy));
        assert_eq!(back.src, 0x05);
        assert_eq!(back.dst, 0x01);
    }

    #[test]
    fn connection_mask_ignores_flags() {
        let mode = AddressMode::Extended;
        let a = CspId::new(Priority::Normal, 5, 1, 31, 20);
        let mut b = a;
        b.flags = HeaderFlags::CRC32;
        assert!(a.matches(&b, IdMask::connection(mode), mode));

        b.sport = 21;
        assert!(!a.matches(&b, IdMask::connection(mode), mode));
    }

    #[test]
    fn wildcard_mask_skips_source_port() {
        let mode = AddressMode::Legacy;
        let mask = IdMask::of(
            mode,
            &[IdField::Priority, IdField::Source, IdField::Destination, IdField::DestPort],
        );
        let a = CspId::new(Priority::Normal, 5, 1, 10, 40);
        let b = CspId::new(Priority::Normal, 5, 1, 10, 41);
        assert!(a.matches(&b, mask, mode));
    }

    #[test]
    fn reversed_swaps_endpoints() {
        let id = CspId::new(Priority::Critical, 1, 2, 3, 4);
        let r = id.reversed();
        assert_eq!((r.src, r.dst, r.dport, r.sport), (2, 1, 4, 3));
        assert_eq!(r.reversed(), id);
    }

    #[test]
    fn broadcast_addresses() {
        assert_eq!(AddressMode::Legacy.broadcast_address(), 31);
        assert_eq!(AddressMode::Extended.broadcast_address(), 0x3FFF);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn extended_decode_inverts_encode(
            pri in 0..4u8,
            src in 0..=0x3FFFu16,
            dst in 0..=0x3FFFu16,
            dport in 0..64u8,
            sport in 0..64u8,
            flags in 0..64u8,
        ) {
            let mut id = CspId::new(Priority::from_bits(pri), src, dst, dport, sport);
            id.flags = HeaderFlags::from_bits(flags);
            let mut out = [0u8; 6];
            id.encode(AddressMode::Extended, &mut out).unwrap();
            prop_assert_eq!(CspId::decode(AddressMode::Extended, &out).unwrap(), id);
        }

        #[test]
        fn full_mask_match_is_equality_in_range(
            src in 0..32u16,
            dst in 0..32u16,
            other_src in 0..32u16,
        ) {
            let mode = AddressMode::Legacy;
            let a = CspId::new(Priority::Normal, src, dst, 1, 2);
            let b = CspId::new(Priority::Normal, other_src, dst, 1, 2);
            prop_assert_eq!(a.matches(&b, IdMask::connection(mode), mode), src == other_src);
        }
    }
}
