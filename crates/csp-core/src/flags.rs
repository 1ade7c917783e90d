//! Header flag bits.
//!
//! ```text
//! Bit 4: FRAG   (payload is a fragment)
//! Bit 3: HMAC   (4-byte HMAC trailer present)
//! Bit 1: RDP    (reliable transport segment)
//! Bit 0: CRC32  (4-byte CRC32 trailer present)
//! ```
//!
//! The legacy layout carries eight flag bits, the extended layout six; bits
//! outside the layout are dropped on encode.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HeaderFlags(u8);

impl HeaderFlags {
    pub const NONE: Self = Self(0);
    pub const FRAG: Self = Self(0x10);
    pub const HMAC: Self = Self(0x08);
    pub const RDP: Self = Self(0x02);
    pub const CRC32: Self = Self(0x01);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for HeaderFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for HeaderFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for HeaderFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for HeaderFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeaderFlags(0x{:02x}", self.0)?;
        for (flag, name) in [
            (Self::FRAG, "FRAG"),
            (Self::HMAC, "HMAC"),
            (Self::RDP, "RDP"),
            (Self::CRC32, "CRC32"),
        ] {
            if self.contains(flag) {
                write!(f, " {name}")?;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove() {
        let mut flags = HeaderFlags::NONE;
        flags.insert(HeaderFlags::RDP);
        flags |= HeaderFlags::CRC32;
        assert!(flags.contains(HeaderFlags::RDP | HeaderFlags::CRC32));
        assert!(!flags.contains(HeaderFlags::HMAC));

        flags.remove(HeaderFlags::RDP);
        assert_eq!(flags, HeaderFlags::CRC32);

        flags.set(HeaderFlags::HMAC, true);
        assert_eq!(flags.bits(), 0x09);
    }

    #[test]
    fn debug_lists_names() {
        let flags = HeaderFlags::HMAC | HeaderFlags::CRC32;
        assert_eq!(format!("{flags:?}"), "HeaderFlags(0x09 HMAC CRC32)");
    }
}
