//! Socket and connect option bitmasks.
//!
//! Both share one bit space so a connect option can be used directly as a
//! security policy:
//!
//! ```text
//! 0x0001  RDP required / forced
//! 0x0002  RDP prohibited / forbidden
//! 0x0004  HMAC required / forced
//! 0x0008  HMAC prohibited / forbidden
//! 0x0040  CRC32 required / forced
//! 0x0080  CRC32 prohibited / forbidden
//! 0x0100  connection-less socket
//! ```

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};

macro_rules! option_bits {
    ($name:ident) => {
        impl $name {
            pub const fn from_bits(bits: u32) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#06x})"), self.0)
            }
        }
    };
}

/// Options given when creating a socket. Also the policy the security gate
/// checks incoming packets against.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SocketOptions(u32);

impl SocketOptions {
    pub const NONE: Self = Self(0);
    pub const RDPREQ: Self = Self(0x0001);
    pub const RDPPROHIB: Self = Self(0x0002);
    pub const HMACREQ: Self = Self(0x0004);
    pub const HMACPROHIB: Self = Self(0x0008);
    pub const CRC32REQ: Self = Self(0x0040);
    pub const CRC32PROHIB: Self = Self(0x0080);
    pub const CONN_LESS: Self = Self(0x0100);

    pub const fn is_connectionless(self) -> bool {
        self.contains(Self::CONN_LESS)
    }

    /// A requirement and its prohibition set together.
    pub const fn is_contradictory(self) -> bool {
        (self.contains(Self::RDPREQ) && self.contains(Self::RDPPROHIB))
            || (self.contains(Self::HMACREQ) && self.contains(Self::HMACPROHIB))
            || (self.contains(Self::CRC32REQ) && self.contains(Self::CRC32PROHIB))
    }
}

option_bits!(SocketOptions);

/// Options given when opening an outgoing connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectOptions(u32);

impl ConnectOptions {
    pub const NONE: Self = Self(0);
    pub const RDP: Self = Self(0x0001);
    pub const NORDP: Self = Self(0x0002);
    pub const HMAC: Self = Self(0x0004);
    pub const NOHMAC: Self = Self(0x0008);
    pub const CRC32: Self = Self(0x0040);
    pub const NOCRC32: Self = Self(0x0080);

    /// The receive policy implied by these options: whatever is forced
    /// outbound is required inbound.
    pub const fn as_policy(self) -> SocketOptions {
        SocketOptions(self.0 & !SocketOptions::CONN_LESS.0)
    }
}

option_bits!(ConnectOptions);

impl From<SocketOptions> for ConnectOptions {
    fn from(opts: SocketOptions) -> Self {
        Self(opts.0 & !SocketOptions::CONN_LESS.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_options_share_policy_bits() {
        let opts = ConnectOptions::RDP | ConnectOptions::CRC32;
        let policy = opts.as_policy();
        assert!(policy.contains(SocketOptions::RDPREQ));
        assert!(policy.contains(SocketOptions::CRC32REQ));
        assert!(!policy.contains(SocketOptions::HMACREQ));
    }

    #[test]
    fn socket_to_connect_drops_connless() {
        let opts = SocketOptions::CONN_LESS | SocketOptions::HMACREQ;
        let conn = ConnectOptions::from(opts);
        assert_eq!(conn, ConnectOptions::HMAC);
    }

    #[test]
    fn contradictions_detected() {
        assert!((SocketOptions::CRC32REQ | SocketOptions::CRC32PROHIB).is_contradictory());
        assert!(!(SocketOptions::CRC32REQ | SocketOptions::HMACPROHIB).is_contradictory());
    }

    #[test]
    fn debug_is_hex() {
        assert_eq!(format!("{:?}", SocketOptions::CONN_LESS), "SocketOptions(0x0100)");
    }
}
