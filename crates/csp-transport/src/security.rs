//! Security gate: integrity and authentication policy for incoming packets.
//!
//! Both functions only read the packet. Failures bump the ingress
//! interface's `rx_error` (CRC32, RDP) or `auth_error` (HMAC) counter;
//! freeing the packet is the router's job.

use csp_core::integrity::{CRC32_SIZE, HMAC_SIZE, HmacKey, crc32_verify, hmac_verify};
use csp_core::{HeaderFlags, Packet, SocketOptions};

use crate::config::Capabilities;
use crate::error::SecurityError;
use crate::iface::IfaceCounters;

/// Result of a passed check: how many trailer bytes were verified and can
/// be stripped from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityVerdict {
    pub trailer_len: usize,
}

/// Reject packets carrying a header option this node has disabled.
pub fn check_options(
    packet: &Packet,
    caps: &Capabilities,
    counters: &IfaceCounters,
) -> Result<(), SecurityError> {
    let flags = packet.id.flags;
    if !caps.hmac && flags.contains(HeaderFlags::HMAC) {
        counters.auth_error.inc();
        return Err(SecurityError::Unsupported("HMAC"));
    }
    if !caps.rdp && flags.contains(HeaderFlags::RDP) {
        counters.rx_error.inc();
        return Err(SecurityError::Unsupported("RDP"));
    }
    Ok(())
}

/// Check `packet` against `policy`.
///
/// Trailers sit as `[payload][hmac][crc32]`: the CRC32 is verified over
/// everything before it, then the HMAC over the payload.
pub fn check(
    policy: SocketOptions,
    packet: &Packet,
    caps: &Capabilities,
    key: &HmacKey,
    counters: &IfaceCounters,
) -> Result<SecurityVerdict, SecurityError> {
    let flags = packet.id.flags;
    let data = packet.payload();
    let mut end = data.len();

    if flags.contains(HeaderFlags::CRC32) {
        if !crc32_verify(&data[..end]) {
            counters.rx_error.inc();
            return Err(SecurityError::Crc32Mismatch);
        }
        end -= CRC32_SIZE;
    } else if policy.contains(SocketOptions::CRC32REQ) {
        counters.rx_error.inc();
        return Err(SecurityError::Crc32Missing);
    }

    if caps.hmac {
        if flags.contains(HeaderFlags::HMAC) {
            if !hmac_verify(&data[..end], key) {
                counters.auth_error.inc();
                return Err(SecurityError::HmacMismatch);
            }
            end -= HMAC_SIZE;
        } else if policy.contains(SocketOptions::HMACREQ) {
            counters.auth_error.inc();
            return Err(SecurityError::HmacMissing);
        }
    }

    if caps.rdp && !flags.contains(HeaderFlags::RDP) && policy.contains(SocketOptions::RDPREQ) {
        counters.rx_error.inc();
        return Err(SecurityError::RdpMissing);
    }

    Ok(SecurityVerdict {
        trailer_len: data.len() - end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_core::integrity::{crc32_append, hmac_append};

    fn packet(flags: HeaderFlags) -> Packet {
        let mut p = Packet::new();
        p.set_payload(b"housekeeping").unwrap();
        p.id.flags = flags;
        p
    }

    fn with_crc() -> Packet {
        let mut p = packet(HeaderFlags::CRC32);
        crc32_append(&mut p).unwrap();
        p
    }

    fn with_hmac(key: &HmacKey) -> Packet {
        let mut p = packet(HeaderFlags::HMAC);
        hmac_append(&mut p, key).unwrap();
        p
    }

    fn run(policy: SocketOptions, p: &Packet) -> (Result<SecurityVerdict, SecurityError>, IfaceCounters) {
        let counters = IfaceCounters::default();
        let res = check(policy, p, &Capabilities::default(), &HmacKey::default(), &counters);
        (res, counters)
    }

    #[test]
    fn crc_truth_table() {
        // (flag present, valid digest, required) -> outcome
        let (res, _) = run(SocketOptions::NONE, &packet(HeaderFlags::NONE));
        assert_eq!(res, Ok(SecurityVerdict { trailer_len: 0 }));

        let (res, c) = run(SocketOptions::CRC32REQ, &packet(HeaderFlags::NONE));
        assert_eq!(res, Err(SecurityError::Crc32Missing));
        assert_eq!(c.rx_error.get(), 1);

        let (res, _) = run(SocketOptions::NONE, &with_crc());
        assert_eq!(res, Ok(SecurityVerdict { trailer_len: 4 }));

        let (res, _) = run(SocketOptions::CRC32REQ, &with_crc());
        assert!(res.is_ok());

        let mut bad = with_crc();
        bad.payload_mut()[0] ^= 0xFF;
        for policy in [SocketOptions::NONE, SocketOptions::CRC32REQ] {
            let (res, c) = run(policy, &bad);
            assert_eq!(res, Err(SecurityError::Crc32Mismatch));
            assert_eq!(c.rx_error.get(), 1);
        }
    }

    #[test]
    fn hmac_truth_table() {
        let key = HmacKey::default();
        let (res, c) = run(SocketOptions::HMACREQ, &packet(HeaderFlags::NONE));
        assert_eq!(res, Err(SecurityError::HmacMissing));
        assert_eq!(c.auth_error.get(), 1);
        assert_eq!(c.rx_error.get(), 0);

        let (res, _) = run(SocketOptions::HMACREQ, &with_hmac(&key));
        assert_eq!(res, Ok(SecurityVerdict { trailer_len: 4 }));

        let other = HmacKey::new([9; 16]);
        let (res, c) = run(SocketOptions::NONE, &with_hmac(&other));
        assert_eq!(res, Err(SecurityError::HmacMismatch));
        assert_eq!(c.auth_error.get(), 1);
    }

    #[test]
    fn hmac_ignored_when_disabled() {
        let caps = Capabilities {
            hmac: false,
            ..Capabilities::default()
        };
        let counters = IfaceCounters::default();
        let res = check(
            SocketOptions::HMACREQ,
            &packet(HeaderFlags::NONE),
            &caps,
            &HmacKey::default(),
            &counters,
        );
        assert!(res.is_ok());
    }

    #[test]
    fn crc_covers_hmac_trailer() {
        let key = HmacKey::default();
        let mut p = packet(HeaderFlags::HMAC | HeaderFlags::CRC32);
        hmac_append(&mut p, &key).unwrap();
        crc32_append(&mut p).unwrap();
        let (res, _) = run(SocketOptions::HMACREQ | SocketOptions::CRC32REQ, &p);
        assert_eq!(res, Ok(SecurityVerdict { trailer_len: 8 }));
    }

    #[test]
    fn rdp_required() {
        let (res, c) = run(SocketOptions::RDPREQ, &packet(HeaderFlags::NONE));
        assert_eq!(res, Err(SecurityError::RdpMissing));
        assert_eq!(c.rx_error.get(), 1);

        let (res, _) = run(SocketOptions::RDPREQ, &packet(HeaderFlags::RDP));
        assert!(res.is_ok());

        let caps = Capabilities {
            rdp: false,
            ..Capabilities::default()
        };
        let res = check(
            SocketOptions::RDPREQ,
            &packet(HeaderFlags::NONE),
            &caps,
            &HmacKey::default(),
            &IfaceCounters::default(),
        );
        assert!(res.is_ok());
    }

    #[test]
    fn unsupported_options_are_rejected_first() {
        let caps = Capabilities {
            rdp: false,
            hmac: false,
            ..Capabilities::default()
        };
        let counters = IfaceCounters::default();
        assert_eq!(
            check_options(&packet(HeaderFlags::RDP), &caps, &counters),
            Err(SecurityError::Unsupported("RDP"))
        );
        assert_eq!(counters.rx_error.get(), 1);
        assert_eq!(
            check_options(&packet(HeaderFlags::HMAC), &caps, &counters),
            Err(SecurityError::Unsupported("HMAC"))
        );
        assert_eq!(counters.auth_error.get(), 1);
        assert!(check_options(&packet(HeaderFlags::CRC32), &caps, &counters).is_ok());
    }

    #[test]
    fn gate_never_mutates_packet() {
        let p = with_crc();
        let before = p.payload().to_vec();
        let _ = run(SocketOptions::CRC32REQ, &p);
        assert_eq!(p.payload(), &before[..]);
    }
}
