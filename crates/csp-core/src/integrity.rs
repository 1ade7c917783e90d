//! CRC32 and HMAC packet trailers.
//!
//! Both trailers are 4 bytes, appended behind the payload. When both are
//! present the HMAC is appended first and the CRC32 covers it:
//!
//! ```text
//! [payload][hmac:4][crc32:4]
//! ```
//!
//! The verify functions take the covered bytes followed by the trailer and
//! never modify anything; stripping is left to the caller.

use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PacketError;
use crate::packet::Packet;

type HmacSha256 = Hmac<Sha256>;

pub const CRC32_SIZE: usize = 4;
pub const HMAC_SIZE: usize = 4;
pub const HMAC_KEY_SIZE: usize = 16;

/// CRC32 (IEEE) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Append a big-endian CRC32 of the current payload.
pub fn crc32_append(packet: &mut Packet) -> Result<(), PacketError> {
    let sum = crc32(packet.payload());
    packet.append(&sum.to_be_bytes())
}

/// Check that the last 4 bytes of `data` are the CRC32 of the rest.
pub fn crc32_verify(data: &[u8]) -> bool {
    let Some(split) = data.len().checked_sub(CRC32_SIZE) else {
        return false;
    };
    let (body, trailer) = data.split_at(split);
    crc32(body).to_be_bytes() == trailer
}

/// Shared key for HMAC trailers.
#[derive(Clone, PartialEq, Eq)]
pub struct HmacKey([u8; HMAC_KEY_SIZE]);

impl HmacKey {
    pub const fn new(bytes: [u8; HMAC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HMAC_KEY_SIZE] {
        &self.0
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        // HMAC zero-pads keys shorter than the hash block.
        let mut block = Key::<HmacSha256>::default();
        block[..HMAC_KEY_SIZE].copy_from_slice(&self.0);
        let mut mac = <HmacSha256 as KeyInit>::new(&block);
        mac.update(data);
        mac
    }
}

impl Default for HmacKey {
    fn default() -> Self {
        Self([0u8; HMAC_KEY_SIZE])
    }
}

impl core::fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("HmacKey(..)")
    }
}

/// Append the first 4 bytes of HMAC-SHA256(key, payload).
pub fn hmac_append(packet: &mut Packet, key: &HmacKey) -> Result<(), PacketError> {
    let tag = key.mac(packet.payload()).finalize().into_bytes();
    packet.append(&tag[..HMAC_SIZE])
}

/// Check that the last 4 bytes of `data` are the truncated HMAC of the rest.
pub fn hmac_verify(data: &[u8], key: &HmacKey) -> bool {
    let Some(split) = data.len().checked_sub(HMAC_SIZE) else {
        return false;
    };
    let (body, trailer) = data.split_at(split);
    key.mac(body).verify_truncated_left(trailer).is_ok()
}
