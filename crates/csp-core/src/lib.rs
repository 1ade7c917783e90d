//! Core types, constants, and wire formats for the CSP network stack.
//!
//! This crate defines the packet identity (header) and its two wire layouts,
//! header flag bits, socket and connect option bitmasks, the caller-facing
//! error codes, the fixed-size packet buffer, and the CRC32/HMAC primitives
//! consumed by the security gate.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod constants;
pub mod error;
pub mod flags;
pub mod id;
pub mod integrity;
pub mod options;
pub mod packet;

pub use constants::Priority;
pub use error::{CspError, PacketError};
pub use flags::HeaderFlags;
pub use id::{AddressMode, CspId, IdField, IdMask};
pub use integrity::HmacKey;
pub use options::{ConnectOptions, SocketOptions};
pub use packet::Packet;
