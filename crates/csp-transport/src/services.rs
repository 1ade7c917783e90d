//! Handlers for the reserved service ports.
//!
//! A node typically binds one socket on [`PORT_ANY`] and passes every
//! accepted connection's packets through [`service_handler`], which
//! answers the ports it knows and reports the rest as unhandled.
//!
//! [`PORT_ANY`]: csp_core::constants::PORT_ANY

use std::time::Duration;

use csp_core::constants::{PORT_BUF_FREE, PORT_MEMFREE, PORT_PING, PORT_REBOOT, PORT_UPTIME};

use crate::buffer::PacketBuf;
use crate::conn::ConnHandle;
use crate::stack::Stack;

pub const REBOOT_MAGIC: u32 = 0x8007_8007;
pub const SHUTDOWN_MAGIC: u32 = 0xD1E5_529A;

const REPLY_TIMEOUT: Duration = Duration::from_millis(100);

fn u32_reply(mut packet: PacketBuf, value: u32) -> Option<PacketBuf> {
    packet.set_payload(&value.to_be_bytes()).ok().map(|()| packet)
}

/// Answer `packet` if it arrived on a service port. Returns `false`, and
/// drops the packet, for any other port.
pub fn service_handler(stack: &Stack, handle: ConnHandle, packet: PacketBuf) -> bool {
    let Ok(port) = stack.local_port(handle) else {
        return false;
    };

    let reply = match port {
        PORT_PING => Some(packet),
        PORT_MEMFREE => {
            let free = u32::try_from(stack.hooks().memfree()).unwrap_or(u32::MAX);
            u32_reply(packet, free)
        }
        PORT_BUF_FREE => {
            let free = u32::try_from(stack.buffer_remaining()).unwrap_or(u32::MAX);
            u32_reply(packet, free)
        }
        PORT_UPTIME => {
            let secs = u32::try_from(stack.uptime_ms() / 1000).unwrap_or(u32::MAX);
            u32_reply(packet, secs)
        }
        PORT_REBOOT => {
            let magic = packet
                .payload()
                .first_chunk::<4>()
                .map(|b| u32::from_be_bytes(*b));
            match magic {
                Some(REBOOT_MAGIC) => {
                    tracing::warn!("reboot requested");
                    stack.hooks().reboot();
                }
                Some(SHUTDOWN_MAGIC) => {
                    tracing::warn!("shutdown requested");
                    stack.hooks().shutdown();
                }
                _ => tracing::debug!(?magic, "reboot request with bad magic ignored"),
            }
            None
        }
        _ => return false,
    };

    if let Some(reply) = reply
        && let Err(err) = stack.send(handle, reply, REPLY_TIMEOUT)
    {
        tracing::debug!(%err, port, "service reply not sent");
    }
    true
}
