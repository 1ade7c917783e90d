//! Stack configuration.
//!
//! Every field has a default, so an empty TOML table yields a working
//! single-node stack.

use serde::Deserialize;

use csp_core::AddressMode;
use csp_core::integrity::{HMAC_KEY_SIZE, HmacKey};
use csp_protocol::rdp::RdpOptions;

use crate::dedup::DedupMode;
use crate::error::StackError;

/// Optional protocol features, checked at run time by the router and the
/// security gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Capabilities {
    #[serde(default = "enabled")]
    pub rdp: bool,
    #[serde(default = "enabled")]
    pub hmac: bool,
    #[serde(default)]
    pub promisc: bool,
    #[serde(default = "enabled")]
    pub rtable: bool,
}

fn enabled() -> bool {
    true
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            rdp: true,
            hmac: true,
            promisc: false,
            rtable: true,
        }
    }
}

/// Header layout in use on every link of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    Legacy,
    #[default]
    Extended,
}

impl From<Addressing> for AddressMode {
    fn from(a: Addressing) -> Self {
        match a {
            Addressing::Legacy => AddressMode::Legacy,
            Addressing::Extended => AddressMode::Extended,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StackConfig {
    #[serde(default = "default_address")]
    pub address: u16,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default)]
    pub addressing: Addressing,
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    /// Buffers only handed out by the must-succeed allocation paths.
    #[serde(default = "default_buffer_reserve")]
    pub buffer_reserve: usize,
    #[serde(default = "default_conn_count")]
    pub conn_count: usize,
    #[serde(default = "default_queue_len")]
    pub conn_rx_queue_len: usize,
    #[serde(default = "default_queue_len")]
    pub inbound_queue_len: usize,
    #[serde(default = "default_queue_len")]
    pub socket_backlog: usize,
    #[serde(default = "default_queue_len")]
    pub promisc_queue_len: usize,
    /// How long one router iteration waits for an inbound packet.
    #[serde(default = "default_route_wait_ms")]
    pub route_wait_ms: u64,
    #[serde(default)]
    pub dedup: DedupMode,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// 16-byte HMAC key as hex. Unset means an all-zero key.
    pub hmac_key: Option<String>,
    #[serde(default)]
    pub rdp: RdpOptions,
}

fn default_address() -> u16 {
    1
}

fn default_hostname() -> String {
    "csp-node".to_string()
}

fn default_buffer_count() -> usize {
    20
}

fn default_buffer_reserve() -> usize {
    2
}

fn default_conn_count() -> usize {
    8
}

fn default_queue_len() -> usize {
    10
}

fn default_route_wait_ms() -> u64 {
    100
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            hostname: default_hostname(),
            addressing: Addressing::default(),
            buffer_count: default_buffer_count(),
            buffer_reserve: default_buffer_reserve(),
            conn_count: default_conn_count(),
            conn_rx_queue_len: default_queue_len(),
            inbound_queue_len: default_queue_len(),
            socket_backlog: default_queue_len(),
            promisc_queue_len: default_queue_len(),
            route_wait_ms: default_route_wait_ms(),
            dedup: DedupMode::default(),
            capabilities: Capabilities::default(),
            hmac_key: None,
            rdp: RdpOptions::default(),
        }
    }
}

impl StackConfig {
    pub fn address_mode(&self) -> AddressMode {
        self.addressing.into()
    }

    pub fn validate(&self) -> Result<(), StackError> {
        let mode = self.address_mode();
        if self.address > mode.max_address() || self.address == mode.broadcast_address() {
            return Err(StackError::Config(format!(
                "address {} is not a valid {:?} host address",
                self.address, mode
            )));
        }
        if self.buffer_count == 0 {
            return Err(StackError::Config("buffer_count must be positive".into()));
        }
        if self.buffer_reserve >= self.buffer_count {
            return Err(StackError::Config(
                "buffer_reserve must be below buffer_count".into(),
            ));
        }
        if self.conn_count == 0 || self.conn_count > usize::from(u16::MAX) {
            return Err(StackError::Config(format!(
                "conn_count {} out of range",
                self.conn_count
            )));
        }
        for (name, len) in [
            ("conn_rx_queue_len", self.conn_rx_queue_len),
            ("inbound_queue_len", self.inbound_queue_len),
            ("socket_backlog", self.socket_backlog),
        ] {
            if len == 0 {
                return Err(StackError::Config(format!("{name} must be positive")));
            }
        }
        self.rdp
            .validate()
            .map_err(|e| StackError::Config(format!("rdp: {e}")))?;
        if self.capabilities.rdp && self.rdp.window_size as usize > self.conn_rx_queue_len {
            return Err(StackError::Config(format!(
                "rdp: window_size {} exceeds conn_rx_queue_len {}",
                self.rdp.window_size, self.conn_rx_queue_len
            )));
        }
        self.hmac_key()?;
        Ok(())
    }

    /// Decode the configured HMAC key.
    pub fn hmac_key(&self) -> Result<HmacKey, StackError> {
        let Some(text) = &self.hmac_key else {
            return Ok(HmacKey::default());
        };
        let bytes = hex::decode(text.trim()).map_err(|e| StackError::HmacKey(e.to_string()))?;
        let key: [u8; HMAC_KEY_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            StackError::HmacKey(format!("expected {HMAC_KEY_SIZE} bytes, got {}", b.len()))
        })?;
        Ok(HmacKey::new(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_gives_defaults() {
        let cfg: StackConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.address, 1);
        assert_eq!(cfg.buffer_count, 20);
        assert_eq!(cfg.buffer_reserve, 2);
        assert_eq!(cfg.address_mode(), AddressMode::Extended);
        assert_eq!(cfg.dedup, DedupMode::Off);
        assert!(cfg.capabilities.rdp);
        assert!(!cfg.capabilities.promisc);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_nested_sections() {
        let cfg: StackConfig = toml::from_str(
            r#"
            address = 7
            addressing = "legacy"
            dedup = "incoming"
            hmac_key = "000102030405060708090a0b0c0d0e0f"

            [capabilities]
            hmac = false

            [rdp]
            window_size = 8
            delayed_acks = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.address_mode(), AddressMode::Legacy);
        assert_eq!(cfg.dedup, DedupMode::Incoming);
        assert!(!cfg.capabilities.hmac);
        assert!(cfg.capabilities.rdp);
        assert_eq!(cfg.rdp.window_size, 8);
        assert!(!cfg.rdp.delayed_acks);
        assert_eq!(cfg.rdp.packet_timeout_ms, 1000);
        assert_eq!(cfg.hmac_key().unwrap().as_bytes()[15], 0x0f);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_reserve_not_below_count() {
        let cfg = StackConfig {
            buffer_count: 4,
            buffer_reserve: 4,
            ..StackConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(StackError::Config(_))));
    }

    #[test]
    fn rejects_broadcast_as_own_address() {
        let cfg = StackConfig {
            address: 31,
            addressing: Addressing::Legacy,
            ..StackConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_window_wider_than_receive_queue() {
        let mut cfg = StackConfig::default();
        cfg.rdp.window_size = 12;
        let err = cfg.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: rdp: window_size 12 exceeds conn_rx_queue_len 10"
        );

        cfg.capabilities.rdp = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_short_hmac_key() {
        let cfg = StackConfig {
            hmac_key: Some("0011".into()),
            ..StackConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid HMAC key: expected 16 bytes, got 2");
    }
}
