use crate::env::{env_string, parse_env_var};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::warn;

/// Comm module configuration
#[derive(Debug, Clone)]
pub struct CommConfig {
    /// Listen address (default: 127.0.0.1)
    pub listen_addr: String,
    /// Listen port (default: 9700)
    pub listen_port: u16,
    /// Maximum payload size in bytes, both directions (default: 65000)
    pub max_payload_bytes: usize,
    /// Deduplication table capacity per client (default: 256)
    pub dedup_capacity: usize,
    /// Deduplication entry TTL in seconds (default: 300)
    pub dedup_ttl_secs: u64,
    /// Seconds to wait for a tool result, 0 = no limit (default: 0)
    pub response_timeout_secs: u64,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 9700,
            max_payload_bytes: 65000,
            dedup_capacity: 256,
            dedup_ttl_secs: 300,
            response_timeout_secs: 0,
        }
    }
}

impl CommConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = CommConfig::default();
        Self {
            listen_addr: env_string("FILE_SERVER_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            listen_port: parse_env_var("FILE_SERVER_LISTEN_PORT", defaults.listen_port),
            max_payload_bytes: parse_env_var(
                "FILE_SERVER_MAX_PAYLOAD_BYTES",
                defaults.max_payload_bytes,
            ),
            dedup_capacity: defaults.dedup_capacity,
            dedup_ttl_secs: defaults.dedup_ttl_secs,
            response_timeout_secs: parse_env_var(
                "FILE_SERVER_RESPONSE_TIMEOUT_SECS",
                defaults.response_timeout_secs,
            ),
        }
    }

    /// Returns the socket address to bind to
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = self.listen_addr.parse::<IpAddr>().unwrap_or_else(|_| {
            warn!(addr = %self.listen_addr, "Invalid listen address, using 127.0.0.1");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });
        SocketAddr::new(ip, self.listen_port)
    }
}
