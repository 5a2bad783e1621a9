//! The external configuration surface: SIP/media listen ports, timeouts,
//! candidate string, and the output URL template, read from a TOML file
//! at startup.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// `*` in `candidate` means "discover the public IP at runtime";
/// everything else is taken literally.
pub const DISCOVER_CANDIDATE: &str = "*";

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub sip_port: u16,
    pub media_port: u16,
    pub sip_connect_timeout_ms: u64,
    pub reinvite_wait_ms: u64,
    pub candidate: String,
    pub platform_id: String,
    pub platform_host: String,
    pub output_url_template: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    "gb-gateway/0.1".to_string()
}

impl GatewayConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn sip_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.sip_connect_timeout_ms)
    }

    pub fn reinvite_wait(&self) -> Duration {
        Duration::from_millis(self.reinvite_wait_ms)
    }

    /// Resolve `candidate` to a literal IP, discovering the outbound
    /// interface address if configured as `*`.
    pub fn resolve_candidate(&self) -> Result<String> {
        if self.candidate != DISCOVER_CANDIDATE {
            return Ok(self.candidate.clone());
        }
        local_outbound_ip().ok_or_else(|| Error::Config("failed to discover public IP for candidate \"*\"".to_string()))
    }
}

/// Ask the OS which local address it would use to reach the public
/// internet, without sending any traffic: connect a UDP socket to a
/// well-known address and read back the bound local address.
fn local_outbound_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip().to_string())
}
