// src/nat/config.rs
//! Probe configuration

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{NatError, NatResult};
use super::ice::transport::{validate_servers, IceServer};
use super::stun::StunUrl;

/// Top-level configuration, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Servers for the classification session. Needs at least two
    /// independent STUN servers.
    pub stun_servers: Vec<IceServer>,

    /// Options for the bundled STUN transport
    pub stun: StunOptions,

    /// Deadline applied by the CLI around each probe, in seconds
    pub deadline_secs: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                IceServer::new("stun:stun.l.google.com:19302"),
                IceServer::new("stun:stun1.l.google.com:19302"),
            ],
            stun: StunOptions::default(),
            deadline_secs: Some(30),
        }
    }
}

impl ProbeConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_file(path: impl AsRef<Path>) -> NatResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            NatError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        debug!("Loaded probe config from {}", path.display());
        Ok(config)
    }

    /// Deadline wrapped around each CLI probe, if any
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// The classification session needs two usable servers to tell cone
    /// mappings apart from symmetric ones
    pub fn validate(&self) -> NatResult<()> {
        validate_servers(&self.stun_servers)
            .map_err(|e| NatError::Configuration(format!("stun_servers: {}", e)))?;

        let usable = self.usable_stun_servers()?;
        if usable.len() < 2 {
            return Err(NatError::Configuration(format!(
                "NAT classification needs at least two independent STUN servers, found {}",
                usable.len()
            )));
        }

        self.stun.validate()
    }

    /// Distinct `stun:` endpoints the bundled transport will query. TURN and
    /// `stuns:` URLs are skipped; unparsable URLs are errors.
    fn usable_stun_servers(&self) -> NatResult<HashSet<(String, u16)>> {
        let mut usable = HashSet::new();
        for url in self.stun_servers.iter().flat_map(|s| s.urls.iter()) {
            if let Some(target) = StunUrl::parse(url)? {
                usable.insert((target.host.to_ascii_lowercase(), target.port));
            }
        }
        Ok(usable)
    }
}

/// STUN transport tuning (RFC 5389 Section 7.2.1 retransmission)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StunOptions {
    /// Local bind address for the gathering socket
    pub bind_addr: SocketAddr,

    /// Initial retransmission timeout in milliseconds
    pub initial_rto_ms: u64,

    /// Cap for the doubled RTO in milliseconds
    pub max_rto_ms: u64,

    /// Maximum Binding Request transmissions per server
    pub max_retries: u32,

    /// Emit host candidates for local interfaces
    pub include_host_candidates: bool,
}

impl Default for StunOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            initial_rto_ms: 500,
            max_rto_ms: 3200,
            max_retries: 4,
            include_host_candidates: true,
        }
    }
}

impl StunOptions {
    /// First retransmission timeout
    pub fn initial_rto(&self) -> Duration {
        Duration::from_millis(self.initial_rto_ms)
    }

    /// Upper bound for the doubled retransmission timeout
    pub fn max_rto(&self) -> Duration {
        Duration::from_millis(self.max_rto_ms)
    }

    /// Reject zero or inverted retransmission settings
    pub fn validate(&self) -> NatResult<()> {
        if self.initial_rto_ms == 0 || self.max_retries == 0 {
            return Err(NatError::Configuration(
                "stun.initial_rto_ms and stun.max_retries must be non-zero".to_string(),
            ));
        }
        if self.max_rto_ms < self.initial_rto_ms {
            return Err(NatError::Configuration(
                "stun.max_rto_ms must not be below stun.initial_rto_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProbeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stun_servers.len(), 2);
    }

    #[test]
    fn test_single_server_is_rejected() {
        let config = ProbeConfig {
            stun_servers: vec![IceServer::new("stun:stun.l.google.com:19302")],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(NatError::Configuration(_))));
    }

    fn config_with(urls: &[&str]) -> ProbeConfig {
        ProbeConfig {
            stun_servers: urls.iter().map(|url| IceServer::new(*url)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_turn_url_does_not_count_as_stun_server() {
        let config = config_with(&["stun:stun.l.google.com:19302", "turn:turn.example.org:3478"]);
        assert!(matches!(config.validate(), Err(NatError::Configuration(_))));

        let config = config_with(&["stun:a.example", "stuns:b.example"]);
        assert!(matches!(config.validate(), Err(NatError::Configuration(_))));
    }

    #[test]
    fn test_duplicate_stun_server_counts_once() {
        let config = config_with(&["stun:stun.l.google.com:19302", "stun:stun.l.google.com:19302"]);
        assert!(matches!(config.validate(), Err(NatError::Configuration(_))));

        // Same endpoint spelled differently
        let config = config_with(&["stun:STUN.example.org", "stun:stun.example.org:3478"]);
        assert!(matches!(config.validate(), Err(NatError::Configuration(_))));
    }

    #[test]
    fn test_blank_url_is_rejected() {
        let config = config_with(&["stun:stun.l.google.com:19302", ""]);
        assert!(matches!(config.validate(), Err(NatError::Configuration(_))));

        let config = config_with(&["stun:stun.l.google.com:19302", "   "]);
        assert!(matches!(config.validate(), Err(NatError::Configuration(_))));
    }

    #[test]
    fn test_two_entries_in_one_server_are_enough() {
        let config = ProbeConfig {
            stun_servers: vec![IceServer {
                urls: vec!["stun:a.example".to_string(), "stun:b.example:3479".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        // Same host on a different port is a distinct endpoint
        let config = config_with(&["stun:a.example:3478", "stun:a.example:3479", "turn:t.example"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ProbeConfig = serde_json::from_str(
            r#"{"stun_servers": [{"urls": "stun:a.example"}, {"urls": ["stun:b.example"]}],
                "stun": {"max_retries": 2}}"#,
        )
        .unwrap();

        assert_eq!(config.stun_servers[1].urls, vec!["stun:b.example"]);
        assert_eq!(config.stun.max_retries, 2);
        assert_eq!(config.stun.initial_rto_ms, 500);
        assert_eq!(config.deadline(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_bad_rto_is_rejected() {
        let options = StunOptions {
            initial_rto_ms: 1000,
            max_rto_ms: 100,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
