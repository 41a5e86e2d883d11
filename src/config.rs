//! Process configuration (§10.2): read directly from the environment,
//! matching the source's `os.getenv` style and the teacher's own
//! hand-rolled config parsing. No external config-file crate — there are
//! exactly three inputs, and they're all already environment variables in
//! the source this was distilled from.

use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::raft::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: String, value: String },
}

/// `NODE_ID`, `PORT`, `PEERS` (§6). `PEERS` is a comma-separated
/// `peerId:port` list, each peer reachable on localhost; an empty or unset
/// `PEERS` means single-node operation.
pub struct Config {
    pub node_id: NodeId,
    pub port: u16,
    pub peers: HashMap<NodeId, SocketAddr>,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let node_id = require_env("NODE_ID")?;
        let port_raw = require_env("PORT")?;
        let port = port_raw
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid { name: "PORT".to_string(), value: port_raw })?;
        let peers = parse_peers(&env::var("PEERS").unwrap_or_default())?;
        Ok(Config { node_id, port, peers })
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name.to_string())),
    }
}

fn parse_peers(raw: &str) -> Result<HashMap<NodeId, SocketAddr>, ConfigError> {
    let mut peers = HashMap::new();
    if raw.trim().is_empty() {
        return Ok(peers);
    }
    for entry in raw.split(',') {
        let entry = entry.trim();
        let (id, port) = entry.split_once(':').ok_or_else(|| ConfigError::Invalid {
            name: "PEERS".to_string(),
            value: entry.to_string(),
        })?;
        let port: u16 = port.parse().map_err(|_| ConfigError::Invalid {
            name: "PEERS".to_string(),
            value: entry.to_string(),
        })?;
        peers.insert(id.to_string(), SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_peers_string_means_single_node() {
        assert!(parse_peers("").unwrap().is_empty());
        assert!(parse_peers("   ").unwrap().is_empty());
    }

    #[test]
    fn parses_a_comma_separated_peer_list() {
        let peers = parse_peers("n2:7002,n3:7003").unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers.get("n2").unwrap().port(), 7002);
        assert_eq!(peers.get("n3").unwrap().port(), 7003);
    }

    #[test]
    fn rejects_a_malformed_peer_entry() {
        assert!(parse_peers("n2-7002").is_err());
        assert!(parse_peers("n2:not-a-port").is_err());
    }
}
