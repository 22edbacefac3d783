//! Cluster topology discovery.
//!
//! `SCAN` only walks the node it is sent to, so a keyspace scan over a
//! cluster needs one connection per primary. The primaries are read from the
//! `CLUSTER NODES` reply at scan time and addressed with the seed URL's
//! scheme and credentials.

use url::Url;

use crate::{RedisError, Result};

/// A primary node as listed by `CLUSTER NODES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    /// Node ID.
    pub id: String,
    /// Host (IP or hostname).
    pub host: String,
    /// Client port.
    pub port: u16,
}

impl ClusterNode {
    /// `host:port`, with IPv6 hosts bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Connection URL for this node, keeping scheme, credentials and
    /// database of `seed`.
    pub fn url(&self, seed: &str) -> Result<String> {
        let mut url = Url::parse(seed)
            .map_err(|e| RedisError::Config(format!("invalid Redis URL '{}': {}", seed, e)))?;

        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        url.set_host(Some(&host))
            .map_err(|e| RedisError::Cluster(format!("bad node address '{}': {}", self.address(), e)))?;
        url.set_port(Some(self.port))
            .map_err(|_| RedisError::Cluster(format!("bad node port '{}'", self.address())))?;

        Ok(url.to_string())
    }
}

/// Reachable primaries in a `CLUSTER NODES` reply.
///
/// Replicas are skipped, as are nodes flagged `fail`, `handshake` or
/// `noaddr`. Lines that do not parse are ignored.
pub fn parse_primaries(reply: &str) -> Vec<ClusterNode> {
    reply.lines().filter_map(parse_primary).collect()
}

fn parse_primary(line: &str) -> Option<ClusterNode> {
    let mut fields = line.split_whitespace();
    let id = fields.next()?;
    let address = fields.next()?;
    let flags: Vec<&str> = fields.next()?.split(',').collect();

    if !flags.contains(&"master") {
        return None;
    }
    if flags.iter().any(|flag| matches!(*flag, "fail" | "handshake" | "noaddr")) {
        return None;
    }

    // ip:port@cport[,hostname]
    let (endpoint, hostname) = match address.split_once(',') {
        Some((endpoint, rest)) => (endpoint, rest.split(',').next().filter(|h| !h.is_empty())),
        None => (address, None),
    };
    let endpoint = endpoint.split('@').next()?;
    let (ip, port) = endpoint.rsplit_once(':')?;
    let port = port.parse::<u16>().ok().filter(|port| *port > 0)?;

    let host = if ip.is_empty() { hostname? } else { ip };

    Some(ClusterNode {
        id: id.to_string(),
        host: host.to_string(),
        port,
    })
}
