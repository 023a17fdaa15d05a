//! Allow-list of game server targets
//!
//! Registration supplies IP/CIDR specs and port/range specs as strings. They are
//! compiled once into networks and port ranges; membership of a target is the
//! cross product of the two lists.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use ipnet::IpNet;

/// Rejected allow-list input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllowListError {
    #[error("invalid game server address or CIDR: {0:?}")]
    InvalidAddress(String),
    #[error("invalid game port or port range: {0:?}")]
    InvalidPort(String),
    #[error("game_server_ips must not be empty")]
    NoAddresses,
    #[error("game_ports must not be empty")]
    NoPorts,
}

/// Inclusive port range; a single port is `start == end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

impl FromStr for PortRange {
    type Err = AllowListError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || AllowListError::InvalidPort(spec.to_string());
        let trimmed = spec.trim();

        let (start, end) = match trimmed.split_once('-') {
            Some((lo, hi)) => (
                lo.trim().parse::<u16>().map_err(|_| invalid())?,
                hi.trim().parse::<u16>().map_err(|_| invalid())?,
            ),
            None => {
                let port = trimmed.parse::<u16>().map_err(|_| invalid())?;
                (port, port)
            }
        };

        if start == 0 || start > end {
            return Err(invalid());
        }

        Ok(Self { start, end })
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Parse a plain IP (host prefix) or a CIDR block
fn parse_network(spec: &str) -> Result<IpNet, AllowListError> {
    let trimmed = spec.trim();
    if let Ok(net) = trimmed.parse::<IpNet>() {
        return Ok(net);
    }
    trimmed
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| AllowListError::InvalidAddress(spec.to_string()))
}

/// Compiled, immutable set of targets a session may forward to
#[derive(Debug, Clone)]
pub struct AllowList {
    networks: Vec<IpNet>,
    ports: Vec<PortRange>,
    initial_target: SocketAddr,
}

impl AllowList {
    /// Compile registration specs. Both lists must be non-empty and every
    /// entry must parse.
    pub fn compile<S: AsRef<str>>(ips: &[S], ports: &[S]) -> Result<Self, AllowListError> {
        let networks = ips
            .iter()
            .map(|spec| parse_network(spec.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let ports = ports
            .iter()
            .map(|spec| spec.as_ref().parse::<PortRange>())
            .collect::<Result<Vec<_>, _>>()?;

        let first_net = networks.first().ok_or(AllowListError::NoAddresses)?;
        let first_ports = ports.first().ok_or(AllowListError::NoPorts)?;

        // Host prefixes yield the address itself; wider blocks their first usable host
        let first_ip = if first_net.prefix_len() == first_net.max_prefix_len() {
            first_net.addr()
        } else {
            first_net.hosts().next().unwrap_or_else(|| first_net.network())
        };
        let initial_target = SocketAddr::new(first_ip, first_ports.start);

        Ok(Self {
            networks,
            ports,
            initial_target,
        })
    }

    /// Whether `target` is inside any network and any port range
    pub fn contains(&self, target: SocketAddr) -> bool {
        let ip = target.ip();
        self.networks.iter().any(|net| net.contains(&ip))
            && self.ports.iter().any(|range| range.contains(target.port()))
    }

    /// Target a freshly registered session forwards to
    pub fn initial_target(&self) -> SocketAddr {
        self.initial_target
    }
}
