//! # Remote-address allow-list.
//!
//! After `accept`, the remote address is checked against the configured
//! list of CIDR ranges. Non-matching connections are closed immediately,
//! before the handler runs and before registration.
//!
//! An empty list allows everything. Unix-domain peers carry no IP address
//! and always pass; filesystem permissions are the access control there.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::net::stream::PeerAddr;

/// One CIDR range, e.g. `10.0.0.0/8` or `2001:db8::/32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CidrBlock {
    network: IpAddr,
    prefix: u8,
}

impl CidrBlock {
    /// Builds a block, validating the prefix length for the family.
    pub fn new(network: IpAddr, prefix: u8) -> Result<Self, String> {
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(format!("prefix /{prefix} too long for {network}"));
        }
        Ok(Self { network, prefix })
    }

    /// True when `ip` falls inside this range. Families never match
    /// across each other.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_v4(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_v6(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p)),
    }
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    match prefix {
        0 => 0,
        p => u128::MAX << (128 - u32::from(p)),
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for CidrBlock {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| format!("bad prefix length in '{s}'"))?;
                (addr, Some(prefix))
            }
            None => (s, None),
        };
        let network: IpAddr = addr.parse().map_err(|_| format!("bad address in '{s}'"))?;
        let prefix = prefix.unwrap_or(match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        });
        CidrBlock::new(network, prefix)
    }
}

/// Ordered list of allowed networks. Empty means allow all.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    blocks: Vec<CidrBlock>,
}

impl AllowList {
    /// An allow-everything list.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn new(blocks: Vec<CidrBlock>) -> Self {
        Self { blocks }
    }

    /// Parses each entry as a CIDR string, preserving order.
    pub fn parse(entries: &[impl AsRef<str>]) -> Result<Self, String> {
        let blocks = entries
            .iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { blocks })
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether the peer may be served.
    pub fn permits(&self, peer: &PeerAddr) -> bool {
        if self.blocks.is_empty() {
            return true;
        }
        match peer.ip() {
            // Unix peers have no IP; the socket path's permissions gate them.
            None => true,
            Some(ip) => self.blocks.iter().any(|b| b.contains(ip)),
        }
    }
}
