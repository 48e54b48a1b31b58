//! Sorted interval list of IP prefixes.
//!
//! IPv4 addresses live in the IPv4-mapped IPv6 range (`::ffff:0:0/96`) so a
//! single `u128` interval list covers both families.

use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::path::Path;

use super::{IpMatcher, rule_lines};
use crate::error::{Error, Result};

/// Inclusive `[start, end]` interval in the unified address space.
type Range = (u128, u128);

/// Set of IP ranges. Call [`NetList::sort`] after the last insert;
/// lookups on an unsorted list return wrong answers.
#[derive(Debug, Default, Clone)]
pub struct NetList {
    ranges: Vec<Range>,
    sorted: bool,
}

impl NetList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every file in `paths` and return the sorted list.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut list = Self::new();
        for path in paths {
            list.load_file(path.as_ref())?;
        }
        list.sort();
        Ok(list)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read ip file {}: {}", path.display(), e))
        })?;
        self.load_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn load_str(&mut self, contents: &str) -> std::result::Result<(), String> {
        for (line_no, entry) in rule_lines(contents) {
            self.add_str(entry)
                .map_err(|e| format!("line {}: {}", line_no, e))?;
        }
        Ok(())
    }

    /// Add a CIDR prefix ("10.0.0.0/8") or a single address ("192.0.2.1").
    pub fn add_str(&mut self, entry: &str) -> std::result::Result<(), String> {
        let network: IpNetwork = entry
            .parse()
            .map_err(|e| format!("invalid prefix '{}': {}", entry, e))?;
        self.add(network);
        Ok(())
    }

    pub fn add(&mut self, network: IpNetwork) {
        let (start, host_bits) = match network {
            IpNetwork::V4(net) => (
                to_u128(IpAddr::V4(net.network())),
                32 - u32::from(net.prefix()),
            ),
            IpNetwork::V6(net) => (
                to_u128(IpAddr::V6(net.network())),
                128 - u32::from(net.prefix()),
            ),
        };
        let span = if host_bits >= 128 {
            u128::MAX
        } else {
            (1u128 << host_bits) - 1
        };
        self.ranges.push((start, start.saturating_add(span)));
        self.sorted = false;
    }

    /// Sort and merge overlapping or adjacent ranges.
    pub fn sort(&mut self) {
        self.ranges.sort_unstable();
        let mut merged: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for &(start, end) in &self.ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => {
                    last.1 = last.1.max(end);
                }
                _ => merged.push((start, end)),
            }
        }
        self.ranges = merged;
        self.sorted = true;
    }
}

impl IpMatcher for NetList {
    fn contains(&self, ip: IpAddr) -> bool {
        debug_assert!(self.sorted || self.ranges.len() <= 1, "NetList used before sort()");
        let needle = to_u128(ip);
        let idx = self.ranges.partition_point(|&(start, _)| start <= needle);
        idx > 0 && needle <= self.ranges[idx - 1].1
    }

    fn len(&self) -> usize {
        self.ranges.len()
    }
}

fn to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

impl From<Vec<IpNetwork>> for NetList {
    fn from(networks: Vec<IpNetwork>) -> Self {
        let mut list = NetList::new();
        for net in networks {
            list.add(net);
        }
        list.sort();
        list
    }
}
