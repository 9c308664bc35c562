pub mod cidr;
pub mod ports;

use std::{
    collections::HashSet,
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::atomic::{AtomicUsize, Ordering},
};

pub use cidr::Subnet;
pub use ports::parse_ports;

use crate::error::ConfigError;

/// Upper bound on target addresses summed over all subnets.
pub const MAX_TARGET_ADDRESSES: u64 = 1 << 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetEndpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl TargetEndpoint {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

impl fmt::Display for TargetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Hands out (address, port) pairs in a fixed address-major cycle.
///
/// The expansion tables never change after construction; the cursor is the only
/// shared mutable state, so one distributor is shared by reference across all workers.
#[derive(Debug)]
pub struct TargetDistributor {
    addresses: Vec<Ipv4Addr>,
    ports: Vec<u16>,
    cursor: AtomicUsize,
}

impl TargetDistributor {
    pub fn from_config<S: AsRef<str>>(subnets: &[S], port_expr: &str) -> Result<Self, ConfigError> {
        let subnets = subnets
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                Subnet::parse(raw).map_err(|source| ConfigError::Cidr {
                    input: raw.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        // Counted before duplicates are removed.
        let hosts: u64 = subnets.iter().map(Subnet::host_count).sum();
        if hosts > MAX_TARGET_ADDRESSES {
            return Err(ConfigError::invalid(
                "simulation.target_subnets",
                format!("{hosts} addresses, at most {MAX_TARGET_ADDRESSES} allowed"),
            ));
        }

        let mut seen = HashSet::new();
        let mut addresses = Vec::new();
        for subnet in &subnets {
            addresses.extend(subnet.hosts().filter(|addr| seen.insert(*addr)));
        }
        let ports = parse_ports(port_expr)?;
        Self::from_parts(addresses, ports)
    }

    pub fn from_parts(addresses: Vec<Ipv4Addr>, ports: Vec<u16>) -> Result<Self, ConfigError> {
        if addresses.is_empty() {
            return Err(ConfigError::EmptyAddresses);
        }
        if ports.is_empty() {
            return Err(ConfigError::EmptyPorts);
        }
        Ok(Self {
            addresses,
            ports,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn addresses(&self) -> &[Ipv4Addr] {
        &self.addresses
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Number of distinct (address, port) pairs.
    pub fn len(&self) -> usize {
        self.addresses.len() * self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pair at position `index` of the cycle: ports vary fastest, addresses slowest.
    pub fn target_at(&self, index: usize) -> TargetEndpoint {
        let ports = self.ports.len();
        TargetEndpoint {
            address: self.addresses[(index / ports) % self.addresses.len()],
            port: self.ports[index % ports],
        }
    }

    pub fn next_target(&self) -> TargetEndpoint {
        // Wrap inside the cycle so overflow never skews the distribution.
        let len = self.len();
        let index = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);
        self.target_at(index)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::*;

    fn count_selections(distributor: &TargetDistributor, calls: usize) -> HashMap<TargetEndpoint, usize> {
        let mut counts = HashMap::new();
        for _ in 0..calls {
            *counts.entry(distributor.next_target()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn cycle_is_address_major() {
        let distributor = TargetDistributor::from_config(&["10.0.0.0/30"], "80,443").unwrap();
        let order: Vec<String> = (0..5)
            .map(|_| distributor.next_target().to_string())
            .collect();
        assert_eq!(
            order,
            vec![
                "10.0.0.1:80",
                "10.0.0.1:443",
                "10.0.0.2:80",
                "10.0.0.2:443",
                "10.0.0.1:80"
            ]
        );
    }

    #[test]
    fn counts_are_floor_or_ceil() {
        let distributor = TargetDistributor::from_config(&["10.0.0.0/29"], "1-3").unwrap();
        let k = distributor.len();
        assert_eq!(k, 18);
        for n in [1usize, 17, 18, 19, 100, 1001] {
            let distributor = TargetDistributor::from_config(&["10.0.0.0/29"], "1-3").unwrap();
            let counts = count_selections(&distributor, n);
            let total: usize = counts.values().sum();
            assert_eq!(total, n);
            for i in 0..k {
                let c = counts.get(&distributor.target_at(i)).copied().unwrap_or(0);
                assert!(c == n / k || c == n.div_ceil(k), "n={n} count={c}");
            }
        }
    }

    #[test]
    fn concurrent_callers_share_the_cycle() {
        let distributor = Arc::new(TargetDistributor::from_config(&["10.9.0.0/28"], "5000").unwrap());
        let k = distributor.len();
        let per_thread = 1000;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let distributor = distributor.clone();
                std::thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| distributor.next_target())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<TargetEndpoint, usize> = HashMap::new();
        for handle in handles {
            for target in handle.join().unwrap() {
                assert!(distributor.addresses().contains(&target.address));
                *counts.entry(target).or_insert(0) += 1;
            }
        }
        let n = 8 * per_thread;
        assert_eq!(counts.len(), k);
        assert!(counts.values().all(|&c| c == n / k || c == n.div_ceil(k)));
    }

    #[test]
    fn overlapping_subnets_are_deduplicated() {
        let distributor =
            TargetDistributor::from_config(&["10.0.0.0/30", "10.0.0.2/32", "10.0.0.8/32"], "53").unwrap();
        assert_eq!(
            distributor.addresses(),
            &[
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 8)
            ]
        );
    }

    #[test]
    fn address_total_is_capped_across_subnets() {
        // each /8 is within the per-subnet limit, together they are not
        let err = TargetDistributor::from_config(&["10.0.0.0/8", "11.0.0.0/8"], "80").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "simulation.target_subnets",
                ..
            }
        ));
    }

    #[test]
    fn fails_fast_on_bad_input() {
        assert!(matches!(
            TargetDistributor::from_config(&["10.0.0.0/40"], "80"),
            Err(ConfigError::Cidr { .. })
        ));
        assert!(matches!(
            TargetDistributor::from_config(&["10.0.0.0/24"], "90-80"),
            Err(ConfigError::Ports(_))
        ));
        let none: [&str; 0] = [];
        assert!(matches!(
            TargetDistributor::from_config(&none, "80"),
            Err(ConfigError::EmptyAddresses)
        ));
        assert!(matches!(
            TargetDistributor::from_parts(vec![Ipv4Addr::LOCALHOST], vec![]),
            Err(ConfigError::EmptyPorts)
        ));
    }
}
