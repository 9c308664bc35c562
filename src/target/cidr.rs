use std::{error::Error as StdError, fmt, net::Ipv4Addr, str::FromStr};

/// Largest expansion accepted for a single subnet (a /8).
pub const MAX_SUBNET_HOSTS: u64 = 1 << 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// Parse `a.b.c.d/len`. A bare address is read as `/32`. Host bits are masked off.
    pub fn parse(s: &str) -> Result<Self, CidrError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CidrError::Empty);
        }

        let (addr, prefix) = match s.split_once('/') {
            Some((addr, len)) => {
                let prefix = len.trim().parse::<u8>().map_err(CidrError::InvalidPrefix)?;
                (addr.trim(), prefix)
            }
            None => (s, 32),
        };
        if prefix > 32 {
            return Err(CidrError::PrefixOutOfRange(prefix));
        }

        let addr = addr.parse::<Ipv4Addr>().map_err(CidrError::InvalidAddress)?;
        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix));
        let subnet = Subnet { network, prefix };
        if subnet.host_count() > MAX_SUBNET_HOSTS {
            return Err(CidrError::TooLarge(prefix));
        }
        Ok(subnet)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of usable host addresses.
    pub fn host_count(&self) -> u64 {
        match self.prefix {
            32 => 1,
            31 => 2,
            p => (1u64 << (32 - p)) - 2,
        }
    }

    /// Usable host addresses in ascending order.
    ///
    /// Network and broadcast addresses are excluded below /31; a /31 yields both
    /// of its addresses (point-to-point) and a /32 yields the address itself.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let base = u32::from(self.network) as u64;
        let (first, last) = match self.prefix {
            32 => (base, base),
            31 => (base, base + 1),
            p => (base + 1, base + (1u64 << (32 - p)) - 2),
        };
        (first..=last).map(|raw| Ipv4Addr::from(raw as u32))
    }
}

impl FromStr for Subnet {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subnet::parse(s)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

#[derive(Debug)]
pub enum CidrError {
    Empty,
    InvalidAddress(std::net::AddrParseError),
    InvalidPrefix(std::num::ParseIntError),
    PrefixOutOfRange(u8),
    TooLarge(u8),
}

impl fmt::Display for CidrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CidrError::*;
        match self {
            Empty => write!(f, "empty input"),
            InvalidAddress(e) => write!(f, "invalid IPv4 address: {}", e),
            InvalidPrefix(e) => write!(f, "invalid prefix length: {}", e),
            PrefixOutOfRange(p) => write!(f, "prefix length /{} exceeds 32", p),
            TooLarge(p) => write!(
                f,
                "/{} is too large to expand (at most {} hosts per subnet)",
                p, MAX_SUBNET_HOSTS
            ),
        }
    }
}

impl StdError for CidrError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CidrError::InvalidAddress(e) => Some(e),
            CidrError::InvalidPrefix(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_size_matches_prefix() {
        for prefix in 16u8..31 {
            let subnet = Subnet::parse(&format!("172.16.0.0/{prefix}")).unwrap();
            let expected = (1u64 << (32 - prefix)) - 2;
            assert_eq!(subnet.host_count(), expected);
            assert_eq!(subnet.hosts().count() as u64, expected, "/{prefix}");
        }
    }

    #[test]
    fn excludes_network_and_broadcast() {
        let hosts: Vec<_> = Subnet::parse("10.0.0.0/30").unwrap().hosts().collect();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );

        let hosts: Vec<_> = Subnet::parse("192.168.1.0/24").unwrap().hosts().collect();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));
    }

    #[test]
    fn slash_32_is_the_literal_address() {
        let hosts: Vec<_> = Subnet::parse("8.8.4.4/32").unwrap().hosts().collect();
        assert_eq!(hosts, vec![Ipv4Addr::new(8, 8, 4, 4)]);

        let bare: Vec<_> = Subnet::parse("8.8.4.4").unwrap().hosts().collect();
        assert_eq!(bare, hosts);
    }

    #[test]
    fn slash_31_yields_both_addresses() {
        let hosts: Vec<_> = Subnet::parse("10.1.1.0/31").unwrap().hosts().collect();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(10, 1, 1, 0), Ipv4Addr::new(10, 1, 1, 1)]
        );
    }

    #[test]
    fn host_bits_are_masked() {
        let subnet = Subnet::parse("10.0.0.77/24").unwrap();
        assert_eq!(subnet.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(subnet.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(Subnet::parse(""), Err(CidrError::Empty)));
        assert!(matches!(
            Subnet::parse("10.0.0/24"),
            Err(CidrError::InvalidAddress(_))
        ));
        assert!(matches!(
            Subnet::parse("10.0.0.0/abc"),
            Err(CidrError::InvalidPrefix(_))
        ));
        assert!(matches!(
            Subnet::parse("10.0.0.0/33"),
            Err(CidrError::PrefixOutOfRange(33))
        ));
        assert!(matches!(
            Subnet::parse("0.0.0.0/0"),
            Err(CidrError::TooLarge(0))
        ));
    }
}
