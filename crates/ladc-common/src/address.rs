//! Normalised IPv4/IPv6 address value with optional CIDR prefix.
//!
//! Equality and ordering are defined on `(family, bytes)` alone (spec
//! §3): prefix length is carried for containment tests but two
//! singletons with the same bytes and different prefixes still compare
//! equal, and port is never part of equality or ordering.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A normalised address: family, canonical bytes, optional prefix
/// length, optional port, optional resolved name.
#[derive(Debug, Clone)]
pub struct HostAddress {
    family: AddressFamily,
    bytes: [u8; 16],
    prefix_len: u8,
    port: Option<u16>,
    resolved_name: Option<String>,
}

impl HostAddress {
    fn default_prefix(family: AddressFamily) -> u8 {
        match family {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self::from_v4(v4),
            IpAddr::V6(v6) => Self::from_v6(v6),
        }
    }

    pub fn from_v4(addr: Ipv4Addr) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&addr.octets());
        HostAddress {
            family: AddressFamily::V4,
            bytes,
            prefix_len: 32,
            port: None,
            resolved_name: None,
        }
    }

    pub fn from_v6(addr: Ipv6Addr) -> Self {
        HostAddress {
            family: AddressFamily::V6,
            bytes: addr.octets(),
            prefix_len: 128,
            port: None,
            resolved_name: None,
        }
    }

    /// Parses `addr` or `addr/prefix`. A trailing `:port` is accepted and
    /// stripped for bracketed IPv6 or plain IPv4 forms.
    pub fn parse(text: &str) -> Result<Self, AddressParseError> {
        let (body, prefix) = match text.split_once('/') {
            Some((b, p)) => {
                let prefix: u8 = p
                    .parse()
                    .map_err(|_| AddressParseError(text.to_string()))?;
                (b, Some(prefix))
            }
            None => (text, None),
        };
        let ip: IpAddr = body
            .parse()
            .map_err(|_| AddressParseError(text.to_string()))?;
        let mut addr = Self::from_ip(ip);
        if let Some(p) = prefix {
            let max = Self::default_prefix(addr.family);
            if p > max {
                return Err(AddressParseError(text.to_string()));
            }
            addr.prefix_len = p;
        }
        Ok(addr)
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn resolved_name(&self) -> Option<&str> {
        self.resolved_name.as_deref()
    }

    pub fn set_resolved_name(&mut self, name: impl Into<String>) {
        self.resolved_name = Some(name.into());
    }

    fn significant_bytes(&self) -> &[u8] {
        match self.family {
            AddressFamily::V4 => &self.bytes[..4],
            AddressFamily::V6 => &self.bytes[..16],
        }
    }

    pub fn to_ip(&self) -> IpAddr {
        match self.family {
            AddressFamily::V4 => {
                IpAddr::V4(Ipv4Addr::new(self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]))
            }
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::from(self.bytes)),
        }
    }

    /// Textual form, `addr` or `addr/prefix` when the prefix is narrower
    /// than the family's full width.
    pub fn to_text(&self) -> String {
        let default_prefix = Self::default_prefix(self.family);
        if self.prefix_len == default_prefix {
            self.to_ip().to_string()
        } else {
            format!("{}/{}", self.to_ip(), self.prefix_len)
        }
    }

    /// True if `other`'s address falls within `self`'s prefix.
    pub fn contains(&self, other: &HostAddress) -> bool {
        if self.family != other.family {
            return false;
        }
        let bits = self.prefix_len as usize;
        let full_bytes = bits / 8;
        let rem_bits = bits % 8;
        let a = self.significant_bytes();
        let b = other.significant_bytes();
        if a[..full_bytes] != b[..full_bytes] {
            return false;
        }
        if rem_bits == 0 {
            return true;
        }
        let mask = !0u8 << (8 - rem_bits);
        (a[full_bytes] & mask) == (b[full_bytes] & mask)
    }
}

impl PartialEq for HostAddress {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family && self.significant_bytes() == other.significant_bytes()
    }
}

impl Eq for HostAddress {}

impl PartialOrd for HostAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HostAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.family
            .cmp(&other.family)
            .then_with(|| self.significant_bytes().cmp(other.significant_bytes()))
    }
}

impl std::hash::Hash for HostAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.family.hash(state);
        self.significant_bytes().hash(state);
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(pub String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a valid address: {}", self.0)
    }
}

impl std::error::Error for AddressParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_prefix_and_port() {
        let a = HostAddress::parse("1.2.3.4/24").unwrap();
        let b = HostAddress::parse("1.2.3.4").unwrap().with_port(22);
        assert_eq!(a, b);
    }

    #[test]
    fn different_families_never_equal() {
        let v4 = HostAddress::parse("1.2.3.4").unwrap();
        let v6 = HostAddress::parse("::1").unwrap();
        assert_ne!(v4, v6);
    }

    #[test]
    fn containment_respects_prefix() {
        let net = HostAddress::parse("10.0.0.0/24").unwrap();
        let inside = HostAddress::parse("10.0.0.200").unwrap();
        let outside = HostAddress::parse("10.0.1.1").unwrap();
        assert!(net.contains(&inside));
        assert!(!net.contains(&outside));
    }

    #[test]
    fn rejects_prefix_wider_than_family() {
        assert!(HostAddress::parse("1.2.3.4/33").is_err());
    }

    #[test]
    fn ordering_is_total_and_stable() {
        let a = HostAddress::parse("1.2.3.4").unwrap();
        let b = HostAddress::parse("1.2.3.5").unwrap();
        assert!(a < b);
    }
}
