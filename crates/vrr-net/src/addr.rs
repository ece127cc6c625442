//! Address encodings used to build OpenFlow match/action strings.
//!
//! These mirror the hex encodings the pipeline needs for `reg0`, `eth_dst`
//! and VLAN/port-id loads: total functions, `""` on parse failure (`0` for
//! `prefixlen`) rather than an error, since a bad address should simply
//! fail to match any packet rather than abort flow installation.

use std::net::Ipv4Addr;

/// A MAC address in `aa:bb:cc:dd:ee:ff` text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacAddr(pub String);

impl MacAddr {
    pub fn new(s: impl Into<String>) -> Self {
        MacAddr(s.into())
    }

    /// `0x` followed by the 12 hex digits with colons stripped.
    pub fn hex(&self) -> String {
        format!("0x{}", self.0.replace(':', ""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An IPv4 address in dotted-decimal text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAddr(pub String);

impl IpAddr {
    pub fn new(s: impl Into<String>) -> Self {
        IpAddr(s.into())
    }

    /// `0x` followed by 8 hex digits, network byte order. `""` if `self`
    /// does not parse as an IPv4 address.
    pub fn hex(&self) -> String {
        match self.0.parse::<Ipv4Addr>() {
            Ok(addr) => {
                let o = addr.octets();
                format!("0x{:02x}{:02x}{:02x}{:02x}", o[0], o[1], o[2], o[3])
            }
            Err(_) => String::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The Go netlink library's `net.IP.String()` renders a nil/zero IP as
    /// `<nil>`; the original control plane reuses this as the "directly
    /// connected, no next hop" sentinel for routes.
    pub fn is_nil_sentinel(&self) -> bool {
        self.0 == "<nil>"
    }
}

/// An IPv4 CIDR prefix, e.g. `"10.0.0.0/24"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPrefix(pub String);

impl IpPrefix {
    pub fn new(s: impl Into<String>) -> Self {
        IpPrefix(s.into())
    }

    /// Canonical text form, passed straight through.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix length in bits, `0` if `self` does not parse as `addr/len`.
    pub fn prefixlen(&self) -> u8 {
        self.0
            .rsplit_once('/')
            .and_then(|(_, len)| len.parse::<u8>().ok())
            .filter(|len| *len <= 32)
            .unwrap_or(0)
    }

    /// The address component with any `/mask` suffix stripped.
    pub fn host(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_hex_strips_colons() {
        assert_eq!(MacAddr::new("aa:bb:cc:dd:ee:ff").hex(), "0xaabbccddeeff");
    }

    #[test]
    fn ip_hex_is_network_byte_order() {
        assert_eq!(IpAddr::new("10.0.0.1").hex(), "0x0a000001");
        assert_eq!(IpAddr::new("192.168.1.254").hex(), "0xc0a801fe");
    }

    #[test]
    fn ip_hex_empty_on_parse_failure() {
        assert_eq!(IpAddr::new("<nil>").hex(), "");
        assert_eq!(IpAddr::new("not-an-ip").hex(), "");
    }

    #[test]
    fn nil_sentinel_detection() {
        assert!(IpAddr::new("<nil>").is_nil_sentinel());
        assert!(!IpAddr::new("10.0.0.1").is_nil_sentinel());
    }

    #[test]
    fn prefixlen_defaults_and_decodes() {
        assert_eq!(IpPrefix::new("0.0.0.0/0").prefixlen(), 0);
        assert_eq!(IpPrefix::new("10.0.0.1/32").prefixlen(), 32);
        assert_eq!(IpPrefix::new("10.0.0.0/24").prefixlen(), 24);
        assert_eq!(IpPrefix::new("garbage").prefixlen(), 0);
        assert_eq!(IpPrefix::new("10.0.0.0/99").prefixlen(), 0);
    }

    #[test]
    fn host_strips_mask() {
        assert_eq!(IpPrefix::new("10.0.0.5/24").host(), "10.0.0.5");
        assert_eq!(IpPrefix::new("10.0.0.5").host(), "10.0.0.5");
    }
}
